// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Streaming protocol events.
//!
//! Per candidate the order is: one `possibility_start`, any number of
//! `token`, at most one `confidence`, then exactly one terminal event
//! (`possibility_complete`, or `error` which removes the candidate).
//! A single `done` closes the whole stream.  Across candidates events
//! interleave arbitrarily.

use prism_model::{FinishReason, ModelInfo, TokenUsage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    PossibilityStart {
        candidate_id: String,
        model: ModelInfo,
        provider: String,
        #[serde(default)]
        temperature: Option<f32>,
    },
    Token {
        candidate_id: String,
        content: String,
    },
    Confidence {
        candidate_id: String,
        confidence: f64,
    },
    PossibilityComplete {
        candidate_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<FinishReason>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },
    Error {
        candidate_id: String,
        message: String,
    },
    Done {
        #[serde(default)]
        succeeded: usize,
        #[serde(default)]
        failed: usize,
    },
}

impl StreamEvent {
    /// The candidate this event belongs to; `None` for `done`.
    pub fn candidate_id(&self) -> Option<&str> {
        match self {
            StreamEvent::PossibilityStart { candidate_id, .. }
            | StreamEvent::Token { candidate_id, .. }
            | StreamEvent::Confidence { candidate_id, .. }
            | StreamEvent::PossibilityComplete { candidate_id, .. }
            | StreamEvent::Error { candidate_id, .. } => Some(candidate_id),
            StreamEvent::Done { .. } => None,
        }
    }

    /// `possibility_complete` or `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::PossibilityComplete { .. } | StreamEvent::Error { .. })
    }

    pub fn token(candidate_id: &str, content: impl Into<String>) -> Self {
        StreamEvent::Token { candidate_id: candidate_id.to_string(), content: content.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_wire_shape() {
        let v = serde_json::to_value(StreamEvent::token("c1", "Hi")).unwrap();
        assert_eq!(v, json!({ "type": "token", "candidateId": "c1", "content": "Hi" }));
    }

    #[test]
    fn start_carries_model_provider_and_temperature() {
        let ev = StreamEvent::PossibilityStart {
            candidate_id: "c1".into(),
            model: ModelInfo {
                id: "gpt-4o".into(),
                display_name: "GPT-4o".into(),
                provider_id: "openai".into(),
                max_tokens: 1024,
                supports_confidence_score: true,
                accepted_content_types: vec!["text/plain".into()],
            },
            provider: "openai".into(),
            temperature: Some(0.7),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "possibility_start");
        assert_eq!(v["model"]["displayName"], "GPT-4o");
        assert_eq!(v["provider"], "openai");
        let back: StreamEvent = serde_json::from_value(v).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn complete_omits_absent_fields() {
        let ev = StreamEvent::PossibilityComplete {
            candidate_id: "c1".into(),
            finish_reason: Some(FinishReason::Stop),
            usage: None,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v, json!({ "type": "possibility_complete", "candidateId": "c1", "finishReason": "stop" }));
    }

    #[test]
    fn bare_done_parses() {
        let ev: StreamEvent = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        assert_eq!(ev, StreamEvent::Done { succeeded: 0, failed: 0 });
        assert_eq!(ev.candidate_id(), None);
    }

    #[test]
    fn error_is_terminal_and_token_is_not() {
        let err = StreamEvent::Error { candidate_id: "c".into(), message: "boom".into() };
        assert!(err.is_terminal());
        assert_eq!(err.candidate_id(), Some("c"));
        assert!(!StreamEvent::token("c", "x").is_terminal());
    }
}
