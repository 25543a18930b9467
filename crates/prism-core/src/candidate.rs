// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use prism_model::{Confidence, FinishReason, Generation, ModelInfo, TokenUsage};
use serde::{Deserialize, Serialize};

/// One generated response alternative (a "possibility").
///
/// `content` only grows while `is_streaming` is true; the completing event
/// clears the flag and the candidate is immutable from then on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    pub model_info: ModelInfo,
    pub content: String,
    pub confidence: Confidence,
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    pub is_streaming: bool,
}

impl Candidate {
    /// A fresh, still-streaming candidate with empty content.
    pub fn started(id: impl Into<String>, model_info: ModelInfo, temperature: Option<f32>) -> Self {
        Self {
            id: id.into(),
            model_info,
            content: String::new(),
            confidence: Confidence::Unknown,
            temperature,
            finish_reason: None,
            token_usage: None,
            is_streaming: true,
        }
    }

    /// A completed candidate built from a finished provider call.
    pub fn from_generation(
        id: impl Into<String>,
        model_info: ModelInfo,
        temperature: Option<f32>,
        generation: Generation,
    ) -> Self {
        Self {
            id: id.into(),
            model_info,
            content: generation.content,
            confidence: generation.confidence,
            temperature,
            finish_reason: generation.finish_reason,
            token_usage: generation.usage,
            is_streaming: false,
        }
    }
}

pub fn new_candidate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Sort by confidence, best first, unknowns last, stable otherwise.
pub fn rank(candidates: &mut [Candidate]) {
    prism_model::rank_by(candidates, |c| c.confidence);
}
