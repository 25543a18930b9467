// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Anthropic Messages API driver.
//!
//! The API reports no token log-probabilities, so every generation from
//! this driver carries `Confidence::Unknown`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    parse_data_url_parts,
    provider::{ensure_success, ResponseStream},
    sse::response_payloads,
    CredentialSource, FinishReason, GenerationRequest, Message, ModelProvider, ProviderError,
    ProviderKind, ResponseEvent, Role, TokenUsage,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The Messages API requires `max_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicProvider {
    id: String,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
    probe_model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        id: impl Into<String>,
        base_url: &str,
        credentials: Arc<dyn CredentialSource>,
        probe_model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            probe_model: probe_model.into(),
            client: reqwest::Client::new(),
        }
    }

    pub(crate) fn build_body(&self, req: &GenerationRequest, stream: bool) -> Value {
        let o = &req.options;
        let (system, messages) = build_anthropic_messages(&req.messages);
        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": o.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": stream,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        // Anthropic accepts temperatures in [0, 1] only.
        if let Some(t) = o.temperature {
            body["temperature"] = json!(t.clamp(0.0, 1.0));
        }
        if let Some(p) = o.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(k) = o.top_k {
            body["top_k"] = json!(k);
        }
        if !o.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(o.stop_sequences);
        }
        body
    }

    async fn post(&self, key: &str, body: &Value) -> Result<reqwest::Response, ProviderError> {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::upstream(&self.id, e))
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn stream(&self, req: GenerationRequest) -> Result<ResponseStream, ProviderError> {
        let key = self
            .credentials
            .api_key(&self.id)
            .await
            .ok_or_else(|| ProviderError::credential_missing(&self.id))?;

        let body = self.build_body(&req, true);
        debug!(provider = %self.id, model = %req.model, "sending anthropic request");

        let resp = ensure_success(&self.id, self.post(&key, &body).await?).await?;

        let provider = self.id.clone();
        let events = response_payloads(resp, &self.id).flat_map(move |item| {
            let events: Vec<Result<ResponseEvent, ProviderError>> = match item {
                Ok(payload) => match serde_json::from_str::<Value>(&payload) {
                    Ok(v) => parse_anthropic_event(&provider, &v),
                    Err(e) => {
                        warn!(provider = %provider, error = %e, "skipping malformed stream chunk");
                        Vec::new()
                    }
                },
                Err(e) => vec![Err(e)],
            };
            futures::stream::iter(events)
        });
        Ok(Box::pin(events))
    }

    async fn validate_credential(&self, api_key: &str) -> bool {
        let probe = GenerationRequest {
            messages: vec![Message::user("Hi")],
            model: self.probe_model.clone(),
            options: crate::GenerationOptions { max_tokens: Some(5), ..Default::default() },
            logprobs: false,
        };
        match self.post(api_key, &self.build_body(&probe, false)).await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(provider = %self.id, error = %e, "credential probe failed");
                false
            }
        }
    }
}

/// Split out the system prompt (sent as a top-level field) and convert the
/// rest of the conversation.  Multiple system messages are joined.
pub(crate) fn build_anthropic_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system: Vec<&str> = Vec::new();
    let mut out = Vec::new();
    for m in messages {
        if m.role == Role::System {
            system.push(&m.content);
            continue;
        }
        let content: Value = if m.attachments.is_empty() {
            json!(m.content)
        } else {
            let mut parts = Vec::new();
            for a in m.attachments.iter().filter(|a| a.is_image()) {
                let source = match parse_data_url_parts(&a.url) {
                    Ok((media_type, data)) => {
                        json!({ "type": "base64", "media_type": media_type, "data": data })
                    }
                    Err(_) => json!({ "type": "url", "url": a.url }),
                };
                parts.push(json!({ "type": "image", "source": source }));
            }
            parts.push(json!({ "type": "text", "text": m.content }));
            json!(parts)
        };
        out.push(json!({ "role": m.role.as_str(), "content": content }));
    }
    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, out)
}

pub(crate) fn parse_anthropic_event(
    provider: &str,
    v: &Value,
) -> Vec<Result<ResponseEvent, ProviderError>> {
    match v["type"].as_str().unwrap_or("") {
        "message_start" => match v["message"].get("usage") {
            Some(usage) => vec![Ok(ResponseEvent::Usage(TokenUsage {
                input_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
            }))],
            None => Vec::new(),
        },
        "content_block_delta" => {
            let delta = &v["delta"];
            match (delta["type"].as_str(), delta["text"].as_str()) {
                (Some("text_delta"), Some(text)) if !text.is_empty() => {
                    vec![Ok(ResponseEvent::TextDelta(text.to_string()))]
                }
                _ => Vec::new(),
            }
        }
        "message_delta" => {
            let mut events = Vec::new();
            if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                events.push(Ok(ResponseEvent::Finish(FinishReason::from_anthropic(reason))));
            }
            if let Some(usage) = v.get("usage") {
                events.push(Ok(ResponseEvent::Usage(TokenUsage {
                    input_tokens: 0,
                    output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
                })));
            }
            events
        }
        "message_stop" => vec![Ok(ResponseEvent::Done)],
        "error" => {
            let msg = v["error"]["message"].as_str().unwrap_or("unknown error");
            vec![Err(ProviderError::upstream(provider, msg))]
        }
        // ping, content_block_start, content_block_stop
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Attachment, GenerationOptions, StaticCredentials};

    fn make_provider() -> AnthropicProvider {
        AnthropicProvider::new(
            "anthropic",
            "https://api.anthropic.com/",
            Arc::new(StaticCredentials::new()),
            "claude-3-5-haiku-latest",
        )
    }

    fn events(v: Value) -> Vec<ResponseEvent> {
        parse_anthropic_event("anthropic", &v).into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn base_url_trailing_slash_stripped() {
        assert_eq!(make_provider().base_url, "https://api.anthropic.com");
    }

    #[test]
    fn system_prompt_is_lifted_out() {
        let (system, msgs) = build_anthropic_messages(&[
            Message::system("be brief"),
            Message::user("hello"),
            Message::assistant("hi"),
        ]);
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0], json!({ "role": "user", "content": "hello" }));
        assert_eq!(msgs[1]["role"], "assistant");
    }

    #[test]
    fn data_url_image_becomes_base64_source() {
        let m = Message::user("describe").with_attachment(Attachment {
            name: "a.jpg".into(),
            content_type: "image/jpeg".into(),
            url: "data:image/jpeg;base64,QUJD".into(),
        });
        let (_, msgs) = build_anthropic_messages(&[m]);
        let parts = msgs[0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["source"]["type"], "base64");
        assert_eq!(parts[0]["source"]["media_type"], "image/jpeg");
        assert_eq!(parts[0]["source"]["data"], "QUJD");
        assert_eq!(parts[1]["text"], "describe");
    }

    #[test]
    fn body_clamps_temperature_and_defaults_max_tokens() {
        let req = GenerationRequest {
            messages: vec![Message::user("x")],
            model: "claude-sonnet-4-5".into(),
            options: GenerationOptions {
                temperature: Some(1.4),
                top_k: Some(20),
                ..Default::default()
            },
            logprobs: true,
        };
        let body = make_provider().build_body(&req, true);
        assert_eq!(body["temperature"], json!(1.0f32));
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["top_k"], 20);
        // No logprobs on this API.
        assert!(body.get("logprobs").is_none());
    }

    #[test]
    fn message_start_yields_input_usage() {
        let ev = events(json!({
            "type": "message_start",
            "message": { "usage": { "input_tokens": 42, "output_tokens": 1 } }
        }));
        assert_eq!(ev, vec![ResponseEvent::Usage(TokenUsage { input_tokens: 42, output_tokens: 1 })]);
    }

    #[test]
    fn text_delta_is_forwarded() {
        let ev = events(json!({
            "type": "content_block_delta",
            "delta": { "type": "text_delta", "text": "world" }
        }));
        assert_eq!(ev, vec![ResponseEvent::TextDelta("world".into())]);
    }

    #[test]
    fn other_delta_types_are_ignored() {
        let ev = events(json!({
            "type": "content_block_delta",
            "delta": { "type": "thinking_delta", "thinking": "hmm" }
        }));
        assert!(ev.is_empty());
    }

    #[test]
    fn message_delta_yields_finish_and_output_usage() {
        let ev = events(json!({
            "type": "message_delta",
            "delta": { "stop_reason": "max_tokens" },
            "usage": { "output_tokens": 88 }
        }));
        assert_eq!(
            ev,
            vec![
                ResponseEvent::Finish(FinishReason::Length),
                ResponseEvent::Usage(TokenUsage { input_tokens: 0, output_tokens: 88 }),
            ]
        );
    }

    #[test]
    fn message_stop_yields_done_and_ping_is_ignored() {
        assert_eq!(events(json!({ "type": "message_stop" })), vec![ResponseEvent::Done]);
        assert!(events(json!({ "type": "ping" })).is_empty());
    }

    #[test]
    fn error_event_is_upstream() {
        let out = parse_anthropic_event(
            "anthropic",
            &json!({ "type": "error", "error": { "type": "overloaded_error", "message": "Overloaded" } }),
        );
        assert_eq!(out, vec![Err(ProviderError::upstream("anthropic", "Overloaded"))]);
    }

    #[tokio::test]
    async fn no_key_is_credential_missing() {
        let req = GenerationRequest { model: "claude-sonnet-4-5".into(), ..Default::default() };
        let err = make_provider().stream(req).await.err().unwrap();
        assert_eq!(err, ProviderError::credential_missing("anthropic"));
    }
}
