// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared driver for OpenAI-compatible chat completion APIs.
//!
//! OpenAI itself and every hosted or local backend that speaks the same
//! `/chat/completions` SSE format (OpenRouter, Groq, DeepSeek, Ollama,
//! vLLM, custom base URLs, ...) are served by one [`OpenAICompatProvider`]
//! configured with its own URL, key requirement and headers.
//!
//! Token log-probabilities are requested with `logprobs: true` and arrive
//! in `choices[0].logprobs.content[].logprob`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, trace, warn};

use crate::{
    provider::{ensure_success, ResponseStream},
    sse::{response_payloads, DONE_SENTINEL},
    CredentialSource, FinishReason, GenerationRequest, Message, ModelProvider, ProviderError,
    ProviderKind, ResponseEvent, TokenUsage,
};

pub struct OpenAICompatProvider {
    id: String,
    kind: ProviderKind,
    /// Full chat completions URL, e.g. `https://api.groq.com/openai/v1/chat/completions`.
    chat_url: String,
    credentials: Arc<dyn CredentialSource>,
    /// Local servers accept anonymous requests.
    requires_key: bool,
    /// Additional HTTP headers (e.g. `HTTP-Referer` for OpenRouter).
    extra_headers: Vec<(String, String)>,
    /// Model used for the credential probe.
    probe_model: String,
    client: reqwest::Client,
}

impl OpenAICompatProvider {
    /// `base_url` ends **before** `/chat/completions`, e.g. `https://api.openai.com/v1`.
    pub fn new(
        id: impl Into<String>,
        kind: ProviderKind,
        base_url: &str,
        credentials: Arc<dyn CredentialSource>,
        requires_key: bool,
        probe_model: impl Into<String>,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            id: id.into(),
            kind,
            chat_url: format!("{base}/chat/completions"),
            credentials,
            requires_key,
            extra_headers: Vec::new(),
            probe_model: probe_model.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.extra_headers = headers;
        self
    }

    /// OpenAI's own API wants `max_completion_tokens`; compatible servers
    /// still use `max_tokens`.
    fn max_tokens_key(&self) -> &'static str {
        if self.kind == ProviderKind::OpenAi {
            "max_completion_tokens"
        } else {
            "max_tokens"
        }
    }

    /// Reasoning models (o1, o3) and gpt-5 reject any non-default temperature.
    fn accepts_temperature(&self, model: &str) -> bool {
        self.kind != ProviderKind::OpenAi
            || !(model.starts_with("o1") || model.starts_with("o3") || model.starts_with("gpt-5"))
    }

    pub(crate) fn build_body(&self, req: &GenerationRequest, stream: bool) -> Value {
        let o = &req.options;
        let mut body = json!({
            "model": req.model,
            "messages": build_openai_messages(&req.messages),
            "stream": stream,
        });
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if let Some(max) = o.max_tokens {
            body[self.max_tokens_key()] = json!(max);
        }
        if let Some(t) = o.temperature.filter(|_| self.accepts_temperature(&req.model)) {
            body["temperature"] = json!(t);
        }
        if let Some(p) = o.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(p) = o.frequency_penalty {
            body["frequency_penalty"] = json!(p);
        }
        if let Some(p) = o.presence_penalty {
            body["presence_penalty"] = json!(p);
        }
        if !o.stop_sequences.is_empty() {
            body["stop"] = json!(o.stop_sequences);
        }
        if req.logprobs {
            body["logprobs"] = json!(true);
        }
        body
    }

    async fn post(&self, key: Option<&str>, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let mut http_req = self.client.post(&self.chat_url).json(body);
        if let Some(key) = key {
            http_req = http_req.bearer_auth(key);
        }
        for (name, val) in &self.extra_headers {
            http_req = http_req.header(name.as_str(), val.as_str());
        }
        http_req.send().await.map_err(|e| ProviderError::upstream(&self.id, e))
    }
}

#[async_trait]
impl ModelProvider for OpenAICompatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn stream(&self, req: GenerationRequest) -> Result<ResponseStream, ProviderError> {
        let key = self.credentials.api_key(&self.id).await;
        if self.requires_key && key.is_none() {
            return Err(ProviderError::credential_missing(&self.id));
        }

        let body = self.build_body(&req, true);
        debug!(
            provider = %self.id,
            model = %req.model,
            message_count = req.messages.len(),
            logprobs = req.logprobs,
            "sending chat completion request"
        );
        trace!(request_body = ?body, "full chat completion request");

        let resp = ensure_success(&self.id, self.post(key.as_deref(), &body).await?).await?;

        let provider = self.id.clone();
        let events = response_payloads(resp, &self.id).flat_map(move |item| {
            let events = match item {
                Ok(payload) => parse_sse_payload(&provider, &payload),
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
        let body = self.build_body(&probe, false);
        match self.post(Some(api_key), &body).await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(provider = %self.id, error = %e, "credential probe failed");
                false
            }
        }
    }
}

/// Interpret one SSE `data:` payload.  Malformed JSON is logged and skipped.
pub(crate) fn parse_sse_payload(
    provider: &str,
    data: &str,
) -> Vec<Result<ResponseEvent, ProviderError>> {
    if data == DONE_SENTINEL {
        return vec![Ok(ResponseEvent::Done)];
    }
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            warn!(provider, error = %e, "skipping malformed stream chunk");
            return Vec::new();
        }
    };
    // Some gateways report failures in-band after a 200 response.
    if let Some(err) = v.get("error").filter(|e| !e.is_null()) {
        let msg = err["message"].as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
        return vec![Err(ProviderError::upstream(provider, msg))];
    }
    parse_sse_chunk(&v).into_iter().map(Ok).collect()
}

pub(crate) fn parse_sse_chunk(v: &Value) -> Vec<ResponseEvent> {
    let mut events = Vec::new();
    let choice = &v["choices"][0];

    if let Some(text) = choice["delta"]["content"].as_str() {
        if !text.is_empty() {
            events.push(ResponseEvent::TextDelta(text.to_string()));
        }
    }

    if let Some(entries) = choice["logprobs"]["content"].as_array() {
        let lp: Vec<f64> = entries
            .iter()
            .map(|e| e["logprob"].as_f64().unwrap_or(f64::NAN))
            .collect();
        if !lp.is_empty() {
            events.push(ResponseEvent::Logprobs(lp));
        }
    }

    if let Some(reason) = choice["finish_reason"].as_str() {
        events.push(ResponseEvent::Finish(FinishReason::from_openai(reason)));
    }

    // Usage-only chunk (emitted when stream_options.include_usage = true)
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        events.push(ResponseEvent::Usage(TokenUsage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        }));
    }

    events
}

/// Convert messages into the OpenAI wire-format JSON array.  Image
/// attachments become `image_url` content parts; other attachments are
/// referenced by name in a text part.
pub(crate) fn build_openai_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            if m.attachments.is_empty() {
                return json!({ "role": m.role.as_str(), "content": m.content });
            }
            let mut parts = vec![json!({ "type": "text", "text": m.content })];
            for a in &m.attachments {
                if a.is_image() {
                    parts.push(json!({ "type": "image_url", "image_url": { "url": a.url } }));
                } else {
                    parts.push(json!({ "type": "text", "text": format!("[attachment: {}]", a.name) }));
                }
            }
            json!({ "role": m.role.as_str(), "content": parts })
        })
        .collect()
}
