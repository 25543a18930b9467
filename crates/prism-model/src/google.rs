// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Google Gemini driver, native Generative Language API.
//!
//! # Auth
//! API key via the `x-goog-api-key` header.
//!
//! # Endpoint pattern
//! `POST {base}/v1beta/models/{model}:streamGenerateContent?alt=sse`
//!
//! Log-probabilities are requested with `generationConfig.responseLogprobs`
//! and arrive in `candidates[0].logprobsResult.chosenCandidates[]`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    parse_data_url_parts,
    provider::{ensure_success, ResponseStream},
    sse::{response_payloads, DONE_SENTINEL},
    CredentialSource, FinishReason, GenerationRequest, Message, ModelProvider, ProviderError,
    ProviderKind, ResponseEvent, Role, TokenUsage,
};

pub struct GoogleProvider {
    id: String,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
    probe_model: String,
    client: reqwest::Client,
}

impl GoogleProvider {
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

    fn url(&self, model: &str, stream: bool) -> String {
        if stream {
            format!("{}/v1beta/models/{model}:streamGenerateContent?alt=sse", self.base_url)
        } else {
            format!("{}/v1beta/models/{model}:generateContent", self.base_url)
        }
    }

    pub(crate) fn build_body(&self, req: &GenerationRequest) -> Value {
        let o = &req.options;
        let (system_parts, contents) = build_gemini_contents(&req.messages);

        let mut config = json!({});
        if let Some(max) = o.max_tokens {
            config["maxOutputTokens"] = json!(max);
        }
        if let Some(t) = o.temperature {
            config["temperature"] = json!(t);
        }
        if let Some(p) = o.top_p {
            config["topP"] = json!(p);
        }
        if let Some(k) = o.top_k {
            config["topK"] = json!(k);
        }
        if let Some(p) = o.frequency_penalty {
            config["frequencyPenalty"] = json!(p);
        }
        if let Some(p) = o.presence_penalty {
            config["presencePenalty"] = json!(p);
        }
        if !o.stop_sequences.is_empty() {
            config["stopSequences"] = json!(o.stop_sequences);
        }
        if req.logprobs {
            config["responseLogprobs"] = json!(true);
        }

        let mut body = json!({ "contents": contents, "generationConfig": config });
        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({ "parts": system_parts });
        }
        body
    }

    async fn post(&self, url: &str, key: &str, body: &Value) -> Result<reqwest::Response, ProviderError> {
        self.client
            .post(url)
            .header("x-goog-api-key", key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::upstream(&self.id, e))
    }
}

#[async_trait]
impl ModelProvider for GoogleProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn stream(&self, req: GenerationRequest) -> Result<ResponseStream, ProviderError> {
        let key = self
            .credentials
            .api_key(&self.id)
            .await
            .ok_or_else(|| ProviderError::credential_missing(&self.id))?;

        let body = self.build_body(&req);
        debug!(provider = %self.id, model = %req.model, "sending Google Gemini request");

        let url = self.url(&req.model, true);
        let resp = ensure_success(&self.id, self.post(&url, &key, &body).await?).await?;

        let provider = self.id.clone();
        let events = response_payloads(resp, &self.id).flat_map(move |item| {
            let events: Vec<Result<ResponseEvent, ProviderError>> = match item {
                Ok(payload) if payload == DONE_SENTINEL => vec![Ok(ResponseEvent::Done)],
                Ok(payload) => match serde_json::from_str::<Value>(&payload) {
                    Ok(v) => parse_gemini_chunk(&provider, &v),
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
        let url = self.url(&probe.model, false);
        match self.post(&url, api_key, &self.build_body(&probe)).await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(provider = %self.id, error = %e, "credential probe failed");
                false
            }
        }
    }
}

/// Convert messages into Gemini `systemInstruction` parts and `contents`.
/// Assistant turns use the role name `model`.
pub(crate) fn build_gemini_contents(messages: &[Message]) -> (Vec<Value>, Vec<Value>) {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();
    for m in messages {
        if m.role == Role::System {
            system_parts.push(json!({ "text": m.content }));
            continue;
        }
        let role = if m.role == Role::Assistant { "model" } else { "user" };
        let mut parts = vec![json!({ "text": m.content })];
        for a in m.attachments.iter().filter(|a| a.is_image()) {
            match parse_data_url_parts(&a.url) {
                Ok((mime, data)) => {
                    parts.push(json!({ "inlineData": { "mimeType": mime, "data": data } }))
                }
                Err(_) => parts.push(json!({
                    "fileData": { "mimeType": a.content_type, "fileUri": a.url }
                })),
            }
        }
        contents.push(json!({ "role": role, "parts": parts }));
    }
    (system_parts, contents)
}

pub(crate) fn parse_gemini_chunk(
    provider: &str,
    v: &Value,
) -> Vec<Result<ResponseEvent, ProviderError>> {
    if let Some(err) = v.get("error") {
        let msg = err["message"].as_str().unwrap_or("unknown error");
        return vec![Err(ProviderError::upstream(provider, msg))];
    }

    let mut events = Vec::new();
    let candidate = &v["candidates"][0];

    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            // Thought summaries are not part of the answer.
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                continue;
            }
            if let Some(text) = part["text"].as_str().filter(|t| !t.is_empty()) {
                events.push(Ok(ResponseEvent::TextDelta(text.to_string())));
            }
        }
    }

    if let Some(chosen) = candidate["logprobsResult"]["chosenCandidates"].as_array() {
        let lp: Vec<f64> = chosen
            .iter()
            .map(|c| c["logProbability"].as_f64().unwrap_or(f64::NAN))
            .collect();
        if !lp.is_empty() {
            events.push(Ok(ResponseEvent::Logprobs(lp)));
        }
    }

    if let Some(reason) = candidate["finishReason"].as_str() {
        events.push(Ok(ResponseEvent::Finish(FinishReason::from_google(reason))));
    }

    if let Some(meta) = v.get("usageMetadata") {
        events.push(Ok(ResponseEvent::Usage(TokenUsage {
            input_tokens: meta["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            output_tokens: meta["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
        })));
    }

    events
}
