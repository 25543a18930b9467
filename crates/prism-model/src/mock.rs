// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;

use crate::{
    provider::ResponseStream, FinishReason, GenerationRequest, ModelProvider, ProviderError,
    ProviderKind, ResponseEvent, Role, TokenUsage,
};

/// Log-probability the echo mock reports for every token.
const MOCK_TOKEN_LOGPROB: f64 = -0.1;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Deterministic mock provider.  Echoes the last user message back word by
/// word, with a fixed logprob per word when logprobs are requested.
pub struct MockProvider {
    id: String,
}

impl MockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    async fn stream(&self, req: GenerationRequest) -> Result<ResponseStream, ProviderError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("[no input]");
        let text = format!("MOCK: {reply}");

        let mut events: Vec<Result<ResponseEvent, ProviderError>> = Vec::new();
        let mut words = 0u32;
        for word in text.split_inclusive(' ') {
            words += 1;
            events.push(Ok(ResponseEvent::TextDelta(word.to_string())));
            if req.logprobs {
                events.push(Ok(ResponseEvent::Logprobs(vec![MOCK_TOKEN_LOGPROB])));
            }
        }
        events.push(Ok(ResponseEvent::Usage(TokenUsage { input_tokens: 10, output_tokens: words })));
        events.push(Ok(ResponseEvent::Finish(FinishReason::Stop)));
        events.push(Ok(ResponseEvent::Done));
        Ok(Box::pin(stream::iter(events)))
    }

    async fn validate_credential(&self, api_key: &str) -> bool {
        !api_key.trim().is_empty()
    }
}

#[derive(Debug, Clone)]
enum Script {
    Events(Vec<ResponseEvent>),
    Fail(String),
}

/// A pre-scripted mock provider.  Each model has its own queue of replies;
/// a call pops the front of the queue for the requested model.  This lets
/// tests specify exact event sequences and failures without network access.
pub struct ScriptedMockProvider {
    id: String,
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    delay: Option<Duration>,
    accepted_keys: HashSet<String>,
    /// Every request seen, in call order.
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedMockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scripts: Mutex::new(HashMap::new()),
            delay: None,
            accepted_keys: HashSet::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn push(self, model: &str, script: Script) -> Self {
        lock(&self.scripts).entry(model.to_string()).or_default().push_back(script);
        self
    }

    /// Queue an exact event sequence for the next call to `model`.
    pub fn reply(self, model: &str, events: Vec<ResponseEvent>) -> Self {
        self.push(model, Script::Events(events))
    }

    /// Queue a plain text reply without logprobs.
    pub fn text(self, model: &str, text: &str) -> Self {
        self.reply(
            model,
            vec![
                ResponseEvent::TextDelta(text.to_string()),
                ResponseEvent::Finish(FinishReason::Stop),
                ResponseEvent::Done,
            ],
        )
    }

    /// Queue a text reply whose single logprob scores to `confidence`.
    pub fn text_with_confidence(self, model: &str, text: &str, confidence: f64) -> Self {
        self.reply(
            model,
            vec![
                ResponseEvent::TextDelta(text.to_string()),
                ResponseEvent::Logprobs(vec![confidence.ln()]),
                ResponseEvent::Finish(FinishReason::Stop),
                ResponseEvent::Done,
            ],
        )
    }

    /// Queue an upstream failure for the next call to `model`.
    pub fn fail(self, model: &str, cause: &str) -> Self {
        self.push(model, Script::Fail(cause.to_string()))
    }

    /// Sleep before answering every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Key that `validate_credential` accepts.
    pub fn accept_key(mut self, key: &str) -> Self {
        self.accepted_keys.insert(key.to_string());
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedMockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    async fn stream(&self, req: GenerationRequest) -> Result<ResponseStream, ProviderError> {
        let script = lock(&self.scripts).get_mut(&req.model).and_then(VecDeque::pop_front);
        lock(&self.requests).push(req);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let events: Vec<Result<ResponseEvent, ProviderError>> = match script {
            Some(Script::Fail(cause)) => return Err(ProviderError::upstream(&self.id, cause)),
            Some(Script::Events(events)) => events.into_iter().map(Ok).collect(),
            // Default fallback when all scripts are consumed
            None => vec![
                Ok(ResponseEvent::TextDelta("[no more scripts]".into())),
                Ok(ResponseEvent::Done),
            ],
        };
        Ok(Box::pin(stream::iter(events)))
    }

    async fn validate_credential(&self, api_key: &str) -> bool {
        self.accepted_keys.contains(api_key)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
