// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tracing::warn;

use crate::{
    score_from_logprobs, Generation, GenerationRequest, ProviderError, ProviderKind,
    ResponseEvent, TokenUsage,
};

pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponseEvent, ProviderError>> + Send>>;

/// Uniform interface over every LLM backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider id as it appears in `ModelInfo::provider_id`.
    fn id(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Send a request and return the streaming response.
    async fn stream(&self, req: GenerationRequest) -> Result<ResponseStream, ProviderError>;

    /// [`ModelProvider::stream`], failing when the connection closes before
    /// the end-of-response marker of providers that send one.
    async fn checked_stream(&self, req: GenerationRequest) -> Result<ResponseStream, ProviderError> {
        let stream = self.stream(req).await?;
        if self.kind().has_stream_terminator() {
            Ok(require_terminator(self.id(), stream))
        } else {
            Ok(stream)
        }
    }

    /// Send a request and wait for the whole completion.
    ///
    /// The default implementation drains [`ModelProvider::checked_stream`].
    async fn generate(&self, req: GenerationRequest) -> Result<Generation, ProviderError> {
        let stream = self.checked_stream(req).await?;
        collect_generation(stream).await
    }

    /// Check whether `api_key` is accepted by the provider.  Network and
    /// HTTP failures report `false`; this never errors.
    async fn validate_credential(&self, api_key: &str) -> bool;
}

/// Drain a response stream into a [`Generation`].
///
/// Text deltas are concatenated in arrival order.  Confidence is scored only
/// when at least one logprob event arrived; otherwise it is `Unknown`.
pub async fn collect_generation(mut stream: ResponseStream) -> Result<Generation, ProviderError> {
    let mut content = String::new();
    let mut logprobs: Vec<f64> = Vec::new();
    let mut saw_logprobs = false;
    let mut usage: Option<TokenUsage> = None;
    let mut finish_reason = None;

    while let Some(event) = stream.next().await {
        match event? {
            ResponseEvent::TextDelta(t) => content.push_str(&t),
            ResponseEvent::Logprobs(lp) => {
                saw_logprobs = true;
                logprobs.extend(lp);
            }
            ResponseEvent::Usage(u) => usage.get_or_insert_with(TokenUsage::default).merge(u),
            ResponseEvent::Finish(r) => finish_reason = Some(r),
            ResponseEvent::Done => break,
        }
    }

    let confidence = score_from_logprobs(saw_logprobs.then_some(logprobs.as_slice()));
    Ok(Generation { content, confidence, finish_reason, usage })
}

/// Pass `stream` through until [`ResponseEvent::Done`].  If the stream ends
/// without it, yield one final upstream error instead.
pub fn require_terminator(provider: &str, stream: ResponseStream) -> ResponseStream {
    let state = Some((stream, provider.to_string()));
    Box::pin(futures::stream::unfold(state, |state| async move {
        let (mut stream, provider) = state?;
        match stream.next().await {
            Some(Ok(ResponseEvent::Done)) => Some((Ok(ResponseEvent::Done), None)),
            Some(item) => Some((item, Some((stream, provider)))),
            None => {
                warn!(provider = %provider, "response stream closed before completion");
                let err = ProviderError::upstream(&provider, "stream ended before the response was complete");
                Some((Err(err), None))
            }
        }
    }))
}

/// Map a non-2xx response to [`ProviderError::Upstream`] carrying the
/// status and body text.
pub(crate) async fn ensure_success(
    provider: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    Err(ProviderError::upstream(provider, format!("HTTP {status}: {text}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Confidence, FinishReason};

    fn stream_of(events: Vec<Result<ResponseEvent, ProviderError>>) -> ResponseStream {
        Box::pin(futures::stream::iter(events))
    }

    #[tokio::test]
    async fn text_is_concatenated_and_scored() {
        let g = collect_generation(stream_of(vec![
            Ok(ResponseEvent::TextDelta("Hi".into())),
            Ok(ResponseEvent::Logprobs(vec![-0.1])),
            Ok(ResponseEvent::TextDelta(" there".into())),
            Ok(ResponseEvent::Logprobs(vec![-0.2])),
            Ok(ResponseEvent::Finish(FinishReason::Stop)),
            Ok(ResponseEvent::Done),
        ]))
        .await
        .unwrap();
        assert_eq!(g.content, "Hi there");
        assert!(matches!(g.confidence, Confidence::Score(v) if (v - 0.8607).abs() < 1e-4));
        assert_eq!(g.finish_reason, Some(FinishReason::Stop));
        assert!(g.usage.is_none());
    }

    #[tokio::test]
    async fn no_logprobs_means_unknown() {
        let g = collect_generation(stream_of(vec![Ok(ResponseEvent::TextDelta("x".into()))]))
            .await
            .unwrap();
        assert_eq!(g.confidence, Confidence::Unknown);
    }

    #[tokio::test]
    async fn partial_usage_reports_are_merged() {
        let g = collect_generation(stream_of(vec![
            Ok(ResponseEvent::Usage(TokenUsage { input_tokens: 10, output_tokens: 0 })),
            Ok(ResponseEvent::Usage(TokenUsage { input_tokens: 0, output_tokens: 4 })),
            Ok(ResponseEvent::Done),
        ]))
        .await
        .unwrap();
        assert_eq!(g.usage, Some(TokenUsage { input_tokens: 10, output_tokens: 4 }));
    }

    #[tokio::test]
    async fn stream_error_is_propagated() {
        let err = collect_generation(stream_of(vec![
            Ok(ResponseEvent::TextDelta("partial".into())),
            Err(ProviderError::upstream("openai", "connection reset")),
        ]))
        .await
        .unwrap_err();
        assert_eq!(err.provider(), "openai");
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error_when_a_terminator_is_expected() {
        let truncated = || {
            stream_of(vec![
                Ok(ResponseEvent::TextDelta("half an ans".into())),
                Ok(ResponseEvent::Finish(FinishReason::Stop)),
            ])
        };
        let err = collect_generation(require_terminator("anthropic", truncated())).await.unwrap_err();
        match err {
            ProviderError::Upstream { provider, cause } => {
                assert_eq!(provider, "anthropic");
                assert!(cause.contains("ended before"), "{cause}");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
        // Without the requirement the same stream is accepted as-is.
        assert_eq!(collect_generation(truncated()).await.unwrap().content, "half an ans");
    }

    #[tokio::test]
    async fn terminated_stream_passes_through_unchanged() {
        let g = collect_generation(require_terminator(
            "openai",
            stream_of(vec![Ok(ResponseEvent::TextDelta("whole".into())), Ok(ResponseEvent::Done)]),
        ))
        .await
        .unwrap();
        assert_eq!(g.content, "whole");
    }

    #[test]
    fn only_gemini_and_mocks_close_without_a_marker() {
        assert!(ProviderKind::OpenAi.has_stream_terminator());
        assert!(ProviderKind::OpenAiCompatible.has_stream_terminator());
        assert!(ProviderKind::Anthropic.has_stream_terminator());
        assert!(!ProviderKind::Google.has_stream_terminator());
        assert!(!ProviderKind::Mock.has_stream_terminator());
    }

    #[tokio::test]
    async fn events_after_done_are_ignored() {
        let g = collect_generation(stream_of(vec![
            Ok(ResponseEvent::TextDelta("a".into())),
            Ok(ResponseEvent::Done),
            Ok(ResponseEvent::TextDelta("b".into())),
        ]))
        .await
        .unwrap();
        assert_eq!(g.content, "a");
    }
}
