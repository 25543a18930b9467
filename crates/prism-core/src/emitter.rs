// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Server-side emission of [`StreamEvent`]s.
//!
//! Every job runs concurrently and writes its own events into one channel.
//! Per candidate: `possibility_start`, `token`*, `confidence`?, then
//! `possibility_complete` or `error`.  A final `done` is sent unless the
//! request was cancelled; after cancellation nothing more is sent.

use std::sync::Arc;

use futures::future::join_all;
use futures::StreamExt;
use prism_model::{score_from_logprobs, Confidence, FinishReason, ModelInfo, ResponseEvent, TokenUsage};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::{orchestrator::request_for, plan::Job, Cancellation, EngineError, Orchestrator, StreamEvent};

/// Channel capacity between the emitter and its consumer.
pub const EVENT_BUFFER: usize = 256;

/// How an emission run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Set when the caller cancelled or the consumer went away.
    pub cancelled: bool,
}

enum JobOutcome {
    Completed,
    Failed,
    Cancelled,
}

struct Collected {
    logprobs: Option<Vec<f64>>,
    finish_reason: Option<FinishReason>,
    usage: Option<TokenUsage>,
}

impl Orchestrator {
    /// Run `jobs` and send their events to `tx`.
    ///
    /// A closed receiver counts as cancellation: in-flight calls are dropped
    /// and no `done` is sent.
    pub async fn emit(&self, jobs: Vec<Job>, tx: mpsc::Sender<StreamEvent>, cancel: &Cancellation) -> EmitSummary {
        // Child token so a vanished consumer can stop this run without
        // touching the caller's token.
        let cancel = cancel.child();
        let outcomes = join_all(jobs.iter().map(|job| self.emit_job(job, &tx, &cancel))).await;

        let mut summary = EmitSummary::default();
        for outcome in outcomes {
            match outcome {
                JobOutcome::Completed => summary.succeeded += 1,
                JobOutcome::Failed => summary.failed += 1,
                JobOutcome::Cancelled => summary.cancelled = true,
            }
        }
        if summary.cancelled || cancel.is_cancelled() {
            debug!(succeeded = summary.succeeded, "emission cancelled");
            summary.cancelled = true;
            return summary;
        }

        let done = StreamEvent::Done { succeeded: summary.succeeded, failed: summary.failed };
        if send(&tx, &cancel, done).await.is_err() {
            summary.cancelled = true;
        }
        summary
    }

    /// Spawn [`Orchestrator::emit`] and return its events as a stream.  The
    /// stream ends after `done`, or early on cancellation.
    pub fn stream(self: Arc<Self>, jobs: Vec<Job>, cancel: Cancellation) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            self.emit(jobs, tx, &cancel).await;
        });
        ReceiverStream::new(rx)
    }

    async fn emit_job(&self, job: &Job, tx: &mpsc::Sender<StreamEvent>, cancel: &Cancellation) -> JobOutcome {
        let id = &job.candidate_id;
        let resolved = self.resolve(&job.model_id);

        let _permit = match cancel.run(async { Ok(self.acquire().await) }).await {
            Ok(permit) => permit,
            Err(_) => return JobOutcome::Cancelled,
        };

        // Every candidate opens with a start event, even one whose model or
        // provider cannot be resolved, so its error has something to close.
        let info = match &resolved {
            Ok((info, _)) => info.clone(),
            Err(_) => self.describe_unresolved(&job.model_id),
        };
        let start = StreamEvent::PossibilityStart {
            candidate_id: id.clone(),
            provider: info.provider_id.clone(),
            model: info.clone(),
            temperature: job.temperature(),
        };
        if send(tx, cancel, start).await.is_err() {
            return JobOutcome::Cancelled;
        }
        let provider = match resolved {
            Ok((_, provider)) => provider,
            Err(e) => return fail(tx, cancel, id, e).await,
        };
        let provider_id = provider.id().to_string();
        let req = request_for(&info, &job.messages, &job.options);

        // The soft timeout covers the provider's work only; time spent
        // waiting for a slow consumer to drain the channel is not counted.
        let deadline = self.soft_deadline();
        let body = async {
            let mut events = self.before_deadline(&provider_id, deadline, provider.checked_stream(req)).await??;
            let mut logprobs: Vec<f64> = Vec::new();
            let mut saw_logprobs = false;
            let mut finish_reason = None;
            let mut usage: Option<TokenUsage> = None;
            while let Some(event) = self.before_deadline(&provider_id, deadline, events.next()).await? {
                match event? {
                    ResponseEvent::TextDelta(text) if text.is_empty() => {}
                    ResponseEvent::TextDelta(text) => send(tx, cancel, StreamEvent::token(id, text)).await?,
                    ResponseEvent::Logprobs(lp) => {
                        saw_logprobs = true;
                        logprobs.extend(lp);
                    }
                    ResponseEvent::Usage(u) => usage.get_or_insert_with(TokenUsage::default).merge(u),
                    ResponseEvent::Finish(r) => finish_reason = Some(r),
                    ResponseEvent::Done => break,
                }
            }
            Ok::<_, EngineError>(Collected { logprobs: saw_logprobs.then_some(logprobs), finish_reason, usage })
        };

        let collected = match cancel.run(body).await {
            Ok(c) => c,
            Err(e) => return fail(tx, cancel, id, e).await,
        };

        if let Confidence::Score(confidence) = score_from_logprobs(collected.logprobs.as_deref()) {
            let ev = StreamEvent::Confidence { candidate_id: id.clone(), confidence };
            if send(tx, cancel, ev).await.is_err() {
                return JobOutcome::Cancelled;
            }
        }
        let complete = StreamEvent::PossibilityComplete {
            candidate_id: id.clone(),
            finish_reason: collected.finish_reason,
            usage: collected.usage,
        };
        match send(tx, cancel, complete).await {
            Ok(()) => JobOutcome::Completed,
            Err(_) => JobOutcome::Cancelled,
        }
    }

    /// Best-effort model description for a job that cannot be run: the
    /// catalog entry when the model is known, otherwise just its id.
    fn describe_unresolved(&self, model_id: &str) -> ModelInfo {
        self.registry.lookup(model_id).cloned().unwrap_or_else(|_| ModelInfo {
            id: model_id.to_string(),
            display_name: model_id.to_string(),
            provider_id: String::new(),
            max_tokens: 0,
            supports_confidence_score: false,
            accepted_content_types: Vec::new(),
        })
    }
}

/// Send unless cancelled.  A closed receiver cancels `cancel`.
async fn send(tx: &mpsc::Sender<StreamEvent>, cancel: &Cancellation, event: StreamEvent) -> Result<(), EngineError> {
    let out = cancel
        .run(async { tx.send(event).await.map_err(|_| EngineError::Cancelled) })
        .await;
    if out.is_err() {
        cancel.cancel();
    }
    out
}

/// Report `error` for candidate `id`, unless the failure is cancellation.
async fn fail(tx: &mpsc::Sender<StreamEvent>, cancel: &Cancellation, id: &str, error: EngineError) -> JobOutcome {
    if error == EngineError::Cancelled || cancel.is_cancelled() {
        return JobOutcome::Cancelled;
    }
    warn!(candidate = %id, error = %error, "candidate failed");
    let ev = StreamEvent::Error { candidate_id: id.to_string(), message: error.to_string() };
    match send(tx, cancel, ev).await {
        Ok(()) => JobOutcome::Failed,
        Err(_) => JobOutcome::Cancelled,
    }
}
