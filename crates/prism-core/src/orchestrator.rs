// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Generation orchestrator: fan-out over temperatures and models.
//!
//! Within one model's variation batch the policy is fail-fast: any call
//! failing fails the batch and drops its siblings.  Across models it is
//! best-effort: a failed model is logged and reported, the rest survive.
//! Results are ranked only after every surviving call has joined.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use prism_config::{Config, GenerationConfig};
use prism_model::{
    CredentialSource, GenerationOptions, GenerationRequest, Message, ModelInfo, ModelProvider,
    ModelRegistry, ProviderSet,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    candidate,
    plan::{self, variation_jobs, Job, PlanDefaults, PossibilityRequest},
    sweep::temperature_sweep,
    Cancellation, Candidate, EngineError, ModelFailure,
};

/// Resource limits applied to every provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    /// Soft timeout per call.  Hitting it counts as that call failing.
    pub provider_timeout: Option<Duration>,
    /// Cap on concurrent provider calls.  `None` is unbounded.
    pub max_concurrency: Option<usize>,
}

impl Limits {
    pub fn from_config(g: &GenerationConfig) -> Self {
        Self { provider_timeout: g.provider_timeout(), max_concurrency: g.max_concurrency }
    }
}

/// Result of a best-effort multi-model run.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiModelOutcome {
    /// Surviving candidates, best confidence first.
    pub candidates: Vec<Candidate>,
    /// One entry per model whose batch failed.
    pub failures: Vec<ModelFailure>,
}

impl MultiModelOutcome {
    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }
}

/// The engine.  Constructed once by the caller and shared by reference.
pub struct Orchestrator {
    pub(crate) registry: Arc<ModelRegistry>,
    pub(crate) providers: ProviderSet,
    pub(crate) provider_timeout: Option<Duration>,
    pub(crate) permits: Option<Arc<Semaphore>>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ModelRegistry>, providers: ProviderSet) -> Self {
        Self { registry, providers, provider_timeout: None, permits: None }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.provider_timeout = limits.provider_timeout;
        self.permits = limits.max_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1))));
        self
    }

    /// Bundled catalog plus config models, every built-in provider plus the
    /// configured ones, and the configured limits.
    pub fn from_config(
        config: &Config,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, EngineError> {
        let registry = ModelRegistry::bundled().with_entries(&config.models);
        let providers = ProviderSet::from_config(config, &registry, credentials)?;
        Ok(Self::new(Arc::new(registry), providers)
            .with_limits(Limits::from_config(&config.generation)))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    /// Expand a request body into jobs against this engine's catalog.
    pub fn plan(
        &self,
        request: &PossibilityRequest,
        defaults: &PlanDefaults,
    ) -> Result<Vec<Job>, EngineError> {
        plan::plan(request, &self.registry, defaults)
    }

    pub(crate) fn resolve(
        &self,
        model_id: &str,
    ) -> Result<(ModelInfo, Arc<dyn ModelProvider>), EngineError> {
        let info = self.registry.lookup(model_id)?.clone();
        let provider = self.providers.get(&info.provider_id)?;
        Ok((info, provider))
    }

    /// Wait for a concurrency slot when a cap is configured.
    pub(crate) async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        let permits = self.permits.clone()?;
        // The semaphore is never closed, so acquiring cannot fail.
        permits.acquire_owned().await.ok()
    }

    /// Apply the per-call soft timeout to `fut`.
    pub(crate) async fn with_soft_timeout<T, F>(&self, provider: &str, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        self.before_deadline(provider, self.soft_deadline(), fut).await?
    }

    /// Deadline for a provider call starting now, if a soft timeout is set.
    pub(crate) fn soft_deadline(&self) -> Option<Instant> {
        self.provider_timeout.map(|limit| Instant::now() + limit)
    }

    /// Await `fut` unless `deadline` passes first.  Used to time only the
    /// provider's share of a call that also waits on other things.
    pub(crate) async fn before_deadline<F: Future>(
        &self,
        provider: &str,
        deadline: Option<Instant>,
        fut: F,
    ) -> Result<F::Output, EngineError> {
        let Some(deadline) = deadline else {
            return Ok(fut.await);
        };
        tokio::time::timeout_at(deadline, fut).await.map_err(|_| {
            let limit = self.provider_timeout.unwrap_or_default();
            warn!(provider = %provider, ?limit, "provider call timed out");
            EngineError::generation_failed(provider, format!("timed out after {limit:?}"))
        })
    }

    /// Run one job to completion.
    pub async fn run_job(&self, job: &Job, cancel: &Cancellation) -> Result<Candidate, EngineError> {
        let (info, provider) = self.resolve(&job.model_id)?;
        let req = request_for(&info, &job.messages, &job.options);
        let provider_id = provider.id().to_string();

        let generation = cancel
            .run(async {
                let _permit = self.acquire().await;
                debug!(
                    provider = %provider_id,
                    model = %info.id,
                    candidate = %job.candidate_id,
                    temperature = ?job.temperature(),
                    "provider call"
                );
                self.with_soft_timeout(&provider_id, async {
                    provider.generate(req).await.map_err(EngineError::from)
                })
                .await
            })
            .await?;

        Ok(Candidate::from_generation(job.candidate_id.clone(), info, job.temperature(), generation))
    }

    /// Run `jobs` concurrently; all must succeed.  The first failure drops
    /// the remaining in-flight calls.
    pub async fn run_batch(
        &self,
        jobs: &[Job],
        cancel: &Cancellation,
    ) -> Result<Vec<Candidate>, EngineError> {
        let mut candidates = try_join_all(jobs.iter().map(|job| self.run_job(job, cancel))).await?;
        candidate::rank(&mut candidates);
        Ok(candidates)
    }

    /// Run arbitrary jobs, grouped by model: fail-fast within a model,
    /// best-effort across models.
    pub async fn generate_jobs(
        &self,
        jobs: &[Job],
        cancel: &Cancellation,
    ) -> Result<MultiModelOutcome, EngineError> {
        if jobs.is_empty() {
            return Err(EngineError::InvalidRequest("nothing to generate".into()));
        }

        let groups = group_by_model(jobs);
        let results = join_all(groups.iter().map(|(_, group)| self.run_batch(group, cancel))).await;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let mut candidates = Vec::new();
        let mut failures = Vec::new();
        for ((model_id, _), result) in groups.into_iter().zip(results) {
            match result {
                Ok(mut batch) => candidates.append(&mut batch),
                Err(error) => {
                    warn!(model = %model_id, error = %error, "model dropped from results");
                    failures.push(ModelFailure { model_id, error });
                }
            }
        }

        if candidates.is_empty() {
            return Err(EngineError::AllModelsFailed { failures });
        }
        candidate::rank(&mut candidates);
        Ok(MultiModelOutcome { candidates, failures })
    }

    /// One call to `model_id`, wrapped as a candidate with a fresh id.
    pub async fn generate_single(
        &self,
        messages: &[Message],
        model_id: &str,
        options: &GenerationOptions,
        cancel: &Cancellation,
    ) -> Result<Candidate, EngineError> {
        self.run_job(&Job::new(model_id, messages, options.clone()), cancel).await
    }

    /// `count` calls to `model_id` over a temperature sweep, all-or-nothing,
    /// ranked.
    pub async fn generate_variations(
        &self,
        messages: &[Message],
        model_id: &str,
        count: usize,
        base: &GenerationOptions,
        cancel: &Cancellation,
    ) -> Result<Vec<Candidate>, EngineError> {
        if count == 0 {
            return Err(EngineError::InvalidRequest("variation count must be at least 1".into()));
        }
        let jobs = variation_jobs(model_id, messages, base, &temperature_sweep(count));
        self.run_batch(&jobs, cancel).await
    }

    /// [`Orchestrator::generate_variations`] for every model concurrently,
    /// keeping whatever models succeed.
    pub async fn generate_multi_model<S: AsRef<str>>(
        &self,
        messages: &[Message],
        model_ids: &[S],
        variations_per_model: usize,
        base: &GenerationOptions,
        cancel: &Cancellation,
    ) -> Result<MultiModelOutcome, EngineError> {
        if model_ids.is_empty() {
            return Err(EngineError::InvalidRequest("no models requested".into()));
        }
        if variations_per_model == 0 {
            return Err(EngineError::InvalidRequest("variation count must be at least 1".into()));
        }
        let temperatures = temperature_sweep(variations_per_model);
        let jobs: Vec<Job> = model_ids
            .iter()
            .flat_map(|id| variation_jobs(id.as_ref(), messages, base, &temperatures))
            .collect();
        self.generate_jobs(&jobs, cancel).await
    }

    /// Ask `provider_id` whether `api_key` works.  Only an unknown provider
    /// is an error.
    pub async fn validate_credential(
        &self,
        provider_id: &str,
        api_key: &str,
    ) -> Result<bool, EngineError> {
        let provider = self.providers.get(provider_id)?;
        Ok(provider.validate_credential(api_key).await)
    }
}

/// Provider request for one job.  Logprobs are requested only from models
/// that can supply them, and `max_tokens` never exceeds the model limit.
pub(crate) fn request_for(
    info: &ModelInfo,
    messages: &[Message],
    options: &GenerationOptions,
) -> GenerationRequest {
    let max_tokens = match options.max_tokens {
        Some(n) => n.min(info.max_tokens),
        None => info.max_tokens,
    };
    GenerationRequest {
        messages: messages.to_vec(),
        model: info.id.clone(),
        options: GenerationOptions { max_tokens: Some(max_tokens), ..options.clone() },
        logprobs: info.supports_confidence_score,
    }
}

/// Jobs grouped by model id, groups in first-appearance order.
fn group_by_model(jobs: &[Job]) -> Vec<(String, Vec<Job>)> {
    let mut groups: Vec<(String, Vec<Job>)> = Vec::new();
    for job in jobs {
        match groups.iter_mut().find(|(id, _)| *id == job.model_id) {
            Some((_, group)) => group.push(job.clone()),
            None => groups.push((job.model_id.clone(), vec![job.clone()])),
        }
    }
    groups
}
