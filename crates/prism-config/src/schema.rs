// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_enabled_providers() -> Vec<String> {
    vec!["openai".into()]
}
fn default_variations_per_model() -> usize {
    3
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_provider_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Provider ids whose models take part in a possibilities request.
    #[serde(default = "default_enabled_providers")]
    pub enabled_providers: Vec<String>,
    /// Model ids used when the caller names none.  When empty, the first
    /// catalog model of each enabled provider is used.
    #[serde(default)]
    pub default_models: Vec<String>,
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Per-provider overrides, keyed by provider id.
    ///
    /// Ids that are not built-in define custom OpenAI-compatible backends:
    ///
    /// ```toml
    /// [providers.local_llama]
    /// kind = "openai_compatible"
    /// base_url = "http://localhost:8080/v1"
    /// ```
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Extra model catalog entries appended to the bundled catalog.
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled_providers: default_enabled_providers(),
            default_models: Vec::new(),
            generation: GenerationConfig::default(),
            providers: HashMap::new(),
            models: Vec::new(),
        }
    }
}

impl Config {
    /// Overrides for `provider_id`, if any were configured.
    pub fn provider(&self, provider_id: &str) -> Option<&ProviderConfig> {
        self.providers.get(provider_id)
    }

    /// All provider ids the configuration knows about: enabled providers
    /// first, then any configured-but-disabled ones, without duplicates.
    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids = self.enabled_providers.clone();
        let mut extra: Vec<&String> = self
            .providers
            .keys()
            .filter(|k| !ids.contains(k))
            .collect();
        extra.sort();
        ids.extend(extra.into_iter().cloned());
        ids
    }
}

/// Knobs for possibility generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Explicit temperature list.  When empty, a deterministic sweep of
    /// `variations_per_model` temperatures is computed instead.
    #[serde(default)]
    pub temperatures: Vec<f32>,
    /// Number of temperature variations requested per model.
    #[serde(default = "default_variations_per_model")]
    pub variations_per_model: usize,
    /// Maximum output tokens per possibility.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Alternative system prompts; each one multiplies the job matrix.
    #[serde(default)]
    pub system_instructions: Vec<String>,
    /// Soft timeout for a single provider call (seconds; 0 = no limit).
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    /// Deadline for a whole request (seconds; 0 = no limit).
    #[serde(default)]
    pub request_timeout_secs: u64,
    /// Upper bound on concurrent provider calls made by one engine.
    /// Absent means unbounded.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperatures: Vec::new(),
            variations_per_model: default_variations_per_model(),
            max_tokens: default_max_tokens(),
            system_instructions: Vec::new(),
            provider_timeout_secs: default_provider_timeout_secs(),
            request_timeout_secs: 0,
            max_concurrency: None,
        }
    }
}

impl GenerationConfig {
    pub fn provider_timeout(&self) -> Option<Duration> {
        (self.provider_timeout_secs > 0).then(|| Duration::from_secs(self.provider_timeout_secs))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

/// Overrides for a single provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Wire protocol: "openai" | "anthropic" | "google" | "openai_compatible" | "mock".
    /// Defaults to the built-in kind for known ids and to
    /// "openai_compatible" for everything else.
    #[serde(default)]
    pub kind: Option<String>,
    /// Base URL override.  Required for custom OpenAI-compatible backends.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Stored API key.  Takes precedence over every environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable consulted when no stored key exists.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Additional HTTP headers sent on every request.
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

/// A model catalog entry supplied through configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub provider: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub supports_confidence_score: bool,
    #[serde(default)]
    pub accepted_content_types: Vec<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
