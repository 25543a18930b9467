// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! API key lookup.
//!
//! Adapters never read the environment themselves; they ask a
//! [`CredentialSource`] at call time.  The resolution order is fixed:
//! a stored key always wins and the environment is only a fallback.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use prism_config::Config;

#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// The API key for `provider_id`, or `None` when nothing usable is stored.
    async fn api_key(&self, provider_id: &str) -> Option<String>;
}

fn non_blank(key: &str) -> Option<String> {
    let key = key.trim();
    (!key.is_empty()).then(|| key.to_string())
}

/// Keys held in memory, typically taken from the `api_key` fields of the
/// configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    keys: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, provider_id: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys.insert(provider_id.into(), key.into());
        self
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn api_key(&self, provider_id: &str) -> Option<String> {
        self.keys.get(provider_id).and_then(|k| non_blank(k))
    }
}

/// Keys read from per-provider environment variables.
///
/// The variable name comes from the provider's `api_key_env` override, or
/// from the built-in registry default (`OPENAI_API_KEY`, ...).
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    overrides: HashMap<String, String>,
}

impl EnvCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, provider_id: impl Into<String>, var: impl Into<String>) -> Self {
        self.overrides.insert(provider_id.into(), var.into());
        self
    }

    /// Name of the environment variable consulted for `provider_id`.
    pub fn var_name(&self, provider_id: &str) -> Option<String> {
        self.overrides.get(provider_id).cloned().or_else(|| {
            crate::get_provider(provider_id)
                .and_then(|p| p.default_api_key_env)
                .map(str::to_string)
        })
    }
}

#[async_trait]
impl CredentialSource for EnvCredentials {
    async fn api_key(&self, provider_id: &str) -> Option<String> {
        let var = self.var_name(provider_id)?;
        std::env::var(&var).ok().and_then(|k| non_blank(&k))
    }
}

/// Stored keys first, then a fallback source.
pub struct LayeredCredentials {
    stored: Arc<dyn CredentialSource>,
    fallback: Arc<dyn CredentialSource>,
}

impl LayeredCredentials {
    pub fn new(stored: Arc<dyn CredentialSource>, fallback: Arc<dyn CredentialSource>) -> Self {
        Self { stored, fallback }
    }

    /// Stored `api_key` values from `config`, falling back to the
    /// environment variables named by `api_key_env` or the registry default.
    pub fn from_config(config: &Config) -> Self {
        let mut stored = StaticCredentials::new();
        let mut env = EnvCredentials::new();
        for (id, pc) in &config.providers {
            if let Some(key) = &pc.api_key {
                stored = stored.with_key(id, key);
            }
            if let Some(var) = &pc.api_key_env {
                env = env.with_var(id, var);
            }
        }
        Self::new(Arc::new(stored), Arc::new(env))
    }
}

#[async_trait]
impl CredentialSource for LayeredCredentials {
    async fn api_key(&self, provider_id: &str) -> Option<String> {
        match self.stored.api_key(provider_id).await {
            Some(key) => Some(key),
            None => self.fallback.api_key(provider_id).await,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
