// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod types;
mod error;
mod provider;
mod openai_compat;
mod anthropic;
mod google;
mod mock;
mod credentials;
pub mod catalog;
pub mod registry;
pub mod scoring;
pub mod sse;

pub use types::*;
pub use error::{ProviderError, RegistryError};
pub use provider::{collect_generation, require_terminator, ModelProvider, ResponseStream};
pub use openai_compat::OpenAICompatProvider;
pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use mock::{MockProvider, ScriptedMockProvider};
pub use credentials::{CredentialSource, EnvCredentials, LayeredCredentials, StaticCredentials};
pub use catalog::{ModelInfo, ModelRegistry};
pub use registry::{get_provider, list_providers, ProviderKind, ProviderMeta};
pub use scoring::{compare_for_ranking, rank_by, score_from_logprobs};

use std::collections::HashMap;
use std::sync::Arc;

use prism_config::{Config, ProviderConfig};
use tracing::debug;

/// Construct the adapter for `provider_id`.
///
/// The wire protocol comes from the config `kind` override, else the
/// built-in registry entry, else OpenAI-compatible (custom backends).
/// Custom backends must configure a `base_url`.
pub fn provider_for(
    provider_id: &str,
    cfg: Option<&ProviderConfig>,
    catalog: &ModelRegistry,
    credentials: Arc<dyn CredentialSource>,
) -> Result<Arc<dyn ModelProvider>, RegistryError> {
    let meta = get_provider(provider_id);
    let kind = match cfg.and_then(|c| c.kind.as_deref()) {
        Some(k) => k.parse()?,
        None => meta.map(|m| m.kind).unwrap_or(ProviderKind::OpenAiCompatible),
    };
    let base_url = cfg
        .and_then(|c| c.base_url.clone())
        .or_else(|| meta.and_then(|m| m.default_base_url).map(str::to_string));
    let require_base_url =
        || base_url.clone().ok_or_else(|| RegistryError::MissingBaseUrl(provider_id.to_string()));
    let probe_model = catalog
        .models_for(provider_id)
        .first()
        .map(|m| m.id.clone())
        .unwrap_or_else(|| default_probe_model(kind).to_string());

    debug!(provider = %provider_id, kind = %kind, "constructing provider");

    let provider: Arc<dyn ModelProvider> = match kind {
        ProviderKind::OpenAi | ProviderKind::OpenAiCompatible => {
            let mut headers: Vec<(String, String)> = cfg
                .map(|c| c.extra_headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            headers.sort();
            // Custom backends are usually local servers that take no key.
            let requires_key = meta.map(|m| m.requires_api_key).unwrap_or(false);
            Arc::new(
                OpenAICompatProvider::new(
                    provider_id,
                    kind,
                    &require_base_url()?,
                    credentials,
                    requires_key,
                    probe_model,
                )
                .with_headers(headers),
            )
        }
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            provider_id,
            &require_base_url()?,
            credentials,
            probe_model,
        )),
        ProviderKind::Google => Arc::new(GoogleProvider::new(
            provider_id,
            &require_base_url()?,
            credentials,
            probe_model,
        )),
        ProviderKind::Mock => Arc::new(MockProvider::new(provider_id)),
    };
    Ok(provider)
}

fn default_probe_model(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAi | ProviderKind::OpenAiCompatible => "gpt-4o-mini",
        ProviderKind::Anthropic => "claude-3-5-haiku-latest",
        ProviderKind::Google => "gemini-2.0-flash",
        ProviderKind::Mock => "mock-model",
    }
}

/// Constructed adapters keyed by provider id.  Built once and shared by
/// reference; tests insert fakes with [`ProviderSet::with`].
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in provider plus every provider id named in `config`.
    pub fn from_config(
        config: &Config,
        catalog: &ModelRegistry,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, RegistryError> {
        let mut set = Self::new();
        let mut ids: Vec<String> = registry::known_provider_ids().map(str::to_string).collect();
        for id in config.provider_ids() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        for id in ids {
            let provider = provider_for(&id, config.provider(&id), catalog, credentials.clone())?;
            set.insert(provider);
        }
        Ok(set)
    }

    pub fn insert(&mut self, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.insert(provider);
        self
    }

    pub fn get(&self, provider_id: &str) -> Result<Arc<dyn ModelProvider>, RegistryError> {
        self.providers
            .get(provider_id)
            .cloned()
            .ok_or_else(|| RegistryError::ProviderNotFound(provider_id.to_string()))
    }

    /// Provider ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Arc<dyn CredentialSource> {
        Arc::new(StaticCredentials::new())
    }

    #[test]
    fn builtin_ids_get_their_registry_kind() {
        let catalog = ModelRegistry::bundled();
        for (id, kind) in [
            ("openai", ProviderKind::OpenAi),
            ("anthropic", ProviderKind::Anthropic),
            ("google", ProviderKind::Google),
            ("groq", ProviderKind::OpenAiCompatible),
            ("mock", ProviderKind::Mock),
        ] {
            let p = provider_for(id, None, &catalog, creds()).unwrap();
            assert_eq!(p.id(), id);
            assert_eq!(p.kind(), kind);
        }
    }

    #[test]
    fn custom_id_with_base_url_is_openai_compatible() {
        let cfg = ProviderConfig {
            base_url: Some("http://localhost:8080/v1".into()),
            ..Default::default()
        };
        let p = provider_for("local", Some(&cfg), &ModelRegistry::bundled(), creds()).unwrap();
        assert_eq!(p.kind(), ProviderKind::OpenAiCompatible);
    }

    #[test]
    fn custom_id_without_base_url_is_rejected() {
        let err = provider_for("local", None, &ModelRegistry::bundled(), creds()).err().unwrap();
        assert_eq!(err, RegistryError::MissingBaseUrl("local".into()));
    }

    #[test]
    fn kind_override_is_honoured() {
        let cfg = ProviderConfig {
            kind: Some("anthropic".into()),
            base_url: Some("https://proxy.example.com".into()),
            ..Default::default()
        };
        let p = provider_for("claude-proxy", Some(&cfg), &ModelRegistry::bundled(), creds()).unwrap();
        assert_eq!(p.kind(), ProviderKind::Anthropic);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let cfg = ProviderConfig { kind: Some("carrier-pigeon".into()), ..Default::default() };
        let err = provider_for("x", Some(&cfg), &ModelRegistry::bundled(), creds()).err().unwrap();
        assert_eq!(err, RegistryError::UnknownKind("carrier-pigeon".into()));
    }

    #[test]
    fn provider_set_from_config_includes_builtins_and_custom() {
        let mut config = Config::default();
        config.providers.insert(
            "local".into(),
            ProviderConfig { base_url: Some("http://localhost:8080/v1".into()), ..Default::default() },
        );
        let set = ProviderSet::from_config(&config, &ModelRegistry::bundled(), creds()).unwrap();
        assert!(set.get("openai").is_ok());
        assert!(set.get("local").is_ok());
        assert!(set.ids().contains(&"mock"));
        assert_eq!(
            set.get("nope").err().unwrap(),
            RegistryError::ProviderNotFound("nope".into())
        );
    }

    #[test]
    fn inserted_provider_replaces_same_id() {
        let set = ProviderSet::new()
            .with(Arc::new(MockProvider::new("x")))
            .with(Arc::new(ScriptedMockProvider::new("x")));
        assert_eq!(set.ids(), vec!["x"]);
    }
}
