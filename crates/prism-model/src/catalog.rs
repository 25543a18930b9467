// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Model registry: static metadata for known models.

use prism_config::ModelEntry;
use serde::{Deserialize, Serialize};

use crate::RegistryError;

/// Metadata for a single model.  Loaded once at start-up, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Provider-scoped model identifier (e.g. "gpt-4o", "claude-sonnet-4-5")
    pub id: String,
    /// Human-readable display name
    pub display_name: String,
    /// Id of the provider that serves this model
    pub provider_id: String,
    /// Maximum output tokens per completion
    pub max_tokens: u32,
    /// Whether the provider reports logprobs for this model
    #[serde(default)]
    pub supports_confidence_score: bool,
    /// MIME types the model accepts as input
    #[serde(default)]
    pub accepted_content_types: Vec<String>,
}

impl ModelInfo {
    pub fn accepts(&self, content_type: &str) -> bool {
        self.accepted_content_types.iter().any(|t| t == content_type)
    }
}

impl From<&ModelEntry> for ModelInfo {
    fn from(e: &ModelEntry) -> Self {
        Self {
            id: e.id.clone(),
            display_name: e.display_name.clone().unwrap_or_else(|| e.id.clone()),
            provider_id: e.provider.clone(),
            max_tokens: e.max_tokens,
            supports_confidence_score: e.supports_confidence_score,
            accepted_content_types: if e.accepted_content_types.is_empty() {
                vec!["text/plain".into()]
            } else {
                e.accepted_content_types.clone()
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelInfo>,
}

/// Return all entries from the bundled static catalog.
pub fn static_catalog() -> Vec<ModelInfo> {
    let yaml = include_str!("../models.yaml");
    let catalog: CatalogFile =
        serde_yaml::from_str(yaml).expect("bundled models.yaml must be valid");
    catalog.models
}

/// Deterministic lookup from model id to [`ModelInfo`] and from provider id
/// to its models.  Pure data.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelInfo>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelInfo>) -> Self {
        let mut registry = Self::default();
        for m in models {
            registry.insert(m);
        }
        registry
    }

    /// The bundled catalog.
    pub fn bundled() -> Self {
        Self::new(static_catalog())
    }

    /// The bundled catalog extended with configuration entries.  A config
    /// entry with an existing id replaces the bundled one.
    pub fn with_entries(mut self, entries: &[ModelEntry]) -> Self {
        for e in entries {
            self.insert(ModelInfo::from(e));
        }
        self
    }

    fn insert(&mut self, model: ModelInfo) {
        match self.models.iter_mut().find(|m| m.id == model.id) {
            Some(existing) => *existing = model,
            None => self.models.push(model),
        }
    }

    pub fn lookup(&self, model_id: &str) -> Result<&ModelInfo, RegistryError> {
        self.models
            .iter()
            .find(|m| m.id == model_id)
            .ok_or_else(|| RegistryError::ModelNotFound(model_id.to_string()))
    }

    /// Models served by `provider_id`, in catalog order.
    pub fn models_for(&self, provider_id: &str) -> Vec<&ModelInfo> {
        self.models.iter().filter(|m| m.provider_id == provider_id).collect()
    }

    pub fn all(&self) -> &[ModelInfo] {
        &self.models
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
