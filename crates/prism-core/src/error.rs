// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use prism_model::{ProviderError, RegistryError};
use thiserror::Error;

/// A model whose whole variation batch failed during a multi-model request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFailure {
    pub model_id: String,
    pub error: EngineError,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("unknown model '{0}'")]
    ModelNotFound(String),

    #[error("unknown provider '{0}'")]
    ProviderNotFound(String),

    #[error("no API key configured for provider '{provider}'")]
    CredentialMissing { provider: String },

    #[error("generation failed ({provider}): {cause}")]
    GenerationFailed { provider: String, cause: String },

    #[error("every model failed ({} failures)", failures.len())]
    AllModelsFailed { failures: Vec<ModelFailure> },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request cancelled")]
    Cancelled,

    /// The byte stream carrying encoded events broke mid-read.
    #[error("transport error: {0}")]
    Transport(String),
}

impl EngineError {
    pub fn generation_failed(provider: &str, cause: impl std::fmt::Display) -> Self {
        Self::GenerationFailed { provider: provider.to_string(), cause: cause.to_string() }
    }
}

impl From<RegistryError> for EngineError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::ModelNotFound(id) => Self::ModelNotFound(id),
            RegistryError::ProviderNotFound(id) => Self::ProviderNotFound(id),
            other @ (RegistryError::UnknownKind(_) | RegistryError::MissingBaseUrl(_)) => {
                Self::InvalidRequest(other.to_string())
            }
        }
    }
}

impl From<ProviderError> for EngineError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::CredentialMissing { provider } => Self::CredentialMissing { provider },
            ProviderError::Upstream { provider, cause } => Self::GenerationFailed { provider, cause },
        }
    }
}
