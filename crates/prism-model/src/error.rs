// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Failure of a single provider call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("no API key configured for provider '{provider}'")]
    CredentialMissing { provider: String },

    #[error("{provider}: {cause}")]
    Upstream { provider: String, cause: String },
}

impl ProviderError {
    pub fn credential_missing(provider: &str) -> Self {
        Self::CredentialMissing { provider: provider.to_string() }
    }

    /// Wrap any transport / SDK / HTTP failure.
    pub fn upstream(provider: &str, cause: impl std::fmt::Display) -> Self {
        Self::Upstream { provider: provider.to_string(), cause: cause.to_string() }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::CredentialMissing { provider } | Self::Upstream { provider, .. } => provider,
        }
    }
}

/// Lookup failures in the model catalog or the provider table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("unknown model '{0}'")]
    ModelNotFound(String),

    #[error("unknown provider '{0}'")]
    ProviderNotFound(String),

    #[error("unknown provider kind '{0}'")]
    UnknownKind(String),

    #[error("provider '{0}' needs a base_url")]
    MissingBaseUrl(String),
}
