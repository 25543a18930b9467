// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider registry: static metadata for every built-in provider.
//!
//! This module is the single source of truth for which provider ids exist
//! and what their defaults are.  It does **not** contain construction logic;
//! that lives in [`crate::provider_for`].

use std::str::FromStr;

use crate::RegistryError;

/// Wire protocol spoken by a provider.  Construction matches on this
/// exhaustively, so adding a kind forces every dispatch site to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    /// Any `/chat/completions` backend reached through a custom base URL.
    OpenAiCompatible,
    Mock,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::OpenAiCompatible => "openai_compatible",
            ProviderKind::Mock => "mock",
        }
    }

    /// Whether a complete response stream ends with an explicit marker
    /// (`[DONE]`, `message_stop`).  Gemini just closes the connection.
    pub fn has_stream_terminator(self) -> bool {
        matches!(self, ProviderKind::OpenAi | ProviderKind::OpenAiCompatible | ProviderKind::Anthropic)
    }
}

impl FromStr for ProviderKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "google" | "gemini" => Ok(ProviderKind::Google),
            "openai_compatible" | "openai-compatible" => Ok(ProviderKind::OpenAiCompatible),
            "mock" => Ok(ProviderKind::Mock),
            other => Err(RegistryError::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata describing a built-in provider.
#[derive(Debug, Clone)]
pub struct ProviderMeta {
    /// Unique provider id used in config and in `ModelInfo::provider_id`.
    pub id: &'static str,
    /// Human-readable display name (e.g. `"OpenAI"`).
    pub name: &'static str,
    /// One-line description shown by `prism list-providers`.
    pub description: &'static str,
    pub kind: ProviderKind,
    /// Conventional environment variable holding the API key.
    /// `None` for providers that need no key (local servers).
    pub default_api_key_env: Option<&'static str>,
    /// Default base URL.  `None` means the user must configure one.
    pub default_base_url: Option<&'static str>,
    pub requires_api_key: bool,
    /// Whether the API can return per-token log-probabilities.
    pub supports_logprobs: bool,
}

/// Complete registry of built-in providers.
pub static PROVIDERS: &[ProviderMeta] = &[
    // ── Major cloud providers ─────────────────────────────────────────────────
    ProviderMeta {
        id: "openai",
        name: "OpenAI",
        description: "OpenAI GPT models",
        kind: ProviderKind::OpenAi,
        default_api_key_env: Some("OPENAI_API_KEY"),
        default_base_url: Some("https://api.openai.com/v1"),
        requires_api_key: true,
        supports_logprobs: true,
    },
    ProviderMeta {
        id: "anthropic",
        name: "Anthropic",
        description: "Anthropic Claude models (no logprobs)",
        kind: ProviderKind::Anthropic,
        default_api_key_env: Some("ANTHROPIC_API_KEY"),
        default_base_url: Some("https://api.anthropic.com"),
        requires_api_key: true,
        supports_logprobs: false,
    },
    ProviderMeta {
        id: "google",
        name: "Google Gemini",
        description: "Google Gemini models via Generative Language API",
        kind: ProviderKind::Google,
        default_api_key_env: Some("GEMINI_API_KEY"),
        default_base_url: Some("https://generativelanguage.googleapis.com"),
        requires_api_key: true,
        supports_logprobs: true,
    },
    // ── OpenAI-compatible hosted platforms ────────────────────────────────────
    ProviderMeta {
        id: "openrouter",
        name: "OpenRouter",
        description: "OpenRouter gateway (many upstream providers)",
        kind: ProviderKind::OpenAiCompatible,
        default_api_key_env: Some("OPENROUTER_API_KEY"),
        default_base_url: Some("https://openrouter.ai/api/v1"),
        requires_api_key: true,
        supports_logprobs: true,
    },
    ProviderMeta {
        id: "groq",
        name: "Groq",
        description: "Groq LPU fast inference",
        kind: ProviderKind::OpenAiCompatible,
        default_api_key_env: Some("GROQ_API_KEY"),
        default_base_url: Some("https://api.groq.com/openai/v1"),
        requires_api_key: true,
        supports_logprobs: false,
    },
    ProviderMeta {
        id: "together",
        name: "Together AI",
        description: "Together AI open model hosting platform",
        kind: ProviderKind::OpenAiCompatible,
        default_api_key_env: Some("TOGETHER_API_KEY"),
        default_base_url: Some("https://api.together.xyz/v1"),
        requires_api_key: true,
        supports_logprobs: true,
    },
    ProviderMeta {
        id: "fireworks",
        name: "Fireworks AI",
        description: "Fireworks AI fast open model inference",
        kind: ProviderKind::OpenAiCompatible,
        default_api_key_env: Some("FIREWORKS_API_KEY"),
        default_base_url: Some("https://api.fireworks.ai/inference/v1"),
        requires_api_key: true,
        supports_logprobs: true,
    },
    ProviderMeta {
        id: "deepseek",
        name: "DeepSeek",
        description: "DeepSeek chat and reasoning models",
        kind: ProviderKind::OpenAiCompatible,
        default_api_key_env: Some("DEEPSEEK_API_KEY"),
        default_base_url: Some("https://api.deepseek.com/v1"),
        requires_api_key: true,
        supports_logprobs: true,
    },
    ProviderMeta {
        id: "mistral",
        name: "Mistral AI",
        description: "Mistral AI models",
        kind: ProviderKind::OpenAiCompatible,
        default_api_key_env: Some("MISTRAL_API_KEY"),
        default_base_url: Some("https://api.mistral.ai/v1"),
        requires_api_key: true,
        supports_logprobs: false,
    },
    ProviderMeta {
        id: "xai",
        name: "xAI",
        description: "xAI Grok models",
        kind: ProviderKind::OpenAiCompatible,
        default_api_key_env: Some("XAI_API_KEY"),
        default_base_url: Some("https://api.x.ai/v1"),
        requires_api_key: true,
        supports_logprobs: true,
    },
    // ── Local / OSS ───────────────────────────────────────────────────────────
    ProviderMeta {
        id: "ollama",
        name: "Ollama",
        description: "Ollama local model runner (http://localhost:11434)",
        kind: ProviderKind::OpenAiCompatible,
        default_api_key_env: None,
        default_base_url: Some("http://localhost:11434/v1"),
        requires_api_key: false,
        supports_logprobs: false,
    },
    ProviderMeta {
        id: "vllm",
        name: "vLLM",
        description: "vLLM local inference server (http://localhost:8000)",
        kind: ProviderKind::OpenAiCompatible,
        default_api_key_env: None,
        default_base_url: Some("http://localhost:8000/v1"),
        requires_api_key: false,
        supports_logprobs: true,
    },
    ProviderMeta {
        id: "lmstudio",
        name: "LM Studio",
        description: "LM Studio local model server (http://localhost:1234)",
        kind: ProviderKind::OpenAiCompatible,
        default_api_key_env: None,
        default_base_url: Some("http://localhost:1234/v1"),
        requires_api_key: false,
        supports_logprobs: false,
    },
    // ── Testing ───────────────────────────────────────────────────────────────
    ProviderMeta {
        id: "mock",
        name: "Mock",
        description: "Mock provider (no network, echoes input)",
        kind: ProviderKind::Mock,
        default_api_key_env: None,
        default_base_url: None,
        requires_api_key: false,
        supports_logprobs: true,
    },
];

/// Returns all built-in providers in declaration order.
pub fn list_providers() -> &'static [ProviderMeta] {
    PROVIDERS
}

/// Look up a provider by its id.  Returns `None` for unknown ids.
pub fn get_provider(id: &str) -> Option<&'static ProviderMeta> {
    PROVIDERS.iter().find(|p| p.id == id)
}

/// Returns an iterator over all built-in provider ids.
pub fn known_provider_ids() -> impl Iterator<Item = &'static str> {
    PROVIDERS.iter().map(|p| p.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for p in PROVIDERS {
            assert!(seen.insert(p.id), "duplicate provider id: {}", p.id);
        }
    }

    #[test]
    fn get_provider_returns_correct_entry() {
        let p = get_provider("anthropic").expect("anthropic must be registered");
        assert_eq!(p.kind, ProviderKind::Anthropic);
        assert!(!p.supports_logprobs);
    }

    #[test]
    fn get_provider_returns_none_for_unknown() {
        assert!(get_provider("totally-unknown-provider-xyz").is_none());
    }

    #[test]
    fn known_ids_cover_the_three_wire_families() {
        let ids: Vec<&str> = known_provider_ids().collect();
        for required in ["openai", "anthropic", "google", "ollama", "mock"] {
            assert!(ids.contains(&required), "missing required provider: {required}");
        }
    }

    #[test]
    fn key_requirement_matches_env_var_presence() {
        for p in PROVIDERS {
            if p.requires_api_key {
                assert!(p.default_api_key_env.is_some(), "{} needs a key but names no env var", p.id);
            }
        }
    }

    #[test]
    fn kind_parses_from_config_strings() {
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Google);
        assert_eq!(
            "openai-compatible".parse::<ProviderKind>().unwrap(),
            ProviderKind::OpenAiCompatible
        );
        assert_eq!(
            "bogus".parse::<ProviderKind>(),
            Err(RegistryError::UnknownKind("bogus".into()))
        );
    }

    #[test]
    fn kind_display_round_trips() {
        for kind in [
            ProviderKind::OpenAi,
            ProviderKind::Anthropic,
            ProviderKind::Google,
            ProviderKind::OpenAiCompatible,
            ProviderKind::Mock,
        ] {
            assert_eq!(kind.to_string().parse::<ProviderKind>().unwrap(), kind);
        }
    }
}
