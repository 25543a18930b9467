// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Request planning: expand a possibility request into provider jobs.

use prism_config::Config;
use prism_model::{GenerationOptions, Message, ModelRegistry, Role};
use serde::{Deserialize, Serialize};

use crate::{candidate::new_candidate_id, sweep::temperature_sweep, EngineError};

/// Body of a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PossibilityRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub settings: RequestSettings,
    #[serde(default)]
    pub options: RequestOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSettings {
    #[serde(default)]
    pub enabled_providers: Vec<String>,
    #[serde(default)]
    pub temperatures: Vec<f32>,
    #[serde(default)]
    pub system_instructions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub continuation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Fan out across models, temperatures and system instructions.
    #[default]
    Possibilities,
    /// A single generation that continues an existing candidate.
    Continuation,
}

/// One provider call to make, with its pre-assigned candidate id.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub candidate_id: String,
    pub model_id: String,
    pub messages: Vec<Message>,
    pub options: GenerationOptions,
}

impl Job {
    pub fn new(model_id: &str, messages: &[Message], options: GenerationOptions) -> Self {
        Self {
            candidate_id: new_candidate_id(),
            model_id: model_id.to_string(),
            messages: messages.to_vec(),
            options,
        }
    }

    pub fn temperature(&self) -> Option<f32> {
        self.options.temperature
    }
}

/// One job per temperature for `model_id`.
pub fn variation_jobs(
    model_id: &str,
    messages: &[Message],
    base: &GenerationOptions,
    temperatures: &[f32],
) -> Vec<Job> {
    temperatures
        .iter()
        .map(|t| Job::new(model_id, messages, base.with_temperature(*t)))
        .collect()
}

/// Fallbacks used when a request leaves something unspecified.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDefaults {
    pub enabled_providers: Vec<String>,
    /// Preferred model ids.  A provider with none listed here uses the
    /// first catalog model it serves.
    pub models: Vec<String>,
    pub variations_per_model: usize,
    pub temperatures: Vec<f32>,
    pub system_instructions: Vec<String>,
    pub max_tokens: u32,
}

impl PlanDefaults {
    pub fn from_config(config: &Config) -> Self {
        let g = &config.generation;
        Self {
            enabled_providers: config.enabled_providers.clone(),
            models: config.default_models.clone(),
            variations_per_model: g.variations_per_model,
            temperatures: g.temperatures.clone(),
            system_instructions: g.system_instructions.clone(),
            max_tokens: g.max_tokens,
        }
    }
}

/// Model ids to use for `providers`, in provider order.
pub fn models_for_providers(
    providers: &[String],
    preferred: &[String],
    registry: &ModelRegistry,
) -> Vec<String> {
    let mut out = Vec::new();
    for provider in providers {
        let served = registry.models_for(provider);
        let picked: Vec<&str> = preferred
            .iter()
            .filter(|id| served.iter().any(|m| &m.id == *id))
            .map(String::as_str)
            .collect();
        if picked.is_empty() {
            if let Some(first) = served.first() {
                out.push(first.id.clone());
            }
        } else {
            out.extend(picked.into_iter().map(str::to_string));
        }
    }
    out
}

/// `messages` with `instruction` as the leading system message.  Existing
/// system messages are replaced.
fn with_system_instruction(messages: &[Message], instruction: Option<&str>) -> Vec<Message> {
    let Some(instruction) = instruction else {
        return messages.to_vec();
    };
    let mut out = vec![Message::system(instruction)];
    out.extend(messages.iter().filter(|m| m.role != Role::System).cloned());
    out
}

/// Expand `request` into jobs.
///
/// `possibilities` mode yields models × temperatures × system instructions.
/// `continuation` mode yields exactly one job on the first model, first
/// temperature and first instruction, whose candidate id is the request's
/// `continuationId` (or a fresh id).
pub fn plan(
    request: &PossibilityRequest,
    registry: &ModelRegistry,
    defaults: &PlanDefaults,
) -> Result<Vec<Job>, EngineError> {
    if request.messages.is_empty() {
        return Err(EngineError::InvalidRequest("no messages".into()));
    }

    let s = &request.settings;
    let providers = if s.enabled_providers.is_empty() {
        &defaults.enabled_providers
    } else {
        &s.enabled_providers
    };
    let models = models_for_providers(providers, &defaults.models, registry);
    if models.is_empty() {
        return Err(EngineError::InvalidRequest(format!(
            "no models available for providers [{}]",
            providers.join(", ")
        )));
    }

    let temperatures = if !s.temperatures.is_empty() {
        s.temperatures.clone()
    } else if !defaults.temperatures.is_empty() {
        defaults.temperatures.clone()
    } else {
        temperature_sweep(defaults.variations_per_model.max(1))
    };
    let instructions: Vec<Option<&str>> = {
        let src = if s.system_instructions.is_empty() {
            &defaults.system_instructions
        } else {
            &s.system_instructions
        };
        if src.is_empty() {
            vec![None]
        } else {
            src.iter().map(|i| Some(i.as_str())).collect()
        }
    };
    let base = GenerationOptions {
        max_tokens: Some(request.options.max_tokens.unwrap_or(defaults.max_tokens)),
        ..Default::default()
    };

    match request.options.mode {
        Mode::Continuation => {
            let messages = with_system_instruction(&request.messages, instructions[0]);
            let mut job = Job::new(&models[0], &messages, base.with_temperature(temperatures[0]));
            if let Some(id) = &request.options.continuation_id {
                job.candidate_id = id.clone();
            }
            Ok(vec![job])
        }
        Mode::Possibilities => {
            let mut jobs = Vec::with_capacity(models.len() * temperatures.len() * instructions.len());
            for model in &models {
                for instruction in &instructions {
                    let messages = with_system_instruction(&request.messages, *instruction);
                    jobs.extend(variation_jobs(model, &messages, &base, &temperatures));
                }
            }
            Ok(jobs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_model::ModelInfo;

    fn info(id: &str, provider: &str) -> ModelInfo {
        ModelInfo {
            id: id.into(),
            display_name: id.into(),
            provider_id: provider.into(),
            max_tokens: 512,
            supports_confidence_score: true,
            accepted_content_types: vec!["text/plain".into()],
        }
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::new(vec![
            info("a1", "alpha"),
            info("a2", "alpha"),
            info("b1", "beta"),
        ])
    }

    fn defaults() -> PlanDefaults {
        PlanDefaults {
            enabled_providers: vec!["alpha".into()],
            models: Vec::new(),
            variations_per_model: 3,
            temperatures: Vec::new(),
            system_instructions: Vec::new(),
            max_tokens: 256,
        }
    }

    fn request(json: serde_json::Value) -> PossibilityRequest {
        serde_json::from_value(json).unwrap()
    }

    fn hello() -> serde_json::Value {
        serde_json::json!([{
            "id": "m1", "role": "user", "content": "hello", "timestamp": "2025-01-01T00:00:00Z"
        }])
    }

    #[test]
    fn request_body_parses_camel_case() {
        let r = request(serde_json::json!({
            "messages": hello(),
            "settings": { "enabledProviders": ["alpha"], "temperatures": [0.2], "systemInstructions": ["x"] },
            "options": { "maxTokens": 99, "stream": true, "mode": "continuation", "continuationId": "c9" }
        }));
        assert_eq!(r.settings.enabled_providers, vec!["alpha".to_string()]);
        assert_eq!(r.options.mode, Mode::Continuation);
        assert_eq!(r.options.continuation_id.as_deref(), Some("c9"));
        assert!(r.options.stream);
    }

    #[test]
    fn possibilities_default_to_first_model_and_sweep() {
        let r = request(serde_json::json!({ "messages": hello() }));
        let jobs = plan(&r, &registry(), &defaults()).unwrap();
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.model_id == "a1"));
        let temps: Vec<f32> = jobs.iter().filter_map(Job::temperature).collect();
        assert_eq!(temps, vec![0.3, 0.7, 1.0]);
        assert!(jobs.iter().all(|j| j.options.max_tokens == Some(256)));
    }

    #[test]
    fn possibilities_expand_models_temperatures_and_instructions() {
        let r = request(serde_json::json!({
            "messages": hello(),
            "settings": {
                "enabledProviders": ["alpha", "beta"],
                "temperatures": [0.1, 0.9],
                "systemInstructions": ["Be terse.", "Be thorough."]
            }
        }));
        let jobs = plan(&r, &registry(), &defaults()).unwrap();
        // 2 models × 2 instructions × 2 temperatures
        assert_eq!(jobs.len(), 8);
        let ids: std::collections::HashSet<&str> = jobs.iter().map(|j| j.candidate_id.as_str()).collect();
        assert_eq!(ids.len(), 8, "candidate ids are unique per request");
        let first = &jobs[0];
        assert_eq!(first.messages[0].role, Role::System);
        assert_eq!(first.messages[0].content, "Be terse.");
        assert_eq!(first.messages[1].content, "hello");
    }

    #[test]
    fn preferred_models_filter_per_provider() {
        let mut d = defaults();
        d.models = vec!["a2".into(), "zzz".into()];
        d.enabled_providers = vec!["alpha".into(), "beta".into()];
        let models = models_for_providers(&d.enabled_providers, &d.models, &registry());
        assert_eq!(models, vec!["a2".to_string(), "b1".to_string()]);
    }

    #[test]
    fn continuation_is_a_single_job_with_given_id() {
        let r = request(serde_json::json!({
            "messages": hello(),
            "options": { "mode": "continuation", "continuationId": "keep-me" }
        }));
        let jobs = plan(&r, &registry(), &defaults()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].candidate_id, "keep-me");
        assert_eq!(jobs[0].model_id, "a1");
        assert_eq!(jobs[0].temperature(), Some(0.3));
    }

    #[test]
    fn continuation_without_id_gets_a_fresh_one() {
        let r = request(serde_json::json!({ "messages": hello(), "options": { "mode": "continuation" } }));
        let jobs = plan(&r, &registry(), &defaults()).unwrap();
        assert!(!jobs[0].candidate_id.is_empty());
    }

    #[test]
    fn empty_messages_or_no_models_are_invalid() {
        let r = request(serde_json::json!({ "messages": [] }));
        assert!(matches!(plan(&r, &registry(), &defaults()), Err(EngineError::InvalidRequest(_))));

        let r = request(serde_json::json!({
            "messages": hello(),
            "settings": { "enabledProviders": ["gamma"] }
        }));
        assert!(matches!(plan(&r, &registry(), &defaults()), Err(EngineError::InvalidRequest(_))));
    }
}
