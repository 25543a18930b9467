// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Integration tests wiring config loading, the engine and the wire codec
/// together, using the bundled mock provider.
use std::io::Write;
use std::sync::Arc;

use futures::StreamExt;
use prism_config::Config;
use prism_core::{
    wire, Cancellation, EngineError, Orchestrator, PlanDefaults, PossibilityRequest,
    PossibilityState,
};
use prism_model::{Confidence, LayeredCredentials, Message};

fn config_from(text: &str) -> Config {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    prism_config::load(Some(file.path())).unwrap()
}

fn mock_config() -> Config {
    config_from(
        r#"
enabled_providers = ["mock"]

[generation]
variations_per_model = 2
provider_timeout_secs = 5
"#,
    )
}

fn engine(config: &Config) -> Orchestrator {
    let credentials = Arc::new(LayeredCredentials::from_config(config));
    Orchestrator::from_config(config, credentials).unwrap()
}

fn request(json: serde_json::Value) -> PossibilityRequest {
    serde_json::from_value(json).unwrap()
}

fn hello_request() -> PossibilityRequest {
    PossibilityRequest {
        messages: vec![Message::user("hello")],
        settings: Default::default(),
        options: Default::default(),
    }
}

#[tokio::test]
async fn configured_request_produces_ranked_mock_possibilities() {
    let config = mock_config();
    let engine = engine(&config);
    let jobs = engine.plan(&hello_request(), &PlanDefaults::from_config(&config)).unwrap();
    assert_eq!(jobs.len(), 2);

    let outcome = engine.generate_jobs(&jobs, &Cancellation::new()).await.unwrap();
    assert_eq!(outcome.candidates.len(), 2);
    assert_eq!(outcome.failed_count(), 0);
    for c in &outcome.candidates {
        assert_eq!(c.content, "MOCK: hello");
        assert_eq!(c.model_info.id, "mock-model");
        // One logprob of -0.1 per word.
        assert!(matches!(c.confidence, Confidence::Score(v) if (v - (-0.1f64).exp()).abs() < 1e-9));
    }
    let temps: Vec<Option<f32>> = outcome.candidates.iter().map(|c| c.temperature).collect();
    assert_eq!(temps, vec![Some(0.3), Some(1.0)]);
}

#[tokio::test]
async fn streamed_transcript_replays_to_the_same_possibilities() {
    let config = mock_config();
    let engine = Arc::new(engine(&config));
    let jobs = engine.plan(&hello_request(), &PlanDefaults::from_config(&config)).unwrap();
    let ids: Vec<String> = jobs.iter().map(|j| j.candidate_id.clone()).collect();

    let mut transcript = String::new();
    let mut live = PossibilityState::new();
    let mut events = engine.stream(jobs, Cancellation::new());
    while let Some(event) = events.next().await {
        transcript.push_str(&wire::encode_event(&event).unwrap());
        live.apply(&event);
    }
    transcript.push_str(&wire::encode_done());

    // Deliberately awkward chunking so events straddle chunk boundaries.
    let bytes = transcript.into_bytes();
    let chunks = futures::stream::iter(bytes.chunks(7).map(Ok::<_, std::io::Error>));
    let mut replayed = PossibilityState::new();
    wire::read_events(chunks, &Cancellation::new(), |e| replayed.apply(&e)).await.unwrap();

    assert!(live.is_finished());
    assert!(replayed.is_finished());
    for id in &ids {
        let a = live.get(id).unwrap();
        let b = replayed.get(id).unwrap();
        assert_eq!(a, b);
        assert_eq!(b.content, "MOCK: hello");
        assert!(!b.is_streaming);
    }
}

#[tokio::test]
async fn continuation_reuses_the_given_candidate_id() {
    let config = mock_config();
    let engine = engine(&config);
    let req = request(serde_json::json!({
        "messages": [{
            "id": "m1", "role": "user", "content": "go on", "timestamp": "2025-01-01T00:00:00Z"
        }],
        "options": { "mode": "continuation", "continuationId": "cand-42" }
    }));
    let jobs = engine.plan(&req, &PlanDefaults::from_config(&config)).unwrap();
    assert_eq!(jobs.len(), 1);

    let outcome = engine.generate_jobs(&jobs, &Cancellation::new()).await.unwrap();
    assert_eq!(outcome.candidates[0].id, "cand-42");
    assert_eq!(outcome.candidates[0].content, "MOCK: go on");
}

#[tokio::test]
async fn mock_provider_validates_non_blank_keys() {
    let engine = engine(&mock_config());
    assert_eq!(engine.validate_credential("mock", "anything").await, Ok(true));
    assert_eq!(engine.validate_credential("mock", "  ").await, Ok(false));
    assert!(matches!(
        engine.validate_credential("no-such-provider", "k").await,
        Err(EngineError::ProviderNotFound(_))
    ));
}

#[test]
fn custom_backend_without_base_url_is_rejected() {
    let config = config_from(
        r#"
[providers.homelab]
kind = "openai_compatible"
"#,
    );
    let credentials = Arc::new(LayeredCredentials::from_config(&config));
    let err = Orchestrator::from_config(&config, credentials).err().expect("should fail");
    assert!(matches!(err, EngineError::InvalidRequest(ref m) if m.contains("homelab")), "{err}");
}

#[test]
fn configured_models_extend_the_catalog() {
    let config = config_from(
        r#"
enabled_providers = ["homelab"]

[providers.homelab]
base_url = "http://127.0.0.1:9/v1"

[[models]]
id = "llama-3.1-8b"
provider = "homelab"
max_tokens = 2048
"#,
    );
    let engine = engine(&config);
    let info = engine.registry().lookup("llama-3.1-8b").unwrap();
    assert_eq!(info.provider_id, "homelab");
    assert_eq!(info.max_tokens, 2048);
    assert!(engine.providers().get("homelab").is_ok());

    let jobs = engine.plan(&hello_request(), &PlanDefaults::from_config(&config)).unwrap();
    assert!(jobs.iter().all(|j| j.model_id == "llama-3.1-8b"));
    assert_eq!(jobs.len(), 3);
}

#[test]
fn config_defaults_are_valid() {
    let cfg = Config::default();
    assert_eq!(cfg.enabled_providers, vec!["openai".to_string()]);
    assert!(cfg.generation.variations_per_model > 0);
    assert!(cfg.generation.provider_timeout().is_some());
}
