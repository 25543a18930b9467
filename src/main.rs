// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use tracing::warn;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, GenerateArgs};
use clap::Parser;
use prism_config::Config;
use prism_core::{
    wire, Cancellation, Candidate, EngineError, Job, Mode, Orchestrator, PlanDefaults,
    PossibilityRequest, PossibilityState, RequestOptions, RequestSettings, StreamEvent,
};
use prism_model::{CredentialSource, LayeredCredentials, Message, ModelInfo, ModelRegistry};

/// Chunk size used when feeding a transcript through the stream reader.
const REPLAY_CHUNK: usize = 4096;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Completions { shell } => {
            cli::print_completions(shell);
            Ok(())
        }
        Commands::ShowConfig => {
            let loaded = prism_config::load_layers(cli.config.as_deref())?;
            show_config(loaded)
        }
        Commands::ListModels { provider, json } => {
            let config = prism_config::load(cli.config.as_deref())?;
            list_models_cmd(&config, provider.as_deref(), json)
        }
        Commands::ListProviders { detail, json } => list_providers_cmd(detail, json),
        Commands::ValidateKey { provider, key } => {
            let config = prism_config::load(cli.config.as_deref())?;
            validate_key_cmd(&config, &provider, key).await
        }
        Commands::Replay { file, json } => replay_cmd(&file, json).await,
        Commands::Generate(args) => {
            let config = prism_config::load(cli.config.as_deref())?;
            generate_cmd(&config, args).await
        }
    }
}

// ── generate ─────────────────────────────────────────────────────────────────

async fn generate_cmd(config: &Config, args: GenerateArgs) -> anyhow::Result<()> {
    let prompt = read_prompt(args.prompt.as_deref())?;
    let credentials = Arc::new(LayeredCredentials::from_config(config));
    let engine = Arc::new(Orchestrator::from_config(config, credentials)?);
    let jobs = plan_jobs(&args, config, &engine, vec![Message::user(prompt)])?;

    let cancel = match args.timeout.or(config.generation.request_timeout()) {
        Some(deadline) => Cancellation::with_deadline(deadline),
        None => Cancellation::new(),
    };
    cancel_on_ctrl_c(&cancel);

    if args.stream {
        return stream_jobs(engine, jobs, cancel, args.json).await;
    }

    match engine.generate_jobs(&jobs, &cancel).await {
        Ok(outcome) => {
            for f in &outcome.failures {
                eprintln!("[prism:warn] {} failed: {}", f.model_id, f.error);
            }
            render_candidates(&outcome.candidates, outcome.failed_count(), args.json)
        }
        Err(EngineError::AllModelsFailed { failures }) => {
            for f in &failures {
                eprintln!("[prism:error] {} failed: {}", f.model_id, f.error);
            }
            anyhow::bail!("every model failed")
        }
        Err(e) => Err(e.into()),
    }
}

/// Turn CLI flags into jobs.  Explicit `--model` ids (or the configured
/// default models) select their own providers; otherwise the enabled
/// providers' first catalog models are used.
fn plan_jobs(
    args: &GenerateArgs,
    config: &Config,
    engine: &Orchestrator,
    messages: Vec<Message>,
) -> anyhow::Result<Vec<Job>> {
    let mut defaults = PlanDefaults::from_config(config);
    if let Some(n) = args.variations {
        anyhow::ensure!(n > 0, "--variations must be at least 1");
        defaults.variations_per_model = n;
        defaults.temperatures.clear();
    }

    let models: &[String] = if !args.models.is_empty() {
        &args.models
    } else if args.providers.is_empty() {
        &config.default_models
    } else {
        &[]
    };
    let mut providers = args.providers.clone();
    if !models.is_empty() {
        for id in models {
            let info = engine
                .registry()
                .lookup(id)
                .with_context(|| format!("resolving model '{id}' (see `prism list-models`)"))?;
            if !providers.contains(&info.provider_id) {
                providers.push(info.provider_id.clone());
            }
        }
        defaults.models = models.to_vec();
    }

    let request = PossibilityRequest {
        messages,
        settings: RequestSettings {
            enabled_providers: providers,
            temperatures: args.temperatures.clone(),
            system_instructions: args.system.clone(),
        },
        options: RequestOptions {
            max_tokens: args.max_tokens,
            stream: args.stream,
            mode: Mode::Possibilities,
            continuation_id: None,
        },
    };
    Ok(engine.plan(&request, &defaults)?)
}

async fn stream_jobs(
    engine: Arc<Orchestrator>,
    jobs: Vec<Job>,
    cancel: Cancellation,
    raw: bool,
) -> anyhow::Result<()> {
    let mut events = engine.stream(jobs, cancel.clone());
    let mut state = PossibilityState::new();
    let mut stdout = io::stdout();
    let progress = Progress { live: is_stderr_tty() };

    while let Some(event) = events.next().await {
        if raw {
            stdout.write_all(wire::encode_event(&event)?.as_bytes())?;
            stdout.flush()?;
        } else {
            progress.report(&state, &event);
        }
        state.apply(&event);
    }

    if cancel.is_cancelled() {
        anyhow::bail!("cancelled");
    }
    if raw {
        stdout.write_all(wire::encode_done().as_bytes())?;
        return Ok(());
    }
    if state.is_empty() && state.failed_count() > 0 {
        anyhow::bail!("every candidate failed");
    }
    render_candidates(&state.ranked(), state.failed_count(), false)
}

/// Width of the content tail shown on the live status line.
const PROGRESS_TAIL: usize = 48;

/// What the streaming view shows for one event.
#[derive(Debug, PartialEq)]
enum ProgressLine {
    /// Redrawn in place; only shown on a terminal.
    Partial(String),
    /// Kept in the scrollback.
    Final(String),
}

/// Live view of a streaming run on stderr.
struct Progress {
    live: bool,
}

impl Progress {
    fn report(&self, state: &PossibilityState, event: &StreamEvent) {
        match progress_line(state, event) {
            Some(ProgressLine::Partial(line)) if self.live => eprint!("\r\x1b[2K{line}"),
            Some(ProgressLine::Final(line)) => {
                if self.live {
                    eprint!("\r\x1b[2K");
                }
                eprintln!("{line}");
            }
            _ => {}
        }
    }
}

/// Describe `event` against the reducer state from just before it applies.
fn progress_line(state: &PossibilityState, event: &StreamEvent) -> Option<ProgressLine> {
    match event {
        StreamEvent::PossibilityStart { model, temperature, .. } => {
            Some(ProgressLine::Partial(format!("[prism] {}  started", label(model, *temperature))))
        }
        StreamEvent::Token { candidate_id, content } => {
            let c = state.get(candidate_id).filter(|c| c.is_streaming)?;
            let text = format!("{}{content}", c.content);
            let chars = text.chars().count();
            let tail: String = text
                .chars()
                .skip(chars.saturating_sub(PROGRESS_TAIL))
                .map(|ch| if ch.is_control() { ' ' } else { ch })
                .collect();
            Some(ProgressLine::Partial(format!(
                "[prism] {}  {chars} chars  …{tail}",
                label(&c.model_info, c.temperature)
            )))
        }
        StreamEvent::PossibilityComplete { candidate_id, .. } => {
            let c = state.get(candidate_id)?;
            Some(ProgressLine::Final(format!(
                "[prism] done  {}  ({} chars)",
                label(&c.model_info, c.temperature),
                c.content.chars().count()
            )))
        }
        StreamEvent::Error { candidate_id, message } => Some(ProgressLine::Final(match state.get(candidate_id) {
            Some(c) => format!("[prism:warn] {} failed: {message}", label(&c.model_info, c.temperature)),
            None => format!("[prism:warn] {message}"),
        })),
        StreamEvent::Confidence { .. } | StreamEvent::Done { .. } => None,
    }
}

fn cancel_on_ctrl_c(cancel: &Cancellation) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n[prism] cancelling…");
            cancel.cancel();
        }
    });
}

fn read_prompt(arg: Option<&str>) -> anyhow::Result<String> {
    let prompt = match arg {
        Some(p) => p.to_string(),
        None if !is_stdin_tty() => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).context("reading stdin")?;
            buf
        }
        None => anyhow::bail!("no prompt given (pass it as an argument or on stdin)"),
    };
    let prompt = prompt.trim();
    anyhow::ensure!(!prompt.is_empty(), "prompt is empty");
    Ok(prompt.to_string())
}

// ── replay ───────────────────────────────────────────────────────────────────

async fn replay_cmd(file: &Path, json: bool) -> anyhow::Result<()> {
    let bytes = if file == Path::new("-") {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf).context("reading stdin")?;
        buf
    } else {
        tokio::fs::read(file)
            .await
            .with_context(|| format!("reading transcript {}", file.display()))?
    };

    let chunks = futures::stream::iter(bytes.chunks(REPLAY_CHUNK).map(Ok::<_, io::Error>));
    let mut state = PossibilityState::new();
    wire::read_events(chunks, &Cancellation::new(), |event| state.apply(&event)).await?;
    if !state.is_finished() {
        warn!("transcript ended without a done event");
    }
    render_candidates(&state.ranked(), state.failed_count(), json)
}

// ── output ───────────────────────────────────────────────────────────────────

fn label(model: &ModelInfo, temperature: Option<f32>) -> String {
    match temperature {
        Some(t) => format!("{} @ {t:.2}", model.id),
        None => model.id.clone(),
    }
}

fn render_candidates(candidates: &[Candidate], failed: usize, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        let out = serde_json::json!({ "candidates": candidates, "failed": failed });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if candidates.is_empty() {
        println!("No possibilities.");
        return Ok(());
    }
    for (rank, c) in candidates.iter().enumerate() {
        println!("#{}  confidence {}  {}", rank + 1, c.confidence, label(&c.model_info, c.temperature));
        for line in c.content.lines() {
            println!("    {line}");
        }
        println!();
    }
    print!("Total: {} possibilit{}", candidates.len(), if candidates.len() == 1 { "y" } else { "ies" });
    if failed > 0 {
        print!(", {failed} failed");
    }
    println!();
    Ok(())
}

// ── catalog / providers / config ─────────────────────────────────────────────

/// List catalog models, optionally filtered by provider.
fn list_models_cmd(config: &Config, provider_filter: Option<&str>, as_json: bool) -> anyhow::Result<()> {
    if let Some(prov) = provider_filter {
        if prism_model::get_provider(prov).is_none() && config.provider(prov).is_none() {
            eprintln!("Unknown provider: {prov:?}");
            eprintln!("\nAvailable providers (run `prism list-providers` for details):");
            for p in prism_model::list_providers() {
                eprintln!("  {:20} {}", p.id, p.name);
            }
            anyhow::bail!("Invalid provider: {prov}");
        }
    }

    let registry = ModelRegistry::bundled().with_entries(&config.models);
    let mut entries: Vec<&ModelInfo> = registry
        .all()
        .iter()
        .filter(|m| provider_filter.map_or(true, |p| m.provider_id == p))
        .collect();
    entries.sort_by(|a, b| a.provider_id.cmp(&b.provider_id).then(a.id.cmp(&b.id)));

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No models found.");
        return Ok(());
    }

    let id_w = entries.iter().map(|e| e.id.len()).max().unwrap_or(10).max(10);
    let prov_w = entries.iter().map(|e| e.provider_id.len()).max().unwrap_or(8).max(8);

    println!(
        "{:<id_w$}  {:<prov_w$}  {:>10}  {:>7}  NAME",
        "ID", "PROVIDER", "MAX TOKENS", "SCORED",
        id_w = id_w, prov_w = prov_w,
    );
    println!("{}", "-".repeat(id_w + prov_w + 40));
    for e in &entries {
        println!(
            "{:<id_w$}  {:<prov_w$}  {:>10}  {:>7}  {}",
            e.id,
            e.provider_id,
            e.max_tokens,
            if e.supports_confidence_score { "yes" } else { "no" },
            e.display_name,
            id_w = id_w, prov_w = prov_w,
        );
    }
    println!("\nTotal: {} model(s)", entries.len());
    Ok(())
}

/// List all registered model providers.
fn list_providers_cmd(detail: bool, as_json: bool) -> anyhow::Result<()> {
    let providers = prism_model::list_providers();

    if as_json {
        #[derive(serde::Serialize)]
        struct ProviderJson {
            id: &'static str,
            name: &'static str,
            description: &'static str,
            kind: &'static str,
            default_api_key_env: Option<&'static str>,
            default_base_url: Option<&'static str>,
            requires_api_key: bool,
            supports_logprobs: bool,
        }
        let rows: Vec<ProviderJson> = providers.iter().map(|p| ProviderJson {
            id: p.id,
            name: p.name,
            description: p.description,
            kind: p.kind.as_str(),
            default_api_key_env: p.default_api_key_env,
            default_base_url: p.default_base_url,
            requires_api_key: p.requires_api_key,
            supports_logprobs: p.supports_logprobs,
        }).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Supported Model Providers ({} total)\n", providers.len());

    if detail {
        for p in providers {
            println!("  {} ({})", p.id, p.name);
            println!("    {}", p.description);
            println!("    Protocol    : {}", p.kind);
            if let Some(env) = p.default_api_key_env {
                println!("    API key env : {env}");
            }
            if let Some(url) = p.default_base_url {
                println!("    Default URL : {url}");
            }
            if !p.requires_api_key {
                println!("    Auth        : none required");
            }
            println!("    Confidence  : {}", if p.supports_logprobs { "logprobs" } else { "unknown" });
            println!();
        }
    } else {
        let id_w = providers.iter().map(|p| p.id.len()).max().unwrap_or(10).max(10);
        let name_w = providers.iter().map(|p| p.name.len()).max().unwrap_or(8).max(8);
        println!("{:<id_w$}  {:<name_w$}  DESCRIPTION", "ID", "NAME");
        println!("{}", "-".repeat(id_w + name_w + 40));
        for p in providers {
            println!("{:<id_w$}  {:<name_w$}  {}", p.id, p.name, p.description);
        }
        println!("\nUse `prism list-providers --detail` for API key and URL details.");
        println!("Use `prism list-models --provider <ID>` to see models for a specific provider.");
    }
    Ok(())
}

async fn validate_key_cmd(config: &Config, provider: &str, key: Option<String>) -> anyhow::Result<()> {
    let credentials = Arc::new(LayeredCredentials::from_config(config));
    let key = match key {
        Some(k) => k,
        None => credentials
            .api_key(provider)
            .await
            .with_context(|| format!("no API key configured for '{provider}'; pass --key"))?,
    };
    let engine = Orchestrator::from_config(config, credentials)?;
    if engine.validate_credential(provider, &key).await? {
        println!("{provider}: key accepted");
        Ok(())
    } else {
        println!("{provider}: key rejected");
        std::process::exit(1);
    }
}

fn show_config(loaded: prism_config::Loaded) -> anyhow::Result<()> {
    let mut config = loaded.config;
    if loaded.sources.is_empty() {
        println!("# no config files found; built-in defaults");
    }
    for source in &loaded.sources {
        println!("# from {}", source.display());
    }
    for p in config.providers.values_mut() {
        if p.api_key.is_some() {
            p.api_key = Some("<redacted>".into());
        }
    }
    println!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn is_stdin_tty() -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        unsafe { libc::isatty(io::stdin().as_raw_fd()) != 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

fn is_stderr_tty() -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        unsafe { libc::isatty(io::stderr().as_raw_fd()) != 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn started(id: &str) -> (PossibilityState, StreamEvent) {
        let start = StreamEvent::PossibilityStart {
            candidate_id: id.into(),
            model: ModelInfo {
                id: "gpt-4o".into(),
                display_name: "GPT-4o".into(),
                provider_id: "openai".into(),
                max_tokens: 1024,
                supports_confidence_score: true,
                accepted_content_types: vec![],
            },
            provider: "openai".into(),
            temperature: Some(0.3),
        };
        let mut state = PossibilityState::new();
        state.apply(&start);
        (state, start)
    }

    #[test]
    fn tokens_redraw_the_growing_content() {
        let (mut state, start) = started("c1");
        assert_eq!(
            progress_line(&PossibilityState::new(), &start),
            Some(ProgressLine::Partial("[prism] gpt-4o @ 0.30  started".into()))
        );

        let first = StreamEvent::token("c1", "Once upon");
        assert_eq!(
            progress_line(&state, &first),
            Some(ProgressLine::Partial("[prism] gpt-4o @ 0.30  9 chars  …Once upon".into()))
        );
        state.apply(&first);
        assert_eq!(
            progress_line(&state, &StreamEvent::token("c1", "\na time")),
            Some(ProgressLine::Partial("[prism] gpt-4o @ 0.30  16 chars  …Once upon a time".into()))
        );
    }

    #[test]
    fn long_content_shows_only_the_tail() {
        let (state, _) = started("c1");
        let text = "x".repeat(100) + "END";
        let Some(ProgressLine::Partial(line)) = progress_line(&state, &StreamEvent::token("c1", text)) else {
            panic!("expected a partial line");
        };
        assert!(line.contains("103 chars"));
        assert!(line.ends_with(&format!("…{}END", "x".repeat(PROGRESS_TAIL - 3))));
    }

    #[test]
    fn completion_and_failure_are_final_lines() {
        let (mut state, _) = started("c1");
        state.apply(&StreamEvent::token("c1", "hello"));
        let complete = StreamEvent::PossibilityComplete { candidate_id: "c1".into(), finish_reason: None, usage: None };
        assert_eq!(
            progress_line(&state, &complete),
            Some(ProgressLine::Final("[prism] done  gpt-4o @ 0.30  (5 chars)".into()))
        );
        let error = StreamEvent::Error { candidate_id: "c1".into(), message: "HTTP 500".into() };
        assert_eq!(
            progress_line(&state, &error),
            Some(ProgressLine::Final("[prism:warn] gpt-4o @ 0.30 failed: HTTP 500".into()))
        );
    }

    #[test]
    fn tokens_for_unknown_candidates_are_not_shown() {
        assert_eq!(progress_line(&PossibilityState::new(), &StreamEvent::token("nope", "x")), None);
    }
}
