// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "prism",
    about = "Generate, score and rank alternative LLM responses",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate ranked possibilities for a prompt.
    ///
    /// Every selected model is called once per temperature and system
    /// instruction.  Models that fail are dropped; the rest are ranked by
    /// confidence.
    Generate(GenerateArgs),

    /// Rebuild and rank possibilities from a captured event stream.
    ///
    /// The file is the output of `prism generate --stream --json`.
    Replay {
        /// Transcript file; `-` reads stdin
        file: PathBuf,
        /// Output as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List models in the catalog (bundled plus configured).
    ListModels {
        /// Filter by provider id (e.g. "openai", "anthropic", "groq")
        #[arg(long, short = 'p')]
        provider: Option<String>,
        /// Output as JSON instead of a formatted table
        #[arg(long)]
        json: bool,
    },

    /// List all supported model providers.
    ///
    /// Shows each provider's id, name, description, and default API key
    /// environment variable.  Use the provider id in your config file under
    /// `enabled_providers` or `[providers.<id>]`.
    ListProviders {
        /// Show detailed information for each provider
        #[arg(long, short = 'd')]
        detail: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check whether an API key is accepted by a provider.
    ///
    /// Exits 0 when the key works and 1 when it does not.
    ValidateKey {
        /// Provider id
        provider: String,
        /// Key to test; defaults to the configured credential
        #[arg(long, env = "PRISM_API_KEY", hide_env_values = true)]
        key: Option<String>,
    },

    /// Print the effective configuration (API keys redacted) and exit
    ShowConfig,

    /// Generate shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Prompt text; read from stdin when omitted
    #[arg(value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Model id; repeat for several models.  Defaults to the configured models
    #[arg(long = "model", short = 'm', value_name = "ID")]
    pub models: Vec<String>,

    /// Provider id whose default model takes part; repeatable
    #[arg(long = "provider", short = 'p', value_name = "ID", conflicts_with = "models")]
    pub providers: Vec<String>,

    /// Temperature variations per model (a deterministic sweep)
    #[arg(long, short = 'n')]
    pub variations: Option<usize>,

    /// Explicit temperatures, comma separated.  Overrides --variations
    #[arg(long = "temperature", short = 't', value_delimiter = ',')]
    pub temperatures: Vec<f32>,

    /// Alternative system instruction; repeatable
    #[arg(long = "system", short = 's', value_name = "TEXT")]
    pub system: Vec<String>,

    /// Maximum output tokens per possibility
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Stream events as they arrive
    #[arg(long)]
    pub stream: bool,

    /// Output as JSON.  With --stream, write the raw event stream
    #[arg(long)]
    pub json: bool,

    /// Overall deadline, e.g. "30s" or "2m"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "prism", &mut std::io::stdout());
}
