// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use toml::{map::Map, Value};
use tracing::debug;

use crate::Config;

/// A merged configuration together with the files it was built from,
/// lowest priority first.
#[derive(Debug, Clone, Default)]
pub struct Loaded {
    pub config: Config,
    pub sources: Vec<PathBuf>,
}

/// Implicit config locations, lowest priority first.
fn discovered_layers() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/prism/config.toml")];
    paths.extend(dirs::home_dir().map(|h| h.join(".config/prism/config.toml")));
    paths.extend(dirs::config_dir().map(|c| c.join("prism/config.toml")));
    paths.push(PathBuf::from(".prism/config.toml"));
    paths.push(PathBuf::from("prism.toml"));
    paths
}

/// Load the effective configuration.  `explicit` (the `--config` flag) is
/// applied last and must exist.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    load_layers(explicit).map(|l| l.config)
}

/// Like [`load`] but also reports which files contributed.
pub fn load_layers(explicit: Option<&Path>) -> anyhow::Result<Loaded> {
    let mut candidates: Vec<PathBuf> = discovered_layers()
        .into_iter()
        .filter(|p| p.is_file())
        .collect();
    // HOME may resolve to the same file as the XDG config dir.
    candidates.dedup();
    candidates.extend(explicit.map(Path::to_path_buf));
    merge_files(candidates)
}

fn merge_files(paths: Vec<PathBuf>) -> anyhow::Result<Loaded> {
    let mut merged = Value::Table(Map::new());
    for path in &paths {
        debug!(path = %path.display(), "applying config layer");
        merge_toml(&mut merged, read_layer(path)?);
    }
    let config: Config = merged.try_into().context("invalid configuration")?;
    Ok(Loaded { config, sources: paths })
}

fn read_layer(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Tables merge key by key; anything else (arrays included) is replaced.
fn merge_toml(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Table(d), Value::Table(s)) => {
            for (key, value) in s {
                match d.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        d.insert(key, value);
                    }
                }
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
