//! Project configuration stored at `.warden/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::atomic::write_atomic;

/// Orchestrator configuration (TOML).
///
/// Edited by humans; every field has a default so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WardenConfig {
    /// Number of workers dispatched together within one wave.
    pub max_concurrency: usize,

    /// Wall-clock budget per worker dispatch.
    pub worker_timeout_secs: u64,

    /// Time between SIGTERM and a forced kill on timeout.
    pub termination_grace_secs: u64,

    /// Captured worker stdout/stderr is truncated beyond this many bytes.
    pub worker_output_limit_bytes: usize,

    /// Checkpoint records kept by automatic pruning.
    pub checkpoint_retention: usize,

    /// Hard cap on orchestrator cycles per `run`.
    pub max_cycles: u32,

    /// Globs workers must never write, in addition to sibling-task files.
    pub forbidden: Vec<String>,

    pub worker: CommandConfig,
    pub verifier: VerifierConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandConfig {
    /// argv; the rendered prompt is written to stdin.
    pub command: Vec<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "-p".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifierConfig {
    /// argv; receives the task as JSON on stdin, prints a verification result on stdout.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            command: vec!["just".to_string(), "verify".to_string()],
            timeout_secs: 15 * 60,
        }
    }
}

/// Tool commands surfaced to workers in the context packet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lint: Option<String>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            worker_timeout_secs: 30 * 60,
            termination_grace_secs: 10,
            worker_output_limit_bytes: 2_000_000,
            checkpoint_retention: 20,
            max_cycles: 100,
            forbidden: vec![".git/**".to_string(), ".warden/**".to_string()],
            worker: CommandConfig::default(),
            verifier: VerifierConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl WardenConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(anyhow!("max_concurrency must be >= 1"));
        }
        if self.worker_timeout_secs == 0 {
            return Err(anyhow!("worker_timeout_secs must be > 0"));
        }
        if self.worker_output_limit_bytes == 0 {
            return Err(anyhow!("worker_output_limit_bytes must be > 0"));
        }
        if self.checkpoint_retention == 0 {
            return Err(anyhow!("checkpoint_retention must be >= 1"));
        }
        if self.max_cycles == 0 {
            return Err(anyhow!("max_cycles must be > 0"));
        }
        if self.verifier.timeout_secs == 0 {
            return Err(anyhow!("verifier.timeout_secs must be > 0"));
        }
        if self.worker.command.first().is_none_or(|arg| arg.trim().is_empty()) {
            return Err(anyhow!("worker.command must be a non-empty array"));
        }
        if self
            .verifier
            .command
            .first()
            .is_none_or(|arg| arg.trim().is_empty())
        {
            return Err(anyhow!("verifier.command must be a non-empty array"));
        }
        for pattern in &self.forbidden {
            crate::core::glob::compile(pattern)
                .with_context(|| format!("invalid forbidden glob '{pattern}'"))?;
        }
        Ok(())
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }

    pub fn verifier_timeout(&self) -> Duration {
        Duration::from_secs(self.verifier.timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `WardenConfig::default()`.
pub fn load_config(path: &Path) -> Result<WardenConfig> {
    if !path.exists() {
        let cfg = WardenConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: WardenConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

pub fn write_config(path: &Path, cfg: &WardenConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}
