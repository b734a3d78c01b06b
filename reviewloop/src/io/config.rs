//! Workflow configuration stored in `reviewloop.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::budget::IterationBudget;
use crate::io::process::CommandLimits;

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "reviewloop.toml";

/// Workflow configuration (TOML).
///
/// Missing fields default to values that work with a local agent CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Worker/Manager round trips allowed per run. Zero is allowed.
    pub max_iterations: u32,

    /// Maximum bytes for a rendered instruction before dropping sections.
    pub prompt_budget_bytes: usize,

    /// When set, per-iteration artifacts are written under this directory.
    pub iteration_log_dir: Option<PathBuf>,

    /// Command that performs the Worker's task.
    pub executor: ExecutorConfig,

    /// Command that produces Manager verdicts.
    pub generator: GeneratorConfig,

    pub server: ServerConfig,
}

/// The Worker's task executor, backed by a child process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Argv to spawn; the instruction is written to its stdin.
    pub command: Vec<String>,

    /// Wall-clock limit for one call, in seconds.
    pub timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: argv(&["browser-agent", "exec", "-"]),
            timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl ExecutorConfig {
    pub fn limits(&self) -> CommandLimits {
        limits(self.timeout_secs, self.output_limit_bytes)
    }
}

/// The Manager's text generator, backed by a child process.
///
/// Verdicts are short, so the defaults are tighter than the executor's.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: argv(&["llm", "-"]),
            timeout_secs: 2 * 60,
            output_limit_bytes: 20_000,
        }
    }
}

impl GeneratorConfig {
    pub fn limits(&self) -> CommandLimits {
        limits(self.timeout_secs, self.output_limit_bytes)
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn limits(timeout_secs: u64, output_limit_bytes: usize) -> CommandLimits {
    CommandLimits {
        timeout: Duration::from_secs(timeout_secs),
        output_limit_bytes,
    }
}

fn validate_command(
    section: &str,
    command: &[String],
    timeout_secs: u64,
    output_limit_bytes: usize,
) -> Result<()> {
    if command.first().is_none_or(|program| program.trim().is_empty()) {
        return Err(anyhow!("{section}.command must be a non-empty array"));
    }
    if timeout_secs == 0 {
        return Err(anyhow!("{section}.timeout_secs must be > 0"));
    }
    if output_limit_bytes == 0 {
        return Err(anyhow!("{section}.output_limit_bytes must be > 0"));
    }
    Ok(())
}

/// Settings used only by the HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory where screenshots are saved by the task executor.
    pub save_path: PathBuf,

    /// Known target systems, looked up by name.
    pub urls: Vec<UrlInfo>,
}

/// A named capture target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UrlInfo {
    pub name: String,
    pub url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            save_path: PathBuf::from("screenshots"),
            urls: Vec::new(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: IterationBudget::DEFAULT_MAX_ITERATIONS,
            prompt_budget_bytes: 40_000,
            iteration_log_dir: None,
            executor: ExecutorConfig::default(),
            generator: GeneratorConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        let ExecutorConfig {
            command,
            timeout_secs,
            output_limit_bytes,
        } = &self.executor;
        validate_command("executor", command, *timeout_secs, *output_limit_bytes)?;
        let GeneratorConfig {
            command,
            timeout_secs,
            output_limit_bytes,
        } = &self.generator;
        validate_command("generator", command, *timeout_secs, *output_limit_bytes)?;
        for info in &self.server.urls {
            if info.name.trim().is_empty() || info.url.trim().is_empty() {
                return Err(anyhow!("server.urls entries need a non-empty name and url"));
            }
        }
        Ok(())
    }

    pub fn budget(&self) -> IterationBudget {
        IterationBudget::new(self.max_iterations)
    }

    pub fn find_url(&self, name: &str) -> Option<&UrlInfo> {
        self.server.urls.iter().find(|info| info.name == name)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `WorkflowConfig::default()`.
pub fn load_config(path: &Path) -> Result<WorkflowConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = WorkflowConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: WorkflowConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    debug!(path = %path.display(), max_iterations = cfg.max_iterations, "config loaded");
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &WorkflowConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
