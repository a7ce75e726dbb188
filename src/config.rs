use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::{mlog_debug, Error, Result};

/// Which completion backend serves the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Local Ollama server over HTTP.
    #[default]
    Ollama,
    /// `claude` CLI in headless mode.
    Claude,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Ollama => write!(f, "ollama"),
            Backend::Claude => write!(f, "claude"),
        }
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Backend::Ollama),
            "claude" => Ok(Backend::Claude),
            other => Err(Error::Validation(format!("Unknown backend: {}", other))),
        }
    }
}

pub const DEFAULT_MODEL: &str = "gpt-oss";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;
pub const DEFAULT_MAX_SCHEDULER_STEPS: u32 = 50;
pub const MAX_WORKERS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: Backend,
    pub model: String,
    pub ollama_url: String,
    pub claude_command: Option<String>,
    pub request_timeout_secs: u64,
    pub max_iterations: u32,
    pub max_scheduler_steps: u32,
    pub max_workers: usize,
    pub summary_chars: usize,
    pub aggregate_excerpt_chars: usize,
    pub critique_excerpt_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Ollama,
            model: DEFAULT_MODEL.to_string(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            claude_command: None,
            request_timeout_secs: 600,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_scheduler_steps: DEFAULT_MAX_SCHEDULER_STEPS,
            max_workers: MAX_WORKERS,
            summary_chars: 300,
            aggregate_excerpt_chars: 500,
            critique_excerpt_chars: 500,
        }
    }
}

impl Config {
    pub fn maestro_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".maestro"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::maestro_dir()?.join("maestro.toml"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Load ~/.maestro/maestro.toml, apply environment overrides, validate.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Ok(path) => Self::load_from(&path)?,
            Err(Error::NoHomeDir) => Self::default(),
            Err(e) => return Err(e),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        mlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            mlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        mlog_debug!(
            "Config loaded: backend={}, model={}, max_iterations={}",
            config.backend,
            config.model,
            config.max_iterations
        );
        Ok(config)
    }

    /// Apply environment overrides through `lookup` so tests need not touch
    /// the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("MAESTRO_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(model) = lookup("MAESTRO_MODEL") {
            self.model = model;
        }
        if let Some(url) = lookup("OLLAMA_BASE_URL").or_else(|| lookup("OLLAMA_HOST")) {
            self.ollama_url = url;
        }
        if let Some(command) = lookup("MAESTRO_CLAUDE_COMMAND") {
            self.claude_command = Some(command);
        }
        if let Some(raw) = lookup("MAESTRO_MAX_ITERATIONS") {
            self.max_iterations = parse_number("MAESTRO_MAX_ITERATIONS", &raw)?;
        }
        if let Some(raw) = lookup("MAESTRO_MAX_STEPS") {
            self.max_scheduler_steps = parse_number("MAESTRO_MAX_STEPS", &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::Validation(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.max_scheduler_steps == 0 {
            return Err(Error::Validation(
                "max_scheduler_steps must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_WORKERS).contains(&self.max_workers) {
            return Err(Error::Validation(format!(
                "max_workers must be between 1 and {}",
                MAX_WORKERS
            )));
        }
        if self.model.trim().is_empty() {
            return Err(Error::Validation("model must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Validation(format!("{} must be a number, got '{}'", key, raw)))
}
