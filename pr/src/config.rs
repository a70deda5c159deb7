//! PlanRun configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main PlanRun configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// HTTP server configuration
    pub server: ServerConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Worker pool configuration
    pub worker: WorkerConfig,

    /// Steps executed for every run
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration with fallback chain
    ///
    /// Explicit path, then `./.planrun.yml`, then `<config_dir>/planrun/planrun.yml`,
    /// then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".planrun.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("planrun").join("planrun.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed: a broken config file is reported later by [`Config::load`].
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".planrun.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("planrun").join("planrun.yml"));
                }
                paths
            }
        };
        candidates
            .iter()
            .filter(|p| p.exists())
            .find_map(|p| Self::load_from_file(p).ok())
            .and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker.count == 0 {
            return Err(eyre::eyre!("worker.count must be at least 1"));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(eyre::eyre!("worker.poll-interval-ms must be at least 1"));
        }
        for step in &self.pipeline.steps {
            if step.name.trim().is_empty() {
                return Err(eyre::eyre!("pipeline step names must not be empty"));
            }
            if step.timeout_ms == 0 {
                return Err(eyre::eyre!("pipeline step '{}' needs a non-zero timeout-ms", step.name));
            }
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the API listens on
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for run manifests, logs and cancel markers
    pub root: PathBuf,

    /// SQLite database file (relative paths resolve against `root`)
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("planrun"),
            database: PathBuf::from("planrun.db"),
        }
    }
}

impl StorageConfig {
    /// Storage rooted at `root` with the default database name
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            database: PathBuf::from("planrun.db"),
        }
    }

    /// Absolute path of the database file
    pub fn database_path(&self) -> PathBuf {
        if self.database.is_absolute() {
            self.database.clone()
        } else {
            self.root.join(&self.database)
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of workers draining the queue (runs of one plan never overlap)
    pub count: usize,

    /// How often cooperative step bodies poll for cancellation, in milliseconds
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// How long shutdown waits for in-flight runs, in milliseconds
    #[serde(rename = "shutdown-timeout-ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 1,
            poll_interval_ms: 10,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Steps executed for every run, in order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub steps: Vec<StepConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            steps: vec![
                StepConfig::new("prepare", 120),
                StepConfig::new("generate", 150),
                StepConfig::new("finalize", 100),
            ],
        }
    }
}

/// One configured step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step name, as it appears in the manifest and log
    pub name: String,

    /// How long the step works for, in milliseconds
    #[serde(rename = "duration-ms", default)]
    pub duration_ms: u64,

    /// Per-attempt timeout, in milliseconds
    #[serde(rename = "timeout-ms", default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Additional attempts after the first
    #[serde(default)]
    pub retries: u32,

    /// Delay before the first retry, doubled for each later one, in milliseconds
    #[serde(rename = "backoff-ms", default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_timeout_ms() -> u64 {
    2_000
}

fn default_backoff_ms() -> u64 {
    20
}

impl StepConfig {
    /// A step with default timeout, retries and backoff
    pub fn new(name: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            duration_ms,
            timeout_ms: default_timeout_ms(),
            retries: 0,
            backoff_ms: default_backoff_ms(),
        }
    }
}
