use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming a YAML file that overrides [`FrameConfig`] defaults.
pub const CONFIG_ENV: &str = "FRONTIER_FRAMES_CONFIG";

const DEFAULT_WORKER_FRAME_INTERVAL_MS: f64 = 1_000.0 / 60.0;
const DEFAULT_MAX_PENDING_JOBS: usize = 1_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read frame config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("worker_frame_interval_ms must be a positive number, got {0}")]
    InvalidInterval(f64),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrameConfig {
    /// Cadence of the synthetic frame clock that drives worker globals.
    pub worker_frame_interval_ms: f64,
    /// Upper bound on microtasks drained after each script entry point.
    pub max_pending_jobs: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            worker_frame_interval_ms: DEFAULT_WORKER_FRAME_INTERVAL_MS,
            max_pending_jobs: DEFAULT_MAX_PENDING_JOBS,
        }
    }
}

impl FrameConfig {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = match config_path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)?;
                serde_yaml::from_str::<FrameConfig>(&contents)?
            }
            _ => FrameConfig::default(),
        };
        config.validate()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
    }

    fn validate(self) -> Result<Self, ConfigError> {
        let interval = self.worker_frame_interval_ms;
        if !interval.is_finite() || interval <= 0.0 {
            return Err(ConfigError::InvalidInterval(interval));
        }
        Ok(self)
    }

    pub fn worker_frame_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.worker_frame_interval_ms / 1_000.0)
            .unwrap_or(Duration::from_millis(1))
    }
}
