//! Runtime configuration for the taskwatch daemon.
//!
//! Loaded from `$TASKWATCH_CONFIG`, falling back to `~/.taskwatch/daemon.toml`.
//! A missing file yields defaults; every field carries a serde default so
//! partial files are valid.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::threshold::EstimateUnit;

pub const CONFIG_PATH_ENV: &str = "TASKWATCH_CONFIG";
const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".taskwatch/daemon.toml";
const DEFAULT_STORE_RELATIVE_PATH: &str = ".taskwatch/store.db";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MonitorConfig {
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub threshold: ThresholdConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_liveness_interval_ms")]
    pub interval_ms: u64,
    /// Unchanged-duration window after which the owning client is considered asleep.
    #[serde(default = "default_silence_threshold_secs")]
    pub silence_threshold_secs: u64,
    /// Synthesized progress is logged whenever the duration hits a multiple of this.
    #[serde(default = "default_progress_log_every_secs")]
    pub progress_log_every_secs: u64,
}

impl LivenessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn silence_threshold(&self) -> chrono::Duration {
        i64::try_from(self.silence_threshold_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_liveness_interval_ms(),
            silence_threshold_secs: default_silence_threshold_secs(),
            progress_log_every_secs: default_progress_log_every_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    LiveRecordings,
    TaskDocuments,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LiveRecordings => "live_recordings",
            Self::TaskDocuments => "task_documents",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_threshold_interval_secs")]
    pub interval_secs: u64,
    /// One threshold reconciler is started per listed source.
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceKind>,
    #[serde(default = "default_estimate_unit")]
    pub live_recordings_unit: EstimateUnit,
    #[serde(default = "default_estimate_unit")]
    pub task_documents_unit: EstimateUnit,
}

impl ThresholdConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn unit_for(&self, source: SourceKind) -> EstimateUnit {
        match source {
            SourceKind::LiveRecordings => self.live_recordings_unit,
            SourceKind::TaskDocuments => self.task_documents_unit,
        }
    }

    /// Configured sources with duplicates removed, in declaration order.
    pub fn unique_sources(&self) -> Vec<SourceKind> {
        let mut seen = Vec::new();
        for source in &self.sources {
            if !seen.contains(source) {
                seen.push(*source);
            }
        }
        seen
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_threshold_interval_secs(),
            sources: default_sources(),
            live_recordings_unit: default_estimate_unit(),
            task_documents_unit: default_estimate_unit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolve_path(&self) -> Result<PathBuf, String> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => {
                let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
                Ok(home.join(DEFAULT_STORE_RELATIVE_PATH))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// Push endpoint URL. When unset, delivery is disabled and only audit
    /// records are written.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_push_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_placeholder_prefix")]
    pub placeholder_prefix: String,
    #[serde(default = "default_placeholder_suffix")]
    pub placeholder_suffix: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token_env: default_token_env(),
            timeout_ms: default_push_timeout_ms(),
            placeholder_prefix: default_placeholder_prefix(),
            placeholder_suffix: default_placeholder_suffix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_shutdown_timeout_secs")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Upper bound for any configured duration (ten years).
const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;
const MAX_DURATION_MS: u64 = MAX_DURATION_SECS * 1000;

fn check_range(key: &str, value: u64, min: u64, max: u64) -> Result<(), String> {
    if value < min || value > max {
        return Err(format!("{} must be between {} and {}, got {}", key, min, max, value));
    }
    Ok(())
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), String> {
        check_range("liveness.interval_ms", self.liveness.interval_ms, 1, MAX_DURATION_MS)?;
        check_range(
            "liveness.silence_threshold_secs",
            self.liveness.silence_threshold_secs,
            0,
            MAX_DURATION_SECS,
        )?;
        check_range("threshold.interval_secs", self.threshold.interval_secs, 1, MAX_DURATION_SECS)?;
        check_range("push.timeout_ms", self.push.timeout_ms, 1, MAX_DURATION_MS)?;
        check_range("shutdown.timeout_secs", self.shutdown.timeout_secs, 0, MAX_DURATION_SECS)?;
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf, String> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_config(path: Option<PathBuf>) -> Result<MonitorConfig, String> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(MonitorConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| {
        format!(
            "Failed to read config {}: {}",
            config_path.display(),
            err
        )
    })?;
    let config = toml::from_str::<MonitorConfig>(&content).map_err(|err| {
        format!(
            "Failed to parse config {}: {}",
            config_path.display(),
            err
        )
    })?;
    config.validate()?;
    Ok(config)
}

fn default_liveness_interval_ms() -> u64 {
    1000
}

fn default_silence_threshold_secs() -> u64 {
    5
}

fn default_progress_log_every_secs() -> u64 {
    300
}

fn default_threshold_interval_secs() -> u64 {
    30
}

fn default_sources() -> Vec<SourceKind> {
    vec![SourceKind::LiveRecordings, SourceKind::TaskDocuments]
}

fn default_estimate_unit() -> EstimateUnit {
    EstimateUnit::Hours
}

fn default_token_env() -> String {
    "TASKWATCH_PUSH_TOKEN".to_string()
}

fn default_push_timeout_ms() -> u64 {
    5000
}

fn default_placeholder_prefix() -> String {
    "device_".to_string()
}

fn default_placeholder_suffix() -> String {
    "_notification".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}
