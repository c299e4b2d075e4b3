use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::fetch::batch::BatchController;
use crate::fetch::retry::RetryPolicy;
use crate::services::CycleOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub fetch: FetchConfig,

    pub scheduler: SchedulerConfig,

    pub matching: MatchingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            fetch: FetchConfig::default(),
            scheduler: SchedulerConfig::default(),
            matching: MatchingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the persisted JSON documents.
    pub data_dir: String,

    pub log_level: String,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            log_level: "info".to_string(),
            worker_threads: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Override for the catalog bulk endpoint; the public store API
    /// when unset.
    pub steam_api_url: Option<String>,

    /// Ids per bulk request before any overload shrinking.
    pub batch_size: usize,

    /// Smallest batch the controller will shrink to.
    pub batch_floor: usize,

    /// Multiplier applied to the batch size on server overload.
    pub shrink_factor: f64,

    /// Base backoff delay in milliseconds (doubles per retry).
    pub base_delay_ms: u64,

    pub max_retries: u32,

    pub request_timeout_seconds: u64,

    /// The free-platform scrapers are external collaborators; when
    /// disabled the cycle leaves free listings untouched instead of
    /// inventing not-found results.
    pub free_platforms_enabled: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            steam_api_url: None,
            batch_size: 500,
            batch_floor: 50,
            shrink_factor: 0.8,
            base_delay_ms: 1000,
            max_retries: 3,
            request_timeout_seconds: 30,
            free_platforms_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,

    pub check_interval_minutes: u32,

    /// Six-field cron expression; takes precedence over the interval.
    pub cron_expression: Option<String>,

    /// Cap on catalog entities fetched per cycle.
    pub max_updates_per_run: Option<usize>,

    /// Videos published before this instant stop seeding refreshes.
    pub cutoff_date: Option<DateTime<Utc>>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_minutes: 360,
            cron_expression: None,
            max_updates_per_run: None,
            cutoff_date: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Ratings an absorbed listing needs before its review percentage
    /// is published on the catalog entry.
    pub min_review_sample: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_review_sample: 10,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("demoarr").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".demoarr").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.batch_size == 0 {
            anyhow::bail!("fetch.batch_size must be at least 1");
        }
        if !(0.1..1.0).contains(&self.fetch.shrink_factor) {
            anyhow::bail!("fetch.shrink_factor must be in [0.1, 1.0)");
        }
        if self.scheduler.enabled
            && self.scheduler.check_interval_minutes == 0
            && self.scheduler.cron_expression.is_none()
        {
            anyhow::bail!("Scheduler interval must be > 0 or cron expression must be set");
        }
        Ok(())
    }

    #[must_use]
    pub fn batch_controller(&self) -> BatchController {
        BatchController::new(
            self.fetch.batch_size,
            self.fetch.batch_floor,
            self.fetch.shrink_factor,
        )
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.fetch.base_delay_ms),
            self.fetch.max_retries,
        )
    }

    #[must_use]
    pub fn cycle_options(&self) -> CycleOptions {
        CycleOptions {
            max_updates: self.scheduler.max_updates_per_run,
            cutoff: self.scheduler.cutoff_date,
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.request_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fetch.batch_size, 500);
        assert_eq!(config.fetch.shrink_factor, 0.8);
        assert_eq!(config.scheduler.check_interval_minutes, 360);
        assert_eq!(config.matching.min_review_sample, 10);
        assert!(!config.fetch.free_platforms_enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[fetch]"));
        assert!(toml_str.contains("[scheduler]"));
        assert!(toml_str.contains("[matching]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [fetch]
            batch_size = 100
            batch_floor = 10
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.fetch.batch_size, 100);

        assert_eq!(config.scheduler.check_interval_minutes, 360);
    }

    #[test]
    fn test_validate_rejects_bad_shrink_factor() {
        let mut config = Config::default();
        config.fetch.shrink_factor = 1.5;
        assert!(config.validate().is_err());
    }
}
