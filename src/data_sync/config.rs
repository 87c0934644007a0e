use crate::utils::config_loader::{
    LoadConfigError, SectionLoader, SectionLoaderSync, load_from_file, load_from_file_sync,
};
use crate::utils::constants::TaskName;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Configuration for the refresh orchestration core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Base URL of the insights backend
    pub base_url: String,
    /// Whether automatic table polling starts with the context
    pub auto_refresh_enabled: bool,
    /// Lifetime of cached GET responses in milliseconds
    pub cache_ttl_ms: u64,
    /// Timeout for HTTP requests in seconds
    pub http_timeout_secs: u64,
    pub age_interval_ms: u64,
    pub table_interval_ms: u64,
    pub status_interval_ms: u64,
    pub task_interval_ms: u64,
    pub debugger_interval_ms: u64,
    /// Interval of the composite per-second tick
    pub unified_interval_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            auto_refresh_enabled: true,
            cache_ttl_ms: 5_000,
            http_timeout_secs: 10,
            age_interval_ms: 1_000,
            table_interval_ms: 30_000,
            status_interval_ms: 5_000,
            task_interval_ms: 2_000,
            debugger_interval_ms: 10_000,
            unified_interval_ms: 1_000,
        }
    }
}

#[derive(Deserialize)]
struct RefreshConfigRoot {
    refresh: RefreshConfig,
}

impl RefreshConfig {
    /// Load configuration from environment variables, starting from defaults
    pub fn from_env() -> Result<Self, LoadConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Ok(base_url) = std::env::var("INSIGHTS_BASE_URL") {
            Url::parse(&base_url).map_err(|e| LoadConfigError::invalid("INSIGHTS_BASE_URL", e))?;
            config.base_url = base_url;
        }

        read_env("INSIGHTS_AUTO_REFRESH", &mut config.auto_refresh_enabled)?;
        read_env("INSIGHTS_CACHE_TTL_MS", &mut config.cache_ttl_ms)?;
        read_env("INSIGHTS_HTTP_TIMEOUT_SECS", &mut config.http_timeout_secs)?;
        read_env("INSIGHTS_AGE_INTERVAL_MS", &mut config.age_interval_ms)?;
        read_env("INSIGHTS_TABLE_INTERVAL_MS", &mut config.table_interval_ms)?;
        read_env("INSIGHTS_STATUS_INTERVAL_MS", &mut config.status_interval_ms)?;
        read_env("INSIGHTS_TASK_INTERVAL_MS", &mut config.task_interval_ms)?;
        read_env("INSIGHTS_DEBUGGER_INTERVAL_MS", &mut config.debugger_interval_ms)?;
        read_env("INSIGHTS_UNIFIED_INTERVAL_MS", &mut config.unified_interval_ms)?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the scheduler spin or the cache useless.
    pub fn validate(&self) -> Result<(), LoadConfigError> {
        Url::parse(&self.base_url).map_err(|e| LoadConfigError::invalid("base_url", e))?;

        let intervals = [
            ("age_interval_ms", self.age_interval_ms),
            ("table_interval_ms", self.table_interval_ms),
            ("status_interval_ms", self.status_interval_ms),
            ("task_interval_ms", self.task_interval_ms),
            ("debugger_interval_ms", self.debugger_interval_ms),
            ("unified_interval_ms", self.unified_interval_ms),
        ];
        for (key, value) in intervals {
            if value == 0 {
                return Err(LoadConfigError::invalid(key, "interval must be non-zero"));
            }
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn table_interval(&self) -> Duration {
        Duration::from_millis(self.table_interval_ms)
    }

    pub fn unified_interval(&self) -> Duration {
        Duration::from_millis(self.unified_interval_ms)
    }

    /// Per-name fallback used when a task is registered without an interval.
    /// Unknown names fall back to the unified tick rate.
    pub fn default_interval(&self, name: &str) -> Duration {
        let ms = match name {
            TaskName::AGES => self.age_interval_ms,
            TaskName::TABLE => self.table_interval_ms,
            TaskName::STATUS => self.status_interval_ms,
            TaskName::TASKS => self.task_interval_ms,
            TaskName::DEBUGGER => self.debugger_interval_ms,
            _ => self.unified_interval_ms,
        };
        Duration::from_millis(ms)
    }
}

fn read_env<T>(key: &str, target: &mut T) -> Result<(), LoadConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(key) {
        *target = raw.trim().parse().map_err(|e| LoadConfigError::invalid(key, e))?;
    }
    Ok(())
}

#[async_trait]
impl SectionLoader for RefreshConfig {
    type SectionType = RefreshConfig;

    async fn load_section_from_file(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        let root: RefreshConfigRoot = load_from_file(file_name).await?;
        root.refresh.validate()?;
        Ok(root.refresh)
    }
}

impl SectionLoaderSync for RefreshConfig {
    type SectionType = RefreshConfig;

    fn load_section_from_file_sync(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        let root: RefreshConfigRoot = load_from_file_sync(file_name)?;
        root.refresh.validate()?;
        Ok(root.refresh)
    }
}
