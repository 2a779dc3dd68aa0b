use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Control API port
    pub port: u16,

    /// Preference database URL
    pub database_url: String,

    /// Source tree that tracked paths are relative to
    pub project_root: PathBuf,

    /// Preference key holding the state blob
    pub state_key: String,

    /// Host tick period driving the task queue
    pub tick_interval_ms: u64,

    /// Minimum spacing between scheduler evaluations
    pub scheduler_check_secs: u64,

    /// Emit logs as JSON lines
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        let database_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mirror-sync")
            .join("state.db");

        Self {
            port: 8899,
            database_url: format!("sqlite://{}", database_path.display()),
            project_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            state_key: "MirrorSync_State".to_string(),
            tick_interval_ms: 50,
            scheduler_check_secs: 10,
            log_json: false,
        }
    }
}

impl Config {
    /// Load config from environment
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(port) = std::env::var("MIRROR_PORT") {
            config.port = port.parse().context("MIRROR_PORT")?;
        }

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(root) = std::env::var("MIRROR_PROJECT_ROOT") {
            config.project_root = PathBuf::from(root);
        }

        if let Ok(key) = std::env::var("MIRROR_STATE_KEY") {
            config.state_key = key;
        }

        if let Ok(tick) = std::env::var("MIRROR_TICK_MS") {
            config.tick_interval_ms = tick.parse().context("MIRROR_TICK_MS")?;
        }

        if let Ok(check) = std::env::var("MIRROR_SCHEDULER_CHECK_SECS") {
            config.scheduler_check_secs = check.parse().context("MIRROR_SCHEDULER_CHECK_SECS")?;
        }

        if let Ok(json) = std::env::var("MIRROR_LOG_JSON") {
            config.log_json = json.parse().context("MIRROR_LOG_JSON")?;
        }

        if config.tick_interval_ms == 0 {
            anyhow::bail!("MIRROR_TICK_MS must be greater than zero");
        }

        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn scheduler_check_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_check_secs)
    }
}
