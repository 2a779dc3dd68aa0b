use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::sync::SyncState;

/// Opaque string key-value store that holds the persisted state blob.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Preferences kept in a single SQLite table.
#[derive(Clone)]
pub struct SqlitePreferences {
    pool: SqlitePool,
}

impl SqlitePreferences {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Create database file if it doesn't exist
        if !database_url.contains(":memory:") {
            let path = database_url.strip_prefix("sqlite://").unwrap_or(database_url);
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // One connection keeps in-memory databases alive and writes ordered.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for SqlitePreferences {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM preferences WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get("value")))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO preferences (key, value, updated_at)
            VALUES (?1, ?2, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Process-local preferences, handy for tests and embedding hosts.
#[derive(Debug, Default, Clone)]
pub struct MemoryPreferences {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferences {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Holds the [`SyncState`] aggregate and writes it through on every mutation.
///
/// The blob is read lazily on first access. An unreadable blob is logged and
/// replaced by an empty state rather than failing the process.
pub struct StateStore {
    prefs: Arc<dyn PreferenceStore>,
    key: String,
    state: Option<SyncState>,
}

impl StateStore {
    pub fn new(prefs: Arc<dyn PreferenceStore>, key: impl Into<String>) -> Self {
        Self {
            prefs,
            key: key.into(),
            state: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state.is_some()
    }

    pub async fn state(&mut self) -> Result<&mut SyncState> {
        if self.state.is_none() {
            let loaded = self.load().await?;
            self.state = Some(loaded);
        }
        Ok(self.state.get_or_insert_with(SyncState::default))
    }

    async fn load(&self) -> Result<SyncState> {
        let Some(blob) = self.prefs.get(&self.key).await? else {
            debug!("No persisted state under {}, starting fresh", self.key);
            return Ok(SyncState::default());
        };

        match serde_json::from_str::<SyncState>(&blob) {
            Ok(state) => {
                info!("Loaded {} tracked items from {}", state.items.len(), self.key);
                Ok(state)
            }
            Err(e) => {
                warn!("Discarding unreadable state under {}: {}", self.key, e);
                Ok(SyncState::default())
            }
        }
    }

    pub async fn persist(&self) -> Result<()> {
        let Some(state) = &self.state else {
            return Ok(());
        };
        let blob = serde_json::to_string_pretty(state)?;
        self.prefs.set(&self.key, &blob).await
    }
}
