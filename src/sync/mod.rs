pub mod checksum;
pub mod clock;
pub mod copier;
pub mod engine;
pub mod groups;
pub mod history;
pub mod resolver;
pub mod runner;
pub mod scheduler;
pub mod task_queue;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::SyncEngine;
pub use history::{HistoryEntry, HistoryLog, Severity};
pub use resolver::{MapResolver, MetaFileResolver, PathResolver};
pub use scheduler::{SchedulerReport, SyncScheduler};
pub use task_queue::{QueueState, QueueStatus, TaskQueue};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_CATEGORY: &str = "General";
pub const DEFAULT_INTERVAL_MINUTES: u32 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedItem {
    pub id: String,
    /// Last-known relative path. Re-resolved before every sync.
    pub path: String,
    pub is_directory: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_category")]
    pub category: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Only meaningful for single files.
    pub last_checksum: Option<String>,
}

impl TrackedItem {
    pub fn new(id: impl Into<String>, path: impl Into<String>, is_directory: bool) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            is_directory,
            enabled: true,
            category: DEFAULT_CATEGORY.to_string(),
            last_synced_at: None,
            last_checksum: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GroupingMode {
    Directory,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSchedule {
    pub group_key: String,
    pub mode: GroupingMode,
    pub enabled: bool,
    pub interval_minutes: u32,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Empty means the global destination is used.
    #[serde(default)]
    pub destination_override: String,
}

impl GroupSchedule {
    pub fn new(group_key: impl Into<String>, mode: GroupingMode) -> Self {
        Self {
            group_key: group_key.into(),
            mode,
            enabled: false,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            last_synced_at: None,
            destination_override: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoSync {
    pub enabled: bool,
    pub interval_minutes: u32,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Default for AutoSync {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            last_synced_at: None,
        }
    }
}

/// Aggregate root persisted as one blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncState {
    pub items: Vec<TrackedItem>,
    pub destination_path: String,
    pub auto_sync: AutoSync,
    pub group_schedules: Vec<GroupSchedule>,
    pub history: HistoryLog,
}

impl SyncState {
    pub fn item(&self, id: &str) -> Option<&TrackedItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn item_mut(&mut self, id: &str) -> Option<&mut TrackedItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }
}

/// Counts for one enqueued batch, reported on drain-to-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSummary {
    pub destination: String,
    pub copied: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub files_copied: usize,
    pub bytes_copied: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SyncStarted {
        batch: Uuid,
        total: usize,
        destination: String,
        silent: bool,
    },
    Progress {
        batch: Uuid,
        fraction: f32,
        path: String,
    },
    SyncCompleted {
        batch: Uuid,
        summary: SyncSummary,
    },
    QueueStateChanged {
        state: QueueState,
    },
}

fn default_true() -> bool {
    true
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}
