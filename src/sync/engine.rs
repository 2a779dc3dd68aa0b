use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::copier::Copier;
use super::groups::{self, category_key, group_key};
use super::history::{HistoryEntry, Severity};
use super::resolver::PathResolver;
use super::task_queue::{QueueState, QueueStatus, TaskQueue};
use super::{Event, GroupSchedule, GroupingMode, SyncState, SyncSummary, TrackedItem};
use crate::error::{Result, SyncError};
use crate::storage::StateStore;

/// One deferred unit of copy work: a single tracked item.
#[derive(Debug, Clone)]
pub struct SyncTask {
    pub batch: Uuid,
    pub item: TrackedItem,
    pub destination: PathBuf,
    pub force: bool,
    pub silent: bool,
}

#[derive(Debug)]
pub enum ItemOutcome {
    Copied { files: usize, bytes: u64 },
    Unchanged,
    /// A directory where some members copied and others failed.
    Partial { files: usize, bytes: u64, error: SyncError },
}

#[derive(Debug)]
struct Batch {
    id: Uuid,
    silent: bool,
    summary: SyncSummary,
}

/// Owns the sync state and drives incremental copies through the task queue.
///
/// Every operation runs on the caller's execution context. Copies never
/// happen inside `sync_*` calls; they are enqueued and executed one item
/// per [`SyncEngine::tick`].
pub struct SyncEngine {
    store: StateStore,
    resolver: Arc<dyn PathResolver>,
    clock: Arc<dyn Clock>,
    project_root: PathBuf,
    queue: TaskQueue<SyncTask>,
    batch: Option<Batch>,
    event_tx: broadcast::Sender<Event>,
}

impl SyncEngine {
    pub fn new(store: StateStore, resolver: Arc<dyn PathResolver>, project_root: impl Into<PathBuf>) -> Self {
        let (event_tx, _) = broadcast::channel(128);

        Self {
            store,
            resolver,
            clock: Arc::new(SystemClock),
            project_root: project_root.into(),
            queue: TaskQueue::new(),
            batch: None,
            event_tx,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    pub async fn snapshot(&mut self) -> Result<SyncState> {
        Ok(self.store.state().await?.clone())
    }

    // ---- tracked items -------------------------------------------------

    pub async fn is_marked(&mut self, id: &str) -> Result<bool> {
        Ok(self.store.state().await?.item(id).is_some())
    }

    /// Starts tracking `id`. Returns false if it was already tracked.
    pub async fn mark_item(&mut self, id: &str, path: &str) -> Result<bool> {
        let is_directory = self.project_root.join(path).is_dir();
        let state = self.store.state().await?;
        if state.item(id).is_some() {
            return Ok(false);
        }

        state.items.push(TrackedItem::new(id, path, is_directory));
        self.store.persist().await?;
        info!("Marked {} ({}) for sync", path, id);
        Ok(true)
    }

    pub async fn unmark_item(&mut self, id: &str) -> Result<bool> {
        let state = self.store.state().await?;
        let before = state.items.len();
        state.items.retain(|i| i.id != id);
        let removed = state.items.len() != before;

        self.store.persist().await?;
        Ok(removed)
    }

    pub async fn clear_items(&mut self) -> Result<usize> {
        let state = self.store.state().await?;
        let cleared = state.items.len();
        state.items.clear();
        self.store.persist().await?;
        Ok(cleared)
    }

    pub async fn set_item_enabled(&mut self, id: &str, enabled: bool) -> Result<bool> {
        let state = self.store.state().await?;
        let Some(item) = state.item_mut(id) else {
            return Ok(false);
        };
        item.enabled = enabled;
        self.store.persist().await?;
        Ok(true)
    }

    pub async fn set_all_enabled(&mut self, enabled: bool) -> Result<()> {
        let state = self.store.state().await?;
        state.items.iter_mut().for_each(|i| i.enabled = enabled);
        self.store.persist().await
    }

    pub async fn set_item_category(&mut self, id: &str, category: &str) -> Result<bool> {
        let state = self.store.state().await?;
        let Some(item) = state.item_mut(id) else {
            return Ok(false);
        };
        item.category = category_key(category);
        self.store.persist().await?;
        Ok(true)
    }

    /// Moves every item in category `old` to `new`. Schedules keep their old key.
    pub async fn rename_group(&mut self, old: &str, new: &str) -> Result<usize> {
        let renamed = groups::rename_group(self.store.state().await?, old, new);
        self.store.persist().await?;
        info!("Renamed group {} to {} ({} items)", old, new, renamed);
        Ok(renamed)
    }

    // ---- destination & schedules ---------------------------------------

    pub async fn set_destination(&mut self, path: &str) -> Result<()> {
        self.store.state().await?.destination_path = path.to_string();
        self.store.persist().await
    }

    pub async fn set_auto_sync(&mut self, enabled: bool, interval_minutes: u32) -> Result<()> {
        validate_interval(interval_minutes)?;
        let auto = &mut self.store.state().await?.auto_sync;
        auto.enabled = enabled;
        auto.interval_minutes = interval_minutes;
        self.store.persist().await
    }

    pub async fn mark_auto_synced(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.store.state().await?.auto_sync.last_synced_at = Some(at);
        self.store.persist().await
    }

    /// Looks up the schedule for `(key, mode)`, creating a disabled 60-minute one if absent.
    pub async fn get_or_create_group_schedule(&mut self, key: &str, mode: GroupingMode) -> Result<GroupSchedule> {
        let state = self.store.state().await?;
        let (index, created) = groups::get_or_create_schedule(state, key, mode);
        let schedule = state.group_schedules[index].clone();

        if created {
            debug!("Created schedule for group {} ({:?})", key, mode);
            self.store.persist().await?;
        }
        Ok(schedule)
    }

    pub async fn update_group_schedule(
        &mut self,
        key: &str,
        mode: GroupingMode,
        enabled: bool,
        interval_minutes: u32,
        destination_override: &str,
    ) -> Result<GroupSchedule> {
        validate_interval(interval_minutes)?;
        let state = self.store.state().await?;
        let (index, _) = groups::get_or_create_schedule(state, key, mode);
        let schedule = &mut state.group_schedules[index];
        schedule.enabled = enabled;
        schedule.interval_minutes = interval_minutes;
        schedule.destination_override = destination_override.trim().to_string();
        let updated = schedule.clone();

        self.store.persist().await?;
        Ok(updated)
    }

    pub async fn mark_group_synced(&mut self, key: &str, mode: GroupingMode, at: DateTime<Utc>) -> Result<()> {
        let state = self.store.state().await?;
        let (index, _) = groups::get_or_create_schedule(state, key, mode);
        state.group_schedules[index].last_synced_at = Some(at);
        self.store.persist().await
    }

    // ---- history --------------------------------------------------------

    pub async fn add_history(&mut self, message: impl Into<String>, severity: Severity) -> Result<()> {
        let message = message.into();
        match severity {
            Severity::Info | Severity::Success => info!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }

        let entry = HistoryEntry {
            message,
            timestamp: self.clock.now(),
            severity,
        };
        self.store.state().await?.history.push(entry);
        self.store.persist().await
    }

    pub async fn clear_history(&mut self) -> Result<()> {
        self.store.state().await?.history.clear();
        self.store.persist().await
    }

    pub async fn history(&mut self, limit: Option<usize>) -> Result<Vec<HistoryEntry>> {
        Ok(self.store.state().await?.history.recent(limit))
    }

    /// History append that never fails the caller; used at the drain boundary.
    async fn record(&mut self, message: String, severity: Severity) {
        if let Err(e) = self.add_history(message, severity).await {
            error!("Failed to persist history entry: {}", e);
        }
    }

    // ---- sync entry points ---------------------------------------------

    /// Syncs every enabled item, optionally restricted to one category.
    pub async fn sync_all(&mut self, force: bool, silent: bool, category: Option<&str>) -> Result<usize> {
        let wanted = category.map(category_key);
        let items: Vec<TrackedItem> = self
            .store
            .state()
            .await?
            .items
            .iter()
            .filter(|i| i.enabled)
            .filter(|i| wanted.as_ref().map_or(true, |c| category_key(&i.category) == *c))
            .cloned()
            .collect();

        self.sync_items(&items, None, force, silent).await
    }

    /// Syncs the enabled items belonging to group `(key, mode)` to the group's destination.
    pub async fn sync_group(&mut self, key: &str, mode: GroupingMode, force: bool, silent: bool) -> Result<usize> {
        let schedule = self.get_or_create_group_schedule(key, mode).await?;
        let resolver = self.resolver.clone();
        if mode == GroupingMode::Directory {
            resolver.refresh();
        }

        let items: Vec<TrackedItem> = self
            .store
            .state()
            .await?
            .items
            .iter()
            .filter(|i| i.enabled)
            .filter(|i| {
                let path = match mode {
                    GroupingMode::Directory => resolver.resolve(&i.id).unwrap_or_else(|| i.path.clone()),
                    GroupingMode::Custom => i.path.clone(),
                };
                group_key(i, &path, mode) == key
            })
            .cloned()
            .collect();

        let destination = schedule.destination_override.trim();
        let destination = (!destination.is_empty()).then_some(destination);
        self.sync_items(&items, destination, force, silent).await
    }

    /// Replaces any queued work with one unit per item. Returns how many were enqueued.
    pub async fn sync_items(
        &mut self,
        items: &[TrackedItem],
        destination_override: Option<&str>,
        force: bool,
        silent: bool,
    ) -> Result<usize> {
        let destination = match destination_override.map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) => d.to_string(),
            None => self.store.state().await?.destination_path.trim().to_string(),
        };

        if destination.is_empty() {
            let message = "No destination path configured; sync aborted".to_string();
            self.record(message.clone(), Severity::Error).await;
            return Err(SyncError::Config(message));
        }

        let destination_path = PathBuf::from(&destination);
        let root = canonical_path(&self.project_root);
        if canonical_path(&destination_path).starts_with(&root) {
            let message = format!(
                "Destination {} is inside the project root {}; sync aborted",
                destination,
                root.display()
            );
            self.record(message.clone(), Severity::Error).await;
            return Err(SyncError::Config(message));
        }

        if !destination_path.is_dir() {
            if let Err(e) = tokio::fs::create_dir_all(&destination_path).await {
                let message = format!("Failed to create destination directory {}: {}", destination, e);
                self.record(message.clone(), Severity::Error).await;
                return Err(SyncError::Config(message));
            }
            info!("Created destination directory: {}", destination);
        }

        if self.queue.cancel_all() > 0 {
            debug!("Replaced pending batch with a new sync request");
        }
        self.batch = None;
        self.resolver.refresh();

        if items.is_empty() {
            debug!("Nothing to sync to {}", destination);
            return Ok(0);
        }

        let batch = Uuid::new_v4();
        for item in items {
            self.queue.enqueue(SyncTask {
                batch,
                item: item.clone(),
                destination: destination_path.clone(),
                force,
                silent,
            });
        }

        self.batch = Some(Batch {
            id: batch,
            silent,
            summary: SyncSummary {
                destination: destination.clone(),
                ..SyncSummary::default()
            },
        });

        info!("Queued {} items for sync to {} (force: {})", items.len(), destination, force);
        let _ = self.event_tx.send(Event::SyncStarted {
            batch,
            total: items.len(),
            destination,
            silent,
        });

        Ok(items.len())
    }

    // ---- queue ----------------------------------------------------------

    /// Executes at most one queued unit. Returns false when nothing ran.
    pub async fn tick(&mut self) -> bool {
        let Some(task) = self.queue.next_task() else {
            return false;
        };

        let status = self.queue.status();
        let fraction = (status.completed + 1) as f32 / status.total.max(1) as f32;

        let (path, result) = match self.resolver.resolve(&task.item.id) {
            Some(path) => {
                let result = self.run_task(&task, &path).await;
                (path, result)
            }
            None => (
                task.item.path.clone(),
                Err(SyncError::Resolution(task.item.id.clone())),
            ),
        };
        self.record_outcome(&task, &path, result).await;

        if !task.silent {
            let _ = self.event_tx.send(Event::Progress {
                batch: task.batch,
                fraction,
                path,
            });
        }

        if self.queue.complete_task() {
            self.finish_batch().await;
        }
        true
    }

    /// Ticks until the queue is idle or paused. Returns the number of units executed.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut executed = 0;
        while self.tick().await {
            executed += 1;
        }
        executed
    }

    pub fn pause_queue(&mut self) {
        self.queue.pause();
        self.notify_queue_state();
    }

    pub fn resume_queue(&mut self) {
        self.queue.resume();
        self.notify_queue_state();
    }

    pub fn cancel_queue(&mut self) -> usize {
        let dropped = self.queue.cancel_all();
        self.batch = None;
        self.notify_queue_state();
        dropped
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    fn notify_queue_state(&self) {
        let _ = self.event_tx.send(Event::QueueStateChanged {
            state: self.queue.state(),
        });
    }

    async fn run_task(&mut self, task: &SyncTask, path: &str) -> Result<ItemOutcome> {
        let id = task.item.id.as_str();
        let copier = Copier::new(&self.project_root, &task.destination);

        let (outcome, digest) = if task.item.is_directory {
            let report = copier.sync_directory(path, task.force)?;
            let outcome = if let Some(first) = report.failures.first() {
                ItemOutcome::Partial {
                    files: report.copied,
                    bytes: report.bytes,
                    error: SyncError::Task(format!(
                        "{} of {} files failed to copy, first: {}",
                        report.failures.len(),
                        report.copied + report.unchanged + report.failures.len(),
                        first
                    )),
                }
            } else if report.changed() {
                ItemOutcome::Copied {
                    files: report.copied,
                    bytes: report.bytes,
                }
            } else {
                ItemOutcome::Unchanged
            };
            (outcome, None)
        } else {
            let cached = self
                .store
                .state()
                .await?
                .item(id)
                .map_or_else(|| task.item.last_checksum.clone(), |i| i.last_checksum.clone());
            let report = copier.sync_file(path, cached.as_deref(), task.force)?;
            let outcome = if report.copied {
                ItemOutcome::Copied {
                    files: 1,
                    bytes: report.bytes,
                }
            } else {
                ItemOutcome::Unchanged
            };
            (outcome, Some(report.digest))
        };

        let now = self.clock.now();
        let state = self.store.state().await?;
        if let Some(item) = state.item_mut(id) {
            item.path = path.to_string();
            item.last_synced_at = Some(now);
            if digest.is_some() {
                item.last_checksum = digest;
            }
        }
        self.store.persist().await?;

        if let ItemOutcome::Copied { files, bytes } = &outcome {
            debug!("Synced {} ({} files, {} bytes)", path, files, bytes);
        }
        Ok(outcome)
    }

    async fn record_outcome(&mut self, task: &SyncTask, path: &str, result: Result<ItemOutcome>) {
        let current = self.batch.as_ref().map(|b| b.id) == Some(task.batch);
        let mut summary = self.batch.as_mut().filter(|_| current).map(|b| &mut b.summary);

        match result {
            Ok(ItemOutcome::Copied { files, bytes }) => {
                if let Some(summary) = summary.as_mut() {
                    summary.copied += 1;
                    summary.files_copied += files;
                    summary.bytes_copied += bytes;
                }
            }
            Ok(ItemOutcome::Unchanged) => {
                if let Some(summary) = summary.as_mut() {
                    summary.unchanged += 1;
                }
            }
            Ok(ItemOutcome::Partial { files, bytes, error }) => {
                if let Some(summary) = summary.as_mut() {
                    summary.failed += 1;
                    summary.files_copied += files;
                    summary.bytes_copied += bytes;
                }
                self.record(format!("Error syncing {}: {}", path, error), Severity::Error)
                    .await;
            }
            Err(SyncError::Resolution(id)) => {
                if let Some(summary) = summary.as_mut() {
                    summary.skipped += 1;
                }
                let message = format!("Item {} (last seen at {}) not found; skipped", id, task.item.path);
                self.record(message, Severity::Warning).await;
            }
            Err(e) => {
                if let Some(summary) = summary.as_mut() {
                    summary.failed += 1;
                }
                self.record(format!("Error syncing {}: {}", path, e), Severity::Error)
                    .await;
            }
        }
    }

    async fn finish_batch(&mut self) {
        let Some(batch) = self.batch.take() else {
            return;
        };
        let summary = batch.summary;
        let processed = summary.copied + summary.unchanged;

        let message = format!(
            "Synced {} items to {} ({} copied, {} unchanged, {} skipped, {} failed)",
            processed, summary.destination, summary.copied, summary.unchanged, summary.skipped, summary.failed
        );
        let severity = if summary.failed > 0 || summary.skipped > 0 {
            Severity::Warning
        } else {
            Severity::Success
        };
        self.record(message, severity).await;

        debug!("Batch {} finished (silent: {})", batch.id, batch.silent);
        let _ = self.event_tx.send(Event::SyncCompleted {
            batch: batch.id,
            summary,
        });
    }

    pub fn queue_state(&self) -> QueueState {
        self.queue.state()
    }
}

/// Canonical form of `path`, resolving the longest existing ancestor.
fn canonical_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut missing = Vec::new();
    let mut current = absolute.as_path();
    loop {
        if let Ok(base) = std::fs::canonicalize(current) {
            return missing.iter().rev().fold(base, |acc, part| acc.join(part));
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                current = parent;
            }
            _ => return absolute,
        }
    }
}

fn validate_interval(interval_minutes: u32) -> Result<()> {
    if interval_minutes == 0 {
        return Err(SyncError::Config("Sync interval must be at least one minute".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPreferences;
    use crate::sync::resolver::MapResolver;
    use tempfile::TempDir;

    async fn engine(project: &TempDir) -> (SyncEngine, Arc<MapResolver>) {
        let resolver = Arc::new(MapResolver::new());
        let store = StateStore::new(Arc::new(MemoryPreferences::new()), "state");
        (SyncEngine::new(store, resolver.clone(), project.path()), resolver)
    }

    #[tokio::test]
    async fn test_mark_is_idempotent_and_detects_directories() {
        let project = TempDir::new().unwrap();
        std::fs::create_dir_all(project.path().join("Assets/Tex")).unwrap();
        let (mut engine, _) = engine(&project).await;

        assert!(engine.mark_item("d1", "Assets/Tex").await.unwrap());
        assert!(!engine.mark_item("d1", "Assets/Tex").await.unwrap());
        assert!(engine.is_marked("d1").await.unwrap());

        let state = engine.snapshot().await.unwrap();
        assert_eq!(state.items.len(), 1);
        assert!(state.items[0].is_directory);

        assert!(engine.unmark_item("d1").await.unwrap());
        assert!(!engine.is_marked("d1").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_destination_is_config_error() {
        let project = TempDir::new().unwrap();
        let (mut engine, _) = engine(&project).await;
        let items = vec![TrackedItem::new("a", "Assets/a.txt", false)];

        let err = engine.sync_items(&items, None, false, false).await.unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert_eq!(engine.queue_status().queued, 0);

        let history = engine.history(None).await.unwrap();
        assert_eq!(history.last().unwrap().severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_uncreatable_destination_is_config_error() {
        let project = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let blocker = elsewhere.path().join("file.txt");
        std::fs::write(&blocker, b"x").unwrap();
        let (mut engine, _) = engine(&project).await;

        let destination = blocker.join("dest");
        let items = vec![TrackedItem::new("a", "Assets/a.txt", false)];
        let result = engine
            .sync_items(&items, Some(destination.to_str().unwrap()), false, false)
            .await;
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_canonical_path_keeps_missing_tail() {
        let dir = TempDir::new().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(canonical_path(&dir.path().join("a/b")), root.join("a").join("b"));
    }

    #[tokio::test]
    async fn test_sync_is_deferred_until_tick() {
        let project = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        std::fs::create_dir_all(project.path().join("Assets")).unwrap();
        std::fs::write(project.path().join("Assets/a.txt"), b"a").unwrap();
        let (mut engine, resolver) = engine(&project).await;
        resolver.insert("a", "Assets/a.txt");
        engine.mark_item("a", "Assets/a.txt").await.unwrap();
        engine.set_destination(dest.path().to_str().unwrap()).await.unwrap();

        assert_eq!(engine.sync_all(false, false, None).await.unwrap(), 1);
        assert!(!dest.path().join("Assets/a.txt").exists());
        assert_eq!(engine.queue_state(), QueueState::Running);

        assert!(engine.tick().await);
        assert!(dest.path().join("Assets/a.txt").exists());
        assert!(!engine.tick().await);
        assert_eq!(engine.queue_state(), QueueState::Idle);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let project = TempDir::new().unwrap();
        let (mut engine, _) = engine(&project).await;
        assert!(engine.set_auto_sync(true, 0).await.is_err());
        assert!(engine
            .update_group_schedule("Tex", GroupingMode::Custom, true, 0, "")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_category_is_normalised() {
        let project = TempDir::new().unwrap();
        let (mut engine, _) = engine(&project).await;
        engine.mark_item("a", "Assets/a.txt").await.unwrap();

        assert!(engine.set_item_category("a", "  ").await.unwrap());
        assert_eq!(engine.snapshot().await.unwrap().items[0].category, "General");
        assert!(!engine.set_item_category("missing", "X").await.unwrap());
    }
}
