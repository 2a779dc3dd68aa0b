#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::broadcast;

use mirror_sync::storage::{MemoryPreferences, StateStore};
use mirror_sync::sync::{Event, ManualClock, MapResolver, SyncEngine, SyncSummary};

pub const STATE_KEY: &str = "MirrorSync_State";

/// Project tree, destination tree and an engine wired to a manual clock.
pub struct Fixture {
    pub project: TempDir,
    pub dest: TempDir,
    pub prefs: Arc<MemoryPreferences>,
    pub resolver: Arc<MapResolver>,
    pub clock: ManualClock,
    pub engine: SyncEngine,
}

impl Fixture {
    pub async fn new() -> Self {
        let project = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let prefs = Arc::new(MemoryPreferences::new());
        let resolver = Arc::new(MapResolver::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());

        let engine = Self::open_engine(&project, &prefs, &resolver, &clock);
        let mut fixture = Self {
            project,
            dest,
            prefs,
            resolver,
            clock,
            engine,
        };
        let destination = fixture.dest_str();
        fixture.engine.set_destination(&destination).await.unwrap();
        fixture
    }

    fn open_engine(
        project: &TempDir,
        prefs: &Arc<MemoryPreferences>,
        resolver: &Arc<MapResolver>,
        clock: &ManualClock,
    ) -> SyncEngine {
        let store = StateStore::new(prefs.clone(), STATE_KEY);
        SyncEngine::new(store, resolver.clone(), project.path()).with_clock(Arc::new(clock.clone()))
    }

    /// A second engine over the same preferences, as after a restart.
    pub fn reopen(&self) -> SyncEngine {
        Self::open_engine(&self.project, &self.prefs, &self.resolver, &self.clock)
    }

    pub fn dest_str(&self) -> String {
        self.dest.path().to_string_lossy().into_owned()
    }

    pub fn write(&self, rel: &str, data: &[u8]) {
        let path = self.project.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    pub fn dest_path(&self, rel: &str) -> PathBuf {
        self.dest.path().join(rel)
    }

    pub fn read_dest(&self, rel: &str) -> Option<Vec<u8>> {
        fs::read(self.dest_path(rel)).ok()
    }

    /// Registers the id with the resolver and marks it.
    pub async fn track(&mut self, id: &str, rel: &str) {
        self.resolver.insert(id, rel);
        assert!(self.engine.mark_item(id, rel).await.unwrap());
    }

    pub async fn track_in(&mut self, id: &str, rel: &str, category: &str) {
        self.track(id, rel).await;
        assert!(self.engine.set_item_category(id, category).await.unwrap());
    }

    /// Syncs everything and drains the queue, returning the batch summary.
    pub async fn sync_all(&mut self, force: bool) -> SyncSummary {
        let mut events = self.engine.subscribe_events();
        self.engine.sync_all(force, false, None).await.unwrap();
        self.engine.run_until_idle().await;
        completed(&mut events).expect("batch completed")
    }
}

/// Last `SyncCompleted` summary waiting on the receiver.
pub fn completed(events: &mut broadcast::Receiver<Event>) -> Option<SyncSummary> {
    let mut summary = None;
    while let Ok(event) = events.try_recv() {
        if let Event::SyncCompleted { summary: s, .. } = event {
            summary = Some(s);
        }
    }
    summary
}

pub fn drain_events(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
