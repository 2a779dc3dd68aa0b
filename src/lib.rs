//! Incremental mirroring of a curated set of project files and folders into
//! a destination tree.
//!
//! [`sync::SyncEngine`] owns the persisted [`sync::SyncState`] and turns sync
//! requests into queued per-item units that drain one per tick;
//! [`sync::SyncScheduler`] triggers unattended syncs on elapsed intervals.

pub mod api;
pub mod error;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod web;

pub use error::{Result, SyncError};
