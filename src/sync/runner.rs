//! Tick source plumbing: feeds engine and scheduler from any stream of ticks.

use futures::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tracing::{error, info};

use super::engine::SyncEngine;
use super::scheduler::SyncScheduler;

pub type SharedEngine = Arc<Mutex<SyncEngine>>;

/// Periodic ticks from a tokio interval. Late ticks are delayed, not bunched.
pub fn interval_ticks(period: Duration) -> impl Stream<Item = ()> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    IntervalStream::new(interval).map(|_| ())
}

/// Runs until `ticks` ends or `shutdown` resolves.
///
/// Each tick drains at most one queued unit, then lets the scheduler
/// evaluate. The engine lock is held for the whole tick.
pub async fn drive<S, F>(engine: SharedEngine, mut scheduler: SyncScheduler, ticks: S, shutdown: F) -> u64
where
    S: Stream<Item = ()>,
    F: Future<Output = ()>,
{
    tokio::pin!(ticks);
    tokio::pin!(shutdown);
    let mut count = 0u64;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Tick loop stopping after {} ticks", count);
                break;
            }
            tick = ticks.next() => {
                if tick.is_none() {
                    break;
                }
                count += 1;

                let mut engine = engine.lock().await;
                engine.tick().await;
                if let Err(e) = scheduler.tick(&mut engine).await {
                    error!("Scheduler evaluation failed: {}", e);
                }
            }
        }
    }

    count
}
