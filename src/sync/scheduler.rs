use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::engine::SyncEngine;
use super::GroupingMode;
use crate::error::Result;

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 10;

/// What one scheduler evaluation triggered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    pub evaluated: bool,
    pub global_triggered: bool,
    pub groups_triggered: Vec<(String, GroupingMode)>,
    /// Due but held back because a batch was still queued. Not stamped.
    pub global_deferred: bool,
    pub groups_deferred: Vec<(String, GroupingMode)>,
}

/// Interval-based trigger for unattended syncs.
///
/// Called on every host tick but evaluates schedules at most once per
/// `check_interval`, measured on the engine's clock. A due schedule never
/// replaces queued work: it waits, unstamped, until the queue drains.
#[derive(Debug)]
pub struct SyncScheduler {
    check_interval: Duration,
    last_check: Option<DateTime<Utc>>,
}

impl SyncScheduler {
    pub fn new(check_interval: std::time::Duration) -> Self {
        let check_interval = Duration::from_std(check_interval)
            .unwrap_or_else(|_| Duration::seconds(DEFAULT_CHECK_INTERVAL_SECS as i64));
        Self {
            check_interval,
            last_check: None,
        }
    }

    pub async fn tick(&mut self, engine: &mut SyncEngine) -> Result<SchedulerReport> {
        let now = engine.now();
        if let Some(last) = self.last_check {
            if now - last < self.check_interval {
                return Ok(SchedulerReport::default());
            }
        }
        self.last_check = Some(now);

        let mut report = SchedulerReport {
            evaluated: true,
            ..SchedulerReport::default()
        };
        let state = engine.snapshot().await?;

        let auto = &state.auto_sync;
        let global_due = auto.enabled && is_due(auto.last_synced_at, auto.interval_minutes, now);
        if global_due && is_busy(engine) {
            debug!("Auto-sync due but queue busy, deferring");
            report.global_deferred = true;
        } else if global_due {
            info!(
                "Auto-sync due ({} since last sync)",
                describe_elapsed(auto.last_synced_at, now)
            );
            if let Err(e) = engine.sync_all(false, true, None).await {
                warn!("Scheduled sync failed: {}", e);
            }
            engine.mark_auto_synced(now).await?;
            report.global_triggered = true;
        }

        for schedule in state.group_schedules.iter().filter(|s| s.enabled) {
            if !is_due(schedule.last_synced_at, schedule.interval_minutes, now) {
                continue;
            }
            if is_busy(engine) {
                debug!("Group {} due but queue busy, deferring", schedule.group_key);
                report
                    .groups_deferred
                    .push((schedule.group_key.clone(), schedule.mode));
                continue;
            }

            info!(
                "Group {} ({:?}) due ({} since last sync)",
                schedule.group_key,
                schedule.mode,
                describe_elapsed(schedule.last_synced_at, now)
            );
            if let Err(e) = engine
                .sync_group(&schedule.group_key, schedule.mode, false, true)
                .await
            {
                warn!("Scheduled sync of group {} failed: {}", schedule.group_key, e);
            }
            engine.mark_group_synced(&schedule.group_key, schedule.mode, now).await?;
            report
                .groups_triggered
                .push((schedule.group_key.clone(), schedule.mode));
        }

        debug!(
            "Scheduler evaluated: global={}, groups={}",
            report.global_triggered,
            report.groups_triggered.len()
        );
        Ok(report)
    }
}

impl Default for SyncScheduler {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS))
    }
}

fn is_busy(engine: &SyncEngine) -> bool {
    engine.queue_status().queued > 0
}

/// Never-synced schedules are always due.
pub fn is_due(last_synced_at: Option<DateTime<Utc>>, interval_minutes: u32, now: DateTime<Utc>) -> bool {
    match last_synced_at {
        None => true,
        Some(last) => now - last >= Duration::minutes(interval_minutes as i64),
    }
}

fn describe_elapsed(last_synced_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match last_synced_at.and_then(|last| (now - last).to_std().ok()) {
        Some(elapsed) => humantime::format_duration(std::time::Duration::from_secs(elapsed.as_secs())).to_string(),
        None => "never".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_is_due_threshold() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert!(is_due(None, 60, base));
        assert!(!is_due(Some(base), 60, base + Duration::minutes(59)));
        assert!(is_due(Some(base), 60, base + Duration::minutes(60)));
    }

    #[test]
    fn test_describe_elapsed() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(describe_elapsed(None, base), "never");
        assert_eq!(describe_elapsed(Some(base), base + Duration::minutes(90)), "1h 30m");
    }
}
