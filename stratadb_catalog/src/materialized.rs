//! Materialized view freshness tracking.
//!
//! Update-driven views count modifications of their underlying tables and
//! fall due every N-th notification. Interval-driven views are swept by a
//! background task comparing wall-clock age. A single advisory guard keeps
//! create, drop, and refresh maintenance from overlapping; contenders skip
//! instead of blocking.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::logical::TableDefinition;
use crate::time::Time;

/// When a materialized view falls due for a refresh.
#[serde_as]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriteriaType {
    /// Refresh after every `interval`-th modification of an underlying table.
    Update { interval: u64 },
    /// Refresh once the view is older than `period`.
    Interval {
        #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
        period: Duration,
    },
}

/// Refresh bookkeeping carried on a materialized view.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaterializedCriteria {
    pub criteria: CriteriaType,
    /// Modifications seen since the last refresh. Only meaningful for
    /// update-driven views.
    pub updated: u64,
    /// Nanosecond timestamp of the last refresh.
    pub last_update: i64,
}

impl MaterializedCriteria {
    pub fn new(criteria: CriteriaType, now: Time) -> Self {
        Self {
            criteria,
            updated: 0,
            last_update: now.timestamp_nanos(),
        }
    }

    /// Records one modification of an underlying table. Returns true when
    /// the view falls due, resetting the counter.
    pub(crate) fn record_update(&mut self) -> bool {
        match self.criteria {
            CriteriaType::Update { interval } => {
                if self.updated + 1 >= interval {
                    self.updated = 0;
                    true
                } else {
                    self.updated += 1;
                    false
                }
            }
            CriteriaType::Interval { .. } => false,
        }
    }

    pub(crate) fn record_refresh(&mut self, now: Time) {
        self.updated = 0;
        self.last_update = now.timestamp_nanos();
    }

    /// Whether the next recorded modification will make the view due.
    pub fn fires_on_next_update(&self) -> bool {
        match self.criteria {
            CriteriaType::Update { interval } => self.updated + 1 >= interval,
            CriteriaType::Interval { .. } => false,
        }
    }

    /// Whether an interval-driven view is older than its period.
    pub(crate) fn is_due(&self, now: Time) -> bool {
        match self.criteria {
            CriteriaType::Interval { period } => {
                let period_ns = i64::try_from(period.as_nanos()).unwrap_or(i64::MAX);
                now.timestamp_nanos().saturating_sub(self.last_update) > period_ns
            }
            CriteriaType::Update { .. } => false,
        }
    }
}

const IDLE: u8 = 0;

/// The maintenance operation a guard holder is performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GuardState {
    Creating = 1,
    Dropping = 2,
    Updating = 3,
}

/// Advisory guard serializing materialized view maintenance.
///
/// `try_begin` either takes the guard or reports the contender should skip;
/// nothing ever blocks on it.
#[derive(Debug, Default)]
pub struct MaterializedGuard {
    state: AtomicU8,
}

impl MaterializedGuard {
    pub fn try_begin(&self, next: GuardState) -> Option<GuardHold<'_>> {
        self.state
            .compare_exchange(IDLE, next as u8, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GuardHold { guard: self })
    }

    pub fn is_idle(&self) -> bool {
        self.state.load(Ordering::Acquire) == IDLE
    }
}

/// Releases the guard on drop.
#[derive(Debug)]
pub struct GuardHold<'a> {
    guard: &'a MaterializedGuard,
}

impl Drop for GuardHold<'_> {
    fn drop(&mut self) {
        self.guard.state.store(IDLE, Ordering::Release);
    }
}

/// Executes the actual recomputation of a materialized view. The catalog
/// only tracks freshness; query execution lives elsewhere.
#[async_trait]
pub trait RefreshHandler: Send + Sync + 'static {
    async fn refresh(&self, view: &TableDefinition) -> anyhow::Result<()>;
}

/// Spawns the interval sweep for time-driven materialized views.
///
/// Runs until the token is cancelled. Each tick refreshes every view whose
/// age exceeds its period, skipping the whole sweep when maintenance is
/// already in progress.
pub fn background_refresh_task(
    catalog: Arc<Catalog>,
    handler: Arc<dyn RefreshHandler>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(catalog.refresh_sweep_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    sweep_interval_views(&catalog, handler.as_ref()).await;
                }
            }
        }
    })
}

async fn sweep_interval_views(catalog: &Catalog, handler: &dyn RefreshHandler) {
    let now = catalog.time_provider().now();
    for view in catalog.interval_views_due(now) {
        let Some(_hold) = catalog.materialized_guard().try_begin(GuardState::Updating) else {
            debug!(
                view = %view.name,
                "materialized view maintenance in progress, skipping sweep"
            );
            return;
        };
        if let Err(error) = handler.refresh(&view).await {
            warn!(%error, view = %view.name, "materialized view refresh failed");
            continue;
        }
        if let Err(error) = catalog.update_materialized_time(view.id, now).await {
            warn!(
                %error,
                view = %view.name,
                "failed to record materialized view refresh time"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_driven_view_fires_every_third_notification() {
        let mut criteria =
            MaterializedCriteria::new(CriteriaType::Update { interval: 3 }, Time::from_timestamp_nanos(0));
        assert!(!criteria.record_update());
        assert_eq!(criteria.updated, 1);
        assert!(!criteria.record_update());
        assert_eq!(criteria.updated, 2);
        assert!(criteria.record_update());
        assert_eq!(criteria.updated, 0);
        // The cycle repeats after the reset.
        assert!(!criteria.record_update());
        assert!(!criteria.record_update());
        assert!(criteria.record_update());
    }

    #[test]
    fn interval_one_fires_every_time() {
        let mut criteria =
            MaterializedCriteria::new(CriteriaType::Update { interval: 1 }, Time::from_timestamp_nanos(0));
        assert!(criteria.record_update());
        assert!(criteria.record_update());
    }

    #[test]
    fn interval_driven_view_ignores_notifications() {
        let mut criteria = MaterializedCriteria::new(
            CriteriaType::Interval {
                period: Duration::from_secs(60),
            },
            Time::from_timestamp_nanos(0),
        );
        assert!(!criteria.record_update());
        assert_eq!(criteria.updated, 0);
    }

    #[test]
    fn interval_due_compares_against_period() {
        let start = Time::from_timestamp_nanos(0);
        let criteria = MaterializedCriteria::new(
            CriteriaType::Interval {
                period: Duration::from_secs(10),
            },
            start,
        );
        let within = start.checked_add(Duration::from_secs(5)).unwrap();
        let beyond = start.checked_add(Duration::from_secs(11)).unwrap();
        assert!(!criteria.is_due(within));
        assert!(criteria.is_due(beyond));
    }

    #[test]
    fn guard_admits_one_holder_at_a_time() {
        let guard = MaterializedGuard::default();
        let hold = guard.try_begin(GuardState::Creating);
        assert!(hold.is_some());
        assert!(guard.try_begin(GuardState::Updating).is_none());
        drop(hold);
        assert!(guard.is_idle());
        assert!(guard.try_begin(GuardState::Dropping).is_some());
    }
}
