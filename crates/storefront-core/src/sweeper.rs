//! Expiry sweeping for stale checkouts.
//!
//! The `ExpirySweeper` runs as a background task next to the HTTP server. It
//! only touches checkout storage: idle active checkouts are retired, and
//! retired ones are deleted once the retention window has passed.

use crate::checkout::CheckoutStatus;
use crate::clock::Clock;
use crate::error::ShopResult;
use crate::store::SharedStore;
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often a pass runs
    pub interval: std::time::Duration,
    /// Minimum inactivity before an expired checkout is retired
    pub abandon_after: Duration,
    /// How long retired checkouts are kept
    pub retention: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(15 * 60),
            abandon_after: Duration::hours(1),
            retention: Duration::days(7),
        }
    }
}

/// Shortest interval the background task runs at
pub const MIN_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

impl SweeperConfig {
    /// Configured interval, never below [`MIN_SWEEP_INTERVAL`]
    pub fn tick_interval(&self) -> std::time::Duration {
        self.interval.max(MIN_SWEEP_INTERVAL)
    }
}

/// Counts from one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub abandoned: usize,
    pub expired: usize,
    pub deleted: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.abandoned == 0 && self.expired == 0 && self.deleted == 0
    }
}

pub struct ExpirySweeper {
    store: SharedStore,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>, config: SweeperConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Spawn the sweeper as a background task.
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.tick_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if let Err(e) = self.run_once(false).await {
                    warn!(error = %e, "Checkout sweep failed");
                }
            }
        })
    }

    /// Run a single pass. `force` skips every age check and deletes all
    /// non-active checkouts.
    pub async fn run_once(&self, force: bool) -> ShopResult<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        if !force {
            let idle_since = now - self.config.abandon_after;
            for checkout in self
                .store
                .list_checkouts_by_status(&[CheckoutStatus::Active])
                .await?
            {
                if checkout.expires_at >= now || checkout.last_activity_at >= idle_since {
                    continue;
                }
                let to = if checkout.is_empty() {
                    CheckoutStatus::Expired
                } else {
                    CheckoutStatus::Abandoned
                };
                // Loses cleanly against a conversion that got there first
                if self
                    .store
                    .transition_checkout(checkout.id, CheckoutStatus::Active, to)
                    .await?
                {
                    match to {
                        CheckoutStatus::Expired => report.expired += 1,
                        _ => report.abandoned += 1,
                    }
                }
            }
        }

        let cutoff = now - self.config.retention;
        for checkout in self
            .store
            .list_checkouts_by_status(&[CheckoutStatus::Abandoned, CheckoutStatus::Expired])
            .await?
        {
            if (force || checkout.last_activity_at < cutoff)
                && self.store.delete_checkout(checkout.id).await?
            {
                report.deleted += 1;
            }
        }

        if !report.is_empty() {
            info!(
                abandoned = report.abandoned,
                expired = report.expired,
                deleted = report.deleted,
                force,
                "Checkout sweep finished"
            );
        }
        Ok(report)
    }
}
