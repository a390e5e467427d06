//! Background eviction of stale lockout records.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};

use crate::{
    Error,
    clock::{Clock, SystemClock},
    policy::Transition,
    repositories::LockoutRepository,
    storage::LockoutState,
};

/// Deletes records whose last attempt is older than the retention period.
///
/// A record inside an active lock window is never deleted, however old its
/// last attempt is.
pub struct CleanupSweeper<R: LockoutRepository> {
    name: String,
    repository: Arc<R>,
    retention_period: Duration,
    interval: std::time::Duration,
    clock: Arc<dyn Clock>,
}

impl<R: LockoutRepository> CleanupSweeper<R> {
    pub fn new(
        name: impl Into<String>,
        repository: Arc<R>,
        retention_period: Duration,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            name: name.into(),
            repository,
            retention_period,
            interval,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn retention_period(&self) -> Duration {
        self.retention_period
    }

    /// Run one sweep now.
    ///
    /// # Returns
    ///
    /// The number of records deleted.
    pub async fn sweep_once(&self) -> Result<u64, Error> {
        let now = self.clock.now();
        let cutoff = now
            .checked_sub_signed(self.retention_period)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut candidates = Vec::new();
        self.repository
            .for_each(&mut |state: &LockoutState| {
                if is_stale(state, cutoff, now) {
                    candidates.push(state.key.clone());
                }
            })
            .await?;

        let mut deleted = 0u64;
        for key in candidates {
            let mut removed = false;
            // Re-check under the per-key update; a concurrent failure may have refreshed it
            self.repository
                .update(&key, &mut |current: Option<&LockoutState>| {
                    removed = current.is_some_and(|state| is_stale(state, cutoff, now));
                    Ok(if removed {
                        Transition::Delete
                    } else {
                        Transition::Unchanged
                    })
                })
                .await?;
            if removed {
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    /// Spawn the periodic sweep task.
    ///
    /// The first sweep runs one full interval after start.
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown) = watch::channel(false);
        let period = self.interval;

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval_timer = tokio::time::interval_at(start, period);
            interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        match self.sweep_once().await {
                            Ok(count) if count > 0 => {
                                tracing::info!(
                                    limiter = %self.name,
                                    count = count,
                                    "Cleaned up stale lockout records"
                                );
                            }
                            Err(e) => {
                                tracing::warn!(
                                    limiter = %self.name,
                                    error = %e,
                                    "Failed to clean up lockout records"
                                );
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!(limiter = %self.name, "Shutting down lockout cleanup task");
                        break;
                    }
                }
            }
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

fn is_stale(state: &LockoutState, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    !state.is_locked_at(now) && state.last_attempt_at < cutoff
}

/// Owned handle to a running sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the task to stop and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Lockout cleanup task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
