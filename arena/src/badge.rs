//! Pending-request badge for moderators.
//!
//! Fetches the pending moderation count immediately and then on a fixed
//! interval. Runs only when the signed-in user holds a moderator-capable
//! role; failures are ignored and the last known count is kept.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::ChatApi;
use crate::session::SessionStore;

/// Default refresh interval.
pub const DEFAULT_BADGE_INTERVAL: Duration = Duration::from_secs(30);

/// Handle to the badge poller. Dropping it stops the task.
pub struct PendingBadgePoller {
    count: watch::Receiver<u64>,
    task: Option<JoinHandle<()>>,
}

impl PendingBadgePoller {
    /// Starts polling if the current user is a moderator. Otherwise the
    /// returned handle reports a count of 0 and no task runs.
    pub fn spawn<A: ChatApi>(api: Arc<A>, session: SessionStore, interval: Duration) -> Self {
        let (tx, count) = watch::channel(0);
        let is_moderator = session
            .current()
            .is_some_and(|s| s.user.role.is_moderator());
        if !is_moderator {
            tracing::debug!("not a moderator, pending badge disabled");
            return Self { count, task: None };
        }

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(token) = session.token() else {
                    tracing::debug!("signed out, pending badge stopping");
                    break;
                };
                match api.pending_request_count(&token).await {
                    Ok(pending) => {
                        tx.send_if_modified(|current| {
                            let changed = *current != pending;
                            *current = pending;
                            changed
                        });
                    }
                    Err(e) => tracing::debug!(error = %e, "pending count fetch failed"),
                }
            }
        });
        Self {
            count,
            task: Some(task),
        }
    }

    /// Whether a polling task was started.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Last fetched count.
    #[must_use]
    pub fn count(&self) -> u64 {
        *self.count.borrow()
    }

    /// Subscribes to count changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.count.clone()
    }

    /// Stops polling.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PendingBadgePoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
