//! Unread-message poller.
//!
//! Keeps an [`UnreadSummary`] fresh by fetching the unread-summary endpoint
//! immediately on activation and then on a fixed interval. At most one
//! fetch is in flight: starting a new one aborts the previous task, and
//! results carry a generation number so nothing older than the latest
//! fetch can overwrite state.
//!
//! A 401, 403 or 404 locks the poller out for the rest of its lifetime.
//! Any other failure is logged and the next tick proceeds as usual.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use arena_proto::model::{UnreadSummary, UserId};

use crate::api::{ApiError, ChatApi};
use crate::session::normalize_token;

/// Default polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(8000);

/// Poller start-up parameters.
#[derive(Debug, Clone)]
pub struct UnreadPollerConfig {
    /// Bearer token, normalized by the poller.
    pub token: Option<String>,
    /// Whether polling is enabled.
    pub enabled: bool,
    /// Delay between fetches.
    pub poll_interval: Duration,
}

impl Default for UnreadPollerConfig {
    fn default() -> Self {
        Self {
            token: None,
            enabled: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug)]
enum Command {
    Refresh,
    SetToken(Option<String>),
    SetEnabled(bool),
    Shutdown,
}

struct FetchDone {
    generation: u64,
    result: Result<UnreadSummary, ApiError>,
}

/// Handle to a running unread poller.
///
/// Dropping the handle stops the background task and aborts any in-flight
/// request.
pub struct UnreadPoller<A: ChatApi> {
    api: Arc<A>,
    token: Mutex<Option<String>>,
    commands: mpsc::UnboundedSender<Command>,
    summary: watch::Receiver<UnreadSummary>,
    locked_out: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl<A: ChatApi> UnreadPoller<A> {
    /// Starts polling. Must be called from within a tokio runtime.
    pub fn spawn(api: Arc<A>, config: UnreadPollerConfig) -> Self {
        let token = config.token.as_deref().and_then(normalize_token);
        let (summary_tx, summary_rx) = watch::channel(UnreadSummary::default());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let locked_out = Arc::new(AtomicBool::new(false));

        let mut poll = PollLoop {
            api: Arc::clone(&api),
            token: token.clone(),
            enabled: config.enabled,
            interval: config.poll_interval,
            summary: summary_tx,
            locked_out: Arc::clone(&locked_out),
            generation: 0,
            in_flight: None,
            ticker: None,
            results_tx,
        };
        poll.reset_ticker();
        let task = tokio::spawn(poll.run(cmd_rx, results_rx));

        Self {
            api,
            token: Mutex::new(token),
            commands: cmd_tx,
            summary: summary_rx,
            locked_out,
            task: Some(task),
        }
    }

    /// The latest summary (empty until the first successful fetch).
    #[must_use]
    pub fn summary(&self) -> UnreadSummary {
        self.summary.borrow().clone()
    }

    /// Total unread count from the latest summary.
    #[must_use]
    pub fn total_unread(&self) -> u64 {
        self.summary.borrow().total_unread
    }

    /// Subscribes to summary replacements.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<UnreadSummary> {
        self.summary.clone()
    }

    /// Whether a 401/403/404 has permanently stopped polling.
    #[must_use]
    pub fn is_locked_out(&self) -> bool {
        self.locked_out.load(Ordering::SeqCst)
    }

    /// Fetches now, aborting any fetch in flight.
    pub fn refresh(&self) {
        let _ = self.commands.send(Command::Refresh);
    }

    /// Replaces the token. A change of the normalized token restarts
    /// polling; an equivalent token is a no-op.
    pub fn set_token(&self, raw: Option<&str>) {
        let token = raw.and_then(normalize_token);
        {
            let mut current = self.token.lock();
            if *current == token {
                return;
            }
            current.clone_from(&token);
        }
        let _ = self.commands.send(Command::SetToken(token));
    }

    /// Enables or disables polling.
    pub fn set_enabled(&self, enabled: bool) {
        let _ = self.commands.send(Command::SetEnabled(enabled));
    }

    /// Marks every message from `sender` as read, then triggers one
    /// immediate refresh. Counts are never decremented locally.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NoSession`] without a token, or the backend
    /// error; no refresh is triggered on failure.
    pub async fn mark_read_from_sender(&self, sender: &UserId) -> Result<(), ApiError> {
        let token = self.token.lock().clone().ok_or(ApiError::NoSession)?;
        self.api.mark_read_from(&token, sender).await?;
        tracing::debug!(sender = %sender, "marked messages read, refreshing summary");
        self.refresh();
        Ok(())
    }

    /// Stops polling and waits for the background task to exit.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "unread poller task ended abnormally");
        }
    }
}

impl<A: ChatApi> Drop for UnreadPoller<A> {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct PollLoop<A: ChatApi> {
    api: Arc<A>,
    token: Option<String>,
    enabled: bool,
    interval: Duration,
    summary: watch::Sender<UnreadSummary>,
    locked_out: Arc<AtomicBool>,
    generation: u64,
    in_flight: Option<JoinHandle<()>>,
    ticker: Option<Interval>,
    results_tx: mpsc::UnboundedSender<FetchDone>,
}

impl<A: ChatApi> PollLoop<A> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut results: mpsc::UnboundedReceiver<FetchDone>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Refresh) => self.fetch(),
                    Some(Command::SetToken(token)) => {
                        if token != self.token {
                            tracing::debug!("unread poller token changed, restarting");
                            self.token = token;
                            self.cancel_in_flight();
                            self.reset_ticker();
                        }
                    }
                    Some(Command::SetEnabled(enabled)) => {
                        if enabled != self.enabled {
                            self.enabled = enabled;
                            self.cancel_in_flight();
                            self.reset_ticker();
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(done) = results.recv() => self.apply(done),
                () = next_tick(&mut self.ticker) => self.fetch(),
            }
        }
        self.cancel_in_flight();
        tracing::debug!("unread poller stopped");
    }

    fn is_active(&self) -> bool {
        self.enabled && self.token.is_some() && !self.locked_out.load(Ordering::SeqCst)
    }

    /// Starts a fresh interval whose first tick fires immediately, or
    /// clears it when polling is inactive.
    fn reset_ticker(&mut self) {
        self.ticker = self.is_active().then(|| {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
    }

    /// Aborts the in-flight fetch. Its result may already be queued, so the
    /// generation moves on as well.
    fn cancel_in_flight(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
            self.generation += 1;
        }
    }

    fn fetch(&mut self) {
        if !self.is_active() {
            tracing::trace!("unread poller inactive, skipping fetch");
            return;
        }
        let Some(token) = self.token.clone() else {
            return;
        };
        self.cancel_in_flight();
        self.generation += 1;

        let generation = self.generation;
        let api = Arc::clone(&self.api);
        let results = self.results_tx.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let result = api.unread_summary(&token).await;
            let _ = results.send(FetchDone { generation, result });
        }));
    }

    fn apply(&mut self, done: FetchDone) {
        if done.generation != self.generation {
            tracing::trace!(generation = done.generation, "discarding superseded summary");
            return;
        }
        self.in_flight = None;
        match done.result {
            Ok(summary) => {
                tracing::debug!(total = summary.total_unread, "unread summary updated");
                self.summary.send_replace(summary);
            }
            Err(e) if e.disables_unread_polling() => {
                tracing::info!(error = %e, "unread summary unavailable, polling stopped");
                self.locked_out.store(true, Ordering::SeqCst);
                self.ticker = None;
            }
            Err(e) => {
                tracing::debug!(error = %e, "unread summary fetch failed, will retry");
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
