//! Long-running sync daemon.
//!
//! Each repository gets its own [`RepoWatch`] context driven by a single
//! `select!` loop over four sources:
//! - the poll timer, which syncs from the git HEAD diff
//! - filesystem events, accumulated into a pending set
//! - the debounce deadline, which flushes the pending set
//! - completion of the in-flight sync
//!
//! At most one sync runs per repository. Triggers that arrive while one is
//! running are merged into the pending set (events) or a poll-requested flag
//! (ticks) and serviced when it finishes.

mod backoff;
mod events;

pub use backoff::{compute_backoff_delay, DEFAULT_MAX_BACKOFF_MS};
pub use events::event_paths;

use anyhow::Result;
use futures_util::future::join_all;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::workspace::{PollOutcome, RepoSync};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_DEBOUNCE_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub max_backoff: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

type EventReceiver = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// Work handed to a spawned sync task.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SyncJob {
    Poll,
    Files(Vec<String>),
}

/// How a finished sync affects backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RunStatus {
    Succeeded,
    /// `retry` holds event paths that did not sync and go back into the
    /// pending set.
    Failed { retry: Vec<String> },
    /// git could not answer; the tick was skipped.
    Skipped,
}

/// Per-repository daemon state.
pub struct RepoWatch {
    sync: RepoSync,
    settings: WatchSettings,
    state_file: PathBuf,
    pending: HashSet<String>,
    debounce_at: Option<Instant>,
    next_poll: Instant,
    in_flight: Option<JoinHandle<RunStatus>>,
    poll_requested: bool,
    consecutive_failures: u32,
    watcher: Option<RecommendedWatcher>,
}

impl RepoWatch {
    pub fn new(sync: RepoSync, settings: WatchSettings, state_file: PathBuf) -> Self {
        Self {
            sync,
            settings,
            state_file,
            pending: HashSet::new(),
            debounce_at: None,
            next_poll: Instant::now(),
            in_flight: None,
            poll_requested: false,
            consecutive_failures: 0,
            watcher: None,
        }
    }

    /// Keep `watcher` alive until this repository shuts down.
    pub fn with_watcher(mut self, watcher: RecommendedWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    fn name(&self) -> &str {
        &self.sync.repo_name
    }

    fn is_syncing(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Delay until the next poll, stretched by backoff after failures.
    fn poll_delay(&self) -> Duration {
        let base = self.settings.poll_interval.as_millis() as u64;
        let backoff = compute_backoff_delay(
            self.consecutive_failures,
            base,
            self.settings.max_backoff.as_millis() as u64,
        );
        Duration::from_millis(base.max(backoff))
    }

    fn start(&mut self, job: SyncJob) {
        let sync = self.sync.clone();
        self.in_flight = Some(tokio::spawn(run_job(sync, job)));
    }

    fn on_poll_tick(&mut self) {
        self.next_poll = Instant::now() + self.poll_delay();
        if self.is_syncing() {
            debug!("{}: sync in progress, deferring poll", self.name());
            self.poll_requested = true;
            return;
        }
        self.start(SyncJob::Poll);
    }

    fn on_event(&mut self, event: notify::Result<Event>) {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!("{}: watcher error: {}", self.name(), e);
                return;
            }
        };

        let paths = event_paths(&self.sync.config, &self.state_file, &event);
        if paths.is_empty() {
            return;
        }
        self.pending.extend(paths);
        self.debounce_at = Some(Instant::now() + self.settings.debounce);
    }

    fn on_debounce(&mut self) {
        self.debounce_at = None;
        // Completion of the running sync re-arms the flush.
        if self.is_syncing() || self.pending.is_empty() {
            return;
        }

        let mut paths: Vec<String> = self.pending.drain().collect();
        paths.sort();
        info!("{}: flushing {} changed files", self.name(), paths.len());
        self.start(SyncJob::Files(paths));
    }

    fn on_finished(&mut self, joined: Result<RunStatus, JoinError>) {
        self.in_flight = None;

        let status = joined.unwrap_or_else(|e| {
            error!("Sync task panicked: {}", e);
            RunStatus::Failed { retry: Vec::new() }
        });
        let mut flush_at = Instant::now();
        match status {
            RunStatus::Succeeded => self.consecutive_failures = 0,
            RunStatus::Failed { retry } => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                let retry_at = Instant::now() + self.poll_delay();
                self.next_poll = self.next_poll.max(retry_at);
                warn!(
                    "{}: {} consecutive failures, next poll in {:?}",
                    self.name(),
                    self.consecutive_failures,
                    self.poll_delay()
                );
                if !retry.is_empty() {
                    debug!("{}: re-queueing {} failed files", self.name(), retry.len());
                    self.pending.extend(retry);
                    flush_at = retry_at;
                }
            }
            RunStatus::Skipped => {}
        }

        if !self.pending.is_empty() {
            self.debounce_at = Some(flush_at);
        } else if self.poll_requested {
            self.poll_requested = false;
            self.start(SyncJob::Poll);
        }
    }

    /// Drive this repository until `cancel` fires.
    ///
    /// On cancellation pending events are discarded, not flushed, and a sync
    /// already running is awaited before returning.
    pub async fn run(mut self, mut events: EventReceiver, cancel: CancellationToken) {
        let mut events_open = true;

        loop {
            let next_poll = self.next_poll;
            let debounce_at = self.debounce_at;
            let syncing = self.is_syncing();

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep_until(next_poll) => self.on_poll_tick(),
                event = events.recv(), if events_open => match event {
                    Some(event) => self.on_event(event),
                    None => events_open = false,
                },
                _ = time::sleep_until(debounce_at.unwrap_or(next_poll)), if debounce_at.is_some() => {
                    self.on_debounce()
                }
                joined = wait_in_flight(&mut self.in_flight), if syncing => self.on_finished(joined),
            }
        }

        self.pending.clear();
        self.debounce_at = None;
        self.watcher = None;
        drop(events);
        if let Some(handle) = self.in_flight.take() {
            info!("{}: waiting for in-flight sync", self.name());
            if let Err(e) = handle.await {
                error!("Sync task panicked: {}", e);
            }
        }
        debug!("{}: stopped", self.name());
    }
}

async fn wait_in_flight(slot: &mut Option<JoinHandle<RunStatus>>) -> Result<RunStatus, JoinError> {
    match slot {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn run_job(sync: RepoSync, job: SyncJob) -> RunStatus {
    let name = sync.repo_name.clone();
    match job {
        SyncJob::Poll => match sync.sync_from_head().await {
            Ok(PollOutcome::Synced(report)) if report.is_success() => RunStatus::Succeeded,
            // The cursor did not move, so the next poll retries these.
            Ok(PollOutcome::Synced(_)) => RunStatus::Failed { retry: Vec::new() },
            Ok(PollOutcome::HeadUnavailable) => {
                debug!("{}: git HEAD unavailable, skipping tick", name);
                RunStatus::Skipped
            }
            Ok(PollOutcome::DiffUnavailable { from }) => {
                warn!("{}: cannot diff from {}, skipping tick", name, from);
                RunStatus::Skipped
            }
            Ok(PollOutcome::UpToDate { .. }) | Ok(PollOutcome::CursorAdvanced { .. }) => {
                RunStatus::Succeeded
            }
            Err(e) => {
                error!("{}: poll sync failed: {:#}", name, e);
                RunStatus::Failed { retry: Vec::new() }
            }
        },
        SyncJob::Files(paths) => match sync.sync_files(paths.clone()).await {
            Ok(report) if report.is_success() => RunStatus::Succeeded,
            Ok(report) => RunStatus::Failed {
                retry: report.failed_files,
            },
            Err(e) => {
                error!("{}: event sync failed: {:#}", name, e);
                RunStatus::Failed { retry: paths }
            }
        },
    }
}

/// Start a recursive watcher on `root`, forwarding raw events into `tx`.
fn start_watcher(
    root: &Path,
    tx: mpsc::UnboundedSender<notify::Result<Event>>,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |result| {
            let _ = tx.send(result);
        },
        NotifyConfig::default(),
    )?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// Watch every repository until `cancel` fires.
///
/// Repositories run independently. A repository whose watcher cannot start
/// falls back to polling only.
pub async fn run_watch(
    repos: Vec<RepoSync>,
    settings: WatchSettings,
    state_file: PathBuf,
    cancel: CancellationToken,
) -> Result<()> {
    let mut tasks = Vec::with_capacity(repos.len());

    for sync in repos {
        let (tx, rx) = mpsc::unbounded_channel();
        let root = sync.config.effective_root();
        let name = sync.repo_name.clone();
        let mut watch = RepoWatch::new(sync, settings, state_file.clone());

        match start_watcher(&root, tx) {
            Ok(watcher) => {
                info!("{}: watching {}", name, root.display());
                watch = watch.with_watcher(watcher);
            }
            Err(e) => warn!(
                "{}: filesystem watcher failed to start ({}), polling only",
                name, e
            ),
        }

        tasks.push(watch.run(rx, cancel.clone()));
    }

    join_all(tasks).await;
    info!("Watch stopped");
    Ok(())
}
