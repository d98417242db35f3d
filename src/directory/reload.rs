//! Hot reload of the user/key directory
//!
//! The coordinator re-reads the whole directory on a jittered interval or
//! when poked through a `RefreshHandle`. Readers hold an
//! `Arc<DirectorySnapshot>` taken from a `watch` channel, so a swap never
//! exposes a half-built view.

use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex, Notify};
use tracing::{debug, info, warn};

use super::snapshot::{DirectoryEvent, DirectorySnapshot};
use crate::core::schedule::{JitteredInterval, JitteredTicker};
use crate::store::{DirectorySource, StoreResult};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Read side of the directory
#[derive(Clone)]
pub struct Directory {
    rx: watch::Receiver<Arc<DirectorySnapshot>>,
}

impl Directory {
    /// Current snapshot; stays valid even if a newer one is swapped in
    pub fn current(&self) -> Arc<DirectorySnapshot> {
        self.rx.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.rx.borrow().version
    }

    /// Receiver notified on every swap
    pub fn watch(&self) -> watch::Receiver<Arc<DirectorySnapshot>> {
        self.rx.clone()
    }
}

/// Out-of-band refresh trigger; repeated requests before the coordinator
/// wakes up collapse into one reload
#[derive(Clone)]
pub struct RefreshHandle {
    notify: Arc<Notify>,
}

impl RefreshHandle {
    pub fn request_refresh(&self) {
        self.notify.notify_one();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Unchanged,
    Swapped { version: u64, changes: usize },
}

pub struct HotReloadCoordinator {
    source: Arc<dyn DirectorySource>,
    snapshot_tx: watch::Sender<Arc<DirectorySnapshot>>,
    events_tx: broadcast::Sender<DirectoryEvent>,
    notify: Arc<Notify>,
    interval: JitteredInterval,
    refresh_lock: Mutex<()>,
}

impl HotReloadCoordinator {
    pub fn new(source: Arc<dyn DirectorySource>, interval: JitteredInterval) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(DirectorySnapshot::empty()));
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            source,
            snapshot_tx,
            events_tx,
            notify: Arc::new(Notify::new()),
            interval,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> Directory {
        Directory {
            rx: self.snapshot_tx.subscribe(),
        }
    }

    pub fn refresh_handle(&self) -> RefreshHandle {
        RefreshHandle {
            notify: self.notify.clone(),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.events_tx.subscribe()
    }

    /// Re-read the directory and swap the snapshot if anything changed.
    ///
    /// On error the previous snapshot stays in place.
    pub async fn refresh(&self) -> StoreResult<RefreshOutcome> {
        let _guard = self.refresh_lock.lock().await;

        let records = self.source.load_directory().await?;
        let current = self.snapshot_tx.borrow().clone();
        let next_version = current.version + 1;
        let next = DirectorySnapshot::from_records(next_version, records);

        let events = current.diff(&next);
        if events.is_empty() {
            debug!(version = current.version, "[RELOAD] Directory unchanged");
            return Ok(RefreshOutcome::Unchanged);
        }

        let users = next.len();
        self.snapshot_tx.send_replace(Arc::new(next));
        info!(
            version = next_version,
            users,
            changes = events.len(),
            "[RELOAD] Directory snapshot swapped"
        );

        let changes = events.len();
        for event in events {
            debug!(?event, "[RELOAD] Directory change");
            // No subscribers is fine
            let _ = self.events_tx.send(event);
        }

        Ok(RefreshOutcome::Swapped {
            version: next_version,
            changes,
        })
    }

    async fn refresh_logged(&self) {
        if let Err(e) = self.refresh().await {
            warn!(
                error = %e,
                version = self.snapshot_tx.borrow().version,
                "[RELOAD] Directory refresh failed, keeping last good snapshot"
            );
        }
    }

    /// Reload loop: jittered periodic refresh plus on-demand refreshes
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.base().as_secs(),
            "[RELOAD] Hot reload coordinator started"
        );
        let mut ticker = JitteredTicker::new(self.interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("[RELOAD] Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    self.refresh_logged().await;
                }
                _ = self.notify.notified() => {
                    debug!("[RELOAD] Refresh requested");
                    self.refresh_logged().await;
                }
            }
        }
    }
}
