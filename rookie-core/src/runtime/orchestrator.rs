use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, broadcast};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::catalog::CatalogQuery;
use crate::collab::{Collaborators, Credentials};
use crate::config::EngineConfig;
use crate::device::{DeviceSession, DeviceSnapshot, PollOutcome};
use crate::entry::{PackageEntry, content_id};
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::persist;
use crate::reconcile::reconcile;
use crate::runtime::storage::EngineState;
use crate::status::{Status, StatusSet};

/// Shortest period for the polling and autosave loops.
const MIN_TICK: Duration = Duration::from_millis(1);

pub(crate) struct Inner {
    pub(crate) config: EngineConfig,
    pub(crate) state: Mutex<EngineState>,
    pub(crate) events: EventBus,
    pub(crate) collaborators: Collaborators,
    pub(crate) device: DeviceSession,
}

/// Handle to the lifecycle engine.
///
/// Cheap to clone; all clones drive the same catalog, queue and device
/// session. Every method must be called from within a tokio runtime, since
/// queue draining and extraction run as spawned tasks.
///
/// # Usage
///
/// ```rust,ignore
/// let engine = Engine::start(EngineConfig::from_env(), collaborators).await?;
/// engine.refresh_catalog().await?;
/// engine.enqueue_download("Some Release v12").await?;
/// let mut events = engine.subscribe();
/// ```
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine with an empty catalog.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let events = EventBus::new(config.event_capacity);
        let device = DeviceSession::new(Arc::clone(&collaborators.device));
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(EngineState::new(events.clone())),
                config,
                events,
                collaborators,
                device,
            }),
        }
    }

    /// Build an engine and restore the persisted state, resuming any queued
    /// downloads.
    pub async fn start(
        config: EngineConfig,
        collaborators: Collaborators,
    ) -> Result<Self, EngineError> {
        let engine = Self::new(config, collaborators);
        engine.restore().await?;
        engine.resume_downloads().await;
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn device(&self) -> &DeviceSession {
        &self.inner.device
    }

    pub(crate) async fn state(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().await
    }

    // ── Catalog ──────────────────────────────────────────────────────────────

    /// Load the state file into the catalog.
    ///
    /// Entries persisted as `Queued` go back on the download queue without
    /// starting it; `Local` entries join the local list.
    pub async fn restore(&self) -> Result<usize, EngineError> {
        let path = self.inner.config.state_file.clone();
        let records = tokio::task::spawn_blocking(move || persist::load(&path))
            .await
            .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;
        let count = records.len();

        let mut state = self.state().await;
        for (entry, status) in records {
            let release_name = entry.release_name.clone();
            state.catalog.track(entry, status);
            if status == Status::Queued {
                state.queue.push_back(&release_name);
            } else if StatusSet::LOCAL_LIST.contains(status) {
                state.local.push_back(release_name);
            }
        }
        state.saved_revision = state.catalog.revision();

        info!(entries = count, queued = state.queue.len(), "restored catalog state");
        drop(state);

        self.inner.events.publish(EngineEvent::CatalogChanged);
        Ok(count)
    }

    /// Start draining the download queue if anything is queued.
    ///
    /// Returns whether a queued entry was found.
    pub async fn resume_downloads(&self) -> bool {
        let mut state = self.state().await;
        if state.queue.first_queued(&state.catalog).is_none() {
            return false;
        }
        self.kick_drain(&mut state);
        true
    }

    /// Fetch the remote catalog and merge it.
    ///
    /// On failure the current catalog is kept. Returns the number of newly
    /// added entries.
    pub async fn refresh_catalog(&self) -> Result<usize, EngineError> {
        let source = Arc::clone(&self.inner.collaborators.catalog);
        let credentials = source.credentials().await.inspect_err(|e| {
            warn!(error = %e, "failed to fetch catalog credentials");
        })?;
        let lines = source.fetch_entries(&credentials).await.inspect_err(|e| {
            warn!(error = %e, "failed to fetch catalog");
        })?;

        let total = lines.len();
        let fresh: Vec<PackageEntry> = lines
            .iter()
            .filter_map(|line| {
                let parsed = PackageEntry::parse_record(line);
                if parsed.is_none() {
                    debug!(line = %line, "skipping malformed catalog record");
                }
                parsed
            })
            .collect();
        if fresh.len() < total {
            warn!(skipped = total - fresh.len(), "skipped malformed catalog records");
        }

        let mut state = self.state().await;
        state.credentials = Some(credentials);
        let added = state.catalog.refresh(fresh)?;
        let snapshot = self.inner.device.snapshot();
        if let Some(apps) = snapshot.installed_apps() {
            reconcile(&mut state.catalog, Some(apps));
        }
        Ok(added)
    }

    /// Cached credentials, fetched from the catalog source on first use.
    pub(crate) async fn credentials(&self) -> Result<Credentials, EngineError> {
        if let Some(credentials) = self.state().await.credentials.clone() {
            return Ok(credentials);
        }
        let credentials = self.inner.collaborators.catalog.credentials().await?;
        self.state().await.credentials = Some(credentials.clone());
        Ok(credentials)
    }

    pub async fn query(&self, query: &CatalogQuery) -> Vec<(PackageEntry, Status)> {
        self.state().await.catalog.query(query)
    }

    /// Current status; `Unknown` for untracked release names.
    pub async fn status(&self, release_name: &str) -> Status {
        self.state().await.catalog.status(release_name)
    }

    pub async fn entry(&self, release_name: &str) -> Option<PackageEntry> {
        self.state().await.catalog.entry(release_name).cloned()
    }

    /// Entries on the download queue, in FIFO order.
    pub async fn download_list(&self) -> Vec<(PackageEntry, Status)> {
        let state = self.state().await;
        state
            .queue
            .iter()
            .filter_map(|r| {
                state
                    .catalog
                    .entry(r)
                    .map(|e| (e.clone(), state.catalog.status(r)))
            })
            .collect()
    }

    /// Extracted entries, most recent first.
    pub async fn local_list(&self) -> Vec<(PackageEntry, Status)> {
        let state = self.state().await;
        state
            .local
            .iter()
            .filter_map(|r| {
                state
                    .catalog
                    .entry(r)
                    .map(|e| (e.clone(), state.catalog.status(r)))
            })
            .collect()
    }

    /// The entry currently being downloaded.
    pub async fn downloading(&self) -> Option<PackageEntry> {
        let state = self.state().await;
        state
            .queue
            .downloading(&state.catalog)
            .and_then(|r| state.catalog.entry(r))
            .cloned()
    }

    /// Library directory an entry extracts into.
    pub fn local_path(&self, release_name: &str) -> PathBuf {
        self.inner.config.library_dir.join(release_name)
    }

    /// Cache directory holding an entry's downloaded archive parts.
    pub fn cache_path(&self, release_name: &str) -> PathBuf {
        self.inner.config.cache_dir.join(content_id(release_name))
    }

    /// First volume of an entry's downloaded archive.
    pub fn archive_path(&self, release_name: &str) -> PathBuf {
        let id = content_id(release_name);
        self.inner
            .config
            .cache_dir
            .join(&id)
            .join(format!("{id}.7z.001"))
    }

    // ── Queue ────────────────────────────────────────────────────────────────

    /// Queue an entry for download.
    ///
    /// Only `Downloadable`, `UpdatableRemotely`, `DownloadError` and
    /// `DecompressionError` entries are accepted. Re-queueing after a failed
    /// extraction discards the cached archive first.
    pub async fn enqueue_download(&self, release_name: &str) -> Result<(), EngineError> {
        let mut state = self.state().await;
        if !state.catalog.contains(release_name) {
            return Err(EngineError::UnknownEntry(release_name.to_owned()));
        }
        let status = state.catalog.status(release_name);
        if !status.is_queueable() {
            debug!(release_name, %status, "rejecting enqueue");
            return Err(EngineError::NotQueueable {
                release_name: release_name.to_owned(),
                status,
            });
        }

        if status == Status::DecompressionError {
            // The archive is most likely corrupt; start over.
            purge_dir(&self.cache_path(release_name)).await?;
        }

        state.catalog.set_status(release_name, Status::Queued);
        state.queue.push_back(release_name);
        info!(release_name, "queued for download");

        self.kick_drain(&mut state);
        Ok(())
    }

    /// Cancel a queued or running download.
    ///
    /// A running transfer is only asked to stop; the entry is `Downloadable`
    /// again immediately. Returns `false` when the entry was neither queued
    /// nor downloading.
    pub async fn cancel_download(&self, release_name: &str) -> bool {
        let mut state = self.state().await;
        match state.catalog.status(release_name) {
            Status::Downloading => {
                state.abort_active(release_name);
                info!(release_name, "download cancelled");
            }
            Status::Queued => {
                info!(release_name, "removed from download queue");
            }
            _ => return false,
        }
        state.catalog.set_status(release_name, Status::Downloadable);
        state.queue.remove(release_name);
        true
    }

    /// Delete an entry's downloaded archive parts.
    pub async fn clean_cache(&self, release_name: &str) -> Result<bool, EngineError> {
        let path = self.cache_path(release_name);
        let removed = purge_dir(&path).await?;
        if removed {
            debug!(release_name, path = %path.display(), "cache cleaned");
        }
        Ok(removed)
    }

    /// Delete an entry's extracted files and mark it `Downloadable` again.
    ///
    /// Entries on the download list or being installed are rejected with
    /// [`EngineError::Busy`]. Returns whether a library directory was removed.
    pub async fn remove_local_copy(&self, release_name: &str) -> Result<bool, EngineError> {
        {
            let mut state = self.state().await;
            if !state.catalog.contains(release_name) {
                return Err(EngineError::UnknownEntry(release_name.to_owned()));
            }
            let status = state.catalog.status(release_name);
            if StatusSet::DOWNLOAD_LIST.contains(status) || status == Status::Installing {
                return Err(EngineError::Busy {
                    release_name: release_name.to_owned(),
                    status,
                });
            }
            state.catalog.set_status(release_name, Status::Downloadable);
            state.remove_local(release_name);
        }

        let path = self.local_path(release_name);
        let removed = purge_dir(&path).await?;
        info!(release_name, removed, "local copy removed");

        let snapshot = self.inner.device.snapshot();
        if let Some(apps) = snapshot.installed_apps() {
            reconcile(&mut self.state().await.catalog, Some(apps));
        }
        Ok(removed)
    }

    // ── Device ───────────────────────────────────────────────────────────────

    /// Poll the device once and reconcile if anything changed.
    ///
    /// Returns whether the snapshot changed.
    pub async fn poll_device(&self) -> bool {
        match self.inner.device.poll().await {
            PollOutcome::Unchanged => false,
            PollOutcome::Changed {
                snapshot,
                connection_changed,
            } => {
                self.apply_snapshot(&snapshot, connection_changed).await;
                true
            }
        }
    }

    /// Re-read the installed apps and reconcile unconditionally.
    pub async fn reconcile_device(&self) -> usize {
        let (snapshot, connection_changed) = self.inner.device.refresh().await;
        self.apply_snapshot(&snapshot, connection_changed).await
    }

    async fn apply_snapshot(&self, snapshot: &DeviceSnapshot, connection_changed: bool) -> usize {
        let changed = reconcile(&mut self.state().await.catalog, snapshot.installed_apps());
        if connection_changed {
            self.inner.events.publish(EngineEvent::DeviceChanged {
                connected: snapshot.connected,
                properties: snapshot.properties.clone(),
            });
        }
        changed
    }

    /// Poll the device every `poll_interval` until the handle is aborted.
    pub fn spawn_device_polling(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.inner.config.poll_interval.max(MIN_TICK));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.poll_device().await;
            }
        })
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    /// Write the status map to the state file.
    pub async fn save_state(&self) -> Result<(), EngineError> {
        let (records, revision) = {
            let state = self.state().await;
            (persist::snapshot(&state.catalog), state.catalog.revision())
        };
        let path = self.inner.config.state_file.clone();
        tokio::task::spawn_blocking(move || persist::save(&path, &records))
            .await
            .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;
        self.state().await.saved_revision = revision;
        Ok(())
    }

    /// Save every `period` when the catalog changed since the last save.
    pub fn spawn_autosave(&self, period: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(MIN_TICK));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !engine.state().await.is_dirty() {
                    continue;
                }
                if let Err(e) = engine.save_state().await {
                    warn!(error = %e, "autosave failed");
                }
            }
        })
    }

    /// Persist state before the process exits.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let mut state = self.state().await;
        if let Some(active) = state.active.take() {
            let _ = active.cancel_tx.send(true);
        }
        drop(state);
        self.save_state().await
    }
}

/// Remove a directory tree; a missing directory is not an error.
async fn purge_dir(path: &std::path::Path) -> Result<bool, EngineError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
