use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::collab::{FetchRequest, ProgressFn};
use crate::entry::content_id;
use crate::error::EngineError;
use crate::runtime::orchestrator::Engine;
use crate::runtime::storage::{ActiveDownload, EngineState};
use crate::status::Status;

impl Engine {
    /// Start the drain loop unless one is already running.
    pub(crate) fn kick_drain(&self, state: &mut EngineState) {
        if state.draining {
            return;
        }
        state.draining = true;
        let engine = self.clone();
        tokio::spawn(async move { engine.drain_queue().await });
    }

    /// Download queued entries one at a time until none is left.
    async fn drain_queue(&self) {
        debug!("drain loop started");
        loop {
            let (release_name, cancel_rx) = {
                let mut state = self.state().await;
                let Some(next) = state.queue.first_queued(&state.catalog).map(str::to_owned)
                else {
                    state.draining = false;
                    debug!("download queue drained");
                    return;
                };
                let (cancel_tx, cancel_rx) = watch::channel(false);
                state.catalog.set_status(&next, Status::Downloading);
                state.active = Some(ActiveDownload {
                    release_name: next.clone(),
                    cancel_tx,
                });
                (next, cancel_rx)
            };

            let result = self.fetch_entry(&release_name, cancel_rx).await;

            let mut state = self.state().await;
            state.clear_active(&release_name);
            if state.catalog.status(&release_name) != Status::Downloading {
                debug!(release_name, "ignoring result of cancelled download");
                continue;
            }
            match result {
                Ok(()) => {
                    info!(release_name, "download finished");
                    self.begin_decompress(&mut state, &release_name);
                }
                Err(e) => {
                    error!(release_name, error = %e, "download failed");
                    state.catalog.set_status(&release_name, Status::DownloadError);
                }
            }
        }
    }

    async fn fetch_entry(
        &self,
        release_name: &str,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        let credentials = self.credentials().await?;
        let request = FetchRequest {
            base_url: credentials.base_url,
            content_id: content_id(release_name),
            dest_dir: self.cache_path(release_name),
        };
        info!(release_name, content_id = %request.content_id, "downloading");

        let events = self.inner.events.clone();
        let name = release_name.to_owned();
        let progress: ProgressFn = Arc::new(move |received, total| {
            if total > 0 {
                events.download_progress(&name, received as f64 / total as f64);
            }
        });

        let fetcher = Arc::clone(&self.inner.collaborators.fetcher);
        fetcher.fetch(request, progress, cancel).await
    }

    /// Mark a downloaded entry `Decompressing` and extract it in the
    /// background. No-op when it is already decompressing.
    fn begin_decompress(&self, state: &mut EngineState, release_name: &str) -> bool {
        if state.catalog.status(release_name) == Status::Decompressing {
            debug!(release_name, "already decompressing");
            return false;
        }
        if !state.catalog.set_status(release_name, Status::Decompressing) {
            return false;
        }
        let engine = self.clone();
        let name = release_name.to_owned();
        tokio::spawn(async move { engine.run_extraction(&name).await });
        true
    }

    /// Extract an entry's cached archive into the library.
    ///
    /// Returns `false` without doing anything when the entry is untracked or
    /// already being extracted. Completion is observable through status
    /// events.
    pub async fn decompress(&self, release_name: &str) -> bool {
        let mut state = self.state().await;
        self.begin_decompress(&mut state, release_name)
    }

    async fn run_extraction(&self, release_name: &str) {
        let passphrase = match self.credentials().await {
            Ok(c) => c.passphrase,
            Err(e) => {
                warn!(release_name, error = %e, "no archive passphrase available");
                String::new()
            }
        };
        let archive = self.archive_path(release_name);
        let dest = &self.inner.config.library_dir;
        info!(release_name, archive = %archive.display(), "extracting");

        let archiver = Arc::clone(&self.inner.collaborators.archiver);
        let result = archiver.extract(&archive, dest, &passphrase).await;

        if let Err(e) = result {
            error!(release_name, error = %e, "extraction failed");
            let mut state = self.state().await;
            if state.catalog.status(release_name) == Status::Decompressing {
                state
                    .catalog
                    .set_status(release_name, Status::DecompressionError);
            } else {
                debug!(release_name, "entry changed during extraction");
            }
            return;
        }

        let connected = self.inner.device.is_connected().await;
        {
            let mut state = self.state().await;
            if state.catalog.status(release_name) != Status::Decompressing {
                debug!(release_name, "entry changed during extraction");
                return;
            }
            state.queue.remove(release_name);
            state.push_local_front(release_name);
            let next = if connected {
                Status::Installable
            } else {
                Status::Local
            };
            state.catalog.set_status(release_name, next);
        }
        info!(release_name, "extracted");

        if self.inner.config.auto_clean_cache {
            if let Err(e) = self.clean_cache(release_name).await {
                warn!(release_name, error = %e, "failed to clean cache");
            }
        }
        if connected && self.inner.config.auto_install {
            if let Err(e) = self.install(release_name).await {
                warn!(release_name, error = %e, "auto-install skipped");
            }
        }
    }

    /// Install an extracted entry on the connected device.
    ///
    /// Fails without touching the catalog when no device is connected or the
    /// entry has no local copy. A rejected install is reported as
    /// `InstallError` on the entry and returned to the caller.
    pub async fn install(&self, release_name: &str) -> Result<(), EngineError> {
        if !self.inner.device.is_connected().await {
            return Err(EngineError::DeviceUnavailable);
        }

        let package_name = {
            let mut state = self.state().await;
            let Some(entry) = state.catalog.entry(release_name) else {
                return Err(EngineError::UnknownEntry(release_name.to_owned()));
            };
            let package_name = entry.package_name.clone();
            let status = state.catalog.status(release_name);
            if status.device_base() != Status::Local || status == Status::Installing {
                return Err(EngineError::NotInstallable {
                    release_name: release_name.to_owned(),
                    status,
                });
            }
            state.catalog.set_status(release_name, Status::Installing);
            package_name
        };

        info!(release_name, package_name, "installing");
        let agent = Arc::clone(self.inner.device.agent());
        let result = agent
            .install(
                &self.local_path(release_name),
                &package_name,
                self.inner.config.rename_policy(),
            )
            .await;

        let next = match &result {
            Ok(()) => {
                info!(release_name, "installed");
                Status::InstalledAndLocally
            }
            Err(e) => {
                error!(release_name, error = %e, "install failed");
                Status::InstallError
            }
        };
        {
            let mut state = self.state().await;
            if state.catalog.status(release_name) == Status::Installing {
                state.catalog.set_status(release_name, next);
            } else {
                debug!(release_name, "entry changed during install");
            }
        }
        if result.is_ok() {
            self.reconcile_device().await;
        }
        result
    }

    /// Remove a package from the connected device.
    ///
    /// The catalog is updated by the reconciliation that follows.
    pub async fn uninstall(&self, package_name: &str) -> Result<(), EngineError> {
        if !self.inner.device.is_connected().await {
            return Err(EngineError::DeviceUnavailable);
        }
        info!(package_name, "uninstalling");
        let agent = Arc::clone(self.inner.device.agent());
        agent.uninstall(package_name).await.inspect_err(|e| {
            error!(package_name, error = %e, "uninstall failed");
        })?;
        let changed = self.reconcile_device().await;
        debug!(package_name, changed, "uninstalled");
        Ok(())
    }
}
