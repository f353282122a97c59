use std::collections::VecDeque;

use tokio::sync::watch;

use crate::catalog::CatalogStore;
use crate::collab::Credentials;
use crate::events::EventBus;
use crate::queue::DownloadQueue;

/// The transfer currently owned by the drain loop.
#[derive(Debug)]
pub struct ActiveDownload {
    pub release_name: String,
    /// Set to `true` to ask the fetcher to stop.
    pub cancel_tx: watch::Sender<bool>,
}

/// All mutable engine state, guarded by a single lock.
///
/// The lock is never held across a collaborator call.
#[derive(Debug)]
pub struct EngineState {
    pub catalog: CatalogStore,
    pub queue: DownloadQueue,
    /// Extracted entries, most recent first.
    pub local: VecDeque<String>,
    pub active: Option<ActiveDownload>,
    /// A drain loop task is running.
    pub draining: bool,
    pub credentials: Option<Credentials>,
    /// Catalog revision at the last successful save.
    pub saved_revision: u64,
}

impl EngineState {
    pub fn new(events: EventBus) -> Self {
        Self {
            catalog: CatalogStore::new(events),
            queue: DownloadQueue::new(),
            local: VecDeque::new(),
            active: None,
            draining: false,
            credentials: None,
            saved_revision: 0,
        }
    }

    pub fn push_local_front(&mut self, release_name: &str) {
        self.local.retain(|r| r != release_name);
        self.local.push_front(release_name.to_owned());
    }

    pub fn remove_local(&mut self, release_name: &str) -> bool {
        let before = self.local.len();
        self.local.retain(|r| r != release_name);
        before != self.local.len()
    }

    /// Signal the active transfer to stop if it belongs to `release_name`.
    pub fn abort_active(&mut self, release_name: &str) -> bool {
        match &self.active {
            Some(active) if active.release_name == release_name => {
                let _ = active.cancel_tx.send(true);
                true
            }
            _ => false,
        }
    }

    /// Forget the active transfer if it belongs to `release_name`.
    pub fn clear_active(&mut self, release_name: &str) {
        if self
            .active
            .as_ref()
            .is_some_and(|a| a.release_name == release_name)
        {
            self.active = None;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.catalog.revision() != self.saved_revision
    }
}
