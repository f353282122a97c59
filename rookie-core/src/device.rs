use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use crate::collab::DeviceAgent;
use crate::entry::{DeviceProperties, InstalledApp};

/// Last observed state of the device connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub connected: bool,
    /// Sorted and deduplicated, so equality is set equality.
    pub installed: Vec<InstalledApp>,
    pub properties: Option<DeviceProperties>,
}

impl DeviceSnapshot {
    fn connected(mut installed: Vec<InstalledApp>, properties: Option<DeviceProperties>) -> Self {
        installed.sort();
        installed.dedup();
        Self {
            connected: true,
            installed,
            properties,
        }
    }

    /// Installed apps, or `None` when no device is connected.
    pub fn installed_apps(&self) -> Option<&[InstalledApp]> {
        self.connected.then_some(self.installed.as_slice())
    }
}

/// Outcome of [`DeviceSession::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged,
    /// The connection flag or the installed set differs from the previous
    /// snapshot.
    Changed {
        snapshot: DeviceSnapshot,
        connection_changed: bool,
    },
}

/// Tracks the connected device through a [`DeviceAgent`] and remembers the
/// last installed-app snapshot.
pub struct DeviceSession {
    agent: Arc<dyn DeviceAgent>,
    last: Mutex<DeviceSnapshot>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("last", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    pub fn new(agent: Arc<dyn DeviceAgent>) -> Self {
        Self {
            agent,
            last: Mutex::new(DeviceSnapshot::default()),
        }
    }

    pub fn agent(&self) -> &Arc<dyn DeviceAgent> {
        &self.agent
    }

    pub async fn is_connected(&self) -> bool {
        self.agent.is_connected().await
    }

    /// Most recent snapshot, without contacting the device.
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Query the device and compare with the previous snapshot.
    ///
    /// A failed app listing is logged and reported as `Unchanged`.
    pub async fn poll(&self) -> PollOutcome {
        let Some(next) = self.observe().await else {
            return PollOutcome::Unchanged;
        };
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.connected == next.connected && last.installed == next.installed {
            if last.properties != next.properties && next.properties.is_some() {
                last.properties = next.properties;
            }
            return PollOutcome::Unchanged;
        }
        let connection_changed = last.connected != next.connected;
        if connection_changed {
            info!(connected = next.connected, "device connection changed");
        }
        *last = next.clone();
        PollOutcome::Changed {
            snapshot: next,
            connection_changed,
        }
    }

    /// Query the device and store the result unconditionally.
    ///
    /// The flag reports whether the connection state flipped since the
    /// previous snapshot.
    pub async fn refresh(&self) -> (DeviceSnapshot, bool) {
        let Some(next) = self.observe().await else {
            return (self.snapshot(), false);
        };
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let connection_changed = last.connected != next.connected;
        if connection_changed {
            info!(connected = next.connected, "device connection changed");
        }
        *last = next.clone();
        (next, connection_changed)
    }

    async fn observe(&self) -> Option<DeviceSnapshot> {
        if !self.agent.is_connected().await {
            return Some(DeviceSnapshot::default());
        }
        let installed = match self.agent.list_installed_apps().await {
            Ok(apps) => apps,
            Err(e) => {
                warn!(error = %e, "failed to list installed apps");
                return None;
            }
        };

        let previous = self.snapshot();
        let properties = if previous.connected && previous.properties.is_some() {
            previous.properties
        } else {
            match self.agent.properties().await {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "failed to read device properties");
                    None
                }
            }
        };
        Some(DeviceSnapshot::connected(installed, properties))
    }
}
