use tokio::sync::broadcast;

use crate::entry::DeviceProperties;
use crate::status::Status;

/// Notifications published by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// An entry moved to a new status.
    StatusChanged { release_name: String, status: Status },
    /// Fraction of the active download received so far, in `[0, 1]`.
    DownloadProgress { release_name: String, progress: f64 },
    /// The set of tracked entries changed (refresh or restore).
    CatalogChanged,
    /// The device connection or its properties changed.
    DeviceChanged {
        connected: bool,
        properties: Option<DeviceProperties>,
    },
}

/// Fan-out channel for [`EngineEvent`]s.
///
/// Cloning shares the underlying channel. Publishing with no subscribers is
/// not an error; slow subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn status_changed(&self, release_name: &str, status: Status) {
        self.publish(EngineEvent::StatusChanged {
            release_name: release_name.to_owned(),
            status,
        });
    }

    pub fn download_progress(&self, release_name: &str, progress: f64) {
        self.publish(EngineEvent::DownloadProgress {
            release_name: release_name.to_owned(),
            progress: progress.clamp(0.0, 1.0),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.status_changed("R1", Status::Queued);
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.status_changed("R1", Status::Queued);
        bus.download_progress("R1", 1.5);

        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::StatusChanged {
                release_name: "R1".into(),
                status: Status::Queued
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::DownloadProgress {
                release_name: "R1".into(),
                progress: 1.0
            }
        );
    }
}
