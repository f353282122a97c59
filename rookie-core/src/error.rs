use thiserror::Error;

use crate::status::Status;

/// Errors produced by the engine and its collaborators.
///
/// Collaborator failures (`Fetch`, `Extract`, `Install`) are turned into a
/// status transition where the engine invokes the collaborator; they only
/// reach callers of [`Engine::install`](crate::Engine::install) and
/// [`Engine::uninstall`](crate::Engine::uninstall).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Catalog metadata was unavailable, malformed, or empty.
    #[error("catalog parse error: {0}")]
    CatalogParse(String),

    /// Network or transport failure while fetching content.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Archive extraction failed.
    #[error("extraction failed: {0}")]
    Extract(String),

    /// The device rejected the package.
    #[error("install failed: {0}")]
    Install(String),

    /// An install or uninstall was attempted without a connected device.
    #[error("no device connected")]
    DeviceUnavailable,

    /// The release name is not tracked by the catalog.
    #[error("unknown catalog entry: {0}")]
    UnknownEntry(String),

    /// The entry's current status does not allow queueing it for download.
    #[error("cannot queue '{release_name}' while it is {status}")]
    NotQueueable {
        release_name: String,
        status: Status,
    },

    /// The entry has no local copy that could be installed right now.
    #[error("cannot install '{release_name}' while it is {status}")]
    NotInstallable {
        release_name: String,
        status: Status,
    },

    /// The entry is being downloaded, extracted or installed.
    #[error("'{release_name}' is busy ({status})")]
    Busy {
        release_name: String,
        status: Status,
    },

    /// A filesystem I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize the state file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
