//! Lifecycle engine for catalog packages: download queue, extraction,
//! device installation and status reconciliation.
//!
//! The [`Engine`] is the entry point. It owns the [`CatalogStore`] and the
//! [`DownloadQueue`], drives entries through the pipeline using the
//! collaborator traits in [`collab`], and broadcasts every status change on
//! its [`EventBus`].

pub mod catalog;
pub mod collab;
pub mod config;
pub mod device;
pub mod entry;
pub mod error;
pub mod events;
pub mod persist;
pub mod queue;
pub mod reconcile;
pub mod runtime;
pub mod status;

pub use catalog::{CatalogQuery, CatalogStore, SortKey, SortOrder};
pub use collab::{
    Archiver, CatalogSource, Collaborators, ContentFetcher, Credentials, DeviceAgent,
    FetchRequest, ProgressFn, RenamePolicy,
};
pub use config::EngineConfig;
pub use device::{DeviceSession, DeviceSnapshot};
pub use entry::{DeviceProperties, InstalledApp, PackageEntry};
pub use error::EngineError;
pub use events::{EngineEvent, EventBus};
pub use queue::DownloadQueue;
pub use runtime::Engine;
pub use status::{Status, StatusSet};
