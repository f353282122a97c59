//! Capabilities the engine depends on but does not implement.
//!
//! Every method is a suspension point of the engine; implementations must be
//! cheap to share (`Send + Sync`) and must not block the async runtime.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::entry::{DeviceProperties, InstalledApp};
use crate::error::EngineError;

/// Progress callback: `(bytes_received, bytes_total)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync + 'static>;

/// Mirror location and archive passphrase published by the catalog source.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub base_url: String,
    pub passphrase: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Whether the device agent may rename the package file before installing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenamePolicy {
    #[default]
    Keep,
    RenameToPackage,
}

/// Remote catalog metadata and the credentials needed to use it.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn credentials(&self) -> Result<Credentials, EngineError>;

    /// Raw catalog records, one `;`-separated line each.
    async fn fetch_entries(&self, credentials: &Credentials) -> Result<Vec<String>, EngineError>;
}

/// Parameters of one content download.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub base_url: String,
    pub content_id: String,
    /// Directory receiving the archive parts; partial files in it are resumed.
    pub dest_dir: PathBuf,
}

/// Resumable, abortable transfer of one entry's archive.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Download everything for `request`.
    ///
    /// `cancel` flips to `true` when the download is cancelled; implementations
    /// check it between read chunks and return an error once they stop.
    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressFn,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), EngineError>;
}

/// Archive extraction.
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Extract `archive` into `dest_dir`. May run for a long time; no timeout
    /// is applied by the caller.
    async fn extract(&self, archive: &Path, dest_dir: &Path, passphrase: &str)
    -> Result<(), EngineError>;
}

/// Package management on the connected device.
#[async_trait]
pub trait DeviceAgent: Send + Sync {
    async fn is_connected(&self) -> bool;

    async fn list_installed_apps(&self) -> Result<Vec<InstalledApp>, EngineError>;

    /// Install the package found in `local_path`.
    async fn install(
        &self,
        local_path: &Path,
        package_name: &str,
        rename: RenamePolicy,
    ) -> Result<(), EngineError>;

    async fn uninstall(&self, package_name: &str) -> Result<(), EngineError>;

    async fn properties(&self) -> Result<Option<DeviceProperties>, EngineError> {
        Ok(None)
    }
}

/// The set of collaborators an [`Engine`](crate::Engine) is built with.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogSource>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub archiver: Arc<dyn Archiver>,
    pub device: Arc<dyn DeviceAgent>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
