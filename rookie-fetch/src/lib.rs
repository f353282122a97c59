pub mod adb;
pub mod catalog;
pub mod error;
pub mod http;
mod process;
pub mod public;
pub mod sevenzip;
#[cfg(test)]
mod test_server;

pub use adb::Adb;
pub use catalog::RemoteCatalog;
pub use error::FetchError;
pub use http::HttpFetcher;
pub use sevenzip::SevenZip;

use std::sync::Arc;

use rookie_core::{Collaborators, EngineConfig};

/// Build the production collaborators for an engine using `config`.
///
/// Metadata is downloaded into the cache directory and extracted to
/// `<cache_dir>/meta`.
///
/// ```rust,ignore
/// let config = EngineConfig::from_env();
/// let engine = Engine::start(config.clone(), rookie_fetch::collaborators(&config)?).await?;
/// ```
pub fn collaborators(config: &EngineConfig) -> Result<Collaborators, FetchError> {
    let http = HttpFetcher::new()?;
    let archiver = Arc::new(SevenZip::default());
    let catalog = RemoteCatalog::new(
        http.clone(),
        archiver.clone(),
        config.cache_dir.clone(),
        config.cache_dir.join("meta"),
    );
    Ok(Collaborators {
        catalog: Arc::new(catalog),
        fetcher: Arc::new(http),
        archiver,
        device: Arc::new(Adb::default()),
    })
}
