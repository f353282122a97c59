use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rookie_core::{Archiver, CatalogSource, Credentials, EngineError};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::FetchError;
use crate::http::{HttpFetcher, join_url};
use crate::public::{PUBLIC_CONFIG_URLS, fetch_public_config};

/// Metadata archive published at the mirror root.
pub const META_ARCHIVE: &str = "meta.7z";
/// Catalog listing inside the metadata archive.
pub const GAME_LIST: &str = "VRP-GameList.txt";

/// [`CatalogSource`] backed by the public mirror.
///
/// Credentials come from the public config document; the catalog itself is
/// the game list inside the passphrase-protected `meta.7z`.
pub struct RemoteCatalog {
    http: HttpFetcher,
    archiver: Arc<dyn Archiver>,
    config_urls: Vec<String>,
    download_dir: PathBuf,
    meta_dir: PathBuf,
}

impl std::fmt::Debug for RemoteCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCatalog")
            .field("config_urls", &self.config_urls)
            .field("download_dir", &self.download_dir)
            .field("meta_dir", &self.meta_dir)
            .finish_non_exhaustive()
    }
}

impl RemoteCatalog {
    pub fn new(
        http: HttpFetcher,
        archiver: Arc<dyn Archiver>,
        download_dir: impl Into<PathBuf>,
        meta_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            http,
            archiver,
            config_urls: PUBLIC_CONFIG_URLS.iter().map(|u| (*u).to_owned()).collect(),
            download_dir: download_dir.into(),
            meta_dir: meta_dir.into(),
        }
    }

    /// Override where the public config is fetched from.
    pub fn set_config_urls(mut self, urls: Vec<String>) -> Self {
        self.config_urls = urls;
        self
    }

    pub fn game_list_path(&self) -> PathBuf {
        self.meta_dir.join(GAME_LIST)
    }

    async fn download_meta(&self, credentials: &Credentials) -> Result<PathBuf, FetchError> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let archive = self.download_dir.join(META_ARCHIVE);
        // Always fetch a fresh copy.
        let _ = tokio::fs::remove_file(&archive).await;

        let url = join_url(&credentials.base_url, META_ARCHIVE);
        let (_tx, cancel) = watch::channel(false);
        let bytes = self
            .http
            .download_file(&url, &archive, None, &cancel, |_| {})
            .await?;
        info!(url = %url, bytes, "metadata downloaded");
        Ok(archive)
    }
}

#[async_trait]
impl CatalogSource for RemoteCatalog {
    async fn credentials(&self) -> Result<Credentials, EngineError> {
        Ok(fetch_public_config(self.http.client(), &self.config_urls).await?)
    }

    async fn fetch_entries(&self, credentials: &Credentials) -> Result<Vec<String>, EngineError> {
        let archive = self.download_meta(credentials).await?;
        let extracted = self
            .archiver
            .extract(&archive, &self.meta_dir, &credentials.passphrase)
            .await;
        if let Err(e) = tokio::fs::remove_file(&archive).await {
            warn!(path = %archive.display(), error = %e, "failed to remove metadata archive");
        }
        extracted.map_err(|e| EngineError::CatalogParse(format!("metadata extraction failed: {e}")))?;

        read_game_list(&self.game_list_path()).await
    }
}

/// Catalog records from the game list file, header removed.
pub async fn read_game_list(path: &Path) -> Result<Vec<String>, EngineError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        EngineError::CatalogParse(format!("{}: {e}", path.display()))
    })?;
    Ok(parse_game_list(&String::from_utf8_lossy(&bytes)))
}

/// Drop the header line and blank lines.
pub fn parse_game_list(text: &str) -> Vec<String> {
    text.lines()
        .skip(1)
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sevenzip::SevenZip;
    use crate::test_server::{Reply, TestServer, direct_fetcher};

    const GAME_LIST_TEXT: &str = "Game Name;Release Name;Package Name;Version Code;Last Updated;Size (MB)\r\n\
Beat Saber;Beat Saber v1.2 -VRP;com.beatgames.beatsaber;1200;2024-01-05 10:11 UTC;2048\r\n\
\r\n\
Moss;Moss v3 -VRP;com.polyarcgames.moss;3;2023-11-01 08:00 UTC;1500\r\n";

    #[test]
    fn header_and_blank_lines_are_dropped() {
        let lines = parse_game_list(GAME_LIST_TEXT);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Beat Saber;"));
        assert!(!lines[1].ends_with('\r'));
    }

    #[tokio::test]
    async fn reads_list_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(GAME_LIST);
        std::fs::write(&path, GAME_LIST_TEXT).unwrap();
        let lines = read_game_list(&path).await.unwrap();
        assert_eq!(lines.len(), 2);

        let missing = read_game_list(&dir.path().join("absent.txt")).await;
        assert!(matches!(missing, Err(EngineError::CatalogParse(_))));
    }

    #[tokio::test]
    async fn credentials_fall_back_to_next_config_url() {
        let server = TestServer::start(|req| match req.path.as_str() {
            "/vrp-public.json" => Reply::ok(
                r#"{"baseUri":"https://mirror.test/","password":"Z0w1OVZmZ1B4b0hS"}"#,
            ),
            _ => Reply::new(404, Vec::new()),
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let catalog = RemoteCatalog::new(
            direct_fetcher(),
            Arc::new(SevenZip::default()),
            dir.path(),
            dir.path().join("meta"),
        )
        .set_config_urls(vec![server.url("/missing.json"), server.url("/vrp-public.json")]);

        let credentials = catalog.credentials().await.unwrap();
        assert_eq!(credentials.base_url, "https://mirror.test/");
        assert_eq!(credentials.passphrase, "gL59VfgPxoHR");
        assert_eq!(server.requests().len(), 2);
    }
}
