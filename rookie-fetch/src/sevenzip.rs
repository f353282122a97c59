use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rookie_core::{Archiver, EngineError};
use tracing::info;

use crate::error::FetchError;
use crate::process;

/// Extracts multi-volume 7z archives with the `7za` command-line tool.
#[derive(Debug, Clone)]
pub struct SevenZip {
    program: PathBuf,
}

impl Default for SevenZip {
    fn default() -> Self {
        Self::new("7za")
    }
}

impl SevenZip {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `x <archive> -aoa -o<dest> -p<passphrase>`; existing files are overwritten.
    pub fn extract_args(archive: &Path, dest_dir: &Path, passphrase: &str) -> Vec<OsString> {
        let mut out = OsString::from("-o");
        out.push(dest_dir);
        vec![
            "x".into(),
            archive.into(),
            "-aoa".into(),
            out,
            format!("-p{passphrase}").into(),
        ]
    }

    pub async fn run(
        &self,
        archive: &Path,
        dest_dir: &Path,
        passphrase: &str,
    ) -> Result<(), FetchError> {
        tokio::fs::create_dir_all(dest_dir).await?;
        info!(
            archive = %archive.display(),
            dest = %dest_dir.display(),
            "extracting archive"
        );
        process::run(
            &self.program,
            Self::extract_args(archive, dest_dir, passphrase),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Archiver for SevenZip {
    async fn extract(
        &self,
        archive: &Path,
        dest_dir: &Path,
        passphrase: &str,
    ) -> Result<(), EngineError> {
        self.run(archive, dest_dir, passphrase)
            .await
            .map_err(FetchError::into_extract)
    }
}
