//! JSON persistence of the catalog status map.
//!
//! The state file is an array of records, one per tracked entry:
//!
//! ```json
//! [{ "name": "...", "release_name": "...", "package_name": "...",
//!    "version_code": "...", "last_updated": "...", "size": "...",
//!    "status": "Queued" }]
//! ```
//!
//! Statuses are folded with [`Status::persisted`] before writing.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::CatalogStore;
use crate::entry::PackageEntry;
use crate::error::EngineError;
use crate::status::Status;

/// One entry of the state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRecord {
    #[serde(flatten)]
    pub entry: PackageEntry,
    #[serde(default)]
    pub status: String,
}

impl PersistedRecord {
    pub fn new(entry: PackageEntry, status: Status) -> Self {
        Self {
            entry,
            status: status.persisted().as_str().to_owned(),
        }
    }

    /// Stored status; unparseable names load as `Unknown`.
    pub fn status(&self) -> Status {
        Status::from_str(&self.status).unwrap_or(Status::Unknown)
    }
}

/// Folded records for every tracked entry.
pub fn snapshot(catalog: &CatalogStore) -> Vec<PersistedRecord> {
    catalog
        .iter()
        .map(|(entry, status)| PersistedRecord::new(entry.clone(), status))
        .collect()
}

/// Write `records` to `path`, replacing the previous file atomically.
pub fn save(path: &Path, records: &[PersistedRecord]) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let data = serde_json::to_vec_pretty(records)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), records = records.len(), "state saved");
    Ok(())
}

/// Read the state file. A missing file yields no records.
pub fn load(path: &Path) -> Result<Vec<(PackageEntry, Status)>, EngineError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "state file not found");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };
    let records: Vec<PersistedRecord> = serde_json::from_slice(&data)?;
    Ok(records
        .into_iter()
        .filter(|r| !r.entry.release_name.is_empty())
        .map(|r| {
            let status = r.status();
            (r.entry, status)
        })
        .collect())
}
