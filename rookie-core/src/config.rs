//! Engine configuration, loaded from environment variables or built
//! explicitly and passed to [`Engine::new`](crate::Engine::new).

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collab::RenamePolicy;

/// Subdirectory created under the platform cache and data directories.
const APP_DIR: &str = "rookie";

/// Name of the persisted status file inside the library directory.
pub const STATE_FILE_NAME: &str = "games_info.json";

/// Runtime configuration for the engine.
///
/// Every field has a default so the engine works without any environment
/// variables set.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Download cache; each entry gets a `<content_id>/` subdirectory.
    pub cache_dir: PathBuf,

    /// Extraction root; each entry lands in `<release_name>/`.
    pub library_dir: PathBuf,

    /// JSON file holding the persisted status map.
    pub state_file: PathBuf,

    /// Install right after extraction when a device is connected.
    pub auto_install: bool,

    /// Delete the downloaded archive after a successful extraction.
    pub auto_clean_cache: bool,

    /// Passed to the device agent as the install rename policy.
    pub rename_package: bool,

    /// Device polling period.
    pub poll_interval: Duration,

    /// Event bus capacity per subscriber.
    pub event_capacity: usize,
}

impl EngineConfig {
    /// Lay out cache, library and state file under one root directory.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let library_dir = root.join("library");
        Self {
            cache_dir: root.join("cache"),
            state_file: library_dir.join(STATE_FILE_NAME),
            library_dir,
            ..Self::default()
        }
    }

    /// Build [`EngineConfig`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let library_dir = env_path("ROOKIE_LIBRARY_DIR").unwrap_or(defaults.library_dir);
        Self {
            cache_dir: env_path("ROOKIE_CACHE_DIR").unwrap_or(defaults.cache_dir),
            state_file: env_path("ROOKIE_STATE_FILE")
                .unwrap_or_else(|| library_dir.join(STATE_FILE_NAME)),
            library_dir,
            auto_install: env_flag("ROOKIE_AUTO_INSTALL", defaults.auto_install),
            auto_clean_cache: env_flag("ROOKIE_AUTO_CLEAN_CACHE", defaults.auto_clean_cache),
            rename_package: env_flag("ROOKIE_RENAME_PACKAGE", defaults.rename_package),
            poll_interval: env_millis("ROOKIE_POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval),
            event_capacity: parse_env("ROOKIE_EVENT_CAPACITY", defaults.event_capacity),
        }
    }

    pub fn rename_policy(&self) -> RenamePolicy {
        if self.rename_package {
            RenamePolicy::RenameToPackage
        } else {
            RenamePolicy::Keep
        }
    }
}

impl Default for EngineConfig {
    /// Cache under the platform cache directory and library under the
    /// platform data directory, both in a `rookie/` subdirectory.
    fn default() -> Self {
        let cache_root = dirs_next::cache_dir().unwrap_or_else(std::env::temp_dir);
        let data_root = dirs_next::data_dir().unwrap_or_else(|| cache_root.clone());
        let library_dir = data_root.join(APP_DIR).join("library");
        Self {
            cache_dir: cache_root.join(APP_DIR).join("cache"),
            state_file: library_dir.join(STATE_FILE_NAME),
            library_dir,
            auto_install: true,
            auto_clean_cache: false,
            rename_package: false,
            poll_interval: Duration::from_millis(3000),
            event_capacity: 256,
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// A positive millisecond count; zero and garbage count as unset.
fn env_millis(key: &str) -> Option<Duration> {
    match parse_env::<u64>(key, 0) {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
