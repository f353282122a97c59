//! CLI configuration, loaded from environment variables at startup.

use std::time::Duration;

use rookie_core::EngineConfig;

const DEFAULT_AUTOSAVE_SECS: u64 = 30;

/// Runtime configuration for the `rookie` binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// Paths and pipeline policy handed to the engine.
    pub engine: EngineConfig,

    /// `tracing` filter string, e.g. `"info"` or `"debug,reqwest=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// How often `watch` persists a changed catalog.
    pub autosave_interval: Duration,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            engine: EngineConfig::from_env(),
            log_level: env_or("ROOKIE_LOG", "info"),
            log_json: std::env::var("ROOKIE_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            autosave_interval: Duration::from_secs(
                match parse_env::<u64>("ROOKIE_AUTOSAVE_SECS", 0) {
                    0 => DEFAULT_AUTOSAVE_SECS,
                    secs => secs,
                },
            ),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
