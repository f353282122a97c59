use rookie_core::EngineError;
use thiserror::Error;

/// Errors that can be returned by rookie-fetch operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// An HTTP request failed (network error, non-2xx status, etc.).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A filesystem I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The archive passphrase was not valid base64.
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A remote document was missing an expected field or had an unexpected shape.
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    /// An external program exited unsuccessfully.
    #[error("{program} exited with {code:?}: {output}")]
    Process {
        program: String,
        code: Option<i32>,
        output: String,
    },

    /// The transfer was cancelled.
    #[error("download aborted")]
    Aborted,

    /// No device is attached.
    #[error("no device attached")]
    NoDevice,
}

impl FetchError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Map to the engine's extraction failure.
    pub fn into_extract(self) -> EngineError {
        EngineError::Extract(self.to_string())
    }

    /// Map to the engine's install failure.
    pub fn into_install(self) -> EngineError {
        match self {
            Self::NoDevice => EngineError::DeviceUnavailable,
            other => EngineError::Install(other.to_string()),
        }
    }
}

impl From<FetchError> for EngineError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NoDevice => EngineError::DeviceUnavailable,
            other => EngineError::Fetch(other.to_string()),
        }
    }
}
