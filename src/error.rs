//! Error Types
//!
//! Errors surfaced by the download manager and by transfer engines.

use thiserror::Error;

/// Errors reported by a transfer engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Engine construction failed: {0}")]
    Construction(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Unknown engine handle: {0}")]
    UnknownHandle(i64),

    #[error("Engine is closed")]
    Closed,

    #[error("Engine failure: {0}")]
    Internal(String),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Download manager errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("Downloader is not initialized")]
    NotInitialized,

    #[error("Download id already in use: {0}")]
    DuplicateId(String),

    #[error("Download not found: {0}")]
    NotFound(String),

    #[error("Engine rejected download: {0}")]
    EngineRejected(String),

    #[error("Engine error: {0}")]
    EngineError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DownloadError {
    /// Stable machine-readable code carried by `ErrorOccurred` notifications
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::DuplicateId(_) => "duplicate_id",
            Self::NotFound(_) => "not_found",
            Self::EngineRejected(_) => "engine_rejected",
            Self::EngineError(_) => "engine_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

impl From<EngineError> for DownloadError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Rejected(reason) => DownloadError::EngineRejected(reason),
            other => DownloadError::EngineError(other.to_string()),
        }
    }
}

impl From<url::ParseError> for DownloadError {
    fn from(err: url::ParseError) -> Self {
        DownloadError::InvalidRequest(format!("Invalid URL: {}", err))
    }
}

impl From<toml::de::Error> for DownloadError {
    fn from(err: toml::de::Error) -> Self {
        DownloadError::InvalidConfig(err.to_string())
    }
}

impl From<DownloadError> for String {
    fn from(err: DownloadError) -> String {
        err.to_string()
    }
}

/// Result type alias for download manager operations
pub type DownloadResult<T> = Result<T, DownloadError>;
