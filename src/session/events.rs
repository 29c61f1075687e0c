//! Download Events
//!
//! Session-keyed notifications published by the download manager.

use serde::{Deserialize, Serialize};

use super::state::SessionState;
use crate::engine::EngineEventKind;
use crate::error::DownloadError;
use crate::format::{format_bytes, format_rate};

/// Human-readable byte figures attached when unit conversion is enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDisplay {
    pub downloaded: String,
    pub total: String,
    pub speed: String,
}

/// Notifications, each scoped to a caller id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DownloadEvent {
    /// Engine accepted the download
    #[serde(rename_all = "camelCase")]
    Queued { id: String },

    /// Transfer started
    #[serde(rename_all = "camelCase")]
    Started { id: String },

    #[serde(rename_all = "camelCase")]
    Paused { id: String },

    #[serde(rename_all = "camelCase")]
    Resumed { id: String },

    /// Progress update
    #[serde(rename_all = "camelCase")]
    ProgressChanged {
        id: String,
        /// Percent complete, 0-100
        progress: u8,
        eta_ms: u64,
        bytes_per_second: u64,
        downloaded_bytes: u64,
        /// 0 while unknown
        total_bytes: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        display: Option<ProgressDisplay>,
    },

    #[serde(rename_all = "camelCase")]
    Completed { id: String },

    #[serde(rename_all = "camelCase")]
    Cancelled { id: String },

    /// Error occurred. `id` is a caller id or the name of the failing operation.
    #[serde(rename_all = "camelCase")]
    ErrorOccurred {
        id: String,
        message: String,
        code: String,
    },
}

impl DownloadEvent {
    /// Get the caller id from any event
    pub fn id(&self) -> &str {
        match self {
            Self::Queued { id }
            | Self::Started { id }
            | Self::Paused { id }
            | Self::Resumed { id }
            | Self::ProgressChanged { id, .. }
            | Self::Completed { id }
            | Self::Cancelled { id }
            | Self::ErrorOccurred { id, .. } => id,
        }
    }

    /// Event name scoped to one download
    pub fn event_name(&self) -> String {
        format!("{}:{}", self.global_event_name(), self.id())
    }

    /// Global event name (for broadcast)
    pub fn global_event_name(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "download-queued",
            Self::Started { .. } => "download-started",
            Self::Paused { .. } => "download-paused",
            Self::Resumed { .. } => "download-resumed",
            Self::ProgressChanged { .. } => "download-progress",
            Self::Completed { .. } => "download-completed",
            Self::Cancelled { .. } => "download-cancelled",
            Self::ErrorOccurred { .. } => "download-error",
        }
    }

    pub fn error(id: impl Into<String>, err: &DownloadError) -> Self {
        Self::ErrorOccurred {
            id: id.into(),
            message: err.to_string(),
            code: err.code().to_string(),
        }
    }

    /// Notification for an engine event that `state` has just applied
    pub fn from_applied(state: &SessionState, kind: &EngineEventKind, convert_units: bool) -> Self {
        let id = state.id.clone();
        match kind {
            EngineEventKind::Queued { .. } => Self::Queued { id },
            EngineEventKind::Started => Self::Started { id },
            EngineEventKind::Paused => Self::Paused { id },
            EngineEventKind::Resumed => Self::Resumed { id },
            EngineEventKind::Progress(_) => Self::progress(state, convert_units),
            EngineEventKind::Completed => Self::Completed { id },
            EngineEventKind::Cancelled | EngineEventKind::Removed => Self::Cancelled { id },
            EngineEventKind::Error { reason } => {
                Self::error(id, &DownloadError::EngineError(reason.clone()))
            }
        }
    }

    fn progress(state: &SessionState, convert_units: bool) -> Self {
        let total_bytes = state.total_bytes.unwrap_or(0);
        let display = convert_units.then(|| ProgressDisplay {
            downloaded: format_bytes(state.downloaded_bytes),
            total: format_bytes(total_bytes),
            speed: format_rate(state.bytes_per_second),
        });
        Self::ProgressChanged {
            id: state.id.clone(),
            progress: state.progress,
            eta_ms: state.eta_ms,
            bytes_per_second: state.bytes_per_second,
            downloaded_bytes: state.downloaded_bytes,
            total_bytes,
            display,
        }
    }
}
