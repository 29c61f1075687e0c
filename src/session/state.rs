//! Session State Management
//!
//! Tracks the state of individual download sessions and the transitions the
//! engine's events are allowed to cause.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::engine::{EngineEventKind, EngineHandle, NetworkConstraint, ProgressReport};

/// Status of a download session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Submitted, waiting for the engine to accept it
    Pending,
    /// Accepted by the engine
    Queued,
    /// Transfer started
    Started,
    /// Paused by the caller or the engine
    Paused,
    /// Resumed after a pause
    Resumed,
    /// Bytes are flowing
    Progressing,
    /// Download finished
    Completed,
    /// Download was cancelled
    Cancelled,
    /// Download failed
    Errored,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Errored)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Queued => write!(f, "queued"),
            Self::Started => write!(f, "started"),
            Self::Paused => write!(f, "paused"),
            Self::Resumed => write!(f, "resumed"),
            Self::Progressing => write!(f, "progressing"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// An engine event that does not fit the session's current status
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply '{event}' while {from}")]
pub struct TransitionRejected {
    pub from: SessionStatus,
    pub event: &'static str,
}

/// Complete state of a single download session
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Caller-chosen identifier
    pub id: String,
    /// Engine handle, known once the engine accepts the request
    pub engine_handle: Option<EngineHandle>,
    /// Reservation number assigned by the registry; tells a reused id apart
    /// from the reservation an in-flight enqueue was made for
    pub generation: u64,
    pub status: SessionStatus,
    /// Percent complete, 0-100
    pub progress: u8,
    pub downloaded_bytes: u64,
    /// `None` while the engine does not know the size
    pub total_bytes: Option<u64>,
    pub eta_ms: u64,
    pub bytes_per_second: u64,
    /// Captured at enqueue time
    pub network: NetworkConstraint,
    /// When the enqueue request was issued
    pub submitted_at: Instant,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl SessionState {
    /// Create a placeholder for a request that has not been accepted yet
    pub fn new(id: impl Into<String>, network: NetworkConstraint) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            engine_handle: None,
            generation: 0,
            status: SessionStatus::Pending,
            progress: 0,
            downloaded_bytes: 0,
            total_bytes: None,
            eta_ms: 0,
            bytes_per_second: 0,
            network,
            submitted_at: Instant::now(),
            created_at: now,
            last_activity: now,
            error_message: None,
        }
    }

    /// Apply an engine event, returning the new status
    ///
    /// Events that do not fit the current status leave the session untouched.
    pub fn apply(&mut self, kind: &EngineEventKind) -> Result<SessionStatus, TransitionRejected> {
        use SessionStatus::*;

        let from = self.status;
        let next = match kind {
            EngineEventKind::Queued { .. } if from == Pending => Queued,
            EngineEventKind::Started if matches!(from, Queued | Resumed) => Started,
            EngineEventKind::Progress(report) if from != Pending && !from.is_terminal() => {
                self.record_progress(report);
                Progressing
            }
            EngineEventKind::Paused if matches!(from, Started | Progressing) => Paused,
            EngineEventKind::Resumed if from == Paused => Resumed,
            EngineEventKind::Completed if !from.is_terminal() => {
                self.progress = 100;
                if let Some(total) = self.total_bytes {
                    self.downloaded_bytes = total;
                }
                self.eta_ms = 0;
                Completed
            }
            EngineEventKind::Cancelled | EngineEventKind::Removed if !from.is_terminal() => {
                Cancelled
            }
            EngineEventKind::Error { reason } if !from.is_terminal() => {
                self.error_message = Some(reason.clone());
                Errored
            }
            _ => {
                return Err(TransitionRejected {
                    from,
                    event: kind.name(),
                })
            }
        };

        self.status = next;
        self.last_activity = Utc::now();
        Ok(next)
    }

    fn record_progress(&mut self, report: &ProgressReport) {
        self.progress = report.progress.clamp(0, 100) as u8;
        self.eta_ms = report.eta_ms.max(0) as u64;
        self.bytes_per_second = report.bytes_per_second.max(0) as u64;
        self.downloaded_bytes = report.downloaded.max(0) as u64;
        self.total_bytes = (report.total >= 0).then_some(report.total as u64);
    }

    /// Whether pause/resume/cancel can reach this session
    pub fn is_controllable(&self) -> bool {
        self.engine_handle.is_some() && !self.status.is_terminal()
    }
}

/// Serializable session info for API responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub engine_handle: Option<EngineHandle>,
    pub status: SessionStatus,
    pub progress: u8,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub eta_ms: u64,
    pub bytes_per_second: u64,
    pub network: NetworkConstraint,
    pub created_at: String,
    pub last_activity: String,
    pub error_message: Option<String>,
}

impl From<&SessionState> for SessionInfo {
    fn from(state: &SessionState) -> Self {
        Self {
            id: state.id.clone(),
            engine_handle: state.engine_handle,
            status: state.status,
            progress: state.progress,
            downloaded_bytes: state.downloaded_bytes,
            total_bytes: state.total_bytes,
            eta_ms: state.eta_ms,
            bytes_per_second: state.bytes_per_second,
            network: state.network,
            created_at: state.created_at.to_rfc3339(),
            last_activity: state.last_activity.to_rfc3339(),
            error_message: state.error_message.clone(),
        }
    }
}
