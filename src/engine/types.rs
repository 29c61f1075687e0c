//! Engine Types
//!
//! Requests, statuses and events exchanged with a transfer engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Numeric handle the engine assigns once it accepts a request
pub type EngineHandle = i64;

/// Networks a transfer is allowed to run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkConstraint {
    /// Only on Wi-Fi
    WifiOnly,
    /// Any available network
    Any,
    /// Only on unmetered networks
    UnmeteredOnly,
    /// Transfers are held until the constraint changes
    Disabled,
}

impl Default for NetworkConstraint {
    fn default() -> Self {
        Self::Any
    }
}

impl NetworkConstraint {
    /// Map the integer codes exposed to block-style callers. Unknown codes fall back to `Any`.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::WifiOnly,
            1 => Self::Any,
            2 => Self::UnmeteredOnly,
            3 => Self::Disabled,
            _ => Self::Any,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::WifiOnly => 0,
            Self::Any => 1,
            Self::UnmeteredOnly => 2,
            Self::Disabled => 3,
        }
    }
}

impl std::fmt::Display for NetworkConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WifiOnly => write!(f, "wifi_only"),
            Self::Any => write!(f, "any"),
            Self::UnmeteredOnly => write!(f, "unmetered_only"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

impl std::str::FromStr for NetworkConstraint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wifi" | "wifi_only" => Ok(Self::WifiOnly),
            "any" | "all" => Ok(Self::Any),
            "unmetered" | "unmetered_only" => Ok(Self::UnmeteredOnly),
            "disabled" | "off" => Ok(Self::Disabled),
            other => other
                .parse::<i32>()
                .map(Self::from_code)
                .map_err(|_| format!("Unknown network constraint: {}", s)),
        }
    }
}

/// Engine construction parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of transfers the engine runs at once
    pub concurrent_limit: u32,
    /// Whether the engine resumes stored transfers on construction
    pub auto_start: bool,
}

/// A single transfer submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub url: String,
    pub destination: PathBuf,
    pub network: NetworkConstraint,
    /// Engine-level retry attempts. The manager always submits 0.
    pub auto_retry_attempts: u32,
}

/// Engine-side transfer status, used for startup recovery queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

/// Progress figures as reported by the engine. `-1` means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    pub progress: i32,
    pub eta_ms: i64,
    pub bytes_per_second: i64,
    pub downloaded: i64,
    pub total: i64,
}

/// What happened to a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEventKind {
    Queued { waiting_on_network: bool },
    Started,
    Progress(ProgressReport),
    Paused,
    Resumed,
    Completed,
    Cancelled,
    /// Transfer was deleted or removed from the engine
    Removed,
    Error { reason: String },
}

impl EngineEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queued",
            Self::Started => "started",
            Self::Progress(_) => "progress",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Removed => "removed",
            Self::Error { .. } => "error",
        }
    }
}

/// Raw event delivered by the engine's event thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    pub handle: EngineHandle,
    pub kind: EngineEventKind,
}

impl EngineEvent {
    pub fn new(handle: EngineHandle, kind: EngineEventKind) -> Self {
        Self { handle, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_codes() {
        assert_eq!(NetworkConstraint::from_code(0), NetworkConstraint::WifiOnly);
        assert_eq!(NetworkConstraint::from_code(2), NetworkConstraint::UnmeteredOnly);
        assert_eq!(NetworkConstraint::from_code(3), NetworkConstraint::Disabled);
        assert_eq!(NetworkConstraint::from_code(42), NetworkConstraint::Any);
        assert_eq!(NetworkConstraint::UnmeteredOnly.code(), 2);
    }

    #[test]
    fn test_network_parse() {
        assert_eq!("wifi".parse::<NetworkConstraint>(), Ok(NetworkConstraint::WifiOnly));
        assert_eq!("3".parse::<NetworkConstraint>(), Ok(NetworkConstraint::Disabled));
        assert!("carrier-pigeon".parse::<NetworkConstraint>().is_err());
    }
}
