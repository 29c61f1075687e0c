//! fetchd - caller-keyed download sessions over a handle-based transfer engine
//!
//! The [`DownloadManager`] accepts caller-chosen ids, submits transfers to a
//! [`TransferEngine`], and republishes engine events as id-keyed
//! [`DownloadEvent`]s on a broadcast channel.

pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod session;

pub use config::ManagerConfig;
pub use engine::{EngineFactory, InMemoryEngine, NetworkConstraint, TransferEngine};
pub use error::{DownloadError, DownloadResult, EngineError, EngineResult};
pub use format::{format_bytes, format_rate};
pub use session::{DownloadEvent, DownloadManager, SessionInfo, SessionStatus};
