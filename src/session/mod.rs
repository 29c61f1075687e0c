//! Download Session Module
//!
//! Caller-keyed download sessions on top of a handle-based engine:
//! - Bidirectional id/handle registry with a pending-event buffer
//! - Per-session state machine driven by engine events
//! - Session-scoped notifications over a broadcast channel

pub mod events;
pub mod manager;
pub mod pending;
pub mod registry;
pub mod state;

pub use events::{DownloadEvent, ProgressDisplay};
pub use manager::DownloadManager;
pub use pending::PendingEvents;
pub use registry::{AttachOutcome, IdentifierRegistry, RegistryState};
pub use state::{SessionInfo, SessionState, SessionStatus, TransitionRejected};
