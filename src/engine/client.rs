//! Transfer Engine Abstraction
//!
//! The manager talks to the engine only through this trait. Engines own the
//! network I/O; the manager owns caller ids and session state.

use async_trait::async_trait;
use std::sync::Arc;

use super::types::{EngineConfig, EngineEvent, EngineHandle, EngineStatus, TransferRequest};
use crate::error::EngineResult;

/// Callback invoked on the engine's event-delivery thread
pub type EngineEventCallback = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Handle-based transfer engine
///
/// Control calls only *request* a change; the outcome arrives later as an
/// [`EngineEvent`]. Implementations may deliver that event synchronously from
/// inside the control call, so callers must not hold locks the event callback
/// needs.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Submit a transfer. `Ok` is the acceptance outcome, `Err` the rejection.
    async fn enqueue(&self, request: TransferRequest) -> EngineResult<EngineHandle>;

    /// Pause a transfer
    fn pause(&self, handle: EngineHandle) -> EngineResult<()>;

    /// Resume a paused transfer
    fn resume(&self, handle: EngineHandle) -> EngineResult<()>;

    /// Cancel a transfer and delete its partial file
    fn delete(&self, handle: EngineHandle) -> EngineResult<()>;

    /// Drop every transfer from the engine's bookkeeping, keeping files
    fn remove_all(&self) -> EngineResult<()>;

    /// Drop every transfer and delete its files
    fn delete_all(&self) -> EngineResult<()>;

    /// Change the concurrent transfer ceiling
    fn set_concurrent_limit(&self, limit: u32) -> EngineResult<()>;

    /// Handles currently in the given status
    async fn list_by_status(&self, status: EngineStatus) -> EngineResult<Vec<EngineHandle>>;

    /// Register an event callback
    fn subscribe(&self, callback: EngineEventCallback);

    /// Remove all registered callbacks
    fn unsubscribe(&self);

    /// Release engine resources
    fn close(&self);

    /// Engine name for diagnostics
    fn engine_name(&self) -> &'static str;
}

/// Builds engines from configuration
pub trait EngineFactory: Send + Sync {
    fn create(&self, config: &EngineConfig) -> EngineResult<Arc<dyn TransferEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn(&EngineConfig) -> EngineResult<Arc<dyn TransferEngine>> + Send + Sync,
{
    fn create(&self, config: &EngineConfig) -> EngineResult<Arc<dyn TransferEngine>> {
        self(config)
    }
}
