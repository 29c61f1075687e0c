//! In-Memory Transfer Engine
//!
//! A transfer engine that keeps all bookkeeping in memory. Without a
//! simulation profile it is fully scripted: events are injected with
//! [`InMemoryEngine::emit`] and acceptances can be held back to reproduce
//! registration races. With a [`SimulationProfile`] every accepted transfer is
//! driven on tokio timers and honors pause, resume and delete.

use async_trait::async_trait;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::client::{EngineEventCallback, EngineFactory, TransferEngine};
use super::types::{
    EngineConfig, EngineEvent, EngineEventKind, EngineHandle, EngineStatus, ProgressReport,
    TransferRequest,
};
use crate::error::{EngineError, EngineResult};

/// Control calls received by the engine, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Pause(EngineHandle),
    Resume(EngineHandle),
    Delete(EngineHandle),
    RemoveAll,
    DeleteAll,
    SetConcurrentLimit(u32),
    Close,
}

/// Shape of a simulated transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationProfile {
    pub total_bytes: u64,
    pub chunk_bytes: u64,
    pub tick: Duration,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            total_bytes: 8 * 1024 * 1024,
            chunk_bytes: 512 * 1024,
            tick: Duration::from_millis(200),
        }
    }
}

impl SimulationProfile {
    fn bytes_per_second(&self) -> u64 {
        let tick_ms = self.tick.as_millis().max(1) as u64;
        self.chunk_bytes.saturating_mul(1000) / tick_ms
    }
}

struct Transfer {
    request: Option<TransferRequest>,
    status: EngineStatus,
    downloaded: u64,
}

struct EngineState {
    next_handle: EngineHandle,
    transfers: HashMap<EngineHandle, Transfer>,
    calls: Vec<EngineCall>,
    reject_next: Option<String>,
    closed: bool,
    concurrent_limit: u32,
    config: Option<EngineConfig>,
}

struct EngineShared {
    state: Mutex<EngineState>,
    listeners: RwLock<Vec<EngineEventCallback>>,
    /// `true` while acceptances are held back
    gate: watch::Sender<bool>,
    simulation: Option<SimulationProfile>,
}

impl EngineShared {
    fn dispatch(&self, event: EngineEvent) {
        let listeners: Vec<EngineEventCallback> = self.listeners.read().clone();
        for listener in listeners {
            listener(event.clone());
        }
    }
}

/// Engine keeping transfers in memory
pub struct InMemoryEngine {
    shared: Arc<EngineShared>,
}

impl InMemoryEngine {
    /// Create a scripted engine
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an engine that drives accepted transfers on its own
    pub fn with_simulation(profile: SimulationProfile) -> Self {
        Self::build(Some(profile))
    }

    fn build(simulation: Option<SimulationProfile>) -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            shared: Arc::new(EngineShared {
                state: Mutex::new(EngineState {
                    next_handle: 1,
                    transfers: HashMap::new(),
                    calls: Vec::new(),
                    reject_next: None,
                    closed: false,
                    concurrent_limit: 1,
                    config: None,
                }),
                listeners: RwLock::new(Vec::new()),
                gate,
                simulation,
            }),
        }
    }

    /// Factory handing out this engine, configured on every `create`
    pub fn factory(engine: &Arc<Self>) -> Arc<dyn EngineFactory> {
        let engine = Arc::clone(engine);
        Arc::new(
            move |config: &EngineConfig| -> EngineResult<Arc<dyn TransferEngine>> {
                engine.configure(config);
                Ok(Arc::clone(&engine) as Arc<dyn TransferEngine>)
            },
        )
    }

    fn configure(&self, config: &EngineConfig) {
        let mut state = self.shared.state.lock();
        state.closed = false;
        state.concurrent_limit = config.concurrent_limit;
        state.config = Some(config.clone());
        info!(
            "In-memory engine configured (limit={}, auto_start={})",
            config.concurrent_limit, config.auto_start
        );
    }

    /// Deliver an event to subscribers, as the engine's event thread would
    pub fn emit(&self, event: EngineEvent) {
        self.shared.dispatch(event);
    }

    /// Shorthand for [`emit`](Self::emit)
    pub fn emit_kind(&self, handle: EngineHandle, kind: EngineEventKind) {
        self.emit(EngineEvent::new(handle, kind));
    }

    /// Hold every acceptance until [`release_acceptances`](Self::release_acceptances)
    pub fn hold_acceptances(&self) {
        self.shared.gate.send_replace(true);
    }

    pub fn release_acceptances(&self) {
        self.shared.gate.send_replace(false);
    }

    /// Reject the next enqueue with the given reason
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.shared.state.lock().reject_next = Some(reason.into());
    }

    /// Handle the next accepted transfer will receive
    pub fn next_handle(&self) -> EngineHandle {
        self.shared.state.lock().next_handle
    }

    /// Force the handle the next accepted transfer receives, even one in use
    pub fn set_next_handle(&self, handle: EngineHandle) {
        self.shared.state.lock().next_handle = handle;
    }

    /// Register a transfer left over from an earlier run
    pub fn seed_transfer(&self, handle: EngineHandle, status: EngineStatus) {
        let mut state = self.shared.state.lock();
        state.transfers.insert(
            handle,
            Transfer {
                request: None,
                status,
                downloaded: 0,
            },
        );
        if state.next_handle <= handle {
            state.next_handle = handle + 1;
        }
    }

    pub fn transfer_status(&self, handle: EngineHandle) -> Option<EngineStatus> {
        self.shared.state.lock().transfers.get(&handle).map(|t| t.status)
    }

    pub fn transfer_request(&self, handle: EngineHandle) -> Option<TransferRequest> {
        self.shared
            .state
            .lock()
            .transfers
            .get(&handle)
            .and_then(|t| t.request.clone())
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.shared.state.lock().calls.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.read().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn concurrent_limit(&self) -> u32 {
        self.shared.state.lock().concurrent_limit
    }

    pub fn last_config(&self) -> Option<EngineConfig> {
        self.shared.state.lock().config.clone()
    }

    /// Move a transfer between statuses and echo the matching event
    fn control(
        &self,
        call: EngineCall,
        handle: EngineHandle,
        change: impl FnOnce(EngineStatus) -> Option<(EngineStatus, EngineEventKind)>,
    ) -> EngineResult<()> {
        let echo = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(EngineError::Closed);
            }
            state.calls.push(call);
            let transfer = state
                .transfers
                .get_mut(&handle)
                .ok_or(EngineError::UnknownHandle(handle))?;
            match change(transfer.status) {
                Some((status, kind)) => {
                    transfer.status = status;
                    Some(kind)
                }
                None => None,
            }
        };

        if let Some(kind) = echo {
            self.shared.dispatch(EngineEvent::new(handle, kind));
        }
        Ok(())
    }

    fn drain(&self, call: EngineCall) -> EngineResult<()> {
        let mut handles: Vec<EngineHandle> = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(EngineError::Closed);
            }
            state.calls.push(call);
            state.transfers.drain().map(|(handle, _)| handle).collect()
        };
        handles.sort_unstable();

        for handle in handles {
            self.shared
                .dispatch(EngineEvent::new(handle, EngineEventKind::Removed));
        }
        Ok(())
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferEngine for InMemoryEngine {
    async fn enqueue(&self, request: TransferRequest) -> EngineResult<EngineHandle> {
        let mut gate = self.shared.gate.subscribe();
        while *gate.borrow_and_update() {
            if gate.changed().await.is_err() {
                break;
            }
        }

        let handle = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(EngineError::Closed);
            }
            if let Some(reason) = state.reject_next.take() {
                return Err(EngineError::Rejected(reason));
            }
            let handle = state.next_handle;
            state.next_handle += 1;
            state.transfers.insert(
                handle,
                Transfer {
                    request: Some(request),
                    status: EngineStatus::Queued,
                    downloaded: 0,
                },
            );
            handle
        };
        debug!("Accepted transfer {}", handle);

        if let Some(profile) = self.shared.simulation {
            tokio::spawn(run_simulation(Arc::clone(&self.shared), handle, profile));
        }
        Ok(handle)
    }

    fn pause(&self, handle: EngineHandle) -> EngineResult<()> {
        self.control(EngineCall::Pause(handle), handle, |status| match status {
            EngineStatus::Queued | EngineStatus::Downloading => {
                Some((EngineStatus::Paused, EngineEventKind::Paused))
            }
            _ => None,
        })
    }

    fn resume(&self, handle: EngineHandle) -> EngineResult<()> {
        self.control(EngineCall::Resume(handle), handle, |status| match status {
            EngineStatus::Paused => Some((EngineStatus::Downloading, EngineEventKind::Resumed)),
            _ => None,
        })
    }

    fn delete(&self, handle: EngineHandle) -> EngineResult<()> {
        let existed = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(EngineError::Closed);
            }
            state.calls.push(EngineCall::Delete(handle));
            state.transfers.remove(&handle).is_some()
        };

        if existed {
            self.shared
                .dispatch(EngineEvent::new(handle, EngineEventKind::Removed));
        } else {
            debug!("Delete for unknown transfer {}", handle);
        }
        Ok(())
    }

    fn remove_all(&self) -> EngineResult<()> {
        self.drain(EngineCall::RemoveAll)
    }

    fn delete_all(&self) -> EngineResult<()> {
        self.drain(EngineCall::DeleteAll)
    }

    fn set_concurrent_limit(&self, limit: u32) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(EngineError::Closed);
        }
        state.calls.push(EngineCall::SetConcurrentLimit(limit));
        state.concurrent_limit = limit;
        Ok(())
    }

    async fn list_by_status(&self, status: EngineStatus) -> EngineResult<Vec<EngineHandle>> {
        let state = self.shared.state.lock();
        let mut handles: Vec<EngineHandle> = state
            .transfers
            .iter()
            .filter(|(_, t)| t.status == status)
            .map(|(handle, _)| *handle)
            .collect();
        handles.sort_unstable();
        Ok(handles)
    }

    fn subscribe(&self, callback: EngineEventCallback) {
        self.shared.listeners.write().push(callback);
    }

    fn unsubscribe(&self) {
        self.shared.listeners.write().clear();
    }

    fn close(&self) {
        let mut state = self.shared.state.lock();
        if !state.closed {
            state.closed = true;
            state.calls.push(EngineCall::Close);
        }
    }

    fn engine_name(&self) -> &'static str {
        "in-memory"
    }
}

/// Drive one transfer until it completes or disappears
async fn run_simulation(
    shared: Arc<EngineShared>,
    handle: EngineHandle,
    profile: SimulationProfile,
) {
    let mut ticker = tokio::time::interval(profile.tick);
    ticker.tick().await;
    shared.dispatch(EngineEvent::new(
        handle,
        EngineEventKind::Queued {
            waiting_on_network: false,
        },
    ));

    let bytes_per_second = profile.bytes_per_second();
    loop {
        ticker.tick().await;

        let (kind, done) = {
            let mut state = shared.state.lock();
            let Some(transfer) = state.transfers.get_mut(&handle) else {
                debug!("Simulated transfer {} is gone", handle);
                return;
            };
            match transfer.status {
                EngineStatus::Queued => {
                    transfer.status = EngineStatus::Downloading;
                    (EngineEventKind::Started, false)
                }
                EngineStatus::Paused => continue,
                EngineStatus::Downloading => {
                    transfer.downloaded =
                        (transfer.downloaded + profile.chunk_bytes).min(profile.total_bytes);
                    let done = transfer.downloaded >= profile.total_bytes;
                    if done {
                        transfer.status = EngineStatus::Completed;
                    }
                    let remaining = profile.total_bytes - transfer.downloaded;
                    let eta_ms = if bytes_per_second > 0 {
                        remaining.saturating_mul(1000) / bytes_per_second
                    } else {
                        0
                    };
                    let progress = if profile.total_bytes > 0 {
                        transfer.downloaded * 100 / profile.total_bytes
                    } else {
                        100
                    };
                    (
                        EngineEventKind::Progress(ProgressReport {
                            progress: progress as i32,
                            eta_ms: eta_ms as i64,
                            bytes_per_second: bytes_per_second as i64,
                            downloaded: transfer.downloaded as i64,
                            total: profile.total_bytes as i64,
                        }),
                        done,
                    )
                }
                _ => return,
            }
        };

        shared.dispatch(EngineEvent::new(handle, kind));
        if done {
            shared.dispatch(EngineEvent::new(handle, EngineEventKind::Completed));
            return;
        }
    }
}
