//! Download Manager
//!
//! Owns the transfer engine and its single event subscription, keeps caller
//! ids and engine handles in step, and republishes engine events as
//! session-keyed [`DownloadEvent`]s.
//!
//! Two actors touch the registry: the caller's thread and the engine's event
//! thread. Every registry mutation and every notification happens under the
//! registry lock, so notifications leave in the order their transitions were
//! applied. The lock is never held across an engine call because engines may
//! deliver events from inside `pause`/`delete`.

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::broadcast;
use url::Url;

use super::events::DownloadEvent;
use super::pending::PendingEvents;
use super::registry::{AttachOutcome, IdentifierRegistry, RegistryState};
use super::state::{SessionInfo, SessionState};
use crate::config::{sentinel, ManagerConfig};
use crate::engine::{
    EngineConfig, EngineEvent, EngineEventKind, EngineFactory, EngineHandle, EngineStatus,
    NetworkConstraint, TransferEngine, TransferRequest,
};
use crate::error::{DownloadError, DownloadResult, EngineResult};

/// State shared with the engine callback and submission tasks
struct Shared {
    registry: IdentifierRegistry,
    engine: RwLock<Option<Arc<dyn TransferEngine>>>,
    network: RwLock<NetworkConstraint>,
    auto_convert_units: AtomicBool,
    event_tx: broadcast::Sender<DownloadEvent>,
}

impl Shared {
    fn engine(&self) -> Option<Arc<dyn TransferEngine>> {
        self.engine.read().clone()
    }

    fn emit(&self, event: DownloadEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }

    fn emit_error(&self, id: &str, err: &DownloadError) {
        self.emit(DownloadEvent::error(id, err));
    }

    /// Entry point for every raw engine event
    fn handle_engine_event(&self, event: EngineEvent) {
        let mut registry = self.registry.lock();
        match registry.resolve_by_handle(event.handle) {
            Some(id) => self.apply_locked(&mut registry, &id, &event.kind),
            None => registry
                .pending_mut()
                .push(event.handle, event.kind, Instant::now()),
        }
    }

    /// Run one event through a session's state machine and publish the result
    fn apply_locked(&self, registry: &mut RegistryState, id: &str, kind: &EngineEventKind) {
        let convert_units = self.auto_convert_units.load(Ordering::Relaxed);
        let Some(session) = registry.get_mut(id) else {
            debug!("Dropping '{}' for unknown download {}", kind.name(), id);
            return;
        };

        match session.apply(kind) {
            Ok(status) => {
                let notification = DownloadEvent::from_applied(session, kind, convert_units);
                if status.is_terminal() {
                    registry.remove(id);
                    info!("Download {} finished: {}", id, status);
                }
                self.emit(notification);
            }
            Err(rejected) => debug!("Ignoring engine event for {}: {}", id, rejected),
        }
    }

    /// Outcome of an asynchronous enqueue made for reservation `generation`
    ///
    /// `engine` is the client the request went to; it is used for cleanup even
    /// when the manager has been shut down in the meantime.
    fn complete_submission(
        &self,
        id: &str,
        generation: u64,
        engine: &dyn TransferEngine,
        outcome: EngineResult<EngineHandle>,
    ) {
        let handle = match outcome {
            Ok(handle) => handle,
            Err(err) => {
                let mut registry = self.registry.lock();
                if registry.generation(id) == Some(generation) {
                    registry.remove(id);
                    warn!("Engine rejected download {}: {}", id, err);
                    self.emit_error(id, &DownloadError::from(err));
                } else {
                    debug!("Rejection for {} arrived after it was removed: {}", id, err);
                }
                return;
            }
        };

        let orphaned = {
            let mut registry = self.registry.lock();
            match registry.attach_handle(id, generation, handle) {
                AttachOutcome::Attached => {
                    self.apply_locked(
                        &mut registry,
                        id,
                        &EngineEventKind::Queued {
                            waiting_on_network: false,
                        },
                    );
                    self.replay_locked(&mut registry, id, handle);
                    false
                }
                AttachOutcome::Missing => {
                    info!("Cancelling transfer {}: {} was removed before acceptance", handle, id);
                    true
                }
                AttachOutcome::HandleInUse(owner) => {
                    if registry.generation(id) == Some(generation) {
                        registry.remove(id);
                        self.emit_error(
                            id,
                            &DownloadError::EngineError(format!(
                                "engine handle {} already belongs to {}",
                                handle, owner
                            )),
                        );
                    }
                    true
                }
            }
        };

        if orphaned {
            if let Err(err) = engine.delete(handle) {
                warn!("Could not cancel orphaned transfer {}: {}", handle, err);
            }
        }
    }

    /// Replay events that arrived before `handle` was attached to `id`
    fn replay_locked(&self, registry: &mut RegistryState, id: &str, handle: EngineHandle) {
        let Some(submitted_at) = registry.get(id).map(|s| s.submitted_at) else {
            return;
        };
        let replay = registry
            .pending_mut()
            .take(handle, submitted_at, Instant::now());
        if !replay.is_empty() {
            debug!("Replaying {} buffered event(s) for {}", replay.len(), id);
        }

        for kind in replay {
            if registry.get(id).is_none() {
                debug!("Download {} ended during replay, dropping '{}'", id, kind.name());
                continue;
            }
            self.apply_locked(registry, id, &kind);
        }
    }

    /// Release a cancelled id unless the engine's own event already did
    ///
    /// `Cancelled` is only announced when the engine took the delete request;
    /// otherwise the id is dropped quietly and the caller sees the error.
    fn release_cancelled(&self, id: &str, handle: EngineHandle, announce: bool) {
        let mut registry = self.registry.lock();
        if registry.resolve_by_id(id) == Some(handle) {
            registry.remove(id);
            if announce {
                info!("Cancelled download {}", id);
                self.emit(DownloadEvent::Cancelled { id: id.to_string() });
            } else {
                warn!("Released download {} after the engine refused to cancel it", id);
            }
        }
    }

    /// Clear the registry, announcing every session it held
    fn clear_sessions(&self) -> usize {
        let mut registry = self.registry.lock();
        let mut cleared = registry.clear();
        cleared.sort_by(|a, b| a.id.cmp(&b.id));
        for session in &cleared {
            self.emit(DownloadEvent::Cancelled {
                id: session.id.clone(),
            });
        }
        cleared.len()
    }
}

/// Download manager - caller-keyed sessions on top of a handle-based engine
pub struct DownloadManager {
    shared: Arc<Shared>,
    factory: Arc<dyn EngineFactory>,
    /// Serializes `initialize` so the engine is subscribed exactly once
    init_lock: tokio::sync::Mutex<()>,
}

impl DownloadManager {
    /// Create a manager with default configuration
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self::with_config(factory, &ManagerConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(factory: Arc<dyn EngineFactory>, config: &ManagerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let pending = PendingEvents::new(
            config.pending_event_ttl(),
            config.max_pending_events_per_handle,
            config.max_pending_handles,
        );

        Self {
            shared: Arc::new(Shared {
                registry: IdentifierRegistry::new(pending),
                engine: RwLock::new(None),
                network: RwLock::new(config.network),
                auto_convert_units: AtomicBool::new(config.auto_convert_units),
                event_tx,
            }),
            factory,
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Subscribe to download notifications
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Construct the engine, purge orphaned transfers and subscribe to events
    ///
    /// Failures are published as `ErrorOccurred("Initialize", ..)`. Calling
    /// this again on a live engine only updates the settings.
    pub async fn initialize(
        &self,
        concurrency_limit: u32,
        network: NetworkConstraint,
        auto_convert_units: bool,
    ) {
        let _guard = self.init_lock.lock().await;

        if concurrency_limit == 0 {
            let err =
                DownloadError::InvalidRequest("concurrency limit must be at least 1".to_string());
            error!("Initialize failed: {}", err);
            self.shared.emit_error(sentinel::INITIALIZE, &err);
            return;
        }
        *self.shared.network.write() = network;
        self.shared
            .auto_convert_units
            .store(auto_convert_units, Ordering::Relaxed);

        if let Some(engine) = self.shared.engine() {
            match engine.set_concurrent_limit(concurrency_limit) {
                Ok(()) => info!(
                    "Downloader already initialized, concurrency limit now {}",
                    concurrency_limit
                ),
                Err(err) => {
                    error!("Could not update concurrency limit: {}", err);
                    self.shared
                        .emit_error(sentinel::INITIALIZE, &DownloadError::from(err));
                }
            }
            return;
        }

        let config = EngineConfig {
            concurrent_limit: concurrency_limit,
            auto_start: false,
        };
        let engine = match self.factory.create(&config) {
            Ok(engine) => engine,
            Err(err) => {
                error!("Failed to construct transfer engine: {}", err);
                self.shared
                    .emit_error(sentinel::INITIALIZE, &DownloadError::from(err));
                return;
            }
        };

        Self::purge_orphans(engine.as_ref()).await;

        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        engine.subscribe(Arc::new(move |event: EngineEvent| {
            if let Some(shared) = shared.upgrade() {
                shared.handle_engine_event(event);
            }
        }));

        info!(
            "Downloader initialized ({} engine, limit={}, network={})",
            engine.engine_name(),
            concurrency_limit,
            network
        );
        *self.shared.engine.write() = Some(engine);
    }

    /// [`initialize`](Self::initialize) with values from a config
    pub async fn initialize_from_config(&self, config: &ManagerConfig) {
        self.initialize(
            config.concurrency_limit,
            config.network,
            config.auto_convert_units,
        )
        .await;
    }

    /// Transfers still marked downloading belong to a run that did not shut
    /// down cleanly; nobody is listening for them anymore.
    async fn purge_orphans(engine: &dyn TransferEngine) {
        match engine.list_by_status(EngineStatus::Downloading).await {
            Ok(handles) if handles.is_empty() => debug!("No orphaned transfers"),
            Ok(handles) => {
                warn!(
                    "Cancelling {} orphaned transfer(s) from a previous run",
                    handles.len()
                );
                for handle in handles {
                    if let Err(err) = engine.delete(handle) {
                        warn!("Could not cancel orphaned transfer {}: {}", handle, err);
                    }
                }
            }
            Err(err) => warn!("Could not list in-flight transfers: {}", err),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.engine.read().is_some()
    }

    /// Network constraint captured by downloads submitted from now on
    pub fn set_network_constraint(&self, network: NetworkConstraint) {
        *self.shared.network.write() = network;
        debug!("Network constraint set to {}", network);
    }

    pub fn network_constraint(&self) -> NetworkConstraint {
        *self.shared.network.read()
    }

    /// Register a download under `id` and submit it to the engine
    ///
    /// Returns once the request is submitted; acceptance is announced with
    /// `Queued`, rejection with `ErrorOccurred(id, ..)`.
    pub fn download_file(
        &self,
        id: &str,
        destination: impl AsRef<Path>,
        url: &str,
    ) -> DownloadResult<()> {
        let result = self.submit(id, destination.as_ref(), url);
        if let Err(err) = &result {
            warn!("DownloadFile {} failed: {}", id, err);
            self.shared.emit_error(sentinel::DOWNLOAD_FILE, err);
        }
        result
    }

    fn submit(&self, id: &str, destination: &Path, url: &str) -> DownloadResult<()> {
        let engine = self.shared.engine().ok_or(DownloadError::NotInitialized)?;
        if id.trim().is_empty() {
            return Err(DownloadError::InvalidRequest(
                "download id must not be empty".to_string(),
            ));
        }
        if destination.as_os_str().is_empty() {
            return Err(DownloadError::InvalidRequest(
                "destination path must not be empty".to_string(),
            ));
        }
        let url = Url::parse(url)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DownloadError::EngineError(format!("no async runtime: {}", e)))?;

        let network = self.network_constraint();
        let generation = self.shared.registry.reserve(SessionState::new(id, network))?;

        let request = TransferRequest {
            url: url.to_string(),
            destination: destination.to_path_buf(),
            network,
            auto_retry_attempts: 0,
        };
        debug!("Submitting {} -> {}", request.url, request.destination.display());

        let shared = Arc::clone(&self.shared);
        let id = id.to_string();
        runtime.spawn(async move {
            let outcome = engine.enqueue(request).await;
            shared.complete_submission(&id, generation, engine.as_ref(), outcome);
        });
        Ok(())
    }

    /// Ask the engine to pause a download
    pub fn pause(&self, id: &str) -> DownloadResult<()> {
        self.control(sentinel::PAUSE, id, |engine, handle| engine.pause(handle))
    }

    /// Ask the engine to resume a paused download
    pub fn resume(&self, id: &str) -> DownloadResult<()> {
        self.control(sentinel::RESUME, id, |engine, handle| engine.resume(handle))
    }

    /// Cancel a download and release its id immediately
    ///
    /// Anything the engine still reports for the old handle is dropped.
    pub fn cancel(&self, id: &str) -> DownloadResult<()> {
        self.control(sentinel::CANCEL, id, |engine, handle| {
            let requested = engine.delete(handle);
            self.shared.release_cancelled(id, handle, requested.is_ok());
            requested
        })
    }

    fn control(
        &self,
        operation: &str,
        id: &str,
        request: impl FnOnce(&dyn TransferEngine, EngineHandle) -> EngineResult<()>,
    ) -> DownloadResult<()> {
        let result = self.target(id).and_then(|(engine, handle)| {
            request(engine.as_ref(), handle).map_err(DownloadError::from)
        });
        if let Err(err) = &result {
            warn!("{} {} failed: {}", operation, id, err);
            self.shared.emit_error(operation, err);
        }
        result
    }

    fn target(&self, id: &str) -> DownloadResult<(Arc<dyn TransferEngine>, EngineHandle)> {
        let engine = self.shared.engine().ok_or(DownloadError::NotInitialized)?;
        let handle = self
            .shared
            .registry
            .lock()
            .get(id)
            .filter(|s| s.is_controllable())
            .and_then(|s| s.engine_handle)
            .ok_or_else(|| DownloadError::NotFound(id.to_string()))?;
        Ok((engine, handle))
    }

    /// Cancel every download and clear the registry
    pub fn cancel_all_downloads(&self) -> DownloadResult<()> {
        self.bulk(sentinel::CANCEL_ALL, |engine, handles| {
            for handle in handles {
                if let Err(err) = engine.delete(handle) {
                    warn!("Could not cancel transfer {}: {}", handle, err);
                }
            }
            engine.remove_all()
        })
    }

    /// Delete every download including its files, and clear the registry
    pub fn delete_all_downloads(&self) -> DownloadResult<()> {
        self.bulk(sentinel::DELETE_ALL, |engine, _| engine.delete_all())
    }

    fn bulk(
        &self,
        operation: &str,
        request: impl FnOnce(&dyn TransferEngine, Vec<EngineHandle>) -> EngineResult<()>,
    ) -> DownloadResult<()> {
        let requested = match self.shared.engine() {
            Some(engine) => {
                let handles = self.shared.registry.lock().handles();
                request(engine.as_ref(), handles).map_err(DownloadError::from)
            }
            None => Err(DownloadError::NotInitialized),
        };

        // Engine-side removal may still be in flight; the registry is emptied regardless
        let cleared = self.shared.clear_sessions();
        info!("{}: cleared {} download(s)", operation, cleared);

        if let Err(err) = &requested {
            warn!("{} failed: {}", operation, err);
            self.shared.emit_error(operation, err);
        }
        requested
    }

    /// Total size in bytes from the last notification; 0 while unknown
    pub fn file_size(&self, id: &str) -> DownloadResult<u64> {
        self.read_session(id, |s| s.total_bytes.unwrap_or(0))
    }

    /// Percent complete from the last notification
    pub fn progress(&self, id: &str) -> DownloadResult<u8> {
        self.read_session(id, |s| s.progress)
    }

    /// Downloaded bytes from the last notification
    pub fn downloaded_size(&self, id: &str) -> DownloadResult<u64> {
        self.read_session(id, |s| s.downloaded_bytes)
    }

    fn read_session<T>(
        &self,
        id: &str,
        read: impl FnOnce(&SessionState) -> T,
    ) -> DownloadResult<T> {
        self.shared
            .registry
            .lock()
            .get(id)
            .map(read)
            .ok_or_else(|| DownloadError::NotFound(id.to_string()))
    }

    pub fn session(&self, id: &str) -> Option<SessionInfo> {
        self.shared.registry.session(id)
    }

    /// Every registered download, ordered by id
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.shared.registry.sessions()
    }

    pub fn active_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Cancel what is still running, clear the registry and close the engine
    ///
    /// Cancellation is fire-and-forget. Calling this twice is a no-op.
    pub fn shutdown(&self) {
        let Some(engine) = self.shared.engine.write().take() else {
            debug!("Downloader already shut down");
            return;
        };
        info!("Shutting down downloader...");

        engine.unsubscribe();
        let sessions = self.shared.registry.clear();
        let mut cancelled = 0;
        for session in sessions.iter().filter(|s| !s.status.is_terminal()) {
            if let Some(handle) = session.engine_handle {
                match engine.delete(handle) {
                    Ok(()) => cancelled += 1,
                    Err(err) => warn!("Could not cancel {} on shutdown: {}", session.id, err),
                }
            }
        }
        engine.close();

        info!("Downloader shut down, {} transfer(s) cancelled", cancelled);
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
