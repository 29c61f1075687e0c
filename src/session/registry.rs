//! Identifier Registry
//!
//! Bidirectional index between caller ids and engine handles, plus the
//! per-id session record and the buffer of not-yet-resolvable events.
//!
//! Everything lives behind one mutex so that resolving a handle, buffering an
//! event and attaching a handle can never interleave. Callers that need
//! several steps to happen atomically take the lock once via
//! [`IdentifierRegistry::lock`] and use the [`RegistryState`] methods.

use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;

use super::pending::PendingEvents;
use super::state::{SessionInfo, SessionState};
use crate::engine::EngineHandle;
use crate::error::{DownloadError, DownloadResult};

/// Result of attaching an engine handle to a reserved id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    /// The reservation the request was made for is gone: the id was removed,
    /// or reserved again, before the engine acknowledged the request
    Missing,
    /// The handle is already bound to another live id
    HandleInUse(String),
}

/// Registry contents; only reachable through the registry lock
#[derive(Debug)]
pub struct RegistryState {
    /// caller id -> session
    sessions: HashMap<String, SessionState>,
    /// engine handle -> caller id
    handles: HashMap<EngineHandle, String>,
    /// Events waiting for their handle to be attached
    pending: PendingEvents,
    next_generation: u64,
}

impl RegistryState {
    /// Insert a placeholder with no handle, returning its generation
    pub fn reserve(&mut self, mut session: SessionState) -> DownloadResult<u64> {
        if self.sessions.contains_key(&session.id) {
            return Err(DownloadError::DuplicateId(session.id));
        }
        self.next_generation += 1;
        session.generation = self.next_generation;
        debug!("Reserved download id {} (generation {})", session.id, session.generation);
        self.sessions.insert(session.id.clone(), session);
        Ok(self.next_generation)
    }

    /// Complete the placeholder `generation` of `id` with the engine's handle
    ///
    /// A placeholder is completed at most once; an existing handle is never
    /// replaced.
    pub fn attach_handle(
        &mut self,
        id: &str,
        generation: u64,
        handle: EngineHandle,
    ) -> AttachOutcome {
        if let Some(owner) = self.handles.get(&handle) {
            warn!("Handle {} already belongs to {}, not attaching {}", handle, owner, id);
            return AttachOutcome::HandleInUse(owner.clone());
        }

        let session = match self.sessions.get_mut(id) {
            Some(session)
                if session.generation == generation && session.engine_handle.is_none() =>
            {
                session
            }
            Some(_) => {
                debug!("Download {} was reserved again before handle {} arrived", id, handle);
                return AttachOutcome::Missing;
            }
            None => {
                debug!("Download {} was removed before handle {} arrived", id, handle);
                return AttachOutcome::Missing;
            }
        };

        session.engine_handle = Some(handle);
        self.handles.insert(handle, id.to_string());
        AttachOutcome::Attached
    }

    /// Generation of the live reservation for `id`
    pub fn generation(&self, id: &str) -> Option<u64> {
        self.sessions.get(id).map(|s| s.generation)
    }

    pub fn resolve_by_handle(&self, handle: EngineHandle) -> Option<String> {
        self.handles.get(&handle).cloned()
    }

    /// Handle for an id; `None` until the engine has accepted the request
    pub fn resolve_by_id(&self, id: &str) -> Option<EngineHandle> {
        self.sessions.get(id).and_then(|s| s.engine_handle)
    }

    /// Erase both directions for an id
    pub fn remove(&mut self, id: &str) -> Option<SessionState> {
        let session = self.sessions.remove(id)?;
        if let Some(handle) = session.engine_handle {
            if self.handles.get(&handle).map(String::as_str) == Some(id) {
                self.handles.remove(&handle);
            }
        }
        Some(session)
    }

    /// Erase both directions for a handle
    pub fn remove_by_handle(&mut self, handle: EngineHandle) -> Option<SessionState> {
        let id = self.handles.remove(&handle)?;
        self.sessions.remove(&id)
    }

    /// Erase everything, returning the sessions that were registered
    pub fn clear(&mut self) -> Vec<SessionState> {
        self.handles.clear();
        self.pending.clear();
        self.sessions.drain().map(|(_, session)| session).collect()
    }

    /// Every attached handle
    pub fn handles(&self) -> Vec<EngineHandle> {
        let mut handles: Vec<EngineHandle> = self.handles.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    pub fn get(&self, id: &str) -> Option<&SessionState> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SessionState> {
        self.sessions.get_mut(id)
    }

    pub fn pending_mut(&mut self) -> &mut PendingEvents {
        &mut self.pending
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Concurrency-safe registry shared by the caller and the engine's event thread
#[derive(Debug)]
pub struct IdentifierRegistry {
    state: Mutex<RegistryState>,
}

impl IdentifierRegistry {
    pub fn new(pending: PendingEvents) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                sessions: HashMap::new(),
                handles: HashMap::new(),
                pending,
                next_generation: 0,
            }),
        }
    }

    /// Take the registry lock for a multi-step update
    pub fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock()
    }

    pub fn reserve(&self, session: SessionState) -> DownloadResult<u64> {
        self.lock().reserve(session)
    }

    pub fn attach_handle(
        &self,
        id: &str,
        generation: u64,
        handle: EngineHandle,
    ) -> AttachOutcome {
        self.lock().attach_handle(id, generation, handle)
    }

    pub fn resolve_by_handle(&self, handle: EngineHandle) -> Option<String> {
        self.lock().resolve_by_handle(handle)
    }

    pub fn resolve_by_id(&self, id: &str) -> Option<EngineHandle> {
        self.lock().resolve_by_id(id)
    }

    pub fn remove(&self, id: &str) -> Option<SessionState> {
        self.lock().remove(id)
    }

    pub fn remove_by_handle(&self, handle: EngineHandle) -> Option<SessionState> {
        self.lock().remove_by_handle(handle)
    }

    pub fn clear(&self) -> Vec<SessionState> {
        self.lock().clear()
    }

    /// Snapshot of one session
    pub fn session(&self, id: &str) -> Option<SessionInfo> {
        self.lock().get(id).map(SessionInfo::from)
    }

    /// Snapshot of every session, ordered by id
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let state = self.lock();
        let mut sessions: Vec<SessionInfo> =
            state.sessions.values().map(SessionInfo::from).collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NetworkConstraint;
    use std::sync::Arc;
    use std::time::Duration;

    fn registry() -> IdentifierRegistry {
        IdentifierRegistry::new(PendingEvents::new(Duration::from_secs(5), 16, 16))
    }

    fn session(id: &str) -> SessionState {
        SessionState::new(id, NetworkConstraint::Any)
    }

    fn assert_inverse(registry: &IdentifierRegistry) {
        let state = registry.lock();
        for (handle, id) in &state.handles {
            assert_eq!(state.sessions.get(id).and_then(|s| s.engine_handle), Some(*handle));
        }
        for (id, s) in &state.sessions {
            if let Some(handle) = s.engine_handle {
                assert_eq!(state.handles.get(&handle), Some(id));
            }
        }
    }

    #[test]
    fn test_reserve_and_attach() {
        let registry = registry();
        let generation = registry.reserve(session("a")).unwrap();
        assert_eq!(registry.resolve_by_id("a"), None);

        assert_eq!(registry.attach_handle("a", generation, 10), AttachOutcome::Attached);
        assert_eq!(registry.resolve_by_id("a"), Some(10));
        assert_eq!(registry.resolve_by_handle(10).as_deref(), Some("a"));
        assert_inverse(&registry);
    }

    #[test]
    fn test_duplicate_reserve() {
        let registry = registry();
        registry.reserve(session("a")).unwrap();
        assert_eq!(
            registry.reserve(session("a")),
            Err(DownloadError::DuplicateId("a".to_string()))
        );
    }

    #[test]
    fn test_attach_after_removal_is_missing() {
        let registry = registry();
        let generation = registry.reserve(session("a")).unwrap();
        registry.remove("a");
        assert_eq!(registry.attach_handle("a", generation, 3), AttachOutcome::Missing);
        assert_eq!(registry.resolve_by_handle(3), None);
    }

    #[test]
    fn test_attach_for_an_earlier_reservation_is_missing() {
        let registry = registry();
        let first = registry.reserve(session("x")).unwrap();
        registry.clear();
        let second = registry.reserve(session("x")).unwrap();
        assert_ne!(first, second);

        assert_eq!(registry.attach_handle("x", first, 1), AttachOutcome::Missing);
        assert_eq!(registry.resolve_by_id("x"), None);
        assert_eq!(registry.attach_handle("x", second, 2), AttachOutcome::Attached);
        assert_eq!(registry.resolve_by_id("x"), Some(2));
        assert_eq!(registry.resolve_by_handle(1), None);
        assert_inverse(&registry);
    }

    #[test]
    fn test_attach_never_replaces_a_handle() {
        let registry = registry();
        let generation = registry.reserve(session("a")).unwrap();
        registry.attach_handle("a", generation, 4);

        assert_eq!(registry.attach_handle("a", generation, 5), AttachOutcome::Missing);
        assert_eq!(registry.resolve_by_id("a"), Some(4));
        assert_eq!(registry.resolve_by_handle(5), None);
    }

    #[test]
    fn test_attach_refuses_bound_handle() {
        let registry = registry();
        let a = registry.reserve(session("a")).unwrap();
        let b = registry.reserve(session("b")).unwrap();
        registry.attach_handle("a", a, 5);
        assert_eq!(
            registry.attach_handle("b", b, 5),
            AttachOutcome::HandleInUse("a".to_string())
        );
        assert_eq!(registry.resolve_by_id("b"), None);
        assert_inverse(&registry);
    }

    #[test]
    fn test_remove_erases_both_directions() {
        let registry = registry();
        let a = registry.reserve(session("a")).unwrap();
        let b = registry.reserve(session("b")).unwrap();
        registry.attach_handle("a", a, 1);
        registry.attach_handle("b", b, 2);

        assert!(registry.remove("a").is_some());
        assert_eq!(registry.resolve_by_handle(1), None);

        let removed = registry.remove_by_handle(2).unwrap();
        assert_eq!(removed.id, "b");
        assert!(registry.session("b").is_none());
        assert!(registry.is_empty());

        registry.reserve(session("a")).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_clear() {
        let registry = registry();
        registry.reserve(session("a")).unwrap();
        let b = registry.reserve(session("b")).unwrap();
        registry.attach_handle("b", b, 2);

        let mut cleared: Vec<String> = registry.clear().into_iter().map(|s| s.id).collect();
        cleared.sort();
        assert_eq!(cleared, vec!["a", "b"]);
        assert_eq!(registry.resolve_by_handle(2), None);
        assert!(registry.sessions().is_empty());
    }

    #[test]
    fn test_concurrent_reserve_and_attach() {
        let registry = Arc::new(registry());
        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let id = format!("w{}-{}", worker, i);
                        let handle = (worker * 1000 + i) as EngineHandle;
                        let generation = registry.reserve(session(&id)).unwrap();
                        assert_eq!(
                            registry.attach_handle(&id, generation, handle),
                            AttachOutcome::Attached
                        );
                        if i % 2 == 0 {
                            registry.remove_by_handle(handle);
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(registry.len(), 8 * 25);
        assert_inverse(&registry);
    }
}
