//! Pending Event Buffer
//!
//! Holds engine events whose handle cannot be resolved yet. The engine's
//! acceptance callback and its event stream travel on independent paths, so an
//! event for a fresh handle may arrive before the handle is attached to a
//! caller id. Such events wait here and are replayed once after attachment.

use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::engine::{EngineEventKind, EngineHandle};

#[derive(Debug, Clone)]
struct BufferedEvent {
    kind: EngineEventKind,
    received_at: Instant,
}

/// Short-lived per-handle event buffer
#[derive(Debug)]
pub struct PendingEvents {
    by_handle: HashMap<EngineHandle, VecDeque<BufferedEvent>>,
    ttl: Duration,
    per_handle_cap: usize,
    max_handles: usize,
}

impl PendingEvents {
    pub fn new(ttl: Duration, per_handle_cap: usize, max_handles: usize) -> Self {
        Self {
            by_handle: HashMap::new(),
            ttl,
            per_handle_cap: per_handle_cap.max(1),
            max_handles: max_handles.max(1),
        }
    }

    /// Buffer an event for a handle nobody has claimed yet
    pub fn push(&mut self, handle: EngineHandle, kind: EngineEventKind, now: Instant) {
        self.prune(now);

        if !self.by_handle.contains_key(&handle) && self.by_handle.len() >= self.max_handles {
            let oldest = self
                .by_handle
                .iter()
                .filter_map(|(h, q)| q.front().map(|e| (*h, e.received_at)))
                .min_by_key(|(_, at)| *at)
                .map(|(h, _)| h);
            if let Some(oldest) = oldest {
                let dropped = self.by_handle.remove(&oldest).map_or(0, |q| q.len());
                warn!(
                    "Pending buffer full, dropping {} event(s) for handle {}",
                    dropped, oldest
                );
            }
        }

        let name = kind.name();
        let queue = self.by_handle.entry(handle).or_default();
        if queue.len() >= self.per_handle_cap {
            if let Some(dropped) = queue.pop_front() {
                warn!(
                    "Pending buffer for handle {} full, dropping '{}'",
                    handle,
                    dropped.kind.name()
                );
            }
        }
        queue.push_back(BufferedEvent {
            kind,
            received_at: now,
        });
        debug!("Buffered '{}' for unattached handle {}", name, handle);
    }

    /// Remove and return the events to replay for a freshly attached handle
    ///
    /// Events received before `since` belong to an earlier transfer that used
    /// the same handle; they are discarded along with expired ones.
    pub fn take(
        &mut self,
        handle: EngineHandle,
        since: Instant,
        now: Instant,
    ) -> Vec<EngineEventKind> {
        let Some(queue) = self.by_handle.remove(&handle) else {
            return Vec::new();
        };

        let total = queue.len();
        let replay: Vec<EngineEventKind> = queue
            .into_iter()
            .filter(|e| e.received_at >= since && !self.is_expired(e, now))
            .map(|e| e.kind)
            .collect();

        if replay.len() < total {
            warn!(
                "Discarded {} stale event(s) for handle {}",
                total - replay.len(),
                handle
            );
        }
        replay
    }

    /// Drop expired events, returning how many were dropped
    pub fn prune(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let mut dropped = 0;
        self.by_handle.retain(|handle, queue| {
            let before = queue.len();
            queue.retain(|e| now.saturating_duration_since(e.received_at) <= ttl);
            let expired = before - queue.len();
            if expired > 0 {
                debug!("Dropped {} expired event(s) for stray handle {}", expired, handle);
                dropped += expired;
            }
            !queue.is_empty()
        });
        dropped
    }

    fn is_expired(&self, event: &BufferedEvent, now: Instant) -> bool {
        now.saturating_duration_since(event.received_at) > self.ttl
    }

    pub fn clear(&mut self) {
        self.by_handle.clear();
    }

    /// Number of buffered events across all handles
    pub fn len(&self) -> usize {
        self.by_handle.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> PendingEvents {
        PendingEvents::new(Duration::from_secs(5), 4, 2)
    }

    #[test]
    fn test_take_replays_in_order() {
        let mut pending = buffer();
        let t0 = Instant::now();
        pending.push(1, EngineEventKind::Started, t0);
        pending.push(1, EngineEventKind::Paused, t0 + Duration::from_millis(10));
        pending.push(2, EngineEventKind::Completed, t0);

        let replay = pending.take(1, t0, t0 + Duration::from_secs(1));
        assert_eq!(replay, vec![EngineEventKind::Started, EngineEventKind::Paused]);
        assert!(pending.take(1, t0, t0 + Duration::from_secs(1)).is_empty());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_expired_events_are_never_replayed() {
        let mut pending = buffer();
        let t0 = Instant::now();
        pending.push(1, EngineEventKind::Started, t0);
        pending.push(1, EngineEventKind::Paused, t0 + Duration::from_secs(4));

        let replay = pending.take(1, t0, t0 + Duration::from_secs(6));
        assert_eq!(replay, vec![EngineEventKind::Paused]);
    }

    #[test]
    fn test_events_older_than_submission_are_discarded() {
        let mut pending = buffer();
        let t0 = Instant::now();
        pending.push(1, EngineEventKind::Completed, t0);

        let submitted = t0 + Duration::from_millis(50);
        pending.push(1, EngineEventKind::Started, submitted + Duration::from_millis(1));

        let replay = pending.take(1, submitted, submitted + Duration::from_millis(10));
        assert_eq!(replay, vec![EngineEventKind::Started]);
    }

    #[test]
    fn test_prune_drops_stray_handles() {
        let mut pending = buffer();
        let t0 = Instant::now();
        pending.push(9, EngineEventKind::Completed, t0);
        assert_eq!(pending.prune(t0 + Duration::from_secs(10)), 1);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_caps_bound_the_buffer() {
        let mut pending = buffer();
        let t0 = Instant::now();
        for i in 0..6 {
            pending.push(1, EngineEventKind::Started, t0 + Duration::from_millis(i));
        }
        assert_eq!(pending.len(), 4);

        pending.push(2, EngineEventKind::Started, t0 + Duration::from_millis(10));
        pending.push(3, EngineEventKind::Started, t0 + Duration::from_millis(11));
        // handle 1 held the oldest event and was evicted
        assert!(pending.take(1, t0, t0 + Duration::from_millis(20)).is_empty());
        assert_eq!(pending.len(), 2);
    }
}
