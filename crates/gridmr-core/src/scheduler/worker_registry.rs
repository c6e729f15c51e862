//! Worker registry entries and liveness bookkeeping

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::scheduler::task::AttemptId;

/// Unique worker identifier
pub type WorkerId = Uuid;

/// Worker liveness as seen by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Heartbeating normally; eligible for dispatch
    Alive,

    /// Silent past `heartbeat_timeout`; no new dispatches, existing
    /// attempts keep running
    Suspect,

    /// Silent past `dead_timeout`; its attempts were timed out and requeued
    Dead,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liveness::Alive => write!(f, "alive"),
            Liveness::Suspect => write!(f, "suspect"),
            Liveness::Dead => write!(f, "dead"),
        }
    }
}

/// One registered worker process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerEntry {
    /// Unique worker ID
    pub id: WorkerId,

    /// Base URL tasks are dispatched to
    pub endpoint: String,

    /// Concurrent task slots
    pub capacity: usize,

    /// Attempts the scheduler believes this worker is running
    pub in_flight: HashSet<AttemptId>,

    /// Last heartbeat or registration (unix millis)
    pub last_heartbeat_at: i64,

    /// Current liveness
    pub liveness: Liveness,

    /// Attempt ids to hand back in the next heartbeat reply
    pub pending_cancellations: Vec<AttemptId>,
}

impl WorkerEntry {
    /// Register a new worker
    pub fn new(endpoint: impl Into<String>, capacity: usize, now_ms: i64) -> Self {
        Self {
            id: WorkerId::new_v4(),
            endpoint: endpoint.into(),
            capacity: capacity.max(1),
            in_flight: HashSet::new(),
            last_heartbeat_at: now_ms,
            liveness: Liveness::Alive,
            pending_cancellations: Vec::new(),
        }
    }

    /// Spare slots right now
    pub fn spare_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.in_flight.len())
    }

    /// Whether the worker may receive a new attempt
    pub fn is_dispatchable(&self) -> bool {
        self.liveness == Liveness::Alive && self.spare_capacity() > 0
    }

    /// Record a heartbeat, reviving Suspect workers
    pub fn touch(&mut self, now_ms: i64) {
        self.last_heartbeat_at = now_ms;
        if self.liveness == Liveness::Suspect {
            self.liveness = Liveness::Alive;
        }
    }

    /// Time since the last heartbeat
    pub fn silent_for_ms(&self, now_ms: i64) -> u64 {
        (now_ms - self.last_heartbeat_at).max(0) as u64
    }

    /// Queue a cancellation for delivery on the next heartbeat
    pub fn push_cancellation(&mut self, attempt_id: AttemptId) {
        if !self.pending_cancellations.contains(&attempt_id) {
            self.pending_cancellations.push(attempt_id);
        }
    }

    /// Take the queued cancellations for a heartbeat reply
    pub fn drain_cancellations(&mut self) -> Vec<AttemptId> {
        std::mem::take(&mut self.pending_cancellations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_accounting() {
        let mut worker = WorkerEntry::new("http://w1:8071", 2, 0);
        assert!(worker.is_dispatchable());
        assert_eq!(worker.spare_capacity(), 2);

        worker.in_flight.insert(AttemptId::new_v4());
        worker.in_flight.insert(AttemptId::new_v4());
        assert_eq!(worker.spare_capacity(), 0);
        assert!(!worker.is_dispatchable());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let worker = WorkerEntry::new("http://w1:8071", 0, 0);
        assert_eq!(worker.capacity, 1);
    }

    #[test]
    fn test_touch_revives_suspect() {
        let mut worker = WorkerEntry::new("http://w1:8071", 1, 0);
        worker.liveness = Liveness::Suspect;

        worker.touch(5_000);
        assert_eq!(worker.liveness, Liveness::Alive);
        assert_eq!(worker.silent_for_ms(7_500), 2_500);
    }

    #[test]
    fn test_dead_not_dispatchable() {
        let mut worker = WorkerEntry::new("http://w1:8071", 1, 0);
        worker.liveness = Liveness::Dead;
        assert!(!worker.is_dispatchable());
    }

    #[test]
    fn test_cancellations_deduplicate_and_drain() {
        let mut worker = WorkerEntry::new("http://w1:8071", 1, 0);
        let attempt = AttemptId::new_v4();

        worker.push_cancellation(attempt);
        worker.push_cancellation(attempt);
        assert_eq!(worker.pending_cancellations.len(), 1);

        assert_eq!(worker.drain_cancellations(), vec![attempt]);
        assert!(worker.drain_cancellations().is_empty());
    }
}
