//! Thread-safe (ticket-id, phase) -> status map (spec §3, §4.5).
//!
//! Process-local and non-persistent: labels on the ticket source remain the
//! canonical source of truth across restarts (spec §9).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::ticket::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PhaseEntry {
    pub status: PhaseStatus,
    pub transitioned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct Inner {
    entries: HashMap<(u64, Phase), PhaseEntry>,
}

/// Cheaply-cloneable handle around a single mutex-protected table, matching
/// the single-mutex discipline called out in spec §5.
#[derive(Clone)]
pub struct PhaseStateTable {
    inner: Arc<Mutex<Inner>>,
}

impl Default for PhaseStateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseStateTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn set(&self, id: u64, phase: Phase, status: PhaseStatus, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("phase state mutex poisoned");
        inner.entries.insert(
            (id, phase),
            PhaseEntry {
                status,
                transitioned_at: now,
            },
        );
    }

    pub fn get(&self, id: u64, phase: Phase) -> Option<PhaseEntry> {
        let inner = self.inner.lock().expect("phase state mutex poisoned");
        inner.entries.get(&(id, phase)).cloned()
    }

    pub fn has_been_processed(&self, id: u64, phase: Phase) -> bool {
        matches!(
            self.get(id, phase).map(|e| e.status),
            Some(PhaseStatus::Completed)
        )
    }

    /// True iff any phase for this ticket is `processing` (spec §4.5).
    pub fn is_processing(&self, id: u64) -> bool {
        let inner = self.inner.lock().expect("phase state mutex poisoned");
        inner
            .entries
            .iter()
            .any(|((tid, _), entry)| *tid == id && entry.status == PhaseStatus::Processing)
    }

    pub fn mark_completed(&self, id: u64, phase: Phase, now: DateTime<Utc>) {
        self.set(id, phase, PhaseStatus::Completed, now);
    }

    pub fn mark_failed(&self, id: u64, phase: Phase, now: DateTime<Utc>) {
        self.set(id, phase, PhaseStatus::Failed, now);
    }

    /// Drops every phase-state entry for a ticket (called by the sweeper).
    pub fn clear(&self, id: u64) {
        let mut inner = self.inner.lock().expect("phase state mutex poisoned");
        inner.entries.retain(|(tid, _), _| *tid != id);
    }
}
