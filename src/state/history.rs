//! Bounded per-hop history of probe outcomes.
//!
//! The hop table sits behind an `RwLock` that is only write-locked when hops
//! are added or the store is reset. Each hop's ring buffer has its own mutex,
//! so appending to one hop never waits on a reader of another hop and a reader
//! only ever sees a hop before or after a complete append.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use super::session::ProbeOutcome;
use crate::config::DEFAULT_HISTORY_CAPACITY;

/// Initial allocation per hop, grows up to capacity on demand
const INITIAL_ALLOCATION: usize = 1024;

/// Fixed-capacity FIFO of outcomes for one hop
#[derive(Debug, Clone)]
pub struct HopHistory {
    capacity: usize,
    entries: VecDeque<ProbeOutcome>,
}

impl HopHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(INITIAL_ALLOCATION)),
        }
    }

    /// Append an outcome, evicting the oldest one when full
    pub fn push(&mut self, outcome: ProbeOutcome) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(outcome);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProbeOutcome> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn to_vec(&self) -> Vec<ProbeOutcome> {
        self.entries.iter().cloned().collect()
    }
}

type SharedHopHistory = Arc<Mutex<HopHistory>>;

/// Thread-safe collection of [`HopHistory`] keyed by hop index
#[derive(Debug)]
pub struct HistoryStore {
    capacity: usize,
    hops: RwLock<BTreeMap<u8, SharedHopHistory>>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            hops: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create empty histories for the given hop indices, keeping existing ones
    pub fn ensure_hops(&self, indices: impl IntoIterator<Item = u8>) {
        let mut hops = self.hops.write();
        for index in indices {
            hops.entry(index)
                .or_insert_with(|| Arc::new(Mutex::new(HopHistory::new(self.capacity))));
        }
    }

    fn hop(&self, hop_index: u8) -> Option<SharedHopHistory> {
        self.hops.read().get(&hop_index).cloned()
    }

    fn get_or_create(&self, hop_index: u8) -> SharedHopHistory {
        if let Some(history) = self.hop(hop_index) {
            return history;
        }
        self.hops
            .write()
            .entry(hop_index)
            .or_insert_with(|| Arc::new(Mutex::new(HopHistory::new(self.capacity))))
            .clone()
    }

    /// Append an outcome to a hop, creating its history on first use
    pub fn append(&self, hop_index: u8, outcome: ProbeOutcome) {
        self.get_or_create(hop_index).lock().push(outcome);
    }

    /// Copy of one hop's retained outcomes, oldest first
    pub fn snapshot(&self, hop_index: u8) -> Vec<ProbeOutcome> {
        self.hop(hop_index)
            .map(|history| history.lock().to_vec())
            .unwrap_or_default()
    }

    /// Copy of every hop's retained outcomes
    pub fn snapshot_all(&self) -> HashMap<u8, Vec<ProbeOutcome>> {
        let hops: Vec<(u8, SharedHopHistory)> = self
            .hops
            .read()
            .iter()
            .map(|(index, history)| (*index, history.clone()))
            .collect();

        hops.into_iter()
            .map(|(index, history)| (index, history.lock().to_vec()))
            .collect()
    }

    /// Run `f` against a hop's history while holding only that hop's lock
    pub fn with_hop<R>(&self, hop_index: u8, f: impl FnOnce(Option<&HopHistory>) -> R) -> R {
        match self.hop(hop_index) {
            Some(history) => {
                let guard = history.lock();
                f(Some(&*guard))
            }
            None => f(None),
        }
    }

    /// Drop every hop and its history
    pub fn reset(&self) {
        self.hops.write().clear();
    }

    /// Clear one hop's retained outcomes
    pub fn reset_hop(&self, hop_index: u8) {
        if let Some(history) = self.hop(hop_index) {
            history.lock().clear();
        }
    }

    /// Clear retained outcomes for every hop, keeping the hops
    pub fn clear_outcomes(&self) {
        for history in self.hops.read().values() {
            history.lock().clear();
        }
    }
}
