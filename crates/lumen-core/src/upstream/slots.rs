//! Chain-tip slot estimation for archive-age gating.
//!
//! Non-archive nodes keep a bounded window of ledger history. To decide
//! whether such a node can serve a request for block `B`, the proxy
//! extrapolates the current tip from the last observed slot and refuses the
//! node when `B` falls behind `tip - available_slots_history`.
//!
//! The tracker is an injection point: initial values come from configuration
//! or a startup probe, and the host refreshes it periodically. Nothing here
//! assumes a particular cluster.

use arc_swap::ArcSwap;
use std::{
    sync::Arc,
    time::Instant,
};

/// Observed slot production rate of the cluster.
pub const SLOTS_PER_SECOND: f64 = 2.5;

/// A slot observation: the slot number and when it was taken.
#[derive(Debug, Clone, Copy)]
pub struct SlotEstimate {
    pub slot: i64,
    pub observed_at: Instant,
}

impl SlotEstimate {
    #[must_use]
    pub fn new(slot: i64) -> Self {
        Self { slot, observed_at: Instant::now() }
    }

    /// Extrapolated current tip, advancing the observation by elapsed time.
    #[must_use]
    pub fn extrapolated_tip(&self) -> i64 {
        let elapsed = self.observed_at.elapsed().as_secs_f64();
        self.slot + (elapsed * SLOTS_PER_SECOND) as i64
    }

    /// Oldest slot a node with `history` slots of ledger can still serve.
    #[must_use]
    pub fn tail_slot(&self, history: i64) -> i64 {
        self.extrapolated_tip() - history
    }
}

/// Shared, lock-free holder of the latest slot observation.
#[derive(Debug)]
pub struct SlotTracker {
    estimate: ArcSwap<SlotEstimate>,
}

impl SlotTracker {
    #[must_use]
    pub fn new(initial_slot: i64) -> Self {
        Self { estimate: ArcSwap::from_pointee(SlotEstimate::new(initial_slot)) }
    }

    /// Records a fresh slot observation, stamped now.
    pub fn observe(&self, slot: i64) {
        self.estimate.store(Arc::new(SlotEstimate::new(slot)));
    }

    #[must_use]
    pub fn estimate(&self) -> Arc<SlotEstimate> {
        self.estimate.load_full()
    }
}
