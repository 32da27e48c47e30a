// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Gate arrays and the half-edges they hold.
//!
//! An ogate is exclusively owned by its module's ogate array and caches the
//! handle of the igate it feeds: `(target module, igate index)`. An igate
//! is a fan-in anchor; it stays alive for as long as its upstream list is
//! non-empty. Gate arrays grow by doubling and never shrink.

use crate::error::EngineError;
use crate::graph::ModuleId;
use crate::tap::Tap;
use crate::MAX_GATES;

/// Index of a gate on a module.
pub type GateIdx = u16;

/// Outgoing half-edge. The cached target pair is what the hot path
/// dispatches through, without consulting the namespace.
#[derive(Debug)]
pub struct Ogate {
    pub(crate) target: ModuleId,
    pub(crate) igate_idx: GateIdx,
    pub(crate) tap: Tap,
}

impl Ogate {
    pub(crate) fn new(target: ModuleId, igate_idx: GateIdx) -> Self {
        Self {
            target,
            igate_idx,
            tap: Tap::new(),
        }
    }

    /// The igate this ogate feeds, as `(module, igate index)`.
    #[must_use]
    pub fn peer(&self) -> (ModuleId, GateIdx) {
        (self.target, self.igate_idx)
    }
}

/// Incoming half-edge: the list of ogates currently pointing here, as
/// `(module, ogate index)` pairs.
#[derive(Debug, Default)]
pub struct Igate {
    pub(crate) upstream: Vec<(ModuleId, GateIdx)>,
}

impl Igate {
    /// Ogates currently feeding this igate.
    #[must_use]
    pub fn upstream(&self) -> &[(ModuleId, GateIdx)] {
        &self.upstream
    }
}

/// Grow-on-demand array of gate slots. A slot is active iff occupied.
#[derive(Debug)]
pub struct GateArray<G> {
    slots: Vec<Option<G>>,
}

impl<G> GateArray<G> {
    pub(crate) fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Allocated length (not the number of active slots).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_GATES
    pub fn curr_size(&self) -> GateIdx {
        self.slots.len() as GateIdx
    }

    #[must_use]
    pub fn is_active(&self, idx: GateIdx) -> bool {
        self.get(idx).is_some()
    }

    #[must_use]
    pub fn get(&self, idx: GateIdx) -> Option<&G> {
        self.slots.get(idx as usize).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, idx: GateIdx) -> Option<&mut G> {
        self.slots.get_mut(idx as usize).and_then(Option::as_mut)
    }

    /// Grow (doubling from 1) until `idx` is covered, capped at `MAX_GATES`.
    /// New slots are inactive.
    pub(crate) fn ensure(&mut self, idx: GateIdx) -> Result<(), EngineError> {
        if idx >= MAX_GATES {
            return Err(EngineError::InvalidArgument(format!(
                "gate index {idx} exceeds MAX_GATES"
            )));
        }
        if (idx as usize) < self.slots.len() {
            return Ok(());
        }
        let mut new_size = self.slots.len().max(1);
        while new_size <= idx as usize {
            new_size *= 2;
        }
        let new_size = new_size.min(MAX_GATES as usize);
        self.slots.resize_with(new_size, || None);
        Ok(())
    }

    pub(crate) fn set(&mut self, idx: GateIdx, gate: G) {
        self.slots[idx as usize] = Some(gate);
    }

    /// Deactivate a slot, returning what was in it.
    pub(crate) fn clear(&mut self, idx: GateIdx) -> Option<G> {
        self.slots.get_mut(idx as usize).and_then(Option::take)
    }

    /// All active slots with their indices.
    pub fn iter_active(&self) -> impl Iterator<Item = (GateIdx, &G)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            #[allow(clippy::cast_possible_truncation)] // bounded by MAX_GATES
            let idx = i as GateIdx;
            slot.as_ref().map(move |g| (idx, g))
        })
    }

    /// Number of active slots.
    #[must_use]
    pub fn num_active(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl<G> Default for GateArray<G> {
    fn default() -> Self {
        Self::new()
    }
}
