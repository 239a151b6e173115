// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Reference-counted slot pools.
//!
//! One pool per hardware resource class. A pool is a fixed-capacity
//! array of `{used, refs}` slots, sized from the device capabilities
//! at init; the slot index is the hardware index. Allocation is a
//! first-fit linear scan. The pool never blocks and never retries;
//! exhaustion is `None` and the caller decides what to give up.
//!
//! Invariant: `refs > 0` implies `used`; a free slot always has
//! `refs == 0`. The pool does not police release ordering beyond
//! that; the object database is the layer that guarantees a slot's
//! refcount reached zero before freeing it.

use alloc::vec::Vec;
use ofe_api::ResourceKind;

#[derive(Clone, Copy, Default)]
struct Slot {
    used: bool,
    refs: u32,
}

pub struct ResourcePool {
    kind: ResourceKind,
    slots: Vec<Slot>,
}

impl ResourcePool {
    pub fn new(kind: ResourceKind, capacity: u32) -> Self {
        Self { kind, slots: vec![Slot::default(); capacity as usize] }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn used_count(&self) -> u32 {
        self.slots.iter().filter(|s| s.used).count() as u32
    }

    pub fn is_used(&self, idx: u32) -> bool {
        self.slots[idx as usize].used
    }

    pub fn refs(&self, idx: u32) -> u32 {
        self.slots[idx as usize].refs
    }

    /// Claim the first free slot at the given alignment stride. The
    /// slot comes back with one reference.
    pub fn allocate(&mut self, align: u32) -> Option<u32> {
        let align = align.max(1) as usize;
        let idx = (0..self.slots.len())
            .step_by(align)
            .find(|&i| !self.slots[i].used)?;
        self.slots[idx] = Slot { used: true, refs: 1 };
        Some(idx as u32)
    }

    /// Claim the first free run of `count` consecutive slots, the run
    /// base at the given alignment stride. Only the base slot carries
    /// the reference; the rest of the run is marked used with no refs
    /// of its own.
    pub fn allocate_contiguous(&mut self, count: u32, align: u32) -> Option<u32> {
        let count = count as usize;
        let align = align.max(1) as usize;
        if count == 0 || count > self.slots.len() {
            return None;
        }

        let base = (0..=self.slots.len() - count).step_by(align).find(|&b| {
            self.slots[b..b + count].iter().all(|s| !s.used)
        })?;

        for s in &mut self.slots[base..base + count] {
            s.used = true;
        }
        self.slots[base].refs = 1;
        Some(base as u32)
    }

    /// Claim a specific free slot. Returns false if it is already
    /// used.
    pub fn claim(&mut self, idx: u32) -> bool {
        let slot = &mut self.slots[idx as usize];
        if slot.used {
            return false;
        }
        *slot = Slot { used: true, refs: 1 };
        true
    }

    /// Unconditionally release a slot. The caller must already know
    /// the refcount has reached zero.
    pub fn free(&mut self, idx: u32) {
        self.slots[idx as usize] = Slot::default();
    }

    /// Release every slot of a contiguous run.
    pub fn free_run(&mut self, base: u32, count: u32) {
        for i in base..base + count {
            self.free(i);
        }
    }

    pub fn add_ref(&mut self, idx: u32) {
        let slot = &mut self.slots[idx as usize];
        slot.used = true;
        slot.refs += 1;
    }

    /// Drop one reference; returns the remaining count. A return of
    /// zero means the caller must now `free` the slot.
    pub fn deref(&mut self, idx: u32) -> u32 {
        let slot = &mut self.slots[idx as usize];
        slot.refs = slot.refs.saturating_sub(1);
        slot.refs
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn check_invariant(pool: &ResourcePool) {
        for i in 0..pool.capacity() {
            if pool.refs(i) > 0 {
                assert!(pool.is_used(i), "slot {} has refs but is free", i);
            }
            if !pool.is_used(i) {
                assert_eq!(pool.refs(i), 0, "free slot {} has refs", i);
            }
        }
    }

    #[test]
    fn exhaustion() {
        let mut pool = ResourcePool::new(ResourceKind::Queue, 4);
        let mut got = vec![];
        for _ in 0..4 {
            got.push(pool.allocate(1).unwrap());
        }
        got.sort_unstable();
        got.dedup();
        assert_eq!(got.len(), 4);
        assert_eq!(pool.allocate(1), None);
        check_invariant(&pool);
    }

    #[test]
    fn refs_track_usage() {
        let mut pool = ResourcePool::new(ResourceKind::ActionRecord, 8);
        let idx = pool.allocate(1).unwrap();
        assert_eq!(pool.refs(idx), 1);
        pool.add_ref(idx);
        assert_eq!(pool.refs(idx), 2);
        assert_eq!(pool.deref(idx), 1);
        assert_eq!(pool.deref(idx), 0);
        check_invariant(&pool);
        pool.free(idx);
        assert!(!pool.is_used(idx));
        check_invariant(&pool);
        // The slot is reusable.
        assert_eq!(pool.allocate(1), Some(idx));
    }

    #[test]
    fn aligned_allocation() {
        let mut pool = ResourcePool::new(ResourceKind::MatcherRecipe, 8);
        assert_eq!(pool.allocate(2), Some(0));
        assert_eq!(pool.allocate(2), Some(2));
        // Odd slots stay free for unaligned callers.
        assert_eq!(pool.allocate(1), Some(1));
        check_invariant(&pool);
    }

    #[test]
    fn contiguous_run() {
        let mut pool = ResourcePool::new(ResourceKind::ReplacementWord, 16);
        let a = pool.allocate(1).unwrap();
        assert_eq!(a, 0);
        let base = pool.allocate_contiguous(4, 4).unwrap();
        assert_eq!(base, 4);
        for i in base..base + 4 {
            assert!(pool.is_used(i));
        }
        assert_eq!(pool.refs(base), 1);
        check_invariant(&pool);
        assert_eq!(pool.deref(base), 0);
        pool.free_run(base, 4);
        for i in base..base + 4 {
            assert!(!pool.is_used(i));
        }
        check_invariant(&pool);
    }

    #[test]
    fn contiguous_respects_occupied() {
        let mut pool = ResourcePool::new(ResourceKind::ReplacementWord, 8);
        assert!(pool.claim(2));
        // The only run of four free slots at stride 1 starts past the
        // claimed slot.
        assert_eq!(pool.allocate_contiguous(4, 1), Some(3));
        assert_eq!(pool.allocate_contiguous(4, 1), None);
    }

    #[test]
    fn claim_specific() {
        let mut pool = ResourcePool::new(ResourceKind::ClassifierSlot, 4);
        assert!(pool.claim(3));
        assert!(!pool.claim(3));
        assert_eq!(pool.allocate(1), Some(0));
    }
}
