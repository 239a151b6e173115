// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Classifier-function slot scheduling.
//!
//! The classifier stage evaluates its slots in physical order, so the
//! slots bound for every (match set, flow type) pair must sit in sort
//! key order at all times. Binding a new pair may therefore relocate
//! live slots: we find the insertion point, pick the nearer free gap
//! on either side, and shift the slots between one position over,
//! copying each slot's full hardware configuration as we go.
//!
//! The two-gap cost choice is a local heuristic, not a global
//! minimum-disruption plan. Its exact tie-breaking is relied upon by
//! front ends replaying rule sets; leave it alone.
//!
//! The active-filter matrix on top implements the lazy join: a pair
//! only reaches hardware when its match-set side and flow-type side
//! are both installed.

use crate::engine::hw::FieldGroup;
use crate::engine::hw::RegisterSink;
use crate::engine::hw::CFN_GROUPS;
use crate::engine::pool::ResourcePool;
use crate::engine::Result;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use ofe_api::ClassifierCfg;
use ofe_api::ClassifierSlotDump;
use ofe_api::ObjKind;
use ofe_api::OfeError;
use ofe_api::ResourceKind;

/// Compose the 64-bit sort key: priority coarsest, then recency of
/// insertion within the recipe, then the global counter as the final
/// tiebreak. Order and counter are inverted so that at equal
/// priority the most recently inserted pair sorts first.
pub fn sort_key(priority: u8, order: u32, counter: u32) -> u64 {
    (u64::from(priority) << 56)
        | (u64::from(!order & 0x00ff_ffff) << 32)
        | u64::from(!counter)
}

#[derive(Clone, Copy, Debug)]
struct CfnBinding {
    sort_key: u64,
    match_set: u32,
    flow_type: u8,
}

/// The physical slot map. Slot occupancy and reference counts go
/// through the classifier-slot pool; this adds the ordering state.
pub struct ClassifierMap {
    pool: ResourcePool,
    info: Vec<Option<CfnBinding>>,
}

impl ClassifierMap {
    pub fn new(slots: u32) -> Self {
        Self {
            pool: ResourcePool::new(ResourceKind::ClassifierSlot, slots),
            info: vec![None; slots as usize],
        }
    }

    pub fn len(&self) -> u32 {
        self.info.iter().filter(|b| b.is_some()).count() as u32
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// The slot already bound for this pair, if any.
    pub fn find(&self, match_set: u32, flow_type: u8) -> Option<u32> {
        self.info.iter().position(|b| {
            matches!(b, Some(b)
                if b.match_set == match_set && b.flow_type == flow_type)
        }).map(|i| i as u32)
    }

    /// Bind a pair, relocating live slots if the insertion point is
    /// taken. A pair already bound just gains a reference.
    #[allow(clippy::too_many_arguments)]
    pub fn bind(
        &mut self,
        match_set: u32,
        flow_type: u8,
        key: u64,
        cfg: &ClassifierCfg,
        matcher_recipe: u32,
        learn_recipe: u32,
        action_set: u32,
        sink: &mut dyn RegisterSink,
    ) -> Result<u32> {
        if let Some(slot) = self.find(match_set, flow_type) {
            self.pool.add_ref(slot);
            return Ok(slot);
        }

        let target = self.make_room(key, sink)?;
        self.pool.claim(target);
        self.info[target as usize] =
            Some(CfnBinding { sort_key: key, match_set, flow_type });

        sink.write(
            ObjKind::ClassifierParams,
            target,
            FieldGroup::Proto,
            &[cfg.proto.bits()],
        );
        sink.write(
            ObjKind::ClassifierParams,
            target,
            FieldGroup::Error,
            &[u32::from(cfg.err.bits())],
        );
        sink.write(
            ObjKind::ClassifierParams,
            target,
            FieldGroup::Ports,
            &[cfg.port_mask as u32, (cfg.port_mask >> 32) as u32],
        );
        sink.write(
            ObjKind::ClassifierParams,
            target,
            FieldGroup::Output,
            &[action_set],
        );
        sink.write(
            ObjKind::ClassifierParams,
            target,
            FieldGroup::KeyEnables,
            &[matcher_recipe, u32::from(flow_type), learn_recipe],
        );
        sink.flush(ObjKind::ClassifierParams, target);

        Ok(target)
    }

    /// Drop one reference from a bound slot; at zero the slot is
    /// cleared. No compaction happens — fragmentation is tolerated
    /// until a future bind needs the room.
    pub fn unbind(&mut self, slot: u32, sink: &mut dyn RegisterSink) -> u32 {
        let remaining = self.pool.deref(slot);
        if remaining == 0 {
            self.pool.free(slot);
            self.info[slot as usize] = None;
            sink.clear(slot);
        }
        remaining
    }

    /// Find (or free up) the slot the new key must occupy.
    fn make_room(
        &mut self,
        key: u64,
        sink: &mut dyn RegisterSink,
    ) -> Result<u32> {
        let n = self.info.len();

        // The goal: the lowest bound slot holding a strictly larger
        // key. The new binding must land below it and above every
        // bound slot with a smaller key.
        let goal = self
            .info
            .iter()
            .position(|b| matches!(b, Some(b) if b.sort_key > key));

        let Some(g) = goal else {
            // Largest key so far: it belongs above everything bound.
            let top = self.info.iter().rposition(|b| b.is_some());
            let start = top.map_or(0, |t| t + 1);
            if let Some(free) = (start..n).find(|&i| self.info[i].is_none()) {
                return Ok(free as u32);
            }
            // Bound straight up to the top slot; pull everything
            // above the nearest gap down one.
            let Some(gap) = (0..start).rev().find(|&i| self.info[i].is_none())
            else {
                return Err(OfeError::ClassifierExhausted);
            };
            self.shift_down(gap, start - 1, sink);
            return Ok((start - 1) as u32);
        };

        // Directly below the goal is free: no relocation needed.
        if g > 0 && self.info[g - 1].is_none() {
            return Ok((g - 1) as u32);
        }

        let gap_above = (g..n).find(|&i| self.info[i].is_none());
        let gap_below =
            (0..g).rev().find(|&i| self.info[i].is_none());

        // Shift the cheaper side by one position. On a tie the upper
        // side moves, keeping the goal slot itself for the new pair.
        match (gap_below, gap_above) {
            (None, None) => Err(OfeError::ClassifierExhausted),
            (Some(gb), None) => {
                self.shift_down(gb, g - 1, sink);
                Ok((g - 1) as u32)
            }
            (None, Some(ga)) => {
                self.shift_up(g, ga, sink);
                Ok(g as u32)
            }
            (Some(gb), Some(ga)) => {
                let cost_down = (g - 1) - gb;
                let cost_up = ga - g;
                if cost_down < cost_up {
                    self.shift_down(gb, g - 1, sink);
                    Ok((g - 1) as u32)
                } else {
                    self.shift_up(g, ga, sink);
                    Ok(g as u32)
                }
            }
        }
    }

    /// Move bound slots `gap+1..=last` down one position, freeing
    /// `last`.
    fn shift_down(
        &mut self,
        gap: usize,
        last: usize,
        sink: &mut dyn RegisterSink,
    ) {
        crate::engine::dbg!(
            "classifier: shifting slots {}..={} down",
            gap + 1,
            last
        );
        for i in gap + 1..=last {
            self.move_slot(i, i - 1, sink);
        }
    }

    /// Move bound slots `g..gap` up one position, freeing `g`.
    fn shift_up(&mut self, g: usize, gap: usize, sink: &mut dyn RegisterSink) {
        crate::engine::dbg!(
            "classifier: shifting slots {}..{} up",
            g,
            gap
        );
        for i in (g..gap).rev() {
            self.move_slot(i, i + 1, sink);
        }
    }

    /// Physically relocate one slot: copy every field group, clear
    /// the source, carry the references over.
    fn move_slot(
        &mut self,
        src: usize,
        dst: usize,
        sink: &mut dyn RegisterSink,
    ) {
        for group in CFN_GROUPS {
            sink.copy(group, src as u32, dst as u32);
        }
        sink.clear(src as u32);

        self.info[dst] = self.info[src].take();
        let refs = self.pool.refs(src as u32);
        self.pool.claim(dst as u32);
        for _ in 1..refs {
            self.pool.add_ref(dst as u32);
        }
        self.pool.free(src as u32);
    }

    pub fn dump(&self) -> Vec<ClassifierSlotDump> {
        self.info
            .iter()
            .enumerate()
            .filter_map(|(slot, b)| {
                b.as_ref().map(|b| ClassifierSlotDump {
                    slot: slot as u32,
                    sort_key: b.sort_key,
                    match_set: b.match_set,
                    flow_type: b.flow_type,
                    refs: self.pool.refs(slot as u32),
                })
            })
            .collect()
    }
}

struct MsSide {
    refs: u32,
    order: u32,
    priority: u8,
    cfg: ClassifierCfg,
    matcher_recipe: u32,
}

struct FtSide {
    refs: u32,
    action_set: u32,
}

/// The per-learn-recipe active-filter matrix: one cell per
/// (match set, flow type); a cell holds a bound classifier slot only
/// while both of its sides are installed.
pub struct ActiveMatrix {
    /// Interned flow-learn recipe this matrix belongs to.
    recipe_idx: u32,
    flow_types: u32,
    ms: BTreeMap<u32, MsSide>,
    ft: BTreeMap<u8, FtSide>,
    cells: BTreeMap<(u32, u8), u32>,
    next_order: u32,
}

impl ActiveMatrix {
    pub fn new(recipe_idx: u32, flow_types: u32) -> Self {
        Self {
            recipe_idx,
            flow_types,
            ms: BTreeMap::new(),
            ft: BTreeMap::new(),
            cells: BTreeMap::new(),
            next_order: 0,
        }
    }

    pub fn active_cells(&self) -> u32 {
        self.cells.len() as u32
    }

    pub fn recipe_idx(&self) -> u32 {
        self.recipe_idx
    }

    /// True when neither side holds anything: the matrix can be
    /// discarded and its group re-keyed.
    pub fn is_empty(&self) -> bool {
        self.ms.is_empty() && self.ft.is_empty()
    }

    /// Install (or re-reference) the match-set side.
    pub fn add_match_set(
        &mut self,
        match_set: u32,
        priority: u8,
        cfg: ClassifierCfg,
        matcher_recipe: u32,
        classifier: &mut ClassifierMap,
        counter: &mut u32,
        sink: &mut dyn RegisterSink,
    ) -> Result<()> {
        match self.ms.get_mut(&match_set) {
            Some(side) => side.refs += 1,
            None => {
                let order = self.next_order;
                self.next_order += 1;
                self.ms.insert(
                    match_set,
                    MsSide { refs: 1, order, priority, cfg, matcher_recipe },
                );
            }
        }
        self.sync(classifier, counter, sink)
    }

    /// Install (or re-reference) the flow-type side.
    pub fn add_flow_type(
        &mut self,
        flow_type: u8,
        action_set: u32,
        classifier: &mut ClassifierMap,
        counter: &mut u32,
        sink: &mut dyn RegisterSink,
    ) -> Result<()> {
        if u32::from(flow_type) >= self.flow_types {
            return Err(OfeError::BadState(format!(
                "flow type {} outside the learn grid",
                flow_type
            )));
        }
        match self.ft.get_mut(&flow_type) {
            Some(side) => side.refs += 1,
            None => {
                self.ft.insert(flow_type, FtSide { refs: 1, action_set });
            }
        }
        self.sync(classifier, counter, sink)
    }

    pub fn remove_match_set(
        &mut self,
        match_set: u32,
        classifier: &mut ClassifierMap,
        sink: &mut dyn RegisterSink,
    ) {
        if let Some(side) = self.ms.get_mut(&match_set) {
            side.refs -= 1;
            if side.refs == 0 {
                self.ms.remove(&match_set);
            }
        }
        self.deactivate_dead(classifier, sink);
    }

    pub fn remove_flow_type(
        &mut self,
        flow_type: u8,
        classifier: &mut ClassifierMap,
        sink: &mut dyn RegisterSink,
    ) {
        if let Some(side) = self.ft.get_mut(&flow_type) {
            side.refs -= 1;
            if side.refs == 0 {
                self.ft.remove(&flow_type);
            }
        }
        self.deactivate_dead(classifier, sink);
    }

    /// Recompute the cross product and activate every cell whose two
    /// sides are now both present.
    fn sync(
        &mut self,
        classifier: &mut ClassifierMap,
        counter: &mut u32,
        sink: &mut dyn RegisterSink,
    ) -> Result<()> {
        for (&ms_idx, ms) in &self.ms {
            for (&ft_idx, ft) in &self.ft {
                if self.cells.contains_key(&(ms_idx, ft_idx)) {
                    continue;
                }
                *counter += 1;
                let key = sort_key(ms.priority, ms.order, *counter);
                let slot = classifier.bind(
                    ms_idx,
                    ft_idx,
                    key,
                    &ms.cfg,
                    ms.matcher_recipe,
                    self.recipe_idx,
                    ft.action_set,
                    sink,
                )?;
                self.cells.insert((ms_idx, ft_idx), slot);
            }
        }
        Ok(())
    }

    /// Deactivate every cell that lost a side.
    fn deactivate_dead(
        &mut self,
        classifier: &mut ClassifierMap,
        sink: &mut dyn RegisterSink,
    ) {
        let dead: Vec<(u32, u8)> = self
            .cells
            .keys()
            .filter(|(ms, ft)| {
                !self.ms.contains_key(ms) || !self.ft.contains_key(ft)
            })
            .copied()
            .collect();
        for key in dead {
            if let Some(slot) = self.cells.remove(&key) {
                classifier.unbind(slot, sink);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::hw::HwOp;
    use crate::engine::hw::HwRecorder;
    use crate::engine::hw::NullSink;

    fn assert_keys_ascend(map: &ClassifierMap) {
        let dump = map.dump();
        for pair in dump.windows(2) {
            assert!(
                pair[0].sort_key < pair[1].sort_key,
                "slots {} and {} out of order",
                pair[0].slot,
                pair[1].slot
            );
        }
    }

    fn bind_p(
        map: &mut ClassifierMap,
        ms: u32,
        priority: u8,
        order: u32,
        counter: u32,
    ) -> Result<u32> {
        map.bind(
            ms,
            0,
            sort_key(priority, order, counter),
            &ClassifierCfg::default(),
            0,
            0,
            0,
            &mut NullSink,
        )
    }

    #[test]
    fn binds_stay_sorted() {
        let mut map = ClassifierMap::new(8);
        let prios = [5u8, 1, 10, 7, 3, 9];
        for (i, &p) in prios.iter().enumerate() {
            bind_p(&mut map, i as u32, p, i as u32, i as u32).unwrap();
            assert_keys_ascend(&map);
        }
        assert_eq!(map.len(), prios.len() as u32);
    }

    #[test]
    fn priority_five_lands_between_one_and_ten() {
        let mut map = ClassifierMap::new(8);
        let mut sink = NullSink;
        // Bound at priorities 1 and 10 with three free slots between
        // them, left behind by removed bindings.
        bind_p(&mut map, 0, 1, 0, 0).unwrap();
        let a = bind_p(&mut map, 1, 4, 1, 1).unwrap();
        let b = bind_p(&mut map, 2, 6, 2, 2).unwrap();
        let c = bind_p(&mut map, 3, 8, 3, 3).unwrap();
        let ten = bind_p(&mut map, 4, 10, 4, 4).unwrap();
        for slot in [a, b, c] {
            assert_eq!(map.unbind(slot, &mut sink), 0);
        }

        let m1 = bind_p(&mut map, 5, 5, 5, 5).unwrap();
        assert!(m1 > 0 && m1 < ten);
        assert_keys_ascend(&map);

        // Same priority, later insertion: sorts first, binds in the
        // adjacent gap below.
        let m2 = bind_p(&mut map, 6, 5, 6, 6).unwrap();
        assert_eq!(m2, m1 - 1);
        assert_keys_ascend(&map);
    }

    #[test]
    fn relocation_shifts_upper_side() {
        let mut map = ClassifierMap::new(6);
        let mut sink = HwRecorder::default();
        bind_p(&mut map, 0, 1, 0, 0).unwrap();
        bind_p(&mut map, 1, 2, 1, 1).unwrap();
        let c = bind_p(&mut map, 2, 9, 2, 2).unwrap();
        assert_eq!(c, 2);

        // Priority 5 wants slot 2; slots 0 and 1 are bound below, the
        // free gap above is slot 3, so slot 2 shifts up.
        let d = map
            .bind(
                3,
                0,
                sort_key(5, 3, 3),
                &ClassifierCfg::default(),
                0,
                0,
                0,
                &mut sink,
            )
            .unwrap();
        assert_eq!(d, 2);
        assert_keys_ascend(&map);
        let copies: Vec<_> = sink
            .ops
            .iter()
            .filter(|op| matches!(op, HwOp::Copy { .. }))
            .collect();
        assert_eq!(copies.len(), CFN_GROUPS.len());
        assert!(matches!(
            copies[0],
            HwOp::Copy { src: 2, dst: 3, .. }
        ));
        assert!(sink
            .ops
            .iter()
            .any(|op| matches!(op, HwOp::Clear { slot: 2 })));
    }

    #[test]
    fn relocation_prefers_cheaper_side() {
        let mut map = ClassifierMap::new(6);
        let mut sink = NullSink;
        bind_p(&mut map, 0, 1, 0, 0).unwrap();
        let x = bind_p(&mut map, 1, 2, 1, 1).unwrap();
        bind_p(&mut map, 2, 3, 2, 2).unwrap();
        bind_p(&mut map, 3, 9, 3, 3).unwrap();
        bind_p(&mut map, 4, 10, 4, 4).unwrap();
        // Free slot 1; the layout is now [1, -, 3, 9, 10, -].
        assert_eq!(map.unbind(x, &mut sink), 0);

        // Priority 5's goal is slot 3 (the 9). One slot shifts down
        // into the gap at 1 versus two shifting up toward slot 5.
        let mut rec = HwRecorder::default();
        let d = map
            .bind(
                5,
                0,
                sort_key(5, 5, 5),
                &ClassifierCfg::default(),
                0,
                0,
                0,
                &mut rec,
            )
            .unwrap();
        assert_eq!(d, 2);
        assert_keys_ascend(&map);
        // The priority-3 binding moved from slot 2 to slot 1.
        assert!(rec
            .ops
            .iter()
            .any(|op| matches!(op, HwOp::Copy { src: 2, dst: 1, .. })));
    }

    #[test]
    fn exhaustion_reported() {
        let mut map = ClassifierMap::new(3);
        for i in 0..3 {
            bind_p(&mut map, i, 4, i, i).unwrap();
        }
        assert_eq!(
            bind_p(&mut map, 9, 4, 9, 9).unwrap_err(),
            OfeError::ClassifierExhausted
        );
    }

    #[test]
    fn rebind_is_a_ref() {
        let mut map = ClassifierMap::new(4);
        let mut sink = NullSink;
        let a = bind_p(&mut map, 7, 2, 0, 0).unwrap();
        let b = bind_p(&mut map, 7, 2, 1, 1).unwrap();
        assert_eq!(a, b);
        assert_eq!(map.len(), 1);
        assert_eq!(map.unbind(a, &mut sink), 1);
        assert_eq!(map.len(), 1);
        assert_eq!(map.unbind(a, &mut sink), 0);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn matrix_joins_lazily() {
        let mut map = ClassifierMap::new(8);
        let mut matrix = ActiveMatrix::new(1, 16);
        let mut counter = 0;
        let mut sink = HwRecorder::default();

        matrix
            .add_match_set(
                3,
                5,
                ClassifierCfg::default(),
                0,
                &mut map,
                &mut counter,
                &mut sink,
            )
            .unwrap();
        // Match set alone: nothing reaches hardware.
        assert_eq!(matrix.active_cells(), 0);
        assert_eq!(map.len(), 0);
        assert!(sink.ops.is_empty());

        matrix
            .add_flow_type(2, 11, &mut map, &mut counter, &mut sink)
            .unwrap();
        assert_eq!(matrix.active_cells(), 1);
        assert_eq!(map.len(), 1);
        assert!(!sink.ops.is_empty());

        // Either side going away empties the cell.
        matrix.remove_match_set(3, &mut map, &mut sink);
        assert_eq!(matrix.active_cells(), 0);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn matrix_cross_product() {
        let mut map = ClassifierMap::new(16);
        let mut matrix = ActiveMatrix::new(0, 16);
        let mut counter = 0;
        let mut sink = NullSink;

        for (ms, prio) in [(0, 3u8), (1, 5)] {
            matrix
                .add_match_set(
                    ms,
                    prio,
                    ClassifierCfg::default(),
                    0,
                    &mut map,
                    &mut counter,
                    &mut sink,
                )
                .unwrap();
        }
        for (ft, action) in [(0u8, 4u32), (1, 9)] {
            matrix
                .add_flow_type(ft, action, &mut map, &mut counter, &mut sink)
                .unwrap();
        }
        assert_eq!(matrix.active_cells(), 4);
        assert_eq!(map.len(), 4);
        assert_keys_ascend(&map);

        matrix.remove_flow_type(0, &mut map, &mut sink);
        assert_eq!(matrix.active_cells(), 2);
        assert_eq!(map.len(), 2);
    }
}
