// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The interned hardware-object database.
//!
//! Hardware tables are shallow; rules are many and repetitive. Every
//! configuration record is therefore interned: adding content that is
//! field-for-field equal to a live record returns the existing index
//! with one more reference, and only genuinely new content claims a
//! slot and touches the registers. Releasing the last reference zeroes
//! the record and gives back whatever secondary resources it held
//! (queue references, replacement-table words, mirror pool slots).
//!
//! Kinds that hardware requires to have a default (hash config, aging
//! timeout) reserve index 0 at init; that record never dies.

use crate::engine::hw::FieldGroup;
use crate::engine::hw::RegisterSink;
use crate::engine::pool::ResourcePool;
use crate::engine::Result;
use alloc::vec::Vec;
use ofe_api::ActionSetCfg;
use ofe_api::AgeCfg;
use ofe_api::ClassifierCfg;
use ofe_api::ConnCfg;
use ofe_api::DeviceCaps;
use ofe_api::EditorCfg;
use ofe_api::EditorExtCfg;
use ofe_api::FieldAnchor;
use ofe_api::HashCfg;
use ofe_api::KeySlotCfg;
use ofe_api::LearnRecipeCfg;
use ofe_api::LearnTypeCfg;
use ofe_api::LenAdjustCfg;
use ofe_api::MatchSetCfg;
use ofe_api::MatcherRecipeCfg;
use ofe_api::MatcherTypeCfg;
use ofe_api::ObjKind;
use ofe_api::OfeError;
use ofe_api::OutputCfg;
use ofe_api::OutputDest;
use ofe_api::PoolDump;
use ofe_api::ResourceKind;
use ofe_api::TableDump;
use ofe_api::EDITOR_DATA_MAX;
use ofe_api::OUTPUT_ENTRIES_MAX;

// Table depths for the editor and policy tables that are uniform
// across parts, unlike the capability-derived ones.
const SLICE_RECORDS: u32 = 64;
const EDITOR_RECORDS: u32 = 64;
const EXT_RECORDS: u32 = 64;
const HASH_RECORDS: u32 = 16;
const AGE_RECORDS: u32 = 16;

#[derive(Clone, Debug)]
struct Interned<T> {
    content: T,
    refs: i32,
}

/// Outcome of an `add`: the record index and whether the content was
/// new (and so was programmed) or joined an existing record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddOutcome {
    pub index: u32,
    pub created: bool,
}

/// One kind's table of interned records.
pub struct InternTable<T> {
    kind: ObjKind,
    slots: Vec<Option<Interned<T>>>,
    reserved_default: bool,
}

impl<T: Clone + PartialEq> InternTable<T> {
    pub fn new(kind: ObjKind, capacity: u32) -> Self {
        Self { kind, slots: vec![None; capacity as usize], reserved_default: false }
    }

    /// A table whose index 0 is a reserved, never-freed default.
    pub fn with_default(kind: ObjKind, capacity: u32, default: T) -> Self {
        let mut table = Self::new(kind, capacity);
        table.slots[0] = Some(Interned { content: default, refs: 1 });
        table.reserved_default = true;
        table
    }

    pub fn kind(&self) -> ObjKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn live(&self) -> u32 {
        self.slots.iter().filter(|s| s.is_some()).count() as u32
    }

    pub fn get(&self, idx: u32) -> Option<&T> {
        self.slots[idx as usize].as_ref().map(|s| &s.content)
    }

    pub fn refs(&self, idx: u32) -> i32 {
        self.slots[idx as usize].as_ref().map_or(0, |s| s.refs)
    }

    /// Intern content: equal live content gains a reference, new
    /// content claims the first dead slot.
    pub fn add(&mut self, content: &T) -> Result<AddOutcome> {
        if let Some(idx) = self.slots.iter().position(
            |s| matches!(s, Some(s) if s.refs > 0 && s.content == *content),
        ) {
            // Unwrap safety: position just proved the slot is live.
            self.slots[idx].as_mut().unwrap().refs += 1;
            return Ok(AddOutcome { index: idx as u32, created: false });
        }

        let Some(idx) = self.slots.iter().position(|s| s.is_none()) else {
            return Err(OfeError::TableExhausted(self.kind));
        };
        self.slots[idx] = Some(Interned { content: content.clone(), refs: 1 });
        Ok(AddOutcome { index: idx as u32, created: true })
    }

    pub fn add_ref(&mut self, idx: u32) {
        if let Some(s) = self.slots[idx as usize].as_mut() {
            s.refs += 1;
        }
    }

    /// Drop one reference. Returns the content when the record died
    /// and its secondary resources must be released; the reserved
    /// default at index 0 never dies.
    pub fn deref(&mut self, idx: u32) -> Option<T> {
        let slot = self.slots[idx as usize].as_mut()?;
        slot.refs -= 1;
        if slot.refs > 0 {
            return None;
        }
        if self.reserved_default && idx == 0 {
            slot.refs = 1;
            return None;
        }
        self.slots[idx as usize].take().map(|s| s.content)
    }

    pub fn dump(&self) -> TableDump {
        TableDump {
            kind: self.kind,
            capacity: self.capacity(),
            live: self.live(),
        }
    }
}

/// The slot pools the database accounts against, one per
/// [`ResourceKind`] outside the classifier map.
pub struct Pools {
    pub queues: ResourcePool,
    pub matcher_recipes: ResourcePool,
    pub matcher_types: ResourcePool,
    pub learn_recipes: ResourcePool,
    pub learn_types: ResourcePool,
    pub actions: ResourcePool,
    pub replacement: ResourcePool,
}

impl Pools {
    pub fn new(caps: &DeviceCaps) -> Self {
        Self {
            queues: ResourcePool::new(ResourceKind::Queue, caps.queues),
            matcher_recipes: ResourcePool::new(
                ResourceKind::MatcherRecipe,
                caps.matcher_recipes,
            ),
            matcher_types: ResourcePool::new(
                ResourceKind::MatcherFlowType,
                caps.matcher_flow_types,
            ),
            learn_recipes: ResourcePool::new(
                ResourceKind::LearnRecipe,
                caps.learn_recipes,
            ),
            learn_types: ResourcePool::new(
                ResourceKind::LearnFlowType,
                caps.learn_flow_types,
            ),
            actions: ResourcePool::new(
                ResourceKind::ActionRecord,
                caps.action_records,
            ),
            replacement: ResourcePool::new(
                ResourceKind::ReplacementWord,
                caps.replacement_words,
            ),
        }
    }

    pub fn dump(&self) -> Vec<PoolDump> {
        [
            &self.queues,
            &self.matcher_recipes,
            &self.matcher_types,
            &self.learn_recipes,
            &self.learn_types,
            &self.actions,
            &self.replacement,
        ]
        .into_iter()
        .map(|p| PoolDump {
            kind: p.kind(),
            capacity: p.capacity(),
            used: p.used_count(),
        })
        .collect()
    }
}

/// The indices a flow holds across the database. The aggregate
/// release fan-out walks this; it is also what install unwinds on a
/// mid-flight failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlowObjects {
    pub output: Option<u32>,
    pub conn: Option<u32>,
    pub slice: Option<u32>,
    pub editor: Option<u32>,
    pub editor_ext: Option<u32>,
    pub hash: Option<u32>,
    pub age: Option<u32>,
    pub action_set: Option<u32>,
    pub matcher_recipe: Option<u32>,
    pub matcher_type: Option<u32>,
    pub learn_recipe: Option<u32>,
    pub learn_type: Option<u32>,
    pub match_set: Option<u32>,
    pub classifier_params: Option<u32>,
}

fn anchor_code(anchor: FieldAnchor) -> u32 {
    match anchor {
        FieldAnchor::L2 => 0,
        FieldAnchor::L3 => 1,
        FieldAnchor::L4 => 2,
        FieldAnchor::Tunnel => 3,
        FieldAnchor::InnerL3 => 4,
        FieldAnchor::InnerL4 => 5,
        FieldAnchor::Meta => 6,
    }
}

fn slot_words(slot: &Option<KeySlotCfg>, words: &mut Vec<u32>) {
    match slot {
        None => words.push(u32::MAX),
        Some(s) => {
            words.push(anchor_code(s.anchor));
            words.push(s.byte_off as u16 as u32 | (u32::from(s.word_len) << 16));
            words.extend_from_slice(&s.mask);
        }
    }
}

pub struct ObjectDb {
    pub outputs: InternTable<OutputCfg>,
    pub conns: InternTable<ConnCfg>,
    pub slices: InternTable<LenAdjustCfg>,
    pub editors: InternTable<EditorCfg>,
    pub editor_exts: InternTable<EditorExtCfg>,
    /// Replacement-table run (base, words) backing each editor-ext
    /// record.
    ext_runs: Vec<Option<(u32, u32)>>,
    pub hashes: InternTable<HashCfg>,
    pub ages: InternTable<AgeCfg>,
    pub actions: InternTable<ActionSetCfg>,
    pub classifiers: InternTable<ClassifierCfg>,
    pub match_sets: InternTable<MatchSetCfg>,
    pub matcher_recipes: InternTable<MatcherRecipeCfg>,
    pub matcher_types: InternTable<MatcherTypeCfg>,
    pub learn_recipes: InternTable<LearnRecipeCfg>,
    pub learn_types: InternTable<LearnTypeCfg>,
}

impl ObjectDb {
    pub fn new(caps: &DeviceCaps) -> Self {
        Self {
            outputs: InternTable::new(ObjKind::OutputList, caps.action_records),
            conns: InternTable::new(ObjKind::ConnParams, caps.action_records),
            slices: InternTable::new(ObjKind::LenAdjust, SLICE_RECORDS),
            editors: InternTable::new(ObjKind::Editor, EDITOR_RECORDS),
            editor_exts: InternTable::new(ObjKind::EditorExt, EXT_RECORDS),
            ext_runs: vec![None; EXT_RECORDS as usize],
            hashes: InternTable::with_default(
                ObjKind::HashConfig,
                HASH_RECORDS,
                HashCfg::default(),
            ),
            ages: InternTable::with_default(
                ObjKind::AgeTimeout,
                AGE_RECORDS,
                AgeCfg::default(),
            ),
            actions: InternTable::new(ObjKind::ActionSet, caps.action_records),
            classifiers: InternTable::new(
                ObjKind::ClassifierParams,
                caps.classifier_slots,
            ),
            match_sets: InternTable::new(
                ObjKind::MatchSet,
                caps.classifier_slots,
            ),
            matcher_recipes: InternTable::new(
                ObjKind::MatcherRecipe,
                caps.matcher_recipes,
            ),
            matcher_types: InternTable::new(
                ObjKind::MatcherFlowType,
                caps.matcher_flow_types,
            ),
            learn_recipes: InternTable::new(
                ObjKind::LearnRecipe,
                caps.learn_recipes,
            ),
            learn_types: InternTable::new(
                ObjKind::LearnFlowType,
                caps.learn_flow_types,
            ),
        }
    }

    pub fn dump(&self) -> Vec<TableDump> {
        vec![
            self.actions.dump(),
            self.match_sets.dump(),
            self.conns.dump(),
            self.outputs.dump(),
            self.slices.dump(),
            self.editors.dump(),
            self.editor_exts.dump(),
            self.hashes.dump(),
            self.ages.dump(),
            self.classifiers.dump(),
            self.learn_recipes.dump(),
            self.learn_types.dump(),
            self.matcher_recipes.dump(),
            self.matcher_types.dump(),
        ]
    }

    /// Intern an output list, taking a reference on every queue it
    /// delivers to.
    pub fn add_output(
        &mut self,
        pools: &mut Pools,
        sink: &mut dyn RegisterSink,
        cfg: &OutputCfg,
    ) -> Result<u32> {
        if cfg.entries.len() > OUTPUT_ENTRIES_MAX
            || (cfg.entries.is_empty() && !cfg.drop)
        {
            return Err(OfeError::OutputListInvalid);
        }

        let out = self.outputs.add(cfg)?;
        if out.created {
            for entry in &cfg.entries {
                if let OutputDest::Queue(q) = entry {
                    let q = u32::from(*q);
                    if pools.queues.is_used(q) {
                        pools.queues.add_ref(q);
                    } else {
                        pools.queues.claim(q);
                    }
                }
            }
            let mut words = vec![u32::from(cfg.drop)];
            for entry in &cfg.entries {
                words.push(match entry {
                    OutputDest::Queue(q) => u32::from(*q),
                    OutputDest::Port(p) => 0x0001_0000 | u32::from(*p),
                });
            }
            sink.write(
                ObjKind::OutputList,
                out.index,
                FieldGroup::Content,
                &words,
            );
            sink.flush(ObjKind::OutputList, out.index);
        }
        Ok(out.index)
    }

    pub fn deref_output(
        &mut self,
        pools: &mut Pools,
        sink: &mut dyn RegisterSink,
        idx: u32,
    ) {
        if let Some(cfg) = self.outputs.deref(idx) {
            for entry in &cfg.entries {
                if let OutputDest::Queue(q) = entry {
                    let q = u32::from(*q);
                    if pools.queues.deref(q) == 0 {
                        pools.queues.free(q);
                    }
                }
            }
            self.clear_record(sink, ObjKind::OutputList, idx);
        }
    }

    pub fn add_conn(
        &mut self,
        sink: &mut dyn RegisterSink,
        cfg: &ConnCfg,
    ) -> Result<u32> {
        let out = self.conns.add(cfg)?;
        if out.created {
            let words = [cfg.mark, u32::from(cfg.track)];
            sink.write(
                ObjKind::ConnParams,
                out.index,
                FieldGroup::Content,
                &words,
            );
            sink.flush(ObjKind::ConnParams, out.index);
        }
        Ok(out.index)
    }

    pub fn deref_conn(&mut self, sink: &mut dyn RegisterSink, idx: u32) {
        if self.conns.deref(idx).is_some() {
            self.clear_record(sink, ObjKind::ConnParams, idx);
        }
    }

    pub fn add_slice(
        &mut self,
        sink: &mut dyn RegisterSink,
        cfg: &LenAdjustCfg,
    ) -> Result<u32> {
        let out = self.slices.add(cfg)?;
        if out.created {
            let words = [
                anchor_code(cfg.anchor),
                cfg.byte_off as u16 as u32,
                u32::from(cfg.slice_len),
            ];
            sink.write(
                ObjKind::LenAdjust,
                out.index,
                FieldGroup::Content,
                &words,
            );
            sink.flush(ObjKind::LenAdjust, out.index);
        }
        Ok(out.index)
    }

    pub fn deref_slice(&mut self, sink: &mut dyn RegisterSink, idx: u32) {
        if self.slices.deref(idx).is_some() {
            self.clear_record(sink, ObjKind::LenAdjust, idx);
        }
    }

    pub fn add_editor(
        &mut self,
        sink: &mut dyn RegisterSink,
        cfg: &EditorCfg,
    ) -> Result<u32> {
        let out = self.editors.add(cfg)?;
        if out.created {
            let words = [
                cfg.len_delta as u16 as u32,
                u32::from(cfg.ttl_dec),
                cfg.dscp.map_or(u32::MAX, u32::from),
            ];
            sink.write(ObjKind::Editor, out.index, FieldGroup::Content, &words);
            sink.flush(ObjKind::Editor, out.index);
        }
        Ok(out.index)
    }

    pub fn deref_editor(&mut self, sink: &mut dyn RegisterSink, idx: u32) {
        if self.editors.deref(idx).is_some() {
            self.clear_record(sink, ObjKind::Editor, idx);
        }
    }

    /// Intern editor extension data; new records claim a contiguous
    /// run of replacement-table words to hold the bytes.
    pub fn add_editor_ext(
        &mut self,
        pools: &mut Pools,
        sink: &mut dyn RegisterSink,
        cfg: &EditorExtCfg,
    ) -> Result<u32> {
        if cfg.data.len() > EDITOR_DATA_MAX {
            return Err(OfeError::EditorDataTooLong { len: cfg.data.len() });
        }

        let out = self.editor_exts.add(cfg)?;
        if out.created {
            let words = cfg.data.len().div_ceil(4) as u32;
            let Some(base) = pools.replacement.allocate_contiguous(words, 1)
            else {
                // Give the record back before reporting exhaustion.
                let _ = self.editor_exts.deref(out.index);
                return Err(OfeError::PoolExhausted(
                    ResourceKind::ReplacementWord,
                ));
            };
            self.ext_runs[out.index as usize] = Some((base, words));

            let mut prog = vec![base, words];
            for chunk in cfg.data.chunks(4) {
                let mut w = [0u8; 4];
                w[..chunk.len()].copy_from_slice(chunk);
                prog.push(u32::from_le_bytes(w));
            }
            sink.write(
                ObjKind::EditorExt,
                out.index,
                FieldGroup::Content,
                &prog,
            );
            sink.flush(ObjKind::EditorExt, out.index);
        }
        Ok(out.index)
    }

    pub fn deref_editor_ext(
        &mut self,
        pools: &mut Pools,
        sink: &mut dyn RegisterSink,
        idx: u32,
    ) {
        if self.editor_exts.deref(idx).is_some() {
            if let Some((base, words)) = self.ext_runs[idx as usize].take() {
                if pools.replacement.deref(base) == 0 {
                    pools.replacement.free_run(base, words);
                }
            }
            self.clear_record(sink, ObjKind::EditorExt, idx);
        }
    }

    pub fn add_hash(
        &mut self,
        sink: &mut dyn RegisterSink,
        cfg: &HashCfg,
    ) -> Result<u32> {
        let out = self.hashes.add(cfg)?;
        if out.created {
            let mut words = vec![cfg.algo as u32];
            words.extend_from_slice(&cfg.key);
            sink.write(
                ObjKind::HashConfig,
                out.index,
                FieldGroup::Content,
                &words,
            );
            sink.flush(ObjKind::HashConfig, out.index);
        }
        Ok(out.index)
    }

    pub fn deref_hash(&mut self, sink: &mut dyn RegisterSink, idx: u32) {
        if self.hashes.deref(idx).is_some() {
            self.clear_record(sink, ObjKind::HashConfig, idx);
        }
    }

    pub fn add_age(
        &mut self,
        sink: &mut dyn RegisterSink,
        cfg: &AgeCfg,
    ) -> Result<u32> {
        let out = self.ages.add(cfg)?;
        if out.created {
            sink.write(
                ObjKind::AgeTimeout,
                out.index,
                FieldGroup::Content,
                &[cfg.timeout_s],
            );
            sink.flush(ObjKind::AgeTimeout, out.index);
        }
        Ok(out.index)
    }

    pub fn deref_age(&mut self, sink: &mut dyn RegisterSink, idx: u32) {
        if self.ages.deref(idx).is_some() {
            self.clear_record(sink, ObjKind::AgeTimeout, idx);
        }
    }

    /// Intern an action set; the record mirrors into the action-table
    /// pool.
    pub fn add_action(
        &mut self,
        pools: &mut Pools,
        sink: &mut dyn RegisterSink,
        cfg: &ActionSetCfg,
    ) -> Result<u32> {
        let out = self.actions.add(cfg)?;
        if out.created {
            pools.actions.claim(out.index);
            let words = [
                cfg.output,
                cfg.hash,
                cfg.age,
                cfg.conn.unwrap_or(u32::MAX),
                cfg.slice.unwrap_or(u32::MAX),
                cfg.editor.unwrap_or(u32::MAX),
                cfg.editor_ext.unwrap_or(u32::MAX),
            ];
            sink.write(
                ObjKind::ActionSet,
                out.index,
                FieldGroup::Content,
                &words,
            );
            sink.flush(ObjKind::ActionSet, out.index);
        } else {
            pools.actions.add_ref(out.index);
        }
        Ok(out.index)
    }

    pub fn deref_action(
        &mut self,
        pools: &mut Pools,
        sink: &mut dyn RegisterSink,
        idx: u32,
    ) {
        let died = self.actions.deref(idx).is_some();
        if pools.actions.deref(idx) == 0 {
            pools.actions.free(idx);
        }
        if died {
            self.clear_record(sink, ObjKind::ActionSet, idx);
        }
    }

    /// Intern classifier-function parameters. Shadow only: the slot
    /// registers are programmed when a (match set, flow type) pair
    /// binds, because their home is the physical slot, not this
    /// index.
    pub fn add_classifier(&mut self, cfg: &ClassifierCfg) -> Result<u32> {
        Ok(self.classifiers.add(cfg)?.index)
    }

    pub fn deref_classifier(&mut self, idx: u32) {
        let _ = self.classifiers.deref(idx);
    }

    pub fn add_match_set(&mut self, cfg: &MatchSetCfg) -> Result<u32> {
        Ok(self.match_sets.add(cfg)?.index)
    }

    pub fn deref_match_set(&mut self, idx: u32) {
        let _ = self.match_sets.deref(idx);
    }

    pub fn add_matcher_recipe(
        &mut self,
        pools: &mut Pools,
        sink: &mut dyn RegisterSink,
        cfg: &MatcherRecipeCfg,
    ) -> Result<u32> {
        let out = self.matcher_recipes.add(cfg)?;
        if out.created {
            pools.matcher_recipes.claim(out.index);
            let mut words = vec![u32::from(cfg.key_words)];
            for slot in cfg.qw.iter().chain(cfg.sw.iter()) {
                slot_words(slot, &mut words);
            }
            slot_words(&cfg.meta, &mut words);
            sink.write(
                ObjKind::MatcherRecipe,
                out.index,
                FieldGroup::Content,
                &words,
            );
            sink.flush(ObjKind::MatcherRecipe, out.index);
        } else {
            pools.matcher_recipes.add_ref(out.index);
        }
        Ok(out.index)
    }

    pub fn deref_matcher_recipe(
        &mut self,
        pools: &mut Pools,
        sink: &mut dyn RegisterSink,
        idx: u32,
    ) {
        let died = self.matcher_recipes.deref(idx).is_some();
        if pools.matcher_recipes.deref(idx) == 0 {
            pools.matcher_recipes.free(idx);
        }
        if died {
            self.clear_record(sink, ObjKind::MatcherRecipe, idx);
        }
    }

    pub fn add_matcher_type(
        &mut self,
        pools: &mut Pools,
        sink: &mut dyn RegisterSink,
        cfg: &MatcherTypeCfg,
    ) -> Result<u32> {
        let out = self.matcher_types.add(cfg)?;
        if out.created {
            pools.matcher_types.claim(out.index);
            let words =
                [cfg.recipe, u32::from(cfg.flow_type), cfg.action_set];
            sink.write(
                ObjKind::MatcherFlowType,
                out.index,
                FieldGroup::Content,
                &words,
            );
            sink.flush(ObjKind::MatcherFlowType, out.index);
        } else {
            pools.matcher_types.add_ref(out.index);
        }
        Ok(out.index)
    }

    pub fn deref_matcher_type(
        &mut self,
        pools: &mut Pools,
        sink: &mut dyn RegisterSink,
        idx: u32,
    ) {
        let died = self.matcher_types.deref(idx).is_some();
        if pools.matcher_types.deref(idx) == 0 {
            pools.matcher_types.free(idx);
        }
        if died {
            self.clear_record(sink, ObjKind::MatcherFlowType, idx);
        }
    }

    pub fn add_learn_recipe(
        &mut self,
        pools: &mut Pools,
        sink: &mut dyn RegisterSink,
        cfg: &LearnRecipeCfg,
    ) -> Result<u32> {
        let out = self.learn_recipes.add(cfg)?;
        if out.created {
            pools.learn_recipes.claim(out.index);
            let words = [u32::from(cfg.group), cfg.matcher_recipe];
            sink.write(
                ObjKind::LearnRecipe,
                out.index,
                FieldGroup::Content,
                &words,
            );
            sink.flush(ObjKind::LearnRecipe, out.index);
        } else {
            pools.learn_recipes.add_ref(out.index);
        }
        Ok(out.index)
    }

    pub fn deref_learn_recipe(
        &mut self,
        pools: &mut Pools,
        sink: &mut dyn RegisterSink,
        idx: u32,
    ) {
        let died = self.learn_recipes.deref(idx).is_some();
        if pools.learn_recipes.deref(idx) == 0 {
            pools.learn_recipes.free(idx);
        }
        if died {
            self.clear_record(sink, ObjKind::LearnRecipe, idx);
        }
    }

    pub fn add_learn_type(
        &mut self,
        pools: &mut Pools,
        sink: &mut dyn RegisterSink,
        cfg: &LearnTypeCfg,
    ) -> Result<u32> {
        let out = self.learn_types.add(cfg)?;
        if out.created {
            pools.learn_types.claim(out.index);
            let words =
                [u32::from(cfg.flow_type), cfg.action_set, cfg.age];
            sink.write(
                ObjKind::LearnFlowType,
                out.index,
                FieldGroup::Content,
                &words,
            );
            sink.flush(ObjKind::LearnFlowType, out.index);
        } else {
            pools.learn_types.add_ref(out.index);
        }
        Ok(out.index)
    }

    pub fn deref_learn_type(
        &mut self,
        pools: &mut Pools,
        sink: &mut dyn RegisterSink,
        idx: u32,
    ) {
        let died = self.learn_types.deref(idx).is_some();
        if pools.learn_types.deref(idx) == 0 {
            pools.learn_types.free(idx);
        }
        if died {
            self.clear_record(sink, ObjKind::LearnFlowType, idx);
        }
    }

    /// The aggregate release fan-out: drop every index a flow holds,
    /// children after the aggregates that reference them.
    pub fn deref_idxs(
        &mut self,
        pools: &mut Pools,
        sink: &mut dyn RegisterSink,
        objs: &FlowObjects,
    ) {
        if let Some(idx) = objs.match_set {
            self.deref_match_set(idx);
        }
        if let Some(idx) = objs.classifier_params {
            self.deref_classifier(idx);
        }
        if let Some(idx) = objs.learn_type {
            self.deref_learn_type(pools, sink, idx);
        }
        if let Some(idx) = objs.learn_recipe {
            self.deref_learn_recipe(pools, sink, idx);
        }
        if let Some(idx) = objs.matcher_type {
            self.deref_matcher_type(pools, sink, idx);
        }
        if let Some(idx) = objs.matcher_recipe {
            self.deref_matcher_recipe(pools, sink, idx);
        }
        if let Some(idx) = objs.action_set {
            self.deref_action(pools, sink, idx);
        }
        if let Some(idx) = objs.editor_ext {
            self.deref_editor_ext(pools, sink, idx);
        }
        if let Some(idx) = objs.editor {
            self.deref_editor(sink, idx);
        }
        if let Some(idx) = objs.slice {
            self.deref_slice(sink, idx);
        }
        if let Some(idx) = objs.age {
            self.deref_age(sink, idx);
        }
        if let Some(idx) = objs.hash {
            self.deref_hash(sink, idx);
        }
        if let Some(idx) = objs.conn {
            self.deref_conn(sink, idx);
        }
        if let Some(idx) = objs.output {
            self.deref_output(pools, sink, idx);
        }
    }

    /// Zero a dead record in hardware.
    fn clear_record(
        &self,
        sink: &mut dyn RegisterSink,
        kind: ObjKind,
        idx: u32,
    ) {
        sink.write(kind, idx, FieldGroup::Content, &[]);
        sink.flush(kind, idx);
    }
}
