// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Flow lifecycle glue: one device instance, its lock, and the
//! translation from front-end flow descriptors to placed hardware
//! state.
//!
//! Every public operation takes the device mutex, runs to completion,
//! and returns; nothing suspends and nothing performs I/O while the
//! lock is held. An install that fails part-way unwinds every
//! reference it already took — the caller never sees a half-bound
//! flow.

use crate::engine::classifier::ActiveMatrix;
use crate::engine::classifier::ClassifierMap;
use crate::engine::hw::RegisterSink;
use crate::engine::key;
use crate::engine::key::PackedKey;
use crate::engine::matcher::KeyMatcher;
use crate::engine::matcher::Placement;
use crate::engine::objects::FlowObjects;
use crate::engine::objects::ObjectDb;
use crate::engine::objects::Pools;
use crate::engine::Result;
use crate::sync::KMutex;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::string::ToString;
use alloc::sync::Arc;
use alloc::vec::Vec;
use ofe_api::ActionSetCfg;
use ofe_api::AgeCfg;
use ofe_api::ClassifierCfg;
use ofe_api::ConnCfg;
use ofe_api::DeviceCaps;
use ofe_api::DumpDeviceResp;
use ofe_api::EditorExtCfg;
use ofe_api::FieldAnchor;
use ofe_api::FlowDump;
use ofe_api::FlowId;
use ofe_api::FlowKind;
use ofe_api::FlowSpec;
use ofe_api::LearnRecipeCfg;
use ofe_api::LearnTypeCfg;
use ofe_api::MatchFragment;
use ofe_api::MatchSetCfg;
use ofe_api::MatcherTypeCfg;
use ofe_api::MatcherRecipeCfg;
use ofe_api::OfeError;
use ofe_api::OutputCfg;
use ofe_api::OutputDest;
use ofe_api::PoolDump;
use ofe_api::ProtoMask;

/// One live flow: the indices it holds, where its key sits, and how
/// it persists.
#[derive(Debug)]
struct FlowHandle {
    id: FlowId,
    kind: FlowKind,
    group: u8,
    priority: u8,
    flow_type: u8,
    objs: FlowObjects,
    placement: Option<Placement>,
}

struct DeviceState {
    pools: Pools,
    matcher: KeyMatcher,
    db: ObjectDb,
    classifier: ClassifierMap,
    matrices: BTreeMap<u8, ActiveMatrix>,
    flows: BTreeMap<FlowId, FlowHandle>,
    next_flow: FlowId,
    counter: u32,
    sink: Box<dyn RegisterSink + Send>,
}

/// Everything an install acquires, in acquisition order, so a
/// mid-flight failure can hand it all back.
#[derive(Default)]
struct InstallProgress {
    objs: FlowObjects,
    placement: Option<Placement>,
    matrix_ms: Option<u32>,
    matrix_ft: Option<u8>,
}

pub struct Device {
    name: String,
    caps: DeviceCaps,
    state: KMutex<DeviceState>,
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device").field("name", &self.name).finish()
    }
}

/// The protocol classes a fragment set can possibly admit, from the
/// anchors it extracts at. The front end narrows this further via the
/// side-channel word when it needs to.
fn proto_mask(frags: &[MatchFragment]) -> ProtoMask {
    let mut mask = ProtoMask::ETHER;
    for frag in frags {
        mask |= match frag.anchor {
            FieldAnchor::L2 | FieldAnchor::Meta => ProtoMask::empty(),
            FieldAnchor::L3 | FieldAnchor::InnerL3 => {
                ProtoMask::IPV4 | ProtoMask::IPV6
            }
            FieldAnchor::L4 | FieldAnchor::InnerL4 => {
                ProtoMask::TCP | ProtoMask::UDP | ProtoMask::SCTP
            }
            FieldAnchor::Tunnel => ProtoMask::TUNNEL,
        };
    }
    mask
}

impl Device {
    pub fn new(
        name: &str,
        caps: DeviceCaps,
        sink: Box<dyn RegisterSink + Send>,
    ) -> Result<Self> {
        if caps.tcam_records == 0 || caps.tcam_records > 64 {
            return Err(OfeError::BadState(format!(
                "tcam record depth {} unsupported",
                caps.tcam_records
            )));
        }
        if caps.queues == 0
            || caps.cam_banks == 0
            || caps.cam_records == 0
            || caps.classifier_slots == 0
            || caps.learn_recipes == 0
        {
            return Err(OfeError::BadState(
                "device capabilities name an empty table".to_string(),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            caps,
            state: KMutex::new(DeviceState {
                pools: Pools::new(&caps),
                matcher: KeyMatcher::new(&caps),
                db: ObjectDb::new(&caps),
                classifier: ClassifierMap::new(caps.classifier_slots),
                matrices: BTreeMap::new(),
                flows: BTreeMap::new(),
                next_flow: 1,
                counter: 0,
                sink,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    /// Install one flow. On success the returned id names the flow
    /// until it is removed; on failure every reference the install
    /// took has already been returned.
    pub fn flow_add(&self, spec: &FlowSpec) -> Result<FlowId> {
        if u32::from(spec.group) > self.caps.learn_recipes {
            return Err(OfeError::InvalidGroup {
                group: spec.group,
                max: self.caps.learn_recipes,
            });
        }
        let (recipe, key) = key::pack(&spec.fragments)?;

        let mut st = self.state.lock();
        let id = st.next_flow;
        let mut prog = InstallProgress::default();
        match Self::install(&mut st, &self.caps, id, spec, &recipe, &key, &mut prog)
        {
            Ok(()) => {
                st.next_flow += 1;
                let kind = if spec.group > 0 {
                    FlowKind::Learned
                } else {
                    FlowKind::Transient
                };
                st.flows.insert(
                    id,
                    FlowHandle {
                        id,
                        kind,
                        group: spec.group,
                        priority: spec.priority,
                        flow_type: spec.flow_type,
                        objs: prog.objs,
                        placement: prog.placement,
                    },
                );
                Ok(id)
            }
            Err(e) => {
                crate::engine::err!(
                    "flow install failed on {}: {:?}",
                    self.name,
                    e
                );
                Self::unwind(&mut st, spec.group, prog);
                Err(e)
            }
        }
    }

    /// Remove a flow, handing back every resource it held.
    pub fn flow_remove(&self, id: FlowId) -> Result<()> {
        let mut st = self.state.lock();
        Self::remove_locked(&mut st, id)
    }

    /// Remove every flow on the device through the normal removal
    /// path, leaving the reserved defaults in place.
    pub fn clear(&self) {
        let mut st = self.state.lock();
        let ids: Vec<FlowId> = st.flows.keys().copied().collect();
        for id in ids {
            // Unwrap safety: ids were read under this same lock.
            Self::remove_locked(&mut st, id).unwrap();
        }
    }

    pub fn num_flows(&self) -> u32 {
        self.state.lock().flows.len() as u32
    }

    pub fn dump(&self) -> DumpDeviceResp {
        let st = self.state.lock();
        let mut pools = Vec::with_capacity(8);
        let cfn_pool = st.classifier.pool();
        pools.push(PoolDump {
            kind: cfn_pool.kind(),
            capacity: cfn_pool.capacity(),
            used: cfn_pool.used_count(),
        });
        pools.extend(st.pools.dump());

        DumpDeviceResp {
            name: self.name.clone(),
            pools,
            cam_entries: st.matcher.cam().len(),
            tcam_entries: st.matcher.tcam().len(),
            tables: st.db.dump(),
            classifier: st.classifier.dump(),
            flows: st
                .flows
                .values()
                .map(|f| FlowDump {
                    id: f.id,
                    kind: f.kind,
                    group: f.group,
                    priority: f.priority,
                })
                .collect(),
        }
    }

    fn install(
        st: &mut DeviceState,
        caps: &DeviceCaps,
        id: FlowId,
        spec: &FlowSpec,
        recipe: &MatcherRecipeCfg,
        key: &PackedKey,
        prog: &mut InstallProgress,
    ) -> Result<()> {
        let DeviceState {
            ref mut pools,
            ref mut matcher,
            ref mut db,
            ref mut classifier,
            ref mut matrices,
            ref mut counter,
            ref mut sink,
            ..
        } = *st;
        let sink: &mut dyn RegisterSink = sink.as_mut();
        let actions = &spec.actions;

        // Action-side objects first: they are pure interning and the
        // cheapest to hand back.
        let mut entries = Vec::new();
        for &q in &actions.queues {
            if u32::from(q) >= caps.queues {
                return Err(OfeError::InvalidQueue {
                    queue: q,
                    max: caps.queues,
                });
            }
            entries.push(OutputDest::Queue(q));
        }
        if let Some(p) = actions.port {
            entries.push(OutputDest::Port(p));
        }
        let output_cfg = OutputCfg { entries, drop: actions.drop };
        prog.objs.output = Some(db.add_output(pools, sink, &output_cfg)?);

        if let Some(mark) = actions.mark {
            let conn = ConnCfg { mark, track: true };
            prog.objs.conn = Some(db.add_conn(sink, &conn)?);
        }

        let hash_cfg = actions.hash.unwrap_or_default();
        prog.objs.hash = Some(db.add_hash(sink, &hash_cfg)?);

        let age_cfg = actions
            .age_secs
            .map_or_else(AgeCfg::default, |timeout_s| AgeCfg { timeout_s });
        prog.objs.age = Some(db.add_age(sink, &age_cfg)?);

        if let Some(slice) = &actions.slice {
            prog.objs.slice = Some(db.add_slice(sink, slice)?);
        }
        if let Some(edit) = &actions.edit {
            prog.objs.editor = Some(db.add_editor(sink, edit)?);
        }
        if let Some(data) = &actions.edit_data {
            if actions.edit.is_none() {
                return Err(OfeError::BadState(
                    "editor extension data without an editor".to_string(),
                ));
            }
            let ext = EditorExtCfg { data: data.clone() };
            prog.objs.editor_ext =
                Some(db.add_editor_ext(pools, sink, &ext)?);
        }

        let action_cfg = ActionSetCfg {
            // Unwrap safety: set just above.
            output: prog.objs.output.unwrap(),
            hash: prog.objs.hash.unwrap(),
            age: prog.objs.age.unwrap(),
            conn: prog.objs.conn,
            slice: prog.objs.slice,
            editor: prog.objs.editor,
            editor_ext: prog.objs.editor_ext,
        };
        let action_set = db.add_action(pools, sink, &action_cfg)?;
        prog.objs.action_set = Some(action_set);

        // Match side: recipe, filter type, then the key itself.
        let recipe_idx = db.add_matcher_recipe(pools, sink, recipe)?;
        prog.objs.matcher_recipe = Some(recipe_idx);

        let mt = MatcherTypeCfg {
            recipe: recipe_idx,
            flow_type: spec.flow_type,
            action_set,
        };
        prog.objs.matcher_type = Some(db.add_matcher_type(pools, sink, &mt)?);

        prog.placement =
            Some(matcher.place(recipe, recipe_idx, key, spec.flow_type, id)?);

        if spec.group == 0 {
            return Ok(());
        }

        // Learn side: the group's recipe, the flow type's trigger,
        // and the classifier binding through the active matrix.
        let lr = LearnRecipeCfg {
            group: spec.group,
            matcher_recipe: recipe_idx,
        };
        let learn_recipe = db.add_learn_recipe(pools, sink, &lr)?;
        prog.objs.learn_recipe = Some(learn_recipe);

        let lt = LearnTypeCfg {
            flow_type: spec.flow_type,
            action_set,
            age: prog.objs.age.unwrap(),
        };
        prog.objs.learn_type = Some(db.add_learn_type(pools, sink, &lt)?);

        let cls_cfg = ClassifierCfg {
            proto: proto_mask(&spec.fragments),
            err: Default::default(),
            port_mask: u64::MAX,
        };
        prog.objs.classifier_params = Some(db.add_classifier(&cls_cfg)?);

        let ms_cfg = MatchSetCfg {
            classifier: prog.objs.classifier_params.unwrap(),
            matcher_recipe: recipe_idx,
            priority: spec.priority,
        };
        let match_set = db.add_match_set(&ms_cfg)?;
        prog.objs.match_set = Some(match_set);

        if let Some(m) = matrices.get(&spec.group) {
            if m.recipe_idx() != learn_recipe {
                return Err(OfeError::BadState(format!(
                    "group {} is keyed by a different recipe",
                    spec.group
                )));
            }
        }
        let matrix = matrices.entry(spec.group).or_insert_with(|| {
            ActiveMatrix::new(learn_recipe, caps.learn_flow_types)
        });

        // Track the sides before the joins run: a failed activation
        // leaves its side installed, and the unwind must take it back
        // out.
        prog.matrix_ms = Some(match_set);
        matrix.add_match_set(
            match_set,
            spec.priority,
            cls_cfg,
            recipe_idx,
            classifier,
            counter,
            sink,
        )?;

        prog.matrix_ft = Some(spec.flow_type);
        matrix.add_flow_type(
            spec.flow_type,
            action_set,
            classifier,
            counter,
            sink,
        )?;

        Ok(())
    }

    /// Hand back everything a failed install acquired, newest first.
    fn unwind(st: &mut DeviceState, group: u8, prog: InstallProgress) {
        let DeviceState {
            ref mut pools,
            ref mut matcher,
            ref mut db,
            ref mut classifier,
            ref mut matrices,
            ref mut sink,
            ..
        } = *st;
        let sink: &mut dyn RegisterSink = sink.as_mut();

        if let Some(matrix) = matrices.get_mut(&group) {
            if let Some(ft) = prog.matrix_ft {
                matrix.remove_flow_type(ft, classifier, sink);
            }
            if let Some(ms) = prog.matrix_ms {
                matrix.remove_match_set(ms, classifier, sink);
            }
            if matrix.is_empty() {
                matrices.remove(&group);
            }
        }
        if let Some(placement) = prog.placement {
            matcher.remove(placement);
        }
        db.deref_idxs(pools, sink, &prog.objs);
    }

    fn remove_locked(st: &mut DeviceState, id: FlowId) -> Result<()> {
        let handle =
            st.flows.remove(&id).ok_or(OfeError::FlowNotFound(id))?;
        let DeviceState {
            ref mut pools,
            ref mut matcher,
            ref mut db,
            ref mut classifier,
            ref mut matrices,
            ref mut sink,
            ..
        } = *st;
        let sink: &mut dyn RegisterSink = sink.as_mut();

        if handle.kind == FlowKind::Learned {
            if let Some(matrix) = matrices.get_mut(&handle.group) {
                matrix.remove_flow_type(handle.flow_type, classifier, sink);
                if let Some(ms) = handle.objs.match_set {
                    matrix.remove_match_set(ms, classifier, sink);
                }
                if matrix.is_empty() {
                    matrices.remove(&handle.group);
                }
            }
        }
        if let Some(placement) = handle.placement {
            matcher.remove(placement);
        }
        db.deref_idxs(pools, sink, &handle.objs);
        Ok(())
    }
}

/// The process-wide device list. Owned by whoever drives the engine
/// and handed by reference to anything needing device lookup; there
/// is no global.
pub struct Registry {
    devices: KMutex<Vec<Arc<Device>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self { devices: KMutex::new(Vec::new()) }
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn insert(&self, dev: Arc<Device>) -> Result<()> {
        let mut devices = self.devices.lock();
        if devices.iter().any(|d| d.name() == dev.name()) {
            return Err(OfeError::DeviceExists(dev.name().to_string()));
        }
        devices.push(dev);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.lock().iter().find(|d| d.name() == name).cloned()
    }

    pub fn remove(&self, name: &str) -> Result<Arc<Device>> {
        let mut devices = self.devices.lock();
        match devices.iter().position(|d| d.name() == name) {
            Some(idx) => Ok(devices.remove(idx)),
            None => Err(OfeError::DeviceNotFound(name.to_string())),
        }
    }
}
