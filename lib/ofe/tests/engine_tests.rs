// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Integration tests driving the whole engine: flows installed,
//! shared, relocated, and removed against a recording register sink.

use ofe::api::*;
use ofe::engine::device::Device;
use ofe::engine::device::Registry;
use ofe::engine::hw::FieldGroup;
use ofe::engine::hw::HwOp;
use ofe::engine::hw::NullSink;
use ofe::engine::hw::RegisterSink;
use std::sync::Arc;
use std::sync::Mutex;

/// A register sink whose call log survives handing the sink to the
/// device.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<HwOp>>>);

impl SharedSink {
    fn ops(&self) -> Vec<HwOp> {
        self.0.lock().unwrap().clone()
    }
}

impl RegisterSink for SharedSink {
    fn write(
        &mut self,
        kind: ObjKind,
        index: u32,
        group: FieldGroup,
        words: &[u32],
    ) {
        self.0.lock().unwrap().push(HwOp::Write {
            kind,
            index,
            group,
            words: words.to_vec(),
        });
    }

    fn flush(&mut self, kind: ObjKind, index: u32) {
        self.0.lock().unwrap().push(HwOp::Flush { kind, index });
    }

    fn copy(&mut self, group: FieldGroup, src: u32, dst: u32) {
        self.0.lock().unwrap().push(HwOp::Copy { group, src, dst });
    }

    fn clear(&mut self, slot: u32) {
        self.0.lock().unwrap().push(HwOp::Clear { slot });
    }
}

fn dev(caps: DeviceCaps) -> Device {
    Device::new("ofe0", caps, Box::new(NullSink)).unwrap()
}

fn table(dump: &DumpDeviceResp, kind: ObjKind) -> &TableDump {
    dump.tables.iter().find(|t| t.kind == kind).unwrap()
}

fn pool(dump: &DumpDeviceResp, kind: ResourceKind) -> &PoolDump {
    dump.pools.iter().find(|p| p.kind == kind).unwrap()
}

/// Match TCP destination port `port`, deliver to `queue`.
fn transient_flow(port: u16, queue: u16) -> FlowSpec {
    FlowSpec {
        group: 0,
        priority: 0,
        flow_type: 1,
        fragments: vec![MatchFragment::word(
            FieldAnchor::L4,
            2,
            u32::from(port),
        )],
        actions: FlowActions { queues: vec![queue], ..Default::default() },
    }
}

/// Match source address `src` + TLS port in group 1.
fn learned_flow(priority: u8, src: u32) -> FlowSpec {
    FlowSpec {
        group: 1,
        priority,
        flow_type: 1,
        fragments: vec![
            MatchFragment::word(FieldAnchor::L3, 12, src),
            MatchFragment::word(FieldAnchor::L4, 0, 443),
        ],
        actions: FlowActions {
            queues: vec![0],
            mark: Some(0x5000),
            ..Default::default()
        },
    }
}

#[test]
fn install_and_remove_transient_flow() {
    let dev = dev(DeviceCaps::default());
    let id = dev.flow_add(&transient_flow(443, 3)).unwrap();

    let dump = dev.dump();
    assert_eq!(dump.cam_entries, 1);
    assert_eq!(dump.tcam_entries, 0);
    assert_eq!(pool(&dump, ResourceKind::Queue).used, 1);
    assert_eq!(pool(&dump, ResourceKind::ActionRecord).used, 1);
    assert_eq!(table(&dump, ObjKind::ActionSet).live, 1);
    assert_eq!(table(&dump, ObjKind::OutputList).live, 1);
    assert_eq!(dump.flows.len(), 1);
    assert_eq!(dump.flows[0].kind, FlowKind::Transient);

    dev.flow_remove(id).unwrap();
    let dump = dev.dump();
    assert_eq!(dump.cam_entries, 0);
    assert_eq!(pool(&dump, ResourceKind::Queue).used, 0);
    assert_eq!(table(&dump, ObjKind::ActionSet).live, 0);
    // The reserved defaults stay.
    assert_eq!(table(&dump, ObjKind::HashConfig).live, 1);
    assert_eq!(table(&dump, ObjKind::AgeTimeout).live, 1);
    assert!(dump.flows.is_empty());
}

#[test]
fn identical_actions_share_hardware_objects() {
    let dev = dev(DeviceCaps::default());
    let a = dev.flow_add(&transient_flow(80, 5)).unwrap();
    let b = dev.flow_add(&transient_flow(443, 5)).unwrap();
    assert_ne!(a, b);

    let dump = dev.dump();
    // Two keys, one interned copy of everything else.
    assert_eq!(dump.cam_entries, 2);
    assert_eq!(table(&dump, ObjKind::ActionSet).live, 1);
    assert_eq!(table(&dump, ObjKind::OutputList).live, 1);
    assert_eq!(table(&dump, ObjKind::MatcherRecipe).live, 1);
    assert_eq!(pool(&dump, ResourceKind::MatcherRecipe).used, 1);

    // Removing one sharer leaves the objects for the other.
    dev.flow_remove(a).unwrap();
    let dump = dev.dump();
    assert_eq!(dump.cam_entries, 1);
    assert_eq!(table(&dump, ObjKind::ActionSet).live, 1);

    dev.flow_remove(b).unwrap();
    let dump = dev.dump();
    assert_eq!(table(&dump, ObjKind::ActionSet).live, 0);
    assert_eq!(pool(&dump, ResourceKind::MatcherRecipe).used, 0);
}

#[test]
fn learned_flow_binds_classifier_slot() {
    let dev = dev(DeviceCaps::default());
    let id = dev.flow_add(&learned_flow(5, 0x0a00_0001)).unwrap();

    let dump = dev.dump();
    assert_eq!(dump.flows[0].kind, FlowKind::Learned);
    assert_eq!(dump.classifier.len(), 1);
    assert_eq!(pool(&dump, ResourceKind::ClassifierSlot).used, 1);
    assert_eq!(table(&dump, ObjKind::LearnRecipe).live, 1);
    assert_eq!(table(&dump, ObjKind::LearnFlowType).live, 1);
    assert_eq!(table(&dump, ObjKind::MatchSet).live, 1);
    assert_eq!(table(&dump, ObjKind::ConnParams).live, 1);

    dev.flow_remove(id).unwrap();
    let dump = dev.dump();
    assert!(dump.classifier.is_empty());
    assert_eq!(pool(&dump, ResourceKind::ClassifierSlot).used, 0);
    assert_eq!(table(&dump, ObjKind::LearnRecipe).live, 0);
    assert_eq!(table(&dump, ObjKind::MatchSet).live, 0);
}

#[test]
fn priority_orders_classifier_slots() {
    let dev = dev(DeviceCaps::default());
    dev.flow_add(&learned_flow(1, 0x0a00_0001)).unwrap();
    dev.flow_add(&learned_flow(10, 0x0a00_0002)).unwrap();
    // Priority 5 arrives last and must land between the other two,
    // relocating the 10.
    dev.flow_add(&learned_flow(5, 0x0a00_0003)).unwrap();

    let dump = dev.dump();
    assert_eq!(dump.classifier.len(), 3);
    let by_slot: Vec<(u32, u64)> = dump
        .classifier
        .iter()
        .map(|c| (c.slot, c.sort_key))
        .collect();
    for pair in by_slot.windows(2) {
        assert!(pair[0].0 < pair[1].0);
        assert!(pair[0].1 < pair[1].1);
    }
    let prios: Vec<u8> = dump
        .classifier
        .iter()
        .map(|c| (c.sort_key >> 56) as u8)
        .collect();
    assert_eq!(prios, vec![1, 5, 10]);
}

#[test]
fn failed_install_leaves_no_trace() {
    let caps = DeviceCaps { classifier_slots: 1, ..DeviceCaps::default() };
    let dev = dev(caps);
    dev.flow_add(&learned_flow(1, 0x0a00_0001)).unwrap();
    let before = dev.dump();

    // A second match set has nowhere to bind: the whole install must
    // roll back.
    let err = dev.flow_add(&learned_flow(2, 0x0a00_0002)).unwrap_err();
    assert_eq!(err, OfeError::ClassifierExhausted);
    assert_eq!(dev.dump(), before);
}

#[test]
fn invalid_queue_rejected_up_front() {
    let dev = dev(DeviceCaps { queues: 4, ..DeviceCaps::default() });
    let err = dev.flow_add(&transient_flow(80, 9)).unwrap_err();
    assert_eq!(err, OfeError::InvalidQueue { queue: 9, max: 4 });
    let dump = dev.dump();
    assert_eq!(dump.cam_entries, 0);
    assert_eq!(pool(&dump, ResourceKind::Queue).used, 0);
    assert_eq!(table(&dump, ObjKind::OutputList).live, 0);
}

#[test]
fn programming_is_write_then_flush_per_record() {
    let sink = SharedSink::default();
    let dev =
        Device::new("ofe0", DeviceCaps::default(), Box::new(sink.clone()))
            .unwrap();
    dev.flow_add(&learned_flow(3, 0x0a00_0009)).unwrap();

    let ops = sink.ops();
    assert!(!ops.is_empty());
    let mut i = 0;
    while i < ops.len() {
        let HwOp::Write { kind, index, .. } = &ops[i] else {
            i += 1;
            continue;
        };
        // Every write run for a record ends in that record's flush
        // before anything else is programmed.
        let mut j = i + 1;
        loop {
            assert!(j < ops.len(), "record ({:?}, {}) never flushed", kind, index);
            match &ops[j] {
                HwOp::Write { kind: k, index: x, .. }
                    if k == kind && x == index =>
                {
                    j += 1;
                }
                HwOp::Flush { kind: k, index: x } => {
                    assert_eq!((k, x), (kind, index));
                    break;
                }
                other => {
                    panic!(
                        "record ({:?}, {}) interleaved with {:?}",
                        kind, index, other
                    );
                }
            }
        }
        i = j + 1;
    }
}

#[test]
fn relocation_copies_then_clears() {
    let sink = SharedSink::default();
    let dev =
        Device::new("ofe0", DeviceCaps::default(), Box::new(sink.clone()))
            .unwrap();
    dev.flow_add(&learned_flow(1, 1)).unwrap();
    dev.flow_add(&learned_flow(10, 2)).unwrap();
    let before = sink.ops().len();
    dev.flow_add(&learned_flow(5, 3)).unwrap();

    // The priority-10 slot moved up one: a copy of every group, then
    // the source clear, before the new slot is programmed.
    let ops = &sink.ops()[before..];
    let copies: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter_map(|(i, op)| {
            matches!(op, HwOp::Copy { src: 1, dst: 2, .. }).then_some(i)
        })
        .collect();
    assert_eq!(copies.len(), 5);
    let clear = ops
        .iter()
        .position(|op| matches!(op, HwOp::Clear { slot: 1 }))
        .unwrap();
    assert!(copies.iter().all(|&c| c < clear));
}

#[test]
fn clear_releases_everything() {
    let dev = dev(DeviceCaps::default());
    dev.flow_add(&transient_flow(80, 1)).unwrap();
    dev.flow_add(&transient_flow(443, 2)).unwrap();
    dev.flow_add(&learned_flow(5, 0x0a00_0001)).unwrap();
    assert_eq!(dev.num_flows(), 3);

    dev.clear();
    assert_eq!(dev.num_flows(), 0);
    let dump = dev.dump();
    assert_eq!(dump.cam_entries, 0);
    assert_eq!(dump.tcam_entries, 0);
    assert!(dump.classifier.is_empty());
    for p in &dump.pools {
        assert_eq!(p.used, 0, "pool {} not drained", p.kind);
    }
    for t in &dump.tables {
        let expect =
            matches!(t.kind, ObjKind::HashConfig | ObjKind::AgeTimeout);
        assert_eq!(t.live, u32::from(expect), "table {} not drained", t.kind);
    }
}

#[test]
fn registry_round_trip() {
    let registry = Registry::new();
    let dev = Arc::new(
        Device::new("ofe0", DeviceCaps::default(), Box::new(NullSink))
            .unwrap(),
    );
    registry.insert(dev.clone()).unwrap();
    assert_eq!(registry.len(), 1);

    let dup = Arc::new(
        Device::new("ofe0", DeviceCaps::default(), Box::new(NullSink))
            .unwrap(),
    );
    assert_eq!(
        registry.insert(dup).unwrap_err(),
        OfeError::DeviceExists("ofe0".to_string())
    );

    assert!(registry.get("ofe0").is_some());
    registry.remove("ofe0").unwrap();
    assert!(registry.get("ofe0").is_none());
    assert_eq!(
        registry.remove("ofe0").unwrap_err(),
        OfeError::DeviceNotFound("ofe0".to_string())
    );
}

#[test]
fn nonsense_caps_rejected() {
    let no_tcam = DeviceCaps { tcam_records: 0, ..DeviceCaps::default() };
    assert!(Device::new("bad", no_tcam, Box::new(NullSink)).is_err());
    let deep_tcam = DeviceCaps { tcam_records: 80, ..DeviceCaps::default() };
    assert!(Device::new("bad", deep_tcam, Box::new(NullSink)).is_err());
    let no_queues = DeviceCaps { queues: 0, ..DeviceCaps::default() };
    assert!(Device::new("bad", no_queues, Box::new(NullSink)).is_err());
}

#[test]
fn unknown_flow_remove_fails() {
    let dev = dev(DeviceCaps::default());
    assert_eq!(dev.flow_remove(7).unwrap_err(), OfeError::FlowNotFound(7));
}
