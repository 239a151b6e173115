// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Engine errors and the dump/introspection response types.

use crate::flow::FlowId;
use crate::flow::FlowKind;
use crate::ObjKind;
use crate::ResourceKind;
use alloc::string::String;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

/// Every failure the engine reports. All errors are synchronous and
/// returned to the direct caller; the engine never retries internally
/// and never leaves a partial install behind (references taken before
/// a failure are unwound before the error is returned).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OfeError {
    BadState(String),
    /// Every CAM bank slot for this key is occupied and no cuckoo
    /// relocation chain freed one.
    CamExhausted,
    /// No free classifier slot remains in either relocation direction.
    ClassifierExhausted,
    DeviceExists(String),
    DeviceNotFound(String),
    /// Editor extension payload over the hardware limit.
    EditorDataTooLong {
        len: usize,
    },
    FlowNotFound(FlowId),
    /// The descriptor's group is outside the learn-recipe range.
    InvalidGroup {
        group: u8,
        max: u32,
    },
    InvalidQueue {
        queue: u16,
        max: u32,
    },
    /// The fragment set does not fit the extractor slot budget.
    KeyTooWide,
    /// A fragment mask fits no canonical CAM shape and the fragment
    /// is not ternary-eligible.
    MaskNotSupported,
    /// An output list with no destinations and no drop flag, or over
    /// the entry limit.
    OutputListInvalid,
    PoolExhausted(ResourceKind),
    /// All records of an interned-object table hold live content.
    TableExhausted(ObjKind),
    /// No ternary record is free across any legal start bank.
    TcamExhausted,
}

/// Occupancy of one resource pool.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PoolDump {
    pub kind: ResourceKind,
    pub capacity: u32,
    pub used: u32,
}

/// Occupancy of one interned-object table.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TableDump {
    pub kind: ObjKind,
    pub capacity: u32,
    pub live: u32,
}

/// One bound classifier slot.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClassifierSlotDump {
    pub slot: u32,
    pub sort_key: u64,
    pub match_set: u32,
    pub flow_type: u8,
    pub refs: u32,
}

/// One live flow handle.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlowDump {
    pub id: FlowId,
    pub kind: FlowKind,
    pub group: u8,
    pub priority: u8,
}

/// Full engine state for one device, for debugging or administrative
/// purposes.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DumpDeviceResp {
    pub name: String,
    pub pools: Vec<PoolDump>,
    pub cam_entries: u32,
    pub tcam_entries: u32,
    pub tables: Vec<TableDump>,
    pub classifier: Vec<ClassifierSlotDump>,
    pub flows: Vec<FlowDump>,
}
