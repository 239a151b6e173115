// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Typed content structs, one per interned hardware-object kind.
//!
//! These are the units of deduplication: the object database compares
//! them field-for-field and hands out one hardware index per distinct
//! value. They carry configuration only; no index or refcount state.

use crate::key::FieldAnchor;
use crate::key::QUAD_WORDS;
use alloc::vec::Vec;
use bitflags::bitflags;
use serde::Deserialize;
use serde::Serialize;

/// Maximum queue/port entries in one output list.
pub const OUTPUT_ENTRIES_MAX: usize = 8;

/// Maximum editor extension payload, in bytes.
pub const EDITOR_DATA_MAX: usize = 64;

/// 32-bit words in a hash key.
pub const HASH_KEY_WORDS: usize = 10;

bitflags! {
    /// Protocol classes a classifier function admits.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
    pub struct ProtoMask: u32 {
        const ETHER = 1 << 0;
        const VLAN = 1 << 1;
        const MPLS = 1 << 2;
        const IPV4 = 1 << 3;
        const IPV6 = 1 << 4;
        const UDP = 1 << 5;
        const TCP = 1 << 6;
        const SCTP = 1 << 7;
        const ICMP = 1 << 8;
        const TUNNEL = 1 << 9;
    }
}

bitflags! {
    /// Frame-error conditions a classifier function tolerates.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
    pub struct ErrMask: u16 {
        const FCS = 1 << 0;
        const TRUNCATED = 1 << 1;
        const L3_CSUM = 1 << 2;
        const L4_CSUM = 1 << 3;
    }
}

/// One destination in an output list.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OutputDest {
    /// Deliver to a host receive queue.
    Queue(u16),
    /// Forward out a physical port.
    Port(u16),
}

/// Output list: where matched packets go. An empty list with `drop`
/// set is a black-hole entry.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct OutputCfg {
    pub entries: Vec<OutputDest>,
    pub drop: bool,
}

/// Connection parameters: the state carried on learned connections.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConnCfg {
    /// Mark delivered in the completion descriptor.
    pub mark: u32,
    /// Whether the connection tracker observes this flow.
    pub track: bool,
}

/// Head-slice parameters: truncate delivered packets at a header-
/// relative offset.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LenAdjustCfg {
    pub anchor: FieldAnchor,
    pub byte_off: i16,
    pub slice_len: u16,
}

/// Packet-editor parameters for transmitted packets.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EditorCfg {
    /// Net length change applied by the editor, in bytes.
    pub len_delta: i16,
    pub ttl_dec: bool,
    pub dscp: Option<u8>,
}

/// Editor extension: raw header bytes written by the editor, backed by
/// replacement-table memory.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EditorExtCfg {
    pub data: Vec<u8>,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum HashAlgo {
    /// Hash the 5-tuple as seen on the wire.
    #[default]
    FiveTuple,
    /// Hash the 5-tuple with source/destination sorted, so both
    /// directions of a connection land on one queue.
    FiveTupleSorted,
    /// Hash the destination address only.
    DestOnly,
}

/// Receive-side hash configuration. Index 0 of this kind is the
/// device default and is never released.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct HashCfg {
    pub algo: HashAlgo,
    pub key: [u32; HASH_KEY_WORDS],
}

/// Aging timeout for learned flows. Index 0 of this kind is the
/// device default (no aging) and is never released.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AgeCfg {
    /// Seconds of inactivity before a learned flow is evicted; zero
    /// disables aging.
    pub timeout_s: u32,
}

/// The per-slot classifier-function record: which traffic classes a
/// slot admits at all, before key matching runs.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClassifierCfg {
    pub proto: ProtoMask,
    pub err: ErrMask,
    /// Physical ports this function applies to, one bit per port.
    pub port_mask: u64,
}

/// The match-side aggregate bound (together with a flow type) to a
/// physical classifier slot.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MatchSetCfg {
    /// Classifier-params index.
    pub classifier: u32,
    /// Key-matcher recipe index.
    pub matcher_recipe: u32,
    /// Rule priority; smaller wins.
    pub priority: u8,
}

/// The action-side aggregate: indices of every action object a flow
/// triggers.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ActionSetCfg {
    /// Output-list index.
    pub output: u32,
    /// Hash-config index (0 = device default).
    pub hash: u32,
    /// Age-timeout index (0 = device default).
    pub age: u32,
    pub conn: Option<u32>,
    pub slice: Option<u32>,
    pub editor: Option<u32>,
    pub editor_ext: Option<u32>,
}

/// Flow-learn recipe: how learned flows of one flow-rule group are
/// keyed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LearnRecipeCfg {
    /// Flow-rule group this recipe serves; group 0 never learns.
    pub group: u8,
    /// Key-matcher recipe whose layout the learn tables mirror.
    pub matcher_recipe: u32,
}

/// Flow-learn filter type: what a learned flow of this type triggers.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LearnTypeCfg {
    pub flow_type: u8,
    /// Action-set index.
    pub action_set: u32,
    /// Age-timeout index.
    pub age: u32,
}

/// Key-matcher filter type: binds a recipe's matches of one flow type
/// to an action set.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MatcherTypeCfg {
    /// Key-matcher recipe index.
    pub recipe: u32,
    pub flow_type: u8,
    /// Action-set index.
    pub action_set: u32,
}

/// One extractor slot of a key-matcher recipe: where the slot's words
/// come from and the mask applied to them.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct KeySlotCfg {
    pub anchor: FieldAnchor,
    pub byte_off: i16,
    /// 1, 2 or 4.
    pub word_len: u8,
    pub mask: [u32; QUAD_WORDS],
}

/// Where a packed key is matched from.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum KeyClass {
    Cam,
    Tcam,
}

/// Key-matcher recipe: the deterministic packing of a fragment set
/// into hardware extractor slots. Identical fragment sets always pack
/// to identical recipes, which is what makes recipe interning work.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MatcherRecipeCfg {
    /// Quad-word extractor slots (128 bits each).
    pub qw: [Option<KeySlotCfg>; 2],
    /// Generic single-word extractor slots.
    pub sw: [Option<KeySlotCfg>; 2],
    /// Side-channel metadata word present.
    pub meta: Option<KeySlotCfg>,
    /// Total packed words, side-channel included.
    pub key_words: u8,
    pub class: KeyClass,
    /// CAM entry spanning two consecutive records.
    pub paired: bool,
    /// Whether entries of this recipe may live in the ternary banks
    /// (no side channel, every fragment ternary-eligible, and short
    /// enough for a bank window).
    pub tcam_ok: bool,
}
