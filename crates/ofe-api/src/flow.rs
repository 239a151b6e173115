// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Flow descriptors: what the front end asks the engine to install.

use crate::key::MatchFragment;
use crate::objects::EditorCfg;
use crate::objects::HashCfg;
use crate::objects::LenAdjustCfg;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

/// Opaque per-device flow identifier handed back on install.
pub type FlowId = u64;

/// How a flow handle persists.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FlowKind {
    /// Installed directly into the matcher; lives until removed.
    Transient,
    /// Installed into the flow-learn tables; the device learns
    /// individual connections against it at runtime.
    Learned,
}

/// The action side of a flow descriptor.
///
/// `None` everywhere plus an empty queue list is a valid descriptor
/// only when `drop` is set.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlowActions {
    /// Receive queues; more than one entry spreads by hash.
    pub queues: Vec<u16>,
    /// Forward out a physical port.
    pub port: Option<u16>,
    pub drop: bool,
    /// Completion-descriptor mark; implies connection parameters.
    pub mark: Option<u32>,
    /// Receive hash override; `None` uses the device default.
    pub hash: Option<HashCfg>,
    /// Aging override in seconds; `None` uses the device default.
    pub age_secs: Option<u32>,
    pub slice: Option<LenAdjustCfg>,
    pub edit: Option<EditorCfg>,
    /// Editor extension payload; requires `edit`.
    pub edit_data: Option<Vec<u8>>,
}

/// A complete flow descriptor: the unit of work handed to the engine
/// by the flow-rule front end.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlowSpec {
    /// Flow-rule group: 0 matches in the base table, 1..N in the
    /// flow-learn tables.
    pub group: u8,
    /// Rule priority; smaller wins.
    pub priority: u8,
    /// Flow type the front end assigned within the group.
    pub flow_type: u8,
    pub fragments: Vec<MatchFragment>,
    pub actions: FlowActions,
}
