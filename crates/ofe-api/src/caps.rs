// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Device capability limits.

use serde::Deserialize;
use serde::Serialize;

/// The classification-pipeline limits discovered from the device at
/// probe time.
///
/// Everything in the engine is sized from this struct once, at device
/// creation; none of the limits may change while the device is live.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DeviceCaps {
    /// Host receive queues.
    pub queues: u32,
    /// CAM banks; also the number of hash banks.
    pub cam_banks: u32,
    /// CAM records per bank.
    pub cam_records: u32,
    /// TCAM records per bank. The bank count itself is architectural
    /// (see the engine) but record depth varies by part.
    pub tcam_records: u32,
    /// Physical classifier-function slots.
    pub classifier_slots: u32,
    /// Key-matcher recipe slots.
    pub matcher_recipes: u32,
    /// Key-matcher filter types.
    pub matcher_flow_types: u32,
    /// Flow-learn recipes; bounds the number of flow-rule groups.
    pub learn_recipes: u32,
    /// Flow-learn filter types.
    pub learn_flow_types: u32,
    /// Action-table records.
    pub action_records: u32,
    /// 32-bit words of replacement-table memory for editor data.
    pub replacement_words: u32,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            queues: 128,
            cam_banks: 6,
            cam_records: 2048,
            tcam_records: 48,
            classifier_slots: 64,
            matcher_recipes: 32,
            matcher_flow_types: 16,
            learn_recipes: 4,
            learn_flow_types: 16,
            action_records: 512,
            replacement_words: 256,
        }
    }
}
