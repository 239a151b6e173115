// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod caps;
pub mod cmd;
pub mod flow;
pub mod key;
pub mod objects;

pub use caps::*;
pub use cmd::*;
pub use flow::*;
pub use key::*;
pub use objects::*;

/// The overall version of the API. Anytime a type in this crate is
/// added, removed, or modified, this number should increment, so that
/// the flow-rule front end and the offload engine can verify they were
/// compiled against the same definitions.
pub const API_VERSION: u64 = 3;

/// A hardware resource class tracked by a reference-counted slot pool.
///
/// Every limited resource in the classification pipeline is accounted
/// for under one of these kinds. The pool sizes are derived from
/// [`DeviceCaps`] at device init and are immutable afterwards.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ResourceKind {
    /// Host receive queues referenced by output lists.
    Queue,
    /// Physical classifier-function slots.
    ClassifierSlot,
    /// Key-matcher recipe slots.
    MatcherRecipe,
    /// Key-matcher filter-type slots.
    MatcherFlowType,
    /// Flow-learn recipe slots, one per flow-rule group.
    LearnRecipe,
    /// Flow-learn filter-type slots.
    LearnFlowType,
    /// Action-table records.
    ActionRecord,
    /// Replacement-table words backing editor extension data.
    ReplacementWord,
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Queue => "queue",
            Self::ClassifierSlot => "classifier-slot",
            Self::MatcherRecipe => "matcher-recipe",
            Self::MatcherFlowType => "matcher-flow-type",
            Self::LearnRecipe => "learn-recipe",
            Self::LearnFlowType => "learn-flow-type",
            Self::ActionRecord => "action-record",
            Self::ReplacementWord => "replacement-word",
        };
        write!(f, "{}", s)
    }
}

/// The interned hardware-object kinds held by the object database.
///
/// Two records of the same kind with bit-identical content are the
/// same logical object; the database hands out one index per distinct
/// content and counts references to it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ObjKind {
    ActionSet,
    MatchSet,
    ConnParams,
    OutputList,
    LenAdjust,
    Editor,
    EditorExt,
    HashConfig,
    AgeTimeout,
    ClassifierParams,
    LearnRecipe,
    LearnFlowType,
    MatcherRecipe,
    MatcherFlowType,
}

impl Display for ObjKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::ActionSet => "action-set",
            Self::MatchSet => "match-set",
            Self::ConnParams => "conn-params",
            Self::OutputList => "output-list",
            Self::LenAdjust => "len-adjust",
            Self::Editor => "editor",
            Self::EditorExt => "editor-ext",
            Self::HashConfig => "hash-config",
            Self::AgeTimeout => "age-timeout",
            Self::ClassifierParams => "classifier-params",
            Self::LearnRecipe => "learn-recipe",
            Self::LearnFlowType => "learn-flow-type",
            Self::MatcherRecipe => "matcher-recipe",
            Self::MatcherFlowType => "matcher-flow-type",
        };
        write!(f, "{}", s)
    }
}
