// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The register-programming seam.
//!
//! The engine computes *what* lives at each hardware index; pushing
//! those bits over the admin channel belongs to the driver's register
//! transport, behind [`RegisterSink`]. The engine's contract with the
//! sink: every record's field-group writes are followed by exactly
//! one flush for that record before any other record's writes begin,
//! and slot relocation is a copy of every group followed by a clear
//! of the source.
//!
//! All calls are synchronous and are made with the device lock held;
//! implementations must not block on I/O completion.

use alloc::vec::Vec;
use ofe_api::ObjKind;

/// One independently programmable field group of a hardware record.
///
/// Most object kinds are a single `Content` group; classifier slots
/// split across several register files that are written separately.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldGroup {
    /// Classifier protocol-mask fields.
    Proto,
    /// Classifier error-mask fields.
    Error,
    /// Classifier port-mask field.
    Ports,
    /// Classifier output routing.
    Output,
    /// Classifier key-matcher/flow-learn enable bitmaps.
    KeyEnables,
    /// The whole record, for single-group kinds.
    Content,
}

/// Field groups a classifier slot participates in, in programming
/// order.
pub const CFN_GROUPS: [FieldGroup; 5] = [
    FieldGroup::Proto,
    FieldGroup::Error,
    FieldGroup::Ports,
    FieldGroup::Output,
    FieldGroup::KeyEnables,
];

pub trait RegisterSink {
    /// Program one field group of `kind`'s record at `index`.
    fn write(
        &mut self,
        kind: ObjKind,
        index: u32,
        group: FieldGroup,
        words: &[u32],
    );

    /// Commit the record at `index`. Always follows that record's
    /// writes.
    fn flush(&mut self, kind: ObjKind, index: u32);

    /// Copy one field group of a classifier slot to another slot.
    fn copy(&mut self, group: FieldGroup, src: u32, dst: u32);

    /// Clear a classifier slot.
    fn clear(&mut self, slot: u32);
}

/// Discards everything. Stands in until a transport is attached, and
/// serves tests that don't care about programming order.
#[derive(Debug, Default)]
pub struct NullSink;

impl RegisterSink for NullSink {
    fn write(
        &mut self,
        _kind: ObjKind,
        _index: u32,
        _group: FieldGroup,
        _words: &[u32],
    ) {
    }

    fn flush(&mut self, _kind: ObjKind, _index: u32) {}

    fn copy(&mut self, _group: FieldGroup, _src: u32, _dst: u32) {}

    fn clear(&mut self, _slot: u32) {}
}

/// One recorded programming call.
#[cfg(any(feature = "test-help", test))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HwOp {
    Write { kind: ObjKind, index: u32, group: FieldGroup, words: Vec<u32> },
    Flush { kind: ObjKind, index: u32 },
    Copy { group: FieldGroup, src: u32, dst: u32 },
    Clear { slot: u32 },
}

/// Captures the exact call sequence for assertions on programming
/// order.
#[cfg(any(feature = "test-help", test))]
#[derive(Debug, Default)]
pub struct HwRecorder {
    pub ops: Vec<HwOp>,
}

#[cfg(any(feature = "test-help", test))]
impl RegisterSink for HwRecorder {
    fn write(
        &mut self,
        kind: ObjKind,
        index: u32,
        group: FieldGroup,
        words: &[u32],
    ) {
        self.ops.push(HwOp::Write {
            kind,
            index,
            group,
            words: words.to_vec(),
        });
    }

    fn flush(&mut self, kind: ObjKind, index: u32) {
        self.ops.push(HwOp::Flush { kind, index });
    }

    fn copy(&mut self, group: FieldGroup, src: u32, dst: u32) {
        self.ops.push(HwOp::Copy { group, src, dst });
    }

    fn clear(&mut self, slot: u32) {
        self.ops.push(HwOp::Clear { slot });
    }
}
