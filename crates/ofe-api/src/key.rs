// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Match-field fragments as produced by the flow-rule front end.

use serde::Deserialize;
use serde::Serialize;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Maximum number of 32-bit words a packed key may occupy.
pub const KEY_WORDS_MAX: usize = 10;

/// Words in a quad-word extractor slot.
pub const QUAD_WORDS: usize = 4;

/// The header anchor a fragment's bytes are extracted relative to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum FieldAnchor {
    /// Start of the outer Ethernet header.
    L2,
    /// Start of the outer IP header.
    L3,
    /// Start of the outer transport header.
    L4,
    /// Start of the tunnel payload.
    Tunnel,
    /// Start of the inner IP header.
    InnerL3,
    /// Start of the inner transport header.
    InnerL4,
    /// Side-channel metadata word (ingress port, colour). Not packet
    /// bytes; always a single word and only matchable in CAM.
    Meta,
}

/// One match-field fragment: up to four value/mask words extracted at
/// `byte_off` relative to `anchor`.
///
/// The front end translates each flow-rule item into one or more
/// fragments; the key-match engine packs them into hardware words.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MatchFragment {
    pub value: [u32; QUAD_WORDS],
    pub mask: [u32; QUAD_WORDS],
    /// 1, 2 or 4.
    pub word_len: u8,
    pub anchor: FieldAnchor,
    pub byte_off: i16,
    /// Whether this fragment may be matched from a ternary bank. Meta
    /// fragments never are.
    pub tcam_ok: bool,
}

impl MatchFragment {
    /// A single-word fragment with an exact (full) mask.
    pub fn word(anchor: FieldAnchor, byte_off: i16, value: u32) -> Self {
        Self {
            value: [value, 0, 0, 0],
            mask: [u32::MAX, 0, 0, 0],
            word_len: 1,
            anchor,
            byte_off,
            tcam_ok: anchor != FieldAnchor::Meta,
        }
    }

    /// A four-word fragment with an exact (full) mask.
    pub fn quad(anchor: FieldAnchor, byte_off: i16, value: [u32; 4]) -> Self {
        Self {
            value,
            mask: [u32::MAX; 4],
            word_len: 4,
            anchor,
            byte_off,
            tcam_ok: true,
        }
    }

    /// A fragment with a caller-supplied mask.
    pub fn masked(
        anchor: FieldAnchor,
        byte_off: i16,
        word_len: u8,
        value: [u32; 4],
        mask: [u32; 4],
    ) -> Self {
        Self { value, mask, word_len, anchor, byte_off, tcam_ok: true }
    }

    /// A side-channel metadata fragment.
    pub fn meta(value: u32, mask: u32) -> Self {
        Self {
            value: [value, 0, 0, 0],
            mask: [mask, 0, 0, 0],
            word_len: 1,
            anchor: FieldAnchor::Meta,
            byte_off: 0,
            tcam_ok: false,
        }
    }

    pub fn is_meta(&self) -> bool {
        self.anchor == FieldAnchor::Meta
    }

    /// The value words this fragment actually uses.
    pub fn value_words(&self) -> &[u32] {
        &self.value[..usize::from(self.word_len)]
    }

    /// The mask words this fragment actually uses.
    pub fn mask_words(&self) -> &[u32] {
        &self.mask[..usize::from(self.word_len)]
    }
}

/// The packed words of one canonical key (value or mask side).
///
/// Stored as full-width hardware words; only the first `len` words of
/// the owning key are meaningful. The byte view is what the ternary
/// banks consume.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    FromBytes,
    Immutable,
    IntoBytes,
    KnownLayout,
    PartialEq,
    Serialize,
)]
#[repr(C)]
pub struct KeyWords(pub [u32; KEY_WORDS_MAX]);

impl KeyWords {
    /// The bytes of words `0..len`, in hardware (little-endian) order.
    pub fn bytes(&self, len: usize) -> &[u8] {
        &self.as_bytes()[..len * 4]
    }
}
