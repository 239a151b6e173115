// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Canonical key construction.
//!
//! The front end hands us match-field fragments; the hardware wants
//! fixed extractor slots: two quad-word slots (128 bits each), two
//! generic single-word slots, and one side-channel word. Packing is a
//! fixed greedy policy — largest multi-word fragment first, then
//! single words, side channel last. It is deliberately not
//! search-optimal: determinism is what lets two flows with the same
//! fragment set produce bit-identical recipes and share one interned
//! recipe slot.

use crate::engine::Result;
use alloc::vec::Vec;
use ofe_api::KeyClass;
use ofe_api::KeySlotCfg;
use ofe_api::KeyWords;
use ofe_api::MatchFragment;
use ofe_api::MatcherRecipeCfg;
use ofe_api::OfeError;
use ofe_api::KEY_WORDS_MAX;

/// Words one CAM record can hold; wider keys pair two consecutive
/// records.
pub const CAM_RECORD_WORDS: usize = 5;

/// The canonical mask shapes the CAM lookup path supports, grouped by
/// fragment word length. Anything else goes to the ternary banks.
const CAM_SHAPES: &[&[u32]] = &[
    // Full 128-bit field, e.g. an IPv6 host pair half.
    &[u32::MAX, u32::MAX, u32::MAX, u32::MAX],
    // Ethernet header minus the trailing type bits.
    &[u32::MAX, u32::MAX, u32::MAX, 0],
    // Full 64-bit field.
    &[u32::MAX, u32::MAX],
    // 64-bit field with the low half open, e.g. addr + port high.
    &[u32::MAX, 0xffff_0000],
    // Single exact word.
    &[u32::MAX],
    // Half-words.
    &[0xffff_0000],
    &[0x0000_ffff],
];

/// The packed value/mask words of one flow's key, in canonical slot
/// order (quads, single words, side channel).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PackedKey {
    pub value: KeyWords,
    pub mask: KeyWords,
    /// Meaningful words in `value`/`mask`.
    pub words: u8,
}

fn slot_cfg(frag: &MatchFragment) -> KeySlotCfg {
    KeySlotCfg {
        anchor: frag.anchor,
        byte_off: frag.byte_off,
        word_len: frag.word_len,
        mask: frag.mask,
    }
}

fn mask_is_canonical(frag: &MatchFragment) -> bool {
    CAM_SHAPES
        .iter()
        .any(|shape| shape.len() == usize::from(frag.word_len)
            && *shape == frag.mask_words())
}

/// Pack a fragment list into a recipe and key.
///
/// Fails when the fragments exceed the extractor budget (more than
/// two multi-word fragments, more than two generic single words, more
/// than one side-channel word, or over [`KEY_WORDS_MAX`] total), and
/// when a non-canonical mask cannot go to the ternary banks.
pub fn pack(frags: &[MatchFragment]) -> Result<(MatcherRecipeCfg, PackedKey)> {
    for frag in frags {
        match frag.word_len {
            1 | 2 | 4 => (),
            wl => {
                return Err(OfeError::BadState(format!(
                    "fragment word_len {} invalid",
                    wl
                )));
            }
        }
        if frag.is_meta() && frag.word_len != 1 {
            return Err(OfeError::BadState(
                "side-channel fragment wider than one word".into(),
            ));
        }
    }

    let mut multi: Vec<&MatchFragment> =
        frags.iter().filter(|f| !f.is_meta() && f.word_len > 1).collect();
    // Largest first; equal lengths keep front-end order.
    multi.sort_by(|a, b| b.word_len.cmp(&a.word_len));
    let single: Vec<&MatchFragment> =
        frags.iter().filter(|f| !f.is_meta() && f.word_len == 1).collect();
    let meta: Vec<&MatchFragment> = frags.iter().filter(|f| f.is_meta()).collect();

    if multi.len() > 2 || single.len() > 2 || meta.len() > 1 {
        return Err(OfeError::KeyTooWide);
    }

    let words = multi.iter().map(|f| usize::from(f.word_len)).sum::<usize>()
        + single.len()
        + meta.len();
    if words > KEY_WORDS_MAX {
        return Err(OfeError::KeyTooWide);
    }

    // The side channel forces CAM; the CAM path otherwise demands a
    // canonical mask on every fragment.
    let class = if !meta.is_empty() {
        KeyClass::Cam
    } else if frags.iter().all(mask_is_canonical) {
        KeyClass::Cam
    } else if frags.iter().all(|f| f.tcam_ok) {
        KeyClass::Tcam
    } else {
        return Err(OfeError::MaskNotSupported);
    };

    let mut qw = [None, None];
    for (slot, &frag) in multi.iter().enumerate() {
        qw[slot] = Some(slot_cfg(frag));
    }
    let mut sw = [None, None];
    for (slot, &frag) in single.iter().enumerate() {
        sw[slot] = Some(slot_cfg(frag));
    }
    let meta_slot = meta.first().map(|&f| slot_cfg(f));

    let mut value = KeyWords::default();
    let mut mask = KeyWords::default();
    let mut w = 0;
    for frag in multi.iter().chain(single.iter()).chain(meta.iter()) {
        for i in 0..usize::from(frag.word_len) {
            // Stray value bits outside the mask must not defeat
            // recipe/key dedup.
            value.0[w] = frag.value[i] & frag.mask[i];
            mask.0[w] = frag.mask[i];
            w += 1;
        }
    }

    let recipe = MatcherRecipeCfg {
        qw,
        sw,
        meta: meta_slot,
        key_words: words as u8,
        class,
        paired: class == KeyClass::Cam && words > CAM_RECORD_WORDS,
        tcam_ok: meta.is_empty()
            && words <= 6
            && frags.iter().all(|f| f.tcam_ok),
    };
    let key = PackedKey { value, mask, words: words as u8 };
    Ok((recipe, key))
}
