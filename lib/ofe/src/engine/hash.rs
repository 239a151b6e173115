// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The CAM bank hasher.
//!
//! A fixed 16-word (512-bit) input is reduced by a balanced binary
//! tree: each of the four levels combines adjacent 64-bit lanes with
//! a bent mixing function, and a final avalanche step spreads the
//! surviving word. One result is produced per hash bank by folding
//! the bank id into the finalizer.
//!
//! The goal is uniform bank distribution with low correlation between
//! nearby keys. This is not a cryptographic hash and must never be
//! used as one.

/// Words in the canonical hash input.
pub const HASH_WORDS: usize = 16;

const ROT: [u32; 4] = [7, 13, 19, 29];

/// Combine one 64-bit lane (two adjacent words) into a single word.
///
/// Four rotates of the inputs feed a six-term Boolean mix chosen to
/// be balanced and nonlinear in every input bit.
fn lane_mix(a: u32, b: u32) -> u32 {
    let x0 = a.rotate_left(ROT[0]);
    let x1 = a.rotate_left(ROT[1]);
    let x2 = b.rotate_left(ROT[2]);
    let x3 = b.rotate_left(ROT[3]);
    (x0 & x2) ^ (x1 & x3) ^ (x2 & x3) ^ (x0 | x1) ^ a ^ b
}

fn avalanche(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^ (h >> 16)
}

/// Hash the canonical input for one bank.
pub fn bank_hash(words: &[u32; HASH_WORDS], bank: u32) -> u32 {
    let mut lvl = *words;
    let mut n = HASH_WORDS;
    while n > 1 {
        for i in 0..n / 2 {
            lvl[i] = lane_mix(lvl[2 * i], lvl[2 * i + 1]);
        }
        n /= 2;
    }
    avalanche(lvl[0] ^ bank.wrapping_mul(0x9e37_79b9))
}
