// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! CAM bank placement.
//!
//! Every bank hashes the canonical key to one candidate record; an
//! entry lives in exactly one bank's candidate. When all candidates
//! are taken, we displace an occupant into one of *its* alternate
//! banks, cuckoo-style, down a bounded chain. A displaced entry's new
//! record is re-derived from its own stored key, never assumed, so a
//! relocation chain can fail but can never strand an entry somewhere
//! its hash does not point.
//!
//! Wide keys pair two consecutive records (even head) in one bank and
//! move as a unit.

use crate::engine::hash::bank_hash;
use crate::engine::hash::HASH_WORDS;
use crate::engine::key::PackedKey;
use crate::engine::Result;
use alloc::vec::Vec;
use ofe_api::FlowId;
use ofe_api::KeyWords;
use ofe_api::OfeError;
use ofe_api::KEY_WORDS_MAX;

/// Maximum cuckoo chain depth.
const CUCKOO_DEPTH: u32 = 4;

/// Cap on distinct (bank, record) windows one insertion may visit
/// while chasing a relocation chain.
const VISITED_MAX: usize = 64;

type Visited = heapless::Vec<(u32, u32), VISITED_MAX>;

/// A placed CAM entry's location.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CamAddr {
    pub bank: u32,
    pub record: u32,
}

#[derive(Clone, Debug)]
struct CamEntry {
    owner: FlowId,
    value: KeyWords,
    flow_type: u8,
    recipe: u32,
    paired: bool,
}

#[derive(Clone, Debug)]
enum CamCell {
    Head(CamEntry),
    /// Second record of a paired entry; the head is one record down.
    PairTail,
}

pub struct CamTable {
    banks: u32,
    records: u32,
    cells: Vec<Option<CamCell>>,
    live: u32,
}

/// The canonical 16-word hash input: the packed key words, then the
/// flow type and recipe index in the tail words so distinct recipes
/// with equal values never shadow one another.
fn hash_input(value: &KeyWords, flow_type: u8, recipe: u32) -> [u32; HASH_WORDS] {
    let mut words = [0u32; HASH_WORDS];
    words[..KEY_WORDS_MAX].copy_from_slice(&value.0);
    words[14] = u32::from(flow_type);
    words[15] = recipe;
    words
}

/// Is any record of the window held by an in-flight displacement?
fn reserved(visited: &Visited, bank: u32, record: u32, span: u32) -> bool {
    (record..record + span).any(|r| visited.contains(&(bank, r)))
}

impl CamTable {
    pub fn new(banks: u32, records: u32) -> Self {
        Self {
            banks,
            records,
            cells: vec![None; (banks * records) as usize],
            live: 0,
        }
    }

    pub fn len(&self) -> u32 {
        self.live
    }

    fn idx(&self, bank: u32, record: u32) -> usize {
        (bank * self.records + record) as usize
    }

    /// The candidate record for this hash input in one bank. Paired
    /// entries land on even records with room for their tail.
    fn target(&self, input: &[u32; HASH_WORDS], bank: u32, paired: bool) -> u32 {
        let h = bank_hash(input, bank);
        if paired {
            (h % (self.records / 2)) * 2
        } else {
            h % self.records
        }
    }

    fn window_free(&self, bank: u32, record: u32, paired: bool) -> bool {
        self.cells[self.idx(bank, record)].is_none()
            && (!paired || self.cells[self.idx(bank, record + 1)].is_none())
    }

    fn put(&mut self, bank: u32, record: u32, entry: CamEntry) {
        let paired = entry.paired;
        let head = self.idx(bank, record);
        self.cells[head] = Some(CamCell::Head(entry));
        if paired {
            let tail = self.idx(bank, record + 1);
            self.cells[tail] = Some(CamCell::PairTail);
        }
    }

    fn take(&mut self, bank: u32, record: u32) -> CamEntry {
        let head = self.idx(bank, record);
        let Some(CamCell::Head(entry)) = self.cells[head].take() else {
            unreachable!("take on a non-head CAM record");
        };
        if entry.paired {
            let tail = self.idx(bank, record + 1);
            self.cells[tail] = None;
        }
        entry
    }

    /// Resolve a record to the head record of the entry covering it.
    fn head_of(&self, bank: u32, record: u32) -> u32 {
        match self.cells[self.idx(bank, record)] {
            Some(CamCell::PairTail) => record - 1,
            _ => record,
        }
    }

    /// Place a key. Tries every bank's candidate record directly,
    /// then attempts cuckoo relocation chains up to [`CUCKOO_DEPTH`].
    pub fn insert(
        &mut self,
        key: &PackedKey,
        flow_type: u8,
        recipe: u32,
        paired: bool,
        owner: FlowId,
    ) -> Result<CamAddr> {
        if paired && self.records < 2 {
            return Err(OfeError::CamExhausted);
        }

        let input = hash_input(&key.value, flow_type, recipe);
        let entry = CamEntry {
            owner,
            value: key.value,
            flow_type,
            recipe,
            paired,
        };

        for bank in 0..self.banks {
            let record = self.target(&input, bank, paired);
            if self.window_free(bank, record, paired) {
                self.put(bank, record, entry);
                self.live += 1;
                return Ok(CamAddr { bank, record });
            }
        }

        let mut visited = Visited::new();
        for bank in 0..self.banks {
            let record = self.target(&input, bank, paired);
            if self.clear_window(bank, record, paired, 1, &mut visited) {
                self.put(bank, record, entry);
                self.live += 1;
                return Ok(CamAddr { bank, record });
            }
        }

        Err(OfeError::CamExhausted)
    }

    /// Try to empty a record window by displacing its occupants into
    /// their own alternate banks.
    ///
    /// The window's records are reserved in `visited` for the rest of
    /// the insertion: no deeper chain may displace them again or land
    /// an entry inside them, since the reserver intends to fill the
    /// window itself. Reservations are never rolled back on a failed
    /// branch; the search is conservative and stays bounded.
    fn clear_window(
        &mut self,
        bank: u32,
        record: u32,
        paired: bool,
        depth: u32,
        visited: &mut Visited,
    ) -> bool {
        let span = if paired { 2 } else { 1 };
        if reserved(visited, bank, record, span) {
            return false;
        }
        for r in record..record + span {
            if visited.push((bank, r)).is_err() {
                return false;
            }
        }

        for r in record..record + span {
            let head = self.head_of(bank, r);
            let espan = match &self.cells[self.idx(bank, head)] {
                None => continue,
                Some(CamCell::Head(e)) => {
                    if e.paired {
                        2
                    } else {
                        1
                    }
                }
                Some(CamCell::PairTail) => return false,
            };
            // An entry straddling the window edge cannot move without
            // disturbing records outside the reservation; give up on
            // this chain.
            if head < record || head + espan > record + span {
                return false;
            }
            if !self.displace(bank, head, depth, visited) {
                return false;
            }
        }
        true
    }

    /// Move the entry whose head sits at (bank, head) to one of its
    /// alternate banks, recursively displacing further occupants
    /// while depth remains.
    fn displace(
        &mut self,
        bank: u32,
        head: u32,
        depth: u32,
        visited: &mut Visited,
    ) -> bool {
        if depth > CUCKOO_DEPTH {
            return false;
        }

        let Some(CamCell::Head(entry)) = &self.cells[self.idx(bank, head)]
        else {
            return false;
        };
        let entry = entry.clone();
        let span = if entry.paired { 2 } else { 1 };
        let input = hash_input(&entry.value, entry.flow_type, entry.recipe);

        // An unreserved alternate with room wins outright.
        for alt in 0..self.banks {
            if alt == bank {
                continue;
            }
            let dst = self.target(&input, alt, entry.paired);
            if !reserved(visited, alt, dst, span)
                && self.window_free(alt, dst, entry.paired)
            {
                let moved = self.take(bank, head);
                self.put(alt, dst, moved);
                return true;
            }
        }

        // Otherwise push the chain one level deeper.
        for alt in 0..self.banks {
            if alt == bank {
                continue;
            }
            let dst = self.target(&input, alt, entry.paired);
            if self.clear_window(alt, dst, entry.paired, depth + 1, visited) {
                let moved = self.take(bank, head);
                self.put(alt, dst, moved);
                return true;
            }
        }

        false
    }

    /// Find a placed key by re-deriving its hash: each bank's
    /// candidate record is probed and its owner's key compared.
    pub fn find(
        &self,
        key: &PackedKey,
        flow_type: u8,
        recipe: u32,
        paired: bool,
    ) -> Option<CamAddr> {
        let input = hash_input(&key.value, flow_type, recipe);
        for bank in 0..self.banks {
            let record = self.target(&input, bank, paired);
            if let Some(CamCell::Head(e)) = &self.cells[self.idx(bank, record)]
            {
                if e.value == key.value
                    && e.flow_type == flow_type
                    && e.recipe == recipe
                {
                    return Some(CamAddr { bank, record });
                }
            }
        }
        None
    }

    pub fn owner_at(&self, addr: CamAddr) -> Option<FlowId> {
        match &self.cells[self.idx(addr.bank, addr.record)] {
            Some(CamCell::Head(e)) => Some(e.owner),
            _ => None,
        }
    }

    /// Remove the entry at `addr`, restoring the record (and its pair
    /// tail) to the unowned state.
    pub fn remove(&mut self, addr: CamAddr) {
        let _ = self.take(addr.bank, addr.record);
        self.live -= 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::key::PackedKey;

    fn key(seed: u32) -> PackedKey {
        let mut value = KeyWords::default();
        value.0[0] = seed;
        value.0[1] = seed.wrapping_mul(0x0100_0193);
        let mut mask = KeyWords::default();
        mask.0[0] = u32::MAX;
        mask.0[1] = u32::MAX;
        PackedKey { value, mask, words: 2 }
    }

    #[test]
    fn round_trip_restores_slot() {
        let mut cam = CamTable::new(3, 8);
        let k = key(0x1111);
        let addr = cam.insert(&k, 1, 0, false, 10).unwrap();
        assert_eq!(cam.find(&k, 1, 0, false), Some(addr));
        cam.remove(addr);
        assert_eq!(cam.len(), 0);
        assert_eq!(cam.find(&k, 1, 0, false), None);
        // An identical key hashes identically and reclaims the very
        // same record.
        let again = cam.insert(&k, 1, 0, false, 11).unwrap();
        assert_eq!(again, addr);
        assert_eq!(cam.owner_at(again), Some(11));
    }

    #[test]
    fn no_entry_lost_under_pressure() {
        let mut cam = CamTable::new(3, 4);
        let mut placed = vec![];
        for seed in 0..8u32 {
            let k = key(seed.wrapping_mul(0x9e37_79b9) | 1);
            if cam.insert(&k, 0, 0, false, u64::from(seed)).is_ok() {
                placed.push((k, seed));
            }
        }
        // The first `banks` inserts can never fail: each key has one
        // candidate per bank and at most banks-1 cells are taken.
        assert!(placed.len() >= 3);
        assert_eq!(cam.len(), placed.len() as u32);
        for (k, seed) in &placed {
            let addr = cam
                .find(k, 0, 0, false)
                .expect("placed key lost after relocations");
            assert_eq!(cam.owner_at(addr), Some(u64::from(*seed)));
        }
    }

    #[test]
    fn exhaustion_with_single_record_banks() {
        let mut cam = CamTable::new(3, 1);
        let mut errs = 0;
        for seed in 0..4u32 {
            if cam.insert(&key(seed + 1), 0, 0, false, 1).is_err() {
                errs += 1;
            }
        }
        // Three cells total; the fourth insert must fail.
        assert_eq!(cam.len(), 3);
        assert_eq!(errs, 1);
    }

    #[test]
    fn paired_head_is_even() {
        let mut cam = CamTable::new(2, 8);
        let k = key(0xabcd);
        let addr = cam.insert(&k, 2, 1, true, 5).unwrap();
        assert_eq!(addr.record % 2, 0);
        assert_eq!(cam.find(&k, 2, 1, true), Some(addr));
        cam.remove(addr);
        assert_eq!(cam.len(), 0);
        // Both records of the pair are free again.
        let again = cam.insert(&k, 2, 1, true, 6).unwrap();
        assert_eq!(again, addr);
    }

    #[test]
    fn distinct_recipes_do_not_shadow() {
        let mut cam = CamTable::new(3, 8);
        let k = key(0x7777);
        let a = cam.insert(&k, 1, 0, false, 1).unwrap();
        let b = cam.insert(&k, 1, 9, false, 2).unwrap();
        assert_ne!(a, b);
        assert_eq!(cam.find(&k, 1, 0, false), Some(a));
        assert_eq!(cam.find(&k, 1, 9, false), Some(b));
    }
}
