// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The key-match engine facade.
//!
//! One entry point for placing a packed key per its recipe class and
//! one for tearing the placement down. A key never splits: it lives
//! entirely in the CAM banks or entirely in the ternary banks. A
//! CAM-class key whose relocation chains all fail may spill to the
//! ternary side when its recipe allows it; the caller sees only where
//! the key ended up.

use crate::engine::cam::CamAddr;
use crate::engine::cam::CamTable;
use crate::engine::key::PackedKey;
use crate::engine::tcam::TcamAddr;
use crate::engine::tcam::TcamTable;
use crate::engine::Result;
use ofe_api::DeviceCaps;
use ofe_api::FlowId;
use ofe_api::KeyClass;
use ofe_api::MatcherRecipeCfg;
use ofe_api::OfeError;

/// Where a key was placed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Placement {
    Cam(CamAddr),
    Tcam(TcamAddr),
}

pub struct KeyMatcher {
    cam: CamTable,
    tcam: TcamTable,
}

impl KeyMatcher {
    pub fn new(caps: &DeviceCaps) -> Self {
        Self {
            cam: CamTable::new(caps.cam_banks, caps.cam_records),
            tcam: TcamTable::new(caps.tcam_records),
        }
    }

    pub fn cam(&self) -> &CamTable {
        &self.cam
    }

    pub fn tcam(&self) -> &TcamTable {
        &self.tcam
    }

    /// Place one flow's key.
    pub fn place(
        &mut self,
        recipe: &MatcherRecipeCfg,
        recipe_idx: u32,
        key: &PackedKey,
        flow_type: u8,
        owner: FlowId,
    ) -> Result<Placement> {
        match recipe.class {
            KeyClass::Cam => {
                match self.cam.insert(
                    key,
                    flow_type,
                    recipe_idx,
                    recipe.paired,
                    owner,
                ) {
                    Ok(addr) => Ok(Placement::Cam(addr)),
                    Err(OfeError::CamExhausted) if recipe.tcam_ok => {
                        crate::engine::dbg!(
                            "key-match: cam full, spilling flow {} to tcam",
                            owner
                        );
                        self.tcam.insert(key, owner).map(Placement::Tcam)
                    }
                    Err(e) => Err(e),
                }
            }
            KeyClass::Tcam => {
                self.tcam.insert(key, owner).map(Placement::Tcam)
            }
        }
    }

    /// Undo a placement, restoring the records it held.
    pub fn remove(&mut self, placement: Placement) {
        match placement {
            Placement::Cam(addr) => self.cam.remove(addr),
            Placement::Tcam(addr) => self.tcam.remove(addr),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::key::pack;
    use ofe_api::FieldAnchor;
    use ofe_api::MatchFragment;

    fn tiny_caps() -> DeviceCaps {
        DeviceCaps {
            cam_banks: 1,
            cam_records: 1,
            tcam_records: 4,
            ..DeviceCaps::default()
        }
    }

    #[test]
    fn cam_key_places_in_cam() {
        let mut km = KeyMatcher::new(&DeviceCaps::default());
        let (recipe, key) =
            pack(&[MatchFragment::word(FieldAnchor::L4, 0, 443)]).unwrap();
        let placement = km.place(&recipe, 0, &key, 1, 1).unwrap();
        assert!(matches!(placement, Placement::Cam(_)));
        assert_eq!(km.cam().len(), 1);
        km.remove(placement);
        assert_eq!(km.cam().len(), 0);
    }

    #[test]
    fn tcam_key_places_in_tcam() {
        let mut km = KeyMatcher::new(&DeviceCaps::default());
        let (recipe, key) = pack(&[MatchFragment::masked(
            FieldAnchor::L3,
            12,
            1,
            [0x0a00_0000, 0, 0, 0],
            [0xff00_00ff, 0, 0, 0],
        )])
        .unwrap();
        assert_eq!(recipe.class, KeyClass::Tcam);
        let placement = km.place(&recipe, 0, &key, 1, 2).unwrap();
        assert!(matches!(placement, Placement::Tcam(_)));
        assert_eq!(km.tcam().len(), 1);
        km.remove(placement);
        assert_eq!(km.tcam().len(), 0);
    }

    #[test]
    fn full_cam_spills_to_tcam() {
        let mut km = KeyMatcher::new(&tiny_caps());
        let (recipe, k1) =
            pack(&[MatchFragment::word(FieldAnchor::L4, 0, 80)]).unwrap();
        let (_, k2) =
            pack(&[MatchFragment::word(FieldAnchor::L4, 0, 443)]).unwrap();

        // One bank, one record: the second CAM key cannot relocate
        // anywhere and spills.
        let first = km.place(&recipe, 0, &k1, 1, 1).unwrap();
        assert!(matches!(first, Placement::Cam(_)));
        let second = km.place(&recipe, 0, &k2, 1, 2).unwrap();
        assert!(matches!(second, Placement::Tcam(_)));
        assert_eq!(km.cam().len(), 1);
        assert_eq!(km.tcam().len(), 1);
    }

    #[test]
    fn side_channel_key_never_spills() {
        let mut km = KeyMatcher::new(&tiny_caps());
        let frags = [
            MatchFragment::word(FieldAnchor::L4, 0, 80),
            MatchFragment::meta(3, u32::MAX),
        ];
        let (recipe, k1) = pack(&frags).unwrap();
        assert!(!recipe.tcam_ok);
        km.place(&recipe, 0, &k1, 1, 1).unwrap();

        let frags2 = [
            MatchFragment::word(FieldAnchor::L4, 0, 8080),
            MatchFragment::meta(3, u32::MAX),
        ];
        let (_, k2) = pack(&frags2).unwrap();
        assert_eq!(
            km.place(&recipe, 0, &k2, 1, 2).unwrap_err(),
            OfeError::CamExhausted
        );
    }
}
