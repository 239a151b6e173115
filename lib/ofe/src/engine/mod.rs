// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The engine proper.
//!
//! Layering, leaves first: [`pool`] (refcounted slot pools) and
//! [`hash`] (the bank hasher) sit at the bottom; [`key`], [`cam`] and
//! [`tcam`] implement key packing and placement; [`matcher`] fronts
//! them; [`objects`] owns the interned hardware-object tables;
//! [`classifier`] schedules the priority-ordered classifier slots;
//! [`device`] ties a device instance together under its lock.

pub mod cam;
pub mod classifier;
#[cfg(any(feature = "std", test))]
pub mod device;
pub mod hash;
pub mod hw;
pub mod key;
pub mod matcher;
pub mod objects;
pub mod pool;
pub mod tcam;

use ofe_api::OfeError;

pub type Result<T> = core::result::Result<T, OfeError>;

cfg_if! {
    if #[cfg(feature = "std")] {
        /// When set, development builds print relocation and unwind
        /// decisions. Compiled out entirely without `std`.
        #[macro_export]
        macro_rules! dbg_macro {
            ($s:tt) => {
                println!($s);
            };
            ($s:tt, $($arg:tt)*) => {
                println!($s, $($arg)*);
            };
        }

        #[macro_export]
        macro_rules! err_macro {
            ($s:tt) => {
                println!(concat!("ERROR: ", $s));
            };
            ($s:tt, $($arg:tt)*) => {
                println!(concat!("ERROR: ", $s), $($arg)*);
            };
        }
    } else {
        #[macro_export]
        macro_rules! dbg_macro {
            ($s:tt) => {};
            ($s:tt, $($arg:tt)*) => {
                { let _ = core::format_args!($s, $($arg)*); }
            };
        }

        #[macro_export]
        macro_rules! err_macro {
            ($s:tt) => {};
            ($s:tt, $($arg:tt)*) => {
                { let _ = core::format_args!($s, $($arg)*); }
            };
        }
    }
}

pub use dbg_macro as dbg;
pub use err_macro as err;
