// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The flow-offload engine: the resource manager that encodes
//! match/action descriptors into the device's CAM/TCAM banks and
//! classifier slots, and keeps that encoding consistent as rules are
//! added, shared, and removed at runtime.
//!
//! The engine is a pure in-memory allocator/compiler. It sits between
//! a flow-rule front end (which produces [`ofe_api::FlowSpec`]
//! descriptors) and a register-programming backend (the
//! [`engine::hw::RegisterSink`] trait); it performs no I/O of its own.

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[macro_use]
extern crate alloc;

#[macro_use]
extern crate cfg_if;

pub use ofe_api as api;

pub mod engine;
#[cfg(any(feature = "std", test))]
pub mod sync;
