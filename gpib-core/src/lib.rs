// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The GPIB/IEEE-488 bus engine: the pin-adapter-agnostic core that drives
//! the three-wire handshake, the controller/device bus-role state machine,
//! the device-role attention service, and the `++` line interpreter and
//! command dispatch described in `SPEC_FULL.md`.
//!
//! This crate is `no_std` -- it has no opinion on what actually wiggles
//! pins, tells time, or persists configuration; those are the
//! [`gpib_pin_api::PinAdapter`], [`clock::Clock`]/[`clock::MicroDelay`], and
//! [`gpib_config::ConfigStore`] trait boundaries respectively. `gpib-fw`
//! wires concrete implementations of all three to an [`engine::Engine`].

#![cfg_attr(not(test), no_std)]

pub mod attention;
pub mod clock;
pub mod commands;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod handshake;
pub mod hostlink;
pub mod interp;
pub mod ringbuf;
pub mod state;
pub mod xfer;

pub use engine::Engine;
pub use error::{BusError, ParseError};
pub use state::BusState;
