// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bus-role state machine, spec §4.2.

use gpib_pin_api::{ControlLine, Level, PinAdapter, PinAdapterExt};

/// One of the nine bus-role states named in spec §4.2. `C*` states belong
/// to the controller role, `D*` to the device role; the two families never
/// mix without an explicit `stop()` in between.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusState {
    /// Power-on, controller not yet IFC'd.
    Cini,
    /// Controller idle.
    Cids,
    /// Controller sending a multiline command byte (ATN asserted).
    Ccms,
    /// Controller sending data to an addressed listener.
    Ctas,
    /// Controller reading from an addressed talker.
    Clas,
    /// Device power-on.
    Dini,
    /// Device idle, ready to honor ATN.
    Dids,
    /// Device actively listening.
    Dlas,
    /// Device actively talking.
    Dtas,
}

impl BusState {
    pub fn is_controller(self) -> bool {
        matches!(self, BusState::Cini | BusState::Cids | BusState::Ccms | BusState::Ctas | BusState::Clas)
    }

    pub fn is_device(self) -> bool {
        !self.is_controller()
    }

    /// The role's idle state, which every bus operation must return to on
    /// completion or timeout (spec §8 invariant).
    pub fn idle(self) -> BusState {
        if self.is_controller() {
            BusState::Cids
        } else {
            BusState::Dids
        }
    }
}

/// Drives all eight control lines to the idle/released configuration for
/// the given role, per spec §4.2's state table ("all controller lines
/// driven to idle" / "all device lines high-impedance").
pub fn drive_idle_lines<P: PinAdapter>(
    pins: &mut P,
    controller_role: bool,
) -> Result<(), gpib_pin_api::BusFault> {
    if controller_role {
        // Controller drives ATN/EOI/SRQ high (released) and keeps the
        // handshake lines as inputs until a transfer begins.
        for line in [ControlLine::Atn, ControlLine::Eoi, ControlLine::Srq] {
            pins.set_direction_output(line, true)?;
            pins.set_line(line, Level::High)?;
        }
        for line in [ControlLine::Dav, ControlLine::Nrfd, ControlLine::Ndac, ControlLine::Ifc] {
            pins.release_to_input(line)?;
        }
    } else {
        for line in ControlLine::ALL {
            pins.release_to_input(line)?;
        }
    }
    Ok(())
}

/// Stops bus activity for the current role: returns every line to
/// input-pullup, per spec §4.2 "Role switch requires `stop()` first".
pub fn stop<P: PinAdapter>(pins: &mut P) -> Result<(), gpib_pin_api::BusFault> {
    for line in ControlLine::ALL {
        pins.release_to_input(line)?;
    }
    Ok(())
}

/// Per-state line configuration entered on `set_controls(target)`, spec
/// §4.2's state table. Each of these configures directions and initial
/// levels; the handshake functions in [`crate::handshake`] take over from
/// there.
pub mod enter {
    use super::*;

    pub fn ccms<P: PinAdapter>(pins: &mut P) -> Result<(), gpib_pin_api::BusFault> {
        // Controller asserts ATN for the duration of a multiline command.
        pins.set_direction_output(ControlLine::Atn, true)?;
        pins.set_line(ControlLine::Atn, Level::Low)
    }

    pub fn cids<P: PinAdapter>(pins: &mut P) -> Result<(), gpib_pin_api::BusFault> {
        drive_idle_lines(pins, true)
    }

    pub fn ctas<P: PinAdapter>(pins: &mut P) -> Result<(), gpib_pin_api::BusFault> {
        pins.set_direction_output(ControlLine::Atn, true)?;
        pins.set_line(ControlLine::Atn, Level::High)?;
        pins.set_direction_output(ControlLine::Dav, true)?;
        pins.set_line(ControlLine::Dav, Level::High)?;
        pins.release_to_input(ControlLine::Nrfd)?;
        pins.release_to_input(ControlLine::Ndac)
    }

    pub fn clas<P: PinAdapter>(pins: &mut P) -> Result<(), gpib_pin_api::BusFault> {
        pins.release_to_input(ControlLine::Dav)?;
        pins.set_direction_output(ControlLine::Nrfd, true)?;
        pins.set_line(ControlLine::Nrfd, Level::Low)?;
        pins.set_direction_output(ControlLine::Ndac, true)?;
        pins.set_line(ControlLine::Ndac, Level::Low)
    }

    pub fn dids<P: PinAdapter>(pins: &mut P) -> Result<(), gpib_pin_api::BusFault> {
        drive_idle_lines(pins, false)
    }

    pub fn dlas<P: PinAdapter>(pins: &mut P) -> Result<(), gpib_pin_api::BusFault> {
        pins.set_direction_output(ControlLine::Nrfd, true)?;
        pins.set_line(ControlLine::Nrfd, Level::Low)?;
        pins.set_direction_output(ControlLine::Ndac, true)?;
        pins.set_line(ControlLine::Ndac, Level::Low)?;
        pins.release_to_input(ControlLine::Dav)
    }

    pub fn dtas<P: PinAdapter>(pins: &mut P) -> Result<(), gpib_pin_api::BusFault> {
        pins.release_to_input(ControlLine::Nrfd)?;
        pins.release_to_input(ControlLine::Ndac)?;
        pins.set_direction_output(ControlLine::Dav, true)?;
        pins.set_line(ControlLine::Dav, Level::High)
    }
}
