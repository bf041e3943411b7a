// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The pin I/O adapter contract shared by every GPIB bus implementation and
//! the engine that drives it.
//!
//! This crate is deliberately tiny: it is the seam between the
//! microsecond-accurate bit-banging in `gpib-core` and whatever actually
//! wiggles pins (a register-level driver, an `embedded-hal` shim, or an
//! in-memory loopback used in tests). Everything here must stay cheap to
//! call -- the contract is that these four primitives complete in a few
//! microseconds and never block.

#![no_std]

use core::fmt;

/// One of the eight GPIB control/management lines a [`PinAdapter`] can
/// drive or sample. Data lines (DIO1..DIO8) are handled separately via
/// [`PinAdapter::read_data_bus`]/[`PinAdapter::write_data_bus`] since they
/// move as a byte, not individually.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ControlLine {
    Atn = 0,
    Srq = 1,
    Ren = 2,
    Eoi = 3,
    Dav = 4,
    Nrfd = 5,
    Ndac = 6,
    Ifc = 7,
}

impl ControlLine {
    pub const ALL: [ControlLine; 8] = [
        ControlLine::Atn,
        ControlLine::Srq,
        ControlLine::Ren,
        ControlLine::Eoi,
        ControlLine::Dav,
        ControlLine::Nrfd,
        ControlLine::Ndac,
        ControlLine::Ifc,
    ];

    /// Bit position of this line within a `(bits, mask)` pair passed to
    /// [`PinAdapter::set_control`].
    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for ControlLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlLine::Atn => "ATN",
            ControlLine::Srq => "SRQ",
            ControlLine::Ren => "REN",
            ControlLine::Eoi => "EOI",
            ControlLine::Dav => "DAV",
            ControlLine::Nrfd => "NRFD",
            ControlLine::Ndac => "NDAC",
            ControlLine::Ifc => "IFC",
        };
        f.write_str(s)
    }
}

/// The sampled or commanded level of a control line. GPIB is negative
/// logic throughout: `Low` is the asserted state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn asserted(self) -> bool {
        matches!(self, Level::Low)
    }

    pub fn from_bit(bit: bool) -> Level {
        if bit {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// What a bit in `(bits, mask)` means when passed to
/// [`PinAdapter::set_control`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SetMode {
    /// Set output level: bit 0 = drive low, bit 1 = drive high.
    Level,
    /// Set direction: bit 0 = input with pull-up, bit 1 = output.
    Direction,
}

/// A fault reported by a concrete pin adapter (e.g. a shorted or open
/// line). `gpib-core` never manufactures this itself -- §4.1's contract is
/// that these primitives cannot time out -- but an adapter talking to real
/// hardware must not silently swallow a wedged bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BusFault;

impl fmt::Display for BusFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("pin adapter bus fault")
    }
}

/// The four primitives the bus engine, attention service, and line
/// interpreter use to touch hardware. See spec §4.1.
pub trait PinAdapter {
    /// Sets DIO1..DIO8 to input-pullup, samples them, and returns the
    /// logical (already-inverted) byte.
    fn read_data_bus(&mut self) -> Result<u8, BusFault>;

    /// Sets DIO1..DIO8 to outputs and drives them so that bit `i` of the
    /// wire is low iff bit `i` of `byte` is 1.
    fn write_data_bus(&mut self, byte: u8) -> Result<(), BusFault>;

    /// For each line selected by `mask`, sets either its output level or
    /// its direction (per `mode`) from the corresponding bit of `bits`.
    /// Lines not selected by `mask` are unaffected.
    fn set_control(
        &mut self,
        bits: u8,
        mask: u8,
        mode: SetMode,
    ) -> Result<(), BusFault>;

    /// Samples the current level of a single control line.
    fn read_control(&mut self, line: ControlLine) -> Result<Level, BusFault>;
}

/// Convenience helpers built on top of the four primitives; these are not
/// part of the core contract (they compose more than one primitive and so
/// are not guaranteed to execute in "a few microseconds") but every
/// consumer needs them, so they live here rather than being duplicated in
/// `gpib-core` and every adapter.
pub trait PinAdapterExt: PinAdapter {
    fn set_line(&mut self, line: ControlLine, level: Level) -> Result<(), BusFault> {
        let bit = if matches!(level, Level::High) { line.bit() } else { 0 };
        self.set_control(bit, line.bit(), SetMode::Level)
    }

    fn set_direction_output(&mut self, line: ControlLine, output: bool) -> Result<(), BusFault> {
        let bit = if output { line.bit() } else { 0 };
        self.set_control(bit, line.bit(), SetMode::Direction)
    }

    fn release_to_input(&mut self, line: ControlLine) -> Result<(), BusFault> {
        self.set_direction_output(line, false)
    }
}

impl<T: PinAdapter + ?Sized> PinAdapterExt for T {}
