// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Multiline commands and the higher-level addressing/polling sequences
//! built from them, spec §4.2.2.

use gpib_pin_api::{ControlLine, Level, PinAdapter, PinAdapterExt};

use crate::clock::{Clock, MicroDelay};
use crate::error::BusError;
use crate::handshake::{no_abort, read_byte, write_byte};
use crate::state::enter;

/// The IEEE-488 multiline command bytes named in spec §4.2.2.
pub mod byte {
    pub const GTL: u8 = 0x01;
    pub const SDC: u8 = 0x04;
    pub const GET: u8 = 0x08;
    pub const LLO: u8 = 0x11;
    pub const DCL: u8 = 0x14;
    pub const PPU: u8 = 0x15;
    pub const SPE: u8 = 0x18;
    pub const SPD: u8 = 0x19;
    pub const UNL: u8 = 0x3F;
    pub const UNT: u8 = 0x5F;

    pub const LAD_BASE: u8 = 0x20;
    pub const TAD_BASE: u8 = 0x40;
    pub const MSA_BASE: u8 = 0x60;

    pub fn lad(addr: u8) -> u8 {
        LAD_BASE + addr
    }

    pub fn tad(addr: u8) -> u8 {
        TAD_BASE + addr
    }

    pub fn msa(addr: u8) -> u8 {
        MSA_BASE + addr
    }
}

/// Sends one multiline command byte: enters CCMS (asserting ATN),
/// handshakes the byte, and leaves ATN asserted for the caller to send
/// more bytes or release. The caller is responsible for the CCMS->CIDS
/// transition once the whole command sequence is done.
fn send_byte<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    rtmo_ms: u32,
    b: u8,
) -> Result<(), BusError> {
    write_byte(pins, clock, rtmo_ms, b, false, false, &mut no_abort)
}

/// Enters CCMS, the state used for every multiline command burst.
fn begin_command<P: PinAdapter>(pins: &mut P) -> Result<(), BusError> {
    enter::ccms(pins)?;
    Ok(())
}

/// Returns to CIDS, ending a multiline command burst.
fn end_command<P: PinAdapter>(pins: &mut P) -> Result<(), BusError> {
    enter::cids(pins)?;
    Ok(())
}

/// `Address-to-listen(addr)`: UNL, then TAD+controller_address (controller
/// takes talk), then LAD+addr.
pub fn address_to_listen<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    rtmo_ms: u32,
    controller_address: u8,
    target_address: u8,
) -> Result<(), BusError> {
    begin_command(pins)?;
    send_byte(pins, clock, rtmo_ms, byte::UNL)?;
    send_byte(pins, clock, rtmo_ms, byte::tad(controller_address))?;
    send_byte(pins, clock, rtmo_ms, byte::lad(target_address))?;
    end_command(pins)
}

/// `Address-to-talk(addr)`: UNL, then LAD+controller_address, then
/// TAD+addr.
pub fn address_to_talk<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    rtmo_ms: u32,
    controller_address: u8,
    target_address: u8,
) -> Result<(), BusError> {
    begin_command(pins)?;
    send_byte(pins, clock, rtmo_ms, byte::UNL)?;
    send_byte(pins, clock, rtmo_ms, byte::lad(controller_address))?;
    send_byte(pins, clock, rtmo_ms, byte::tad(target_address))?;
    end_command(pins)
}

/// `Unaddress`: UNL, then UNT.
pub fn unaddress<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    rtmo_ms: u32,
) -> Result<(), BusError> {
    begin_command(pins)?;
    send_byte(pins, clock, rtmo_ms, byte::UNL)?;
    send_byte(pins, clock, rtmo_ms, byte::UNT)?;
    end_command(pins)
}

/// Addresses `target_address` to listen, sends a single command byte, then
/// unaddresses. Used for selected-device clear, LLO, GTL, and GET (spec
/// §4.2.2 "Selected-device clear / LLO / GTL / GET").
pub fn addressed_command<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    rtmo_ms: u32,
    controller_address: u8,
    target_address: u8,
    command: u8,
) -> Result<(), BusError> {
    address_to_listen(pins, clock, rtmo_ms, controller_address, target_address)?;
    begin_command(pins)?;
    send_byte(pins, clock, rtmo_ms, command)?;
    end_command(pins)?;
    unaddress(pins, clock, rtmo_ms)
}

/// Sends a single multiline command byte with no addressing sequence
/// around it: enters CCMS, writes the byte, returns to CIDS. Used for the
/// raw `mla`/`mta`/`msa`/`unl`/`unt` commands (spec §6) and for universal
/// commands like `llo [all]` that apply to every device on the bus.
pub fn send_raw_command<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    rtmo_ms: u32,
    command: u8,
) -> Result<(), BusError> {
    begin_command(pins)?;
    send_byte(pins, clock, rtmo_ms, command)?;
    end_command(pins)
}

/// Universal device clear: DCL with no addressing.
pub fn device_clear_all<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    rtmo_ms: u32,
) -> Result<(), BusError> {
    begin_command(pins)?;
    send_byte(pins, clock, rtmo_ms, byte::DCL)?;
    end_command(pins)
}

/// Pulses IFC low for 150 µs then releases it, per spec §4.2.2. Places all
/// devices in the idle state and makes this node controller-in-charge.
pub fn pulse_ifc<P: PinAdapter>(
    pins: &mut P,
    delay: &dyn MicroDelay,
) -> Result<(), BusError> {
    pins.set_direction_output(ControlLine::Ifc, true)?;
    pins.set_line(ControlLine::Ifc, Level::Low)?;
    delay.delay_us(150);
    pins.set_line(ControlLine::Ifc, Level::High)?;
    Ok(())
}

/// Serial-polls each address in `targets` in turn: UNL; LAD+controller;
/// SPE; for each address, TAD+addr then one status byte read; SPD; UNT;
/// UNL; back to CIDS. Spec §4.2.2 "Serial poll (one or many addresses)".
pub fn serial_poll<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    rtmo_ms: u32,
    controller_address: u8,
    targets: impl Iterator<Item = u8>,
    mut on_result: impl FnMut(u8, u8),
) -> Result<(), BusError> {
    begin_command(pins)?;
    send_byte(pins, clock, rtmo_ms, byte::UNL)?;
    send_byte(pins, clock, rtmo_ms, byte::lad(controller_address))?;
    send_byte(pins, clock, rtmo_ms, byte::SPE)?;

    for addr in targets {
        send_byte(pins, clock, rtmo_ms, byte::tad(addr))?;
        end_command(pins)?;
        enter::clas(pins)?;
        let (status, _eoi) = read_byte(pins, clock, rtmo_ms, false, &mut no_abort)?;
        on_result(addr, status);
        begin_command(pins)?;
    }

    send_byte(pins, clock, rtmo_ms, byte::SPD)?;
    send_byte(pins, clock, rtmo_ms, byte::UNT)?;
    send_byte(pins, clock, rtmo_ms, byte::UNL)?;
    end_command(pins)
}

/// Parallel poll: assert ATN+EOI together, sample the data bus without a
/// handshake, then release both. Spec §4.2.2 "Parallel poll".
pub fn parallel_poll<P: PinAdapter>(
    pins: &mut P,
    delay: &dyn MicroDelay,
) -> Result<u8, BusError> {
    enter::cids(pins)?;
    pins.set_direction_output(ControlLine::Atn, true)?;
    pins.set_direction_output(ControlLine::Eoi, true)?;
    pins.set_line(ControlLine::Atn, Level::Low)?;
    pins.set_line(ControlLine::Eoi, Level::Low)?;
    delay.delay_us(20);
    let byte = pins.read_data_bus()?;
    pins.set_line(ControlLine::Atn, Level::High)?;
    pins.set_line(ControlLine::Eoi, Level::High)?;
    Ok(byte)
}
