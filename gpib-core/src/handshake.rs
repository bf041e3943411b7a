// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The three-wire handshake, spec §4.2.1.

use gpib_pin_api::{BusFault, ControlLine, Level, PinAdapter, PinAdapterExt};

use crate::clock::{elapsed_at_least, Clock};
use crate::error::{Abort, BusError, Phase};

/// Called on every iteration of a handshake wait loop, in device role
/// only, to check whether the controller has interrupted us (IFC, or ATN
/// wanting to address us mid-transfer). Returns `None` to keep waiting.
pub type AbortCheck<'a, P> = dyn FnMut(&mut P) -> Option<Abort> + 'a;

/// A no-op abort check for controller-role handshakes, which spec §4.2.1
/// says are not interruptible this way.
pub fn no_abort<P: PinAdapter>(_pins: &mut P) -> Option<Abort> {
    None
}

fn wait_for<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    phase: Phase,
    rtmo_ms: u32,
    abort: &mut AbortCheck<'_, P>,
    mut predicate: impl FnMut(&mut P) -> Result<bool, BusFault>,
) -> Result<(), BusError> {
    let start = clock.now_ms();
    loop {
        if predicate(pins)? {
            return Ok(());
        }
        if let Some(a) = abort(pins) {
            return Err(BusError::Aborted(a));
        }
        if elapsed_at_least(start, clock.now_ms(), rtmo_ms) {
            return Err(BusError::Timeout(phase));
        }
    }
}

/// Reads one byte as the addressed listener, spec §4.2.1 "Read (listener
/// side, three-wire)". `want_eoi` controls whether EOI is sampled; the
/// returned `bool` is the sampled EOI state (always `false` if not asked
/// for).
pub fn read_byte<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    rtmo_ms: u32,
    want_eoi: bool,
    abort: &mut AbortCheck<'_, P>,
) -> Result<(u8, bool), BusError> {
    // 1. Release NRFD to announce readiness.
    pins.set_line(ControlLine::Nrfd, Level::High)?;

    // 2. Wait for DAV low (talker signals data valid).
    wait_for(pins, clock, Phase::WaitDavLow, rtmo_ms, abort, |p| {
        Ok(p.read_control(ControlLine::Dav)?.asserted())
    })?;

    // 3. Assert NRFD to indicate "I'm reading".
    pins.set_line(ControlLine::Nrfd, Level::Low)?;

    // 4. Sample EOI (if requested) and the data bus.
    let eoi = if want_eoi {
        pins.read_control(ControlLine::Eoi)?.asserted()
    } else {
        false
    };
    let byte = pins.read_data_bus()?;

    // 5. Release NDAC to signal acceptance.
    pins.set_line(ControlLine::Ndac, Level::High)?;

    // 6. Wait for DAV high (talker withdraws data).
    wait_for(pins, clock, Phase::WaitDavHigh, rtmo_ms, abort, |p| {
        Ok(!p.read_control(ControlLine::Dav)?.asserted())
    })?;

    // 7. Re-assert NDAC to rearm for the next byte.
    pins.set_line(ControlLine::Ndac, Level::Low)?;

    Ok((byte, eoi))
}

/// Writes one byte as the addressed talker, spec §4.2.1 "Write (talker
/// side)". `is_last_byte` and `eoi_on_send` together decide whether EOI is
/// asserted alongside DAV.
pub fn write_byte<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    rtmo_ms: u32,
    byte: u8,
    is_last_byte: bool,
    eoi_on_send: bool,
    abort: &mut AbortCheck<'_, P>,
) -> Result<(), BusError> {
    // 1. Wait for NDAC low (all listeners attended).
    wait_for(pins, clock, Phase::WaitNdacLow, rtmo_ms, abort, |p| {
        Ok(p.read_control(ControlLine::Ndac)?.asserted())
    })?;

    // 2. Wait for NRFD high (all listeners ready for new data).
    wait_for(pins, clock, Phase::WaitNrfdHigh, rtmo_ms, abort, |p| {
        Ok(!p.read_control(ControlLine::Nrfd)?.asserted())
    })?;

    // 3. Drive DIO with the negated byte; assert EOI simultaneously with
    // DAV if this is the last byte of an EOI-on-send transfer.
    pins.write_data_bus(byte)?;
    let assert_eoi = is_last_byte && eoi_on_send;
    if assert_eoi {
        pins.set_direction_output(ControlLine::Eoi, true)?;
        pins.set_line(ControlLine::Eoi, Level::Low)?;
    }
    pins.set_direction_output(ControlLine::Dav, true)?;
    pins.set_line(ControlLine::Dav, Level::Low)?;

    // 4. Wait for NRFD low (handshake started).
    wait_for(pins, clock, Phase::WaitNrfdLow, rtmo_ms, abort, |p| {
        Ok(p.read_control(ControlLine::Nrfd)?.asserted())
    })?;

    // 5. Wait for NDAC high (data accepted).
    wait_for(pins, clock, Phase::WaitNdacHigh, rtmo_ms, abort, |p| {
        Ok(!p.read_control(ControlLine::Ndac)?.asserted())
    })?;

    // 6. Release DAV (and EOI), clear the data bus.
    pins.set_line(ControlLine::Dav, Level::High)?;
    if assert_eoi {
        pins.release_to_input(ControlLine::Eoi)?;
    }
    pins.write_data_bus(0)?;

    Ok(())
}
