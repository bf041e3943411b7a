// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device-role attention service, spec §4.3. Runs in response to an
//! ATN falling edge: reads the command burst, classifies each byte, and
//! dispatches to the device-role sub-behaviors once ATN releases.

use gpib_pin_api::{ControlLine, Level, PinAdapter, PinAdapterExt};

use crate::clock::Clock;
use crate::commands::byte;
use crate::error::BusError;
use crate::handshake::{no_abort, read_byte, write_byte};
use crate::state::enter;

/// What one command byte in an ATN burst means to this device, spec §4.3's
/// bulleted classification.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ByteClass {
    Unlisten,
    Untalk,
    MyListen,
    MyTalk,
    /// Secondary address command (0x60..=0x7F), used by the optional
    /// storage extension -- out of scope here, but still classified so it
    /// doesn't fall through to `Ignore`.
    Secondary(u8),
    /// A primary (universal) command below 0x20: SDC/GTL/GET/SPE/SPD/etc.
    Universal(u8),
    /// A LAD/TAD byte (0x20..=0x5F) addressed to some other device.
    OtherAddress,
    Ignore,
}

pub fn classify(db: u8, my_primary_address: u8) -> ByteClass {
    if db == byte::UNL {
        return ByteClass::Unlisten;
    }
    if db == byte::UNT {
        return ByteClass::Untalk;
    }
    if db == byte::lad(my_primary_address) {
        return ByteClass::MyListen;
    }
    if db == byte::tad(my_primary_address) {
        return ByteClass::MyTalk;
    }
    if (0x60..=0x7F).contains(&db) {
        return ByteClass::Secondary(db - 0x60);
    }
    if db < 0x20 {
        return ByteClass::Universal(db);
    }
    if (0x20..=0x5F).contains(&db) {
        // Ambiguous LAD/TAD byte that isn't ours. Some revisions treat
        // these as other-listener traffic; we ignore them unless
        // promiscuous/listen-only, per the open-question resolution.
        return ByteClass::OtherAddress;
    }
    ByteClass::Ignore
}

/// Transient outcomes of one attention-service pass that the caller (the
/// engine) must act on: these are one-shot events, unlike
/// `addressed_to_listen`/`addressed_to_talk`, which persist across bursts.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct AttentionOutcome {
    pub status_sent: bool,
    pub device_cleared: bool,
    pub went_local: bool,
    pub triggered: bool,
    pub local_lockout: bool,
}

/// Runs the attention service to completion: reads the command burst while
/// ATN is asserted, then dispatches once it releases. `addressed_to_listen`
/// and `addressed_to_talk` are the device's persistent addressing state
/// (spec §3 `device_addressed`, split by direction) and are updated in
/// place.
pub fn service_attention<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    rtmo_ms: u32,
    primary_address: u8,
    status_byte: &mut u8,
    promiscuous: bool,
    addressed_to_listen: &mut bool,
    addressed_to_talk: &mut bool,
) -> Result<AttentionOutcome, BusError> {
    enter::dlas(pins)?;

    let mut needs_unlisten = false;
    let mut needs_untalk = false;
    let mut saw_my_listen = false;
    let mut saw_my_talk = false;
    let mut queued_primary: Option<u8> = None;

    while pins.read_control(ControlLine::Atn)?.asserted() {
        let (db, _eoi) = read_byte(pins, clock, rtmo_ms, false, &mut no_abort)?;
        match classify(db, primary_address) {
            ByteClass::Unlisten => needs_unlisten = true,
            ByteClass::Untalk => needs_untalk = true,
            ByteClass::MyListen => saw_my_listen = true,
            ByteClass::MyTalk => saw_my_talk = true,
            ByteClass::Universal(cmd) => queued_primary = Some(cmd),
            ByteClass::Secondary(_) | ByteClass::OtherAddress | ByteClass::Ignore => {}
        }
    }

    let mut outcome = AttentionOutcome::default();

    if promiscuous {
        *addressed_to_listen = true;
    } else {
        if needs_unlisten {
            *addressed_to_listen = false;
        }
        if needs_untalk {
            *addressed_to_talk = false;
        }
        if saw_my_listen {
            *addressed_to_listen = true;
            *addressed_to_talk = false;
        }
        if saw_my_talk {
            *addressed_to_talk = true;
            *addressed_to_listen = false;
        }
    }

    if let Some(cmd) = queued_primary {
        match cmd {
            byte::SPE => {
                // A serial poll queues SPE once, in the burst that also
                // carries the addressed talker's TAD (spec §4.2.2); every
                // other device on the bus sees the same SPE byte but must
                // stay silent, or its status byte collides with the
                // addressed talker's during the read that follows.
                if *addressed_to_talk {
                    send_status(pins, clock, rtmo_ms, status_byte)?;
                    outcome.status_sent = true;
                }
            }
            byte::SPD => {
                enter::dids(pins)?;
            }
            byte::SDC => {
                outcome.device_cleared = true;
            }
            byte::GTL => {
                outcome.went_local = true;
            }
            byte::GET => {
                outcome.triggered = true;
            }
            byte::LLO => {
                outcome.local_lockout = true;
            }
            byte::DCL => {
                outcome.device_cleared = true;
            }
            _ => {}
        }
    }

    if *addressed_to_listen {
        enter::dlas(pins)?;
    } else if *addressed_to_talk {
        enter::dtas(pins)?;
    } else {
        enter::dids(pins)?;
    }

    Ok(outcome)
}

/// Serial-poll response, spec §4.3 "Serial-poll response (`send_status`)":
/// enter DTAS, write the configured status byte, return to DIDS, then clear
/// bit 6 (RQS auto-clears on being polled) and de-assert SRQ.
pub fn send_status<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    rtmo_ms: u32,
    status_byte: &mut u8,
) -> Result<(), BusError> {
    enter::dtas(pins)?;
    write_byte(pins, clock, rtmo_ms, *status_byte, true, false, &mut no_abort)?;
    enter::dids(pins)?;
    *status_byte &= !0x40;
    clr_srq(pins)?;
    Ok(())
}

/// `set_status(byte)`: stores the new status byte and, if bit 6 (RQS) is
/// set, asserts SRQ by driving it low.
pub fn set_status<P: PinAdapter>(
    pins: &mut P,
    status_byte: &mut u8,
    new_byte: u8,
) -> Result<(), gpib_pin_api::BusFault> {
    *status_byte = new_byte;
    if new_byte & 0x40 != 0 {
        pins.set_direction_output(ControlLine::Srq, true)?;
        pins.set_line(ControlLine::Srq, Level::Low)?;
    }
    Ok(())
}

/// `clr_srq`: returns SRQ to input-pullup.
pub fn clr_srq<P: PinAdapter>(pins: &mut P) -> Result<(), gpib_pin_api::BusFault> {
    pins.release_to_input(ControlLine::Srq)
}
