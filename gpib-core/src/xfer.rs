// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transmission and the receive loop, spec §4.5. Addressing is the
//! caller's responsibility (see [`crate::commands::address_to_listen`]/
//! [`crate::commands::address_to_talk`]); these functions assume the
//! target is already addressed and the corresponding `C*AS` state entered.

use gpib_config::{Config, Eor};
use gpib_pin_api::PinAdapter;

use crate::clock::Clock;
use crate::error::{BusError, Phase};
use crate::handshake::{no_abort, read_byte, write_byte};
use crate::state::enter;

/// Writes `payload` followed by the configured EOS terminator, byte by
/// byte, to whichever `*TAS` state the caller has already entered. Shared
/// by [`send_payload`] (controller role, CTAS) and [`send_payload_as_talker`]
/// (device role, DTAS) -- the talker-side handshake in spec §4.5 "Sending
/// data" steps 2-3 doesn't care which role is doing the talking.
fn send_payload_to_addressed<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    cfg: &Config,
    payload: &[u8],
) -> Result<(), BusError> {
    let eos = cfg.eos.bytes();
    let total = payload.len() + eos.len();
    for (i, &b) in payload.iter().chain(eos.iter()).enumerate() {
        let is_last = i + 1 == total;
        write_byte(pins, clock, cfg.read_timeout_ms as u32, b, is_last, cfg.eoi_on_send, &mut no_abort)?;
    }
    Ok(())
}

/// Writes `payload` followed by the configured EOS terminator to an
/// already-addressed listener, spec §4.5 "Sending data" steps 2-3. Leaves
/// the bus in CTAS; the caller decides whether to unaddress afterward
/// (§4.5 step 4, overflow continuation).
pub fn send_payload<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    cfg: &Config,
    payload: &[u8],
) -> Result<(), BusError> {
    enter::ctas(pins)?;
    send_payload_to_addressed(pins, clock, cfg, payload)
}

/// Device-role counterpart of [`send_payload`]: this node has already been
/// addressed to talk by the controller-in-charge (DTAS, spec §4.3's "talk"
/// sub-behavior), and the byte sink is whatever instrument data the host
/// link just forwarded down, rather than an interface command. Leaves the
/// bus in DTAS; the caller returns to DIDS once the controller unaddresses.
pub fn send_payload_as_talker<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    cfg: &Config,
    payload: &[u8],
) -> Result<(), BusError> {
    enter::dtas(pins)?;
    send_payload_to_addressed(pins, clock, cfg, payload)
}

/// Outcome of [`receive_loop`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReceiveOutcome {
    pub bytes_forwarded: usize,
    /// Set when the loop exited because `should_abort` fired (a `++`
    /// prefix arriving from the host, `++!`, or ATN), spec §4.5 "Host link
    /// delivered a `++` prefix or ATN was asserted -> set `tranBrk`".
    pub aborted: bool,
    /// Set when the loop ended because EOI was sampled on the final byte,
    /// as opposed to an end-byte match, an EOR sequence match, or an
    /// abort. Callers use this to decide whether to append `eot_char`.
    pub eoi: bool,
}

/// Reads from an already-addressed talker until a termination condition
/// fires, forwarding each byte via `on_byte`, spec §4.5 "Receive loop
/// termination conditions". `end_byte`, if set, is the user-specified
/// end-of-transmission byte (the `read` command's optional numeric form).
pub fn receive_loop<P: PinAdapter>(
    pins: &mut P,
    clock: &dyn Clock,
    cfg: &Config,
    end_byte: Option<u8>,
    mut should_abort: impl FnMut() -> bool,
    mut on_byte: impl FnMut(u8),
) -> Result<ReceiveOutcome, BusError> {
    enter::clas(pins)?;

    // §9 open question: EOI-only (eor=7) or cfg.eoi forces EOI as the sole
    // terminator, ignoring the configured EOR byte sequence.
    let eor = cfg.eor.bytes();
    let use_eor = !(cfg.eoi_on_send || matches!(cfg.eor, Eor::EoiOnly)) && !eor.is_empty();

    let mut tail = [0u8; 3];
    let mut tail_len = 0usize;
    let mut count = 0usize;

    loop {
        if should_abort() {
            enter::cids(pins)?;
            return Ok(ReceiveOutcome { bytes_forwarded: count, aborted: true, eoi: false });
        }

        let phase_on_timeout = if count == 0 { Phase::WaitTalkerStart } else { Phase::WaitTransferComplete };
        let (byte, eoi) = match read_byte(pins, clock, cfg.read_timeout_ms as u32, true, &mut no_abort) {
            Ok(v) => v,
            Err(BusError::Timeout(_)) => {
                enter::cids(pins)?;
                return Err(BusError::Timeout(phase_on_timeout));
            }
            Err(e) => {
                enter::cids(pins)?;
                return Err(e);
            }
        };

        on_byte(byte);
        count += 1;

        if eoi {
            enter::cids(pins)?;
            return Ok(ReceiveOutcome { bytes_forwarded: count, aborted: false, eoi: true });
        }

        if let Some(eb) = end_byte {
            if byte == eb {
                enter::cids(pins)?;
                return Ok(ReceiveOutcome { bytes_forwarded: count, aborted: false, eoi: false });
            }
        }

        if use_eor {
            if tail_len < eor.len() {
                tail[tail_len] = byte;
                tail_len += 1;
            } else {
                tail.copy_within(1..eor.len(), 0);
                tail[eor.len() - 1] = byte;
            }
            if tail_len == eor.len() && tail[..eor.len()] == *eor {
                enter::cids(pins)?;
                return Ok(ReceiveOutcome { bytes_forwarded: count, aborted: false, eoi: false });
            }
        }
    }
}
