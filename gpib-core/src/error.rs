// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The error taxonomy of spec §7, reified as typed enums rather than the
//! firmware convention of a bare numeric phase code.

use core::fmt;

/// Which phase of a handshake timed out, numbered per SPEC_FULL.md §4.2
/// (the spec's own §4.2.1/§7 only says "1..9" without enumerating them).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Read phase 1: waiting for the talker to assert DAV.
    WaitDavLow,
    /// Read phase 2: waiting for the talker to release DAV.
    WaitDavHigh,
    /// Write phase 3: waiting for every listener to release NDAC.
    WaitNdacLow,
    /// Write phase 4: waiting for every listener to release NRFD.
    WaitNrfdHigh,
    /// Write phase 5: waiting for a listener to assert NRFD.
    WaitNrfdLow,
    /// Write phase 6: waiting for every listener to assert NDAC.
    WaitNdacHigh,
    /// A receive loop's first byte never arrived.
    WaitTalkerStart,
    /// A receive loop stalled partway through a multi-byte transfer.
    WaitTransferComplete,
    /// The IFC pulse's settling wait.
    IfcSettle,
}

impl Phase {
    /// The exact wording spec §7 calls out for the two receive-loop cases.
    pub fn message(self) -> &'static str {
        match self {
            Phase::WaitTalkerStart => "timeout waiting for talker",
            Phase::WaitTransferComplete => "timeout waiting for transfer to complete",
            Phase::WaitDavLow => "timeout waiting for DAV low",
            Phase::WaitDavHigh => "timeout waiting for DAV high",
            Phase::WaitNdacLow => "timeout waiting for NDAC low",
            Phase::WaitNrfdHigh => "timeout waiting for NRFD high",
            Phase::WaitNrfdLow => "timeout waiting for NRFD low",
            Phase::WaitNdacHigh => "timeout waiting for NDAC high",
            Phase::IfcSettle => "timeout waiting for IFC settle",
        }
    }
}

/// Why a device-role handshake was abandoned mid-flight, spec §7
/// "Protocol aborts".
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Abort {
    /// The controller pulsed IFC.
    Ifc,
    /// ATN transitioned, meaning the controller wants to address us.
    Atn,
}

/// Errors surfaced by the bus engine (§4.2, §4.2.1).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusError {
    Timeout(Phase),
    Aborted(Abort),
    Fault,
}

impl From<gpib_pin_api::BusFault> for BusError {
    fn from(_: gpib_pin_api::BusFault) -> Self {
        BusError::Fault
    }
}

impl BusError {
    /// The exact host-link wording for this error, usable directly by a
    /// `no_std` caller without going through `core::fmt`.
    pub fn message(self) -> &'static str {
        match self {
            BusError::Timeout(p) => p.message(),
            BusError::Aborted(Abort::Ifc) => "aborted by IFC",
            BusError::Aborted(Abort::Atn) => "aborted by ATN",
            BusError::Fault => "pin adapter fault",
        }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Errors surfaced while parsing a host-link line (§4.4).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    Unrecognized,
    /// Spec §6 "Valid range is between …" -- carries the bounds the caller
    /// checked against so the host-link message can quote them.
    OutOfRange { lo: i64, hi: i64 },
    Overflow,
}

impl ParseError {
    /// The fixed part of the message; callers needing the full
    /// `OutOfRange` wording (with bounds filled in) use
    /// [`crate::hostlink::HostLinkExt::write_parse_error`] instead, since
    /// that requires formatting two numbers this `&'static str` can't hold.
    pub fn message(self) -> &'static str {
        match self {
            ParseError::Unrecognized => "Unrecognized command",
            ParseError::OutOfRange { .. } => "Valid range is between arguments",
            ParseError::Overflow => "line too long, discarded",
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ParseError::OutOfRange { lo, hi } => {
                write!(f, "Valid range is between {lo} and {hi}")
            }
            other => f.write_str(other.message()),
        }
    }
}
