// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small fixed-capacity diagnostic ring buffer, in the spirit of the
//! `ringbuf!`/`ringbuf_entry!` pattern used throughout the driver corpus
//! this crate is grounded on (e.g. `drv/stm32h7-i2c`'s `Trace` enum wired
//! through `ringbuf_entry!`).
//!
//! The real `ringbuf` crate integrates with a kernel-level debugger
//! (Humility) and a build-time registration step that has no equivalent
//! outside that kernel, so this is a standalone reimplementation of the
//! same idea rather than a dependency: a fixed-size array of the last `N`
//! entries, overwritten oldest-first, readable by a host tool for
//! debugging but never consulted by control flow.

/// A fixed-capacity, overwrite-oldest ring of diagnostic entries.
pub struct Ringbuf<T: Copy, const N: usize> {
    entries: [T; N],
    next: usize,
    count: u32,
}

impl<T: Copy, const N: usize> Ringbuf<T, N> {
    pub const fn new(fill: T) -> Self {
        Ringbuf { entries: [fill; N], next: 0, count: 0 }
    }

    pub fn push(&mut self, entry: T) {
        self.entries[self.next] = entry;
        self.next = (self.next + 1) % N;
        self.count = self.count.wrapping_add(1);
    }

    /// Total entries ever pushed, including ones since overwritten.
    pub fn total_count(&self) -> u32 {
        self.count
    }

    /// The entries currently held, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let len = self.count.min(N as u32) as usize;
        let start = if (self.count as usize) < N { 0 } else { self.next };
        (0..len).map(move |i| &self.entries[(start + i) % N])
    }
}

/// The diagnostic trace payload recorded by the bus engine and attention
/// service, mirroring `drv/stm32h7-i2c`'s `Trace` enum shape (one variant
/// per notable wait/ISR-adjacent event, carrying just enough state to
/// reconstruct what happened).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    StateEnter(crate::state::BusState),
    HandshakeTimeout(crate::error::Phase),
    HandshakeAbort(crate::error::Abort),
    AttnDispatch,
    IfcPulse,
    SerialPollResponse { addr: u8, status: u8 },
}

/// Capacity of the engine's diagnostic ring buffer. 64 entries is enough
/// to see the last few handshakes and an attention burst without costing
/// meaningful RAM on a microcontroller.
pub const TRACE_CAPACITY: usize = 64;
