// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-memory loopback [`PinAdapter`] standing in for real hardware.
//!
//! GPIB's control lines are open-collector: any party can pull one low, and
//! it only returns high once every party releases it. [`SharedBus`] models
//! that directly -- each side tracks which lines it currently drives and to
//! what level, and a read combines both sides with "any low wins". The data
//! bus is simpler: GPIB forbids two active drivers of DIO at once, so we
//! just track whichever side last claimed the bus as output.
//!
//! [`SharedBus::new_pair`] gives you two ends wired together, letting a test
//! play one side as the controller/engine under test and the other as a
//! scripted instrument or peer controller. The state is behind a mutex
//! rather than a bare `Rc<Cell<..>>` so that two [`SimPinAdapter`]s can each
//! be driven from their own OS thread -- modeling two independent boards,
//! each running its own single-core cooperative loop, wired to the same
//! physical bus.

use std::cell::Cell;
use std::sync::{Arc, Mutex};

use gpib_pin_api::{BusFault, ControlLine, Level, PinAdapter, SetMode};

const NUM_LINES: usize = 8;

struct BusState {
    // Per side (0, 1): bitmask of lines currently driven as outputs.
    ctrl_dir: [Cell<u8>; 2],
    // Per side: output level bit (1 = high, 0 = low), meaningful only
    // where that side's ctrl_dir bit is set.
    ctrl_level: [Cell<u8>; 2],
    // Per side: Some(byte) while that side has DIO as output.
    data: [Cell<Option<u8>>; 2],
    // Edge-triggered flags the simulation or a test can raise, mirroring
    // the ATN/SRQ line-change ISR of spec §5.
    attn: Cell<bool>,
    srq: Cell<bool>,
}

impl BusState {
    fn new() -> Self {
        BusState {
            ctrl_dir: [Cell::new(0), Cell::new(0)],
            ctrl_level: [Cell::new(0xff), Cell::new(0xff)],
            data: [Cell::new(None), Cell::new(None)],
            attn: Cell::new(false),
            srq: Cell::new(false),
        }
    }

    fn other(side: usize) -> usize {
        1 - side
    }

    fn effective_control(&self, line: ControlLine) -> Level {
        let bit = line.bit();
        for side in 0..2 {
            if self.ctrl_dir[side].get() & bit != 0 && self.ctrl_level[side].get() & bit == 0 {
                return Level::Low;
            }
        }
        Level::High
    }

    fn effective_data(&self) -> u8 {
        for side in 0..2 {
            if let Some(b) = self.data[side].get() {
                return b;
            }
        }
        0
    }
}

/// Two ends of a simulated GPIB bus, wired together.
pub struct SharedBus {
    state: Arc<Mutex<BusState>>,
}

impl SharedBus {
    pub fn new_pair() -> (SimPinAdapter, SimPinAdapter) {
        let state = Arc::new(Mutex::new(BusState::new()));
        (
            SimPinAdapter { state: state.clone(), side: 0 },
            SimPinAdapter { state, side: 1 },
        )
    }
}

/// One end of a [`SharedBus`]: a [`PinAdapter`] impl usable by `gpib-core`
/// and an explicit "ISR" hook for tests, per spec §9's "expose an
/// equivalent 'assert attention' hook". `Send` (the mutex, not the
/// single-threaded `Cell`s inside it, is what makes this safe to hand to a
/// second thread), so a test can run two [`gpib_core::engine::Engine`]s
/// concurrently, one per side.
pub struct SimPinAdapter {
    state: Arc<Mutex<BusState>>,
    side: usize,
}

impl Clone for SimPinAdapter {
    fn clone(&self) -> Self {
        SimPinAdapter { state: self.state.clone(), side: self.side }
    }
}

impl SimPinAdapter {
    /// Simulates an ATN falling-edge interrupt: sets the advisory flag the
    /// attention service polls. Call from the *other* side of the bus (or a
    /// test) to wake this side's device-role loop.
    pub fn assert_attention(&self) {
        self.state.lock().unwrap().attn.set(true);
    }

    /// Simulates an SRQ line-change interrupt.
    pub fn assert_srq(&self) {
        self.state.lock().unwrap().srq.set(true);
    }

    /// Consumes (clears) the advisory ATN flag, mirroring how the
    /// cooperative loop clears it once seen.
    pub fn take_attention(&self) -> bool {
        let state = self.state.lock().unwrap();
        let was = state.attn.get();
        state.attn.set(false);
        was
    }

    /// Consumes (clears) the advisory SRQ flag.
    pub fn take_srq(&self) -> bool {
        let state = self.state.lock().unwrap();
        let was = state.srq.get();
        state.srq.set(false);
        was
    }

    /// True if the other side is currently driving `line` low.
    pub fn peer_asserts(&self, line: ControlLine) -> bool {
        let other = BusState::other(self.side);
        let bit = line.bit();
        let state = self.state.lock().unwrap();
        state.ctrl_dir[other].get() & bit != 0 && state.ctrl_level[other].get() & bit == 0
    }
}

impl PinAdapter for SimPinAdapter {
    fn read_data_bus(&mut self) -> Result<u8, BusFault> {
        // Reading implies this side releases DIO to input-pullup first,
        // per spec §4.1.
        let state = self.state.lock().unwrap();
        state.data[self.side].set(None);
        Ok(state.effective_data())
    }

    fn write_data_bus(&mut self, byte: u8) -> Result<(), BusFault> {
        self.state.lock().unwrap().data[self.side].set(Some(byte));
        Ok(())
    }

    fn set_control(
        &mut self,
        bits: u8,
        mask: u8,
        mode: SetMode,
    ) -> Result<(), BusFault> {
        let state = self.state.lock().unwrap();
        match mode {
            SetMode::Direction => {
                let dir = state.ctrl_dir[self.side].get();
                state.ctrl_dir[self.side].set((dir & !mask) | (bits & mask));
                // Newly-input lines should not be misread as driven; clear
                // their level bits to "high" so a stale low doesn't leak
                // through if direction flips back to output without an
                // explicit level write first.
                if mask & !bits != 0 {
                    let lvl = state.ctrl_level[self.side].get();
                    state.ctrl_level[self.side].set(lvl | (mask & !bits));
                }
            }
            SetMode::Level => {
                let lvl = state.ctrl_level[self.side].get();
                state.ctrl_level[self.side].set((lvl & !mask) | (bits & mask));
            }
        }
        let _ = NUM_LINES;
        Ok(())
    }

    fn read_control(&mut self, line: ControlLine) -> Result<Level, BusFault> {
        Ok(self.state.lock().unwrap().effective_control(line))
    }
}
