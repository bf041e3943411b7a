// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Real time sources for the host build: a millisecond [`Clock`] backed by
//! `Instant`, and a [`MicroDelay`] backed by a blocking sleep. A real MCU
//! target would back these with a free-running hardware timer instead.

use std::time::Instant;

use gpib_core::clock::{Clock, MicroDelay};

pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock { start: Instant::now() }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

pub struct ThreadDelay;

impl MicroDelay for ThreadDelay {
    fn delay_us(&self, us: u32) {
        std::thread::sleep(std::time::Duration::from_micros(us as u64));
    }
}
