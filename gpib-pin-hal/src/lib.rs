// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The "generic digital-pin fallback" pin adapter named in the design
//! notes: a [`PinAdapter`] built on top of sixteen runtime-switchable
//! digital pins rather than a board's register block.
//!
//! `embedded-hal` 0.2's [`InputPin`]/[`OutputPin`] traits don't by
//! themselves support flipping a pin between input-pullup and push-pull
//! output at runtime -- GPIB needs exactly that for every control line, so
//! (following the same pattern most board HALs use for their own
//! runtime-switchable "Flex"/"Dyn" pin types) this crate adds one small
//! [`DynamicPin`] trait on top that a board's concrete pin type must
//! implement. Everything else here is plain `embedded-hal` digital I/O.

#![no_std]

use embedded_hal::digital::v2::{InputPin, OutputPin};
use gpib_pin_api::{BusFault, ControlLine, Level, PinAdapter, SetMode};

/// A digital pin that can be reconfigured between input-with-pullup and
/// push-pull output at runtime, and read or driven in whichever mode it is
/// currently in.
pub trait DynamicPin: InputPin + OutputPin {
    /// `true` selects push-pull output; `false` selects input with
    /// pull-up, per spec §4.1's "0→input-pullup, 1→output".
    fn set_as_output(&mut self, output: bool);
}

/// A [`PinAdapter`] over sixteen [`DynamicPin`]s: eight data lines
/// (DIO1..DIO8, array index 0..7) and eight control lines, indexed by
/// [`ControlLine`] as `as u8`.
pub struct HalPinAdapter<'a, P: DynamicPin> {
    data: [&'a mut P; 8],
    control: [&'a mut P; 8],
}

impl<'a, P: DynamicPin> HalPinAdapter<'a, P> {
    pub fn new(data: [&'a mut P; 8], control: [&'a mut P; 8]) -> Self {
        HalPinAdapter { data, control }
    }
}

impl<'a, P: DynamicPin> PinAdapter for HalPinAdapter<'a, P> {
    fn read_data_bus(&mut self) -> Result<u8, BusFault> {
        let mut byte = 0u8;
        for (i, pin) in self.data.iter_mut().enumerate() {
            pin.set_as_output(false);
            // GPIB data lines are negative logic: a driven-low wire is a
            // logical 1 bit.
            let asserted = pin.is_low().map_err(|_| BusFault)?;
            if asserted {
                byte |= 1 << i;
            }
        }
        Ok(byte)
    }

    fn write_data_bus(&mut self, byte: u8) -> Result<(), BusFault> {
        for (i, pin) in self.data.iter_mut().enumerate() {
            pin.set_as_output(true);
            if byte & (1 << i) != 0 {
                pin.set_low().map_err(|_| BusFault)?;
            } else {
                pin.set_high().map_err(|_| BusFault)?;
            }
        }
        Ok(())
    }

    fn set_control(
        &mut self,
        bits: u8,
        mask: u8,
        mode: SetMode,
    ) -> Result<(), BusFault> {
        for line in ControlLine::ALL {
            let bit = line.bit();
            if mask & bit == 0 {
                continue;
            }
            let pin = &mut self.control[line as usize];
            let set = bits & bit != 0;
            match mode {
                SetMode::Direction => pin.set_as_output(set),
                SetMode::Level => {
                    if set {
                        pin.set_high().map_err(|_| BusFault)?;
                    } else {
                        pin.set_low().map_err(|_| BusFault)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn read_control(&mut self, line: ControlLine) -> Result<Level, BusFault> {
        let pin = &mut self.control[line as usize];
        let low = pin.is_low().map_err(|_| BusFault)?;
        Ok(Level::from_bit(!low))
    }
}
