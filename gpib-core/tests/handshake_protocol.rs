// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Exercises the three-wire handshake (spec §4.2.1) against a scripted
//! peer over a simulated bus, both sides driven from one thread: the
//! abort-check hook that [`handshake::write_byte`]/[`handshake::read_byte`]
//! poll on every wait iteration doubles as the spot to step the peer's
//! half of the protocol forward. See `engine_end_to_end.rs` for scenarios
//! that drive two full [`gpib_core::engine::Engine`]s concurrently instead.

use core::cell::Cell;

use gpib_core::clock::FakeClock;
use gpib_core::error::{Abort, BusError, Phase};
use gpib_core::handshake::{read_byte, write_byte};
use gpib_pin_api::{ControlLine, Level, PinAdapter, PinAdapterExt};
use gpib_pin_sim::SharedBus;

#[test]
fn write_byte_completes_full_handshake_with_cooperating_listener() {
    let (mut talker, mut listener) = SharedBus::new_pair();
    listener.set_direction_output(ControlLine::Nrfd, true).unwrap();
    listener.set_line(ControlLine::Nrfd, Level::High).unwrap();
    listener.set_direction_output(ControlLine::Ndac, true).unwrap();
    listener.set_line(ControlLine::Ndac, Level::Low).unwrap();

    let clock = FakeClock::new();
    let sampled = Cell::new(0u8);
    let mut stage = 0u32;
    let mut abort = move |_: &mut _| -> Option<Abort> {
        stage += 1;
        match stage {
            1 => {
                sampled.set(listener.read_data_bus().unwrap());
                listener.set_line(ControlLine::Nrfd, Level::Low).unwrap();
            }
            2 => {
                listener.set_line(ControlLine::Ndac, Level::High).unwrap();
            }
            _ => {}
        }
        None
    };

    write_byte(&mut talker, &clock, 1000, 0x41, false, false, &mut abort).unwrap();
    assert_eq!(sampled.get(), 0x41);
}

#[test]
fn read_byte_completes_full_handshake_with_cooperating_talker() {
    let (mut reader, mut peer) = SharedBus::new_pair();

    let clock = FakeClock::new();
    let mut stage = 0u32;
    let mut abort = move |_: &mut _| -> Option<Abort> {
        stage += 1;
        match stage {
            1 => {
                peer.write_data_bus(0x99).unwrap();
                peer.set_direction_output(ControlLine::Dav, true).unwrap();
                peer.set_line(ControlLine::Dav, Level::Low).unwrap();
            }
            2 => {
                peer.set_line(ControlLine::Dav, Level::High).unwrap();
            }
            _ => {}
        }
        None
    };

    let (byte, eoi) = read_byte(&mut reader, &clock, 1000, false, &mut abort).unwrap();
    assert_eq!(byte, 0x99);
    assert!(!eoi);
}

#[test]
fn write_byte_times_out_without_a_listener() {
    let (mut talker, _listener) = SharedBus::new_pair();
    let clock = FakeClock::new();
    let mut abort = |_: &mut _| -> Option<Abort> {
        clock.advance(50);
        None
    };

    let err = write_byte(&mut talker, &clock, 100, 0x41, false, false, &mut abort).unwrap_err();
    assert_eq!(err, BusError::Timeout(Phase::WaitNdacLow));
}
