// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `gpib-fw`: the host build of the GPIB interface firmware.
//!
//! This binary wires [`gpib_core::Engine`] to real-ish implementations of
//! its four collaborators: a millisecond [`Clock`]/[`MicroDelay`] pair
//! backed by [`std::time::Instant`] and a blocking sleep, a host link over
//! stdin/stdout, and a file-backed [`gpib_config::ConfigStore`]. The pin
//! adapter is [`gpib_pin_sim::SimPinAdapter`]: this workspace carries no
//! concrete board support package, so the firmware runs against one end of
//! a simulated bus with nothing wired to the other end, exactly as a real
//! interface board behaves freshly powered on with no instrument attached.
//! Bringing up a real board means swapping in `gpib-pin-hal` behind a
//! `DynamicPin` impl for that board's GPIOs; nothing else in this binary
//! would need to change.

mod clock;
mod config_store;
mod hostlink;

use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use gpib_config::Mode;
use gpib_core::engine::Engine;
use gpib_pin_sim::SharedBus;
use log::info;

use crate::clock::{SystemClock, ThreadDelay};
use crate::config_store::FileConfigStore;
use crate::hostlink::StdioHostLink;

#[derive(Parser, Debug)]
#[clap(name = "gpib-fw", about = "GPIB/IEEE-488 bus interface firmware")]
struct Args {
    /// Starting bus role, overriding whatever is in the persisted config.
    #[clap(long, possible_values = &["device", "controller"])]
    mode: Option<String>,

    /// This node's primary GPIB address (1-30), overriding the persisted
    /// config.
    #[clap(long)]
    primary_address: Option<u8>,

    /// Path to the persisted configuration blob.
    #[clap(long, default_value = "gpib-fw.cfg")]
    config: PathBuf,

    /// Dump the engine's diagnostic ring buffer to stderr on exit.
    #[clap(long)]
    trace: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut store = FileConfigStore::new(args.config);
    let mut config = gpib_config::load(&mut store);
    if let Some(mode) = args.mode.as_deref() {
        config.mode = match mode {
            "controller" => Mode::Controller,
            _ => Mode::Device,
        };
    }
    if let Some(addr) = args.primary_address {
        config.primary_address = addr;
    }

    info!("starting in {:?} role at address {}", config.mode, config.primary_address);

    let (pins, _unconnected_peer) = SharedBus::new_pair();
    let mut engine = Engine::new(pins, SystemClock::new(), ThreadDelay, StdioHostLink, store, config);

    let stdin = std::io::stdin();
    let mut byte = [0u8; 1];
    let mut lock = stdin.lock();
    let run_result = loop {
        engine.service_attention_if_needed();
        engine.service_srq_if_needed();
        match lock.read(&mut byte) {
            Ok(0) => break Ok(()),
            Ok(_) => engine.feed_host_byte(byte[0]),
            Err(e) => break Err(e.into()),
        }
    };

    if args.trace {
        for entry in engine.trace() {
            eprintln!("{entry:?}");
        }
    }

    run_result
}
