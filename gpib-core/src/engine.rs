// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The engine: the single value that owns the pin adapter, the
//! configuration, the bus-role state, and the two ISR-shared flags, and
//! that ties the bus engine, attention service, and line interpreter
//! together into the cooperative loop described in spec §5.

use core::sync::atomic::{AtomicBool, Ordering};

use gpib_config::{Config, ConfigStore, Eor, Eos, FixedStr, IdnMode, Mode};
use gpib_pin_api::{ControlLine, Level, PinAdapter, PinAdapterExt};
use num_traits::{FromPrimitive, ToPrimitive};

use crate::attention::{self, AttentionOutcome};
use crate::clock::{elapsed_at_least, Clock, MicroDelay};
use crate::commands::{self, byte};
use crate::dispatch::{self, eq_ignore_case, CommandId, Dispatch, Modes};
use crate::error::{BusError, ParseError};
use crate::hostlink::{HostLink, HostLinkExt};
use crate::interp::{LineEvent, LineInterpreter, CAPACITY};
use crate::ringbuf::{Ringbuf, Trace, TRACE_CAPACITY};
use crate::state::{enter, BusState};
use crate::xfer;

/// The firmware version string, distinct from the user-settable
/// `version_string` config field (`ver real` / `id fwver`).
pub const FW_VERSION: &str = "0.1.0";

const HELP_TEXT: &str = "addr auto clr dcl default eoi eor eos eot_char eot_enable help ifc id \
llo loc lon macro mla mta msa unl unt mode ppoll prom read read_tmo_ms ren repeat rst savecfg \
setvstr spoll allspoll srq srqauto stat ton trg ver verbose xdiag";

/// Busy-waits using the injected clock, for the millisecond-scale waits
/// spec §5 calls out (`sendAllClear`'s 40 ms, `repeat`'s inter-send delay)
/// that are too coarse for [`MicroDelay`].
fn block_ms(clock: &dyn Clock, ms: u32) {
    let start = clock.now_ms();
    while !elapsed_at_least(start, clock.now_ms(), ms) {}
}

/// The engine: owns everything the bus engine, attention service, and line
/// interpreter need, per spec §9 "model this as a single engine value that
/// owns the pin adapter and the flags".
pub struct Engine<P: PinAdapter, C: Clock, D: MicroDelay, H: HostLink, S: ConfigStore> {
    pins: P,
    clock: C,
    delay: D,
    host: H,
    store: S,
    config: Config,
    state: BusState,
    addressed_to_listen: bool,
    addressed_to_talk: bool,
    atn_flag: AtomicBool,
    srq_flag: AtomicBool,
    interp: LineInterpreter,
    trace: Ringbuf<Trace, TRACE_CAPACITY>,
    verbose: bool,
    promiscuous: bool,
    listen_only: bool,
    talk_only: u8,
    auto_mode: u8,
    srqauto: bool,
    tran_brk: bool,
}

impl<P: PinAdapter, C: Clock, D: MicroDelay, H: HostLink, S: ConfigStore> Engine<P, C, D, H, S> {
    /// Boots the engine in the role named by `config.mode`, spec §4.2
    /// "initial state is CINI or DINI per configured role".
    pub fn new(pins: P, clock: C, delay: D, host: H, store: S, config: Config) -> Self {
        let mut engine = Engine {
            pins,
            clock,
            delay,
            host,
            store,
            config,
            state: BusState::Cini,
            addressed_to_listen: false,
            addressed_to_talk: false,
            atn_flag: AtomicBool::new(false),
            srq_flag: AtomicBool::new(false),
            interp: LineInterpreter::new(),
            trace: Ringbuf::new(Trace::None),
            verbose: false,
            promiscuous: false,
            listen_only: false,
            talk_only: 0,
            auto_mode: 0,
            srqauto: false,
            tran_brk: false,
        };
        engine.enter_role_init();
        engine
    }

    fn enter_role_init(&mut self) {
        if self.config.mode == Mode::Controller {
            let _ = commands::pulse_ifc(&mut self.pins, &self.delay);
            self.trace.push(Trace::IfcPulse);
            let _ = enter::cids(&mut self.pins);
            self.state = BusState::Cids;
        } else {
            let _ = enter::dids(&mut self.pins);
            self.state = BusState::Dids;
        }
        self.trace.push(Trace::StateEnter(self.state));
    }

    /// ISR-equivalent hook: the real firmware's ATN line-change interrupt
    /// handler does nothing but set this flag (spec §5). A host simulation
    /// harness calls this directly instead of wiring a real interrupt.
    pub fn assert_attention(&self) {
        self.atn_flag.store(true, Ordering::Relaxed);
    }

    /// ISR-equivalent hook for the SRQ line-change interrupt (controller
    /// role).
    pub fn assert_srq(&self) {
        self.srq_flag.store(true, Ordering::Relaxed);
    }

    fn take_attention(&self) -> bool {
        self.atn_flag.swap(false, Ordering::Relaxed)
    }

    fn take_srq(&self) -> bool {
        self.srq_flag.swap(false, Ordering::Relaxed)
    }

    /// Diagnostic trace contents, oldest first, for a host debug tool.
    pub fn trace(&self) -> impl Iterator<Item = &Trace> {
        self.trace.iter()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus_state(&self) -> BusState {
        self.state
    }

    /// Runs the attention service if the ATN flag is set and we're in
    /// device role. Call this from the main loop on every iteration, per
    /// spec §5 "the device-role loop sees the flag at the next check point
    /// and runs the attention service to completion before returning to
    /// user work."
    pub fn service_attention_if_needed(&mut self) {
        if self.state.is_device() && self.take_attention() {
            self.trace.push(Trace::AttnDispatch);
            if let Err(e) = self.run_attention() {
                self.trace_bus_error(e);
                self.host.write_line(e.message());
                let _ = enter::dids(&mut self.pins);
                self.state = BusState::Dids;
            }
        }
    }

    fn run_attention(&mut self) -> Result<(), BusError> {
        let promiscuous_or_listen_only = self.promiscuous || self.listen_only;
        let mut status = self.config.status_byte;
        let outcome: AttentionOutcome = attention::service_attention(
            &mut self.pins,
            &self.clock,
            self.config.read_timeout_ms as u32,
            self.config.primary_address,
            &mut status,
            promiscuous_or_listen_only,
            &mut self.addressed_to_listen,
            &mut self.addressed_to_talk,
        )?;
        self.config.status_byte = status;

        if outcome.device_cleared {
            self.interp.clear();
        }

        self.state = if self.addressed_to_listen {
            BusState::Dlas
        } else if self.addressed_to_talk {
            BusState::Dtas
        } else {
            BusState::Dids
        };
        self.trace.push(Trace::StateEnter(self.state));
        Ok(())
    }

    /// Runs the SRQ auto-poll if a service request arrived and `srqauto`
    /// is enabled (controller role), per the `srqauto` command (spec §6).
    pub fn service_srq_if_needed(&mut self) {
        if self.state.is_controller() && self.srqauto && self.take_srq() {
            self.spoll_range(1, 30, true);
        }
    }

    /// Feeds one byte from the host link into the line interpreter and
    /// acts on whatever line event results. Bus-level faults are reported
    /// on the host link rather than propagated -- spec §7 "nothing is
    /// retried at the bus layer; recovery is the user's responsibility".
    pub fn feed_host_byte(&mut self, b: u8) {
        let idn_enabled = self.config.idn_mode != IdnMode::Disabled;
        match self.interp.feed(b, idn_enabled) {
            LineEvent::None => {}
            LineEvent::Empty => {
                if self.verbose {
                    self.host.write(b"> ");
                }
                self.interp.clear();
            }
            LineEvent::AbortRequested => {
                self.tran_brk = true;
                self.interp.clear();
            }
            LineEvent::CommandOverflow => {
                self.host.write_line(ParseError::Overflow.message());
                self.interp.clear();
            }
            LineEvent::Command => {
                self.run_command();
                self.interp.clear();
            }
            LineEvent::IdnQuery => {
                self.reply_idn();
                self.interp.clear();
            }
            LineEvent::Data => {
                self.handle_data_line();
                self.interp.clear();
            }
        }
    }

    fn reply_idn(&mut self) {
        // Disabled was already filtered by `feed_host_byte`'s idn_enabled
        // check; Exact requires the line be exactly "*idn?", Prefix allows
        // trailing garbage (already how the interpreter recognized it).
        if self.config.idn_mode == IdnMode::Exact {
            let exact = self.interp.line().len() == 5
                && eq_ignore_case_bytes(self.interp.line(), b"*idn?");
            if !exact {
                self.handle_data_line();
                return;
            }
        }
        self.host.write(self.config.short_name.as_str().as_bytes());
        self.host.write(b",");
        self.host.write(self.config.serial_number.as_str().as_bytes());
        self.host.write(b",");
        self.host.write(self.config.version_string.as_str().as_bytes());
        self.host.write(b"\n");
    }

    fn handle_data_line(&mut self) {
        let line: heapless::Vec<u8, CAPACITY> =
            heapless::Vec::from_slice(self.interp.line()).unwrap_or_default();
        if self.config.mode != Mode::Controller {
            self.handle_device_data_line(&line);
            return;
        }
        if let Err(e) = self.send_and_maybe_read(&line) {
            self.host.write_line(e.message());
            let _ = enter::cids(&mut self.pins);
            self.state = BusState::Cids;
        }
    }

    /// Device role: a data line from the host is this node's instrument
    /// reply, sent out only once a remote controller has addressed this
    /// node to talk (DTAS, spec §4.3). If nobody has addressed us to talk,
    /// there is no handshake to perform -- the line is dropped, matching
    /// how a real instrument has nothing to say until it is polled.
    fn handle_device_data_line(&mut self, payload: &[u8]) {
        if !self.addressed_to_talk {
            return;
        }
        if let Err(e) = xfer::send_payload_as_talker(&mut self.pins, &self.clock, &self.config, payload) {
            self.host.write_line(e.message());
            let _ = enter::dids(&mut self.pins);
            self.state = BusState::Dids;
            self.addressed_to_talk = false;
        }
    }

    fn send_and_maybe_read(&mut self, payload: &[u8]) -> Result<(), BusError> {
        if !self.addressed_to_listen {
            commands::address_to_listen(
                &mut self.pins,
                &self.clock,
                self.config.read_timeout_ms as u32,
                self.config.controller_address,
                self.config.primary_address,
            )?;
            self.addressed_to_listen = true;
        }
        xfer::send_payload(&mut self.pins, &self.clock, &self.config, payload)?;

        let auto_read = self.should_auto_read_after(payload);
        commands::unaddress(&mut self.pins, &self.clock, self.config.read_timeout_ms as u32)?;
        self.addressed_to_listen = false;
        self.addressed_to_talk = false;
        enter::cids(&mut self.pins)?;
        self.state = BusState::Cids;

        if auto_read {
            self.do_read(None)?;
        }
        Ok(())
    }

    fn should_auto_read_after(&self, payload: &[u8]) -> bool {
        match self.amode() {
            0 => false,
            1 => true,
            2 => payload.iter().rposition(|&b| !b.is_ascii_whitespace()).map(|i| payload[i] == b'?').unwrap_or(false),
            _ => false,
        }
    }

    fn amode(&self) -> u8 {
        // `auto` is a runtime-only setting (spec §4.5), not part of the
        // persisted Config record; kept as part of engine state via the
        // repurposed top bits of read_timeout_ms would be a layering
        // violation, so it's tracked separately.
        self.auto_mode
    }

    fn run_command(&mut self) {
        // Copied out of `self.interp` rather than borrowed: `Dispatch`'s
        // `args` would otherwise keep a shared borrow of `self` alive
        // across the `&mut self` dispatch below.
        let line: heapless::Vec<u8, CAPACITY> = heapless::Vec::from_slice(self.interp.line()).unwrap_or_default();
        let Ok(text) = core::str::from_utf8(&line) else {
            self.host.write_line(ParseError::Unrecognized.message());
            return;
        };
        // Strip the leading "++".
        let rest = &text[2.min(text.len())..];
        let current_modes = if self.config.mode == Mode::Controller {
            Modes::CONTROLLER
        } else {
            Modes::DEVICE
        };
        match dispatch::dispatch(rest, current_modes) {
            Err(e) => self.host.write_parse_error(e),
            Ok(d) => self.run_dispatched(d),
        }
    }

    fn run_dispatched(&mut self, d: Dispatch<'_>) {
        let args = d.args;
        let result = match d.id {
            CommandId::Addr => self.cmd_addr(args),
            CommandId::Auto => self.cmd_auto(args),
            CommandId::Clr => self.cmd_clr(),
            CommandId::Dcl => self.cmd_dcl(),
            CommandId::Default => self.cmd_default(),
            CommandId::Eoi => self.cmd_eoi(args),
            CommandId::Eor => self.cmd_eor(args),
            CommandId::Eos => self.cmd_eos(args),
            CommandId::EotChar => self.cmd_eot_char(args),
            CommandId::EotEnable => self.cmd_eot_enable(args),
            CommandId::Help => self.cmd_help(args),
            CommandId::Ifc => self.cmd_ifc(),
            CommandId::Id => self.cmd_id(args),
            CommandId::Llo => self.cmd_llo(args),
            CommandId::Loc => self.cmd_loc(args),
            CommandId::Lon => self.cmd_lon(args),
            CommandId::Macro => self.cmd_macro(args),
            CommandId::Mla => self.cmd_mla(args),
            CommandId::Mta => self.cmd_mta(args),
            CommandId::Msa => self.cmd_msa(args),
            CommandId::Unl => self.cmd_unl(),
            CommandId::Unt => self.cmd_unt(),
            CommandId::Mode => self.cmd_mode(args),
            CommandId::Ppoll => self.cmd_ppoll(),
            CommandId::Prom => self.cmd_prom(args),
            CommandId::Read => self.cmd_read(args),
            CommandId::ReadTmoMs => self.cmd_read_tmo_ms(args),
            CommandId::Ren => self.cmd_ren(args),
            CommandId::Repeat => self.cmd_repeat(args),
            CommandId::Rst => self.cmd_rst(),
            CommandId::Savecfg => self.cmd_savecfg(),
            CommandId::Setvstr => self.cmd_setvstr(args),
            CommandId::Spoll => self.cmd_spoll(args, false),
            CommandId::Allspoll => self.cmd_spoll(args, true),
            CommandId::Srq => self.cmd_srq(),
            CommandId::Srqauto => self.cmd_srqauto(args),
            CommandId::Stat => self.cmd_stat(args),
            CommandId::Ton => self.cmd_ton(args),
            CommandId::Trg => self.cmd_trg(args),
            CommandId::Ver => self.cmd_ver(args),
            CommandId::Verbose => self.cmd_verbose(),
            CommandId::Xdiag => self.cmd_xdiag(args),
        };
        if let Err(e) = result {
            self.trace_bus_error(e);
            self.host.write_line(e.message());
            let _ = enter::cids(&mut self.pins);
            let _ = enter::dids(&mut self.pins);
            self.state = self.state.idle();
        }
    }

    fn trace_bus_error(&mut self, e: BusError) {
        match e {
            BusError::Timeout(phase) => self.trace.push(Trace::HandshakeTimeout(phase)),
            BusError::Aborted(abort) => self.trace.push(Trace::HandshakeAbort(abort)),
            BusError::Fault => {}
        }
    }

    fn cmd_addr(&mut self, args: &str) -> Result<(), BusError> {
        if args.trim().is_empty() {
            self.host.write_decimal(self.config.primary_address as u32);
            return Ok(());
        }
        // The boundary test (spec §8) expects `addr 0`/`addr 31` to read
        // as "Unrecognized command", not the generic range message.
        match dispatch::parse_ranged_u8(args, 1, 30) {
            Ok(n) => self.config.primary_address = n,
            Err(_) => self.host.write_line(ParseError::Unrecognized.message()),
        }
        Ok(())
    }

    fn cmd_auto(&mut self, args: &str) -> Result<(), BusError> {
        if args.trim().is_empty() {
            self.host.write_decimal(self.auto_mode as u32);
            return Ok(());
        }
        match dispatch::parse_ranged_u8(args, 0, 3) {
            Ok(n) => self.auto_mode = n,
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_clr(&mut self) -> Result<(), BusError> {
        commands::addressed_command(
            &mut self.pins,
            &self.clock,
            self.config.read_timeout_ms as u32,
            self.config.controller_address,
            self.config.primary_address,
            byte::SDC,
        )?;
        self.state = BusState::Cids;
        Ok(())
    }

    fn cmd_dcl(&mut self) -> Result<(), BusError> {
        commands::device_clear_all(&mut self.pins, &self.clock, self.config.read_timeout_ms as u32)?;
        self.state = BusState::Cids;
        Ok(())
    }

    fn cmd_default(&mut self) -> Result<(), BusError> {
        let mode = self.config.mode;
        self.config = Config::default();
        self.config.mode = mode;
        Ok(())
    }

    fn cmd_eoi(&mut self, args: &str) -> Result<(), BusError> {
        if args.trim().is_empty() {
            self.host.write_decimal(self.config.eoi_on_send as u32);
            return Ok(());
        }
        match dispatch::parse_bool_flag(args) {
            Ok(v) => self.config.eoi_on_send = v,
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_eor(&mut self, args: &str) -> Result<(), BusError> {
        if args.trim().is_empty() {
            self.host.write_decimal(self.config.eor.to_u8().unwrap_or(0) as u32);
            return Ok(());
        }
        match dispatch::parse_ranged_u8(args, 0, 7).and_then(|n| Eor::from_u8(n).ok_or(ParseError::OutOfRange { lo: 0, hi: 7 })) {
            Ok(v) => self.config.eor = v,
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_eos(&mut self, args: &str) -> Result<(), BusError> {
        if args.trim().is_empty() {
            self.host.write_decimal(self.config.eos.to_u8().unwrap_or(0) as u32);
            return Ok(());
        }
        match dispatch::parse_ranged_u8(args, 0, 3).and_then(|n| Eos::from_u8(n).ok_or(ParseError::OutOfRange { lo: 0, hi: 3 })) {
            Ok(v) => self.config.eos = v,
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_eot_char(&mut self, args: &str) -> Result<(), BusError> {
        if args.trim().is_empty() {
            self.host.write_decimal(self.config.eot_char as u32);
            return Ok(());
        }
        match dispatch::parse_ranged_u8(args, 0, 255) {
            Ok(n) => self.config.eot_char = n,
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_eot_enable(&mut self, args: &str) -> Result<(), BusError> {
        if args.trim().is_empty() {
            self.host.write_decimal(self.config.eot_enabled as u32);
            return Ok(());
        }
        match dispatch::parse_bool_flag(args) {
            Ok(v) => self.config.eot_enabled = v,
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_help(&mut self, _args: &str) -> Result<(), BusError> {
        self.host.write_line(HELP_TEXT);
        Ok(())
    }

    fn cmd_ifc(&mut self) -> Result<(), BusError> {
        commands::pulse_ifc(&mut self.pins, &self.delay)?;
        self.state = BusState::Cids;
        Ok(())
    }

    fn cmd_id(&mut self, args: &str) -> Result<(), BusError> {
        let (field, rest) = split_token(args);
        if eq_ignore_case(field, "fwver") {
            self.host.write_line(FW_VERSION);
            return Ok(());
        }
        let slot = if eq_ignore_case(field, "verstr") {
            &mut self.config.version_string
        } else if eq_ignore_case(field, "name") {
            &mut self.config.short_name
        } else if eq_ignore_case(field, "serial") {
            &mut self.config.serial_number
        } else {
            self.host.write_line(ParseError::Unrecognized.message());
            return Ok(());
        };
        if rest.is_empty() {
            let s = slot.as_str();
            self.host.write_line(s);
        } else {
            *slot = FixedStr::new(rest);
        }
        Ok(())
    }

    fn cmd_llo(&mut self, args: &str) -> Result<(), BusError> {
        if eq_ignore_case(args.trim(), "all") {
            commands::send_raw_command(&mut self.pins, &self.clock, self.config.read_timeout_ms as u32, byte::LLO)?;
        } else {
            commands::addressed_command(
                &mut self.pins,
                &self.clock,
                self.config.read_timeout_ms as u32,
                self.config.controller_address,
                self.config.primary_address,
                byte::LLO,
            )?;
        }
        self.state = BusState::Cids;
        Ok(())
    }

    fn cmd_loc(&mut self, args: &str) -> Result<(), BusError> {
        if eq_ignore_case(args.trim(), "all") {
            // GTL only reaches addressed listeners; there is no universal
            // "return to local" byte. Dropping REN is the bus-wide
            // equivalent -- every device reverts to front-panel control.
            self.pins.set_line(ControlLine::Ren, Level::High)?;
        } else {
            commands::addressed_command(
                &mut self.pins,
                &self.clock,
                self.config.read_timeout_ms as u32,
                self.config.controller_address,
                self.config.primary_address,
                byte::GTL,
            )?;
        }
        self.state = BusState::Cids;
        Ok(())
    }

    fn cmd_lon(&mut self, args: &str) -> Result<(), BusError> {
        if args.trim().is_empty() {
            self.host.write_decimal(self.listen_only as u32);
            return Ok(());
        }
        match dispatch::parse_bool_flag(args) {
            Ok(v) => self.listen_only = v,
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_macro(&mut self, args: &str) -> Result<(), BusError> {
        // Macro storage/execution is an out-of-scope external collaborator
        // (spec §1); validate the slot number and report that execution
        // isn't available in this build.
        match dispatch::parse_ranged_u8(args, 0, 9) {
            Ok(_) => self.host.write_line("macro execution not available"),
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_mla(&mut self, args: &str) -> Result<(), BusError> {
        match dispatch::parse_ranged_u8(args, 0, 30) {
            Ok(n) => {
                commands::send_raw_command(&mut self.pins, &self.clock, self.config.read_timeout_ms as u32, byte::lad(n))?;
                self.state = BusState::Cids;
            }
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_mta(&mut self, args: &str) -> Result<(), BusError> {
        match dispatch::parse_ranged_u8(args, 0, 30) {
            Ok(n) => {
                commands::send_raw_command(&mut self.pins, &self.clock, self.config.read_timeout_ms as u32, byte::tad(n))?;
                self.state = BusState::Cids;
            }
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_msa(&mut self, args: &str) -> Result<(), BusError> {
        match dispatch::parse_ranged_u8(args, 0, 30) {
            Ok(n) => {
                commands::send_raw_command(&mut self.pins, &self.clock, self.config.read_timeout_ms as u32, byte::msa(n))?;
                self.state = BusState::Cids;
            }
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_unl(&mut self) -> Result<(), BusError> {
        commands::send_raw_command(&mut self.pins, &self.clock, self.config.read_timeout_ms as u32, byte::UNL)?;
        self.addressed_to_listen = false;
        self.state = BusState::Cids;
        Ok(())
    }

    fn cmd_unt(&mut self) -> Result<(), BusError> {
        commands::send_raw_command(&mut self.pins, &self.clock, self.config.read_timeout_ms as u32, byte::UNT)?;
        self.addressed_to_talk = false;
        self.state = BusState::Cids;
        Ok(())
    }

    fn cmd_mode(&mut self, args: &str) -> Result<(), BusError> {
        if args.trim().is_empty() {
            self.host.write_decimal((self.config.mode == Mode::Controller) as u32);
            return Ok(());
        }
        let want_controller = match dispatch::parse_bool_flag(args) {
            Ok(v) => v,
            Err(e) => {
                self.host.write_parse_error(e);
                return Ok(());
            }
        };
        let currently_controller = self.config.mode == Mode::Controller;
        if want_controller == currently_controller {
            return Ok(());
        }

        // Spec §8 scenario 6: stop, settle, re-init the new role's
        // interrupt arming.
        crate::state::stop(&mut self.pins)?;
        self.delay.delay_us(200);
        self.atn_flag.store(false, Ordering::Relaxed);
        self.srq_flag.store(false, Ordering::Relaxed);
        self.addressed_to_listen = false;
        self.addressed_to_talk = false;

        self.config.mode = if want_controller { Mode::Controller } else { Mode::Device };
        self.enter_role_init();
        Ok(())
    }

    fn cmd_ppoll(&mut self) -> Result<(), BusError> {
        let byte = commands::parallel_poll(&mut self.pins, &self.delay)?;
        self.host.write_decimal(byte as u32);
        self.state = BusState::Cids;
        Ok(())
    }

    fn cmd_prom(&mut self, args: &str) -> Result<(), BusError> {
        if args.trim().is_empty() {
            self.host.write_decimal(self.promiscuous as u32);
            return Ok(());
        }
        match dispatch::parse_bool_flag(args) {
            Ok(v) => self.promiscuous = v,
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_read(&mut self, args: &str) -> Result<(), BusError> {
        let arg = args.trim();
        let end_byte = if arg.is_empty() || eq_ignore_case(arg, "eoi") {
            None
        } else {
            match dispatch::parse_ranged_u8(arg, 0, 255) {
                Ok(n) => Some(n),
                Err(e) => {
                    self.host.write_parse_error(e);
                    return Ok(());
                }
            }
        };
        self.do_read(end_byte)
    }

    fn do_read(&mut self, end_byte: Option<u8>) -> Result<(), BusError> {
        if !self.addressed_to_talk {
            commands::address_to_talk(
                &mut self.pins,
                &self.clock,
                self.config.read_timeout_ms as u32,
                self.config.controller_address,
                self.config.primary_address,
            )?;
            self.addressed_to_talk = true;
        }

        let tran_brk = self.tran_brk;
        let host = &mut self.host;
        let outcome = xfer::receive_loop(&mut self.pins, &self.clock, &self.config, end_byte, || {
            tran_brk || self.atn_flag.load(Ordering::Relaxed)
        }, |b| host.write(&[b]))?;

        if outcome.eoi && self.config.eot_enabled {
            self.host.write(&[self.config.eot_char]);
        }
        self.host.write(b"\n");

        self.tran_brk = false;
        commands::unaddress(&mut self.pins, &self.clock, self.config.read_timeout_ms as u32)?;
        self.addressed_to_listen = false;
        self.addressed_to_talk = false;
        self.state = BusState::Cids;
        Ok(())
    }

    fn cmd_read_tmo_ms(&mut self, args: &str) -> Result<(), BusError> {
        if args.trim().is_empty() {
            self.host.write_decimal(self.config.read_timeout_ms as u32);
            return Ok(());
        }
        match dispatch::parse_ranged_u16(args, 1, 32000) {
            Ok(n) => self.config.read_timeout_ms = n,
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_ren(&mut self, args: &str) -> Result<(), BusError> {
        if args.trim().is_empty() {
            let level = self.pins.read_control(ControlLine::Ren)?;
            self.host.write_decimal(level.asserted() as u32);
            return Ok(());
        }
        match dispatch::parse_bool_flag(args) {
            Ok(v) => {
                self.pins.set_direction_output(ControlLine::Ren, true)?;
                self.pins.set_line(ControlLine::Ren, if v { Level::Low } else { Level::High })?;
            }
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_repeat(&mut self, args: &str) -> Result<(), BusError> {
        let (n_tok, rest) = split_token(args);
        let (delay_tok, text) = split_token(rest);
        let n = match dispatch::parse_ranged_u16(n_tok, 1, 65000) {
            Ok(v) => v,
            Err(e) => {
                self.host.write_parse_error(e);
                return Ok(());
            }
        };
        let delay_ms = match dispatch::parse_ranged_u16(delay_tok, 0, 65000) {
            Ok(v) => v,
            Err(e) => {
                self.host.write_parse_error(e);
                return Ok(());
            }
        };

        if !self.addressed_to_listen {
            commands::address_to_listen(
                &mut self.pins,
                &self.clock,
                self.config.read_timeout_ms as u32,
                self.config.controller_address,
                self.config.primary_address,
            )?;
            self.addressed_to_listen = true;
        }
        for i in 0..n {
            xfer::send_payload(&mut self.pins, &self.clock, &self.config, text.as_bytes())?;
            if i + 1 < n {
                block_ms(&self.clock, delay_ms as u32);
            }
        }
        commands::unaddress(&mut self.pins, &self.clock, self.config.read_timeout_ms as u32)?;
        self.addressed_to_listen = false;
        self.state = BusState::Cids;
        Ok(())
    }

    fn cmd_rst(&mut self) -> Result<(), BusError> {
        // Actually resetting the MCU is a platform concern outside
        // gpib-core; this reinitializes the runtime bus-role state and
        // leaves a real watchdog-driven reset to gpib-fw.
        self.interp.clear();
        self.addressed_to_listen = false;
        self.addressed_to_talk = false;
        self.enter_role_init();
        self.host.write_line("RST");
        Ok(())
    }

    fn cmd_savecfg(&mut self) -> Result<(), BusError> {
        match gpib_config::save(&mut self.store, &self.config) {
            Ok(()) => {}
            Err(_) => self.host.write_line("savecfg failed"),
        }
        Ok(())
    }

    fn cmd_setvstr(&mut self, args: &str) -> Result<(), BusError> {
        self.config.version_string = FixedStr::new(args.trim());
        Ok(())
    }

    fn spoll_one(&mut self, addr: u8) -> Result<u8, BusError> {
        let mut result = 0u8;
        commands::serial_poll(
            &mut self.pins,
            &self.clock,
            self.config.read_timeout_ms as u32,
            self.config.controller_address,
            core::iter::once(addr),
            |_addr, status| result = status,
        )?;
        self.state = BusState::Cids;
        self.trace.push(Trace::SerialPollResponse { addr, status: result });
        Ok(result)
    }

    fn spoll_range(&mut self, lo: u8, hi: u8, srq_only: bool) {
        let controller_address = self.config.controller_address;
        let rtmo = self.config.read_timeout_ms as u32;
        let host = &mut self.host;
        let res = commands::serial_poll(
            &mut self.pins,
            &self.clock,
            rtmo,
            controller_address,
            lo..=hi,
            |addr, status| {
                if !srq_only || status & 0x40 != 0 {
                    host.write(b"SRQ:");
                    write_decimal_no_newline(host, addr as u32);
                    host.write(b",");
                    host.write_decimal(status as u32);
                }
            },
        );
        let _ = res;
        self.state = BusState::Cids;
    }

    fn cmd_spoll(&mut self, args: &str, all: bool) -> Result<(), BusError> {
        if all || eq_ignore_case(args.trim(), "all") {
            let controller_address = self.config.controller_address;
            let rtmo = self.config.read_timeout_ms as u32;
            let mut results: heapless::Vec<(u8, u8), 30> = heapless::Vec::new();
            commands::serial_poll(&mut self.pins, &self.clock, rtmo, controller_address, 1..=30, |addr, status| {
                let _ = results.push((addr, status));
            })?;
            for (addr, status) in results {
                if status & 0x40 != 0 {
                    self.host.write(b"SRQ:");
                    write_decimal_no_newline(&mut self.host, addr as u32);
                    self.host.write(b",");
                    self.host.write_decimal(status as u32);
                }
            }
            self.state = BusState::Cids;
            self.take_srq();
            return Ok(());
        }

        let mut any = false;
        for tok in args.split_whitespace() {
            any = true;
            match dispatch::parse_ranged_u8(tok, 1, 30) {
                Ok(addr) => {
                    let status = self.spoll_one(addr)?;
                    self.host.write_decimal(status as u32);
                }
                Err(e) => self.host.write_parse_error(e),
            }
        }
        if !any {
            let addr = self.config.primary_address;
            let status = self.spoll_one(addr)?;
            self.host.write_decimal(status as u32);
        }
        Ok(())
    }

    fn cmd_srq(&mut self) -> Result<(), BusError> {
        let level = self.pins.read_control(ControlLine::Srq)?;
        self.host.write_decimal(level.asserted() as u32);
        Ok(())
    }

    fn cmd_srqauto(&mut self, args: &str) -> Result<(), BusError> {
        if args.trim().is_empty() {
            self.host.write_decimal(self.srqauto as u32);
            return Ok(());
        }
        match dispatch::parse_bool_flag(args) {
            Ok(v) => self.srqauto = v,
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_stat(&mut self, args: &str) -> Result<(), BusError> {
        if args.trim().is_empty() {
            self.host.write_decimal(self.config.status_byte as u32);
            return Ok(());
        }
        match dispatch::parse_ranged_u8(args, 0, 255) {
            Ok(n) => {
                let mut status = self.config.status_byte;
                attention::set_status(&mut self.pins, &mut status, n)?;
                self.config.status_byte = status;
            }
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_ton(&mut self, args: &str) -> Result<(), BusError> {
        if args.trim().is_empty() {
            self.host.write_decimal(self.talk_only as u32);
            return Ok(());
        }
        match dispatch::parse_ranged_u8(args, 0, 2) {
            Ok(n) => self.talk_only = n,
            Err(e) => self.host.write_parse_error(e),
        }
        Ok(())
    }

    fn cmd_trg(&mut self, args: &str) -> Result<(), BusError> {
        for tok in args.split_whitespace().take(15) {
            match dispatch::parse_ranged_u8(tok, 1, 30) {
                Ok(addr) => {
                    commands::addressed_command(
                        &mut self.pins,
                        &self.clock,
                        self.config.read_timeout_ms as u32,
                        self.config.controller_address,
                        addr,
                        byte::GET,
                    )?;
                }
                Err(e) => self.host.write_parse_error(e),
            }
        }
        self.state = BusState::Cids;
        Ok(())
    }

    fn cmd_ver(&mut self, args: &str) -> Result<(), BusError> {
        if eq_ignore_case(args.trim(), "real") {
            self.host.write_line(FW_VERSION);
        } else {
            let s = self.config.version_string.as_str();
            self.host.write_line(s);
        }
        Ok(())
    }

    fn cmd_verbose(&mut self) -> Result<(), BusError> {
        self.verbose = !self.verbose;
        Ok(())
    }

    fn cmd_xdiag(&mut self, args: &str) -> Result<(), BusError> {
        let (mode_tok, rest) = split_token(args);
        let mode = match dispatch::parse_ranged_u8(mode_tok, 0, 1) {
            Ok(v) => v,
            Err(e) => {
                self.host.write_parse_error(e);
                return Ok(());
            }
        };
        let value = match dispatch::parse_ranged_u8(rest, 0, 255) {
            Ok(v) => v,
            Err(e) => {
                self.host.write_parse_error(e);
                return Ok(());
            }
        };
        if mode == 0 {
            self.pins.write_data_bus(value)?;
        } else {
            self.pins.set_control(value, 0xFF, gpib_pin_api::SetMode::Level)?;
        }
        Ok(())
    }
}

fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(|c: char| c.is_ascii_whitespace()) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn eq_ignore_case_bytes(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| x.to_ascii_lowercase() == y.to_ascii_lowercase())
}

fn write_decimal_no_newline(host: &mut impl HostLink, value: u32) {
    let mut buf = [0u8; 10];
    let mut i = buf.len();
    let mut v = value;
    loop {
        i -= 1;
        buf[i] = b'0' + (v % 10) as u8;
        v /= 10;
        if v == 0 {
            break;
        }
    }
    host.write(&buf[i..]);
}
