// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The line interpreter's parse buffer, spec §4.4: reads one host-link byte
//! at a time, applies the ESC escaping rules, and classifies each
//! completed line.

use heapless::Vec;

/// Parse buffer capacity. Spec §3 requires "bounded capacity (>=256)".
pub const CAPACITY: usize = 256;

const ESC: u8 = 0x1B;

/// What happened to the line just completed (or to the buffer, on
/// overflow). The caller reads [`LineInterpreter::line`] while the result
/// is still live, then calls [`LineInterpreter::clear`] before feeding the
/// next byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LineEvent {
    /// No complete line yet.
    None,
    /// Empty line (bare CR/LF): ignored per spec §4.4.
    Empty,
    /// `++`-prefixed interface command.
    Command,
    /// `++!` literal: abort the current read loop.
    AbortRequested,
    /// `*IDN?` (case-insensitive), IDN replies enabled.
    IdnQuery,
    /// Ordinary instrument data, to forward verbatim.
    Data,
    /// Buffer filled before a terminator and the contents are a `++`
    /// prefix: discarded with an error, per spec §4.4 overflow policy.
    CommandOverflow,
}

/// State machine described in spec §4.4: `escape_pending`, `plus_escaped`,
/// `pb_ptr` (here, `buf.len()`), and `overflow`.
pub struct LineInterpreter {
    buf: Vec<u8, CAPACITY>,
    escape_pending: bool,
    plus_escaped: bool,
}

impl LineInterpreter {
    pub const fn new() -> Self {
        LineInterpreter { buf: Vec::new(), escape_pending: false, plus_escaped: false }
    }

    /// The line content accumulated so far (or just completed), without any
    /// terminating CR/LF.
    pub fn line(&self) -> &[u8] {
        &self.buf
    }

    /// Resets the buffer and escape state for the next line.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.escape_pending = false;
        self.plus_escaped = false;
    }

    fn is_command_prefix(&self) -> bool {
        self.buf.len() >= 2 && self.buf[0] == b'+' && self.buf[1] == b'+' && !self.plus_escaped
    }

    fn push(&mut self, b: u8) -> LineEvent {
        if self.buf.push(b).is_err() {
            // Buffer just filled. Spec §4.4 overflow policy.
            if self.is_command_prefix() {
                return LineEvent::CommandOverflow;
            }
            return LineEvent::Data;
        }
        LineEvent::None
    }

    /// Feeds one byte from the host link. `idn_enabled` reflects the live
    /// configuration (`idn_mode != Disabled`) so `*IDN?` recognition can be
    /// toggled without resetting the interpreter.
    pub fn feed(&mut self, b: u8, idn_enabled: bool) -> LineEvent {
        if b == ESC {
            if self.escape_pending {
                self.escape_pending = false;
                return self.push(b);
            }
            self.escape_pending = true;
            return LineEvent::None;
        }

        if self.escape_pending {
            self.escape_pending = false;
            if b == b'+' && self.buf.len() < 2 {
                self.plus_escaped = true;
            }
            return self.push(b);
        }

        if b == b'\r' || b == b'\n' {
            return self.terminate(idn_enabled);
        }

        self.push(b)
    }

    fn terminate(&mut self, idn_enabled: bool) -> LineEvent {
        if self.buf.is_empty() {
            return LineEvent::Empty;
        }
        if self.is_command_prefix() {
            if self.buf.len() >= 3 && self.buf[2] == b'!' {
                return LineEvent::AbortRequested;
            }
            return LineEvent::Command;
        }
        if idn_enabled && starts_with_idn_query(&self.buf) {
            return LineEvent::IdnQuery;
        }
        LineEvent::Data
    }
}

impl Default for LineInterpreter {
    fn default() -> Self {
        LineInterpreter::new()
    }
}

fn starts_with_idn_query(buf: &[u8]) -> bool {
    const PATTERN: &[u8] = b"*idn?";
    if buf.len() < PATTERN.len() {
        return false;
    }
    buf[..PATTERN.len()]
        .iter()
        .zip(PATTERN)
        .all(|(&a, &b)| a.to_ascii_lowercase() == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_str(interp: &mut LineInterpreter, s: &str) -> LineEvent {
        let mut last = LineEvent::None;
        for &b in s.as_bytes() {
            last = interp.feed(b, true);
        }
        last
    }

    #[test]
    fn empty_line_is_ignored() {
        let mut interp = LineInterpreter::new();
        assert_eq!(feed_str(&mut interp, "\n"), LineEvent::Empty);
    }

    #[test]
    fn plain_data_line_is_forwarded() {
        let mut interp = LineInterpreter::new();
        assert_eq!(feed_str(&mut interp, "*RST\n"), LineEvent::Data);
        assert_eq!(interp.line(), b"*RST");
    }

    #[test]
    fn plus_plus_prefix_is_a_command() {
        let mut interp = LineInterpreter::new();
        assert_eq!(feed_str(&mut interp, "++addr 3\n"), LineEvent::Command);
        assert_eq!(interp.line(), b"++addr 3");
    }

    #[test]
    fn plus_plus_bang_aborts() {
        let mut interp = LineInterpreter::new();
        assert_eq!(feed_str(&mut interp, "++!\n"), LineEvent::AbortRequested);
    }

    #[test]
    fn idn_query_recognized_case_insensitively() {
        let mut interp = LineInterpreter::new();
        assert_eq!(feed_str(&mut interp, "*idn?\n"), LineEvent::IdnQuery);
    }

    #[test]
    fn idn_query_ignored_when_disabled() {
        let mut interp = LineInterpreter::new();
        let mut last = LineEvent::None;
        for &b in b"*IDN?\n" {
            last = interp.feed(b, false);
        }
        assert_eq!(last, LineEvent::Data);
    }

    #[test]
    fn escaped_plus_plus_is_not_a_command() {
        let mut interp = LineInterpreter::new();
        // ESC before each '+' escapes it so "++" is not recognized as a
        // command prefix.
        interp.feed(ESC, true);
        interp.feed(b'+', true);
        let ev = feed_str(&mut interp, "+data\n");
        assert_eq!(ev, LineEvent::Data);
        assert_eq!(interp.line(), b"++data");
    }

    #[test]
    fn escaped_terminator_is_stored_literally() {
        let mut interp = LineInterpreter::new();
        interp.feed(b'a', true);
        interp.feed(ESC, true);
        interp.feed(b'\n', true);
        assert_eq!(interp.feed(b'b', true), LineEvent::None);
        let ev = interp.feed(b'\n', true);
        assert_eq!(ev, LineEvent::Data);
        assert_eq!(interp.line(), b"a\nb");
    }

    #[test]
    fn overflow_of_non_command_delivers_partial_as_data() {
        let mut interp = LineInterpreter::new();
        let mut last = LineEvent::None;
        for _ in 0..CAPACITY + 1 {
            last = interp.feed(b'x', true);
        }
        assert_eq!(last, LineEvent::Data);
        assert_eq!(interp.line().len(), CAPACITY);
    }

    #[test]
    fn overflow_of_command_is_discarded_with_error() {
        let mut interp = LineInterpreter::new();
        interp.feed(b'+', true);
        interp.feed(b'+', true);
        let mut last = LineEvent::None;
        for _ in 0..CAPACITY - 1 {
            last = interp.feed(b'x', true);
        }
        assert_eq!(last, LineEvent::CommandOverflow);
    }
}
