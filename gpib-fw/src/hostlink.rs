// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The host link over process stdout. A real interface board backs this
//! with a UART; here the "host" is whatever is reading our stdout (a
//! terminal, or a test harness piping both ends together).

use std::io::{self, Write};

use gpib_core::hostlink::HostLink;

pub struct StdioHostLink;

impl HostLink for StdioHostLink {
    fn write(&mut self, data: &[u8]) {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        let _ = lock.write_all(data);
        let _ = lock.flush();
    }
}
