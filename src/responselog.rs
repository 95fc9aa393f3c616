//! Optional rotating-by-append log of every frame seen on the bus, enabled
//! with `--response-log`. Opening this file is a startup-fatal operation
//! per §7 (mirrors the serial port's open-or-panic discipline).

use crate::protocol::frame::Frame;
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;

pub struct ResponseLog {
    file: File,
}

impl ResponseLog {
    pub fn open_or_panic(path: &str) -> ResponseLog {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap_or_else(|e| panic!("cannot open response log {path}: {e}"));
        ResponseLog { file }
    }

    pub fn record(&mut self, frame: &Frame) {
        let line = format!(
            "{} dst={:#06x} src={:#06x} op={:#04x} payload={:02x?}\n",
            Local::now().to_rfc3339(),
            frame.dst,
            frame.src,
            frame.op,
            frame.payload
        );
        // A dropped log line is not worth crashing the daemon over.
        let _ = self.file.write_all(line.as_bytes());
    }
}
