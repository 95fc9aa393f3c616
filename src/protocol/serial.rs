//! Serial I/O layer: owns the serial device handle, reopens it on error,
//! and shuttles raw bytes between the bus and the frame reader/broker.

use log::{error, info, warn};
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

const BAUD_RATE: u32 = 38_400;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the serial device handle and transparently reopens it on I/O error.
/// Reads and writes are blocking; the broker and reader serialize their own
/// access (see `protocol::broker` and `protocol::reader`).
pub struct SerialIo {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialIo {
    pub fn new(path: impl Into<String>) -> SerialIo {
        SerialIo { path: path.into(), port: None }
    }

    /// Open the port, panicking on failure. Called once at startup; per §7
    /// an unopenable serial port at startup is fatal.
    pub fn open_or_panic(&mut self) {
        self.port = Some(
            serialport::new(&self.path, BAUD_RATE)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .timeout(READ_TIMEOUT)
                .open()
                .unwrap_or_else(|e| panic!("cannot open serial port {}: {e}", self.path)),
        );
        info!("serial port {} opened at {} 8N1", self.path, BAUD_RATE);
    }

    /// Close and reopen the port after a transient I/O error. Never panics:
    /// the caller tolerates a transiently absent port.
    fn reopen(&mut self) {
        warn!("reopening serial port {} after I/O error", self.path);
        self.port = None;
        match serialport::new(&self.path, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(READ_TIMEOUT)
            .open()
        {
            Ok(port) => self.port = Some(port),
            Err(e) => error!("failed to reopen serial port {}: {e}", self.path),
        }
    }

    /// Read whatever bytes are available (up to `buf.len()`), blocking up to
    /// the 5s read timeout. Returns `Ok(0)` on timeout (no data), reopens the
    /// port on any other error and returns `Ok(0)` so the caller can retry.
    pub fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let port = match self.port.as_mut() {
            Some(p) => p,
            None => {
                self.reopen();
                return Ok(0);
            }
        };
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => {
                error!("serial read error: {e}");
                self.reopen();
                Ok(0)
            }
        }
    }

    /// Write a frame's bytes to the port. Returns `false` (rather than an
    /// error) if the port is absent or the write fails; the broker treats
    /// that as a failed send and lets the action's retry/timeout policy
    /// take over.
    pub fn write_all(&mut self, bytes: &[u8]) -> bool {
        let port = match self.port.as_mut() {
            Some(p) => p,
            None => return false,
        };
        match port.write_all(bytes) {
            Ok(()) => true,
            Err(e) => {
                error!("serial write error: {e}");
                self.reopen();
                false
            }
        }
    }
}
