//! Frame reader: consumes the raw byte stream, resynchronises on corruption,
//! and routes validated frames to the broker or the snoop registry.

use super::broker::BrokerHandle;
use super::constants::{OP_RESPONSE, OP_WRITE, SAM_ADDR, THERMOSTAT_ADDR};
use super::frame::{Frame, MIN_FRAME_LEN};
use super::serial::SerialIo;
use super::snoop::SnoopRegistry;
use crate::responselog::ResponseLog;
use log::{trace, warn};
use std::sync::{Arc, Mutex};

const READ_CHUNK: usize = 256;

pub struct FrameReader {
    serial: Arc<Mutex<SerialIo>>,
    broker: BrokerHandle,
    snoops: Arc<SnoopRegistry>,
    response_log: Option<ResponseLog>,
    buffer: Vec<u8>,
}

impl FrameReader {
    pub fn new(
        serial: Arc<Mutex<SerialIo>>,
        broker: BrokerHandle,
        snoops: Arc<SnoopRegistry>,
        response_log: Option<ResponseLog>,
    ) -> FrameReader {
        FrameReader { serial, broker, snoops, response_log, buffer: Vec::new() }
    }

    /// Run the reader loop. Blocks forever; intended as the body of a
    /// dedicated OS thread.
    pub fn run(mut self) {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = {
                let mut serial = self.serial.lock().unwrap();
                serial.read_some(&mut chunk).unwrap_or(0)
            };
            if n > 0 {
                self.buffer.extend_from_slice(&chunk[..n]);
                self.drain_buffer();
            }
        }
    }

    /// Parse as many frames as possible from the head of the buffer,
    /// discarding exactly one byte per failed decode attempt (§4.2).
    fn drain_buffer(&mut self) {
        loop {
            if self.buffer.len() < MIN_FRAME_LEN {
                return;
            }
            match Frame::decode(&self.buffer) {
                Ok((frame, consumed)) => {
                    self.buffer.drain(..consumed);
                    self.handle_frame(frame);
                }
                Err(crate::error::EngineError::Incomplete { .. }) => {
                    // Declared length runs past what we have so far; wait for more bytes.
                    return;
                }
                Err(_) => {
                    trace!("frame resync: discarding 1 byte");
                    self.buffer.drain(..1);
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        if let Some(log) = &mut self.response_log {
            log.record(&frame);
        }

        if frame.dst == SAM_ADDR {
            if frame.op == OP_WRITE && frame.src == THERMOSTAT_ADDR {
                let ack = Frame::write_ack(THERMOSTAT_ADDR, SAM_ADDR);
                let mut serial = self.serial.lock().unwrap();
                serial.write_all(&ack.encode());
                return;
            }
            if frame.op == OP_RESPONSE {
                self.broker.deliver_response(frame);
                return;
            }
            // ACK6 and anything else addressed to us is ignored.
            return;
        }

        if frame.op == OP_RESPONSE {
            self.snoops.dispatch(&frame);
        } else {
            warn!("unexpected unaddressed frame: src={:#06x} op={:#04x}", frame.src, frame.op);
        }
    }
}
