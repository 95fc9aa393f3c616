//! Passive observer registry for bus traffic not addressed to us.

use super::frame::Frame;
use std::sync::Arc;

pub type SnoopCallback = Arc<dyn Fn(&Frame) + Send + Sync>;

struct Snoop {
    src_min: u16,
    src_max: u16,
    callback: SnoopCallback,
}

/// Flat list of (source range, callback) pairs. Every decoded RESPONSE frame
/// not addressed to us is offered to each registered range whose source
/// falls inside it; only payloads longer than three bytes (carrying data
/// past the table address) are delivered.
#[derive(Default)]
pub struct SnoopRegistry {
    snoops: Vec<Snoop>,
}

impl SnoopRegistry {
    pub fn new() -> SnoopRegistry {
        SnoopRegistry { snoops: Vec::new() }
    }

    pub fn register(&mut self, src_min: u16, src_max: u16, callback: SnoopCallback) {
        self.snoops.push(Snoop { src_min, src_max, callback });
    }

    /// Dispatch `frame` to every matching observer. Called inline from the
    /// frame reader thread.
    pub fn dispatch(&self, frame: &Frame) {
        if frame.payload.len() <= 3 {
            return;
        }
        for snoop in &self.snoops {
            if frame.src >= snoop.src_min && frame.src <= snoop.src_max {
                (snoop.callback)(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatches_only_within_range() {
        let registry_calls = Arc::new(AtomicUsize::new(0));
        let calls = registry_calls.clone();
        let mut registry = SnoopRegistry::new();
        registry.register(
            0x4000,
            0x42FF,
            Arc::new(move |_f: &Frame| {
                calls.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let in_range = Frame::new(0x2001, 0x4001, 0x06, vec![0, 0, 0, 1]).unwrap();
        let out_of_range = Frame::new(0x2001, 0x5001, 0x06, vec![0, 0, 0, 1]).unwrap();

        registry.dispatch(&in_range);
        registry.dispatch(&out_of_range);

        assert_eq!(registry_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn short_payload_is_not_delivered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = calls.clone();
        let mut registry = SnoopRegistry::new();
        registry.register(0x4000, 0x42FF, Arc::new(move |_f: &Frame| {
            inner.fetch_add(1, Ordering::SeqCst);
        }));

        let short = Frame::new(0x2001, 0x4001, 0x06, vec![0, 0, 0]).unwrap();
        registry.dispatch(&short);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
