use thiserror::Error;

/// Errors surfaced by the protocol engine's typed, non-recoverable-by-retry
/// operations. Transient bus trouble (timeouts, CRC failures, port hiccups)
/// is modeled as `bool`/`Option` outcomes per the broker's own contract, not
/// as `Result` here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("frame too short: got {0} bytes, need at least 10")]
    FrameTooShort(usize),

    #[error("declared frame length {declared} exceeds buffer of {available} bytes")]
    Incomplete { declared: usize, available: usize },

    #[error("CRC mismatch: computed {computed:#06x}, frame carried {found:#06x}")]
    CrcMismatch { computed: u16, found: u16 },

    #[error("payload of {0} bytes exceeds the 255-byte maximum")]
    PayloadTooLarge(usize),

    #[error("table payload too short to decode: got {got} bytes, need {need}")]
    TableTooShort { got: usize, need: usize },

    #[error("unknown mode byte {0:#04x}")]
    UnknownMode(u8),

    #[error("unknown fan mode byte {0:#04x}")]
    UnknownFanMode(u8),

    #[error("zone index {0} out of range (1..=8)")]
    ZoneOutOfRange(u8),
}
