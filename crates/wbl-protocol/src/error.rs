//! Wideband Decode Error Types

use thiserror::Error;

/// Errors raised while synchronizing or decoding a wideband frame.
///
/// None of these are fatal: the synchronizer that produced one has already
/// discarded the offending bytes and keeps scanning.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// ISP2 header announced more words than any controller sends
    #[error("Invalid word length: {0}")]
    InvalidWordLength(u8),

    /// PLX payload between start and stop byte is not a whole number of packets
    #[error("Invalid payload length: {0}")]
    InvalidPayloadLength(usize),

    /// Frame shorter than the fields it must carry
    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    /// Pre-framed payload without the expected sentinel prefix
    #[error("Invalid frame prefix: {0:02X?}")]
    InvalidPrefix(Vec<u8>),

    /// ASCII value could not be parsed as a decimal number
    #[error("Invalid number: {0:?}")]
    InvalidNumber(String),

    /// CAN identifier not handled by this decoder
    #[error("Unknown identifier {0:X}")]
    UnknownIdentifier(u32),
}
