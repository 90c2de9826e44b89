//! Zeitronix ZT-2
//!
//! Fixed 14-byte packets:
//!
//! | Byte | Content          |
//! |------|------------------|
//! | 0..3 | sentinel 0, 1, 2 |
//! | 3    | lambda × 100     |
//! | 4-5  | EGT, u16 LE      |
//! | 6-7  | RPM, u16 LE      |
//! | 8-9  | MAP, u16 LE      |
//! | 10   | TPS              |
//! | 11   | USER1            |
//! | 12   | config register 1|
//! | 13   | config register 2|

use crate::decoder::{Decoder, FeedOutcome};
use crate::error::DecodeError;
use crate::reading::{LambdaStatus, Reading};
use crate::vendor::Vendor;
use std::time::Instant;

pub const PACKET_LEN: usize = 14;
pub const SENTINEL: [u8; 3] = [0x00, 0x01, 0x02];

/// Auxiliary channels carried next to lambda
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZeitronixChannels {
    pub egt: u16,
    pub rpm: u16,
    pub map: u16,
    pub tps: u8,
    pub user1: u8,
    pub config: [u8; 2],
}

/// ZT-2 stream decoder
#[derive(Debug)]
pub struct ZeitronixDecoder {
    packet: [u8; PACKET_LEN],
    step: usize,
    channels: ZeitronixChannels,
    reading: Reading,
}

impl ZeitronixDecoder {
    pub fn new() -> Self {
        Self {
            packet: [0; PACKET_LEN],
            step: 0,
            channels: ZeitronixChannels::default(),
            reading: Reading::default(),
        }
    }

    pub fn egt(&self) -> u16 {
        self.channels.egt
    }

    pub fn rpm(&self) -> u16 {
        self.channels.rpm
    }

    pub fn map(&self) -> u16 {
        self.channels.map
    }

    pub fn channels(&self) -> ZeitronixChannels {
        self.channels
    }

    /// Decode one complete, pre-framed packet
    pub fn decode_packet(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        if data.len() < PACKET_LEN {
            return Err(DecodeError::FrameTooShort {
                expected: PACKET_LEN,
                actual: data.len(),
            });
        }
        if data[..3] != SENTINEL {
            return Err(DecodeError::InvalidPrefix(data[..3].to_vec()));
        }

        self.channels = ZeitronixChannels {
            egt: u16::from_le_bytes([data[4], data[5]]),
            rpm: u16::from_le_bytes([data[6], data[7]]),
            map: u16::from_le_bytes([data[8], data[9]]),
            tps: data[10],
            user1: data[11],
            config: [data[12], data[13]],
        };
        self.reading = Reading {
            lambda: data[3] as f64 * 0.01,
            status: LambdaStatus::Normal,
            timestamp: Some(Instant::now()),
            ..self.reading
        };
        Ok(())
    }

    fn feed_stream(&mut self, data: &[u8], outcome: &mut FeedOutcome) {
        for &b in data {
            match self.step {
                0..=2 => {
                    if b == self.step as u8 {
                        self.packet[self.step] = b;
                        self.step += 1;
                    } else if b == SENTINEL[0] {
                        // mismatch, but this byte may open the next packet
                        self.packet[0] = b;
                        self.step = 1;
                    } else {
                        self.step = 0;
                    }
                }
                3..=12 => {
                    self.packet[self.step] = b;
                    self.step += 1;
                }
                _ => {
                    self.packet[PACKET_LEN - 1] = b;
                    self.step = 0;
                    let packet = self.packet;
                    match self.decode_packet(&packet) {
                        Ok(()) => outcome.frame(),
                        Err(err) => outcome.error(err),
                    }
                }
            }
        }
    }
}

impl Default for ZeitronixDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ZeitronixDecoder {
    fn vendor(&self) -> Vendor {
        Vendor::Zeitronix
    }

    fn feed(&mut self, data: &[u8]) -> FeedOutcome {
        let mut outcome = FeedOutcome::default();
        // a relayed payload is usually exactly one aligned packet
        if self.step == 0 && data.len() == PACKET_LEN && data[..3] == SENTINEL {
            match self.decode_packet(data) {
                Ok(()) => outcome.frame(),
                Err(err) => outcome.error(err),
            }
            return outcome;
        }
        self.feed_stream(data, &mut outcome);
        outcome
    }

    fn reading(&self) -> Reading {
        self.reading
    }

    fn describe(&self) -> String {
        format!(
            "Lambda: {:.3}, EGT: {}, RPM: {}, MAP: {}",
            self.reading.lambda, self.channels.egt, self.channels.rpm, self.channels.map
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PACKET: [u8; 14] = [
        0x00, 0x01, 0x02, 0x64, 0x10, 0x00, 0xE8, 0x03, 0x50, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn test_packet() {
        let mut decoder = ZeitronixDecoder::new();
        let outcome = decoder.feed(&PACKET);
        assert_eq!(outcome.frames, 1);
        assert!((decoder.lambda() - 1.0).abs() < 1e-9);
        assert_eq!(decoder.egt(), 16);
        assert_eq!(decoder.rpm(), 1000);
        assert_eq!(decoder.map(), 80);
        assert_eq!(decoder.describe(), "Lambda: 1.000, EGT: 16, RPM: 1000, MAP: 80");
    }

    #[test]
    fn test_bytewise() {
        let mut decoder = ZeitronixDecoder::new();
        let frames: usize = PACKET.iter().map(|b| decoder.feed(&[*b]).frames).sum();
        assert_eq!(frames, 1);
        assert_eq!(decoder.rpm(), 1000);
    }

    #[test]
    fn test_prefix_mismatch_at_state_two() {
        let mut decoder = ZeitronixDecoder::new();
        let mut stream = vec![0x00, 0x01, 0x07, 0x42];
        stream.extend_from_slice(&PACKET);
        let outcome = decoder.feed(&stream);
        assert_eq!(outcome.frames, 1);
        assert_eq!(decoder.egt(), 16);
    }

    #[test]
    fn test_repeated_zero_resyncs() {
        let mut decoder = ZeitronixDecoder::new();
        let mut stream = vec![0x00, 0x00];
        stream.extend_from_slice(&PACKET[1..]);
        let outcome = decoder.feed(&stream);
        assert_eq!(outcome.frames, 1);
    }

    #[test]
    fn test_no_packet_no_reading() {
        let mut decoder = ZeitronixDecoder::new();
        let outcome = decoder.feed(&[0x05; 64]);
        assert_eq!(outcome.frames, 0);
        assert!(!decoder.reading().has_data());
    }

    #[test]
    fn test_decode_packet_rejects_prefix() {
        let mut decoder = ZeitronixDecoder::new();
        let mut packet = PACKET;
        packet[1] = 0x09;
        assert_eq!(
            decoder.decode_packet(&packet),
            Err(DecodeError::InvalidPrefix(vec![0x00, 0x09, 0x02]))
        );
        assert_eq!(
            decoder.decode_packet(&packet[..4]),
            Err(DecodeError::FrameTooShort { expected: 14, actual: 4 })
        );
    }

    proptest! {
        #[test]
        fn prop_packet_found_between_garbage(
            lambda in 50u8..=150,
            rpm in any::<u16>(),
            prefix in proptest::collection::vec(1u8..=255, 0..64),
            suffix in proptest::collection::vec(1u8..=255, 0..64),
            split in 0usize..256,
        ) {
            let mut packet = PACKET;
            packet[3] = lambda;
            packet[6..8].copy_from_slice(&rpm.to_le_bytes());

            let mut stream = prefix;
            stream.extend_from_slice(&packet);
            stream.extend(suffix);
            let split = split % (stream.len() + 1);

            let mut decoder = ZeitronixDecoder::new();
            let frames = decoder.feed(&stream[..split]).frames + decoder.feed(&stream[split..]).frames;
            prop_assert_eq!(frames, 1);
            prop_assert!((decoder.lambda() - lambda as f64 * 0.01).abs() < 1e-9);
            prop_assert_eq!(decoder.rpm(), rpm);
        }

        #[test]
        fn prop_no_sentinel_never_emits(bytes in proptest::collection::vec(1u8..=255, 0..512)) {
            let mut decoder = ZeitronixDecoder::new();
            let outcome = decoder.feed(&bytes);
            prop_assert_eq!(outcome.frames, 0);
            prop_assert!(outcome.errors.is_empty());
            prop_assert!(!decoder.reading().has_data());
        }
    }
}
