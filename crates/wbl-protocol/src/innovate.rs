//! Innovate Serial Protocol v2 (ISP2)
//!
//! A packet is a 16-bit header followed by up to ten 16-bit words. The
//! header carries the word count; the first words are status/AFR
//! multiplier, lambda and (optionally) supply voltage.

use crate::decoder::{Decoder, FeedOutcome};
use crate::error::DecodeError;
use crate::reading::{clamp_lambda, LambdaStatus, Reading, INITIAL_LAMBDA};
use crate::vendor::Vendor;
use std::time::Instant;

/// Bits that must be set in every header word
pub const HEADER_BITS: u16 = 0xA280;

/// Largest word count accepted before a header is treated as noise
pub const MAX_WORDS: usize = 10;

const LAMBDA_OFFSET: u16 = 500;
const LAMBDA_DIVISOR: f64 = 1000.0;

const WORD_STATUS: usize = 1;
const WORD_LAMBDA: usize = 2;
const WORD_BATTERY: usize = 3;

/// ISP2 stream decoder
#[derive(Debug)]
pub struct Isp2Decoder {
    sync_buffer: Vec<u8>,
    reading: Reading,
    raw_lambda: f64,
}

impl Isp2Decoder {
    pub fn new() -> Self {
        Self {
            sync_buffer: Vec::with_capacity(32),
            reading: Reading::default(),
            raw_lambda: INITIAL_LAMBDA,
        }
    }

    /// Current air/fuel ratio, 0 until a lambda word arrived
    pub fn afr(&self) -> f64 {
        self.reading.afr.unwrap_or(0.0)
    }

    /// Stoichiometric multiplier announced by the controller
    pub fn afr_multiplier(&self) -> f64 {
        self.reading.afr_multiplier.unwrap_or(0.0)
    }

    pub fn status(&self) -> LambdaStatus {
        self.reading.status
    }

    /// Bytes buffered while waiting for the rest of a frame
    pub fn pending(&self) -> usize {
        self.sync_buffer.len()
    }

    fn process_message(&mut self, message: &[u8]) {
        let mut next = self.reading;

        for (index, word) in message.chunks_exact(2).enumerate() {
            match index {
                WORD_STATUS => {
                    next.status = LambdaStatus::from_isp2((word[0] >> 2) & 0x07);
                    next.afr_multiplier = Some(afr_multiplier(word));
                }
                WORD_LAMBDA => {
                    self.raw_lambda = clamp_lambda(word_lambda(word));
                    next.afr = Some(self.raw_lambda * next.afr_multiplier.unwrap_or(0.0));
                }
                WORD_BATTERY => {
                    next.battery_v = Some(battery_voltage(word));
                }
                // header, already verified; higher words are aux channels
                _ => {}
            }
        }

        next.lambda = next.status.sentinel().unwrap_or(self.raw_lambda);
        next.timestamp = Some(Instant::now());
        self.reading = next;
    }
}

impl Decoder for Isp2Decoder {
    fn vendor(&self) -> Vendor {
        Vendor::Innovate
    }

    fn feed(&mut self, data: &[u8]) -> FeedOutcome {
        let mut outcome = FeedOutcome::default();
        self.sync_buffer.extend_from_slice(data);

        let mut start = 0;
        while self.sync_buffer.len() - start >= 2 {
            let b0 = self.sync_buffer[start];
            let b1 = self.sync_buffer[start + 1];
            let header = u16::from_be_bytes([b0, b1]);
            if header & HEADER_BITS != HEADER_BITS {
                start += 1;
                continue;
            }

            let words = word_length(b0, b1);
            if words > MAX_WORDS {
                outcome.error(DecodeError::InvalidWordLength(words as u8));
                start += 1;
                continue;
            }

            let total = words * 2 + 2;
            if self.sync_buffer.len() - start < total {
                break;
            }

            let message: Vec<u8> = self.sync_buffer[start..start + total].to_vec();
            start += total;
            if words >= WORD_STATUS {
                self.process_message(&message);
                outcome.frame();
            }
        }

        self.sync_buffer.drain(..start);
        outcome
    }

    fn reading(&self) -> Reading {
        self.reading
    }

    fn describe(&self) -> String {
        format!(
            "AFR stoich: {:.1}, AFR: {:.3}, λ: {:.3} - {}",
            self.afr_multiplier(),
            self.afr(),
            self.reading.lambda,
            self.reading.status.description()
        )
    }
}

impl Default for Isp2Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Word count from the header: bit 0 of the first byte is L7,
/// the low seven bits of the second are L6..L0
fn word_length(b0: u8, b1: u8) -> usize {
    ((((b0 & 0x01) as u16) << 7) | (b1 & 0x7F) as u16) as usize
}

fn word_lambda(word: &[u8]) -> f64 {
    (((word[0] as u16) << 7) + word[1] as u16 + LAMBDA_OFFSET) as f64 / LAMBDA_DIVISOR
}

fn afr_multiplier(word: &[u8]) -> f64 {
    let high = (word[0] & 0x01) << 7;
    let low = word[1] & 0x7F;
    (high | low) as f64 * 0.1
}

fn battery_voltage(word: &[u8]) -> f64 {
    ((((word[0] & 0x07) as u16) << 7) | (word[1] & 0x7F) as u16) as f64 * 0.1
}

/// Build a status + lambda packet, as a controller would send it.
///
/// `afr_multiplier` is in AFR units (14.7 for gasoline). Used by
/// simulators and tests.
pub fn encode_frame(status: u8, afr_multiplier: f64, lambda: f64) -> Vec<u8> {
    let words: u8 = 2;
    let afr = (afr_multiplier * 10.0).round() as u16 & 0xFF;
    let raw = ((lambda * LAMBDA_DIVISOR).round() as i64 - LAMBDA_OFFSET as i64).clamp(0, 0x1FFF) as u16;

    vec![
        0xA2 | ((words >> 7) & 0x01),
        0x80 | (words & 0x7F),
        0x42 | ((status & 0x07) << 2) | ((afr >> 7) as u8 & 0x01),
        (afr & 0x7F) as u8,
        (raw >> 7) as u8,
        (raw & 0x7F) as u8,
    ]
}
