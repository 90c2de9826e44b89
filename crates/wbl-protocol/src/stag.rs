//! Stag AFR
//!
//! Conversational protocol: the host kicks the controller, the controller
//! answers with frames `[0x32, ?, ?, len, cmd, ..]` of `len + 4` bytes and
//! every frame type expects a specific follow-up command. Data arrives in
//! 0xE4 frames.

use crate::decoder::{Decoder, FeedOutcome};
use crate::error::DecodeError;
use crate::reading::{LambdaStatus, Reading};
use crate::vendor::Vendor;
use std::time::Instant;

pub const FRAME_START: u8 = 0x32;

/// Sent once when the link comes up
pub const KICKOFF: [u8; 8] = [0xAC, 0x00, 0x00, 0x04, 0x00, 0x00, 0x32, 0xE2];

/// Answer to 0x80
pub const REPLY_80: [u8; 7] = [0x32, 0x00, 0x00, 0x03, 0x03, 0x00, 0x38];
/// Answer to 0x83
pub const REPLY_83: [u8; 7] = [0x32, 0x00, 0x00, 0x03, 0x6D, 0x00, 0xA2];
/// Data poll, answer to 0xF0 and 0xE4
pub const POLL: [u8; 7] = [0x32, 0x00, 0x00, 0x03, 0x64, 0x00, 0x99];

pub const CMD_HELLO: u8 = 0x80;
pub const CMD_INFO: u8 = 0x83;
pub const CMD_READY: u8 = 0xF0;
pub const CMD_DATA: u8 = 0xE4;

const STATUS_OFFSET: usize = 6;
const LAMBDA_OFFSET: usize = 12;
const OXYGEN_OFFSET: usize = 16;
const DATA_FRAME_LEN: usize = OXYGEN_OFFSET + 2;

/// Controller state reported in data frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagState {
    Sleep,
    Warming,
    Working,
    Breakdown,
    Other(u8),
}

impl StagState {
    fn from_byte(b: u8) -> Self {
        match b {
            0 => StagState::Sleep,
            1 => StagState::Warming,
            2 => StagState::Working,
            3 => StagState::Breakdown,
            other => StagState::Other(other),
        }
    }

    fn lambda_status(&self) -> LambdaStatus {
        match self {
            StagState::Working => LambdaStatus::Normal,
            StagState::Warming => LambdaStatus::Warming,
            StagState::Breakdown => LambdaStatus::LambdaError,
            StagState::Sleep | StagState::Other(_) => LambdaStatus::Unknown,
        }
    }
}

/// Stag frame synchronizer and decoder
#[derive(Debug)]
pub struct StagDecoder {
    frame: Vec<u8>,
    in_frame: bool,
    counter: usize,
    frame_len: usize,
    state: Option<StagState>,
    reading: Reading,
}

impl StagDecoder {
    pub fn new() -> Self {
        Self {
            frame: Vec::with_capacity(64),
            in_frame: false,
            counter: 0,
            frame_len: 0,
            state: None,
            reading: Reading::default(),
        }
    }

    /// Controller state from the last data frame
    pub fn state(&self) -> Option<StagState> {
        self.state
    }

    fn process_frame(&mut self, outcome: &mut FeedOutcome) {
        if self.frame.len() < 5 {
            return;
        }

        match self.frame[4] {
            CMD_HELLO => outcome.replies.push(REPLY_80.to_vec()),
            CMD_INFO => outcome.replies.push(REPLY_83.to_vec()),
            CMD_READY => outcome.replies.push(POLL.to_vec()),
            CMD_DATA => {
                if self.decode_data(outcome) {
                    outcome.frame();
                }
                outcome.replies.push(POLL.to_vec());
            }
            _ => {}
        }
    }

    fn decode_data(&mut self, outcome: &mut FeedOutcome) -> bool {
        let frame = &self.frame;
        if frame.len() <= STATUS_OFFSET {
            outcome.error(DecodeError::FrameTooShort {
                expected: STATUS_OFFSET + 1,
                actual: frame.len(),
            });
            return false;
        }

        let state = StagState::from_byte(frame[STATUS_OFFSET]);
        if self.state != Some(state) {
            match state {
                StagState::Sleep => outcome.notice("Stag: status_sleep"),
                StagState::Warming => outcome.notice("Stag: status_warming"),
                StagState::Breakdown => outcome.notice("Stag: status_breakdown"),
                _ => {}
            }
        }

        let mut next = Reading {
            status: state.lambda_status(),
            timestamp: Some(Instant::now()),
            ..self.reading
        };

        if state == StagState::Working {
            if frame.len() < DATA_FRAME_LEN {
                outcome.error(DecodeError::FrameTooShort {
                    expected: DATA_FRAME_LEN,
                    actual: frame.len(),
                });
                return false;
            }
            let raw = u32::from_be_bytes([
                frame[LAMBDA_OFFSET],
                frame[LAMBDA_OFFSET + 1],
                frame[LAMBDA_OFFSET + 2],
                frame[LAMBDA_OFFSET + 3],
            ]);
            let oxygen = u16::from_be_bytes([frame[OXYGEN_OFFSET], frame[OXYGEN_OFFSET + 1]]);
            next.lambda = raw as f64 * 0.001;
            next.oxygen_pct = Some(oxygen as f64 * 0.1);
        }

        self.state = Some(state);
        self.reading = next;
        true
    }
}

impl Default for StagDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StagDecoder {
    fn vendor(&self) -> Vendor {
        Vendor::Stag
    }

    fn feed(&mut self, data: &[u8]) -> FeedOutcome {
        let mut outcome = FeedOutcome::default();
        for &b in data {
            if !self.in_frame {
                if b == FRAME_START {
                    self.frame.clear();
                    self.frame.push(b);
                    self.in_frame = true;
                    self.counter = 1;
                    self.frame_len = 0;
                }
                continue;
            }

            self.frame.push(b);
            self.counter += 1;
            if self.counter == 4 {
                self.frame_len = b as usize + 4;
            }
            if self.counter >= 4 && self.counter == self.frame_len {
                self.in_frame = false;
                self.process_frame(&mut outcome);
            }
        }
        outcome
    }

    fn reading(&self) -> Reading {
        self.reading
    }

    fn describe(&self) -> String {
        format!(
            "Lambda: {:.4}, Oxygen: {:.1}",
            self.reading.lambda,
            self.reading.oxygen_pct.unwrap_or(0.0)
        )
    }

    fn kickoff(&self) -> Option<Vec<u8>> {
        Some(KICKOFF.to_vec())
    }
}
