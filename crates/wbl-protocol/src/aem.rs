//! AEM UEGO
//!
//! The gauge prints lambda×10 as ASCII lines on its serial port; the
//! CAN variant sends an 8-byte binary frame:
//!
//! | Byte | Content                                         |
//! |------|-------------------------------------------------|
//! | 0-1  | lambda, u16 BE, 0.0001/bit                      |
//! | 2-3  | oxygen, i16 BE, 0.001 %/bit                     |
//! | 4    | system volts, 0.1 V/bit                         |
//! | 6    | bit1 AEM/FAE detected, bit5 free-air cal, bit7 lambda valid |
//! | 7    | bit6 sensor fault                               |

use crate::decoder::{Decoder, FeedOutcome};
use crate::error::DecodeError;
use crate::reading::{LambdaStatus, Reading};
use crate::vendor::Vendor;
use std::time::Instant;

/// Size of the ASCII line accumulator
pub const LINE_BUFFER_SIZE: usize = 8;

/// Length of a CAN frame
pub const CAN_FRAME_LEN: usize = 8;

/// How bytes reach the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AemInput {
    /// Newline-terminated ASCII from the gauge's serial port
    SerialAscii,
    /// One ASCII value per relayed payload
    RelayAscii,
    /// Binary CAN frames
    Can,
}

/// Status bits from the CAN frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AemFlags {
    pub aem_detected: bool,
    pub free_air_cal: bool,
    pub lambda_valid: bool,
    pub sensor_fault: bool,
}

/// AEM UEGO decoder
#[derive(Debug)]
pub struct AemDecoder {
    input: AemInput,
    line: [u8; LINE_BUFFER_SIZE],
    line_pos: usize,
    reading: Reading,
    flags: AemFlags,
}

impl AemDecoder {
    pub fn new(input: AemInput) -> Self {
        Self {
            input,
            line: [0; LINE_BUFFER_SIZE],
            line_pos: 0,
            reading: Reading::default(),
            flags: AemFlags::default(),
        }
    }

    /// Flags from the last CAN frame
    pub fn flags(&self) -> AemFlags {
        self.flags
    }

    /// Overwrite lambda directly
    pub fn set_lambda(&mut self, value: f64) {
        self.reading = Reading {
            lambda: value,
            status: LambdaStatus::Normal,
            timestamp: Some(Instant::now()),
            ..self.reading
        };
    }

    fn feed_ascii_stream(&mut self, data: &[u8], outcome: &mut FeedOutcome) {
        for &b in data {
            match b {
                b'\r' => continue,
                b'\n' => {
                    match parse_decimal(&self.line[..self.line_pos]) {
                        Ok(value) => {
                            self.set_lambda(value / 10.0);
                            outcome.frame();
                        }
                        Err(err) => outcome.error(err),
                    }
                    self.line_pos = 0;
                }
                _ => {
                    self.line[self.line_pos] = b;
                    self.line_pos += 1;
                    if self.line_pos == LINE_BUFFER_SIZE {
                        self.line_pos = 0;
                    }
                }
            }
        }
    }

    fn feed_ascii_value(&mut self, data: &[u8], outcome: &mut FeedOutcome) {
        match parse_decimal(data) {
            Ok(value) => {
                self.set_lambda(value / 10.0);
                outcome.frame();
            }
            Err(err) => outcome.error(err),
        }
    }

    fn feed_can(&mut self, data: &[u8], outcome: &mut FeedOutcome) {
        if data.len() < CAN_FRAME_LEN {
            outcome.error(DecodeError::FrameTooShort {
                expected: CAN_FRAME_LEN,
                actual: data.len(),
            });
            return;
        }

        let flags = AemFlags {
            aem_detected: data[6] & 0x02 != 0,
            free_air_cal: data[6] & 0x20 != 0,
            lambda_valid: data[6] & 0x80 != 0,
            sensor_fault: data[7] & 0x40 != 0,
        };
        let status = if flags.lambda_valid && !flags.sensor_fault {
            LambdaStatus::Normal
        } else {
            LambdaStatus::LambdaError
        };

        self.flags = flags;
        self.reading = Reading {
            lambda: u16::from_be_bytes([data[0], data[1]]) as f64 * 0.0001,
            oxygen_pct: Some(i16::from_be_bytes([data[2], data[3]]) as f64 * 0.001),
            battery_v: Some(data[4] as f64 * 0.1),
            afr: None,
            afr_multiplier: None,
            status,
            timestamp: Some(Instant::now()),
        };
        outcome.frame();
    }
}

impl Decoder for AemDecoder {
    fn vendor(&self) -> Vendor {
        Vendor::Aem
    }

    fn feed(&mut self, data: &[u8]) -> FeedOutcome {
        let mut outcome = FeedOutcome::default();
        match self.input {
            AemInput::SerialAscii => self.feed_ascii_stream(data, &mut outcome),
            AemInput::RelayAscii => self.feed_ascii_value(data, &mut outcome),
            AemInput::Can => self.feed_can(data, &mut outcome),
        }
        outcome
    }

    fn reading(&self) -> Reading {
        self.reading
    }

    fn describe(&self) -> String {
        format!(
            "Lambda: {:.4}, Oxygen: {:.3}, Voltage: {:.1}",
            self.reading.lambda,
            self.reading.oxygen_pct.unwrap_or(0.0),
            self.reading.battery_v.unwrap_or(0.0)
        )
    }
}

/// Parse an ASCII decimal, ignoring surrounding whitespace and NUL padding
pub(crate) fn parse_decimal(bytes: &[u8]) -> Result<f64, DecodeError> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    trimmed
        .parse::<f64>()
        .map_err(|_| DecodeError::InvalidNumber(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ascii_line() {
        let mut decoder = AemDecoder::new(AemInput::SerialAscii);
        let outcome = decoder.feed(b"089\n");
        assert_eq!(outcome.frames, 1);
        assert!((decoder.lambda() - 8.9).abs() < 1e-9);
    }

    #[test]
    fn test_ascii_split_with_carriage_return() {
        let mut decoder = AemDecoder::new(AemInput::SerialAscii);
        assert_eq!(decoder.feed(b"1").frames, 0);
        assert_eq!(decoder.feed(b"0.5\r").frames, 0);
        assert_eq!(decoder.feed(b"\n").frames, 1);
        assert!((decoder.lambda() - 1.05).abs() < 1e-9);
    }

    #[test]
    fn test_ascii_garbage_line_is_absorbed() {
        let mut decoder = AemDecoder::new(AemInput::SerialAscii);
        let outcome = decoder.feed(b"x?\n098\n");
        assert_eq!(outcome.frames, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert!((decoder.lambda() - 9.8).abs() < 1e-9);
    }

    #[test]
    fn test_ascii_overflow_wraps() {
        let mut decoder = AemDecoder::new(AemInput::SerialAscii);
        // eight digits wrap the accumulator, the ninth starts over
        decoder.feed(b"12345678");
        decoder.feed(b"9\n");
        assert!((decoder.lambda() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_relay_value() {
        let mut decoder = AemDecoder::new(AemInput::RelayAscii);
        decoder.feed(b"102\0");
        assert!((decoder.lambda() - 10.2).abs() < 1e-9);
    }

    #[test]
    fn test_can_frame() {
        let mut decoder = AemDecoder::new(AemInput::Can);
        // lambda 10000 => 1.0, oxygen -500 => -0.5 %, 13.8 V, valid + detected
        let frame = [0x27, 0x10, 0xFE, 0x0C, 138, 0x00, 0x82, 0x00];
        let outcome = decoder.feed_frame(0x180, &frame);
        assert_eq!(outcome.frames, 1);

        let reading = decoder.reading();
        assert!((reading.lambda - 1.0).abs() < 1e-9);
        assert!((reading.oxygen_pct.unwrap() + 0.5).abs() < 1e-9);
        assert!((reading.battery_v.unwrap() - 13.8).abs() < 1e-9);
        assert_eq!(reading.status, LambdaStatus::Normal);
        assert!(decoder.flags().aem_detected);
        assert!(!decoder.flags().free_air_cal);
        assert_eq!(decoder.describe(), "Lambda: 1.0000, Oxygen: -0.500, Voltage: 13.8");
    }

    #[test]
    fn test_can_sensor_fault() {
        let mut decoder = AemDecoder::new(AemInput::Can);
        decoder.feed(&[0x27, 0x10, 0, 0, 120, 0, 0x80, 0x40]);
        assert_eq!(decoder.reading().status, LambdaStatus::LambdaError);
        assert!(decoder.flags().sensor_fault);
    }

    #[test]
    fn test_can_short_frame() {
        let mut decoder = AemDecoder::new(AemInput::Can);
        let outcome = decoder.feed(&[0x27, 0x10]);
        assert_eq!(
            outcome.errors,
            vec![DecodeError::FrameTooShort { expected: 8, actual: 2 }]
        );
        assert!(!decoder.reading().has_data());
    }

    fn line_garbage(max: usize) -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(any::<u8>().prop_filter("line end", |b| *b != b'\n'), 0..max)
    }

    proptest! {
        #[test]
        fn prop_line_found_between_garbage(
            tenths in 50u32..=200,
            prefix in line_garbage(64),
            suffix in line_garbage(64),
            split in 0usize..256,
        ) {
            let mut stream = prefix;
            stream.extend(format!("\n{:03}\n", tenths).into_bytes());
            stream.extend(suffix);
            let split = split % (stream.len() + 1);

            let mut decoder = AemDecoder::new(AemInput::SerialAscii);
            decoder.feed(&stream[..split]);
            decoder.feed(&stream[split..]);

            prop_assert!((decoder.lambda() - tenths as f64 / 10.0).abs() < 1e-9);
        }

        #[test]
        fn prop_unterminated_bytes_never_emit(bytes in line_garbage(512)) {
            let mut decoder = AemDecoder::new(AemInput::SerialAscii);
            let outcome = decoder.feed(&bytes);
            prop_assert_eq!(outcome.frames, 0);
            prop_assert!(!decoder.reading().has_data());
        }
    }
}
