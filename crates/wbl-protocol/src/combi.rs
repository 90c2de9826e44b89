//! CombiAdapter relayed lambda
//!
//! The adapter forwards one ASCII decimal per system message, lambda × 10.

use crate::aem::parse_decimal;
use crate::decoder::{Decoder, FeedOutcome};
use crate::reading::{LambdaStatus, Reading};
use crate::vendor::Vendor;
use std::time::Instant;

#[derive(Debug, Default)]
pub struct CombiDecoder {
    reading: Reading,
}

impl CombiDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for CombiDecoder {
    fn vendor(&self) -> Vendor {
        Vendor::Combi
    }

    fn feed(&mut self, data: &[u8]) -> FeedOutcome {
        let mut outcome = FeedOutcome::default();
        match parse_decimal(data) {
            Ok(value) => {
                self.reading = Reading {
                    lambda: value / 10.0,
                    status: LambdaStatus::Normal,
                    timestamp: Some(Instant::now()),
                    ..self.reading
                };
                outcome.frame();
            }
            Err(err) => outcome.error(err),
        }
        outcome
    }

    fn reading(&self) -> Reading {
        self.reading
    }

    fn describe(&self) -> String {
        format!("Lambda: {:.3}", self.reading.lambda)
    }
}
