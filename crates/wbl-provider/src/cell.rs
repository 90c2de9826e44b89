//! Shared Decoder Cell
//!
//! The reader task and the push path both decode through the same cell;
//! the mutex makes each feed, and the reading it produces, atomic to
//! anyone calling `reading()`.

use std::sync::{Mutex, MutexGuard, PoisonError};
use wbl_protocol::{Decoder, FeedOutcome, Reading, Vendor};

/// A decoder behind a mutex, with per-vendor counters
#[derive(Debug)]
pub struct DecoderCell<D> {
    vendor: Vendor,
    decoder: Mutex<D>,
}

impl<D: Decoder> DecoderCell<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            vendor: decoder.vendor(),
            decoder: Mutex::new(decoder),
        }
    }

    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    // decoders replace the reading in one assignment, so a poisoned
    // guard still holds a complete one
    fn lock(&self) -> MutexGuard<'_, D> {
        self.decoder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed stream bytes or a relayed payload
    pub fn ingest(&self, data: &[u8]) -> FeedOutcome {
        let outcome = self.lock().feed(data);
        self.record(data.len(), &outcome);
        outcome
    }

    /// Feed one identified CAN frame
    pub fn ingest_frame(&self, id: u32, data: &[u8]) -> FeedOutcome {
        let outcome = self.lock().feed_frame(id, data);
        self.record(data.len(), &outcome);
        outcome
    }

    pub fn reading(&self) -> Reading {
        self.lock().reading()
    }

    pub fn lambda(&self) -> f64 {
        self.lock().lambda()
    }

    pub fn describe(&self) -> String {
        self.lock().describe()
    }

    pub fn kickoff(&self) -> Option<Vec<u8>> {
        self.lock().kickoff()
    }

    /// Run `f` against the decoder for vendor-specific accessors
    pub fn with<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        let guard = self.lock();
        f(&*guard)
    }

    fn record(&self, bytes: usize, outcome: &FeedOutcome) {
        let vendor = self.vendor.as_str();
        metrics::counter!("wbl_bytes_total", "vendor" => vendor).increment(bytes as u64);
        if outcome.frames > 0 {
            metrics::counter!("wbl_frames_total", "vendor" => vendor)
                .increment(outcome.frames as u64);
        }
        if !outcome.errors.is_empty() {
            metrics::counter!("wbl_decode_errors_total", "vendor" => vendor)
                .increment(outcome.errors.len() as u64);
        }
    }
}
