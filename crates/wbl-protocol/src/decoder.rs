//! Common Decoder Contract
//!
//! Every vendor keeps its own state machine; this trait only fixes how
//! bytes go in and how the resulting reading comes out.

use crate::error::DecodeError;
use crate::reading::Reading;
use crate::vendor::Vendor;

/// Result of feeding a chunk of bytes to a decoder
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FeedOutcome {
    /// Frames that updated the reading
    pub frames: usize,
    /// Recoverable framing or decode errors, in stream order
    pub errors: Vec<DecodeError>,
    /// Commands the device expects in reply, in send order
    pub replies: Vec<Vec<u8>>,
    /// Controller state changes for the user's log
    pub notices: Vec<String>,
}

impl FeedOutcome {
    pub(crate) fn frame(&mut self) {
        self.frames += 1;
    }

    pub(crate) fn error(&mut self, err: DecodeError) {
        tracing::debug!("decode error: {}", err);
        self.errors.push(err);
    }

    pub(crate) fn notice(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.notices.push(message);
    }
}

/// A vendor frame synchronizer plus the reading it maintains.
///
/// Bytes may arrive in any chunking; implementations buffer partial frames
/// between calls and never block.
pub trait Decoder: Send + 'static {
    /// Vendor this decoder understands
    fn vendor(&self) -> Vendor;

    /// Feed raw bytes from a stream or a relayed payload
    fn feed(&mut self, data: &[u8]) -> FeedOutcome;

    /// Feed one identified frame (CAN); defaults to [`Decoder::feed`]
    fn feed_frame(&mut self, id: u32, data: &[u8]) -> FeedOutcome {
        let _ = id;
        self.feed(data)
    }

    /// Latest complete reading
    fn reading(&self) -> Reading;

    /// Lambda to hand to consumers
    fn lambda(&self) -> f64 {
        self.reading().lambda
    }

    /// Human-readable state
    fn describe(&self) -> String;

    /// Frame to send once when a conversational link comes up
    fn kickoff(&self) -> Option<Vec<u8>> {
        None
    }
}
