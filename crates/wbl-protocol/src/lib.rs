//! Wideband Lambda Wire Protocols
//!
//! Frame synchronizers and decoders for the supported wideband lambda
//! controllers. Decoders are pure state machines: they take bytes in any
//! chunking, keep partial frames between calls and expose the latest
//! normalized [`Reading`]. Transports live in `wbl-provider`.

pub mod aem;
pub mod combi;
mod decoder;
pub mod ecumaster;
mod error;
pub mod innovate;
pub mod plx;
mod reading;
pub mod stag;
mod vendor;
pub mod zeitronix;

pub use aem::{AemDecoder, AemInput};
pub use combi::CombiDecoder;
pub use decoder::{Decoder, FeedOutcome};
pub use ecumaster::EcuMasterDecoder;
pub use error::DecodeError;
pub use innovate::Isp2Decoder;
pub use plx::{PlxDecoder, PlxUnits, SensorType};
pub use reading::{clamp_lambda, LambdaStatus, Reading, INITIAL_LAMBDA, LAMBDA_MAX, LAMBDA_MIN};
pub use stag::StagDecoder;
pub use vendor::Vendor;
pub use zeitronix::ZeitronixDecoder;
