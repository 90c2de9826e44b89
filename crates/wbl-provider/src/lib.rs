//! Wideband Lambda Providers
//!
//! Runs a wideband decoder against a live transport: a serial port, a
//! bridge adapter relaying pre-framed payloads, or CAN frames received
//! through the bridge. [`new_provider`] turns a [`WblConfig`] into a
//! started [`LambdaProvider`].

pub mod bridge;
mod cell;
mod config;
pub mod conversation;
mod error;
mod factory;
mod provider;
pub mod transport;

pub use bridge::{Bridge, BridgeFrame, MemoryBridge, Subscription};
pub use cell::DecoderCell;
pub use config::{default_logger, Logger, TransportConfig, WblConfig};
pub use error::WblError;
pub use factory::new_provider;
pub use provider::{ForwardMode, LambdaProvider, ProviderState, Source, WidebandProvider};

pub use wbl_protocol as protocol;
