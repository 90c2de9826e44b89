//! Provider Configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use wbl_protocol::{PlxUnits, Vendor};

/// Callback receiving human-readable diagnostics
pub type Logger = Arc<dyn Fn(&str) + Send + Sync>;

/// Logger used when the host supplies none
pub fn default_logger() -> Logger {
    Arc::new(|msg: &str| tracing::info!(target: "wbl", "{}", msg))
}

/// Relay tags that route through the bridge adapter
pub const BRIDGE_TAGS: [&str; 2] = ["bridge", "txbridge"];

/// How the controller's bytes reach the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Local serial port
    Serial {
        /// Device path, e.g. "/dev/ttyUSB0" or "COM3"
        device: String,
        /// Overrides the vendor's baud rate
        #[serde(default)]
        baud: Option<u32>,
    },
    /// Pre-framed payloads relayed by a bridge adapter
    Relay { tag: String },
    /// CAN frames received through the bridge
    Can {
        /// Overrides the vendor's default identifier
        #[serde(default)]
        frame_id: Option<u32>,
    },
}

impl TransportConfig {
    pub fn serial(device: impl Into<String>) -> Self {
        TransportConfig::Serial {
            device: device.into(),
            baud: None,
        }
    }

    pub fn bridge() -> Self {
        TransportConfig::Relay {
            tag: BRIDGE_TAGS[0].to_string(),
        }
    }

    /// Short name used in errors and logs
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Serial { .. } => "serial",
            TransportConfig::Relay { .. } => "relay",
            TransportConfig::Can { .. } => "CAN",
        }
    }

    /// Whether this is a relay through the bridge adapter
    pub fn is_bridge_relay(&self) -> bool {
        matches!(self, TransportConfig::Relay { tag } if BRIDGE_TAGS.contains(&tag.as_str()))
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::serial("/dev/ttyUSB0")
    }
}

/// Configuration for one wideband provider
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WblConfig {
    /// Controller vendor
    pub vendor: Vendor,
    /// Transport to the controller
    pub transport: TransportConfig,
    /// PLX display units
    pub plx_units: PlxUnits,
    /// Delay before every Stag command (ms)
    pub stag_pacing_ms: u64,
    /// Capacity of bridge subscription channels
    pub relay_channel_capacity: usize,
    /// Diagnostics sink
    #[serde(skip, default = "default_logger")]
    pub logger: Logger,
}

impl WblConfig {
    pub fn new(vendor: Vendor, transport: TransportConfig) -> Self {
        Self {
            vendor,
            transport,
            ..Self::default()
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Send a line to the diagnostics sink
    pub fn log(&self, msg: &str) {
        (self.logger)(msg)
    }

    pub fn stag_pacing(&self) -> Duration {
        Duration::from_millis(self.stag_pacing_ms)
    }

    /// Configured baud rate, else the vendor's
    pub fn baud_rate(&self) -> Option<u32> {
        match &self.transport {
            TransportConfig::Serial { baud: Some(baud), .. } => Some(*baud),
            _ => self.vendor.default_baud_rate(),
        }
    }

    /// Configured CAN identifier, else the vendor's
    pub fn can_id(&self) -> Option<u32> {
        match &self.transport {
            TransportConfig::Can { frame_id: Some(id) } => Some(*id),
            _ => self.vendor.default_can_id(),
        }
    }
}

impl Default for WblConfig {
    fn default() -> Self {
        Self {
            vendor: Vendor::None,
            transport: TransportConfig::default(),
            plx_units: PlxUnits::default(),
            stag_pacing_ms: 100,
            relay_channel_capacity: 64,
            logger: default_logger(),
        }
    }
}

impl fmt::Debug for WblConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WblConfig")
            .field("vendor", &self.vendor)
            .field("transport", &self.transport)
            .field("plx_units", &self.plx_units)
            .field("stag_pacing_ms", &self.stag_pacing_ms)
            .field("relay_channel_capacity", &self.relay_channel_capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = WblConfig::default();
        assert_eq!(cfg.stag_pacing(), Duration::from_millis(100));
        assert_eq!(cfg.relay_channel_capacity, 64);
        assert_eq!(cfg.plx_units.vehicle_speed, 1);
    }

    #[test]
    fn test_deserialize_serial() {
        let cfg: WblConfig = serde_json::from_str(
            r#"{"vendor":"plx","transport":{"kind":"serial","device":"/dev/ttyS1"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.vendor, Vendor::Plx);
        assert_eq!(cfg.transport, TransportConfig::serial("/dev/ttyS1"));
        assert_eq!(cfg.baud_rate(), Some(19200));
        assert_eq!(cfg.stag_pacing_ms, 100);
    }

    #[test]
    fn test_deserialize_product_string_and_relay() {
        let cfg: WblConfig = serde_json::from_str(
            r#"{"vendor":"Innovate Serial Protocol v2","transport":{"kind":"relay","tag":"txbridge"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.vendor, Vendor::Innovate);
        assert!(cfg.transport.is_bridge_relay());
    }

    #[test]
    fn test_overrides() {
        let mut cfg = WblConfig::new(
            Vendor::Aem,
            TransportConfig::Serial {
                device: "COM4".into(),
                baud: Some(115200),
            },
        );
        assert_eq!(cfg.baud_rate(), Some(115200));
        assert_eq!(cfg.can_id(), Some(0x180));
        cfg.transport = TransportConfig::Can { frame_id: Some(0x181) };
        assert_eq!(cfg.can_id(), Some(0x181));
    }

    #[test]
    fn test_custom_logger() {
        let lines = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let sink = lines.clone();
        let cfg = WblConfig::default()
            .with_logger(Arc::new(move |msg: &str| sink.lock().unwrap().push(msg.to_string())));
        cfg.log("hello");
        assert_eq!(*lines.lock().unwrap(), vec!["hello".to_string()]);
        assert!(format!("{:?}", cfg).starts_with("WblConfig"));
    }
}
