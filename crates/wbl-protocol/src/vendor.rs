//! Wideband Controller Vendors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Supported wideband lambda sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    /// No wideband configured
    None,
    /// Lambda comes from the ECU's own log stream
    Ecu,
    /// Innovate LC-1/LC-2/MTX-L (ISP2)
    #[serde(alias = "Innovate Serial Protocol v2")]
    Innovate,
    /// AEM UEGO (serial ASCII or CAN)
    #[serde(alias = "AEM Uego")]
    Aem,
    /// PLX iMFD serial protocol
    #[serde(alias = "PLX iMFD Serial Protocol")]
    Plx,
    /// ECUMaster Lambda-to-CAN
    #[serde(alias = "LAMBDA to CAN")]
    EcuMaster,
    /// Combi adapter relaying readings as system messages
    #[serde(alias = "CombiAdapter")]
    Combi,
    /// Zeitronix ZT-2
    #[serde(alias = "Zeitronix ZT-2")]
    Zeitronix,
    /// Stag AFR
    #[serde(alias = "Stag AFR")]
    Stag,
}

impl Vendor {
    /// Every vendor, in configuration order
    pub const ALL: [Vendor; 9] = [
        Vendor::None,
        Vendor::Ecu,
        Vendor::Innovate,
        Vendor::Aem,
        Vendor::Plx,
        Vendor::EcuMaster,
        Vendor::Combi,
        Vendor::Zeitronix,
        Vendor::Stag,
    ];

    /// Short lowercase identifier, also used as metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::None => "none",
            Vendor::Ecu => "ecu",
            Vendor::Innovate => "innovate",
            Vendor::Aem => "aem",
            Vendor::Plx => "plx",
            Vendor::EcuMaster => "ecumaster",
            Vendor::Combi => "combi",
            Vendor::Zeitronix => "zeitronix",
            Vendor::Stag => "stag",
        }
    }

    /// Product string as shown in the tuning application's settings
    pub fn product_string(&self) -> &'static str {
        match self {
            Vendor::None => "None",
            Vendor::Ecu => "ECU",
            Vendor::Innovate => "Innovate Serial Protocol v2",
            Vendor::Aem => "AEM Uego",
            Vendor::Plx => "PLX iMFD Serial Protocol",
            Vendor::EcuMaster => "LAMBDA to CAN",
            Vendor::Combi => "CombiAdapter",
            Vendor::Zeitronix => "Zeitronix ZT-2",
            Vendor::Stag => "Stag AFR",
        }
    }

    /// Whether a dedicated wideband box is involved at all
    pub fn is_external(&self) -> bool {
        !matches!(self, Vendor::None | Vendor::Ecu)
    }

    /// Serial baud rate, `None` when the vendor has no serial link
    pub fn default_baud_rate(&self) -> Option<u32> {
        match self {
            Vendor::Aem | Vendor::Innovate | Vendor::Zeitronix => Some(9600),
            Vendor::Plx => Some(19200),
            Vendor::Stag => Some(57600),
            _ => None,
        }
    }

    /// Serial read timeout; bounds how long a reader can sit in a read
    pub fn read_timeout(&self) -> Duration {
        match self {
            Vendor::Aem | Vendor::Stag => Duration::from_millis(5),
            Vendor::Innovate => Duration::from_millis(20),
            Vendor::Plx => Duration::from_millis(2),
            Vendor::Zeitronix => Duration::from_millis(500),
            _ => Duration::from_millis(20),
        }
    }

    /// Whether the vendor can be read from a local serial port
    pub fn supports_serial(&self) -> bool {
        self.default_baud_rate().is_some()
    }

    /// Whether a bridge adapter can relay this vendor's readings
    pub fn supports_relay(&self) -> bool {
        matches!(
            self,
            Vendor::Innovate | Vendor::Aem | Vendor::Plx | Vendor::Zeitronix | Vendor::Combi
        )
    }

    /// Default CAN identifier, `None` when the vendor has no CAN mode
    pub fn default_can_id(&self) -> Option<u32> {
        match self {
            Vendor::Aem => Some(0x180),
            Vendor::EcuMaster => Some(0x664),
            _ => None,
        }
    }

    /// Byte the bridge handshake uses to enable this vendor's relay stream
    pub fn bridge_tag(&self) -> Option<u8> {
        match self {
            Vendor::Innovate => Some(b'i'),
            Vendor::Aem => Some(b'a'),
            Vendor::Plx => Some(b'p'),
            Vendor::Zeitronix => Some(b'z'),
            _ => None,
        }
    }
}

impl Default for Vendor {
    fn default() -> Self {
        Vendor::None
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.product_string())
    }
}

impl FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Vendor::ALL
            .iter()
            .copied()
            .find(|v| {
                v.as_str().eq_ignore_ascii_case(trimmed)
                    || v.product_string().eq_ignore_ascii_case(trimmed)
            })
            .ok_or_else(|| format!("unknown WBL type: {}", trimmed))
    }
}
