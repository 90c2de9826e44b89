//! Normalized Wideband Reading

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Lambda reported before any frame has been decoded
pub const INITIAL_LAMBDA: f64 = 0.5;

/// Lowest lambda a normal reading can report
pub const LAMBDA_MIN: f64 = 0.5;

/// Highest lambda a normal reading can report
pub const LAMBDA_MAX: f64 = 1.5;

/// Controller status attached to a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LambdaStatus {
    /// Lambda valid, normal operation
    Normal,
    /// Lambda field carries O2 level in 1/10 %
    O2Mode,
    /// Free air calibration in progress
    Calibrating,
    /// Free air calibration requested
    NeedsCalibration,
    /// Sensor heating up
    Warming,
    /// Heater calibration countdown
    HeaterCalibrating,
    /// Lambda field carries an error code
    LambdaError,
    /// Reserved ISP2 status
    Reserved,
    /// Nothing known yet, or the controller is asleep
    Unknown,
}

impl LambdaStatus {
    /// Map the 3-bit ISP2 status field
    pub fn from_isp2(code: u8) -> Self {
        match code {
            0 => LambdaStatus::Normal,
            1 => LambdaStatus::O2Mode,
            2 => LambdaStatus::Calibrating,
            3 => LambdaStatus::NeedsCalibration,
            4 => LambdaStatus::Warming,
            5 => LambdaStatus::HeaterCalibrating,
            6 => LambdaStatus::LambdaError,
            7 => LambdaStatus::Reserved,
            _ => LambdaStatus::Unknown,
        }
    }

    /// Diagnostic lambda reported in place of the measurement.
    ///
    /// Consumers draw a single bar in the 0.5..1.5 range, so every
    /// non-normal status gets a distinct value inside it.
    pub fn sentinel(&self) -> Option<f64> {
        match self {
            LambdaStatus::Normal => None,
            LambdaStatus::O2Mode => Some(1.5),
            LambdaStatus::Calibrating => Some(0.502),
            LambdaStatus::NeedsCalibration => Some(0.503),
            LambdaStatus::Warming => Some(0.504),
            LambdaStatus::HeaterCalibrating => Some(0.505),
            LambdaStatus::LambdaError => Some(0.506),
            LambdaStatus::Reserved => Some(0.507),
            LambdaStatus::Unknown => Some(0.666),
        }
    }

    /// Long-form description
    pub fn description(&self) -> &'static str {
        match self {
            LambdaStatus::Normal => "Lambda valid and Aux data valid, normal operation (000)",
            LambdaStatus::O2Mode => "Lambda value contains O2 level in 1/10% (001)",
            LambdaStatus::Calibrating => "Free air Calib in progress, Lambda data not valid (010)",
            LambdaStatus::NeedsCalibration => {
                "Need Free air Calibration Request, Lambda data not valid (011)"
            }
            LambdaStatus::Warming => {
                "Warming up, Lambda value is temp in 1/10% of operating temp (100)"
            }
            LambdaStatus::HeaterCalibrating => {
                "Heater Calibration, Lambda value contains calibration countdown (101)"
            }
            LambdaStatus::LambdaError => "Error code in Lambda value (110)",
            LambdaStatus::Reserved => "reserved (111)",
            LambdaStatus::Unknown => "Unknown",
        }
    }
}

impl Default for LambdaStatus {
    fn default() -> Self {
        LambdaStatus::Unknown
    }
}

/// A complete, internally consistent wideband reading.
///
/// Decoders build a new value per frame and replace the old one in a
/// single assignment, so a reader never observes a half-applied frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    /// Lambda, or a status sentinel where the vendor defines one
    pub lambda: f64,
    /// Free oxygen in percent
    pub oxygen_pct: Option<f64>,
    /// Supply voltage
    pub battery_v: Option<f64>,
    /// Air/fuel ratio derived from lambda
    pub afr: Option<f64>,
    /// Stoichiometric constant of the configured fuel
    pub afr_multiplier: Option<f64>,
    /// Controller status
    pub status: LambdaStatus,
    /// When the reading was last updated, `None` until the first frame
    #[serde(skip)]
    pub timestamp: Option<Instant>,
}

impl Reading {
    /// Whether at least one frame has been decoded
    pub fn has_data(&self) -> bool {
        self.timestamp.is_some()
    }

    /// Age of the reading, `None` until the first frame
    pub fn age(&self) -> Option<std::time::Duration> {
        self.timestamp.map(|t| t.elapsed())
    }
}

impl Default for Reading {
    fn default() -> Self {
        Self {
            lambda: INITIAL_LAMBDA,
            oxygen_pct: None,
            battery_v: None,
            afr: None,
            afr_multiplier: None,
            status: LambdaStatus::Unknown,
            timestamp: None,
        }
    }
}

/// Clamp a measured lambda into the renderable range
pub fn clamp_lambda(value: f64) -> f64 {
    value.clamp(LAMBDA_MIN, LAMBDA_MAX)
}
