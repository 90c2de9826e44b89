//! ECUMaster "LAMBDA to CAN"
//!
//! The controller broadcasts two 8-byte frames: the base id (0x664) with
//! supply, heater, temperature, lambda and fault bits, and base + 1 with
//! pump current, oxygen, cell resistance, heater state and the validity bit.

use crate::decoder::{Decoder, FeedOutcome};
use crate::error::DecodeError;
use crate::reading::{LambdaStatus, Reading};
use crate::vendor::Vendor;
use std::fmt::Write;
use std::time::Instant;

pub const BASE_ID: u32 = 0x664;
pub const FRAME_LEN: usize = 8;

/// Highest base id whose secondary frame still fits a 29-bit identifier
pub const MAX_BASE_ID: u32 = 0x1FFF_FFFE;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CalibrationState {
    Start,
    WaitSpiReset,
    Finished,
    Error,
    #[default]
    Unknown,
}

impl CalibrationState {
    fn from_bits(value: u8) -> Self {
        match value {
            0 => CalibrationState::Start,
            1 => CalibrationState::WaitSpiReset,
            2 => CalibrationState::Finished,
            3 => CalibrationState::Error,
            _ => CalibrationState::Unknown,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CalibrationState::Start => "Start",
            CalibrationState::WaitSpiReset => "Wait for SPI reset",
            CalibrationState::Finished => "Finished",
            CalibrationState::Error => "Error",
            CalibrationState::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceVersion {
    Lsu42,
    Lsu49,
    LsuAdv,
    #[default]
    Unknown,
}

impl DeviceVersion {
    fn from_bits(value: u8) -> Self {
        match value {
            0 => DeviceVersion::Lsu42,
            1 => DeviceVersion::Lsu49,
            2 => DeviceVersion::LsuAdv,
            _ => DeviceVersion::Unknown,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DeviceVersion::Lsu42 => "LSU 4.2",
            DeviceVersion::Lsu49 => "LSU 4.9",
            DeviceVersion::LsuAdv => "LSU ADV",
            DeviceVersion::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HeaterState {
    LowPower,
    RampUp,
    Regulation,
    #[default]
    Unknown,
}

impl HeaterState {
    fn from_byte(value: u8) -> Self {
        match value {
            2 => HeaterState::LowPower,
            4 => HeaterState::RampUp,
            7 => HeaterState::Regulation,
            _ => HeaterState::Unknown,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            HeaterState::LowPower => "Low power",
            HeaterState::RampUp => "Ramp up",
            HeaterState::Regulation => "Regulation",
            HeaterState::Unknown => "Unknown",
        }
    }
}

/// Sensor driver fault bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultFlags {
    pub vm_short_vcc: bool,
    pub vm_short_gnd: bool,
    pub un_short_vcc: bool,
    pub un_short_gnd: bool,
    pub iaip_short_vcc: bool,
    pub iaip_short_gnd: bool,
    pub vub_low_voltage: bool,
    pub heater_short_vcc: bool,
    pub heater_short_gnd: bool,
    pub heater_open_load: bool,
}

impl FaultFlags {
    pub fn any(&self) -> bool {
        self.vm_short_vcc
            || self.vm_short_gnd
            || self.un_short_vcc
            || self.un_short_gnd
            || self.iaip_short_vcc
            || self.iaip_short_gnd
            || self.vub_low_voltage
            || self.heater_short_vcc
            || self.heater_short_gnd
            || self.heater_open_load
    }
}

/// Everything the controller reports
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EcuMasterStatus {
    /// V
    pub supply_voltage: f64,
    /// % duty cycle
    pub heater_power: f64,
    /// °C
    pub sensor_temp: f64,
    pub lambda: f64,
    pub faults: FaultFlags,
    pub calibration: CalibrationState,
    pub device_version: DeviceVersion,
    /// mA
    pub ip_current: f64,
    /// %
    pub oxygen: f64,
    /// Ω
    pub resistance: f64,
    pub heater_state: HeaterState,
    pub lambda_valid: bool,
}

#[derive(Debug)]
pub struct EcuMasterDecoder {
    base_id: u32,
    status: EcuMasterStatus,
    reading: Reading,
}

impl EcuMasterDecoder {
    pub fn new() -> Self {
        Self::with_base_id(BASE_ID)
    }

    pub fn with_base_id(base_id: u32) -> Self {
        Self {
            base_id,
            status: EcuMasterStatus::default(),
            reading: Reading::default(),
        }
    }

    pub fn base_id(&self) -> u32 {
        self.base_id
    }

    /// Identifiers the controller transmits on
    pub fn ids(&self) -> Vec<u32> {
        std::iter::once(self.base_id).chain(self.secondary_id()).collect()
    }

    fn secondary_id(&self) -> Option<u32> {
        self.base_id.checked_add(1)
    }

    pub fn status(&self) -> EcuMasterStatus {
        self.status
    }

    fn decode_primary(&mut self, data: &[u8]) {
        let st = &mut self.status;
        st.supply_voltage = u16::from_be_bytes([data[0], data[1]]) as f64 / 100.0;
        st.heater_power = data[2] as f64 / 255.0 * 100.0;
        st.sensor_temp = data[3] as f64 * 4.0;
        st.lambda = u16::from_be_bytes([data[4], data[5]]) as f64 / 1000.0;
        st.faults = FaultFlags {
            vm_short_vcc: data[7] & 0x01 != 0,
            vm_short_gnd: data[7] & 0x02 != 0,
            un_short_vcc: data[7] & 0x04 != 0,
            un_short_gnd: data[7] & 0x08 != 0,
            iaip_short_vcc: data[7] & 0x10 != 0,
            iaip_short_gnd: data[7] & 0x20 != 0,
            vub_low_voltage: data[7] & 0x40 != 0,
            heater_short_vcc: data[7] & 0x80 != 0,
            heater_short_gnd: data[6] & 0x01 != 0,
            heater_open_load: data[6] & 0x02 != 0,
        };
        st.calibration = CalibrationState::from_bits((data[6] >> 2) & 0x07);
        st.device_version = DeviceVersion::from_bits((data[6] >> 5) & 0x07);
    }

    fn decode_secondary(&mut self, data: &[u8]) {
        let st = &mut self.status;
        st.ip_current = i16::from_be_bytes([data[0], data[1]]) as f64 / 1000.0;
        st.oxygen = i16::from_be_bytes([data[2], data[3]]) as f64 / 100.0;
        st.resistance = u16::from_be_bytes([data[4], data[5]]) as f64 / 10.0;
        st.heater_state = HeaterState::from_byte(data[6]);
        st.lambda_valid = data[7] & 0x01 != 0;
    }

    fn refresh_reading(&mut self) {
        let st = &self.status;
        self.reading = Reading {
            lambda: st.lambda,
            oxygen_pct: Some(st.oxygen),
            battery_v: Some(st.supply_voltage),
            afr: None,
            afr_multiplier: None,
            status: if st.lambda_valid {
                LambdaStatus::Normal
            } else {
                LambdaStatus::LambdaError
            },
            timestamp: Some(Instant::now()),
        };
    }
}

impl Default for EcuMasterDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EcuMasterDecoder {
    fn vendor(&self) -> Vendor {
        Vendor::EcuMaster
    }

    /// Untagged payloads are taken as base frames
    fn feed(&mut self, data: &[u8]) -> FeedOutcome {
        self.feed_frame(self.base_id, data)
    }

    fn feed_frame(&mut self, id: u32, data: &[u8]) -> FeedOutcome {
        let mut outcome = FeedOutcome::default();
        if id != self.base_id && Some(id) != self.secondary_id() {
            outcome.error(DecodeError::UnknownIdentifier(id));
            return outcome;
        }
        if data.len() < FRAME_LEN {
            outcome.error(DecodeError::FrameTooShort {
                expected: FRAME_LEN,
                actual: data.len(),
            });
            return outcome;
        }

        if id == self.base_id {
            self.decode_primary(data);
        } else {
            self.decode_secondary(data);
        }
        self.refresh_reading();
        outcome.frame();
        outcome
    }

    fn reading(&self) -> Reading {
        self.reading
    }

    fn describe(&self) -> String {
        let st = &self.status;
        let f = &st.faults;
        let mut out = String::new();
        let _ = writeln!(out, "Supply Voltage:    {:.2} V", st.supply_voltage);
        let _ = writeln!(out, "Heater Power:      {:.2} %DC", st.heater_power);
        let _ = writeln!(out, "Sensor Temp:       {} °C", st.sensor_temp);
        let _ = writeln!(out, "Lambda:            {:.2}", st.lambda);
        let _ = writeln!(out, "VM Short VCC:      {}", f.vm_short_vcc);
        let _ = writeln!(out, "VM Short GND:      {}", f.vm_short_gnd);
        let _ = writeln!(out, "UN Short VCC:      {}", f.un_short_vcc);
        let _ = writeln!(out, "UN Short GND:      {}", f.un_short_gnd);
        let _ = writeln!(out, "IAIP Short VCC:    {}", f.iaip_short_vcc);
        let _ = writeln!(out, "IAIP Short GND:    {}", f.iaip_short_gnd);
        let _ = writeln!(out, "VUB Low Voltage:   {}", f.vub_low_voltage);
        let _ = writeln!(out, "Heater Short VCC:  {}", f.heater_short_vcc);
        let _ = writeln!(out, "Heater Short GND:  {}", f.heater_short_gnd);
        let _ = writeln!(out, "Heater Open Load:  {}", f.heater_open_load);
        let _ = writeln!(out, "Calibration State: {}", st.calibration.description());
        let _ = writeln!(out, "Device Version:    {}", st.device_version.description());
        let _ = writeln!(out, "Ip Current:        {:.2} mA", st.ip_current);
        let _ = writeln!(out, "Oxygen Conc:       {:.2} %", st.oxygen);
        let _ = writeln!(out, "Resistance:        {:.2} Ohm", st.resistance);
        let _ = writeln!(out, "Heater State:      {}", st.heater_state.description());
        let _ = write!(out, "Lambda Valid:      {}", st.lambda_valid);
        out
    }
}
