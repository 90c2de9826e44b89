//! PLX iMFD Serial Protocol
//!
//! Packets are framed by a start byte (0x80) and a stop byte (0x40). Every
//! payload byte carries six data bits; a payload is a sequence of 5-byte
//! sensor records `[addr_msb, addr_lsb, instance, data_msb, data_lsb]`.

use crate::decoder::{Decoder, FeedOutcome};
use crate::error::DecodeError;
use crate::reading::{LambdaStatus, Reading, INITIAL_LAMBDA};
use crate::vendor::Vendor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

pub const START_BYTE: u8 = 0x80;
pub const STOP_BYTE: u8 = 0x40;
pub const DATA_MASK: u8 = 0x3F;

/// Bytes per sensor record
pub const PACKET_LEN: usize = 5;

/// iMFD sensor addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum SensorType {
    WidebandAirFuel = 0,
    ExhaustGasTemperature = 1,
    FluidTemperature = 2,
    Vacuum = 3,
    Boost = 4,
    AirIntakeTemperature = 5,
    Rpm = 6,
    VehicleSpeed = 7,
    ThrottlePosition = 8,
    EngineLoad = 9,
    FuelPressure = 10,
    Timing = 11,
    Map = 12,
    Maf = 13,
    ShortTermFuelTrim = 14,
    LongTermFuelTrim = 15,
    NarrowbandOxygenSensor = 16,
    FuelLevel = 17,
    VoltMeter = 18,
    Knock = 19,
    DutyCycle = 20,
    FuelEfficiency = 21,
    AnalogVoltage = 22,
    SpeedHz = 23,
    WidebandAfrStatus = 24,
    WidebandAfrHealth = 25,
    WidebandAfrReaction = 26,
}

impl SensorType {
    const ALL: [SensorType; 27] = [
        SensorType::WidebandAirFuel,
        SensorType::ExhaustGasTemperature,
        SensorType::FluidTemperature,
        SensorType::Vacuum,
        SensorType::Boost,
        SensorType::AirIntakeTemperature,
        SensorType::Rpm,
        SensorType::VehicleSpeed,
        SensorType::ThrottlePosition,
        SensorType::EngineLoad,
        SensorType::FuelPressure,
        SensorType::Timing,
        SensorType::Map,
        SensorType::Maf,
        SensorType::ShortTermFuelTrim,
        SensorType::LongTermFuelTrim,
        SensorType::NarrowbandOxygenSensor,
        SensorType::FuelLevel,
        SensorType::VoltMeter,
        SensorType::Knock,
        SensorType::DutyCycle,
        SensorType::FuelEfficiency,
        SensorType::AnalogVoltage,
        SensorType::SpeedHz,
        SensorType::WidebandAfrStatus,
        SensorType::WidebandAfrHealth,
        SensorType::WidebandAfrReaction,
    ];

    /// Look up a sensor by its 12-bit address
    pub fn from_address(address: u16) -> Option<Self> {
        Self::ALL.get(address as usize).copied()
    }

    pub fn address(&self) -> u16 {
        *self as u16
    }

    pub fn name(&self) -> &'static str {
        match self {
            SensorType::WidebandAirFuel => "Wideband Air/Fuel",
            SensorType::ExhaustGasTemperature => "Exhaust Gas Temperature",
            SensorType::FluidTemperature => "Fluid Temperature",
            SensorType::Vacuum => "Vacuum",
            SensorType::Boost => "Boost",
            SensorType::AirIntakeTemperature => "Air Intake Temperature",
            SensorType::Rpm => "RPM",
            SensorType::VehicleSpeed => "Vehicle Speed",
            SensorType::ThrottlePosition => "Throttle Position",
            SensorType::EngineLoad => "Engine Load",
            SensorType::FuelPressure => "Fuel Pressure",
            SensorType::Timing => "Timing",
            SensorType::Map => "MAP",
            SensorType::Maf => "MAF",
            SensorType::ShortTermFuelTrim => "Short Term Fuel Trim",
            SensorType::LongTermFuelTrim => "Long Term Fuel Trim",
            SensorType::NarrowbandOxygenSensor => "Narrowband Oxygen Sensor",
            SensorType::FuelLevel => "Fuel Level",
            SensorType::VoltMeter => "Volt Meter",
            SensorType::Knock => "Knock",
            SensorType::DutyCycle => "Duty Cycle",
            SensorType::FuelEfficiency => "Fuel Efficiency",
            SensorType::AnalogVoltage => "Analog Voltage",
            SensorType::SpeedHz => "Speed (Hz)",
            SensorType::WidebandAfrStatus => "Wideband AFR Status",
            SensorType::WidebandAfrHealth => "Wideband AFR Health",
            SensorType::WidebandAfrReaction => "Wideband AFR Reaction",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.address())
    }
}

/// Display unit selection per sensor type.
///
/// Sensors without an entry have a single fixed unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlxUnits {
    /// 0 λ, 1 gasoline, 2 diesel, 3 methanol, 4 ethanol, 5 LPG, 6 CNG
    pub wideband_air_fuel: u8,
    /// 0 °C, 1 °F
    pub exhaust_gas_temperature: u8,
    /// 0 °C water, 1 °F water, 2 °C oil, 3 °F oil
    pub fluid_temperature: u8,
    /// 0 inHg, 1 mmHg
    pub vacuum: u8,
    /// 0 0-30 PSI, 1 0-2 kg/cm², 2 0-15 PSI, 3 0-1 kg/cm², 4 0-60 PSI, 5 0-4 kg/cm²
    pub boost: u8,
    /// 0 °C, 1 °F
    pub air_intake_temperature: u8,
    /// 0 MPH, 1 km/h
    pub vehicle_speed: u8,
    /// 0 PSI fuel, 1 kg/cm² fuel, 2 bar fuel, 3 PSI oil, 4 kg/cm² oil, 5 bar oil
    pub fuel_pressure: u8,
    /// 0 kPa, 1 inHg
    pub map: u8,
    /// 0 g/s, 1 lb/min
    pub maf: u8,
    /// 0 percent, 1 volts
    pub narrowband_oxygen_sensor: u8,
    /// 0 positive duty, 1 negative duty
    pub duty_cycle: u8,
    /// 0 MPG, 1 km/L, 2 L/100km
    pub fuel_efficiency: u8,
}

impl PlxUnits {
    /// Unit option configured for a sensor
    pub fn unit_for(&self, sensor: SensorType) -> u8 {
        match sensor {
            SensorType::WidebandAirFuel => self.wideband_air_fuel,
            SensorType::ExhaustGasTemperature => self.exhaust_gas_temperature,
            SensorType::FluidTemperature => self.fluid_temperature,
            SensorType::Vacuum => self.vacuum,
            SensorType::Boost => self.boost,
            SensorType::AirIntakeTemperature => self.air_intake_temperature,
            SensorType::VehicleSpeed => self.vehicle_speed,
            SensorType::FuelPressure => self.fuel_pressure,
            SensorType::Map => self.map,
            SensorType::Maf => self.maf,
            SensorType::NarrowbandOxygenSensor => self.narrowband_oxygen_sensor,
            SensorType::DutyCycle => self.duty_cycle,
            SensorType::FuelEfficiency => self.fuel_efficiency,
            _ => 0,
        }
    }
}

impl Default for PlxUnits {
    fn default() -> Self {
        Self {
            wideband_air_fuel: 0,
            exhaust_gas_temperature: 0,
            fluid_temperature: 0,
            vacuum: 0,
            boost: 0,
            air_intake_temperature: 0,
            vehicle_speed: 1,
            fuel_pressure: 0,
            map: 0,
            maf: 0,
            narrowband_oxygen_sensor: 0,
            duty_cycle: 0,
            fuel_efficiency: 0,
        }
    }
}

/// Convert a raw 12-bit sensor value in the given unit.
///
/// Unknown unit options fall back to the sensor's first unit.
pub fn convert(sensor: SensorType, unit: u8, raw: u16) -> (f64, &'static str) {
    let r = raw as f64;
    match (sensor, unit) {
        (SensorType::WidebandAirFuel, 1) => ((r / 2.55 + 100.0) / 10.0, "Gasoline"),
        (SensorType::WidebandAirFuel, 2) => ((r / 2.58 + 100.0) / 10.0, "Diesel"),
        (SensorType::WidebandAirFuel, 3) => ((r / 5.856 + 43.5) / 10.0, "Methanol"),
        (SensorType::WidebandAirFuel, 4) => ((r / 4.167 + 61.7) / 10.0, "Ethanol"),
        (SensorType::WidebandAirFuel, 5) => ((r / 2.417 + 105.6) / 10.0, "LPG"),
        (SensorType::WidebandAirFuel, 6) => ((r / 2.18 + 117.0) / 10.0, "CNG"),
        (SensorType::WidebandAirFuel, _) => ((r / 3.75 + 68.0) / 100.0, "λ"),

        (SensorType::ExhaustGasTemperature, 1) | (SensorType::AirIntakeTemperature, 1) => {
            (r / 0.555 + 32.0, "°F")
        }
        (SensorType::ExhaustGasTemperature, _) | (SensorType::AirIntakeTemperature, _) => {
            (r, "°C")
        }

        (SensorType::FluidTemperature, 1) | (SensorType::FluidTemperature, 3) => {
            (r / 0.555 + 32.0, "°F")
        }
        (SensorType::FluidTemperature, _) => (r, "°C"),

        (SensorType::Vacuum, 1) => (-(r * 2.23 + 760.4), "mm/Hg"),
        (SensorType::Vacuum, _) => (-(r / 11.39 - 29.93), "in/Hg"),

        (SensorType::Boost, 1) | (SensorType::Boost, 3) | (SensorType::Boost, 5) => {
            (r / 329.47, "kg/cm^2")
        }
        (SensorType::Boost, _) => (r / 22.73, "PSI"),

        (SensorType::Rpm, _) => (r * 19.55, "RPM"),

        (SensorType::VehicleSpeed, 1) => (r / 3.97, "km/h"),
        (SensorType::VehicleSpeed, _) => (r / 6.39, "MPH"),

        (SensorType::ThrottlePosition, _) | (SensorType::EngineLoad, _) => (r, "%"),

        (SensorType::FuelPressure, 1) | (SensorType::FuelPressure, 4) => (r / 72.73, "kg/cm^2"),
        (SensorType::FuelPressure, 2) | (SensorType::FuelPressure, 5) => (r / 74.22, "Bar"),
        (SensorType::FuelPressure, _) => (r / 5.115, "PSI"),

        (SensorType::Timing, _) => (r - 64.0, "°"),

        (SensorType::Map, 1) => (r / 3.386, "inHg"),
        (SensorType::Map, _) => (r, "kPa"),

        (SensorType::Maf, 1) => (r / 7.54, "lb/min"),
        (SensorType::Maf, _) => (r, "g/s"),

        (SensorType::ShortTermFuelTrim, _) | (SensorType::LongTermFuelTrim, _) => {
            (r - 100.0, "%")
        }

        (SensorType::NarrowbandOxygenSensor, 1) => (r / 78.43, "v"),
        (SensorType::NarrowbandOxygenSensor, _) => (r, "%"),

        (SensorType::FuelLevel, _) => (r, "%"),
        (SensorType::VoltMeter, _) | (SensorType::AnalogVoltage, _) => (r / 51.15, "v"),
        (SensorType::Knock, _) => (r / 204.6, "v"),

        (SensorType::DutyCycle, 1) => (100.0 - r / 10.23, "-"),
        (SensorType::DutyCycle, _) => (r / 10.23, "+"),

        (SensorType::FuelEfficiency, 1) => (r, "km/L"),
        (SensorType::FuelEfficiency, 2) => {
            let value = if raw == 0 { 0.0 } else { 100.0 / r };
            (value, "L/100km")
        }
        (SensorType::FuelEfficiency, _) => (r, "MPG"),

        (SensorType::SpeedHz, _) => (r * 0.1, "Hz"),
        (SensorType::WidebandAfrStatus, _) | (SensorType::WidebandAfrHealth, _) => (r, ""),
        (SensorType::WidebandAfrReaction, _) => (r, "ms"),
    }
}

/// One decoded sensor record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorValue {
    pub value: f64,
    pub unit: &'static str,
}

/// PLX iMFD stream decoder
#[derive(Debug)]
pub struct PlxDecoder {
    units: PlxUnits,
    buffer: Vec<u8>,
    parsing: bool,
    values: BTreeMap<(SensorType, u8), SensorValue>,
    lambda: Option<f64>,
    reading: Reading,
}

impl PlxDecoder {
    pub fn new(units: PlxUnits) -> Self {
        Self {
            units,
            buffer: Vec::with_capacity(32),
            parsing: false,
            values: BTreeMap::new(),
            lambda: None,
            reading: Reading::default(),
        }
    }

    /// Last value of a sensor instance in its configured unit
    pub fn sensor(&self, sensor: SensorType, instance: u8) -> Option<f64> {
        self.values.get(&(sensor, instance)).map(|v| v.value)
    }

    /// Number of distinct sensor instances seen
    pub fn sensor_count(&self) -> usize {
        self.values.len()
    }

    fn parse_packets(&mut self, outcome: &mut FeedOutcome) {
        let payload = std::mem::take(&mut self.buffer);
        if payload.len() % PACKET_LEN != 0 {
            outcome.error(DecodeError::InvalidPayloadLength(payload.len()));
            self.buffer = payload;
            self.buffer.clear();
            return;
        }

        let mut stored = 0;
        for packet in payload.chunks_exact(PACKET_LEN) {
            if self.parse_packet(packet) {
                stored += 1;
            }
        }
        self.buffer = payload;
        self.buffer.clear();

        if stored > 0 {
            self.reading = Reading {
                lambda: self.lambda.unwrap_or(INITIAL_LAMBDA),
                status: if self.lambda.is_some() {
                    LambdaStatus::Normal
                } else {
                    LambdaStatus::Unknown
                },
                afr: self.afr(),
                timestamp: Some(Instant::now()),
                ..self.reading
            };
            outcome.frame();
        }
    }

    fn parse_packet(&mut self, packet: &[u8]) -> bool {
        let address = ((packet[0] & DATA_MASK) as u16) << 6 | (packet[1] & DATA_MASK) as u16;
        let instance = packet[2] & DATA_MASK;
        let raw = ((packet[3] & DATA_MASK) as u16) << 6 | (packet[4] & DATA_MASK) as u16;

        let Some(sensor) = SensorType::from_address(address) else {
            tracing::debug!("plx: unknown sensor address {}", address);
            return false;
        };

        let (value, unit) = convert(sensor, self.units.unit_for(sensor), raw);
        self.values.insert((sensor, instance), SensorValue { value, unit });

        if sensor == SensorType::WidebandAirFuel && instance == 0 {
            self.lambda = Some(convert(sensor, 0, raw).0);
        }
        true
    }

    /// AFR of the primary wideband when a fuel unit is configured
    fn afr(&self) -> Option<f64> {
        if self.units.wideband_air_fuel == 0 {
            return None;
        }
        self.sensor(SensorType::WidebandAirFuel, 0)
    }
}

impl Default for PlxDecoder {
    fn default() -> Self {
        Self::new(PlxUnits::default())
    }
}

impl Decoder for PlxDecoder {
    fn vendor(&self) -> Vendor {
        Vendor::Plx
    }

    fn feed(&mut self, data: &[u8]) -> FeedOutcome {
        let mut outcome = FeedOutcome::default();
        for &b in data {
            match b {
                START_BYTE => {
                    self.buffer.clear();
                    self.parsing = true;
                }
                STOP_BYTE => {
                    if self.parsing {
                        self.parsing = false;
                        self.parse_packets(&mut outcome);
                    }
                }
                _ if self.parsing => self.buffer.push(b),
                _ => {}
            }
        }
        outcome
    }

    fn reading(&self) -> Reading {
        self.reading
    }

    fn describe(&self) -> String {
        let mut out = String::from("-- PLX iMFD -----\n");
        for ((sensor, instance), v) in &self.values {
            out.push_str(&format!("{} #{}: {:.3} {}\n", sensor, instance, v.value, v.unit));
        }
        out.push_str(&"-".repeat(20));
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_packet() {
        let mut decoder = PlxDecoder::default();
        let outcome = decoder.feed(&[0x80, 0x00, 0x00, 0x00, 0x02, 0x01, 0x40]);
        assert_eq!(outcome.frames, 1);
        // raw = 2 << 6 | 1 = 129
        let expected = (129.0 / 3.75 + 68.0) / 100.0;
        assert!((decoder.lambda() - expected).abs() < 1e-9);
        assert_eq!(decoder.reading().status, LambdaStatus::Normal);
    }

    #[test]
    fn test_instance_keying() {
        let mut decoder = PlxDecoder::default();
        // instance 2, raw 1
        decoder.feed(&[0x80, 0x00, 0x00, 0x02, 0x00, 0x01, 0x40]);
        let value = decoder.sensor(SensorType::WidebandAirFuel, 2).unwrap();
        assert!((value - 0.68267).abs() < 1e-4);
        // lambda only follows instance 0
        assert_eq!(decoder.lambda(), 0.5);
    }

    #[test]
    fn test_multiple_sensors_and_units() {
        let mut decoder = PlxDecoder::default();
        let mut stream = vec![0x80];
        // RPM raw 100
        stream.extend_from_slice(&[0x00, 0x06, 0x00, 0x01, 0x24]);
        // vehicle speed raw 397, km/h by default
        stream.extend_from_slice(&[0x00, 0x07, 0x00, 0x06, 0x0D]);
        // timing raw 74
        stream.extend_from_slice(&[0x00, 0x0B, 0x00, 0x01, 0x0A]);
        stream.push(0x40);

        decoder.feed(&stream);
        assert_eq!(decoder.sensor_count(), 3);
        assert!((decoder.sensor(SensorType::Rpm, 0).unwrap() - 1955.0).abs() < 1e-9);
        assert!((decoder.sensor(SensorType::VehicleSpeed, 0).unwrap() - 100.0).abs() < 1e-9);
        assert!((decoder.sensor(SensorType::Timing, 0).unwrap() - 10.0).abs() < 1e-9);
        assert!(decoder.describe().contains("RPM (6) #0: 1955.000 RPM"));
    }

    #[test]
    fn test_upper_bits_ignored() {
        let mut decoder = PlxDecoder::default();
        decoder.feed(&[0x80, 0x00, 0xC0, 0x00, 0x02, 0x01, 0x40]);
        assert!(decoder.sensor(SensorType::WidebandAirFuel, 0).is_some());
    }

    #[test]
    fn test_empty_payload() {
        let mut decoder = PlxDecoder::default();
        let outcome = decoder.feed(&[0x80, 0x40]);
        assert_eq!(outcome.frames, 0);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_bad_payload_length() {
        let mut decoder = PlxDecoder::default();
        let outcome = decoder.feed(&[0x80, 0x00, 0x00, 0x00, 0x40]);
        assert_eq!(outcome.errors, vec![DecodeError::InvalidPayloadLength(3)]);
        assert_eq!(decoder.sensor_count(), 0);

        // next frame is unaffected
        let outcome = decoder.feed(&[0x80, 0x00, 0x00, 0x00, 0x02, 0x01, 0x40]);
        assert_eq!(outcome.frames, 1);
    }

    #[test]
    fn test_bytes_outside_frame_ignored() {
        let mut decoder = PlxDecoder::default();
        let outcome = decoder.feed(&[0x01, 0x02, 0x40, 0x03]);
        assert_eq!(outcome.frames, 0);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_fuel_unit_reports_afr() {
        let units = PlxUnits {
            wideband_air_fuel: 1,
            ..PlxUnits::default()
        };
        let mut decoder = PlxDecoder::new(units);
        decoder.feed(&[0x80, 0x00, 0x00, 0x00, 0x02, 0x01, 0x40]);
        let afr = decoder.reading().afr.unwrap();
        assert!((afr - (129.0 / 2.55 + 100.0) / 10.0).abs() < 1e-9);
        // lambda is still reported in λ
        assert!((decoder.lambda() - 1.024).abs() < 1e-9);
    }

    #[test]
    fn test_conversion_table() {
        assert!((convert(SensorType::ExhaustGasTemperature, 1, 100).0 - (100.0 / 0.555 + 32.0)).abs() < 1e-9);
        assert!((convert(SensorType::Vacuum, 0, 0).0 - 29.93).abs() < 1e-9);
        assert!((convert(SensorType::Boost, 0, 2273).0 - 100.0).abs() < 1e-9);
        assert!((convert(SensorType::ShortTermFuelTrim, 0, 90).0 + 10.0).abs() < 1e-9);
        assert!((convert(SensorType::VoltMeter, 0, 1023).0 - 20.0).abs() < 1e-9);
        assert_eq!(convert(SensorType::FuelEfficiency, 2, 0).0, 0.0);
        assert_eq!(SensorType::from_address(27), None);
    }

    fn plx_garbage() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(
            any::<u8>().prop_filter("framing byte", |b| *b != START_BYTE && *b != STOP_BYTE),
            0..64,
        )
    }

    proptest! {
        #[test]
        fn prop_packet_found_between_garbage(
            raw in 0u16..4096,
            prefix in plx_garbage(),
            suffix in plx_garbage(),
            split in 0usize..256,
        ) {
            let mut stream = prefix;
            stream.extend_from_slice(&[START_BYTE, 0x00, 0x00, 0x00]);
            stream.extend_from_slice(&[(raw >> 6) as u8, (raw & 0x3F) as u8, STOP_BYTE]);
            stream.extend(suffix);
            let split = split % (stream.len() + 1);

            let mut decoder = PlxDecoder::default();
            decoder.feed(&stream[..split]);
            decoder.feed(&stream[split..]);

            let expected = convert(SensorType::WidebandAirFuel, 0, raw).0;
            prop_assert!((decoder.lambda() - expected).abs() < 1e-9);
            prop_assert_eq!(decoder.sensor_count(), 1);
        }

        #[test]
        fn prop_unframed_bytes_never_emit(bytes in proptest::collection::vec(
            any::<u8>().prop_filter("start byte", |b| *b != START_BYTE),
            0..512,
        )) {
            let mut decoder = PlxDecoder::default();
            let outcome = decoder.feed(&bytes);
            prop_assert_eq!(outcome.frames, 0);
            prop_assert!(outcome.errors.is_empty());
            prop_assert_eq!(decoder.sensor_count(), 0);
        }
    }
}
