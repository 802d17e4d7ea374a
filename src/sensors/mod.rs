/// Sensor decoders and probe routines
pub mod bme280;
pub mod sht3x;

use std::fmt;
use std::str::FromStr;

use crate::bus::{BusError, BusTransport};

/// Decode failures: the bytes were delivered but cannot be interpreted.
///
/// These are terminal for the reading; none of them is retried.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The chip-identification register held a value that matches no
    /// supported variant. Carries the offending byte for diagnostics.
    UnknownChip(u8),
    /// The calibration block was shorter than the variant requires.
    CalibrationLength { expected: usize, actual: usize },
    /// The measurement burst was shorter than the variant requires.
    SampleLength { expected: usize, actual: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownChip(id) => write!(f, "unknown chip ID: 0x{:02X}", id),
            DecodeError::CalibrationLength { expected, actual } => {
                write!(f, "calibration block too short: {} of {} bytes", actual, expected)
            }
            DecodeError::SampleLength { expected, actual } => {
                write!(f, "measurement burst too short: {} of {} bytes", actual, expected)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// A probe failed either on the wire or while decoding what came back.
#[derive(Debug)]
pub enum ProbeError {
    Bus(BusError),
    Decode(DecodeError),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Bus(e) => e.fmt(f),
            ProbeError::Decode(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for ProbeError {}

impl From<BusError> for ProbeError {
    fn from(e: BusError) -> Self {
        ProbeError::Bus(e)
    }
}

impl From<DecodeError> for ProbeError {
    fn from(e: DecodeError) -> Self {
        ProbeError::Decode(e)
    }
}

/// Sensor families the diagnostics know how to probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Sht3x,
    Bme280,
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sht3x" => Ok(SensorKind::Sht3x),
            "bme280" => Ok(SensorKind::Bme280),
            other => Err(format!("unknown sensor kind '{}'", other)),
        }
    }
}

/// One entry of the configured sensor table.
#[derive(Debug, Clone)]
pub struct SensorSpec {
    pub name: String,
    pub channel: u8,
    pub address: u8,
    pub kind: SensorKind,
}

/// A decoded reading from either sensor family.
#[derive(Debug, Clone)]
pub enum SensorReading {
    Sht3x(sht3x::Sht3xReading),
    Environmental(bme280::CompensatedReading),
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorReading::Sht3x(r) => {
                write!(f, "Temp: {:.1}°C Hum: {:.1}%", r.temperature_c, r.humidity_pct)
            }
            SensorReading::Environmental(r) => {
                write!(f, "({}) Temp: {:.1}°C", r.chip.label(), r.temperature_c)?;
                if let Some(h) = r.humidity_pct {
                    write!(f, " Hum: {:.1}%", h)?;
                }
                write!(f, " Press: {:.1} hPa", r.pressure_hpa)
            }
        }
    }
}

/// Probe one sensor. The caller must already have selected its
/// multiplexer channel.
pub fn read_sensor(bus: &mut dyn BusTransport, spec: &SensorSpec) -> Result<SensorReading, ProbeError> {
    match spec.kind {
        SensorKind::Sht3x => sht3x::probe(bus, spec.address).map(SensorReading::Sht3x),
        SensorKind::Bme280 => bme280::probe(bus, spec.address).map(SensorReading::Environmental),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_kind_parses_known_names() {
        assert_eq!("sht3x".parse::<SensorKind>().unwrap(), SensorKind::Sht3x);
        assert_eq!("bme280".parse::<SensorKind>().unwrap(), SensorKind::Bme280);
        assert!("bmp180".parse::<SensorKind>().is_err());
    }

    #[test]
    fn decode_errors_render_the_detail() {
        let msg = DecodeError::UnknownChip(0x61).to_string();
        assert!(msg.contains("0x61"), "{}", msg);
        let msg = DecodeError::CalibrationLength { expected: 31, actual: 24 }.to_string();
        assert!(msg.contains("24") && msg.contains("31"), "{}", msg);
    }
}
