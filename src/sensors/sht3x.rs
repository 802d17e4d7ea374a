/// SHT3x temperature/humidity sensing: single-shot probe and frame decoding
use std::thread;
use std::time::Duration;

use crate::bus::BusTransport;
use crate::sensors::{DecodeError, ProbeError};

// Single-shot measurement, high repeatability, clock stretching disabled
// (Sensirion datasheet table 8: command 0x2400).
const CMD_MEASURE_MSB: u8 = 0x24;
const CMD_MEASURE_LSB: u8 = 0x00;

const FRAME_LEN: usize = 6;
const MEASUREMENT_DELAY_MS: u64 = 20;

/// One decoded SHT3x measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sht3xReading {
    pub temperature_c: f64,
    pub humidity_pct: f64,
}

/// Decode a 6-byte measurement frame.
///
/// Layout: temperature MSB/LSB, CRC, humidity MSB/LSB, CRC. Conversion per
/// the datasheet's linear formulas: T = -45 + 175 * raw / 65535,
/// RH = 100 * raw / 65535. The CRC bytes are not checked here.
pub fn decode(frame: &[u8]) -> Result<Sht3xReading, DecodeError> {
    if frame.len() < FRAME_LEN {
        return Err(DecodeError::SampleLength {
            expected: FRAME_LEN,
            actual: frame.len(),
        });
    }

    let temp_raw = ((frame[0] as u16) << 8) | frame[1] as u16;
    let hum_raw = ((frame[3] as u16) << 8) | frame[4] as u16;

    Ok(Sht3xReading {
        temperature_c: -45.0 + 175.0 * temp_raw as f64 / 65535.0,
        humidity_pct: 100.0 * hum_raw as f64 / 65535.0,
    })
}

/// Trigger a single-shot measurement and decode the result.
///
/// The caller must already have selected the sensor's multiplexer channel.
pub fn probe(bus: &mut dyn BusTransport, addr: u8) -> Result<Sht3xReading, ProbeError> {
    bus.write_reg(addr, CMD_MEASURE_MSB, CMD_MEASURE_LSB)?;
    thread::sleep(Duration::from_millis(MEASUREMENT_DELAY_MS));

    let mut frame = [0u8; FRAME_LEN];
    bus.read_block(addr, 0x00, &mut frame)?;
    Ok(decode(&frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;
    use crate::bus::mux;

    const EPS: f64 = 1e-9;

    #[test]
    fn decodes_a_measurement_frame() {
        let frame = [0x65, 0x44, 0x00, 0x5E, 0x5F, 0x00];
        let reading = decode(&frame).unwrap();
        assert!((reading.temperature_c - 24.225604638742652).abs() < EPS);
        assert!((reading.humidity_pct - 36.86427100022888).abs() < EPS);
    }

    #[test]
    fn full_scale_frame_hits_the_formula_endpoints() {
        let reading = decode(&[0xFF, 0xFF, 0x00, 0xFF, 0xFF, 0x00]).unwrap();
        assert!((reading.temperature_c - 130.0).abs() < EPS);
        assert!((reading.humidity_pct - 100.0).abs() < EPS);

        let reading = decode(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]).unwrap();
        assert!((reading.temperature_c + 45.0).abs() < EPS);
        assert!((reading.humidity_pct - 0.0).abs() < EPS);
    }

    #[test]
    fn short_frames_are_rejected() {
        assert_eq!(
            decode(&[0x65, 0x44, 0x00]),
            Err(DecodeError::SampleLength { expected: 6, actual: 3 })
        );
    }

    #[test]
    fn probe_issues_the_single_shot_command() {
        let mut bus = MockBus::new(0x70);
        mux::select_channel(&mut bus, 0x70, 0).unwrap();
        bus.registers
            .insert((0, 0x44, 0x00), vec![0x65, 0x44, 0x00, 0x5E, 0x5F, 0x00]);

        let reading = probe(&mut bus, 0x44).unwrap();
        assert!((reading.temperature_c - 24.225604638742652).abs() < EPS);

        assert!(bus
            .writes
            .iter()
            .any(|(_, a, p)| *a == 0x44 && p == &vec![CMD_MEASURE_MSB, CMD_MEASURE_LSB]));
    }
}
