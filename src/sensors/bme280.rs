/// BME280/BMP280 decoding: chip identification, calibration parsing, and
/// raw-to-engineering-units compensation
///
/// The compensation follows the double-precision formulas from the Bosch
/// BME280 datasheet (section 4.2.3) and its BMP280 counterpart: temperature
/// is computed first and yields the fine-resolution intermediate `t_fine`,
/// which both the pressure and humidity formulas consume. The decode itself
/// is pure; all I/O lives in [`probe`].
use std::thread;
use std::time::Duration;

use log::debug;

use crate::bus::BusTransport;
use crate::sensors::{DecodeError, ProbeError};

/// Chip-ID register values (datasheet register 0xD0).
pub const CHIP_ID_BME280: u8 = 0x60;
pub const CHIP_ID_BMP280: u8 = 0x58;

// Register map shared by both variants.
const REG_CHIP_ID: u8 = 0xD0;
const REG_RESET: u8 = 0xE0;
const REG_CALIB_TEMP_PRESS: u8 = 0x88;
const REG_CALIB_HUMIDITY: u8 = 0xE1;
const REG_CTRL_HUM: u8 = 0xF2;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_CONFIG: u8 = 0xF5;
const REG_DATA: u8 = 0xF7;

const CMD_SOFT_RESET: u8 = 0xB6;
// Temperature and pressure oversampling x1, normal mode.
const CTRL_MEAS_NORMAL_X1: u8 = 0x27;
// Standby 1000 ms, IIR filter off.
const CONFIG_STANDBY_1000MS: u8 = 0xA0;
// Humidity oversampling x1.
const CTRL_HUM_X1: u8 = 0x01;

/// Temperature+pressure calibration block length (registers 0x88-0x9F).
pub const CALIB_TEMP_PRESS_LEN: usize = 24;
/// Humidity calibration block length (registers 0xE1-0xE7).
pub const CALIB_HUMIDITY_LEN: usize = 7;

const RESET_DELAY_MS: u64 = 10;
const MEASUREMENT_DELAY_MS: u64 = 100;

/// Sensor variant, resolved from the chip-ID register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipVariant {
    /// Temperature, pressure, and humidity.
    Bme280,
    /// Temperature and pressure only.
    Bmp280,
}

impl ChipVariant {
    /// Map a chip-ID byte to a variant.
    ///
    /// This is one-shot identification, not a transient fault: anything
    /// other than 0x60 or 0x58 fails immediately with the offending byte.
    pub fn resolve(chip_id: u8) -> Result<Self, DecodeError> {
        match chip_id {
            CHIP_ID_BME280 => Ok(ChipVariant::Bme280),
            CHIP_ID_BMP280 => Ok(ChipVariant::Bmp280),
            other => Err(DecodeError::UnknownChip(other)),
        }
    }

    pub fn has_humidity(self) -> bool {
        matches!(self, ChipVariant::Bme280)
    }

    pub fn label(self) -> &'static str {
        match self {
            ChipVariant::Bme280 => "BME280",
            ChipVariant::Bmp280 => "BMP280",
        }
    }

    fn calibration_len(self) -> usize {
        match self {
            ChipVariant::Bme280 => CALIB_TEMP_PRESS_LEN + CALIB_HUMIDITY_LEN,
            ChipVariant::Bmp280 => CALIB_TEMP_PRESS_LEN,
        }
    }

    fn burst_len(self) -> usize {
        match self {
            ChipVariant::Bme280 => 8,
            ChipVariant::Bmp280 => 6,
        }
    }
}

/// Factory calibration coefficients, read once per sensor session.
///
/// Valid only for the device the block was read from; never mutated after
/// parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationSet {
    pub dig_t1: u16,
    pub dig_t2: i16,
    pub dig_t3: i16,
    pub dig_p1: u16,
    pub dig_p2: i16,
    pub dig_p3: i16,
    pub dig_p4: i16,
    pub dig_p5: i16,
    pub dig_p6: i16,
    pub dig_p7: i16,
    pub dig_p8: i16,
    pub dig_p9: i16,
    pub dig_h1: u8,
    pub dig_h2: i16,
    pub dig_h3: u8,
    /// 12-bit unsigned, nibble-packed (see [`CalibrationSet::parse`]).
    pub dig_h4: u16,
    /// 12-bit unsigned, nibble-packed (see [`CalibrationSet::parse`]).
    pub dig_h5: u16,
    pub dig_h6: i8,
}

impl CalibrationSet {
    /// Parse the calibration bytes for the given variant.
    ///
    /// Expects the 24-byte temperature/pressure block (registers 0x88-0x9F,
    /// little-endian 16-bit fields) followed, for the BME280, by the 7-byte
    /// humidity block read at 0xE1. The humidity block is the error-prone
    /// part: dig_H4 and dig_H5 are 12-bit values sharing a middle byte,
    ///
    ///   dig_H4 = byte[28] << 4 | byte[29] & 0x0F   (low nibble)
    ///   dig_H5 = byte[30] << 4 | byte[29] >> 4     (high nibble)
    ///
    /// and the burst's final byte also supplies dig_H6 as a signed 8-bit
    /// value. Only the length is validated; coefficient values are taken
    /// as-is.
    pub fn parse(variant: ChipVariant, bytes: &[u8]) -> Result<Self, DecodeError> {
        let expected = variant.calibration_len();
        if bytes.len() < expected {
            return Err(DecodeError::CalibrationLength {
                expected,
                actual: bytes.len(),
            });
        }

        let mut cal = CalibrationSet {
            dig_t1: u16::from_le_bytes([bytes[0], bytes[1]]),
            dig_t2: i16::from_le_bytes([bytes[2], bytes[3]]),
            dig_t3: i16::from_le_bytes([bytes[4], bytes[5]]),
            dig_p1: u16::from_le_bytes([bytes[6], bytes[7]]),
            dig_p2: i16::from_le_bytes([bytes[8], bytes[9]]),
            dig_p3: i16::from_le_bytes([bytes[10], bytes[11]]),
            dig_p4: i16::from_le_bytes([bytes[12], bytes[13]]),
            dig_p5: i16::from_le_bytes([bytes[14], bytes[15]]),
            dig_p6: i16::from_le_bytes([bytes[16], bytes[17]]),
            dig_p7: i16::from_le_bytes([bytes[18], bytes[19]]),
            dig_p8: i16::from_le_bytes([bytes[20], bytes[21]]),
            dig_p9: i16::from_le_bytes([bytes[22], bytes[23]]),
            ..Default::default()
        };

        if variant.has_humidity() {
            cal.dig_h1 = bytes[24];
            cal.dig_h2 = i16::from_le_bytes([bytes[25], bytes[26]]);
            cal.dig_h3 = bytes[27];
            cal.dig_h4 = ((bytes[28] as u16) << 4) | (bytes[29] as u16 & 0x0F);
            cal.dig_h5 = ((bytes[30] as u16) << 4) | (bytes[29] as u16 >> 4);
            cal.dig_h6 = bytes[30] as i8;
        }

        Ok(cal)
    }
}

/// Raw ADC counts from one measurement burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    /// 20-bit pressure reading.
    pub pressure: u32,
    /// 20-bit temperature reading.
    pub temperature: u32,
    /// 16-bit humidity reading; BME280 only.
    pub humidity: Option<u16>,
}

impl RawSample {
    /// Unpack the burst read at register 0xF7: three bytes of pressure,
    /// three of temperature (both 20-bit, big-endian, top-aligned in the
    /// third byte), and for the BME280 two bytes of humidity.
    pub fn from_burst(variant: ChipVariant, bytes: &[u8]) -> Result<Self, DecodeError> {
        let expected = variant.burst_len();
        if bytes.len() < expected {
            return Err(DecodeError::SampleLength {
                expected,
                actual: bytes.len(),
            });
        }

        let pressure =
            ((bytes[0] as u32) << 12) | ((bytes[1] as u32) << 4) | ((bytes[2] as u32) >> 4);
        let temperature =
            ((bytes[3] as u32) << 12) | ((bytes[4] as u32) << 4) | ((bytes[5] as u32) >> 4);
        let humidity = if variant.has_humidity() {
            Some(((bytes[6] as u16) << 8) | bytes[7] as u16)
        } else {
            None
        };

        Ok(RawSample {
            pressure,
            temperature,
            humidity,
        })
    }
}

/// One compensated measurement in engineering units.
#[derive(Debug, Clone, Copy)]
pub struct CompensatedReading {
    pub chip: ChipVariant,
    pub temperature_c: f64,
    pub pressure_hpa: f64,
    /// Populated for the BME280 only, clamped to [0, 100].
    pub humidity_pct: Option<f64>,
}

/// Apply the datasheet compensation formulas to one raw sample.
///
/// Temperature is evaluated first; the truncated intermediate `t_fine` it
/// produces is computed exactly once and fed to both the pressure and
/// humidity stages, matching the cross-term dependency the datasheet
/// specifies. The function is a pure transform: no I/O, no retained state.
pub fn compensate(variant: ChipVariant, cal: &CalibrationSet, raw: &RawSample) -> CompensatedReading {
    let adc_t = raw.temperature as f64;
    let var1 = ((adc_t / 16384.0) - (cal.dig_t1 as f64 / 1024.0)) * cal.dig_t2 as f64;
    let delta = (adc_t / 131072.0) - (cal.dig_t1 as f64 / 8192.0);
    let var2 = delta * delta * cal.dig_t3 as f64;
    let t_fine = (var1 + var2) as i32;
    let temperature_c = (var1 + var2) / 5120.0;

    let pressure_hpa = compensate_pressure(cal, raw.pressure, t_fine);

    let humidity_pct = if variant.has_humidity() {
        raw.humidity.map(|adc_h| compensate_humidity(cal, adc_h, t_fine))
    } else {
        None
    };

    CompensatedReading {
        chip: variant,
        temperature_c,
        pressure_hpa,
        humidity_pct,
    }
}

fn compensate_pressure(cal: &CalibrationSet, adc_p: u32, t_fine: i32) -> f64 {
    let var1 = (t_fine as f64 / 2.0) - 64000.0;
    let mut var2 = var1 * var1 * cal.dig_p6 as f64 / 32768.0;
    var2 += var1 * cal.dig_p5 as f64 * 2.0;
    var2 = (var2 / 4.0) + (cal.dig_p4 as f64 * 65536.0);
    let var1 = (cal.dig_p3 as f64 * var1 * var1 / 524288.0 + cal.dig_p2 as f64 * var1) / 524288.0;
    let var1 = (1.0 + var1 / 32768.0) * cal.dig_p1 as f64;

    // Degraded-output policy from the datasheet's reference code: a zero
    // denominator reports 0 hPa instead of dividing.
    if var1 == 0.0 {
        return 0.0;
    }

    let p = 1048576.0 - adc_p as f64;
    let p = ((p - var2 / 4096.0) * 6250.0) / var1;
    let var1 = cal.dig_p9 as f64 * p * p / 2147483648.0;
    let var2 = p * cal.dig_p8 as f64 / 32768.0;
    (p + (var1 + var2 + cal.dig_p7 as f64) / 16.0) / 100.0
}

fn compensate_humidity(cal: &CalibrationSet, adc_h: u16, t_fine: i32) -> f64 {
    let h = t_fine as f64 - 76800.0;
    let h = (adc_h as f64 - (cal.dig_h4 as f64 * 64.0 + cal.dig_h5 as f64 / 16384.0 * h))
        * (cal.dig_h2 as f64 / 65536.0
            * (1.0
                + cal.dig_h6 as f64 / 67108864.0
                    * h
                    * (1.0 + cal.dig_h3 as f64 / 67108864.0 * h)));
    let h = h * (1.0 - cal.dig_h1 as f64 * h / 524288.0);
    // Fixed-point calibration noise can push the raw result slightly past
    // either bound.
    h.clamp(0.0, 100.0)
}

/// Full probe sequence against a live device: identify, reset, read
/// calibration, configure, wait, read one burst, decode.
///
/// The caller must already have selected the sensor's multiplexer channel
/// and must keep the bus until this returns.
pub fn probe(bus: &mut dyn BusTransport, addr: u8) -> Result<CompensatedReading, ProbeError> {
    let chip_id = bus.read_reg(addr, REG_CHIP_ID)?;
    let variant = ChipVariant::resolve(chip_id)?;
    debug!("Found {} at 0x{:02X}", variant.label(), addr);

    bus.write_reg(addr, REG_RESET, CMD_SOFT_RESET)?;
    thread::sleep(Duration::from_millis(RESET_DELAY_MS));

    let mut cal_bytes = vec![0u8; variant.calibration_len()];
    bus.read_block(addr, REG_CALIB_TEMP_PRESS, &mut cal_bytes[..CALIB_TEMP_PRESS_LEN])?;
    if variant.has_humidity() {
        bus.read_block(addr, REG_CALIB_HUMIDITY, &mut cal_bytes[CALIB_TEMP_PRESS_LEN..])?;
    }
    let cal = CalibrationSet::parse(variant, &cal_bytes)?;

    if variant.has_humidity() {
        bus.write_reg(addr, REG_CTRL_HUM, CTRL_HUM_X1)?;
    }
    bus.write_reg(addr, REG_CTRL_MEAS, CTRL_MEAS_NORMAL_X1)?;
    bus.write_reg(addr, REG_CONFIG, CONFIG_STANDBY_1000MS)?;
    thread::sleep(Duration::from_millis(MEASUREMENT_DELAY_MS));

    let mut burst = vec![0u8; variant.burst_len()];
    bus.read_block(addr, REG_DATA, &mut burst)?;
    let raw = RawSample::from_burst(variant, &burst)?;

    Ok(compensate(variant, &cal, &raw))
}
