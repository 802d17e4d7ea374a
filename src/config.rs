use std::env;

use url::Url;

use crate::sensors::SensorSpec;

// Defaults matching the bench wiring: SHT31 on channel 0, BME280/BMP280 on
// channel 1, two OLED panels on channels 2 and 3.
const DEFAULT_I2C_BUS: u8 = 1;
const DEFAULT_MUX_ADDR: u8 = 0x70;
const DEFAULT_SENSORS: &str = "SHT31:0:0x44:sht3x,BME280:1:0x76:bme280";
const DEFAULT_OLEDS: &str = "OLED_1:2:0x3D,OLED_2:3:0x3C";

/// An OLED panel reachable behind the multiplexer.
#[derive(Debug, Clone)]
pub struct OledSpec {
    pub name: String,
    pub channel: u8,
    pub address: u8,
}

#[derive(Debug, Clone)]
pub struct DiagConfig {
    pub i2c_bus: u8,
    pub mux_addr: u8,
    pub sensors: Vec<SensorSpec>,
    pub oleds: Vec<OledSpec>,
    /// Moonraker base URL; the Klipper check is skipped when unset.
    pub moonraker_url: Option<Url>,
}

impl DiagConfig {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();

        let i2c_bus = match env::var("DIAG_I2C_BUS") {
            Ok(v) => v
                .parse::<u8>()
                .map_err(|_| format!("DIAG_I2C_BUS is not a bus number: '{}'", v))?,
            Err(_) => DEFAULT_I2C_BUS,
        };

        let mux_addr = match env::var("DIAG_MUX_ADDR") {
            Ok(v) => parse_addr(&v)?,
            Err(_) => DEFAULT_MUX_ADDR,
        };

        let sensors_var = env::var("DIAG_SENSORS").unwrap_or_else(|_| DEFAULT_SENSORS.to_string());
        let sensors = parse_sensor_table(&sensors_var)?;
        if sensors.is_empty() {
            return Err("No sensors configured. Set DIAG_SENSORS to \
                        name:channel:address:kind entries"
                .into());
        }

        let oleds_var = env::var("DIAG_OLEDS").unwrap_or_else(|_| DEFAULT_OLEDS.to_string());
        let oleds = parse_oled_table(&oleds_var)?;

        let moonraker_url = match env::var("MOONRAKER_URL") {
            Ok(v) if !v.trim().is_empty() => {
                Some(Url::parse(v.trim()).map_err(|e| format!("MOONRAKER_URL invalid: {}", e))?)
            }
            _ => None,
        };

        Ok(DiagConfig {
            i2c_bus,
            mux_addr,
            sensors,
            oleds,
            moonraker_url,
        })
    }
}

/// Parse a 7-bit device address, accepting "0x44" or plain decimal.
fn parse_addr(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else {
        s.parse::<u8>()
    };
    parsed.map_err(|_| format!("invalid I2C address: '{}'", s))
}

/// Parse comma-separated `name:channel:address:kind` sensor entries.
fn parse_sensor_table(value: &str) -> Result<Vec<SensorSpec>, String> {
    let mut sensors = Vec::new();

    for entry in value.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let fields: Vec<&str> = entry.split(':').collect();
        if fields.len() != 4 {
            return Err(format!(
                "sensor entry '{}' must be name:channel:address:kind",
                entry
            ));
        }

        let channel = fields[1]
            .trim()
            .parse::<u8>()
            .map_err(|_| format!("sensor entry '{}': bad channel", entry))?;
        let address = parse_addr(fields[2])?;
        let kind = fields[3]
            .trim()
            .parse()
            .map_err(|e| format!("sensor entry '{}': {}", entry, e))?;

        sensors.push(SensorSpec {
            name: fields[0].trim().to_string(),
            channel,
            address,
            kind,
        });
    }

    Ok(sensors)
}

/// Parse comma-separated `name:channel:address` OLED entries.
fn parse_oled_table(value: &str) -> Result<Vec<OledSpec>, String> {
    let mut oleds = Vec::new();

    for entry in value.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let fields: Vec<&str> = entry.split(':').collect();
        if fields.len() != 3 {
            return Err(format!("OLED entry '{}' must be name:channel:address", entry));
        }

        let channel = fields[1]
            .trim()
            .parse::<u8>()
            .map_err(|_| format!("OLED entry '{}': bad channel", entry))?;
        let address = parse_addr(fields[2])?;

        oleds.push(OledSpec {
            name: fields[0].trim().to_string(),
            channel,
            address,
        });
    }

    Ok(oleds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorKind;

    #[test]
    fn parses_hex_and_decimal_addresses() {
        assert_eq!(parse_addr("0x44").unwrap(), 0x44);
        assert_eq!(parse_addr("0X76").unwrap(), 0x76);
        assert_eq!(parse_addr("118").unwrap(), 118);
        assert!(parse_addr("zz").is_err());
        assert!(parse_addr("0x").is_err());
    }

    #[test]
    fn parses_the_default_sensor_table() {
        let sensors = parse_sensor_table(DEFAULT_SENSORS).unwrap();
        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0].name, "SHT31");
        assert_eq!(sensors[0].channel, 0);
        assert_eq!(sensors[0].address, 0x44);
        assert_eq!(sensors[0].kind, SensorKind::Sht3x);
        assert_eq!(sensors[1].kind, SensorKind::Bme280);
    }

    #[test]
    fn sensor_table_rejects_malformed_entries() {
        assert!(parse_sensor_table("BME280:1:0x76").is_err());
        assert!(parse_sensor_table("BME280:one:0x76:bme280").is_err());
        assert!(parse_sensor_table("BME280:1:0x76:dht22").is_err());
    }

    #[test]
    fn sensor_table_skips_empty_entries() {
        let sensors = parse_sensor_table(" ,SHT31:0:0x44:sht3x, ").unwrap();
        assert_eq!(sensors.len(), 1);
    }

    #[test]
    fn parses_the_default_oled_table() {
        let oleds = parse_oled_table(DEFAULT_OLEDS).unwrap();
        assert_eq!(oleds.len(), 2);
        assert_eq!(oleds[0].address, 0x3D);
        assert_eq!(oleds[1].channel, 3);
    }
}
