/// Diagnostic sequencing: run the hardware checks in order, honor the
/// critical-abort rule, and fold everything into a process exit code
use std::time::Instant;

use log::{error, info, warn};
use time::OffsetDateTime;
use url::Url;

use crate::bus::{mux, BusTransport, LinuxI2c};
use crate::config::{DiagConfig, OledSpec};
use crate::klipper;
use crate::models::{TestReport, TestStatus};
use crate::sensors::{read_sensor, SensorSpec};
use crate::utils::{celsius_to_fahrenheit, format_datetime};

const TEST_MULTIPLEXER: &str = "I2C Multiplexer";
const TEST_TEMPERATURE: &str = "Temperature Sensors";
const TEST_OLED: &str = "OLED Displays";
const TEST_KLIPPER: &str = "Klipper Motion Controller";

/// One entry of the static test table.
pub struct TestCase {
    pub name: &'static str,
    /// A failing critical test stops the remaining tests: nothing behind a
    /// dead multiplexer is reachable anyway.
    pub critical: bool,
}

/// The fixed test order. Extend this table to add diagnostics.
pub const TESTS: &[TestCase] = &[
    TestCase { name: TEST_MULTIPLEXER, critical: true },
    TestCase { name: TEST_TEMPERATURE, critical: false },
    TestCase { name: TEST_OLED, critical: false },
    TestCase { name: TEST_KLIPPER, critical: false },
];

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Skip the slow full-bus scan.
    pub quick: bool,
}

/// Exit code for a finished run: 0 only when nothing failed.
pub fn summarize(reports: &[TestReport]) -> i32 {
    let failed = reports
        .iter()
        .filter(|r| r.status == TestStatus::Fail)
        .count();
    if failed == 0 {
        0
    } else {
        1
    }
}

fn check_multiplexer(bus: &mut dyn BusTransport, mux_addr: u8, quick: bool) -> TestReport {
    let state = match mux::read_state(bus, mux_addr) {
        Ok(state) => state,
        Err(e) => {
            return TestReport::fail(
                TEST_MULTIPLEXER,
                format!("Multiplexer not found at 0x{:02X}", mux_addr),
                Some(e.to_string()),
            )
        }
    };
    info!("Multiplexer OK at 0x{:02X} (state: 0b{:08b})", mux_addr, state);

    if quick {
        return TestReport::pass(TEST_MULTIPLEXER, format!("Multiplexer OK at 0x{:02X}", mux_addr));
    }

    match mux::scan(bus, mux_addr) {
        Ok(channels) => {
            let total: usize = channels.iter().map(|devices| devices.len()).sum();
            let populated = channels.iter().filter(|devices| !devices.is_empty()).count();
            for (ch, devices) in channels.iter().enumerate() {
                if !devices.is_empty() {
                    let listing: Vec<String> =
                        devices.iter().map(|a| format!("0x{:02X}", a)).collect();
                    info!("Channel {}: {}", ch, listing.join(", "));
                }
            }
            TestReport::pass(
                TEST_MULTIPLEXER,
                format!(
                    "Multiplexer OK at 0x{:02X} | {} devices found across {} channels",
                    mux_addr, total, populated
                ),
            )
        }
        Err(e) => TestReport::fail(
            TEST_MULTIPLEXER,
            "Channel scan failed",
            Some(e.to_string()),
        ),
    }
}

fn check_temperature_sensors(
    bus: &mut dyn BusTransport,
    mux_addr: u8,
    sensors: &[SensorSpec],
) -> TestReport {
    let mut passed = 0;

    for spec in sensors {
        if let Err(e) = mux::select_channel(bus, mux_addr, spec.channel) {
            error!("{}: channel select failed: {}", spec.name, e);
            continue;
        }

        match read_sensor(bus, spec) {
            Ok(reading) => {
                passed += 1;
                info!("{}: {}", spec.name, reading);
                if let crate::sensors::SensorReading::Environmental(r) = &reading {
                    info!(
                        "{}: Temperature: {:.2}°C ({:.2}°F)",
                        spec.name,
                        r.temperature_c,
                        celsius_to_fahrenheit(r.temperature_c)
                    );
                }
            }
            Err(e) => error!("{}: ERROR - {}", spec.name, e),
        }
    }

    if let Err(e) = mux::disable_all(bus, mux_addr) {
        warn!("Failed to disable multiplexer channels: {}", e);
    }

    let message = format!("{}/{} sensors responding", passed, sensors.len());
    if passed == sensors.len() {
        TestReport::pass(TEST_TEMPERATURE, message)
    } else {
        TestReport::fail(TEST_TEMPERATURE, message, None)
    }
}

fn check_oled_displays(bus: &mut dyn BusTransport, mux_addr: u8, oleds: &[OledSpec]) -> TestReport {
    if oleds.is_empty() {
        return TestReport::skipped(TEST_OLED, "No OLED panels configured");
    }

    let mut passed = 0;

    for oled in oleds {
        if let Err(e) = mux::select_channel(bus, mux_addr, oled.channel) {
            error!("{}: channel select failed: {}", oled.name, e);
            continue;
        }
        match bus.read_byte(oled.address) {
            Ok(_) => {
                passed += 1;
                info!("{}: responding at 0x{:02X}", oled.name, oled.address);
            }
            Err(e) => error!("{}: not responding: {}", oled.name, e),
        }
    }

    if let Err(e) = mux::disable_all(bus, mux_addr) {
        warn!("Failed to disable multiplexer channels: {}", e);
    }

    let message = format!("{}/{} panels responding", passed, oleds.len());
    if passed == oleds.len() {
        TestReport::pass(TEST_OLED, message)
    } else {
        TestReport::fail(TEST_OLED, message, None)
    }
}

/// Run every test against an open bus, stopping after a critical failure.
async fn run_sequence(
    bus: &mut dyn BusTransport,
    mux_addr: u8,
    sensors: &[SensorSpec],
    oleds: &[OledSpec],
    moonraker_url: Option<&Url>,
    opts: &RunOptions,
) -> Vec<TestReport> {
    let mut reports = Vec::new();

    let report = check_multiplexer(bus, mux_addr, opts.quick);
    let critical_failed = report.status == TestStatus::Fail;
    reports.push(report);
    if critical_failed {
        error!("Critical test failed! Stopping diagnostics.");
        return reports;
    }

    reports.push(check_temperature_sensors(bus, mux_addr, sensors));
    reports.push(check_oled_displays(bus, mux_addr, oleds));

    reports.push(match moonraker_url {
        Some(url) => klipper::run_check(TEST_KLIPPER, url).await,
        None => TestReport::skipped(TEST_KLIPPER, "MOONRAKER_URL not set"),
    });

    reports
}

fn log_summary(reports: &[TestReport], elapsed_secs: f64) {
    let passed = reports.iter().filter(|r| r.status == TestStatus::Pass).count();
    let failed = reports.iter().filter(|r| r.status == TestStatus::Fail).count();
    let skipped = reports.iter().filter(|r| r.status == TestStatus::Skipped).count();

    info!("Diagnostic summary:");
    info!("  Tests run: {}", reports.len());
    info!("  Passed:    {}", passed);
    info!("  Failed:    {}", failed);
    if skipped > 0 {
        info!("  Skipped:   {}", skipped);
    }
    info!("  Duration:  {:.2}s", elapsed_secs);

    for report in reports {
        match report.status {
            TestStatus::Fail => {
                error!("  {} {}: {}", report.status, report.name, report.message);
                if let Some(detail) = &report.error {
                    error!("    Error: {}", detail);
                }
            }
            _ => info!("  {} {}: {}", report.status, report.name, report.message),
        }
    }

    if failed == 0 {
        info!("All critical systems operational");
    } else {
        error!("System has failures - check details above");
    }
}

/// Run the full diagnostic suite and return the process exit code.
pub async fn run_diagnostics(config: &DiagConfig, opts: &RunOptions) -> i32 {
    let started = Instant::now();
    info!(
        "System diagnostics started: {}",
        format_datetime(&OffsetDateTime::now_utc())
    );

    let mut bus = match LinuxI2c::open(config.i2c_bus) {
        Ok(bus) => bus,
        Err(e) => {
            error!("Failed to open I2C bus {}: {}", config.i2c_bus, e);
            let reports = vec![TestReport::fail(
                TEST_MULTIPLEXER,
                format!("I2C bus {} unavailable", config.i2c_bus),
                Some(e.to_string()),
            )];
            log_summary(&reports, started.elapsed().as_secs_f64());
            return summarize(&reports);
        }
    };

    let reports = run_sequence(
        &mut bus,
        config.mux_addr,
        &config.sensors,
        &config.oleds,
        config.moonraker_url.as_ref(),
        opts,
    )
    .await;

    log_summary(&reports, started.elapsed().as_secs_f64());
    summarize(&reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;
    use crate::sensors::SensorKind;

    const MUX: u8 = 0x70;

    fn sht31_spec() -> SensorSpec {
        SensorSpec {
            name: "SHT31".to_string(),
            channel: 0,
            address: 0x44,
            kind: SensorKind::Sht3x,
        }
    }

    fn seed_sht31(bus: &mut MockBus) {
        bus.registers
            .insert((0, 0x44, 0x00), vec![0x65, 0x44, 0x00, 0x5E, 0x5F, 0x00]);
    }

    #[test]
    fn summarize_is_zero_only_without_failures() {
        let pass = TestReport::pass("a", "ok");
        let fail = TestReport::fail("b", "broken", None);
        let skip = TestReport::skipped("c", "later");

        assert_eq!(summarize(&[pass.clone(), skip.clone()]), 0);
        assert_eq!(summarize(&[pass.clone(), fail.clone()]), 1);
        assert_eq!(summarize(&[fail]), 1);
        assert_eq!(summarize(&[]), 0);
    }

    #[test]
    fn multiplexer_check_passes_and_counts_devices() {
        let mut bus = MockBus::new(MUX);
        bus.present.insert((0, 0x44));
        bus.present.insert((1, 0x76));

        let report = check_multiplexer(&mut bus, MUX, false);
        assert_eq!(report.status, TestStatus::Pass);
        assert!(report.message.contains("2 devices"), "{}", report.message);
        assert!(report.message.contains("2 channels"), "{}", report.message);
    }

    #[test]
    fn multiplexer_check_skips_the_scan_in_quick_mode() {
        let mut bus = MockBus::new(MUX);
        let report = check_multiplexer(&mut bus, MUX, true);
        assert_eq!(report.status, TestStatus::Pass);
        // No channel-select writes happened.
        assert!(bus.writes.is_empty());
    }

    #[test]
    fn multiplexer_check_fails_when_absent() {
        let mut bus = MockBus::new(MUX);
        bus.mux_missing = true;
        let report = check_multiplexer(&mut bus, MUX, false);
        assert_eq!(report.status, TestStatus::Fail);
        assert!(report.error.is_some());
    }

    #[test]
    fn temperature_check_counts_responding_sensors() {
        let mut bus = MockBus::new(MUX);
        seed_sht31(&mut bus);

        let missing = SensorSpec {
            name: "BME280".to_string(),
            channel: 1,
            address: 0x76,
            kind: SensorKind::Bme280,
        };

        let report = check_temperature_sensors(&mut bus, MUX, &[sht31_spec(), missing]);
        assert_eq!(report.status, TestStatus::Fail);
        assert_eq!(report.message, "1/2 sensors responding");

        let report = check_temperature_sensors(&mut bus, MUX, &[sht31_spec()]);
        assert_eq!(report.status, TestStatus::Pass);
        assert_eq!(report.message, "1/1 sensors responding");
    }

    #[test]
    fn oled_check_reports_presence_and_skips_when_unconfigured() {
        let mut bus = MockBus::new(MUX);
        bus.present.insert((2, 0x3D));

        let panels = vec![
            OledSpec { name: "OLED_1".to_string(), channel: 2, address: 0x3D },
            OledSpec { name: "OLED_2".to_string(), channel: 3, address: 0x3C },
        ];
        let report = check_oled_displays(&mut bus, MUX, &panels);
        assert_eq!(report.status, TestStatus::Fail);
        assert_eq!(report.message, "1/2 panels responding");

        let report = check_oled_displays(&mut bus, MUX, &[]);
        assert_eq!(report.status, TestStatus::Skipped);
    }

    #[tokio::test]
    async fn critical_failure_stops_the_sequence() {
        let mut bus = MockBus::new(MUX);
        bus.mux_missing = true;

        let reports = run_sequence(
            &mut bus,
            MUX,
            &[sht31_spec()],
            &[],
            None,
            &RunOptions::default(),
        )
        .await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, TestStatus::Fail);
    }

    #[tokio::test]
    async fn full_sequence_runs_every_test() {
        let mut bus = MockBus::new(MUX);
        seed_sht31(&mut bus);

        let reports = run_sequence(
            &mut bus,
            MUX,
            &[sht31_spec()],
            &[],
            None,
            &RunOptions { quick: true },
        )
        .await;

        assert_eq!(reports.len(), 4);
        assert_eq!(reports[0].status, TestStatus::Pass);
        assert_eq!(reports[1].status, TestStatus::Pass);
        assert_eq!(reports[2].status, TestStatus::Skipped); // no panels
        assert_eq!(reports[3].status, TestStatus::Skipped); // no Moonraker URL
        assert_eq!(summarize(&reports), 0);
    }
}
