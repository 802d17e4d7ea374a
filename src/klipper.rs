/// Klipper/Moonraker motion-controller health check over HTTP
use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;
use url::Url;

use crate::models::TestReport;

const REQUEST_TIMEOUT_SECS: u64 = 2;

// Firmware-version query; safe to send regardless of printer state.
const GCODE_FIRMWARE_INFO: &str = "M115";

#[derive(Debug, Deserialize)]
pub struct PrinterInfoResponse {
    pub result: PrinterInfo,
}

#[derive(Debug, Deserialize)]
pub struct PrinterInfo {
    pub state: String,
    #[serde(default)]
    pub state_message: String,
}

#[derive(Debug, Deserialize)]
struct ObjectsListResponse {
    result: ObjectsList,
}

#[derive(Debug, Deserialize)]
struct ObjectsList {
    objects: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectsQueryResponse {
    result: ObjectsQuery,
}

#[derive(Debug, Deserialize)]
struct ObjectsQuery {
    status: std::collections::HashMap<String, McuStatus>,
}

#[derive(Debug, Deserialize)]
pub struct McuStatus {
    #[serde(default)]
    pub mcu_version: Option<String>,
}

pub struct KlipperClient {
    base: String,
    http: reqwest::Client,
}

impl KlipperClient {
    pub fn new(base: &Url) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(KlipperClient {
            base: base.as_str().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// GET /printer/info: Klipper state and state message.
    pub async fn printer_info(&self) -> Result<PrinterInfo, reqwest::Error> {
        let response = self
            .http
            .get(format!("{}/printer/info", self.base))
            .send()
            .await?
            .error_for_status()?
            .json::<PrinterInfoResponse>()
            .await?;
        Ok(response.result)
    }

    /// Query every `mcu*` object and return "name: vVERSION" strings.
    pub async fn mcu_versions(&self) -> Result<Vec<String>, reqwest::Error> {
        let listed = self
            .http
            .get(format!("{}/printer/objects/list", self.base))
            .send()
            .await?
            .error_for_status()?
            .json::<ObjectsListResponse>()
            .await?;

        let mcu_objects: Vec<String> = listed
            .result
            .objects
            .into_iter()
            .filter(|name| name.starts_with("mcu"))
            .collect();
        if mcu_objects.is_empty() {
            return Ok(Vec::new());
        }

        let query = mcu_objects.join("&");
        let status = self
            .http
            .get(format!("{}/printer/objects/query?{}", self.base, query))
            .send()
            .await?
            .error_for_status()?
            .json::<ObjectsQueryResponse>()
            .await?;

        let mut versions: Vec<String> = status
            .result
            .status
            .into_iter()
            .map(|(name, mcu)| {
                format!(
                    "{}: v{}",
                    name,
                    mcu.mcu_version.unwrap_or_else(|| "unknown".to_string())
                )
            })
            .collect();
        versions.sort();
        Ok(versions)
    }

    /// POST a G-code script to /printer/gcode/script.
    pub async fn send_gcode(&self, script: &str) -> Result<(), reqwest::Error> {
        self.http
            .post(format!("{}/printer/gcode/script", self.base))
            .json(&serde_json::json!({ "script": script }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Run the full Moonraker health check and fold the outcome into a report:
/// connection, Klipper state, MCU inventory, and a safe G-code round trip.
pub async fn run_check(name: &str, url: &Url) -> TestReport {
    let client = match KlipperClient::new(url) {
        Ok(client) => client,
        Err(e) => return TestReport::fail(name, "HTTP client setup failed", Some(e.to_string())),
    };

    let info = match client.printer_info().await {
        Ok(info) => info,
        Err(e) => {
            return TestReport::fail(
                name,
                format!("Moonraker unreachable at {}", url),
                Some(e.to_string()),
            )
        }
    };
    debug!("Klipper state: {}", info.state);

    if info.state != "ready" {
        let mut message = format!("Klipper state: {}", info.state);
        if !info.state_message.is_empty() {
            message.push_str(&format!(" ({})", info.state_message));
        }
        return TestReport::fail(name, message, None);
    }

    let mcus = match client.mcu_versions().await {
        Ok(mcus) if mcus.is_empty() => {
            return TestReport::fail(name, "No MCU objects found in Klipper config", None)
        }
        Ok(mcus) => mcus,
        Err(e) => return TestReport::fail(name, "MCU query failed", Some(e.to_string())),
    };

    let mut message = format!("Klipper ready | {}", mcus.join(", "));
    if let Err(e) = client.send_gcode(GCODE_FIRMWARE_INFO).await {
        warn!("G-code send failed: {}", e);
        message.push_str(" (G-code send failed)");
    }

    TestReport::pass(name, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_printer_info() {
        let body = r#"{"result":{"state":"ready","state_message":"Printer is ready",
                       "hostname":"octopus","software_version":"v0.12.0-89"}}"#;
        let parsed: PrinterInfoResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.result.state, "ready");
        assert_eq!(parsed.result.state_message, "Printer is ready");
    }

    #[test]
    fn state_message_defaults_to_empty() {
        let parsed: PrinterInfoResponse =
            serde_json::from_str(r#"{"result":{"state":"shutdown"}}"#).unwrap();
        assert_eq!(parsed.result.state, "shutdown");
        assert!(parsed.result.state_message.is_empty());
    }

    #[test]
    fn parses_the_object_list() {
        let body = r#"{"result":{"objects":["webhooks","mcu","mcu rpi","gcode_move"]}}"#;
        let parsed: ObjectsListResponse = serde_json::from_str(body).unwrap();
        let mcus: Vec<&String> = parsed
            .result
            .objects
            .iter()
            .filter(|name| name.starts_with("mcu"))
            .collect();
        assert_eq!(mcus, ["mcu", "mcu rpi"]);
    }

    #[test]
    fn parses_mcu_status_with_and_without_version() {
        let body = r#"{"result":{"status":{
            "mcu":{"mcu_version":"v0.12.0-89","last_stats":{"mcu_task_avg":0.01}},
            "mcu rpi":{}
        }}}"#;
        let parsed: ObjectsQueryResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.result.status["mcu"].mcu_version.as_deref(),
            Some("v0.12.0-89")
        );
        assert!(parsed.result.status["mcu rpi"].mcu_version.is_none());
    }
}
