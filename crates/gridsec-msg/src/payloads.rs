//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bus topic routing and payload codecs for field telemetry."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Payloads exchanged with the field devices over the publish/subscribe bus.
//!
//! Decoding is lenient about numeric representation (field firmware sends
//! `"12.5"` as often as `12.5`) but strict about shape: a payload either decodes
//! completely or not at all, so callers never apply a partial update.
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Area, BreakerStatus, Severity};
use crate::{PayloadError, Result};

/// Topic families the ingestor understands, matched on the topic suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `<root>/plant`: generation telemetry.
    Plant,
    /// `<root>/meter/data`: load telemetry.
    MeterData,
    /// `<root>/grid/control`: breaker status echo.
    GridControl,
    /// `<root>/meter/bill`: bill echo.
    MeterBill,
    /// `<root>/security/alert`: threat report from a field sensor.
    SecurityAlert,
}

impl Topic {
    /// Classify a concrete topic. Unknown topics return `None` and are ignored upstream.
    pub fn classify(topic: &str) -> Option<Self> {
        let topic = topic.trim_end_matches('/');
        if topic.ends_with("/meter/data") || topic == "meter/data" {
            Some(Topic::MeterData)
        } else if topic.ends_with("/meter/bill") || topic == "meter/bill" {
            Some(Topic::MeterBill)
        } else if topic.ends_with("/grid/control") || topic == "grid/control" {
            Some(Topic::GridControl)
        } else if topic.ends_with("/security/alert") || topic == "security/alert" {
            Some(Topic::SecurityAlert)
        } else if topic.ends_with("/plant") || topic == "plant" {
            Some(Topic::Plant)
        } else {
            None
        }
    }

    /// Short label used for metrics and logs.
    pub fn label(self) -> &'static str {
        match self {
            Topic::Plant => "plant",
            Topic::MeterData => "meter_data",
            Topic::GridControl => "grid_control",
            Topic::MeterBill => "meter_bill",
            Topic::SecurityAlert => "security_alert",
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(text)?)
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| de::Error::custom("number out of range")),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|err| de::Error::custom(format!("`{text}` is not numeric: {err}"))),
        other => Err(de::Error::custom(format!("expected a number, found {other}"))),
    }
}

fn lenient_opt_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => lenient_f64(value).map(Some).map_err(de::Error::custom),
    }
}

fn default_plant_status() -> String {
    "OK".to_owned()
}

fn ensure_finite(field: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PayloadError::InvalidField {
            field,
            reason: "value is not finite".into(),
        })
    }
}

/// Generation telemetry from the plant controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantReading {
    /// Generation power (MW).
    #[serde(default, deserialize_with = "lenient_f64")]
    pub gen: f64,
    /// Generator speed (rpm).
    #[serde(default, deserialize_with = "lenient_f64")]
    pub rpm: f64,
    /// Operational status.
    #[serde(default = "default_plant_status")]
    pub status: String,
    /// Bus voltage, when the controller reports it.
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub voltage: Option<f64>,
    /// Grid frequency, when the controller reports it.
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub frequency: Option<f64>,
}

impl PlantReading {
    /// Decode a plant payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let reading: Self = decode(payload)?;
        ensure_finite("gen", reading.gen)?;
        ensure_finite("rpm", reading.rpm)?;
        if let Some(voltage) = reading.voltage {
            ensure_finite("voltage", voltage)?;
        }
        if let Some(frequency) = reading.frequency {
            ensure_finite("frequency", frequency)?;
        }
        Ok(reading)
    }
}

/// Load telemetry from the smart meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    /// Load power (MW).
    #[serde(deserialize_with = "lenient_f64")]
    pub load: f64,
}

impl MeterReading {
    /// Decode a meter payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let reading: Self = decode(payload)?;
        ensure_finite("load", reading.load)?;
        Ok(reading)
    }
}

/// Breaker state echo. Either area may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BreakerReport {
    /// Area 1 breaker, if reported.
    #[serde(default)]
    pub area1: Option<BreakerStatus>,
    /// Area 2 breaker, if reported.
    #[serde(default)]
    pub area2: Option<BreakerStatus>,
}

impl BreakerReport {
    /// Decode a grid control echo.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        decode(payload)
    }

    /// Reported areas paired with their status.
    pub fn entries(&self) -> impl Iterator<Item = (Area, BreakerStatus)> + '_ {
        [(Area::Area1, self.area1), (Area::Area2, self.area2)]
            .into_iter()
            .filter_map(|(area, status)| status.map(|status| (area, status)))
    }
}

/// Bill echo published by the meter display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillReport {
    /// Bill amount.
    #[serde(deserialize_with = "lenient_f64")]
    pub bill: f64,
}

impl BillReport {
    /// Decode a bill payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let report: Self = decode(payload)?;
        ensure_finite("bill", report.bill)?;
        Ok(report)
    }

    /// Outbound bill update, rounded to cents.
    pub fn rounded(bill: f64) -> Self {
        Self {
            bill: (bill * 100.0).round() / 100.0,
        }
    }

    /// Encode for publishing.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::json!({ "bill": self.bill }).to_string().into_bytes()
    }
}

/// Threat report from a field sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    /// Broad category.
    pub category: String,
    /// Finer label.
    #[serde(default = "default_subcategory")]
    pub subcategory: String,
    /// Reported severity.
    pub severity: Severity,
    /// Optional explanation.
    #[serde(default)]
    pub explanation: Option<String>,
    /// Optional layer override.
    #[serde(default)]
    pub layer: Option<String>,
}

fn default_subcategory() -> String {
    "unspecified".to_owned()
}

impl SecurityAlert {
    /// Decode a security alert payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        decode(payload)
    }
}

/// Outbound breaker command: `{"area1": "ON"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerCommand {
    /// Target area.
    pub area: Area,
    /// Requested status.
    pub status: BreakerStatus,
}

impl BreakerCommand {
    /// Encode for publishing.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = serde_json::Map::new();
        body.insert(
            self.area.key().to_owned(),
            Value::String(self.status.to_string()),
        );
        Value::Object(body).to_string().into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_classified_by_suffix() {
        assert_eq!(Topic::classify("fyp_grid_99/plant"), Some(Topic::Plant));
        assert_eq!(Topic::classify("site/meter/data"), Some(Topic::MeterData));
        assert_eq!(Topic::classify("site/meter/bill"), Some(Topic::MeterBill));
        assert_eq!(Topic::classify("site/grid/control"), Some(Topic::GridControl));
        assert_eq!(Topic::classify("site/security/alert"), Some(Topic::SecurityAlert));
        assert_eq!(Topic::classify("site/weather"), None);
    }

    #[test]
    fn plant_accepts_numeric_strings_and_defaults() {
        let reading = PlantReading::decode(br#"{"gen": "512.5", "rpm": 3000}"#).unwrap();
        assert_eq!(reading.gen, 512.5);
        assert_eq!(reading.rpm, 3000.0);
        assert_eq!(reading.status, "OK");
        assert!(reading.voltage.is_none());

        let reading = PlantReading::decode(br#"{"voltage": 229.8, "frequency": null}"#).unwrap();
        assert_eq!(reading.gen, 0.0);
        assert_eq!(reading.voltage, Some(229.8));
        assert!(reading.frequency.is_none());
    }

    #[test]
    fn malformed_payloads_are_rejected_whole() {
        assert!(PlantReading::decode(b"{not json").is_err());
        assert!(PlantReading::decode(br#"{"gen": "fast"}"#).is_err());
        assert!(MeterReading::decode(br#"{"watts": 3}"#).is_err());
        assert!(MeterReading::decode(&[0xff, 0xfe]).is_err());
        assert!(BreakerReport::decode(br#"{"area1": "MAYBE"}"#).is_err());
    }

    #[test]
    fn breaker_report_lists_only_present_areas() {
        let report = BreakerReport::decode(br#"{"area2": "ON"}"#).unwrap();
        let entries: Vec<_> = report.entries().collect();
        assert_eq!(entries, vec![(Area::Area2, BreakerStatus::Energized)]);
    }

    #[test]
    fn outbound_payloads_use_bus_shapes() {
        let command = BreakerCommand {
            area: Area::Area1,
            status: BreakerStatus::DeEnergized,
        };
        let value: Value = serde_json::from_slice(&command.encode()).unwrap();
        assert_eq!(value, serde_json::json!({ "area1": "OFF" }));

        let bill: Value = serde_json::from_slice(&BillReport::rounded(12.3456).encode()).unwrap();
        assert_eq!(bill["bill"], 12.35);
    }

    #[test]
    fn alert_requires_known_severity() {
        let alert =
            SecurityAlert::decode(br#"{"category": "protocol", "severity": "HIGH"}"#);
        assert!(alert.is_err(), "severity is lowercase on the wire");
        let alert =
            SecurityAlert::decode(br#"{"category": "protocol", "severity": "high"}"#).unwrap();
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.subcategory, "unspecified");
    }
}
