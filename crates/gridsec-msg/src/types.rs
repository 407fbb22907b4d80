//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared data model and bus payload codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::records::ThreatEvent;

/// Upper bound of the attack score.
pub const MAX_ATTACK_SCORE: f64 = 100.0;

const ELEVATED_THRESHOLD: f64 = 40.0;
const CRITICAL_THRESHOLD: f64 = 70.0;

/// Energisation state of a controllable grid segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum BreakerStatus {
    /// Segment is supplied.
    #[serde(rename = "ON", alias = "on")]
    #[strum(serialize = "ON", ascii_case_insensitive)]
    Energized,
    /// Segment is isolated.
    #[serde(rename = "OFF", alias = "off")]
    #[strum(serialize = "OFF", ascii_case_insensitive)]
    DeEnergized,
}

impl BreakerStatus {
    /// Logical inverse used by toggle commands.
    pub fn toggled(self) -> Self {
        match self {
            BreakerStatus::Energized => BreakerStatus::DeEnergized,
            BreakerStatus::DeEnergized => BreakerStatus::Energized,
        }
    }

    /// Returns true when the segment is supplied.
    pub fn is_energized(self) -> bool {
        matches!(self, BreakerStatus::Energized)
    }
}

/// Controllable grid segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Area {
    /// First load area.
    #[strum(serialize = "area1")]
    Area1,
    /// Second load area.
    #[strum(serialize = "area2")]
    Area2,
}

impl Area {
    /// Key used for this area in bus payloads and the state record.
    pub fn key(self) -> &'static str {
        match self {
            Area::Area1 => "area1",
            Area::Area2 => "area2",
        }
    }
}

/// Qualitative security posture derived from the attack score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, Default)]
pub enum SecurityLevel {
    /// Score below 40.
    #[default]
    #[serde(rename = "NORMAL")]
    #[strum(serialize = "NORMAL")]
    Normal,
    /// Score within [40, 70).
    #[serde(rename = "WARNING", alias = "ELEVATED")]
    #[strum(serialize = "WARNING")]
    Elevated,
    /// Score of 70 or more.
    #[serde(rename = "CRITICAL")]
    #[strum(serialize = "CRITICAL")]
    Critical,
}

impl SecurityLevel {
    /// Map a score onto its level. No hysteresis is applied, so a score
    /// oscillating around a threshold flips the level on every crossing.
    pub fn from_score(score: f64) -> Self {
        if score >= CRITICAL_THRESHOLD {
            SecurityLevel::Critical
        } else if score >= ELEVATED_THRESHOLD {
            SecurityLevel::Elevated
        } else {
            SecurityLevel::Normal
        }
    }
}

/// Ordered threat severity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Severity {
    /// +5 points.
    Low,
    /// +15 points.
    Medium,
    /// +30 points.
    High,
    /// +50 points.
    Critical,
}

impl Severity {
    /// All severities in ascending order.
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Attack score increment applied when an event of this severity is scored.
    pub fn score_weight(self) -> f64 {
        match self {
            Severity::Low => 5.0,
            Severity::Medium => 15.0,
            Severity::High => 30.0,
            Severity::Critical => 50.0,
        }
    }
}

/// Aggregate inspection counters maintained by the scoring engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SecurityCounters {
    /// Messages/packets inspected since startup.
    pub total_inspected: u64,
    /// Threats blocked since startup.
    pub total_blocked: u64,
    /// Blocks attributed to threat-intel indicators.
    pub threat_intel_blocks: u64,
}

/// The single shared state record. Field names match what dashboard observers consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    /// Generation power (MW).
    pub gen_mw: f64,
    /// Generator speed (rpm).
    pub gen_rpm: f64,
    /// Plant operational status reported by the hardware.
    pub status: String,
    /// Load power (MW).
    pub load_mw: f64,
    /// Bus voltage (V).
    pub voltage: f64,
    /// Grid frequency (Hz).
    pub frequency: f64,
    /// Area 1 breaker.
    pub area1: BreakerStatus,
    /// Area 2 breaker.
    pub area2: BreakerStatus,
    /// Accumulated bill. Never decreases.
    pub calculated_bill: f64,
    /// Current price rate.
    pub price_rate: f64,
    /// Attack score within [0, 100].
    pub attack_score: f64,
    /// Always equal to `SecurityLevel::from_score(attack_score)`.
    pub security_level: SecurityLevel,
    /// Operator lock flag.
    pub system_locked: bool,
    /// Connectivity of the hardware/ingestion link.
    pub mqtt_connected: bool,
    /// Whether threat-intel filtering is active.
    pub threat_intel_active: bool,
    /// Time of the last accepted update.
    pub last_update: Option<DateTime<Utc>>,
    /// Inspection counters.
    #[serde(rename = "security_stats")]
    pub security: SecurityCounters,
}

impl SystemState {
    /// Initial record before any telemetry arrives.
    pub fn new(price_rate: f64) -> Self {
        Self {
            gen_mw: 0.0,
            gen_rpm: 0.0,
            status: "WAITING".to_owned(),
            load_mw: 0.0,
            voltage: 0.0,
            frequency: 0.0,
            area1: BreakerStatus::DeEnergized,
            area2: BreakerStatus::DeEnergized,
            calculated_bill: 0.0,
            price_rate,
            attack_score: 0.0,
            security_level: SecurityLevel::Normal,
            system_locked: false,
            mqtt_connected: false,
            threat_intel_active: true,
            last_update: None,
            security: SecurityCounters::default(),
        }
    }

    /// Set the attack score, clamping to [0, 100] and recomputing the level.
    pub fn set_attack_score(&mut self, score: f64) {
        let score = if score.is_nan() { 0.0 } else { score };
        self.attack_score = score.clamp(0.0, MAX_ATTACK_SCORE);
        self.security_level = SecurityLevel::from_score(self.attack_score);
    }

    /// Add to the attack score (clamped) and recompute the level.
    pub fn raise_attack_score(&mut self, delta: f64) {
        self.set_attack_score(self.attack_score + delta.max(0.0));
    }

    /// Current breaker status of an area.
    pub fn breaker(&self, area: Area) -> BreakerStatus {
        match area {
            Area::Area1 => self.area1,
            Area::Area2 => self.area2,
        }
    }

    /// Overwrite the breaker status of an area.
    pub fn set_breaker(&mut self, area: Area, status: BreakerStatus) {
        match area {
            Area::Area1 => self.area1 = status,
            Area::Area2 => self.area2 = status,
        }
    }

    /// Add a non-negative cost to the bill. Negative or non-finite costs are ignored.
    pub fn accrue_bill(&mut self, cost: f64) -> bool {
        if cost.is_finite() && cost > 0.0 {
            self.calculated_bill += cost;
            return true;
        }
        false
    }

    /// Mark the record as freshly updated.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_update = Some(at);
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new(0.25)
    }
}

/// Connectivity notification payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStatus {
    /// Whether the hardware link is up.
    pub connected: bool,
}

/// Notification pushed to every observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Notification {
    /// Hardware link connectivity changed (or initial sync).
    MqttStatus(LinkStatus),
    /// Full state snapshot.
    StateUpdate(SystemState),
    /// A threat event was created.
    ThreatDetected(ThreatEvent),
}

impl Notification {
    /// Event name as seen on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            Notification::MqttStatus(_) => "mqtt_status",
            Notification::StateUpdate(_) => "state_update",
            Notification::ThreatDetected(_) => "threat_detected",
        }
    }
}
