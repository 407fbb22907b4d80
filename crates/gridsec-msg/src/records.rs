//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Threat, audit and historical records handed to persistence."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::types::{SecurityLevel, Severity, SystemState};

/// Decision taken by the scoring layer for a threat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ThreatAction {
    /// Traffic was dropped.
    Block,
    /// Traffic was allowed but flagged.
    Alert,
}

/// Category triple describing a threat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatClassification {
    /// Broad category (network, protocol, authentication, injection, ...).
    pub category: String,
    /// Finer grained label within the category.
    pub subcategory: String,
    /// Severity used for scoring.
    pub severity: Severity,
}

/// A single threat decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatEvent {
    /// Unique decision identifier.
    pub decision_id: Uuid,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Decision taken.
    pub action: ThreatAction,
    /// Inspection layer that produced the decision.
    pub layer: String,
    /// Classification triple.
    #[serde(rename = "threat_classification")]
    pub classification: ThreatClassification,
    /// Operator facing explanation.
    pub explanation: String,
    /// Free-form context.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ThreatEvent {
    /// Build a blocking decision stamped with a fresh id.
    pub fn blocked(
        at: DateTime<Utc>,
        layer: impl Into<String>,
        classification: ThreatClassification,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            timestamp: at,
            action: ThreatAction::Block,
            layer: layer.into(),
            classification,
            explanation: explanation.into(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Severity shorthand.
    pub fn severity(&self) -> Severity {
        self.classification.severity
    }
}

/// Operator action record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Time the action was accepted.
    pub timestamp: DateTime<Utc>,
    /// Upper-case action name (TOGGLE_AREA1, LOGIN, ...).
    pub action: String,
    /// Operator identity.
    #[serde(rename = "username")]
    pub actor: String,
    /// Action specific context.
    #[serde(default)]
    pub details: Value,
}

impl AuditEntry {
    /// Create an entry with the given details.
    pub fn new(
        at: DateTime<Utc>,
        action: impl Into<String>,
        actor: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            timestamp: at,
            action: action.into(),
            actor: actor.into(),
            details,
        }
    }
}

/// Point-in-time copy of the measured quantities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSample {
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Generation power.
    pub gen_mw: f64,
    /// Load power.
    pub load_mw: f64,
    /// Bus voltage.
    pub voltage: f64,
    /// Grid frequency.
    pub frequency: f64,
    /// Level at capture time.
    pub security_level: SecurityLevel,
    /// Score at capture time.
    pub attack_score: f64,
}

impl HistoricalSample {
    /// Copy the sampled subset of a state snapshot.
    pub fn capture(state: &SystemState, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at,
            gen_mw: state.gen_mw,
            load_mw: state.load_mw,
            voltage: state.voltage,
            frequency: state.frequency,
            security_level: state.security_level,
            attack_score: state.attack_score,
        }
    }
}

/// A persisted record paired with the id assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recorded<T> {
    /// Store assigned, monotonically increasing id.
    pub id: u64,
    /// Stored record.
    #[serde(flatten)]
    pub record: T,
}
