//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Read models served to the presentation layer."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use gridsec_msg::{AuditEntry, Recorded, SecurityCounters, SecurityLevel, ThreatEvent};
use indexmap::IndexMap;
use serde::Serialize;
use strum::{Display, EnumString};

/// Which log `query_logs` reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogKind {
    #[default]
    #[strum(serialize = "threats", serialize = "threat")]
    Threats,
    Audit,
}

/// Result of `query_logs`, most recent first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LogRecords {
    Threats(Vec<Recorded<ThreatEvent>>),
    Audit(Vec<Recorded<AuditEntry>>),
}

impl LogRecords {
    pub fn len(&self) -> usize {
        match self {
            LogRecords::Threats(records) => records.len(),
            LogRecords::Audit(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Threat-intel feed descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreatIntel {
    pub enabled: bool,
    pub total_indicators: u64,
    pub last_refresh: DateTime<Utc>,
}

/// Security posture summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityStatus {
    pub security_posture: SecurityLevel,
    pub attack_score: f64,
    pub stats: SecurityCounters,
    pub threat_intel: ThreatIntel,
    pub timestamp: DateTime<Utc>,
}

/// Engine counters merged with the live score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    #[serde(flatten)]
    pub counters: SecurityCounters,
    pub attack_score: f64,
    pub security_posture: SecurityLevel,
}

/// Aggregate threat statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreatStats {
    pub total_threats: u64,
    pub critical_threats: u64,
    pub threats_by_category: IndexMap<String, u64>,
    pub security_engine_stats: EngineStats,
}
