//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared data model and bus payload codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Data model shared by the engine, the persistence collaborator and the
//! network surfaces.

pub mod payloads;
pub mod records;
pub mod types;

/// Shared result type for payload decoding.
pub type Result<T> = std::result::Result<T, PayloadError>;

/// Failures raised while decoding a bus payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The payload bytes were not valid UTF-8.
    #[error("payload is not valid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    /// The payload was not valid JSON or did not match the expected shape.
    #[error("payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    /// A required field was present but carried an unusable value.
    #[error("invalid value for field `{field}`: {reason}")]
    InvalidField {
        /// Offending field name.
        field: &'static str,
        /// Human readable explanation.
        reason: String,
    },
}

pub use payloads::{
    BillReport, BreakerCommand, BreakerReport, MeterReading, PlantReading, SecurityAlert, Topic,
};
pub use records::{
    AuditEntry, HistoricalSample, Recorded, ThreatAction, ThreatClassification, ThreatEvent,
};
pub use types::{
    Area, BreakerStatus, LinkStatus, Notification, SecurityCounters, SecurityLevel, Severity,
    SystemState, MAX_ATTACK_SCORE,
};
