//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Persistence abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Write-once storage for historical samples, threat events and audit entries.

use std::fmt;
use std::str::FromStr;

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing journal files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
    /// A record kind label did not name a known journal.
    #[error("unknown record kind `{0}`")]
    UnknownKind(String),
    /// The store refused the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// The three journals kept by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Periodic state samples.
    Sample,
    /// Threat decisions.
    Threat,
    /// Operator actions.
    Audit,
}

impl RecordKind {
    /// All kinds in journal order.
    pub const ALL: [RecordKind; 3] = [RecordKind::Sample, RecordKind::Threat, RecordKind::Audit];

    /// Stable label used for file names and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Sample => "history",
            RecordKind::Threat => "threats",
            RecordKind::Audit => "audit",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = PersistenceError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "history" | "sample" | "samples" => Ok(RecordKind::Sample),
            "threats" | "threat" => Ok(RecordKind::Threat),
            "audit" => Ok(RecordKind::Audit),
            other => Err(PersistenceError::UnknownKind(other.to_owned())),
        }
    }
}

pub mod journal;
pub mod memory;
pub mod metrics;
pub mod store;

pub use journal::{JournalEntry, JournalReader, JournalWriter};
pub use memory::MemoryStore;
pub use metrics::PersistenceMetrics;
pub use store::{JournalStore, RecordStore, ThreatSummary};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_kind_labels_parse_back() {
        for kind in RecordKind::ALL {
            assert_eq!(kind.as_str().parse::<RecordKind>().unwrap(), kind);
        }
        assert_eq!("Threat".parse::<RecordKind>().unwrap(), RecordKind::Threat);
        let err = "weather".parse::<RecordKind>().unwrap_err();
        assert_eq!(format!("{err}"), "unknown record kind `weather`");
    }
}
