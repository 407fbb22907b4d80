//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Persistence abstractions and storage bindings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{IntCounterVec, Opts, Registry};

use crate::{RecordKind, Result};

/// Metrics published by the persistence subsystem.
#[derive(Clone)]
pub struct PersistenceMetrics {
    records_appended: IntCounterVec,
    records_failed: IntCounterVec,
    bytes_appended: IntCounterVec,
}

impl PersistenceMetrics {
    /// Register all persistence metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let records_appended = IntCounterVec::new(
            Opts::new(
                "gridsec_records_appended_total",
                "Total number of records durably appended, by journal",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(records_appended.clone()))?;

        let records_failed = IntCounterVec::new(
            Opts::new(
                "gridsec_records_failed_total",
                "Total number of record appends that failed, by journal",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(records_failed.clone()))?;

        let bytes_appended = IntCounterVec::new(
            Opts::new(
                "gridsec_journal_bytes_total",
                "Total bytes appended to journals",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(bytes_appended.clone()))?;

        Ok(Self {
            records_appended,
            records_failed,
            bytes_appended,
        })
    }

    /// Record a successful append of `bytes` to the journal of `kind`.
    pub fn record_appended(&self, kind: RecordKind, bytes: usize) {
        self.records_appended
            .with_label_values(&[kind.as_str()])
            .inc();
        self.bytes_appended
            .with_label_values(&[kind.as_str()])
            .inc_by(bytes as u64);
    }

    /// Record a failed append.
    pub fn record_failed(&self, kind: RecordKind) {
        self.records_failed.with_label_values(&[kind.as_str()]).inc();
    }
}

impl std::fmt::Debug for PersistenceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceMetrics").finish_non_exhaustive()
    }
}
