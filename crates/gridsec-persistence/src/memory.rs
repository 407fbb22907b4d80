//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Volatile record store used by simulation runs and tests."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use gridsec_msg::{AuditEntry, HistoricalSample, Recorded, ThreatEvent};
use parking_lot::Mutex;

use crate::store::{newest_first, RecordStore, ThreatSummary};
use crate::{PersistenceError, Result};

#[derive(Default)]
struct Tables {
    samples: Vec<Recorded<HistoricalSample>>,
    threats: Vec<Recorded<ThreatEvent>>,
    audit: Vec<Recorded<AuditEntry>>,
}

/// In-process store. Nothing survives a restart.
///
/// `set_unavailable(true)` makes every append fail, which is how the engine's
/// persistence failure path is exercised.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle write failures.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored samples.
    pub fn sample_count(&self) -> usize {
        self.tables.lock().samples.len()
    }

    /// Number of stored threat events.
    pub fn threat_count(&self) -> usize {
        self.tables.lock().threats.len()
    }

    /// Number of stored audit entries.
    pub fn audit_count(&self) -> usize {
        self.tables.lock().audit.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable(
                "memory store marked unavailable".into(),
            ));
        }
        Ok(())
    }
}

fn push<T>(table: &mut Vec<Recorded<T>>, record: T) -> u64 {
    let id = table.len() as u64 + 1;
    table.push(Recorded { id, record });
    id
}

impl RecordStore for MemoryStore {
    fn append_sample(&self, sample: &HistoricalSample) -> Result<u64> {
        self.check_available()?;
        Ok(push(&mut self.tables.lock().samples, sample.clone()))
    }

    fn append_threat(&self, event: &ThreatEvent) -> Result<u64> {
        self.check_available()?;
        Ok(push(&mut self.tables.lock().threats, event.clone()))
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<u64> {
        self.check_available()?;
        Ok(push(&mut self.tables.lock().audit, entry.clone()))
    }

    fn query_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Recorded<HistoricalSample>>> {
        let mut samples: Vec<_> = self
            .tables
            .lock()
            .samples
            .iter()
            .filter(|sample| sample.record.timestamp >= start && sample.record.timestamp <= end)
            .cloned()
            .collect();
        samples.sort_by_key(|sample| sample.record.timestamp);
        Ok(samples)
    }

    fn recent_threats(&self, limit: usize) -> Result<Vec<Recorded<ThreatEvent>>> {
        Ok(newest_first(self.tables.lock().threats.clone(), limit))
    }

    fn recent_audit(&self, limit: usize) -> Result<Vec<Recorded<AuditEntry>>> {
        Ok(newest_first(self.tables.lock().audit.clone(), limit))
    }

    fn threat_summary(&self) -> Result<ThreatSummary> {
        let mut summary = ThreatSummary::default();
        for event in &self.tables.lock().threats {
            summary.observe(&event.record);
        }
        Ok(summary)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.lock();
        f.debug_struct("MemoryStore")
            .field("samples", &tables.samples.len())
            .field("threats", &tables.threats.len())
            .field("audit", &tables.audit.len())
            .finish()
    }
}
