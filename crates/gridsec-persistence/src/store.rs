//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Record store contract and the journal-backed implementation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use gridsec_msg::{AuditEntry, HistoricalSample, Recorded, Severity, ThreatEvent};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::journal::{JournalReader, JournalWriter};
use crate::metrics::PersistenceMetrics;
use crate::{RecordKind, Result};

/// Aggregate view over the threat journal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatSummary {
    /// Number of stored threat events.
    pub total_threats: u64,
    /// Number of stored events with critical severity.
    pub critical_threats: u64,
    /// Counts per category, in first-seen order.
    pub threats_by_category: IndexMap<String, u64>,
}

impl ThreatSummary {
    /// Fold one event into the summary.
    pub fn observe(&mut self, event: &ThreatEvent) {
        self.total_threats += 1;
        if event.severity() == Severity::Critical {
            self.critical_threats += 1;
        }
        *self
            .threats_by_category
            .entry(event.classification.category.clone())
            .or_default() += 1;
    }
}

/// Write-once storage collaborator.
///
/// Appends are safe to call concurrently from the tick and ingestion paths.
/// Queries return records in the order documented on each method.
pub trait RecordStore: Send + Sync {
    /// Durably append a historical sample.
    fn append_sample(&self, sample: &HistoricalSample) -> Result<u64>;

    /// Durably append a threat event.
    fn append_threat(&self, event: &ThreatEvent) -> Result<u64>;

    /// Durably append an audit entry.
    fn append_audit(&self, entry: &AuditEntry) -> Result<u64>;

    /// Samples with `start <= timestamp <= end`, oldest first.
    fn query_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Recorded<HistoricalSample>>>;

    /// Up to `limit` threat events, most recent first.
    fn recent_threats(&self, limit: usize) -> Result<Vec<Recorded<ThreatEvent>>>;

    /// Up to `limit` audit entries, most recent first.
    fn recent_audit(&self, limit: usize) -> Result<Vec<Recorded<AuditEntry>>>;

    /// Totals across every stored threat event.
    fn threat_summary(&self) -> Result<ThreatSummary>;
}

/// Keep only the newest `limit` items and reverse them so the newest comes first.
pub(crate) fn newest_first<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    let skip = items.len().saturating_sub(limit);
    items.drain(..skip);
    items.reverse();
    items
}

/// Store keeping one JSON-lines journal per record kind inside a directory.
pub struct JournalStore {
    directory: PathBuf,
    samples: Mutex<JournalWriter>,
    threats: Mutex<JournalWriter>,
    audit: Mutex<JournalWriter>,
    metrics: Option<PersistenceMetrics>,
}

impl JournalStore {
    /// Open (or create) the journals under `directory`.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let open = |kind: RecordKind| {
            JournalWriter::open(&journal_path(&directory, kind), kind.as_str()).map(Mutex::new)
        };
        let samples = open(RecordKind::Sample)?;
        let threats = open(RecordKind::Threat)?;
        let audit = open(RecordKind::Audit)?;
        debug!(directory = %directory.display(), "journal store opened");
        Ok(Self {
            directory,
            samples,
            threats,
            audit,
            metrics: None,
        })
    }

    /// Attach persistence metrics.
    pub fn with_metrics(mut self, metrics: PersistenceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Directory holding the journals.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn writer(&self, kind: RecordKind) -> &Mutex<JournalWriter> {
        match kind {
            RecordKind::Sample => &self.samples,
            RecordKind::Threat => &self.threats,
            RecordKind::Audit => &self.audit,
        }
    }

    fn append<T: Serialize>(&self, kind: RecordKind, record: &T) -> Result<u64> {
        let outcome = self.writer(kind).lock().append(record);
        match outcome {
            Ok((sequence, bytes)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_appended(kind, bytes);
                }
                Ok(sequence)
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_failed(kind);
                }
                warn!(kind = %kind, error = %err, "journal append failed");
                Err(err)
            }
        }
    }

    fn read_all<T: DeserializeOwned>(&self, kind: RecordKind) -> Result<Vec<Recorded<T>>> {
        // Readers never take the writer lock; a line still being written decodes
        // as torn and is skipped by the reader.
        JournalReader::<T>::open(&journal_path(&self.directory, kind))?
            .map(|entry| {
                entry.map(|entry| Recorded {
                    id: entry.sequence,
                    record: entry.payload,
                })
            })
            .collect()
    }
}

fn journal_path(directory: &Path, kind: RecordKind) -> PathBuf {
    directory.join(format!("{}.jsonl", kind.as_str()))
}

impl RecordStore for JournalStore {
    fn append_sample(&self, sample: &HistoricalSample) -> Result<u64> {
        self.append(RecordKind::Sample, sample)
    }

    fn append_threat(&self, event: &ThreatEvent) -> Result<u64> {
        self.append(RecordKind::Threat, event)
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<u64> {
        self.append(RecordKind::Audit, entry)
    }

    fn query_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Recorded<HistoricalSample>>> {
        let mut samples: Vec<Recorded<HistoricalSample>> = self
            .read_all::<HistoricalSample>(RecordKind::Sample)?
            .into_iter()
            .filter(|sample| sample.record.timestamp >= start && sample.record.timestamp <= end)
            .collect();
        samples.sort_by_key(|sample| sample.record.timestamp);
        Ok(samples)
    }

    fn recent_threats(&self, limit: usize) -> Result<Vec<Recorded<ThreatEvent>>> {
        Ok(newest_first(self.read_all(RecordKind::Threat)?, limit))
    }

    fn recent_audit(&self, limit: usize) -> Result<Vec<Recorded<AuditEntry>>> {
        Ok(newest_first(self.read_all(RecordKind::Audit)?, limit))
    }

    fn threat_summary(&self) -> Result<ThreatSummary> {
        let mut summary = ThreatSummary::default();
        for event in self.read_all::<ThreatEvent>(RecordKind::Threat)? {
            summary.observe(&event.record);
        }
        Ok(summary)
    }
}

impl std::fmt::Debug for JournalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalStore")
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}
