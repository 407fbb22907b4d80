//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Probabilistic history sampling and unconditional event recording."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gridsec_metrics::EngineMetrics;
use gridsec_msg::{AuditEntry, HistoricalSample, SystemState, ThreatEvent};
use gridsec_persistence::{RecordKind, RecordStore};
use rand::Rng;
use tracing::warn;

/// Writes records to the persistence collaborator. A failed write is logged,
/// counted and skipped; nothing here returns an error to the tick.
#[derive(Clone)]
pub struct PersistenceSampler {
    store: Arc<dyn RecordStore>,
    probability: f64,
    metrics: EngineMetrics,
}

impl PersistenceSampler {
    pub fn new(store: Arc<dyn RecordStore>, probability: f64, metrics: EngineMetrics) -> Self {
        Self {
            store,
            probability: probability.clamp(0.0, 1.0),
            metrics,
        }
    }

    /// Per-tick draw. True when this tick should be sampled.
    pub fn should_sample<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.gen_bool(self.probability)
    }

    /// Store a sample of `state` taken at `at`. Returns whether it was stored.
    pub fn record_sample(&self, state: &SystemState, at: DateTime<Utc>) -> bool {
        let sample = HistoricalSample::capture(state, at);
        self.settle(RecordKind::Sample, self.store.append_sample(&sample))
    }

    pub fn record_threat(&self, event: &ThreatEvent) -> bool {
        self.settle(RecordKind::Threat, self.store.append_threat(event))
    }

    pub fn record_audit(&self, entry: &AuditEntry) -> bool {
        self.settle(RecordKind::Audit, self.store.append_audit(entry))
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    fn settle(&self, kind: RecordKind, outcome: gridsec_persistence::Result<u64>) -> bool {
        match outcome {
            Ok(_) => true,
            Err(err) => {
                self.metrics.record_persistence_failure(kind.as_str());
                warn!(kind = %kind, error = %err, "record append failed; skipped");
                false
            }
        }
    }
}

impl std::fmt::Debug for PersistenceSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceSampler")
            .field("probability", &self.probability)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsec_metrics::{counter_total, new_registry};
    use gridsec_persistence::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn failed_writes_are_counted_not_raised() {
        let registry = new_registry();
        let metrics = EngineMetrics::new(registry.clone()).unwrap();
        let store = Arc::new(MemoryStore::new());
        let sampler = PersistenceSampler::new(store.clone(), 1.0, metrics);

        store.set_unavailable(true);
        assert!(!sampler.record_sample(&SystemState::default(), Utc::now()));
        assert!(!sampler.record_audit(&AuditEntry::new(
            Utc::now(),
            "LOGIN",
            "op",
            serde_json::Value::Null
        )));
        assert_eq!(
            counter_total(&registry, "gridsec_persistence_failures_total"),
            2.0
        );

        store.set_unavailable(false);
        assert!(sampler.record_sample(&SystemState::default(), Utc::now()));
        assert_eq!(store.sample_count(), 1);
    }

    #[test]
    fn sampling_probability_extremes() {
        let metrics = EngineMetrics::new(new_registry()).unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let mut rng = StdRng::seed_from_u64(3);
        let never = PersistenceSampler::new(store.clone(), 0.0, metrics.clone());
        let always = PersistenceSampler::new(store, 1.0, metrics);
        assert!((0..50).all(|_| !never.should_sample(&mut rng)));
        assert!((0..50).all(|_| always.should_sample(&mut rng)));
    }

    #[test]
    fn roughly_one_in_ten_ticks_is_sampled() {
        let metrics = EngineMetrics::new(new_registry()).unwrap();
        let sampler = PersistenceSampler::new(Arc::new(MemoryStore::new()), 0.1, metrics);
        let mut rng = StdRng::seed_from_u64(99);
        let sampled = (0..10_000).filter(|_| sampler.should_sample(&mut rng)).count();
        assert!((800..1200).contains(&sampled), "sampled {sampled}");
    }
}
