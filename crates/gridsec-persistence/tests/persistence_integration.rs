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

use chrono::{Duration, TimeZone, Utc};
use gridsec_msg::{
    AuditEntry, HistoricalSample, Severity, SystemState, ThreatClassification, ThreatEvent,
};
use gridsec_persistence::{JournalStore, MemoryStore, PersistenceMetrics, RecordStore};
use prometheus::Registry;
use serde_json::json;
use tempfile::tempdir;

fn threat(category: &str, severity: Severity) -> ThreatEvent {
    ThreatEvent::blocked(
        Utc::now(),
        "L7_APPLICATION",
        ThreatClassification {
            category: category.to_owned(),
            subcategory: "test".to_owned(),
            severity,
        },
        "integration test threat",
    )
}

fn sample_at(minutes: i64) -> HistoricalSample {
    let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let mut state = SystemState::default();
    state.gen_mw = 500.0 + minutes as f64;
    HistoricalSample::capture(&state, base + Duration::minutes(minutes))
}

fn exercise_store(store: &dyn RecordStore) {
    for minute in [0, 10, 20, 30] {
        store.append_sample(&sample_at(minute)).unwrap();
    }
    let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let window = store
        .query_history(base + Duration::minutes(10), base + Duration::minutes(20))
        .unwrap();
    let minutes: Vec<f64> = window.iter().map(|s| s.record.gen_mw - 500.0).collect();
    assert_eq!(minutes, vec![10.0, 20.0]);

    store.append_threat(&threat("network", Severity::Critical)).unwrap();
    store.append_threat(&threat("protocol", Severity::Low)).unwrap();
    store.append_threat(&threat("network", Severity::High)).unwrap();

    let recent = store.recent_threats(2).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].record.severity(), Severity::High);
    assert_eq!(recent[1].record.classification.category, "protocol");
    assert!(recent[0].id > recent[1].id);

    let summary = store.threat_summary().unwrap();
    assert_eq!(summary.total_threats, 3);
    assert_eq!(summary.critical_threats, 1);
    assert_eq!(summary.threats_by_category["network"], 2);

    for action in ["LOGIN", "TOGGLE_AREA1", "LOGOUT"] {
        store
            .append_audit(&AuditEntry::new(Utc::now(), action, "operator", json!({})))
            .unwrap();
    }
    let audit = store.recent_audit(50).unwrap();
    let actions: Vec<&str> = audit.iter().map(|e| e.record.action.as_str()).collect();
    assert_eq!(actions, vec!["LOGOUT", "TOGGLE_AREA1", "LOGIN"]);
}

#[test]
fn journal_store_queries_behave_like_memory_store() {
    let dir = tempdir().unwrap();
    let journal = JournalStore::open(dir.path()).unwrap();
    exercise_store(&journal);
    exercise_store(&MemoryStore::new());
}

#[test]
fn journal_store_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let store = JournalStore::open(dir.path()).unwrap();
        store.append_threat(&threat("injection", Severity::Medium)).unwrap();
    }
    let store = JournalStore::open(dir.path()).unwrap();
    let id = store.append_threat(&threat("injection", Severity::Low)).unwrap();
    assert_eq!(id, 2);
    assert_eq!(store.recent_threats(10).unwrap().len(), 2);
    assert!(dir.path().join("threats.jsonl").exists());
}

#[test]
fn torn_audit_line_does_not_break_later_queries() {
    let dir = tempdir().unwrap();
    {
        let store = JournalStore::open(dir.path()).unwrap();
        store
            .append_audit(&AuditEntry::new(Utc::now(), "LOGIN", "operator", json!({})))
            .unwrap();
    }
    let mut journal = std::fs::OpenOptions::new()
        .append(true)
        .open(dir.path().join("audit.jsonl"))
        .unwrap();
    std::io::Write::write_all(&mut journal, br#"{"sequence":2,"payload":{"timest"#).unwrap();
    drop(journal);

    let store = JournalStore::open(dir.path()).unwrap();
    let id = store
        .append_audit(&AuditEntry::new(Utc::now(), "LOGOUT", "operator", json!({})))
        .unwrap();
    assert_eq!(id, 2);

    let audit = store.recent_audit(10).unwrap();
    let actions: Vec<&str> = audit.iter().map(|e| e.record.action.as_str()).collect();
    assert_eq!(actions, vec!["LOGOUT", "LOGIN"]);
    assert!(store.threat_summary().is_ok());
}

#[test]
fn persistence_metrics_capture_activity() {
    let registry = Arc::new(Registry::new());
    let metrics = PersistenceMetrics::new(registry.clone()).unwrap();
    let dir = tempdir().unwrap();
    let store = JournalStore::open(dir.path()).unwrap().with_metrics(metrics.clone());

    store.append_sample(&sample_at(1)).unwrap();
    store.append_sample(&sample_at(2)).unwrap();
    metrics.record_failed(gridsec_persistence::RecordKind::Audit);

    let families = registry.gather();
    assert_eq!(metric_total(&families, "gridsec_records_appended_total"), 2.0);
    assert_eq!(metric_total(&families, "gridsec_records_failed_total"), 1.0);
    assert!(metric_total(&families, "gridsec_journal_bytes_total") > 0.0);
}

fn metric_total(families: &[prometheus::proto::MetricFamily], name: &str) -> f64 {
    families
        .iter()
        .find(|family| family.get_name() == name)
        .map(|family| {
            family
                .get_metric()
                .iter()
                .map(|metric| metric.get_counter().get_value())
                .sum()
        })
        .unwrap_or_default()
}
