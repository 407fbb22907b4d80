//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "End-to-end engine scenarios over the in-memory bus."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gridsec_common::{EngineConfig, SimulatorConfig};
use gridsec_core::{
    memory_bus, ControlError, Delivery, EngineBuilder, EngineHandle, GridEngine, LogKind,
    LogRecords, MemoryBusSender, RecordingLink, SessionEvent, Subscription,
};
use gridsec_metrics::{counter_total, new_registry, SharedRegistry};
use gridsec_msg::{
    Area, BreakerCommand, BreakerStatus, Notification, SecurityLevel, Severity, SystemState,
    ThreatClassification, ThreatEvent,
};
use gridsec_persistence::MemoryStore;
use serde_json::json;

struct Rig {
    handle: EngineHandle,
    engine: GridEngine,
    bus: MemoryBusSender,
    link: Arc<RecordingLink>,
    store: Arc<MemoryStore>,
    registry: SharedRegistry,
}

/// Hardware-mode engine whose background tick is far away; tests drive
/// ticks through `GridEngine::step`.
async fn rig_with(config: EngineConfig) -> Rig {
    let (bus, client) = memory_bus();
    let link = Arc::new(RecordingLink::new());
    let store = Arc::new(MemoryStore::new());
    let registry = new_registry();
    let handle = EngineBuilder::new(config)
        .hardware(Box::new(client), link.clone())
        .records(store.clone())
        .metrics(registry.clone())
        .start()
        .await
        .expect("engine starts");
    let engine = handle.engine();
    Rig {
        handle,
        engine,
        bus,
        link,
        store,
        registry,
    }
}

fn quiet_config() -> EngineConfig {
    EngineConfig {
        tick_interval: Duration::from_secs(3600),
        sample_probability: 0.0,
        threat_probability: 0.0,
        seed: Some(42),
        ..EngineConfig::default()
    }
}

async fn rig() -> Rig {
    rig_with(quiet_config()).await
}

async fn eventually(engine: &GridEngine, check: impl Fn(&SystemState) -> bool) -> SystemState {
    for _ in 0..200 {
        let state = engine.get_state();
        if check(&state) {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached; last state {:?}", engine.get_state());
}

async fn connect(rig: &Rig) {
    assert!(rig.bus.connect());
    eventually(&rig.engine, |state| state.mqtt_connected).await;
}

fn drain(sub: &mut Subscription) -> Vec<Notification> {
    let mut seen = Vec::new();
    while let Some(notification) = sub.try_next() {
        seen.push(notification);
    }
    seen
}

fn critical_threat() -> ThreatEvent {
    ThreatEvent::blocked(
        Utc::now(),
        "L7_APPLICATION",
        ThreatClassification {
            category: "injection".into(),
            subcategory: "false_data_injection".into(),
            severity: Severity::Critical,
        },
        "forged meter reading",
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_critical_threats_escalate_to_critical() {
    let rig = rig().await;
    let first = rig.engine.inject_threat(critical_threat());
    assert_eq!(first.attack_score, 50.0);
    assert_eq!(first.security_level, SecurityLevel::Elevated);

    let second = rig.engine.inject_threat(critical_threat());
    assert_eq!(second.attack_score, 100.0);
    assert_eq!(second.security_level, SecurityLevel::Critical);
    assert_eq!(rig.store.threat_count(), 2);

    let stats = rig.engine.threat_stats().unwrap();
    assert_eq!(stats.total_threats, 2);
    assert_eq!(stats.critical_threats, 2);
    assert_eq!(stats.threats_by_category["injection"], 2);
    assert_eq!(stats.security_engine_stats.counters.total_blocked, 2);
    rig.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simulate_attack_and_reset_move_price_and_score() {
    let rig = rig().await;
    let outcome = rig.engine.apply_control("simulate_attack", "op").await.unwrap();
    assert_eq!(outcome.delivery, Delivery::Local);
    let state = rig.engine.get_state();
    assert_eq!(state.price_rate, 50.0);
    assert_eq!(state.attack_score, 60.0);
    assert_eq!(state.security_level, SecurityLevel::Elevated);

    rig.engine.apply_control("reset", "op").await.unwrap();
    let state = rig.engine.get_state();
    assert_eq!(state.price_rate, 0.25);
    assert_eq!(state.attack_score, 0.0);
    assert_eq!(state.security_level, SecurityLevel::Normal);

    match rig.engine.query_logs(LogKind::Audit, 10).unwrap() {
        LogRecords::Audit(entries) => {
            let actions: Vec<_> = entries.iter().map(|e| e.record.action.as_str()).collect();
            assert_eq!(actions, vec!["RESET_PRICE", "SIMULATE_ATTACK"]);
        }
        other => panic!("unexpected records {other:?}"),
    }
    rig.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnected_toggle_applies_locally_with_one_audit_and_one_broadcast() {
    let rig = rig().await;
    let mut sub = rig.engine.subscribe();
    drain(&mut sub);

    let outcome = rig.engine.apply_control("toggle_area1", "alice").await.unwrap();
    assert_eq!(outcome.delivery, Delivery::Local);
    assert_eq!(outcome.new_state, Some(BreakerStatus::Energized));
    assert_eq!(rig.engine.get_state().area1, BreakerStatus::Energized);
    assert!(rig.link.controls().is_empty());

    let seen = drain(&mut sub);
    assert_eq!(seen.len(), 1);
    assert!(matches!(&seen[0], Notification::StateUpdate(state) if state.area1 == BreakerStatus::Energized));

    match rig.engine.query_logs(LogKind::Audit, 10).unwrap() {
        LogRecords::Audit(entries) => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].record.action, "TOGGLE_AREA1");
            assert_eq!(entries[0].record.actor, "alice");
            assert_eq!(entries[0].record.details["delivery"], "local");
            assert_eq!(entries[0].record.details["new_state"], "ON");
        }
        other => panic!("unexpected records {other:?}"),
    }
    rig.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connected_toggle_publishes_and_waits_for_echo() {
    let rig = rig().await;
    connect(&rig).await;

    let outcome = rig.engine.apply_control("toggle_area2", "op").await.unwrap();
    assert_eq!(outcome.delivery, Delivery::Published);
    assert_eq!(
        rig.link.controls(),
        vec![BreakerCommand {
            area: Area::Area2,
            status: BreakerStatus::Energized
        }]
    );
    assert_eq!(rig.engine.get_state().area2, BreakerStatus::DeEnergized);

    rig.bus.publish("fyp_grid_99/grid/control", r#"{"area2": "ON"}"#);
    eventually(&rig.engine, |state| state.area2 == BreakerStatus::Energized).await;
    assert_eq!(rig.store.audit_count(), 1);
    rig.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_publish_falls_back_to_local_toggle() {
    let rig = rig().await;
    connect(&rig).await;
    rig.link.set_failing(true);

    let outcome = rig.engine.apply_control("toggle_area1", "op").await.unwrap();
    assert_eq!(outcome.delivery, Delivery::Local);
    assert_eq!(rig.engine.get_state().area1, BreakerStatus::Energized);
    assert_eq!(
        counter_total(&rig.registry, "gridsec_outbound_failures_total"),
        1.0
    );
    rig.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn double_toggle_restores_breaker() {
    let rig = rig().await;
    let before = rig.engine.get_state().area1;
    rig.engine.apply_control("toggle_area1", "op").await.unwrap();
    rig.engine.apply_control("toggle_area1", "op").await.unwrap();
    assert_eq!(rig.engine.get_state().area1, before);
    assert_eq!(rig.store.audit_count(), 2);
    rig.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_action_is_rejected_without_side_effects() {
    let rig = rig().await;
    let before = rig.engine.get_state();
    let err = rig.engine.apply_control("open_everything", "mallory").await.unwrap_err();
    assert_eq!(err, ControlError::UnknownAction("open_everything".into()));
    assert_eq!(rig.engine.get_state(), before);
    assert_eq!(rig.store.audit_count(), 0);
    rig.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_bus_payload_changes_nothing() {
    let rig = rig().await;
    rig.bus
        .publish("fyp_grid_99/plant", r#"{"gen": 480.0, "rpm": 2950, "status": "OK"}"#);
    let good = eventually(&rig.engine, |state| state.gen_mw == 480.0).await;

    rig.bus.publish("fyp_grid_99/plant", r#"{"gen": "#);
    rig.bus.publish("fyp_grid_99/meter/data", r#"{"load": 321.0}"#);
    let after = eventually(&rig.engine, |state| state.load_mw == 321.0).await;

    assert_eq!(after.gen_mw, good.gen_mw);
    assert_eq!(after.gen_rpm, good.gen_rpm);
    assert_eq!(after.status, good.status);
    assert_eq!(
        counter_total(&rig.registry, "gridsec_ingest_errors_total"),
        1.0
    );
    rig.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_observer_snapshot_matches_current_state() {
    let rig = rig().await;
    rig.engine.step().await;
    let mut sub = rig.engine.subscribe();
    let current = rig.engine.get_state();

    assert_eq!(
        sub.next().await,
        Some(Notification::MqttStatus(gridsec_msg::LinkStatus { connected: false }))
    );
    assert_eq!(sub.next().await, Some(Notification::StateUpdate(current)));
    assert_eq!(rig.engine.observer_count(), 1);
    drop(sub);
    assert_eq!(rig.engine.observer_count(), 0);
    rig.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bill_is_monotonic_and_forwarded_when_connected() {
    let rig = rig().await;
    rig.bus.publish("fyp_grid_99/meter/data", r#"{"load": 400.0}"#);
    eventually(&rig.engine, |state| state.load_mw == 400.0).await;

    let mut previous = 0.0;
    for step in 0..20 {
        if step == 10 {
            rig.engine.apply_control("simulate_attack", "op").await.unwrap();
        }
        let report = rig.engine.step().await;
        assert!(report.snapshot.calculated_bill >= previous);
        previous = report.snapshot.calculated_bill;
    }
    assert!(previous > 0.0);
    assert!(rig.link.bills().is_empty());

    connect(&rig).await;
    let report = rig.engine.step().await;
    let forwarded = rig.link.bills();
    assert_eq!(forwarded.len(), 1);
    assert!((forwarded[0].bill - report.snapshot.calculated_bill).abs() < 0.01);

    rig.link.set_failing(true);
    let failing = rig.engine.step().await;
    assert!(failing.snapshot.calculated_bill >= report.snapshot.calculated_bill);
    assert_eq!(
        counter_total(&rig.registry, "gridsec_outbound_failures_total"),
        1.0
    );
    rig.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn persistence_outage_does_not_stall_ticks() {
    let rig = rig_with(EngineConfig {
        sample_probability: 1.0,
        ..quiet_config()
    })
    .await;
    rig.store.set_unavailable(true);
    for _ in 0..5 {
        let report = rig.engine.step().await;
        assert!(!report.sampled);
    }
    assert_eq!(counter_total(&rig.registry, "gridsec_ticks_total"), 5.0);
    assert_eq!(
        counter_total(&rig.registry, "gridsec_persistence_failures_total"),
        5.0
    );

    rig.store.set_unavailable(false);
    assert!(rig.engine.step().await.sampled);
    assert_eq!(rig.store.sample_count(), 1);
    let history = rig
        .engine
        .query_history(Utc::now() - chrono::Duration::minutes(1), Utc::now())
        .unwrap();
    assert_eq!(history.len(), 1);
    rig.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn security_alert_feed_scores_and_notifies() {
    let rig = rig().await;
    let mut sub = rig.engine.subscribe();
    drain(&mut sub);

    rig.bus.publish(
        "fyp_grid_99/security/alert",
        r#"{"category": "network", "subcategory": "port_scan", "severity": "high"}"#,
    );
    eventually(&rig.engine, |state| state.attack_score == 30.0).await;

    let seen = drain(&mut sub);
    assert!(matches!(&seen[0], Notification::ThreatDetected(event) if event.severity() == Severity::High));
    assert!(matches!(&seen[1], Notification::StateUpdate(_)));
    match rig.engine.query_logs(LogKind::Threats, 5).unwrap() {
        LogRecords::Threats(threats) => assert_eq!(threats.len(), 1),
        other => panic!("unexpected records {other:?}"),
    }
    rig.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn link_loss_is_broadcast_and_falls_back() {
    let rig = rig().await;
    connect(&rig).await;
    let mut sub = rig.engine.subscribe();
    drain(&mut sub);

    rig.bus.disconnect("broker went away");
    eventually(&rig.engine, |state| !state.mqtt_connected).await;
    let seen = drain(&mut sub);
    assert_eq!(
        seen[0],
        Notification::MqttStatus(gridsec_msg::LinkStatus { connected: false })
    );

    let outcome = rig.engine.apply_control("toggle_area1", "op").await.unwrap();
    assert_eq!(outcome.delivery, Delivery::Local);
    rig.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_events_are_audited() {
    let rig = rig().await;
    assert!(rig
        .engine
        .record_session(SessionEvent::Login, "alice", json!({"ip": "10.0.0.4"})));
    assert!(rig
        .engine
        .record_session(SessionEvent::Logout, "alice", json!({})));
    match rig.engine.query_logs(LogKind::Audit, 1).unwrap() {
        LogRecords::Audit(entries) => assert_eq!(entries[0].record.action, "LOGOUT"),
        other => panic!("unexpected records {other:?}"),
    }
    let status = rig.engine.security_status();
    assert!(status.threat_intel.enabled);
    assert_eq!(status.threat_intel.total_indicators, 1250);
    rig.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simulation_mode_drives_measurements_and_ticks() {
    let config = EngineConfig {
        tick_interval: Duration::from_millis(20),
        seed: Some(9),
        ..EngineConfig::default()
    };
    let simulator = SimulatorConfig {
        interval: Duration::from_millis(10),
        ..SimulatorConfig::default()
    };
    let registry = new_registry();
    let handle = EngineBuilder::new(config)
        .simulation(simulator)
        .metrics(registry.clone())
        .start()
        .await
        .unwrap();
    let engine = handle.engine();

    let state = eventually(&engine, |state| {
        state.status == "OK" && state.security.total_inspected > 0
    })
    .await;
    assert!((200.0..=250.0).contains(&state.voltage));
    assert!((49.5..=50.5).contains(&state.frequency));
    assert!(counter_total(&registry, "gridsec_ticks_total") >= 1.0);
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_configuration_is_refused() {
    let config = EngineConfig {
        decay_step: 3.0,
        ..EngineConfig::default()
    };
    let err = EngineBuilder::new(config).start().await.unwrap_err();
    assert!(format!("{err:#}").contains("decay_step"));
}
