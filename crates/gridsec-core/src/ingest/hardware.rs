//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bus-backed ingestion routing field telemetry by topic."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use gridsec_msg::{
    BillReport, BreakerReport, MeterReading, PayloadError, PlantReading, SecurityAlert, Topic,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{BusClient, BusEvent, IngestError, TelemetryIngestor};
use crate::billing::reconcile_bill_echo;
use crate::engine::EngineContext;
use crate::threat::event_from_alert;

/// Hardware strategy: the bus feed is the authority for measurements and
/// breaker state.
pub struct HardwareIngestor {
    context: Arc<EngineContext>,
    client: Box<dyn BusClient>,
}

impl HardwareIngestor {
    pub(crate) fn new(context: Arc<EngineContext>, client: Box<dyn BusClient>) -> Self {
        Self { context, client }
    }

    fn handle(&self, event: BusEvent) {
        match event {
            BusEvent::Connected => self.mark_link(true, "connected"),
            BusEvent::Disconnected { reason } => self.mark_link(false, &reason),
            BusEvent::Message { topic, payload } => {
                match apply_message(&self.context, &topic, &payload) {
                    Ok(kind) => self.context.metrics.record_ingest(kind.label()),
                    Err(IngestError::UnknownTopic(_)) => {
                        debug!(topic = %topic, "ignoring message on unrecognised topic");
                    }
                    Err(err) => {
                        if let IngestError::Malformed { topic: kind, .. } = &err {
                            self.context.metrics.record_ingest_error(kind);
                        }
                        warn!(topic = %topic, error = %err, "dropping malformed bus message");
                    }
                }
            }
        }
    }

    fn mark_link(&self, connected: bool, reason: &str) {
        let changed = self
            .context
            .store
            .inspect(|state| state.mqtt_connected != connected);
        if !changed {
            return;
        }
        self.context.store.set_link(connected);
        self.context.metrics.set_link_connected(connected);
        if connected {
            info!("hardware link up");
        } else {
            warn!(reason, "hardware link down");
        }
    }
}

/// Decode `payload` for `topic` and apply it. Decoding completes before the
/// state lock is taken, so a malformed payload changes nothing.
pub(crate) fn apply_message(
    context: &EngineContext,
    topic: &str,
    payload: &[u8],
) -> Result<Topic, IngestError> {
    let kind = Topic::classify(topic).ok_or_else(|| IngestError::UnknownTopic(topic.to_owned()))?;
    let malformed = |source: PayloadError| IngestError::Malformed {
        topic: kind.label(),
        source,
    };
    let now = Utc::now();

    match kind {
        Topic::Plant => {
            let reading = PlantReading::decode(payload).map_err(malformed)?;
            context.store.mutate(move |state| {
                state.gen_mw = reading.gen;
                state.gen_rpm = reading.rpm;
                state.status = reading.status;
                if let Some(voltage) = reading.voltage {
                    state.voltage = voltage;
                }
                if let Some(frequency) = reading.frequency {
                    state.frequency = frequency;
                }
                state.touch(now);
            });
        }
        Topic::MeterData => {
            let reading = MeterReading::decode(payload).map_err(malformed)?;
            context.store.mutate(|state| {
                state.load_mw = reading.load;
                state.touch(now);
            });
        }
        Topic::GridControl => {
            let report = BreakerReport::decode(payload).map_err(malformed)?;
            context.store.mutate(|state| {
                for (area, status) in report.entries() {
                    state.set_breaker(area, status);
                }
                state.touch(now);
            });
        }
        Topic::MeterBill => {
            let report = BillReport::decode(payload).map_err(malformed)?;
            context.store.mutate(|state| {
                reconcile_bill_echo(state, report.bill);
                state.touch(now);
            });
        }
        Topic::SecurityAlert => {
            let alert = SecurityAlert::decode(payload).map_err(malformed)?;
            context.commit_threat(event_from_alert(alert, now));
        }
    }
    Ok(kind)
}

#[async_trait]
impl TelemetryIngestor for HardwareIngestor {
    fn kind(&self) -> &'static str {
        "hardware"
    }

    async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("hardware ingestor shutdown");
                    break;
                }
                event = self.client.next_event() => match event {
                    Some(event) => self.handle(event),
                    None => {
                        warn!("bus transport closed; hardware ingestion stopped");
                        self.mark_link(false, "transport closed");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_context;
    use gridsec_msg::{BreakerStatus, Severity};

    #[test]
    fn plant_message_updates_generation_and_freshness() {
        let context = test_context();
        let kind = apply_message(
            &context,
            "fyp_grid_99/plant",
            br#"{"gen": 512.0, "rpm": 2990, "status": "RUNNING", "voltage": 231.2}"#,
        )
        .unwrap();
        assert_eq!(kind, Topic::Plant);
        let state = context.store.read();
        assert_eq!(state.gen_mw, 512.0);
        assert_eq!(state.gen_rpm, 2990.0);
        assert_eq!(state.status, "RUNNING");
        assert_eq!(state.voltage, 231.2);
        assert_eq!(state.frequency, 0.0);
        assert!(state.last_update.is_some());
    }

    #[test]
    fn malformed_plant_payload_changes_nothing() {
        let context = test_context();
        apply_message(&context, "site/plant", br#"{"gen": 100.0}"#).unwrap();
        let before = context.store.read();

        let err = apply_message(&context, "site/plant", br#"{"gen": "lots""#).unwrap_err();
        assert!(matches!(err, IngestError::Malformed { topic: "plant", .. }));

        let after = context.store.read();
        assert_eq!(after.gen_mw, before.gen_mw);
        assert_eq!(after.status, before.status);
        assert_eq!(after.last_update, before.last_update);
    }

    #[test]
    fn control_echo_is_breaker_authority() {
        let context = test_context();
        apply_message(&context, "site/grid/control", br#"{"area2": "ON"}"#).unwrap();
        let state = context.store.read();
        assert_eq!(state.area1, BreakerStatus::DeEnergized);
        assert_eq!(state.area2, BreakerStatus::Energized);
    }

    #[test]
    fn bill_echo_never_lowers_bill() {
        let context = test_context();
        context.store.mutate(|state| state.calculated_bill = 3.337);
        apply_message(&context, "site/meter/bill", br#"{"bill": 3.34}"#).unwrap();
        apply_message(&context, "site/meter/bill", br#"{"bill": 1.0}"#).unwrap();
        assert_eq!(context.store.read().calculated_bill, 3.34);
    }

    #[test]
    fn security_alert_scores_and_persists() {
        let context = test_context();
        apply_message(
            &context,
            "site/security/alert",
            br#"{"category": "injection", "subcategory": "fdi", "severity": "critical"}"#,
        )
        .unwrap();
        let state = context.store.read();
        assert_eq!(state.attack_score, 50.0);
        let stored = context.sampler.records().recent_threats(10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].record.severity(), Severity::Critical);
    }

    #[test]
    fn unknown_topics_are_reported_not_applied() {
        let context = test_context();
        let before = context.store.read();
        let err = apply_message(&context, "site/weather", b"{}").unwrap_err();
        assert!(matches!(err, IngestError::UnknownTopic(_)));
        assert_eq!(context.store.read(), before);
    }
}
