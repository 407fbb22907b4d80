//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Attack score decay, severity weighting and simulated threat generation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use gridsec_common::EngineConfig;
use gridsec_msg::{
    SecurityAlert, Severity, SystemState, ThreatAction, ThreatClassification, ThreatEvent,
};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde_json::Value;

/// Categories drawn by the simulated threat generator.
pub const SIMULATED_CATEGORIES: [(&str, &str, &str); 4] = [
    ("network", "port_scan", "L3_NETWORK"),
    ("protocol", "malformed_mqtt_frame", "L4_PROTOCOL"),
    ("authentication", "credential_stuffing", "L5_AUTHENTICATION"),
    ("injection", "false_data_injection", "L7_APPLICATION"),
];

/// Relative draw weights for low, medium, high and critical severities.
const SEVERITY_WEIGHTS: [u32; 4] = [40, 30, 20, 10];

/// Threat-intel descriptor size reported on the security status view.
pub const THREAT_INTEL_INDICATORS: u64 = 1250;

/// Score and counter rules. Stateless apart from configuration; every method
/// is a total transformation over a `SystemState` borrowed from the store.
#[derive(Debug, Clone)]
pub struct ThreatScoringEngine {
    decay_step: f64,
    threat_probability: f64,
    intel_probability: f64,
    attack_price_rate: f64,
    attack_score_boost: f64,
    baseline_price_rate: f64,
    severity_index: WeightedIndex<u32>,
}

impl ThreatScoringEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            decay_step: config.decay_step,
            threat_probability: config.threat_probability,
            intel_probability: config.threat_intel_probability,
            attack_price_rate: config.attack_price_rate,
            attack_score_boost: config.attack_score_boost,
            baseline_price_rate: config.baseline_price_rate,
            severity_index: WeightedIndex::new(SEVERITY_WEIGHTS)
                .expect("severity weights are non-zero"),
        }
    }

    /// Move the score one step toward zero and recompute the level.
    pub fn decay(&self, state: &mut SystemState) {
        state.set_attack_score((state.attack_score - self.decay_step).max(0.0));
    }

    /// Apply a threat's severity weight and bump the block counters.
    pub fn apply(&self, state: &mut SystemState, event: &ThreatEvent) {
        state.raise_attack_score(event.severity().score_weight());
        if event.action == ThreatAction::Block {
            state.security.total_blocked += 1;
            if event
                .metadata
                .get("threat_intel")
                .and_then(Value::as_bool)
                .unwrap_or(false)
            {
                state.security.threat_intel_blocks += 1;
            }
        }
    }

    /// Operator demonstration of a rate attack.
    pub fn simulate_attack(&self, state: &mut SystemState) {
        state.price_rate = self.attack_price_rate;
        state.raise_attack_score(self.attack_score_boost);
    }

    /// Restore the baseline price and clear the score.
    pub fn reset(&self, state: &mut SystemState) {
        state.price_rate = self.baseline_price_rate;
        state.set_attack_score(0.0);
    }

    /// Packets inspected during one tick.
    pub fn draw_inspected<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        rng.gen_range(1..=5)
    }

    /// Low-probability simulated threat for one tick.
    pub fn draw_threat<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        at: DateTime<Utc>,
    ) -> Option<ThreatEvent> {
        if !rng.gen_bool(self.threat_probability) {
            return None;
        }
        let (category, subcategory, layer) =
            SIMULATED_CATEGORIES[rng.gen_range(0..SIMULATED_CATEGORIES.len())];
        let severity = Severity::ALL[self.severity_index.sample(rng)];
        let via_intel = rng.gen_bool(self.intel_probability);
        let explanation = format!(
            "simulated {} {} activity",
            severity,
            subcategory.replace('_', " ")
        );
        Some(
            ThreatEvent::blocked(
                at,
                layer,
                ThreatClassification {
                    category: category.to_owned(),
                    subcategory: subcategory.to_owned(),
                    severity,
                },
                explanation,
            )
            .with_metadata("source", "simulation")
            .with_metadata("threat_intel", via_intel),
        )
    }
}

/// Build a threat event from a field sensor report.
pub fn event_from_alert(alert: SecurityAlert, at: DateTime<Utc>) -> ThreatEvent {
    let explanation = alert.explanation.unwrap_or_else(|| {
        format!(
            "{} {} reported by field sensor",
            alert.category, alert.subcategory
        )
    });
    ThreatEvent::blocked(
        at,
        alert.layer.unwrap_or_else(|| "FIELD_SENSOR".to_owned()),
        ThreatClassification {
            category: alert.category,
            subcategory: alert.subcategory,
            severity: alert.severity,
        },
        explanation,
    )
    .with_metadata("source", "security_alert")
}
