//! ---
//! ems_section: "11-simulation-test-harness"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bounded random-walk telemetry generator."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use gridsec_common::{SimulatorConfig, WalkConfig};
use gridsec_msg::SystemState;
use rand::prelude::*;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::TelemetryIngestor;
use crate::engine::EngineContext;

/// Simulator strategy: perturbs the measurement fields by bounded random
/// deltas on a fixed interval, independent of any transport.
pub struct SimulatedIngestor {
    context: Arc<EngineContext>,
    config: SimulatorConfig,
    rng: StdRng,
}

impl SimulatedIngestor {
    pub(crate) fn new(context: Arc<EngineContext>, config: SimulatorConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        Self {
            context,
            config,
            rng,
        }
    }

    /// Overwrite the measurement fields with the configured starting point.
    fn seed_state(&self) {
        let config = &self.config;
        self.context.store.mutate(|state| {
            state.gen_mw = config.generation.initial;
            state.load_mw = config.load.initial;
            state.voltage = config.voltage.initial;
            state.frequency = config.frequency.initial;
            state.gen_rpm = config.speed.initial;
            state.status = "OK".to_owned();
            state.touch(Utc::now());
        });
    }

    /// One perturbation of every simulated field.
    fn step(&mut self) {
        let config = &self.config;
        let rng = &mut self.rng;
        self.context.store.mutate(|state| {
            perturb(rng, config, state);
            state.touch(Utc::now());
        });
    }
}

/// Random-walk every simulated field once, clamped to its bounds.
pub fn perturb<R: Rng + ?Sized>(rng: &mut R, config: &SimulatorConfig, state: &mut SystemState) {
    state.gen_mw = walk(rng, state.gen_mw, &config.generation);
    state.load_mw = walk(rng, state.load_mw, &config.load);
    state.voltage = walk(rng, state.voltage, &config.voltage);
    state.frequency = walk(rng, state.frequency, &config.frequency);
    state.gen_rpm = walk(rng, state.gen_rpm, &config.speed);
}

fn walk<R: Rng + ?Sized>(rng: &mut R, current: f64, config: &WalkConfig) -> f64 {
    let delta = if config.max_delta > 0.0 {
        rng.gen_range(-config.max_delta..=config.max_delta)
    } else {
        0.0
    };
    config.bounds.clamp(current + delta)
}

#[async_trait]
impl TelemetryIngestor for SimulatedIngestor {
    fn kind(&self) -> &'static str {
        "simulation"
    }

    async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) {
        self.seed_state();
        let period = self.config.interval;
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("simulated ingestor shutdown");
                    break;
                }
                _ = interval.tick() => self.step(),
            }
        }
    }
}
