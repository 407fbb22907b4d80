//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Engine lifecycle: tick loop, ingestion task and query surface."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use gridsec_common::{EngineConfig, SimulatorConfig};
use gridsec_metrics::{new_registry, EngineMetrics, SharedRegistry};
use gridsec_msg::{
    AuditEntry, HistoricalSample, Notification, Recorded, SystemState, ThreatEvent,
};
use gridsec_persistence::{MemoryStore, PersistenceError, RecordStore};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use strum::{Display, EnumString};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::billing::BillingAccumulator;
use crate::broadcast::{BroadcastHub, Subscription};
use crate::control::{ControlCommandRouter, ControlError, ControlOutcome};
use crate::ingest::{
    BusClient, HardwareIngestor, OutboundLink, SimulatedIngestor, TelemetryIngestor,
};
use crate::sampler::PersistenceSampler;
use crate::state::StateStore;
use crate::threat::{ThreatScoringEngine, THREAT_INTEL_INDICATORS};
use crate::views::{EngineStats, LogKind, LogRecords, SecurityStatus, ThreatIntel, ThreatStats};

/// Collaborators shared by the tick loop, the ingestor and the command router.
pub(crate) struct EngineContext {
    pub(crate) store: StateStore,
    pub(crate) scoring: ThreatScoringEngine,
    pub(crate) billing: BillingAccumulator,
    pub(crate) sampler: PersistenceSampler,
    pub(crate) metrics: EngineMetrics,
    pub(crate) outbound: Option<Arc<dyn OutboundLink>>,
    rng: Mutex<StdRng>,
    simulated_threats: bool,
    started_at: DateTime<Utc>,
}

impl EngineContext {
    fn new(
        config: &EngineConfig,
        records: Arc<dyn RecordStore>,
        metrics: EngineMetrics,
        outbound: Option<Arc<dyn OutboundLink>>,
        simulated_threats: bool,
    ) -> Self {
        let hub = BroadcastHub::new(config.broadcast_capacity, metrics.clone());
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store: StateStore::new(SystemState::new(config.baseline_price_rate), hub),
            scoring: ThreatScoringEngine::new(config),
            billing: BillingAccumulator::new(config.billing_tick_fraction),
            sampler: PersistenceSampler::new(records, config.sample_probability, metrics.clone()),
            metrics,
            outbound,
            rng: Mutex::new(rng),
            simulated_threats,
            started_at: Utc::now(),
        }
    }

    /// Score, persist and announce a discrete threat.
    pub(crate) fn commit_threat(&self, event: ThreatEvent) -> SystemState {
        let scoring = &self.scoring;
        let ((), snapshot) = self.store.transition(|state, events| {
            scoring.apply(state, &event);
            events.push(Notification::ThreatDetected(event.clone()));
        });
        self.metrics.record_threat(&event.severity().to_string());
        self.sampler.record_threat(&event);
        info!(
            category = %event.classification.category,
            severity = %event.severity(),
            score = snapshot.attack_score,
            level = %snapshot.security_level,
            "threat recorded"
        );
        snapshot
    }

    /// One scoring, billing and sampling cycle.
    pub(crate) async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let started = std::time::Instant::now();
        let (inspected, threat, sampled) = {
            let mut rng = self.rng.lock();
            let inspected = self.scoring.draw_inspected(&mut *rng);
            let threat = if self.simulated_threats {
                self.scoring.draw_threat(&mut *rng, now)
            } else {
                None
            };
            (inspected, threat, self.sampler.should_sample(&mut *rng))
        };

        let (scoring, billing) = (&self.scoring, &self.billing);
        let ((), snapshot) = self.store.transition(|state, events| {
            billing.accrue(state);
            scoring.decay(state);
            if let Some(event) = &threat {
                scoring.apply(state, event);
                events.push(Notification::ThreatDetected(event.clone()));
            }
            state.security.total_inspected += inspected;
        });

        if let Some(event) = &threat {
            self.metrics.record_threat(&event.severity().to_string());
            self.sampler.record_threat(event);
            info!(
                category = %event.classification.category,
                severity = %event.severity(),
                score = snapshot.attack_score,
                "simulated threat"
            );
        }
        let sampled = sampled && self.sampler.record_sample(&snapshot, now);

        if snapshot.mqtt_connected {
            if let Some(link) = &self.outbound {
                self.billing
                    .forward(link.as_ref(), snapshot.calculated_bill, &self.metrics)
                    .await;
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        self.metrics
            .observe_tick(elapsed, snapshot.attack_score, snapshot.calculated_bill);
        debug!(
            elapsed_ms = elapsed * 1000.0,
            score = snapshot.attack_score,
            bill = snapshot.calculated_bill,
            sampled,
            "tick"
        );
        TickReport {
            snapshot,
            threat,
            sampled,
        }
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("simulated_threats", &self.simulated_threats)
            .field("started_at", &self.started_at)
            .field("outbound", &self.outbound.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> Arc<EngineContext> {
    let metrics = EngineMetrics::new(new_registry()).expect("fresh registry");
    let config = EngineConfig {
        seed: Some(7),
        ..EngineConfig::default()
    };
    Arc::new(EngineContext::new(
        &config,
        Arc::new(MemoryStore::new()),
        metrics,
        None,
        false,
    ))
}

/// What one tick did.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// State committed by the tick.
    pub snapshot: SystemState,
    /// Simulated threat drawn during the tick, if any.
    pub threat: Option<ThreatEvent>,
    /// Whether a historical sample was stored.
    pub sampled: bool,
}

/// Session boundary reported by the external login collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum SessionEvent {
    Login,
    Logout,
}

enum Telemetry {
    Simulation(SimulatorConfig),
    Hardware(Box<dyn BusClient>),
}

/// Assembles and starts a [`GridEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    telemetry: Telemetry,
    outbound: Option<Arc<dyn OutboundLink>>,
    records: Option<Arc<dyn RecordStore>>,
    registry: Option<SharedRegistry>,
    simulated_threats: Option<bool>,
}

impl EngineBuilder {
    /// Defaults to the simulator with an in-memory record store.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            telemetry: Telemetry::Simulation(SimulatorConfig::default()),
            outbound: None,
            records: None,
            registry: None,
            simulated_threats: None,
        }
    }

    /// Drive measurements from the bounded random walk.
    pub fn simulation(mut self, simulator: SimulatorConfig) -> Self {
        self.telemetry = Telemetry::Simulation(simulator);
        self.outbound = None;
        self
    }

    /// Drive measurements from a bus and publish commands through `outbound`.
    pub fn hardware(mut self, client: Box<dyn BusClient>, outbound: Arc<dyn OutboundLink>) -> Self {
        self.telemetry = Telemetry::Hardware(client);
        self.outbound = Some(outbound);
        self
    }

    pub fn records(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    /// Register engine metrics on `registry` instead of a private one.
    pub fn metrics(mut self, registry: SharedRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Override whether the tick draws simulated threats. Defaults to on in
    /// simulation mode and off in hardware mode, where the alert feed applies.
    pub fn simulated_threats(mut self, enabled: bool) -> Self {
        self.simulated_threats = Some(enabled);
        self
    }

    /// Validate configuration, then spawn the ingestion and tick tasks.
    pub async fn start(self) -> Result<EngineHandle> {
        self.config
            .validate()
            .context("invalid engine configuration")?;
        if let Telemetry::Simulation(simulator) = &self.telemetry {
            simulator
                .validate()
                .context("invalid simulator configuration")?;
        }

        let registry = self.registry.unwrap_or_else(new_registry);
        let metrics = EngineMetrics::new(registry).context("registering engine metrics")?;
        let records = self
            .records
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let simulated_threats = self
            .simulated_threats
            .unwrap_or(matches!(self.telemetry, Telemetry::Simulation(_)));
        let context = Arc::new(EngineContext::new(
            &self.config,
            records,
            metrics,
            self.outbound,
            simulated_threats,
        ));

        let mut ingestor: Box<dyn TelemetryIngestor> = match self.telemetry {
            Telemetry::Simulation(simulator) => Box::new(SimulatedIngestor::new(
                context.clone(),
                simulator,
                self.config.seed,
            )),
            Telemetry::Hardware(client) => Box::new(HardwareIngestor::new(context.clone(), client)),
        };
        info!(
            mode = ingestor.kind(),
            tick_ms = self.config.tick_interval.as_millis() as u64,
            simulated_threats,
            "engine starting"
        );

        let (shutdown, _) = broadcast::channel(4);
        let ingest_shutdown = shutdown.subscribe();
        let ingest_task = tokio::spawn(async move {
            ingestor.run(ingest_shutdown).await;
        });
        let tick_task = spawn_tick_loop(
            context.clone(),
            self.config.tick_interval,
            shutdown.subscribe(),
        );

        Ok(EngineHandle {
            engine: GridEngine::new(context),
            shutdown,
            tasks: vec![ingest_task, tick_task],
        })
    }
}

fn spawn_tick_loop(
    context: Arc<EngineContext>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("tick loop shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    context.tick(Utc::now()).await;
                }
            }
        }
    })
}

/// Running engine returned by [`EngineBuilder::start`].
#[derive(Debug)]
pub struct EngineHandle {
    engine: GridEngine,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Cloneable access to the running engine.
    pub fn engine(&self) -> GridEngine {
        self.engine.clone()
    }

    /// Stop the background tasks between iterations and wait for them.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(error = %err, "engine task join error");
                return Err(err).context("engine task panicked");
            }
        }
        info!("engine stopped");
        Ok(())
    }
}

/// Query and command surface over the running engine.
#[derive(Clone, Debug)]
pub struct GridEngine {
    context: Arc<EngineContext>,
    router: ControlCommandRouter,
}

impl GridEngine {
    fn new(context: Arc<EngineContext>) -> Self {
        let router = ControlCommandRouter::new(context.clone());
        Self { context, router }
    }

    pub fn get_state(&self) -> SystemState {
        self.context.store.read()
    }

    /// Route an operator action; see [`ControlCommandRouter::apply`].
    pub async fn apply_control(
        &self,
        action: &str,
        actor: &str,
    ) -> Result<ControlOutcome, ControlError> {
        self.router.apply(action, actor).await
    }

    /// Subscribe an observer, primed with connectivity and the current snapshot.
    pub fn subscribe(&self) -> Subscription {
        self.context.store.subscribe().0
    }

    pub fn observer_count(&self) -> usize {
        self.context.store.hub().observer_count()
    }

    pub fn query_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Recorded<HistoricalSample>>, PersistenceError> {
        self.context.sampler.records().query_history(start, end)
    }

    /// Most recent threat or audit records, newest first.
    pub fn query_logs(&self, kind: LogKind, limit: usize) -> Result<LogRecords, PersistenceError> {
        let records = self.context.sampler.records();
        Ok(match kind {
            LogKind::Threats => LogRecords::Threats(records.recent_threats(limit)?),
            LogKind::Audit => LogRecords::Audit(records.recent_audit(limit)?),
        })
    }

    /// Apply an externally produced threat event.
    pub fn inject_threat(&self, event: ThreatEvent) -> SystemState {
        self.context.commit_threat(event)
    }

    pub fn security_status(&self) -> SecurityStatus {
        let state = self.get_state();
        SecurityStatus {
            security_posture: state.security_level,
            attack_score: state.attack_score,
            stats: state.security,
            threat_intel: ThreatIntel {
                enabled: state.threat_intel_active,
                total_indicators: THREAT_INTEL_INDICATORS,
                last_refresh: self.context.started_at,
            },
            timestamp: Utc::now(),
        }
    }

    pub fn threat_stats(&self) -> Result<ThreatStats, PersistenceError> {
        let summary = self.context.sampler.records().threat_summary()?;
        let state = self.get_state();
        Ok(ThreatStats {
            total_threats: summary.total_threats,
            critical_threats: summary.critical_threats,
            threats_by_category: summary.threats_by_category,
            security_engine_stats: EngineStats {
                counters: state.security,
                attack_score: state.attack_score,
                security_posture: state.security_level,
            },
        })
    }

    /// Append a login or logout audit entry. Returns whether it was stored.
    pub fn record_session(&self, event: SessionEvent, actor: &str, details: Value) -> bool {
        let entry = AuditEntry::new(Utc::now(), event.to_string(), actor, details);
        self.context.sampler.record_audit(&entry)
    }

    /// Run one tick immediately, outside the background schedule.
    pub async fn step(&self) -> TickReport {
        self.context.tick(Utc::now()).await
    }
}
