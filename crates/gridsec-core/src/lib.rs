//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "State-sync and threat-scoring engine for the grid dashboard."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! One shared [`gridsec_msg::SystemState`] is mutated by three independent
//! producers: telemetry ingestion, the fixed-interval tick and operator
//! commands. Every committed mutation is pushed to all observers in a single
//! global order.

pub mod billing;
pub mod broadcast;
pub mod control;
pub mod engine;
pub mod ingest;
pub mod sampler;
pub mod state;
pub mod threat;
pub mod views;

pub use billing::{reconcile_bill_echo, BillingAccumulator};
pub use broadcast::{BroadcastHub, Subscription};
pub use control::{ControlAction, ControlCommandRouter, ControlError, ControlOutcome, Delivery};
pub use engine::{EngineBuilder, EngineHandle, GridEngine, SessionEvent, TickReport};
pub use ingest::{
    memory_bus, BusClient, BusEvent, IngestError, MemoryBus, MemoryBusSender, OutboundLink,
    RecordingLink, TelemetryIngestor,
};
pub use sampler::PersistenceSampler;
pub use state::StateStore;
pub use threat::{event_from_alert, ThreatScoringEngine};
pub use views::{EngineStats, LogKind, LogRecords, SecurityStatus, ThreatIntel, ThreatStats};
