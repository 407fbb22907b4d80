//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry ingestion contracts and the hardware/simulated strategies."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Telemetry ingestion.
//!
//! The bus transport is reduced to two seams: [`BusClient`] delivers incoming
//! connectivity changes and messages, [`OutboundLink`] publishes breaker
//! commands and bill updates toward the hardware. Both the hardware and the
//! simulated strategy implement [`TelemetryIngestor`]; a deployment runs
//! exactly one of them.
use async_trait::async_trait;
use bytes::Bytes;
use gridsec_msg::{BillReport, BreakerCommand, PayloadError};
use tokio::sync::broadcast;

pub mod hardware;
pub mod memory;
pub mod simulated;

pub use hardware::HardwareIngestor;
pub use memory::{memory_bus, MemoryBus, MemoryBusSender, RecordingLink};
pub use simulated::SimulatedIngestor;

/// Event delivered by the bus transport.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// The transport (re)connected and holds its subscription.
    Connected,
    /// The transport lost the broker.
    Disconnected { reason: String },
    /// A message arrived on `topic`.
    Message { topic: String, payload: Bytes },
}

/// Source of incoming bus events.
#[async_trait]
pub trait BusClient: Send {
    /// Wait for the next event. `None` means the transport closed for good.
    async fn next_event(&mut self) -> Option<BusEvent>;
}

/// Outward delivery toward the hardware.
#[async_trait]
pub trait OutboundLink: Send + Sync {
    /// Publish a breaker command on the control topic.
    async fn publish_control(&self, command: BreakerCommand) -> anyhow::Result<()>;

    /// Publish the current bill on the bill topic.
    async fn publish_bill(&self, report: BillReport) -> anyhow::Result<()>;
}

/// Failures while translating a bus message into a state mutation.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unrecognised topic `{0}`")]
    UnknownTopic(String),
    #[error("malformed {topic} payload: {source}")]
    Malformed {
        topic: &'static str,
        #[source]
        source: PayloadError,
    },
}

/// Capability shared by the ingestion strategies: consume measurement events
/// and apply them to the state store until shutdown.
#[async_trait]
pub trait TelemetryIngestor: Send {
    /// Strategy name used in logs.
    fn kind(&self) -> &'static str;

    /// Drive ingestion until `shutdown` fires or the source is exhausted.
    async fn run(&mut self, shutdown: broadcast::Receiver<()>);
}
