//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "In-process bus and recording outbound link."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use gridsec_msg::{BillReport, BreakerCommand};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{BusClient, BusEvent, OutboundLink};

/// Create a connected sender/client pair.
pub fn memory_bus() -> (MemoryBusSender, MemoryBus) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemoryBusSender { tx }, MemoryBus { rx })
}

/// Receiving half, handed to the hardware ingestor.
#[derive(Debug)]
pub struct MemoryBus {
    rx: mpsc::UnboundedReceiver<BusEvent>,
}

#[async_trait]
impl BusClient for MemoryBus {
    async fn next_event(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }
}

/// Sending half, playing the role of the broker.
#[derive(Debug, Clone)]
pub struct MemoryBusSender {
    tx: mpsc::UnboundedSender<BusEvent>,
}

impl MemoryBusSender {
    pub fn connect(&self) -> bool {
        self.tx.send(BusEvent::Connected).is_ok()
    }

    pub fn disconnect(&self, reason: impl Into<String>) -> bool {
        self.tx
            .send(BusEvent::Disconnected {
                reason: reason.into(),
            })
            .is_ok()
    }

    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<Bytes>) -> bool {
        self.tx
            .send(BusEvent::Message {
                topic: topic.into(),
                payload: payload.into(),
            })
            .is_ok()
    }
}

/// Outbound link that keeps everything it was asked to publish.
#[derive(Debug, Default)]
pub struct RecordingLink {
    controls: Mutex<Vec<BreakerCommand>>,
    bills: Mutex<Vec<BillReport>>,
    failing: AtomicBool,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn controls(&self) -> Vec<BreakerCommand> {
        self.controls.lock().clone()
    }

    pub fn bills(&self) -> Vec<BillReport> {
        self.bills.lock().clone()
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("recording link is failing");
        }
        Ok(())
    }
}

#[async_trait]
impl OutboundLink for RecordingLink {
    async fn publish_control(&self, command: BreakerCommand) -> anyhow::Result<()> {
        self.check()?;
        self.controls.lock().push(command);
        Ok(())
    }

    async fn publish_bill(&self, report: BillReport) -> anyhow::Result<()> {
        self.check()?;
        self.bills.lock().push(report);
        Ok(())
    }
}
