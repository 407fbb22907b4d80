//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "MQTT transport for the hardware ingestor and outbound link."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use gridsec_common::MqttConfig;
use gridsec_core::{BusClient, BusEvent, OutboundLink};
use gridsec_msg::{BillReport, BreakerCommand};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tracing::{debug, info, warn};

/// Requests buffered between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 64;

/// Build the receiving and publishing halves of one broker session.
///
/// Nothing touches the network until [`MqttBus`] is polled by the ingestor.
pub fn mqtt_transport(config: &MqttConfig) -> (MqttBus, MqttLink) {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(true);
    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    info!(
        host = %config.host,
        port = config.port,
        topic_root = %config.topic_root,
        "mqtt transport configured"
    );

    let bus = MqttBus {
        eventloop,
        client: client.clone(),
        subscription: config.subscription(),
        reconnect_delay: config.reconnect_delay,
        backoff: false,
    };
    let link = MqttLink {
        client,
        control_topic: config.control_topic(),
        bill_topic: config.bill_topic(),
    };
    (bus, link)
}

/// Receiving half: drives the rumqttc event loop and reconnects forever.
pub struct MqttBus {
    eventloop: EventLoop,
    client: AsyncClient,
    subscription: String,
    reconnect_delay: Duration,
    backoff: bool,
}

impl MqttBus {
    fn subscribe(&self) {
        // Clean sessions drop subscriptions, so every ConnAck resubscribes.
        match self.client.try_subscribe(self.subscription.clone(), QoS::AtMostOnce) {
            Ok(()) => debug!(topic = %self.subscription, "subscription requested"),
            Err(err) => warn!(topic = %self.subscription, error = %err, "subscribe request failed"),
        }
    }
}

/// Translate one incoming rumqttc event. `None` for protocol chatter.
fn map_event(event: Event) -> Option<BusEvent> {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => Some(BusEvent::Connected),
        Event::Incoming(Packet::Publish(publish)) => Some(BusEvent::Message {
            topic: publish.topic,
            payload: publish.payload,
        }),
        Event::Incoming(Packet::Disconnect) => Some(BusEvent::Disconnected {
            reason: "broker sent disconnect".to_owned(),
        }),
        _ => None,
    }
}

#[async_trait]
impl BusClient for MqttBus {
    async fn next_event(&mut self) -> Option<BusEvent> {
        if std::mem::take(&mut self.backoff) {
            tokio::time::sleep(self.reconnect_delay).await;
        }
        loop {
            match self.eventloop.poll().await {
                Ok(event) => {
                    if let Some(event) = map_event(event) {
                        if event == BusEvent::Connected {
                            self.subscribe();
                        }
                        return Some(event);
                    }
                }
                Err(err) => {
                    self.backoff = true;
                    return Some(BusEvent::Disconnected {
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}

/// Publishing half. Requests are queued without waiting on the network, so a
/// stalled broker surfaces as an error instead of blocking the caller.
#[derive(Clone)]
pub struct MqttLink {
    client: AsyncClient,
    control_topic: String,
    bill_topic: String,
}

#[async_trait]
impl OutboundLink for MqttLink {
    async fn publish_control(&self, command: BreakerCommand) -> anyhow::Result<()> {
        self.client
            .try_publish(
                self.control_topic.clone(),
                QoS::AtLeastOnce,
                false,
                command.encode(),
            )
            .with_context(|| format!("publishing breaker command to {}", self.control_topic))
    }

    async fn publish_bill(&self, report: BillReport) -> anyhow::Result<()> {
        self.client
            .try_publish(self.bill_topic.clone(), QoS::AtMostOnce, false, report.encode())
            .with_context(|| format!("publishing bill to {}", self.bill_topic))
    }
}
