//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Observer fan-out of state snapshots and threat notifications."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;

use gridsec_metrics::EngineMetrics;
use gridsec_msg::Notification;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

/// Push-only fan-out to every connected observer.
///
/// Each observer owns a bounded receiver. An observer that falls more than the
/// channel capacity behind skips the oldest notifications and resumes with the
/// newest; the publisher never waits.
#[derive(Clone, Debug)]
pub struct BroadcastHub {
    sender: broadcast::Sender<Notification>,
    metrics: EngineMetrics,
}

impl BroadcastHub {
    pub fn new(capacity: usize, metrics: EngineMetrics) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, metrics }
    }

    /// Fire-and-forget publish. Returns the number of observers reached.
    pub fn publish(&self, notification: Notification) -> usize {
        self.metrics.record_notification(notification.event_name());
        // A send error only means nobody is listening.
        self.sender.send(notification).unwrap_or(0)
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Attach a new observer primed with its initial synchronization point.
    ///
    /// Callers must create the subscription while holding the state lock so
    /// the primed snapshot and the live stream line up without gap or overlap.
    pub(crate) fn attach(&self, initial: Vec<Notification>) -> Subscription {
        self.metrics.observer_joined();
        Subscription {
            initial: initial.into(),
            receiver: self.sender.subscribe(),
            metrics: self.metrics.clone(),
        }
    }
}

/// One observer's view of the notification stream.
#[derive(Debug)]
pub struct Subscription {
    initial: VecDeque<Notification>,
    receiver: broadcast::Receiver<Notification>,
    metrics: EngineMetrics,
}

impl Subscription {
    /// Next notification, or `None` once the engine has shut down.
    pub async fn next(&mut self) -> Option<Notification> {
        if let Some(notification) = self.initial.pop_front() {
            return Some(notification);
        }
        loop {
            match self.receiver.recv().await {
                Ok(notification) => return Some(notification),
                Err(RecvError::Lagged(missed)) => {
                    debug!(missed, "observer lagged; skipping to newest notifications");
                    self.metrics.record_dropped(missed);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::next`]. `None` when nothing is queued.
    pub fn try_next(&mut self) -> Option<Notification> {
        if let Some(notification) = self.initial.pop_front() {
            return Some(notification);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    self.metrics.record_dropped(missed);
                }
                Err(_) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.metrics.observer_left();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsec_metrics::{counter_total, new_registry};
    use gridsec_msg::{LinkStatus, SystemState};

    fn hub(capacity: usize) -> (BroadcastHub, gridsec_metrics::SharedRegistry) {
        let registry = new_registry();
        let metrics = EngineMetrics::new(registry.clone()).unwrap();
        (BroadcastHub::new(capacity, metrics), registry)
    }

    #[test]
    fn publishing_without_observers_is_harmless() {
        let (hub, _) = hub(4);
        assert_eq!(hub.publish(Notification::StateUpdate(SystemState::default())), 0);
    }

    #[test]
    fn initial_sync_precedes_live_notifications() {
        let (hub, _) = hub(4);
        let mut sub = hub.attach(vec![Notification::MqttStatus(LinkStatus { connected: false })]);
        let mut live = SystemState::default();
        live.gen_mw = 42.0;
        hub.publish(Notification::StateUpdate(live.clone()));

        assert_eq!(
            sub.try_next(),
            Some(Notification::MqttStatus(LinkStatus { connected: false }))
        );
        assert_eq!(sub.try_next(), Some(Notification::StateUpdate(live)));
        assert_eq!(sub.try_next(), None);
    }

    #[test]
    fn slow_observer_drops_oldest_and_keeps_order() {
        let (hub, registry) = hub(2);
        let mut sub = hub.attach(Vec::new());
        for gen in 0..5 {
            let mut state = SystemState::default();
            state.gen_mw = gen as f64;
            hub.publish(Notification::StateUpdate(state));
        }
        let mut seen = Vec::new();
        while let Some(Notification::StateUpdate(state)) = sub.try_next() {
            seen.push(state.gen_mw);
        }
        assert_eq!(seen, vec![3.0, 4.0]);
        assert_eq!(counter_total(&registry, "gridsec_notifications_dropped_total"), 3.0);
    }
}
