//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Serialized access to the single shared system state record."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use gridsec_msg::{LinkStatus, Notification, SystemState};
use parking_lot::Mutex;

use crate::broadcast::{BroadcastHub, Subscription};

/// Owner of the one `SystemState` instance.
///
/// Every read and write goes through the mutex; a transition and the broadcast
/// it triggers happen under the same critical section, so all observers see
/// committed snapshots in one global order.
#[derive(Debug)]
pub struct StateStore {
    state: Mutex<SystemState>,
    hub: BroadcastHub,
}

impl StateStore {
    pub fn new(initial: SystemState, hub: BroadcastHub) -> Self {
        Self {
            state: Mutex::new(initial),
            hub,
        }
    }

    /// Immutable snapshot of the current record.
    pub fn read(&self) -> SystemState {
        self.state.lock().clone()
    }

    /// Run `f` against the current record without copying it.
    pub fn inspect<R>(&self, f: impl FnOnce(&SystemState) -> R) -> R {
        f(&self.state.lock())
    }

    /// Apply `f` atomically, broadcast the resulting snapshot and return it.
    ///
    /// `f` must be total: it is not allowed to panic halfway through.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut SystemState) -> R) -> (R, SystemState) {
        self.transition(|state, _| f(state))
    }

    /// Like [`StateStore::mutate`], but `f` may queue extra notifications
    /// (threat alerts, link status) which are published ahead of the snapshot.
    pub fn transition<R>(
        &self,
        f: impl FnOnce(&mut SystemState, &mut Vec<Notification>) -> R,
    ) -> (R, SystemState) {
        let mut state = self.state.lock();
        let mut events = Vec::new();
        let value = f(&mut state, &mut events);
        let snapshot = state.clone();
        for event in events {
            self.hub.publish(event);
        }
        self.hub.publish(Notification::StateUpdate(snapshot.clone()));
        (value, snapshot)
    }

    /// Record a link connectivity change and notify observers.
    pub fn set_link(&self, connected: bool) -> SystemState {
        let ((), snapshot) = self.transition(|state, events| {
            state.mqtt_connected = connected;
            events.push(Notification::MqttStatus(LinkStatus { connected }));
        });
        snapshot
    }

    /// Subscribe an observer. The subscription yields the connectivity flag and
    /// the snapshot current at this instant before any live notification.
    pub fn subscribe(&self) -> (Subscription, SystemState) {
        let state = self.state.lock();
        let snapshot = state.clone();
        let subscription = self.hub.attach(vec![
            Notification::MqttStatus(LinkStatus {
                connected: snapshot.mqtt_connected,
            }),
            Notification::StateUpdate(snapshot.clone()),
        ]);
        drop(state);
        (subscription, snapshot)
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsec_metrics::{new_registry, EngineMetrics};
    use std::sync::Arc;

    fn store() -> StateStore {
        let metrics = EngineMetrics::new(new_registry()).unwrap();
        StateStore::new(SystemState::default(), BroadcastHub::new(16, metrics))
    }

    #[test]
    fn first_snapshot_matches_state_at_subscription() {
        let store = store();
        store.mutate(|state| state.gen_mw = 480.0);
        let (mut sub, at_subscribe) = store.subscribe();
        assert_eq!(at_subscribe, store.read());

        assert!(matches!(sub.try_next(), Some(Notification::MqttStatus(_))));
        match sub.try_next() {
            Some(Notification::StateUpdate(first)) => assert_eq!(first, at_subscribe),
            other => panic!("unexpected notification {other:?}"),
        }
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn each_mutation_broadcasts_once() {
        let store = store();
        let (mut sub, _) = store.subscribe();
        sub.try_next();
        sub.try_next();
        store.mutate(|state| state.load_mw = 12.0);
        let mut count = 0;
        while sub.try_next().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[test]
    fn link_change_emits_status_then_snapshot() {
        let store = store();
        let (mut sub, _) = store.subscribe();
        sub.try_next();
        sub.try_next();
        store.set_link(true);
        assert_eq!(
            sub.try_next(),
            Some(Notification::MqttStatus(LinkStatus { connected: true }))
        );
        match sub.try_next() {
            Some(Notification::StateUpdate(state)) => assert!(state.mqtt_connected),
            other => panic!("unexpected notification {other:?}"),
        }
    }

    #[test]
    fn concurrent_writers_never_interleave_fields() {
        let store = Arc::new(store());
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        store.mutate(|state| {
                            state.gen_mw = worker as f64;
                            state.load_mw = worker as f64;
                        });
                        let snapshot = store.read();
                        assert_eq!(snapshot.gen_mw, snapshot.load_mw);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
    }
}
