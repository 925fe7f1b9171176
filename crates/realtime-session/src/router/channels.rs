use serde_json::Value;
use tokio::sync::broadcast;

use super::events::{
    ActivityEvent, ErrorEvent, InfoEvent, InventoryEvent, MapEvent, StateUpdateEvent, TypedEvent,
};

/// Broadcast channels for routed realtime messages.
///
/// Subscribing returns a receiver; dropping it unsubscribes. A receiver that falls more
/// than the channel capacity behind observes `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventChannels {
    raw: broadcast::Sender<Value>,
    typed: broadcast::Sender<TypedEvent>,
    info: broadcast::Sender<InfoEvent>,
    inventory: broadcast::Sender<InventoryEvent>,
    state_update: broadcast::Sender<StateUpdateEvent>,
    activity: broadcast::Sender<ActivityEvent>,
    map: broadcast::Sender<MapEvent>,
    error: broadcast::Sender<ErrorEvent>,
}

impl EventChannels {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            raw: broadcast::channel(capacity).0,
            typed: broadcast::channel(capacity).0,
            info: broadcast::channel(capacity).0,
            inventory: broadcast::channel(capacity).0,
            state_update: broadcast::channel(capacity).0,
            activity: broadcast::channel(capacity).0,
            map: broadcast::channel(capacity).0,
            error: broadcast::channel(capacity).0,
        }
    }

    /// Every processed document, verbatim, including unknown message types.
    pub fn subscribe_raw(&self) -> broadcast::Receiver<Value> {
        self.raw.subscribe()
    }

    /// All typed events on one channel.
    pub fn subscribe_typed(&self) -> broadcast::Receiver<TypedEvent> {
        self.typed.subscribe()
    }

    pub fn subscribe_info(&self) -> broadcast::Receiver<InfoEvent> {
        self.info.subscribe()
    }

    pub fn subscribe_inventory(&self) -> broadcast::Receiver<InventoryEvent> {
        self.inventory.subscribe()
    }

    pub fn subscribe_state_updates(&self) -> broadcast::Receiver<StateUpdateEvent> {
        self.state_update.subscribe()
    }

    pub fn subscribe_activity(&self) -> broadcast::Receiver<ActivityEvent> {
        self.activity.subscribe()
    }

    pub fn subscribe_map(&self) -> broadcast::Receiver<MapEvent> {
        self.map.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorEvent> {
        self.error.subscribe()
    }

    // Sending with no subscribers is not an error.
    pub(crate) fn publish_raw(&self, document: Value) {
        let _ = self.raw.send(document);
    }

    pub(crate) fn publish(&self, event: TypedEvent) {
        let _ = self.typed.send(event.clone());
        match event {
            TypedEvent::Info(e) => {
                let _ = self.info.send(e);
            }
            TypedEvent::Inventory(e) => {
                let _ = self.inventory.send(e);
            }
            TypedEvent::StateUpdate(e) => {
                let _ = self.state_update.send(e);
            }
            TypedEvent::Activity(e) => {
                let _ = self.activity.send(e);
            }
            TypedEvent::Map(e) => {
                let _ = self.map.send(e);
            }
            TypedEvent::Error(e) => {
                let _ = self.error.send(e);
            }
        }
    }
}
