//! Inbound message routing.
//!
//! Frames are parsed into a JSON document, discriminated on `msg_type` and decoded
//! into a [`TypedEvent`]. Each processed document is also published verbatim on the
//! raw channel. Nothing here ever fails the transport: bad frames are logged and
//! dropped, and later frames are unaffected.

mod channels;
mod events;

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use thiserror::Error;
use tracing::{trace, warn};

use crate::realtime::FrameSink;

pub use channels::EventChannels;
pub use events::{
    ActivityEvent, ChangeOp, ErrorEvent, GeoPoint, InfoEvent, InventoryEvent, MapEvent,
    MessageKind, StateUpdateEvent, TypedEvent,
};

/// Why a frame was dropped.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("Missing or non-string msg_type")]
    MissingType,

    #[error("Failed to decode {msg_type} payload: {source}")]
    Decode {
        msg_type: MessageKind,
        #[source]
        source: serde_json::Error,
    },
}

/// What happened to a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Published on the typed and raw channels.
    Routed(MessageKind),
    /// Unknown `msg_type`; published on the raw channel only.
    RawOnly(String),
    /// Published nowhere.
    Dropped,
}

/// Router counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub routed: u64,
    pub raw_only: u64,
    pub dropped: u64,
}

enum Parsed {
    Typed(TypedEvent, Value),
    Unknown(String, Value),
}

/// Parses frames and fans them out on [`EventChannels`].
#[derive(Debug)]
pub struct MessageRouter {
    channels: EventChannels,
    routed: AtomicU64,
    raw_only: AtomicU64,
    dropped: AtomicU64,
}

impl MessageRouter {
    pub fn new(channels: EventChannels) -> Self {
        Self {
            channels,
            routed: AtomicU64::new(0),
            raw_only: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn channels(&self) -> &EventChannels {
        &self.channels
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            routed: self.routed.load(Ordering::Relaxed),
            raw_only: self.raw_only.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Route one frame.
    pub fn route(&self, frame: &str) -> RouteOutcome {
        match parse(frame) {
            Ok(Parsed::Typed(event, document)) => {
                let kind = event.kind();
                trace!(msg_type = %kind, event_id = event.event_id(), "Routing realtime event");
                self.channels.publish_raw(document);
                self.channels.publish(event);
                self.routed.fetch_add(1, Ordering::Relaxed);
                RouteOutcome::Routed(kind)
            }
            Ok(Parsed::Unknown(msg_type, document)) => {
                warn!(msg_type = %msg_type, "Unknown realtime message type");
                self.channels.publish_raw(document);
                self.raw_only.fetch_add(1, Ordering::Relaxed);
                RouteOutcome::RawOnly(msg_type)
            }
            Err(e) => {
                warn!(error = %e, len = frame.len(), "Dropping realtime frame");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                RouteOutcome::Dropped
            }
        }
    }
}

impl FrameSink for MessageRouter {
    fn on_frame(&self, frame: &str) {
        self.route(frame);
    }
}

fn parse(frame: &str) -> Result<Parsed, RouteError> {
    let document: Value = serde_json::from_str(frame)?;
    let Value::Object(fields) = &document else {
        return Err(RouteError::NotAnObject);
    };
    let msg_type = fields
        .get("msg_type")
        .and_then(Value::as_str)
        .ok_or(RouteError::MissingType)?;

    let Some(kind) = MessageKind::from_wire(msg_type) else {
        let msg_type = msg_type.to_string();
        return Ok(Parsed::Unknown(msg_type, document));
    };

    let payload = fields.get("payload").cloned().unwrap_or(Value::Null);
    let event = TypedEvent::decode(kind, payload).map_err(|source| RouteError::Decode {
        msg_type: kind,
        source,
    })?;
    Ok(Parsed::Typed(event, document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    const INVENTORY_SAMPLE: &str = r#"{"msg_type":"inventory","payload":{"event_id":"e1","op":"insert","id":"v1","new_owner":"userA","old_owner":"userB","template_variation":"t1","parent_id":"."}}"#;

    fn router() -> MessageRouter {
        MessageRouter::new(EventChannels::new(16))
    }

    #[test]
    fn test_inventory_sample() {
        let router = router();
        let mut inventory = router.channels().subscribe_inventory();
        let mut raw = router.channels().subscribe_raw();
        let mut state = router.channels().subscribe_state_updates();

        assert_eq!(
            router.route(INVENTORY_SAMPLE),
            RouteOutcome::Routed(MessageKind::Inventory)
        );

        let event = inventory.try_recv().unwrap();
        assert_eq!(event.id, "v1");
        assert_eq!(event.new_owner.as_deref(), Some("userA"));
        assert_eq!(event.old_owner.as_deref(), Some("userB"));
        assert_eq!(event.op, ChangeOp::Insert);
        assert_eq!(inventory.try_recv().unwrap_err(), TryRecvError::Empty);

        assert_eq!(raw.try_recv().unwrap()["payload"]["id"], "v1");
        assert_eq!(state.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn test_unknown_type_is_raw_only() {
        let router = router();
        let mut typed = router.channels().subscribe_typed();
        let mut raw = router.channels().subscribe_raw();

        let outcome = router.route(r#"{"msg_type":"presence","payload":{"id":"u1"}}"#);
        assert_eq!(outcome, RouteOutcome::RawOnly("presence".to_string()));
        assert_eq!(raw.try_recv().unwrap()["msg_type"], "presence");
        assert_eq!(typed.try_recv().unwrap_err(), TryRecvError::Empty);

        // Later frames still flow.
        router.route(INVENTORY_SAMPLE);
        assert_eq!(typed.try_recv().unwrap().kind(), MessageKind::Inventory);
    }

    #[rstest]
    #[case("{not json")]
    #[case("[1, 2, 3]")]
    #[case(r#""inventory""#)]
    #[case(r#"{"payload":{}}"#)]
    #[case(r#"{"msg_type":7,"payload":{}}"#)]
    #[case(r#"{"msg_type":"inventory","payload":{"event_id":"e1","op":"insert"}}"#)]
    #[case(r#"{"msg_type":"info"}"#)]
    fn test_bad_frames_are_dropped(#[case] frame: &str) {
        let router = router();
        let mut typed = router.channels().subscribe_typed();
        let mut raw = router.channels().subscribe_raw();

        assert_eq!(router.route(frame), RouteOutcome::Dropped);
        assert_eq!(raw.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(typed.try_recv().unwrap_err(), TryRecvError::Empty);

        router.route(INVENTORY_SAMPLE);
        assert!(raw.try_recv().is_ok());
        assert!(typed.try_recv().is_ok());
    }

    #[test]
    fn test_arrival_order_and_stats() {
        let router = router();
        let mut typed = router.channels().subscribe_typed();

        for (i, msg_type) in ["info", "my_events", "error"].iter().enumerate() {
            let payload = match *msg_type {
                "my_events" => json!({"event_id": i.to_string(), "id": "u1", "event_type": "like"}),
                _ => json!({"event_id": i.to_string(), "message": "m"}),
            };
            router.route(&json!({"msg_type": msg_type, "payload": payload}).to_string());
        }
        router.route("garbage");
        router.route(r#"{"msg_type":"presence"}"#);

        let ids: Vec<String> = (0..3)
            .map(|_| typed.try_recv().unwrap().event_id().to_string())
            .collect();
        assert_eq!(ids, vec!["0", "1", "2"]);
        assert_eq!(
            router.stats(),
            RouterStats {
                routed: 3,
                raw_only: 1,
                dropped: 1
            }
        );
    }

    #[test]
    fn test_routing_without_subscribers() {
        let router = router();
        assert_eq!(
            router.route(INVENTORY_SAMPLE),
            RouteOutcome::Routed(MessageKind::Inventory)
        );
    }

    #[test]
    fn test_state_update_changed_fields() {
        let router = router();
        let mut updates = router.channels().subscribe_state_updates();

        router.route(
            &json!({
                "msg_type": "state_update",
                "payload": {
                    "event_id": "e5",
                    "id": "obj-1",
                    "object_type": "vehicle",
                    "changed_fields": {"fuel": 0.4},
                    "timestamp": 1_714_564_800
                }
            })
            .to_string(),
        );

        let update = updates.try_recv().unwrap();
        assert_eq!(update.changed_fields["fuel"], json!(0.4));
        assert!(update.timestamp.is_some());
    }
}
