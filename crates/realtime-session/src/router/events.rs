//! Typed events decoded from realtime frames.
//!
//! Every frame is an envelope `{"msg_type": ..., "payload": {...}}`. The payload shape
//! is fixed per `msg_type`; see [`MessageKind`] for the recognized values.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Recognized `msg_type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Info,
    Inventory,
    StateUpdate,
    #[serde(rename = "my_events")]
    Activity,
    Map,
    Error,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        Self::Info,
        Self::Inventory,
        Self::StateUpdate,
        Self::Activity,
        Self::Map,
        Self::Error,
    ];

    /// Wire name used in `msg_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Inventory => "inventory",
            Self::StateUpdate => "state_update",
            Self::Activity => "my_events",
            Self::Map => "map",
            Self::Error => "error",
        }
    }

    pub fn from_wire(msg_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == msg_type)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change operation carried by inventory and map events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
    /// Operation not known to this client, kept verbatim.
    Other(String),
}

impl From<String> for ChangeOp {
    fn from(op: String) -> Self {
        match op.as_str() {
            "insert" => Self::Insert,
            "update" => Self::Update,
            "delete" => Self::Delete,
            _ => Self::Other(op),
        }
    }
}

impl From<ChangeOp> for String {
    fn from(op: ChangeOp) -> Self {
        match op {
            ChangeOp::Insert => "insert".to_string(),
            ChangeOp::Update => "update".to_string(),
            ChangeOp::Delete => "delete".to_string(),
            ChangeOp::Other(op) => op,
        }
    }
}

/// RFC 3339 strings or unix seconds (integer or fractional).
mod flexible_timestamp {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Seconds(i64),
        Fractional(f64),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let parsed = match Option::<Raw>::deserialize(deserializer)? {
            None => return Ok(None),
            Some(Raw::Text(text)) => DateTime::parse_from_rfc3339(&text)
                .map(|t| t.with_timezone(&Utc))
                .map_err(D::Error::custom)?,
            Some(Raw::Seconds(secs)) => DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| D::Error::custom("timestamp out of range"))?,
            Some(Raw::Fractional(value)) => {
                let secs = value.floor();
                let nanos = (((value - secs) * 1e9).round() as u32).min(999_999_999);
                DateTime::from_timestamp(secs as i64, nanos)
                    .ok_or_else(|| D::Error::custom("timestamp out of range"))?
            }
        };
        Ok(Some(parsed))
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(t) => serializer.serialize_str(&t.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }
}

/// Geographic position on a map event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Informational server notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoEvent {
    pub event_id: String,
    #[serde(default)]
    pub id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default, with = "flexible_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Ownership or placement change of an inventory item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryEvent {
    pub event_id: String,
    pub op: ChangeOp,
    pub id: String,
    #[serde(default)]
    pub new_owner: Option<String>,
    #[serde(default)]
    pub old_owner: Option<String>,
    #[serde(default)]
    pub template_variation: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default, with = "flexible_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Field-level change of a server object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdateEvent {
    pub event_id: String,
    pub id: String,
    #[serde(default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub changed_fields: Map<String, Value>,
    #[serde(default, with = "flexible_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Activity addressed to the current user (`my_events`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub event_id: String,
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, with = "flexible_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Change to an object placed on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEvent {
    pub event_id: String,
    pub op: ChangeOp,
    pub id: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub diff: Map<String, Value>,
    #[serde(default, with = "flexible_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Error reported by the server over the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub event_id: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, with = "flexible_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A decoded realtime message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg_type", content = "payload", rename_all = "snake_case")]
pub enum TypedEvent {
    Info(InfoEvent),
    Inventory(InventoryEvent),
    StateUpdate(StateUpdateEvent),
    #[serde(rename = "my_events")]
    Activity(ActivityEvent),
    Map(MapEvent),
    Error(ErrorEvent),
}

impl TypedEvent {
    /// Decode the payload of a frame whose `msg_type` is `kind`.
    pub fn decode(kind: MessageKind, payload: Value) -> serde_json::Result<Self> {
        Ok(match kind {
            MessageKind::Info => Self::Info(serde_json::from_value(payload)?),
            MessageKind::Inventory => Self::Inventory(serde_json::from_value(payload)?),
            MessageKind::StateUpdate => Self::StateUpdate(serde_json::from_value(payload)?),
            MessageKind::Activity => Self::Activity(serde_json::from_value(payload)?),
            MessageKind::Map => Self::Map(serde_json::from_value(payload)?),
            MessageKind::Error => Self::Error(serde_json::from_value(payload)?),
        })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Info(_) => MessageKind::Info,
            Self::Inventory(_) => MessageKind::Inventory,
            Self::StateUpdate(_) => MessageKind::StateUpdate,
            Self::Activity(_) => MessageKind::Activity,
            Self::Map(_) => MessageKind::Map,
            Self::Error(_) => MessageKind::Error,
        }
    }

    /// Server-assigned event identifier.
    pub fn event_id(&self) -> &str {
        match self {
            Self::Info(e) => &e.event_id,
            Self::Inventory(e) => &e.event_id,
            Self::StateUpdate(e) => &e.event_id,
            Self::Activity(e) => &e.event_id,
            Self::Map(e) => &e.event_id,
            Self::Error(e) => &e.event_id,
        }
    }

    /// Subject identifier, if the event has one.
    pub fn subject_id(&self) -> Option<&str> {
        match self {
            Self::Info(e) => e.id.as_deref(),
            Self::Inventory(e) => Some(&e.id),
            Self::StateUpdate(e) => Some(&e.id),
            Self::Activity(e) => Some(&e.id),
            Self::Map(e) => Some(&e.id),
            Self::Error(e) => e.id.as_deref(),
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Info(e) => e.timestamp,
            Self::Inventory(e) => e.timestamp,
            Self::StateUpdate(e) => e.timestamp,
            Self::Activity(e) => e.timestamp,
            Self::Map(e) => e.timestamp,
            Self::Error(e) => e.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("insert", ChangeOp::Insert)]
    #[case("update", ChangeOp::Update)]
    #[case("delete", ChangeOp::Delete)]
    #[case("merge", ChangeOp::Other("merge".to_string()))]
    fn test_change_op(#[case] wire: &str, #[case] expected: ChangeOp) {
        let op: ChangeOp = serde_json::from_value(json!(wire)).unwrap();
        assert_eq!(op, expected);
        assert_eq!(serde_json::to_value(&op).unwrap(), json!(wire));
    }

    #[rstest]
    #[case(json!("2024-05-01T12:00:00Z"), 1_714_564_800, 0)]
    #[case(json!("2024-05-01T14:00:00+02:00"), 1_714_564_800, 0)]
    #[case(json!(1_714_564_800), 1_714_564_800, 0)]
    #[case(json!(1_714_564_800.5), 1_714_564_800, 500_000_000)]
    fn test_timestamp_formats(#[case] raw: Value, #[case] secs: i64, #[case] nanos: u32) {
        let event: InfoEvent = serde_json::from_value(json!({
            "event_id": "e1",
            "message": "hello",
            "timestamp": raw,
        }))
        .unwrap();
        assert_eq!(event.timestamp, DateTime::from_timestamp(secs, nanos));
    }

    #[test]
    fn test_invalid_timestamp_rejected() {
        let result = serde_json::from_value::<InfoEvent>(json!({
            "event_id": "e1",
            "message": "hello",
            "timestamp": "yesterday",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_map_event_defaults() {
        let event = TypedEvent::decode(
            MessageKind::Map,
            json!({"event_id": "e9", "op": "update", "id": "m1", "location": {"lat": 1.5, "lng": -2.0}}),
        )
        .unwrap();

        let TypedEvent::Map(map) = &event else {
            panic!("expected map event");
        };
        assert_eq!(map.location, Some(GeoPoint { lat: 1.5, lng: -2.0 }));
        assert!(map.diff.is_empty());
        assert_eq!(event.kind(), MessageKind::Map);
        assert_eq!(event.subject_id(), Some("m1"));
    }

    #[test]
    fn test_wire_names() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_wire(kind.as_str()), Some(kind));
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
        }
        assert_eq!(MessageKind::from_wire("presence"), None);
    }

    #[test]
    fn test_serialized_event_uses_envelope_shape() {
        let event = TypedEvent::Activity(ActivityEvent {
            event_id: "e2".to_string(),
            id: "u1".to_string(),
            event_type: "follow".to_string(),
            data: None,
            timestamp: None,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["msg_type"], "my_events");
        assert_eq!(value["payload"]["event_type"], "follow");
    }
}
