//! Realtime server events.
//!
//! The realtime connection itself is external; it hands us `(name, payload)`
//! pairs. [`RealtimeEvent::parse`] turns those into typed events and
//! [`RealtimeHub`] fans them out to whoever runs a widget loop.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::error;
use weavy_types::{Bubble, SpaceId};

use crate::constants::REALTIME_CHANNEL_CAPACITY;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown realtime event: {0}")]
    UnknownEvent(String),
    #[error("malformed {event} payload: {reason}")]
    Malformed { event: String, reason: String },
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ConversationRead {
    #[serde(alias = "conversation", alias = "conversationId")]
    pub conversation_id: i64,
    #[serde(default, alias = "userId")]
    pub user_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MessageInserted {
    #[serde(alias = "conversation", alias = "conversationId")]
    pub conversation_id: i64,
    #[serde(alias = "id", alias = "messageId")]
    pub message_id: i64,
    #[serde(default, alias = "createdBy", alias = "createdById")]
    pub created_by: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PresenceUpdate {
    #[serde(alias = "id", alias = "userId")]
    pub user_id: i64,
    #[serde(default)]
    pub status: String,
}

#[derive(Deserialize)]
struct SpaceRef {
    #[serde(alias = "spaceId", alias = "space_id")]
    id: SpaceId,
}

/// A parsed realtime event.
#[derive(Clone, Debug, PartialEq)]
pub enum RealtimeEvent {
    BubbleAdded(Bubble),
    BubbleRemoved(Bubble),
    SpaceTrashed { space_id: SpaceId },
    ConversationRead(ConversationRead),
    MessageInserted(MessageInserted),
    PresenceUpdate(PresenceUpdate),
}

impl RealtimeEvent {
    pub fn parse(name: &str, payload: serde_json::Value) -> Result<Self, ProtocolError> {
        let event = match name {
            "bubble-added.weavy" => Self::BubbleAdded(decode(name, payload)?),
            "bubble-removed.weavy" => Self::BubbleRemoved(decode(name, payload)?),
            "space-trashed.weavy" => {
                let space: SpaceRef = decode(name, payload)?;
                Self::SpaceTrashed { space_id: space.id }
            }
            "conversation-read.weavy" => Self::ConversationRead(decode(name, payload)?),
            "message-inserted.weavy" => Self::MessageInserted(decode(name, payload)?),
            "presence-update.weavy" => Self::PresenceUpdate(decode(name, payload)?),
            other => {
                error!("unknown realtime event {other}");
                return Err(ProtocolError::UnknownEvent(other.to_string()));
            }
        };
        Ok(event)
    }

    /// Wire name, e.g. `"bubble-added.weavy"`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BubbleAdded(_) => "bubble-added.weavy",
            Self::BubbleRemoved(_) => "bubble-removed.weavy",
            Self::SpaceTrashed { .. } => "space-trashed.weavy",
            Self::ConversationRead(_) => "conversation-read.weavy",
            Self::MessageInserted(_) => "message-inserted.weavy",
            Self::PresenceUpdate(_) => "presence-update.weavy",
        }
    }
}

fn decode<T: DeserializeOwned>(event: &str, payload: serde_json::Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| {
        error!("malformed {event} payload: {e}");
        ProtocolError::Malformed { event: event.to_string(), reason: e.to_string() }
    })
}

/// Broadcast fan-out for realtime events.
#[derive(Clone, Debug)]
pub struct RealtimeHub {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(REALTIME_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: RealtimeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Parse and publish a raw server event.
    pub fn publish_raw(&self, name: &str, payload: serde_json::Value) -> Result<usize, ProtocolError> {
        Ok(self.publish(RealtimeEvent::parse(name, payload)?))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weavy_types::{BubbleId, BubbleKind};

    #[test]
    fn test_bubble_added_camel_case() {
        let ev = RealtimeEvent::parse(
            "bubble-added.weavy",
            json!({ "spaceId": 3, "bubbleId": 30, "name": "Design", "type": "global" }),
        )
        .unwrap();
        match ev {
            RealtimeEvent::BubbleAdded(b) => {
                assert_eq!(b.space_id, SpaceId(3));
                assert_eq!(b.bubble_id, BubbleId(30));
                assert_eq!(b.kind, BubbleKind::Global);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_space_trashed() {
        let ev = RealtimeEvent::parse("space-trashed.weavy", json!({ "id": 9 })).unwrap();
        assert_eq!(ev, RealtimeEvent::SpaceTrashed { space_id: SpaceId(9) });
        assert_eq!(ev.name(), "space-trashed.weavy");
    }

    #[test]
    fn test_message_inserted() {
        let ev = RealtimeEvent::parse(
            "message-inserted.weavy",
            json!({ "id": 100, "conversation": 4, "createdBy": 2 }),
        )
        .unwrap();
        assert_eq!(
            ev,
            RealtimeEvent::MessageInserted(MessageInserted {
                conversation_id: 4,
                message_id: 100,
                created_by: Some(2),
            })
        );
    }

    #[test]
    fn test_unknown_event() {
        assert_eq!(
            RealtimeEvent::parse("typing.weavy", json!({})),
            Err(ProtocolError::UnknownEvent("typing.weavy".into()))
        );
    }

    #[test]
    fn test_malformed_payload() {
        let err = RealtimeEvent::parse("bubble-removed.weavy", json!({ "name": "x" })).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { ref event, .. } if event == "bubble-removed.weavy"));
    }

    #[tokio::test]
    async fn test_hub_fan_out() {
        let hub = RealtimeHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.publish_raw("presence-update.weavy", json!({ "id": 1, "status": "away" })).unwrap(), 2);
        assert_eq!(a.recv().await.unwrap(), b.recv().await.unwrap());
    }
}
