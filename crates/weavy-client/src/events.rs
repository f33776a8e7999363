//! Outward widget notifications.
//!
//! [`WidgetEvent`] is the typed form of every notification the core publishes
//! for dock visuals, badges and embedding pages. Delivery is a
//! `tokio::sync::broadcast` channel: the core never knows or cares who is
//! listening, and publishing with no subscribers is not an error.
//!
//! Internal sequencing never goes through this bus; components call each
//! other directly.

use strum::IntoStaticStr;
use tokio::sync::broadcast;
use weavy_types::{Bubble, BubbleId, PanelId, SpaceId, User, UserTransition};

use crate::constants::EVENT_BUS_CAPACITY;

/// Which dock container a button lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonContainer {
    Global,
    Personal,
    System,
}

/// Severity of a user-facing notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A notification published by the widget core.
///
/// The kebab-case variant name is the public event name (`panel-added`, ...).
#[derive(Clone, Debug, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum WidgetEvent {
    // ── Panels ───────────────────────────────────────────────────────────
    PanelAdded {
        panel_id: PanelId,
        kind: Option<String>,
    },
    PanelRemoved {
        panel_id: PanelId,
    },
    PanelLoading {
        panel_id: PanelId,
        is_loading: bool,
    },
    PanelOpen {
        panel_id: PanelId,
        destination: Option<String>,
    },
    PanelClose {
        panel_id: PanelId,
    },
    PanelLoadFailed {
        panel_id: PanelId,
        reason: String,
    },

    // ── Dock ─────────────────────────────────────────────────────────────
    ButtonAdded {
        button_id: PanelId,
    },
    ButtonRemoved {
        button_id: PanelId,
    },
    ButtonMoved {
        button_id: PanelId,
        from: ButtonContainer,
        to: ButtonContainer,
        crossfade: bool,
    },
    Collapse,
    Minimize,
    Restore,

    // ── Bubbles ──────────────────────────────────────────────────────────
    BubbleAdded {
        bubble: Bubble,
    },
    BubbleRemoved {
        space_id: SpaceId,
        bubble_id: BubbleId,
        detached: bool,
    },
    BubbleLimitExceeded {
        space_id: SpaceId,
        limit: usize,
    },
    SpaceTrashed {
        space_id: SpaceId,
    },
    /// Unread count for a conversation changed.
    Badge {
        conversation_id: i64,
        unread: u32,
    },
    Presence {
        user_id: i64,
        status: String,
    },

    // ── Authentication ───────────────────────────────────────────────────
    User {
        state: UserTransition,
        authorized: bool,
        user: User,
    },
    ClearUser,
    SigningIn,
    SignedIn {
        user: User,
    },
    SignedOut,
    AuthenticationError {
        message: String,
    },
    UserError {
        message: String,
    },

    /// Something the embedding UI should show to the person.
    Notice {
        level: NoticeLevel,
        message: String,
    },
}

impl WidgetEvent {
    /// Public event name, e.g. `"panel-added"`.
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

/// Thin wrapper around a `broadcast::Sender<WidgetEvent>`.
///
/// Cloning is cheap and every clone can both publish and subscribe.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<WidgetEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Returns the number of receivers that got it.
    pub fn publish(&self, event: WidgetEvent) -> usize {
        tracing::trace!(event = event.name(), "publish");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WidgetEvent> {
        self.tx.subscribe()
    }
}

/// Collect every event currently buffered in `rx` without waiting.
pub fn drain(rx: &mut broadcast::Receiver<WidgetEvent>) -> Vec<WidgetEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => out.push(ev),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                tracing::warn!("event receiver lagged, {n} events dropped");
            }
            Err(_) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let ev = WidgetEvent::PanelAdded {
            panel_id: PanelId::new("x").unwrap(),
            kind: None,
        };
        assert_eq!(ev.name(), "panel-added");
        assert_eq!(WidgetEvent::ClearUser.name(), "clear-user");
        assert_eq!(
            WidgetEvent::AuthenticationError { message: String::new() }.name(),
            "authentication-error"
        );
        assert_eq!(WidgetEvent::Minimize.name(), "minimize");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(WidgetEvent::Collapse), 0);
    }

    #[test]
    fn test_drain_collects_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(WidgetEvent::Collapse);
        bus.publish(WidgetEvent::Restore);
        assert_eq!(drain(&mut rx), vec![WidgetEvent::Collapse, WidgetEvent::Restore]);
        assert!(drain(&mut rx).is_empty());
    }
}
