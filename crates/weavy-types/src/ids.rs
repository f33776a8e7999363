//! Typed identifiers for frames, widget instances, panels, spaces and bubbles.
//!
//! `FrameId` and `InstanceId` wrap UUIDv7 and are minted locally. `SpaceId`
//! and `BubbleId` are server-assigned integers. `PanelId` is a caller-chosen
//! string and must never be empty.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A browsing-context identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(uuid::Uuid);

/// A widget instance identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(uuid::Uuid);

/// Server-assigned id of a space. The immutable join key for bubbles.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceId(pub i64);

/// Server-assigned id of a bubble (the membership record, not the space).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BubbleId(pub i64);

// ── UUID-backed ids ─────────────────────────────────────────────────────────

macro_rules! impl_uuid_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Create a new time-ordered ID (UUIDv7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// First 8 hex characters, for display only.
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// Parse from a hex string or standard UUID format.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_uuid_id!(FrameId, "FrameId");
impl_uuid_id!(InstanceId, "InstanceId");

// ── Integer ids ─────────────────────────────────────────────────────────────

macro_rules! impl_int_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// The raw server value.
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $T {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }
    };
}

impl_int_id!(SpaceId, "SpaceId");
impl_int_id!(BubbleId, "BubbleId");

// ── PanelId ─────────────────────────────────────────────────────────────────

/// Error constructing an identifier from caller input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("panel id must not be empty")]
    EmptyPanelId,
}

const SPACE_PANEL_PREFIX: &str = "bubble-";

/// Caller-chosen panel identity, stable for the panel's logical lifetime.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PanelId(String);

impl PanelId {
    /// Validate and wrap a caller-supplied id.
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdError::EmptyPanelId);
        }
        Ok(Self(id))
    }

    /// The panel id the dock uses for a space's bubble.
    pub fn for_space(space_id: SpaceId) -> Self {
        Self(format!("{SPACE_PANEL_PREFIX}{}", space_id.0))
    }

    /// The space behind a bubble panel id, if this is one.
    pub fn space_id(&self) -> Option<SpaceId> {
        self.0
            .strip_prefix(SPACE_PANEL_PREFIX)
            .and_then(|rest| rest.parse().ok())
            .map(SpaceId)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PanelId({})", self.0)
    }
}

impl AsRef<str> for PanelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_ids_are_unique() {
        assert_ne!(FrameId::new(), FrameId::new());
        assert_ne!(InstanceId::new(), InstanceId::new());
    }

    #[test]
    fn test_short_is_eight_hex_chars() {
        let id = FrameId::new();
        assert_eq!(id.short().len(), 8);
        assert!(format!("{id:?}").starts_with("FrameId("));
    }

    #[test]
    fn test_parse_display_agree() {
        let id = InstanceId::new();
        assert_eq!(InstanceId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_empty_panel_id_rejected() {
        assert_eq!(PanelId::new(""), Err(IdError::EmptyPanelId));
        assert_eq!(PanelId::new("   "), Err(IdError::EmptyPanelId));
        assert_eq!(PanelId::new("messenger").unwrap().as_str(), "messenger");
    }

    #[test]
    fn test_space_panel_id() {
        let id = PanelId::for_space(SpaceId(42));
        assert_eq!(id.as_str(), "bubble-42");
        assert_eq!(id.space_id(), Some(SpaceId(42)));
        assert_eq!(PanelId::new("messenger").unwrap().space_id(), None);
        assert_eq!(PanelId::new("bubble-x").unwrap().space_id(), None);
    }

    #[test]
    fn test_int_ids_are_transparent_on_the_wire() {
        let json = serde_json::to_string(&SpaceId(7)).unwrap();
        assert_eq!(json, "7");
        let parsed: BubbleId = serde_json::from_str("12").unwrap();
        assert_eq!(parsed, BubbleId(12));
    }
}
