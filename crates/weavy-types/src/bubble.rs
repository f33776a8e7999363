//! Bubble records: conversation and space shortcuts shown in the dock.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::ids::{BubbleId, SpaceId};

/// Where a bubble belongs.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BubbleKind {
    /// Tied to the current page's context URL.
    Global,
    /// Explicitly opened by the user.
    #[default]
    Personal,
    /// No longer in the server list, kept alive because it is open.
    Detached,
}

/// A bubble as delivered by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bubble {
    #[serde(alias = "spaceId")]
    pub space_id: SpaceId,
    #[serde(alias = "bubbleId", alias = "id")]
    pub bubble_id: BubbleId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, alias = "isAdmin")]
    pub is_admin: bool,
    #[serde(default, alias = "isStarred")]
    pub is_starred: bool,
    #[serde(default, alias = "connectedToUrl", skip_serializing_if = "Option::is_none")]
    pub connected_to_url: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: BubbleKind,
}

impl Bubble {
    pub fn new(space_id: SpaceId, bubble_id: BubbleId, kind: BubbleKind) -> Self {
        Self {
            space_id,
            bubble_id,
            name: String::new(),
            url: String::new(),
            icon: None,
            is_admin: false,
            is_starred: false,
            connected_to_url: None,
            kind,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_payload() {
        let json = r#"{
            "space_id": 11, "id": 90, "name": "Design", "url": "/e/spaces/11",
            "type": "global", "connected_to_url": "https://example.com/page"
        }"#;
        let b: Bubble = serde_json::from_str(json).unwrap();
        assert_eq!(b.space_id, SpaceId(11));
        assert_eq!(b.bubble_id, BubbleId(90));
        assert_eq!(b.kind, BubbleKind::Global);
        assert_eq!(b.connected_to_url.as_deref(), Some("https://example.com/page"));
    }

    #[test]
    fn test_missing_type_defaults_to_personal() {
        let b: Bubble = serde_json::from_str(r#"{"space_id": 1, "bubble_id": 2}"#).unwrap();
        assert_eq!(b.kind, BubbleKind::Personal);
    }

    #[test]
    fn test_kind_strings() {
        assert_eq!(BubbleKind::Detached.to_string(), "detached");
        assert_eq!("GLOBAL".parse::<BubbleKind>().unwrap(), BubbleKind::Global);
    }
}
