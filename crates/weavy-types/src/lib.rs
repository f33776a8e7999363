//! Shared identity, user and bubble types for the Weavy widget core.
//!
//! This is a leaf crate with **no internal weavy dependencies**. Every other
//! crate in the workspace builds on it.
//!
//! # Entity Overview
//!
//! ```text
//! Widget instance (InstanceId)
//!     └── owns Panels (PanelId, caller-chosen string)
//!     └── owns Buttons (1:1 optional companion of a Panel)
//!     └── owns Bubbles (SpaceId = join key, BubbleId = membership record)
//!
//! Browsing context (FrameId)
//!     └── has an origin, optionally a parent frame
//!     └── holds a replica of the signed-in User
//! ```
//!
//! # Key Types
//!
//! |--------------------|---------------------------------------------------|
//! | Type               | Purpose                                           |
//! |--------------------|---------------------------------------------------|
//! | [`PanelId`]        | Stable caller-chosen panel identity               |
//! | [`SpaceId`]        | Space a bubble points at (dedup key)              |
//! | [`BubbleId`]       | Membership record id; may change for one space    |
//! | [`FrameId`]        | One browsing context (window or iframe)           |
//! | [`InstanceId`]     | One widget instance on a host page                |
//! | [`User`]           | Identity payload; `id == -1` means signed out     |
//! | [`UserTransition`] | Diff label between two user snapshots             |
//! | [`Bubble`]         | Conversation/space shortcut shown in the dock     |
//! |--------------------|---------------------------------------------------|

pub mod bubble;
pub mod ids;
pub mod user;

pub use bubble::{Bubble, BubbleKind};
pub use ids::{BubbleId, FrameId, IdError, InstanceId, PanelId, SpaceId};
pub use user::{SIGNED_OUT_USER_ID, User, UserTransition};
