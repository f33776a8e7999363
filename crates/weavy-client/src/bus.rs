//! Cross-frame message bus contract.
//!
//! Every browsing context (top window or iframe) gets one [`FrameBus`]
//! endpoint. Messages travel in four directions:
//!
//! ```text
//!            ┌──────────── origin A ─────────────┐
//!            │  window ◄── FromChild ── iframe   │
//!            │    │                       ▲      │
//!            │    └──── FromParent ───────┘      │
//!            │  window ◄─── FromOrigin ───► tab  │   (same-origin peers)
//!            └───────────────────────────────────┘
//!     any frame ── Direct ──► named frame (optionally same-origin only)
//! ```
//!
//! Exactly one frame per origin is the *leader*: the only frame allowed to
//! hit the identity endpoint. Followers ask the leader over the bus and wait
//! for its broadcast.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use weavy_types::{FrameId, User};

/// Payload carried between frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum FrameMessage {
    /// The current user as known by the sender.
    User { user: User },
    /// Ask the leader to broadcast the current user.
    RequestUser,
    /// The identity check failed; the user is unknown.
    UserError { message: String },
    /// Ask the leader to validate a JWT and answer the frame `reply_to`.
    SignIn { jwt: String, reply_to: String },
    /// The leader's verdict on a `sign-in`.
    SignInResult { outcome: SignInOutcome },
    ClearUser,
    /// Reveal an already loaded panel frame.
    Show,
    /// Hide a panel frame.
    Hide,
    /// Point an already loaded panel frame at a new location.
    Navigate { url: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum SignInOutcome {
    Accepted { user: User },
    /// The server answered 401.
    Rejected,
    Failed { message: String },
}

/// How an envelope reached the receiving frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Sent by this frame's parent.
    FromParent,
    /// Sent by one of this frame's children.
    FromChild,
    /// Broadcast by a same-origin peer.
    FromOrigin,
    /// Addressed to this frame by name.
    Direct,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub source: FrameId,
    pub origin: String,
    pub channel: Channel,
    pub message: FrameMessage,
}

/// One frame's endpoint on the bus.
///
/// Posting never blocks and never fails loudly: the return value only says
/// how many frames were addressed.
#[async_trait]
pub trait FrameBus: Send + Sync {
    fn frame_id(&self) -> FrameId;

    fn name(&self) -> &str;

    fn origin(&self) -> &str;

    /// Everything addressed to this frame, from now on.
    fn subscribe(&self) -> broadcast::Receiver<Envelope>;

    fn post_to_parent(&self, message: FrameMessage) -> bool;

    fn post_to_children(&self, message: FrameMessage) -> usize;

    /// Post to the frame called `name`. With `only_if_same_origin`, a frame
    /// on another origin is treated as absent.
    fn post_to_frame(&self, name: &str, only_if_same_origin: bool, message: FrameMessage) -> bool;

    /// Broadcast to every other frame on this frame's origin.
    fn post_to_origin(&self, message: FrameMessage) -> usize;

    fn is_leader(&self) -> bool;

    /// Resolves once this frame holds leadership for its origin. Never
    /// resolves for a closed frame.
    async fn when_leader(&self);
}
