//! Weavy widget core
//!
//! Cross-frame panel, dock and bubble orchestration plus the authentication
//! state machine that keeps every frame on a page agreeing on who is signed
//! in. Frames talk through the [`FrameBus`] contract; [`FrameMesh`] is an
//! in-process implementation with explicit leader election.
//!
//! [`Widget`] is the composition root. Everything else can be used on its
//! own, which is how the tests drive it.

pub mod auth;
pub mod bubbles;
pub mod bus;
pub mod config;
pub mod constants;
pub mod deferred;
pub mod dock;
pub mod events;
pub mod leader;
pub mod mesh;
pub mod panels;
pub mod realtime;
pub mod storage;
pub mod testing;
pub mod transport;
pub mod widget;

pub use auth::{AuthError, AuthRegistry, AuthenticationSession, JwtProvider, normalize_url};
pub use bubbles::{BubbleError, BubbleStore, Removal};
pub use bus::{Channel, Envelope, FrameBus, FrameMessage, SignInOutcome};
pub use config::{ConfigError, WidgetConfig};
pub use deferred::{Deferred, DeferredError, DeferredSlot, DeferredState};
pub use dock::{
    Button, ButtonIcon, ButtonSpec, ClickBehavior, DockController, DockError, DockPosition,
    DockState, Reconciled,
};
pub use events::{ButtonContainer, EventBus, NoticeLevel, WidgetEvent};
pub use leader::LeaseTable;
pub use mesh::{FrameMesh, MeshFrame};
pub use panels::{
    FrameHost, LoadState, Panel, PanelAttributes, PanelError, PanelOptions, PanelRegistry,
};
pub use realtime::{ProtocolError, RealtimeEvent, RealtimeHub};
pub use storage::{FileStorage, MemoryStorage, PersistentState, Storage, StorageError};
pub use transport::{BubbleApi, HttpTransport, IdentityApi, TransportError};
pub use widget::{Widget, WidgetDeps, WidgetError};
