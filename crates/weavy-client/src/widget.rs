//! Widget composition root.
//!
//! [`Widget`] owns one instance of every service and wires them together
//! explicitly. Components never reach into each other; the widget calls the
//! published operations in order and keeps the open bubble, the dock and
//! the panel registry in step.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use weavy_types::{BubbleId, InstanceId, PanelId, SpaceId, User};

use crate::auth::{AuthError, AuthRegistry, AuthenticationSession, JwtProvider};
use crate::bubbles::{BubbleError, BubbleStore, Removal};
use crate::bus::FrameBus;
use crate::config::WidgetConfig;
use crate::dock::{DockController, DockError, Reconciled};
use crate::events::{EventBus, WidgetEvent};
use crate::panels::{FrameHost, Panel, PanelError, PanelOptions, PanelRegistry};
use crate::realtime::RealtimeEvent;
use crate::storage::{PersistentState, Storage};
use crate::transport::{BubbleApi, IdentityApi};

#[derive(Debug, thiserror::Error)]
pub enum WidgetError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Panel(#[from] PanelError),
    #[error(transparent)]
    Dock(#[from] DockError),
    #[error(transparent)]
    Bubble(#[from] BubbleError),
    #[error("no bubble for space {0}")]
    UnknownBubble(SpaceId),
}

/// External collaborators a widget runs against.
#[derive(Clone)]
pub struct WidgetDeps {
    pub bus: Arc<dyn FrameBus>,
    pub identity: Arc<dyn IdentityApi>,
    pub bubbles: Arc<dyn BubbleApi>,
    pub frames: Arc<dyn FrameHost>,
    pub storage: Arc<dyn Storage>,
}

pub struct Widget {
    id: InstanceId,
    config: WidgetConfig,
    events: EventBus,
    auth: AuthRegistry,
    session: Arc<AuthenticationSession>,
    panels: Arc<PanelRegistry>,
    dock: DockController,
    bubbles: BubbleStore,
    persisted: PersistentState,
    unread: DashMap<i64, u32>,
}

impl Widget {
    pub fn new(config: WidgetConfig, deps: WidgetDeps) -> Self {
        let events = EventBus::new();
        let persisted = PersistentState::new(deps.storage, &config.namespace, &config.host());

        let auth = {
            let (identity, bus, events) = (deps.identity, deps.bus.clone(), events.clone());
            let ambient = config.ambient_user_id;
            AuthRegistry::new(&config.url, move |url| {
                AuthenticationSession::new(url, identity.clone(), bus.clone(), events.clone(), ambient)
            })
        };
        let session = auth.get_default();

        let panels = PanelRegistry::new(
            PanelOptions::from(&config),
            deps.frames,
            deps.bus,
            events.clone(),
            persisted.clone(),
        );
        let dock = DockController::new(panels.clone(), events.clone(), persisted.clone());
        let bubbles = BubbleStore::new(deps.bubbles, events.clone(), config.bubble_limit);

        Self {
            id: InstanceId::new(),
            config,
            events,
            auth,
            session,
            panels,
            dock,
            bubbles,
            persisted,
            unread: DashMap::new(),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn auth(&self) -> &AuthRegistry {
        &self.auth
    }

    pub fn session(&self) -> &Arc<AuthenticationSession> {
        &self.session
    }

    pub fn panels(&self) -> &Arc<PanelRegistry> {
        &self.panels
    }

    pub fn dock(&self) -> &DockController {
        &self.dock
    }

    pub fn bubbles(&self) -> &BubbleStore {
        &self.bubbles
    }

    pub fn unread(&self, conversation_id: i64) -> u32 {
        self.unread.get(&conversation_id).map(|n| *n).unwrap_or(0)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Authenticate, load bubbles, restore the last open panel and start
    /// preloading. Failures along the way are logged and the widget starts
    /// in whatever state it reached.
    #[tracing::instrument(skip(self), name = "widget.start", fields(widget = ?self.id, url = %self.config.url))]
    pub async fn start(&self) -> User {
        self.dock.restore_persisted();

        let jwt = self.config.jwt.clone().map(JwtProvider::token);
        let user = match self.session.init(jwt).await {
            Ok(user) => user,
            Err(e) => {
                warn!("authentication failed, starting signed out: {e}");
                User::unknown()
            }
        };

        if user.is_authorized() {
            self.load_bubbles().await;
        }
        self.panels.mark_ready();

        if let Some(id) = self.panels.persisted_open_panel() {
            debug!(panel = %id, "restoring open panel");
            if let Err(e) = self.open_panel(&id, None).await {
                warn!(panel = %id, "could not restore open panel: {e}");
            }
        }

        let panels = Arc::clone(&self.panels);
        tokio::spawn(async move { panels.preload_frames(false).await });

        info!(authorized = user.is_authorized(), bubbles = self.bubbles.len(), "widget started");
        user
    }

    async fn load_bubbles(&self) {
        match self.bubbles.refresh().await {
            Ok(_) => {
                self.reconcile();
            }
            Err(e) => warn!("could not load bubbles: {e}"),
        }
    }

    /// Sign in with a JWT, then load the user's bubbles.
    pub async fn sign_in(&self, jwt: JwtProvider) -> Result<User, WidgetError> {
        let user = self.session.sign_in(Some(jwt)).await?;
        self.load_bubbles().await;
        Ok(user)
    }

    /// Sign out and drop the user's bubbles. An open bubble stays detached.
    pub async fn sign_out(&self) -> User {
        let user = self.session.sign_out(false).await;
        self.bubbles.replace_all(&[]);
        self.reconcile();
        self.unread.clear();
        user
    }

    // ------------------------------------------------------------------------
    // Panels
    // ------------------------------------------------------------------------

    pub async fn open_bubble(&self, space_id: SpaceId) -> Result<Panel, WidgetError> {
        if self.bubbles.get(space_id).is_none() {
            return Err(WidgetError::UnknownBubble(space_id));
        }
        let id = PanelId::for_space(space_id);
        if !self.panels.contains(&id) {
            self.reconcile();
        }
        self.open_panel(&id, None).await
    }

    pub async fn open_panel(&self, id: &PanelId, destination: Option<String>) -> Result<Panel, WidgetError> {
        let panel = self.panels.open(id, destination).await?;
        self.track_open(id.space_id());
        Ok(panel)
    }

    /// Close the open panel and clean up whatever was waiting for it.
    pub async fn close(&self) -> Option<PanelId> {
        let closed = self.panels.close().await;
        self.track_open(None);
        self.reconcile();
        self.dock.finalize_pending();
        closed
    }

    pub async fn click(&self, button_id: &PanelId) -> Result<(), WidgetError> {
        self.dock.click(button_id).await?;
        let open = self.panels.open_panel();
        self.track_open(open.as_ref().and_then(PanelId::space_id));
        if open.is_none() {
            self.reconcile();
            self.dock.finalize_pending();
        }
        Ok(())
    }

    fn track_open(&self, space_id: Option<SpaceId>) {
        if !self.bubbles.set_open(space_id).is_empty() {
            self.reconcile();
        }
    }

    fn reconcile(&self) -> Reconciled {
        self.dock.add_and_remove_bubble_items(&self.bubbles.bubbles())
    }

    // ------------------------------------------------------------------------
    // Bubbles & realtime
    // ------------------------------------------------------------------------

    /// Ask the server to remove a bubble; the realtime echo applies it.
    pub async fn remove_bubble(&self, bubble_id: BubbleId) -> Result<(), WidgetError> {
        self.bubbles.remove_bubble(bubble_id).await?;
        Ok(())
    }

    pub fn handle_realtime(&self, event: RealtimeEvent) {
        debug!(event = event.name(), "realtime");
        match event {
            RealtimeEvent::BubbleAdded(bubble) => {
                if !self.bubbles.add_bubbles(&[bubble]).is_empty() {
                    self.reconcile();
                }
            }
            RealtimeEvent::BubbleRemoved(bubble) => {
                if self.bubbles.apply_removed(bubble.space_id, bubble.bubble_id) != Removal::Ignored {
                    self.reconcile();
                }
            }
            RealtimeEvent::SpaceTrashed { space_id } => {
                if self.bubbles.space_trashed(space_id) != Removal::Ignored {
                    self.reconcile();
                }
            }
            RealtimeEvent::MessageInserted(message) => {
                let me = self.session.user().and_then(|u| u.id);
                if message.created_by.is_some() && message.created_by == me {
                    return;
                }
                let unread = {
                    let mut count = self.unread.entry(message.conversation_id).or_insert(0);
                    *count += 1;
                    *count
                };
                self.events.publish(WidgetEvent::Badge { conversation_id: message.conversation_id, unread });
            }
            RealtimeEvent::ConversationRead(read) => {
                let me = self.session.user().and_then(|u| u.id);
                if read.user_id.is_some() && read.user_id != me {
                    return;
                }
                self.unread.remove(&read.conversation_id);
                self.events.publish(WidgetEvent::Badge { conversation_id: read.conversation_id, unread: 0 });
            }
            RealtimeEvent::PresenceUpdate(presence) => {
                self.events.publish(WidgetEvent::Presence {
                    user_id: presence.user_id,
                    status: presence.status,
                });
            }
        }
    }

    /// Apply realtime events until the source closes. A lagged receiver
    /// reloads the bubble list to catch up.
    pub async fn run(&self, mut events: broadcast::Receiver<RealtimeEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_realtime(event),
                Err(RecvError::Lagged(n)) => {
                    warn!("realtime receiver lagged, {n} events dropped; reloading bubbles");
                    if self.session.is_authorized() {
                        self.load_bubbles().await;
                    }
                }
                Err(RecvError::Closed) => {
                    debug!("realtime source closed");
                    break;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Scroll positions
    // ------------------------------------------------------------------------

    pub fn remember_scroll(&self, space_id: SpaceId, offset: f64) {
        self.persisted.save(&scroll_key(space_id), &offset);
    }

    pub fn recall_scroll(&self, space_id: SpaceId) -> Option<f64> {
        self.persisted.load(&scroll_key(space_id))
    }
}

fn scroll_key(space_id: SpaceId) -> String {
    format!("scroll-{space_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::drain;
    use crate::mesh::FrameMesh;
    use crate::realtime::{ConversationRead, MessageInserted, RealtimeHub};
    use serde_json::json;
    use crate::testing::{MemoryStorage, MockBubbleApi, MockIdentityApi, RecordingFrameHost};
    use weavy_types::{Bubble, BubbleKind};

    fn widget(mesh: &FrameMesh, user: User, bubbles: Vec<Bubble>) -> Widget {
        let top = Arc::new(mesh.open_window("top", "https://acme.weavy.io"));
        let deps = WidgetDeps {
            bus: top,
            identity: Arc::new(MockIdentityApi::new(user)),
            bubbles: Arc::new(MockBubbleApi::new(bubbles)),
            frames: Arc::new(RecordingFrameHost::new()),
            storage: Arc::new(MemoryStorage::new()),
        };
        Widget::new(WidgetConfig::default(), deps)
    }

    #[tokio::test(start_paused = true)]
    async fn test_unread_badges() {
        let mesh = FrameMesh::default();
        let w = widget(&mesh, User::with_id(7), vec![]);
        w.start().await;
        let mut rx = w.events().subscribe();

        let inserted = |by| {
            RealtimeEvent::MessageInserted(MessageInserted { conversation_id: 3, message_id: 1, created_by: Some(by) })
        };
        w.handle_realtime(inserted(2));
        w.handle_realtime(inserted(2));
        w.handle_realtime(inserted(7));
        assert_eq!(w.unread(3), 2);

        w.handle_realtime(RealtimeEvent::ConversationRead(ConversationRead { conversation_id: 3, user_id: Some(2) }));
        assert_eq!(w.unread(3), 2);
        w.handle_realtime(RealtimeEvent::ConversationRead(ConversationRead { conversation_id: 3, user_id: Some(7) }));
        assert_eq!(w.unread(3), 0);

        let badges: Vec<u32> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                WidgetEvent::Badge { unread, .. } => Some(unread),
                _ => None,
            })
            .collect();
        assert_eq!(badges, vec![1, 2, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_positions() {
        let mesh = FrameMesh::default();
        let w = widget(&mesh, User::signed_out(), vec![]);
        assert_eq!(w.recall_scroll(SpaceId(4)), None);
        w.remember_scroll(SpaceId(4), 512.0);
        assert_eq!(w.recall_scroll(SpaceId(4)), Some(512.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_unknown_bubble() {
        let mesh = FrameMesh::default();
        let w = widget(&mesh, User::with_id(7), vec![]);
        w.start().await;
        assert!(matches!(w.open_bubble(SpaceId(99)).await, Err(WidgetError::UnknownBubble(SpaceId(99)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signed_out_start_skips_bubbles() {
        let mesh = FrameMesh::default();
        let listed = vec![Bubble::new(SpaceId(1), BubbleId(10), BubbleKind::Personal)];
        let w = widget(&mesh, User::signed_out(), listed);
        let user = w.start().await;
        assert!(user.is_signed_out());
        assert!(w.bubbles().is_empty());
        assert!(w.panels().is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_applies_until_source_closes() {
        let mesh = FrameMesh::default();
        let w = widget(&mesh, User::with_id(7), vec![]);
        w.start().await;

        let hub = RealtimeHub::new();
        let rx = hub.subscribe();
        hub.publish_raw("bubble-added.weavy", json!({ "spaceId": 4, "bubbleId": 40, "url": "/e/spaces/4" }))
            .unwrap();
        hub.publish_raw("presence-update.weavy", json!({ "id": 2, "status": "away" })).unwrap();
        drop(hub);

        let mut events = w.events().subscribe();
        w.run(rx).await;
        assert!(w.bubbles().get(SpaceId(4)).is_some());
        assert!(w.dock().button(&PanelId::for_space(SpaceId(4))).is_some());
        assert!(drain(&mut events).contains(&WidgetEvent::Presence { user_id: 2, status: "away".into() }));
    }
}
