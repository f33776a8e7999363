//! Panel registry: iframe-backed content regions.
//!
//! A panel is created without a `src`. Its frame is only pointed at its URL
//! when the panel is first opened or preloaded, and exactly once. At most
//! one panel per registry is open at a time.
//!
//! # Removal
//!
//! A visible panel is never removed synchronously. `remove_panel` on an open
//! panel marks it pending and schedules a close; the actual removal (and the
//! `panel-removed` event) happens once the close transition is over.
//!
//! # Preloading
//!
//! `preload_frames` is strictly sequential: untyped (system) frames first,
//! each awaited before the next, then typed frames one at a time behind a
//! fixed delay. Only one preload run exists at a time; a forced call during
//! a non-forced run escalates it instead of starting a second one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};
use weavy_types::PanelId;

use crate::bus::{FrameBus, FrameMessage};
use crate::config::WidgetConfig;
use crate::deferred::{Deferred, DeferredError, DeferredState};
use crate::events::{EventBus, WidgetEvent};
use crate::storage::PersistentState;

pub const OPEN_PANEL_KEY: &str = "open-panel";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PanelError {
    #[error("panel id is required")]
    MissingPanelId,
    #[error("panel {0} does not exist")]
    NotFound(PanelId),
    #[error("panel {0} has no url to load")]
    MissingUrl(PanelId),
    #[error("panel {0} is being removed")]
    Removed(PanelId),
    #[error("panel {0} failed to load: {1}")]
    LoadFailed(PanelId, String),
}

/// The embedding side of a panel: creates, loads and destroys frames.
#[async_trait]
pub trait FrameHost: Send + Sync {
    /// Create a frame with a deferred source. Must not start loading.
    fn create_frame(&self, frame_name: &str, panel_id: &PanelId);

    /// Resolves when the document is idle enough to start a load.
    async fn when_idle(&self);

    /// Assign `url` as the frame's source and resolve when it has loaded.
    async fn load(&self, frame_name: &str, url: &str) -> Result<(), String>;

    fn destroy_frame(&self, frame_name: &str);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    /// The last load failed or timed out. The next open tries again.
    Failed,
}

/// Optional attributes for [`PanelRegistry::add_panel`].
#[derive(Clone, Debug, Default)]
pub struct PanelAttributes {
    /// Free-form type tag. Untyped panels are system panels.
    pub kind: Option<String>,
    /// Survives `clear_panels`.
    pub persistent: bool,
}

impl PanelAttributes {
    pub fn kind(kind: impl Into<String>) -> Self {
        Self { kind: Some(kind.into()), persistent: false }
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// Snapshot of a panel.
#[derive(Clone, Debug, PartialEq)]
pub struct Panel {
    pub id: PanelId,
    pub url: Option<String>,
    pub kind: Option<String>,
    pub persistent: bool,
    pub is_open: bool,
    pub load_state: LoadState,
    pub frame_name: String,
    /// The frame has been given its real `src`.
    pub src_assigned: bool,
    /// Will be removed as soon as it is closed.
    pub pending_removal: bool,
}

impl Panel {
    pub fn is_loading(&self) -> bool {
        self.load_state == LoadState::Loading
    }

    pub fn is_system(&self) -> bool {
        self.kind.is_none()
    }
}

struct PanelEntry {
    panel: Panel,
    loaded: Deferred<(), PanelError>,
}

impl PanelEntry {
    /// Hand the frame its `src`. A failed earlier attempt keeps its
    /// rejection for existing waiters; new waiters follow this load.
    fn start_loading(&mut self) {
        if self.loaded.state() == DeferredState::Rejected {
            self.loaded.reset();
        }
        self.panel.src_assigned = true;
        self.panel.load_state = LoadState::Loading;
    }
}

enum OpenAction {
    Navigate(String),
    AssignSrc(String),
    Show,
}

/// A panel that was just closed, for post-close bookkeeping.
struct Hidden {
    id: PanelId,
    frame_name: String,
    pending_removal: bool,
}

#[derive(Clone, Debug)]
pub struct PanelOptions {
    pub preload_delay: Duration,
    pub preload_timeout: Duration,
    pub close_transition: Duration,
    pub is_mobile: bool,
}

impl From<&WidgetConfig> for PanelOptions {
    fn from(config: &WidgetConfig) -> Self {
        Self {
            preload_delay: config.preload_delay(),
            preload_timeout: config.preload_timeout(),
            close_transition: config.close_transition(),
            is_mobile: config.is_mobile,
        }
    }
}

#[derive(Default)]
struct PreloadRun {
    running: bool,
    force: bool,
}

pub struct PanelRegistry {
    host: Arc<dyn FrameHost>,
    bus: Arc<dyn FrameBus>,
    events: EventBus,
    state: PersistentState,
    options: PanelOptions,
    panels: Mutex<IndexMap<PanelId, PanelEntry>>,
    preload: Mutex<PreloadRun>,
    unblocked: watch::Sender<bool>,
    ready: watch::Sender<bool>,
}

impl PanelRegistry {
    pub fn new(
        options: PanelOptions,
        host: Arc<dyn FrameHost>,
        bus: Arc<dyn FrameBus>,
        events: EventBus,
        state: PersistentState,
    ) -> Arc<Self> {
        Arc::new(Self {
            host,
            bus,
            events,
            state,
            options,
            panels: Mutex::new(IndexMap::new()),
            preload: Mutex::new(PreloadRun::default()),
            unblocked: watch::Sender::new(true),
            ready: watch::Sender::new(false),
        })
    }

    // ------------------------------------------------------------------------
    // Gates
    // ------------------------------------------------------------------------

    /// While blocked, `open` waits.
    pub fn set_blocked(&self, blocked: bool) {
        self.unblocked.send_replace(!blocked);
    }

    /// Release `open` calls waiting for the widget to finish loading.
    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn get(&self, id: &PanelId) -> Option<Panel> {
        self.panels.lock().get(id).map(|e| e.panel.clone())
    }

    pub fn contains(&self, id: &PanelId) -> bool {
        self.panels.lock().contains_key(id)
    }

    pub fn panels(&self) -> Vec<Panel> {
        self.panels.lock().values().map(|e| e.panel.clone()).collect()
    }

    pub fn open_panel(&self) -> Option<PanelId> {
        self.panels
            .lock()
            .values()
            .find(|e| e.panel.is_open)
            .map(|e| e.panel.id.clone())
    }

    /// The persisted open panel, if it still exists here.
    pub fn persisted_open_panel(&self) -> Option<PanelId> {
        let id: PanelId = self.state.load(OPEN_PANEL_KEY)?;
        self.contains(&id).then_some(id)
    }

    /// Wait for the panel's frame to finish loading.
    pub async fn when_loaded(&self, id: &PanelId) -> Result<(), PanelError> {
        let loaded = {
            let panels = self.panels.lock();
            let entry = panels.get(id).ok_or_else(|| PanelError::NotFound(id.clone()))?;
            entry.loaded.clone()
        };
        match loaded.wait().await {
            Ok(()) => Ok(()),
            Err(DeferredError::Rejected(e)) => Err(e),
            Err(DeferredError::Abandoned) => Err(PanelError::Removed(id.clone())),
        }
    }

    // ------------------------------------------------------------------------
    // Add / remove
    // ------------------------------------------------------------------------

    /// Register a panel. Re-adding an existing id returns the existing panel.
    #[tracing::instrument(skip(self, attributes), name = "panels.add")]
    pub fn add_panel(
        &self,
        panel_id: &str,
        url: Option<String>,
        attributes: PanelAttributes,
    ) -> Result<Panel, PanelError> {
        let id = PanelId::new(panel_id).map_err(|_| {
            error!("add_panel called without a panel id");
            PanelError::MissingPanelId
        })?;

        let panel = {
            let mut panels = self.panels.lock();
            if let Some(existing) = panels.get_mut(&id) {
                warn!(panel = %id, "panel already exists");
                if existing.panel.pending_removal {
                    debug!(panel = %id, "re-added while removal was pending, keeping it");
                    existing.panel.pending_removal = false;
                }
                return Ok(existing.panel.clone());
            }

            let panel = Panel {
                frame_name: format!("panel-{id}"),
                id: id.clone(),
                url: url.filter(|u| !u.trim().is_empty()),
                kind: attributes.kind.clone(),
                persistent: attributes.persistent,
                is_open: false,
                load_state: LoadState::Unloaded,
                src_assigned: false,
                pending_removal: false,
            };
            panels.insert(id.clone(), PanelEntry { panel: panel.clone(), loaded: Deferred::new() });
            panel
        };

        self.host.create_frame(&panel.frame_name, &id);
        self.events.publish(WidgetEvent::PanelAdded { panel_id: id, kind: attributes.kind });
        Ok(panel)
    }

    /// Remove a panel. Persistent panels need `force`. An open panel is
    /// closed first and removed after its close transition.
    ///
    /// Returns whether a removal happened or was scheduled.
    #[tracing::instrument(skip(self), name = "panels.remove")]
    pub fn remove_panel(self: &Arc<Self>, id: &PanelId, force: bool) -> bool {
        let removed = {
            let mut panels = self.panels.lock();
            let Some(entry) = panels.get_mut(id) else {
                warn!(panel = %id, "remove_panel: no such panel");
                return false;
            };
            if entry.panel.persistent && !force {
                debug!(panel = %id, "not removing persistent panel");
                return false;
            }
            if entry.panel.is_open {
                if !entry.panel.pending_removal {
                    debug!(panel = %id, "panel is open, deferring removal until closed");
                    entry.panel.pending_removal = true;
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        this.close().await;
                    });
                }
                return true;
            }
            panels.shift_remove(id)
        };

        if let Some(entry) = removed {
            self.destroy(entry);
        }
        true
    }

    /// Remove every non-persistent panel.
    #[tracing::instrument(skip(self), name = "panels.clear")]
    pub fn clear_panels(self: &Arc<Self>) {
        let ids: Vec<PanelId> = self
            .panels
            .lock()
            .values()
            .filter(|e| !e.panel.persistent)
            .map(|e| e.panel.id.clone())
            .collect();
        for id in ids {
            self.remove_panel(&id, false);
        }
    }

    /// Remove every pending panel that is no longer open.
    pub fn finalize_pending(&self) -> Vec<PanelId> {
        let removed: Vec<PanelEntry> = {
            let mut panels = self.panels.lock();
            let ids: Vec<PanelId> = panels
                .values()
                .filter(|e| e.panel.pending_removal && !e.panel.is_open)
                .map(|e| e.panel.id.clone())
                .collect();
            ids.iter().filter_map(|id| panels.shift_remove(id)).collect()
        };
        removed
            .into_iter()
            .map(|entry| {
                let id = entry.panel.id.clone();
                self.destroy(entry);
                id
            })
            .collect()
    }

    fn destroy(&self, entry: PanelEntry) {
        debug!(panel = %entry.panel.id, "panel removed");
        self.host.destroy_frame(&entry.panel.frame_name);
        entry.loaded.reset();
        self.events.publish(WidgetEvent::PanelRemoved { panel_id: entry.panel.id });
    }

    // ------------------------------------------------------------------------
    // Open / close
    // ------------------------------------------------------------------------

    /// Open a panel, closing whichever other panel is open.
    ///
    /// Exactly one of three things happens to the frame: an already loaded
    /// frame given a `destination` navigates there; a frame without a `src`
    /// starts loading `destination` or its url; otherwise it is shown.
    #[tracing::instrument(skip(self), name = "panels.open")]
    pub async fn open(
        self: &Arc<Self>,
        id: &PanelId,
        destination: Option<String>,
    ) -> Result<Panel, PanelError> {
        wait_flag(&self.unblocked).await;
        wait_flag(&self.ready).await;

        let (action, hidden, panel) = {
            let mut panels = self.panels.lock();
            let current = &panels.get(id).ok_or_else(|| PanelError::NotFound(id.clone()))?.panel;
            if current.pending_removal {
                return Err(PanelError::Removed(id.clone()));
            }

            let action = match (&destination, current.src_assigned) {
                (Some(dest), true) => OpenAction::Navigate(dest.clone()),
                (None, true) if current.is_open => {
                    trace!(panel = %id, "already open");
                    return Ok(current.clone());
                }
                (None, true) => OpenAction::Show,
                (_, false) => match destination.clone().or_else(|| current.url.clone()) {
                    Some(url) => OpenAction::AssignSrc(url),
                    None => {
                        error!(panel = %id, "cannot open a panel without a url");
                        return Err(PanelError::MissingUrl(id.clone()));
                    }
                },
            };

            let mut hidden = Vec::new();
            for (pid, entry) in panels.iter_mut() {
                if pid == id {
                    entry.panel.is_open = true;
                    if matches!(action, OpenAction::AssignSrc(_)) {
                        entry.start_loading();
                    }
                } else if entry.panel.is_open {
                    let p = &mut entry.panel;
                    p.is_open = false;
                    hidden.push(Hidden {
                        id: pid.clone(),
                        frame_name: p.frame_name.clone(),
                        pending_removal: p.pending_removal,
                    });
                }
            }
            let panel = panels.get(id).map(|e| e.panel.clone());
            (action, hidden, panel)
        };
        let panel = panel.ok_or_else(|| PanelError::NotFound(id.clone()))?;

        if self.hide(&hidden) {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(this.options.close_transition).await;
                this.finalize_pending();
            });
        }

        match action {
            OpenAction::Navigate(url) => {
                debug!(panel = %id, %url, "navigating loaded panel");
                self.bus.post_to_frame(&panel.frame_name, false, FrameMessage::Navigate { url });
            }
            OpenAction::AssignSrc(url) => {
                debug!(panel = %id, %url, "loading panel");
                let this = Arc::clone(self);
                let (id, frame_name) = (id.clone(), panel.frame_name.clone());
                tokio::spawn(async move {
                    let _ = this.load_frame(&id, &frame_name, &url).await;
                });
            }
            OpenAction::Show => {
                self.bus.post_to_frame(&panel.frame_name, false, FrameMessage::Show);
            }
        }

        self.events.publish(WidgetEvent::PanelOpen { panel_id: id.clone(), destination });
        self.state.save(OPEN_PANEL_KEY, id);
        Ok(panel)
    }

    /// Close the open panel, if any, and wait out the close transition.
    /// Returns the panel that was closed.
    #[tracing::instrument(skip(self), name = "panels.close")]
    pub async fn close(&self) -> Option<PanelId> {
        let hidden: Vec<Hidden> = {
            let mut panels = self.panels.lock();
            panels
                .values_mut()
                .filter(|e| e.panel.is_open)
                .map(|e| {
                    e.panel.is_open = false;
                    Hidden {
                        id: e.panel.id.clone(),
                        frame_name: e.panel.frame_name.clone(),
                        pending_removal: e.panel.pending_removal,
                    }
                })
                .collect()
        };
        if hidden.is_empty() {
            trace!("close: nothing open");
            return None;
        }

        self.hide(&hidden);
        self.state.clear(OPEN_PANEL_KEY);
        tokio::time::sleep(self.options.close_transition).await;
        self.finalize_pending();
        hidden.into_iter().next().map(|h| h.id)
    }

    /// Open if closed, close if open.
    pub async fn toggle(self: &Arc<Self>, id: &PanelId) -> Result<Option<Panel>, PanelError> {
        let is_open = self.get(id).ok_or_else(|| PanelError::NotFound(id.clone()))?.is_open;
        if is_open {
            self.close().await;
            Ok(None)
        } else {
            self.open(id, None).await.map(Some)
        }
    }

    /// Post `hide` and announce closes. Returns whether any was pending
    /// removal.
    fn hide(&self, hidden: &[Hidden]) -> bool {
        for h in hidden {
            self.bus.post_to_frame(&h.frame_name, false, FrameMessage::Hide);
            self.events.publish(WidgetEvent::PanelClose { panel_id: h.id.clone() });
        }
        hidden.iter().any(|h| h.pending_removal)
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    async fn load_frame(&self, id: &PanelId, frame_name: &str, url: &str) -> Result<(), PanelError> {
        self.events.publish(WidgetEvent::PanelLoading { panel_id: id.clone(), is_loading: true });
        let timeout = self.options.preload_timeout;
        let outcome = match tokio::time::timeout(timeout, self.host.load(frame_name, url)).await {
            Ok(result) => result,
            Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
        };
        self.finish_load(id, outcome)
    }

    fn finish_load(&self, id: &PanelId, outcome: Result<(), String>) -> Result<(), PanelError> {
        let loaded = {
            let mut panels = self.panels.lock();
            let Some(entry) = panels.get_mut(id) else {
                debug!(panel = %id, "panel removed while loading");
                return Ok(());
            };
            match outcome {
                Ok(()) => entry.panel.load_state = LoadState::Loaded,
                Err(_) => {
                    // Without a src the next open assigns it again.
                    entry.panel.load_state = LoadState::Failed;
                    entry.panel.src_assigned = false;
                }
            }
            entry.loaded.clone()
        };
        self.events.publish(WidgetEvent::PanelLoading { panel_id: id.clone(), is_loading: false });

        match outcome {
            Ok(()) => {
                trace!(panel = %id, "loaded");
                loaded.resolve(());
                Ok(())
            }
            Err(reason) => {
                warn!(panel = %id, "panel failed to load: {reason}");
                self.events.publish(WidgetEvent::PanelLoadFailed {
                    panel_id: id.clone(),
                    reason: reason.clone(),
                });
                let err = PanelError::LoadFailed(id.clone(), reason);
                loaded.reject(err.clone());
                Err(err)
            }
        }
    }

    /// Give one frame its `src` once the document is idle. A frame that
    /// already has a `src` is left alone.
    #[tracing::instrument(skip(self), name = "panels.preload_frame")]
    pub async fn preload_frame(&self, id: &PanelId) -> Result<(), PanelError> {
        self.host.when_idle().await;

        let (frame_name, url) = {
            let mut panels = self.panels.lock();
            let entry = panels.get_mut(id).ok_or_else(|| PanelError::NotFound(id.clone()))?;
            if entry.panel.src_assigned {
                trace!(panel = %id, "already has a src");
                return Ok(());
            }
            let Some(url) = entry.panel.url.clone() else {
                trace!(panel = %id, "no url to preload");
                return Ok(());
            };
            entry.start_loading();
            (entry.panel.frame_name.clone(), url)
        };
        self.load_frame(id, &frame_name, &url).await
    }

    /// Preload system frames, then (when forced) typed frames, one at a
    /// time. Suppressed on mobile.
    #[tracing::instrument(skip(self), name = "panels.preload_frames")]
    pub async fn preload_frames(&self, force: bool) {
        if self.options.is_mobile {
            debug!("preloading disabled on mobile");
            return;
        }
        {
            let mut run = self.preload.lock();
            if run.running {
                if force && !run.force {
                    debug!("escalating running preload to include typed frames");
                    run.force = true;
                } else {
                    debug!("preload already running");
                }
                return;
            }
            run.running = true;
            run.force = force;
        }
        info!(force, "preloading frames");

        let system: Vec<PanelId> = self
            .panels
            .lock()
            .values()
            .filter(|e| e.panel.is_system() && !e.panel.src_assigned && e.panel.url.is_some())
            .map(|e| e.panel.id.clone())
            .collect();
        for id in system {
            if let Err(e) = self.preload_frame(&id).await {
                debug!("system preload of {id} did not complete: {e}");
            }
        }

        loop {
            let next = {
                let mut run = self.preload.lock();
                let next = if run.force { self.next_typed_preload() } else { None };
                if next.is_none() {
                    run.running = false;
                    run.force = false;
                }
                next
            };
            let Some(id) = next else { break };

            tokio::time::sleep(self.options.preload_delay).await;
            if let Err(e) = self.preload_frame(&id).await {
                debug!("typed preload of {id} did not complete: {e}");
            }
        }
        debug!("preloading finished");
    }

    fn next_typed_preload(&self) -> Option<PanelId> {
        self.panels
            .lock()
            .values()
            .find(|e| {
                let p = &e.panel;
                !p.is_system()
                    && !p.src_assigned
                    && !p.pending_removal
                    && p.load_state != LoadState::Failed
                    && p.url.is_some()
            })
            .map(|e| e.panel.id.clone())
    }
}

async fn wait_flag(flag: &watch::Sender<bool>) {
    let mut rx = flag.subscribe();
    // The sender lives as long as the registry, so this cannot close early.
    let _ = rx.wait_for(|set| *set).await;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Channel;
    use crate::events::drain;
    use crate::mesh::{FrameMesh, MeshFrame};
    use crate::testing::{MemoryStorage, RecordingFrameHost};

    const ORIGIN: &str = "https://acme.weavy.io";
    const TRANSITION: Duration = Duration::from_millis(200);

    struct Fixture {
        registry: Arc<PanelRegistry>,
        host: Arc<RecordingFrameHost>,
        events: EventBus,
        mesh: FrameMesh,
        top: Arc<MeshFrame>,
        storage: Arc<MemoryStorage>,
    }

    fn fixture_with(config: WidgetConfig, host: RecordingFrameHost) -> Fixture {
        let mesh = FrameMesh::default();
        let top = Arc::new(mesh.open_window("top", ORIGIN));
        let host = Arc::new(host);
        let events = EventBus::new();
        let storage = Arc::new(MemoryStorage::new());
        let state = PersistentState::new(storage.clone(), "weavy", "acme.weavy.io");
        let registry = PanelRegistry::new(
            PanelOptions::from(&config),
            host.clone(),
            top.clone(),
            events.clone(),
            state,
        );
        registry.mark_ready();
        Fixture { registry, host, events, mesh, top, storage }
    }

    fn fixture() -> Fixture {
        fixture_with(WidgetConfig::default(), RecordingFrameHost::new())
    }

    fn pid(s: &str) -> PanelId {
        PanelId::new(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_is_idempotent() {
        let f = fixture();
        let mut rx = f.events.subscribe();

        let a = f.registry.add_panel("x", Some("/x".into()), PanelAttributes::default()).unwrap();
        let b = f.registry.add_panel("x", Some("/other".into()), PanelAttributes::kind("bubble")).unwrap();
        assert_eq!(a, b);
        assert_eq!(b.url.as_deref(), Some("/x"));
        assert_eq!(a.load_state, LoadState::Unloaded);
        assert!(!a.src_assigned);

        let added = drain(&mut rx).into_iter().filter(|e| e.name() == "panel-added").count();
        assert_eq!(added, 1);
        assert_eq!(f.host.calls().len(), 1);
        assert!(f.host.loads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_panel_id_is_an_error() {
        let f = fixture();
        assert_eq!(
            f.registry.add_panel("", None, PanelAttributes::default()),
            Err(PanelError::MissingPanelId)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_open_panel_is_deferred() {
        let f = fixture();
        let mut rx = f.events.subscribe();
        f.registry.add_panel("x", Some("/x".into()), PanelAttributes::default()).unwrap();
        f.registry.open(&pid("x"), None).await.unwrap();

        assert!(f.registry.remove_panel(&pid("x"), false));
        let still_there = f.registry.get(&pid("x")).unwrap();
        assert!(still_there.pending_removal);
        assert!(!drain(&mut rx).iter().any(|e| e.name() == "panel-removed"));

        tokio::time::sleep(TRANSITION * 2).await;
        assert!(f.registry.get(&pid("x")).is_none());
        let evs = drain(&mut rx);
        let close_at = evs.iter().position(|e| e.name() == "panel-close").unwrap();
        let removed_at = evs.iter().position(|e| e.name() == "panel-removed").unwrap();
        assert!(close_at < removed_at);
        assert_eq!(f.host.destroyed(), vec!["panel-x".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_closed_panel_is_immediate() {
        let f = fixture();
        f.registry.add_panel("x", Some("/x".into()), PanelAttributes::default()).unwrap();
        assert!(f.registry.remove_panel(&pid("x"), false));
        assert!(f.registry.get(&pid("x")).is_none());
        assert!(!f.registry.remove_panel(&pid("x"), false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_open() {
        let f = fixture();
        f.registry.add_panel("a", Some("/a".into()), PanelAttributes::default()).unwrap();
        f.registry.add_panel("b", Some("/b".into()), PanelAttributes::default()).unwrap();

        f.registry.open(&pid("a"), None).await.unwrap();
        f.registry.open(&pid("b"), None).await.unwrap();
        assert!(!f.registry.get(&pid("a")).unwrap().is_open);
        assert!(f.registry.get(&pid("b")).unwrap().is_open);
        assert_eq!(f.registry.open_panel(), Some(pid("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_branches() {
        let f = fixture();
        f.registry.add_panel("a", Some("/a".into()), PanelAttributes::default()).unwrap();
        let frame = f.mesh.open_child(&f.top, "panel-a", ORIGIN);
        let mut frame_rx = frame.subscribe();

        // First open assigns the src.
        f.registry.open(&pid("a"), None).await.unwrap();
        f.registry.when_loaded(&pid("a")).await.unwrap();
        assert_eq!(f.host.loads(), vec!["panel-a".to_string()]);
        assert!(frame_rx.try_recv().is_err());

        // Re-open after close shows the loaded frame.
        f.registry.close().await;
        assert_eq!(frame_rx.try_recv().unwrap().message, FrameMessage::Hide);
        f.registry.open(&pid("a"), None).await.unwrap();
        let env = frame_rx.try_recv().unwrap();
        assert_eq!(env.channel, Channel::Direct);
        assert_eq!(env.message, FrameMessage::Show);

        // A destination navigates the loaded frame.
        f.registry.open(&pid("a"), Some("/a/7".into())).await.unwrap();
        assert_eq!(
            frame_rx.try_recv().unwrap().message,
            FrameMessage::Navigate { url: "/a/7".into() }
        );
        assert_eq!(f.host.loads().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_without_url_fails_without_side_effects() {
        let f = fixture();
        f.registry.add_panel("a", Some("/a".into()), PanelAttributes::default()).unwrap();
        f.registry.add_panel("empty", None, PanelAttributes::default()).unwrap();
        f.registry.open(&pid("a"), None).await.unwrap();

        assert_eq!(
            f.registry.open(&pid("empty"), None).await,
            Err(PanelError::MissingUrl(pid("empty")))
        );
        assert_eq!(f.registry.open_panel(), Some(pid("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_waits_for_gates() {
        let f = fixture();
        f.registry.add_panel("a", Some("/a".into()), PanelAttributes::default()).unwrap();
        f.registry.set_blocked(true);

        let pending = {
            let registry = f.registry.clone();
            tokio::spawn(async move { registry.open(&pid("a"), None).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!f.registry.get(&pid("a")).unwrap().is_open);

        f.registry.set_blocked(false);
        pending.await.unwrap().unwrap();
        assert!(f.registry.get(&pid("a")).unwrap().is_open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_persists_and_close_clears() {
        let f = fixture();
        f.registry.add_panel("a", Some("/a".into()), PanelAttributes::default()).unwrap();
        f.registry.open(&pid("a"), None).await.unwrap();
        assert_eq!(f.registry.persisted_open_panel(), Some(pid("a")));
        assert_eq!(f.storage.keys(), vec!["weavy_acme.weavy.io_open-panel".to_string()]);

        assert_eq!(f.registry.close().await, Some(pid("a")));
        assert_eq!(f.registry.persisted_open_panel(), None);
        assert_eq!(f.registry.close().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_keeps_persistent() {
        let f = fixture();
        f.registry.add_panel("keep", None, PanelAttributes::default().persistent()).unwrap();
        f.registry.add_panel("drop", None, PanelAttributes::default()).unwrap();
        f.registry.clear_panels();
        assert!(f.registry.contains(&pid("keep")));
        assert!(!f.registry.contains(&pid("drop")));

        assert!(!f.registry.remove_panel(&pid("keep"), false));
        assert!(f.registry.remove_panel(&pid("keep"), true));
        assert!(f.registry.panels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_preload_frame_once() {
        let f = fixture();
        f.registry.add_panel("a", Some("/a".into()), PanelAttributes::default()).unwrap();
        f.registry.preload_frame(&pid("a")).await.unwrap();
        f.registry.preload_frame(&pid("a")).await.unwrap();
        assert_eq!(f.host.loads(), vec!["panel-a".to_string()]);
        assert_eq!(f.registry.get(&pid("a")).unwrap().load_state, LoadState::Loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preload_order_system_first() {
        let f = fixture_with(
            WidgetConfig::default(),
            RecordingFrameHost::new().with_load_time(Duration::from_millis(50)),
        );
        f.registry.add_panel("typed", Some("/t".into()), PanelAttributes::kind("messenger")).unwrap();
        f.registry.add_panel("sys1", Some("/s1".into()), PanelAttributes::default()).unwrap();
        f.registry.add_panel("sys2", Some("/s2".into()), PanelAttributes::default()).unwrap();

        f.registry.preload_frames(false).await;
        assert_eq!(f.host.loads(), vec!["panel-sys1".to_string(), "panel-sys2".to_string()]);

        f.registry.preload_frames(true).await;
        assert_eq!(f.host.loads().last().map(String::as_str), Some("panel-typed"));
        assert_eq!(f.host.loads().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_preload_escalates_running_one() {
        let f = fixture_with(
            WidgetConfig::default(),
            RecordingFrameHost::new().with_load_time(Duration::from_millis(500)),
        );
        f.registry.add_panel("sys", Some("/s".into()), PanelAttributes::default()).unwrap();
        f.registry.add_panel("t1", Some("/t1".into()), PanelAttributes::kind("files")).unwrap();
        f.registry.add_panel("t2", Some("/t2".into()), PanelAttributes::kind("posts")).unwrap();

        let run = {
            let registry = f.registry.clone();
            tokio::spawn(async move { registry.preload_frames(false).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Returns immediately: the running sequence picks up the typed frames.
        f.registry.preload_frames(true).await;
        run.await.unwrap();

        assert_eq!(
            f.host.loads(),
            vec!["panel-sys".to_string(), "panel-t1".to_string(), "panel-t2".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_preload_on_mobile() {
        let config = WidgetConfig { is_mobile: true, ..WidgetConfig::default() };
        let f = fixture_with(config, RecordingFrameHost::new());
        f.registry.add_panel("sys", Some("/s".into()), PanelAttributes::default()).unwrap();
        f.registry.preload_frames(true).await;
        assert!(f.host.loads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_and_timeout() {
        let host = RecordingFrameHost::new();
        host.fail_frame("panel-bad");
        host.hang_frame("panel-slow");
        let f = fixture_with(WidgetConfig::default(), host);
        let mut rx = f.events.subscribe();
        f.registry.add_panel("bad", Some("/bad".into()), PanelAttributes::default()).unwrap();
        f.registry.add_panel("slow", Some("/slow".into()), PanelAttributes::default()).unwrap();

        f.registry.preload_frames(false).await;
        assert!(matches!(
            f.registry.when_loaded(&pid("bad")).await,
            Err(PanelError::LoadFailed(..))
        ));
        assert!(matches!(
            f.registry.when_loaded(&pid("slow")).await,
            Err(PanelError::LoadFailed(..))
        ));
        let failures = drain(&mut rx).into_iter().filter(|e| e.name() == "panel-load-failed").count();
        assert_eq!(failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_retried_on_next_open() {
        let host = RecordingFrameHost::new();
        host.fail_frame("panel-a");
        let f = fixture_with(WidgetConfig::default(), host);
        f.registry.add_panel("a", Some("/a".into()), PanelAttributes::default()).unwrap();
        let frame = f.mesh.open_child(&f.top, "panel-a", ORIGIN);
        let mut frame_rx = frame.subscribe();

        f.registry.open(&pid("a"), None).await.unwrap();
        assert!(matches!(
            f.registry.when_loaded(&pid("a")).await,
            Err(PanelError::LoadFailed(..))
        ));
        let a = f.registry.get(&pid("a")).unwrap();
        assert_eq!(a.load_state, LoadState::Failed);
        assert!(!a.src_assigned);

        f.registry.close().await;
        assert_eq!(frame_rx.try_recv().unwrap().message, FrameMessage::Hide);

        // The frame never loaded, so it is loaded again rather than shown.
        f.host.recover_frame("panel-a");
        f.registry.open(&pid("a"), None).await.unwrap();
        f.registry.when_loaded(&pid("a")).await.unwrap();
        assert!(frame_rx.try_recv().is_err());
        assert_eq!(f.host.loads(), vec!["panel-a".to_string(), "panel-a".to_string()]);
        assert_eq!(f.registry.get(&pid("a")).unwrap().load_state, LoadState::Loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_preload_skips_failed_frames() {
        let host = RecordingFrameHost::new();
        host.fail_frame("panel-bad");
        let f = fixture_with(WidgetConfig::default(), host);
        f.registry.add_panel("bad", Some("/bad".into()), PanelAttributes::kind("app")).unwrap();
        f.registry.add_panel("good", Some("/good".into()), PanelAttributes::kind("app")).unwrap();

        f.registry.preload_frames(true).await;
        assert_eq!(f.host.loads(), vec!["panel-bad".to_string(), "panel-good".to_string()]);
        assert_eq!(f.registry.get(&pid("bad")).unwrap().load_state, LoadState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle() {
        let f = fixture();
        f.registry.add_panel("a", Some("/a".into()), PanelAttributes::default()).unwrap();
        assert!(f.registry.toggle(&pid("a")).await.unwrap().is_some());
        assert!(f.registry.toggle(&pid("a")).await.unwrap().is_none());
        assert_eq!(f.registry.open_panel(), None);
    }
}
