//! Dock controller: buttons paired with panels.
//!
//! A button never stores its own open or loading flag. Both are read from
//! the paired panel, so a button can't show "open" while its panel is
//! closed or the other way round.
//!
//! Bubble buttons are reconciled against the bubble list by
//! [`DockController::add_and_remove_bubble_items`]. Open buttons survive a
//! sweep and are removed once closed, mirroring panel removal.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};
use weavy_types::{Bubble, BubbleId, BubbleKind, PanelId, SpaceId};

use crate::constants::BUBBLE_PANEL_KIND;
use crate::events::{ButtonContainer, EventBus, WidgetEvent};
use crate::panels::{PanelAttributes, PanelError, PanelRegistry};
use crate::storage::PersistentState;

pub const DOCK_STATE_KEY: &str = "dock-state";
pub const DOCK_POSITION_KEY: &str = "dock-position";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DockError {
    #[error("button id is required")]
    MissingButtonId,
    #[error("button {0} does not exist")]
    NotFound(PanelId),
    #[error("button {0} has no panel")]
    NoPanel(PanelId),
    #[error(transparent)]
    Panel(#[from] PanelError),
}

/// What clicking a button does.
#[derive(Clone, Default)]
pub enum ClickBehavior {
    #[default]
    TogglePanel,
    Disabled,
    Custom(Arc<dyn Fn(&PanelId) + Send + Sync>),
}

impl fmt::Debug for ClickBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TogglePanel => f.write_str("TogglePanel"),
            Self::Disabled => f.write_str("Disabled"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ButtonIcon {
    Url(String),
    Html(String),
}

/// Attributes for a new button.
#[derive(Clone, Debug)]
pub struct ButtonSpec {
    pub title: String,
    pub icon: Option<ButtonIcon>,
    pub kind: Option<String>,
    pub container: ButtonContainer,
    pub on_click: ClickBehavior,
}

impl ButtonSpec {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            icon: None,
            kind: None,
            container: ButtonContainer::System,
            on_click: ClickBehavior::TogglePanel,
        }
    }

    pub fn with_icon(mut self, icon: ButtonIcon) -> Self {
        self.icon = Some(icon);
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn in_container(mut self, container: ButtonContainer) -> Self {
        self.container = container;
        self
    }

    pub fn on_click(mut self, behavior: ClickBehavior) -> Self {
        self.on_click = behavior;
        self
    }
}

/// Snapshot of a button with its panel-derived flags.
#[derive(Clone, Debug, PartialEq)]
pub struct Button {
    pub id: PanelId,
    pub title: String,
    pub icon: Option<ButtonIcon>,
    pub kind: Option<String>,
    pub container: ButtonContainer,
    pub bubble_id: Option<BubbleId>,
    pub is_open: bool,
    pub is_loading: bool,
    pub pending_removal: bool,
}

struct ButtonEntry {
    spec: ButtonSpec,
    bubble: Option<(SpaceId, BubbleId)>,
    pending_removal: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DockState {
    #[default]
    Restored,
    Collapsed,
    Minimized,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DockPosition {
    pub x: f64,
    pub y: f64,
}

/// Result of one bubble reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub added: Vec<PanelId>,
    pub moved: Vec<PanelId>,
    pub removed: Vec<PanelId>,
    /// Gone from the list but kept because open.
    pub kept_open: Vec<PanelId>,
}

enum Patch {
    Missing,
    Patched,
    Moved { from: ButtonContainer, to: ButtonContainer },
}

struct DockInner {
    buttons: IndexMap<PanelId, ButtonEntry>,
    state: DockState,
    position: Option<DockPosition>,
}

pub struct DockController {
    panels: Arc<PanelRegistry>,
    events: EventBus,
    persisted: PersistentState,
    inner: Mutex<DockInner>,
}

fn container_for(kind: BubbleKind) -> Option<ButtonContainer> {
    match kind {
        BubbleKind::Global => Some(ButtonContainer::Global),
        BubbleKind::Personal => Some(ButtonContainer::Personal),
        BubbleKind::Detached => None,
    }
}

impl DockController {
    pub fn new(panels: Arc<PanelRegistry>, events: EventBus, persisted: PersistentState) -> Self {
        Self {
            panels,
            events,
            persisted,
            inner: Mutex::new(DockInner {
                buttons: IndexMap::new(),
                state: DockState::Restored,
                position: None,
            }),
        }
    }

    fn snapshot(&self, id: &PanelId, entry: &ButtonEntry) -> Button {
        let panel = self.panels.get(id);
        Button {
            id: id.clone(),
            title: entry.spec.title.clone(),
            icon: entry.spec.icon.clone(),
            kind: entry.spec.kind.clone(),
            container: entry.spec.container,
            bubble_id: entry.bubble.map(|(_, b)| b),
            is_open: panel.as_ref().is_some_and(|p| p.is_open),
            is_loading: panel.as_ref().is_some_and(|p| p.is_loading()),
            pending_removal: entry.pending_removal,
        }
    }

    pub fn button(&self, id: &PanelId) -> Option<Button> {
        let inner = self.inner.lock();
        inner.buttons.get(id).map(|e| self.snapshot(id, e))
    }

    pub fn buttons(&self) -> Vec<Button> {
        let inner = self.inner.lock();
        inner.buttons.iter().map(|(id, e)| self.snapshot(id, e)).collect()
    }

    // ------------------------------------------------------------------------
    // Buttons
    // ------------------------------------------------------------------------

    /// Add a button. A duplicate id returns the existing button.
    #[tracing::instrument(skip(self, spec), name = "dock.add_button")]
    pub fn add_button(&self, button_id: &str, spec: ButtonSpec) -> Result<Button, DockError> {
        let id = PanelId::new(button_id).map_err(|_| {
            error!("add_button called without a button id");
            DockError::MissingButtonId
        })?;
        self.insert_button(id, spec, None)
    }

    fn insert_button(
        &self,
        id: PanelId,
        spec: ButtonSpec,
        bubble: Option<(SpaceId, BubbleId)>,
    ) -> Result<Button, DockError> {
        let button = {
            let mut inner = self.inner.lock();
            if let Some(existing) = inner.buttons.get_mut(&id) {
                warn!(button = %id, "button already exists");
                existing.pending_removal = false;
                return Ok(self.snapshot(&id, existing));
            }
            let entry = ButtonEntry { spec, bubble, pending_removal: false };
            let button = self.snapshot(&id, &entry);
            inner.buttons.insert(id.clone(), entry);
            button
        };
        self.events.publish(WidgetEvent::ButtonAdded { button_id: id });
        Ok(button)
    }

    /// Remove a button. An open button is marked and removed once closed.
    #[tracing::instrument(skip(self), name = "dock.remove_button")]
    pub fn remove_button(&self, id: &PanelId) -> bool {
        let is_open = self.panels.get(id).is_some_and(|p| p.is_open);
        {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.buttons.get_mut(id) else {
                warn!(button = %id, "remove_button: no such button");
                return false;
            };
            if is_open {
                debug!(button = %id, "button is open, deferring removal");
                entry.pending_removal = true;
                return true;
            }
            inner.buttons.shift_remove(id);
        }
        self.events.publish(WidgetEvent::ButtonRemoved { button_id: id.clone() });
        true
    }

    /// Remove buttons that were waiting for their panel to close.
    pub fn finalize_pending(&self) -> Vec<PanelId> {
        let pending: Vec<PanelId> = self
            .inner
            .lock()
            .buttons
            .iter()
            .filter(|(_, e)| e.pending_removal)
            .map(|(id, _)| id.clone())
            .collect();
        pending.into_iter().filter(|id| self.remove_button(id) && self.button(id).is_none()).collect()
    }

    /// Run the button's click behavior.
    #[tracing::instrument(skip(self), name = "dock.click")]
    pub async fn click(&self, id: &PanelId) -> Result<(), DockError> {
        let behavior = {
            let inner = self.inner.lock();
            let entry = inner.buttons.get(id).ok_or_else(|| DockError::NotFound(id.clone()))?;
            entry.spec.on_click.clone()
        };
        match behavior {
            ClickBehavior::Disabled => {
                trace!(button = %id, "click disabled");
                Ok(())
            }
            ClickBehavior::Custom(handler) => {
                handler(id);
                Ok(())
            }
            ClickBehavior::TogglePanel => {
                if !self.panels.contains(id) {
                    return Err(DockError::NoPanel(id.clone()));
                }
                self.panels.toggle(id).await?;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Bubble reconciliation
    // ------------------------------------------------------------------------

    /// Bring bubble panels and buttons in line with `bubbles`.
    ///
    /// Existing pairs only get their bubble id patched and, if the bubble
    /// changed between global and personal, a cross-faded move. Bubble
    /// buttons whose space is gone are removed unless open.
    #[tracing::instrument(skip_all, name = "dock.reconcile", fields(count = bubbles.len()))]
    pub fn add_and_remove_bubble_items(&self, bubbles: &[Bubble]) -> Reconciled {
        let mut report = Reconciled::default();

        for bubble in bubbles {
            let id = PanelId::for_space(bubble.space_id);
            let url = (!bubble.url.is_empty()).then(|| bubble.url.clone());
            if let Err(e) = self.panels.add_panel(id.as_str(), url, PanelAttributes::kind(BUBBLE_PANEL_KIND)) {
                warn!(panel = %id, "could not add bubble panel: {e}");
                continue;
            }

            match self.patch_bubble_button(&id, bubble) {
                Patch::Missing => {
                    let mut spec = ButtonSpec::new(bubble.name.clone())
                        .with_kind(BUBBLE_PANEL_KIND)
                        .in_container(container_for(bubble.kind).unwrap_or(ButtonContainer::Personal));
                    if let Some(icon) = &bubble.icon {
                        spec = spec.with_icon(ButtonIcon::Url(icon.clone()));
                    }
                    if self.insert_button(id.clone(), spec, Some((bubble.space_id, bubble.bubble_id))).is_ok() {
                        report.added.push(id);
                    }
                }
                Patch::Moved { from, to } => {
                    debug!(button = %id, ?from, ?to, "moving bubble button");
                    self.events.publish(WidgetEvent::ButtonMoved {
                        button_id: id.clone(),
                        from,
                        to,
                        crossfade: true,
                    });
                    report.moved.push(id);
                }
                Patch::Patched => {}
            }
        }

        let gone: Vec<PanelId> = self
            .inner
            .lock()
            .buttons
            .iter()
            .filter(|(_, e)| {
                e.bubble
                    .is_some_and(|(space, _)| !bubbles.iter().any(|b| b.space_id == space))
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in gone {
            if self.panels.get(&id).is_some_and(|p| p.is_open) {
                trace!(button = %id, "bubble gone but open, keeping");
                if let Some(entry) = self.inner.lock().buttons.get_mut(&id) {
                    entry.pending_removal = true;
                }
                report.kept_open.push(id);
                continue;
            }
            self.remove_button(&id);
            self.panels.remove_panel(&id, false);
            report.removed.push(id);
        }
        report
    }

    /// Patch an existing bubble button in place. Detached bubbles keep their
    /// container.
    fn patch_bubble_button(&self, id: &PanelId, bubble: &Bubble) -> Patch {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.buttons.get_mut(id) else {
            return Patch::Missing;
        };
        entry.bubble = Some((bubble.space_id, bubble.bubble_id));
        entry.pending_removal = false;
        entry.spec.title = bubble.name.clone();
        match container_for(bubble.kind) {
            Some(to) if to != entry.spec.container => {
                let from = entry.spec.container;
                entry.spec.container = to;
                Patch::Moved { from, to }
            }
            _ => Patch::Patched,
        }
    }

    // ------------------------------------------------------------------------
    // Dock state
    // ------------------------------------------------------------------------

    pub fn state(&self) -> DockState {
        self.inner.lock().state
    }

    pub fn position(&self) -> Option<DockPosition> {
        self.inner.lock().position
    }

    pub fn collapse(&self) -> bool {
        self.set_state(DockState::Collapsed)
    }

    pub fn minimize(&self) -> bool {
        self.set_state(DockState::Minimized)
    }

    pub fn restore(&self) -> bool {
        self.set_state(DockState::Restored)
    }

    fn set_state(&self, next: DockState) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state == next {
                trace!(?next, "dock already in state");
                return false;
            }
            inner.state = next;
        }
        self.persisted.save(DOCK_STATE_KEY, &next);
        self.events.publish(match next {
            DockState::Restored => WidgetEvent::Restore,
            DockState::Collapsed => WidgetEvent::Collapse,
            DockState::Minimized => WidgetEvent::Minimize,
        });
        true
    }

    pub fn set_position(&self, position: DockPosition) {
        self.inner.lock().position = Some(position);
        self.persisted.save(DOCK_POSITION_KEY, &position);
    }

    /// Load state and position saved by an earlier page.
    pub fn restore_persisted(&self) {
        let state: Option<DockState> = self.persisted.load(DOCK_STATE_KEY);
        let position: Option<DockPosition> = self.persisted.load(DOCK_POSITION_KEY);
        let mut inner = self.inner.lock();
        if let Some(state) = state {
            inner.state = state;
        }
        if position.is_some() {
            inner.position = position;
        }
        debug!(state = ?inner.state, position = ?inner.position, "dock restored");
    }
}

// ============================================================================
// Tests
// ============================================================================
