//! Bubble store: the dock's shortcut list, keyed by space.
//!
//! The server is the source of truth. Local state only changes when a
//! server answer or realtime echo arrives; `remove_bubble` just asks.
//! The one local exception is the open bubble: a server removal keeps it
//! around as [`BubbleKind::Detached`] until the user moves away from it.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};
use weavy_types::{Bubble, BubbleId, BubbleKind, SpaceId};

use crate::events::{EventBus, NoticeLevel, WidgetEvent};
use crate::transport::{BubbleApi, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BubbleError {
    #[error("bubble id is required")]
    MissingBubbleId,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What a server-confirmed removal did locally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Removal {
    Deleted,
    /// Kept because it is open.
    Detached,
    Ignored,
}

#[derive(Default)]
struct StoreInner {
    bubbles: IndexMap<SpaceId, Bubble>,
    open: Option<SpaceId>,
}

pub struct BubbleStore {
    api: Arc<dyn BubbleApi>,
    events: EventBus,
    limit: usize,
    inner: Mutex<StoreInner>,
}

impl BubbleStore {
    pub fn new(api: Arc<dyn BubbleApi>, events: EventBus, limit: usize) -> Self {
        Self { api, events, limit, inner: Mutex::new(StoreInner::default()) }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn bubbles(&self) -> Vec<Bubble> {
        self.inner.lock().bubbles.values().cloned().collect()
    }

    pub fn get(&self, space_id: SpaceId) -> Option<Bubble> {
        self.inner.lock().bubbles.get(&space_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().bubbles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn open_space(&self) -> Option<SpaceId> {
        self.inner.lock().open
    }

    /// Merge incoming bubbles. Returns the bubbles that were added or changed.
    ///
    /// An existing space is replaced in place. A global bubble is never
    /// downgraded to personal. Inserts beyond the limit are rejected with a
    /// notice.
    #[tracing::instrument(skip_all, name = "bubbles.add", fields(count = incoming.len()))]
    pub fn add_bubbles(&self, incoming: &[Bubble]) -> Vec<Bubble> {
        let mut changed = Vec::new();
        let mut rejected = Vec::new();
        {
            let mut inner = self.inner.lock();
            for bubble in incoming {
                let space_id = bubble.space_id;
                let full = inner.bubbles.len() >= self.limit;
                match inner.bubbles.get_mut(&space_id) {
                    Some(existing) => {
                        let mut next = bubble.clone();
                        if existing.kind == BubbleKind::Global && next.kind == BubbleKind::Personal {
                            trace!(%space_id, "keeping global over personal");
                            next.kind = BubbleKind::Global;
                        }
                        if *existing == next {
                            trace!(%space_id, "redelivered bubble, nothing to do");
                            continue;
                        }
                        *existing = next.clone();
                        changed.push(next);
                    }
                    None if full => {
                        warn!(%space_id, limit = self.limit, "bubble limit reached");
                        rejected.push(space_id);
                    }
                    None => {
                        inner.bubbles.insert(space_id, bubble.clone());
                        changed.push(bubble.clone());
                    }
                }
            }
        }

        for bubble in &changed {
            self.events.publish(WidgetEvent::BubbleAdded { bubble: bubble.clone() });
        }
        self.announce_rejected(rejected);
        changed
    }

    /// Adopt the server's list, announcing only the differences. Returns the
    /// bubbles that were added or changed.
    ///
    /// The open bubble survives as detached if the server no longer lists it,
    /// and it does not count against the limit.
    #[tracing::instrument(skip_all, name = "bubbles.replace", fields(count = listed.len()))]
    pub fn replace_all(&self, listed: &[Bubble]) -> Vec<Bubble> {
        let mut changed = Vec::new();
        let mut removed = Vec::new();
        let mut rejected = Vec::new();
        {
            let mut inner = self.inner.lock();
            let mut next: IndexMap<SpaceId, Bubble> = IndexMap::with_capacity(listed.len());
            for bubble in listed {
                let space_id = bubble.space_id;
                if !next.contains_key(&space_id) && next.len() >= self.limit {
                    warn!(%space_id, limit = self.limit, "bubble limit reached");
                    rejected.push(space_id);
                    continue;
                }
                next.insert(space_id, bubble.clone());
            }
            for (space_id, bubble) in &next {
                if inner.bubbles.get(space_id) != Some(bubble) {
                    changed.push(bubble.clone());
                }
            }

            let open = inner.open.filter(|space| !next.contains_key(space));
            for (space_id, old) in &inner.bubbles {
                if next.contains_key(space_id) {
                    continue;
                }
                if open == Some(*space_id) {
                    if old.kind != BubbleKind::Detached {
                        debug!(%space_id, "open bubble no longer listed, detaching");
                        removed.push((*space_id, old.bubble_id, true));
                    }
                } else {
                    removed.push((*space_id, old.bubble_id, false));
                }
            }
            if let Some(mut kept) = open.and_then(|space| inner.bubbles.get(&space).cloned()) {
                kept.kind = BubbleKind::Detached;
                next.insert(kept.space_id, kept);
            }
            inner.bubbles = next;
        }

        for (space_id, bubble_id, detached) in removed {
            self.events.publish(WidgetEvent::BubbleRemoved { space_id, bubble_id, detached });
        }
        for bubble in &changed {
            self.events.publish(WidgetEvent::BubbleAdded { bubble: bubble.clone() });
        }
        self.announce_rejected(rejected);
        changed
    }

    fn announce_rejected(&self, rejected: Vec<SpaceId>) {
        for space_id in rejected {
            self.events.publish(WidgetEvent::BubbleLimitExceeded { space_id, limit: self.limit });
            self.events.publish(WidgetEvent::Notice {
                level: NoticeLevel::Warning,
                message: format!("You can have at most {} bubbles.", self.limit),
            });
        }
    }

    /// Ask the server to remove a bubble. Local state changes when the
    /// `bubble-removed` echo arrives.
    #[tracing::instrument(skip(self), name = "bubbles.remove")]
    pub async fn remove_bubble(&self, bubble_id: BubbleId) -> Result<(), BubbleError> {
        if bubble_id.get() <= 0 {
            error!("remove_bubble called without a bubble id");
            return Err(BubbleError::MissingBubbleId);
        }
        self.api.remove_bubble(bubble_id).await?;
        debug!(%bubble_id, "removal requested");
        Ok(())
    }

    /// Apply a server-confirmed removal.
    #[tracing::instrument(skip(self), name = "bubbles.removed")]
    pub fn apply_removed(&self, space_id: SpaceId, bubble_id: BubbleId) -> Removal {
        let removal = {
            let mut inner = self.inner.lock();
            let is_open = inner.open == Some(space_id);
            let Some(existing) = inner.bubbles.get_mut(&space_id) else {
                warn!(%space_id, "removal for unknown bubble");
                return Removal::Ignored;
            };
            if existing.bubble_id != bubble_id {
                debug!(%space_id, stale = %bubble_id, current = %existing.bubble_id, "stale removal");
                return Removal::Ignored;
            }
            if is_open {
                existing.kind = BubbleKind::Detached;
                Removal::Detached
            } else {
                inner.bubbles.shift_remove(&space_id);
                Removal::Deleted
            }
        };
        self.events.publish(WidgetEvent::BubbleRemoved {
            space_id,
            bubble_id,
            detached: removal == Removal::Detached,
        });
        removal
    }

    /// The space itself is gone; drop its bubble whatever its membership id.
    pub fn space_trashed(&self, space_id: SpaceId) -> Removal {
        let bubble_id = self.inner.lock().bubbles.get(&space_id).map(|b| b.bubble_id);
        let removal = match bubble_id {
            Some(bubble_id) => self.apply_removed(space_id, bubble_id),
            None => Removal::Ignored,
        };
        self.events.publish(WidgetEvent::SpaceTrashed { space_id });
        removal
    }

    /// Track which bubble is open. Detached bubbles that are no longer open
    /// are purged and returned.
    pub fn set_open(&self, space_id: Option<SpaceId>) -> Vec<Bubble> {
        let mut inner = self.inner.lock();
        inner.open = space_id;
        let stale: Vec<SpaceId> = inner
            .bubbles
            .values()
            .filter(|b| b.kind == BubbleKind::Detached && Some(b.space_id) != space_id)
            .map(|b| b.space_id)
            .collect();
        stale
            .iter()
            .filter_map(|space| inner.bubbles.shift_remove(space))
            .inspect(|b| debug!(space_id = %b.space_id, "purging detached bubble"))
            .collect()
    }

    /// Fetch the authoritative list from the server and adopt it.
    pub async fn refresh(&self) -> Result<Vec<Bubble>, BubbleError> {
        let listed = self.api.list_bubbles().await?;
        self.replace_all(&listed);
        Ok(self.bubbles())
    }
}

// ============================================================================
// Tests
// ============================================================================
