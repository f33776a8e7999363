//! In-process [`FrameBus`] implementation.
//!
//! A [`FrameMesh`] simulates a set of browsing contexts: top-level windows
//! (tabs) and nested child frames, each on an origin. It is what the demo
//! binary and the integration tests run the widget core against, and it owns
//! the per-origin [`LeaseTable`] used for leader election.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use weavy_types::FrameId;

use crate::bus::{Channel, Envelope, FrameBus, FrameMessage};
use crate::constants::{DEFAULT_LEADER_HEARTBEAT, DEFAULT_LEADER_LEASE, FRAME_CHANNEL_CAPACITY};
use crate::leader::{LeaseTable, spawn_heartbeat};

struct FrameSlot {
    name: String,
    origin: String,
    parent: Option<FrameId>,
    tx: broadcast::Sender<Envelope>,
    leader: Arc<watch::Sender<bool>>,
}

struct MeshInner {
    /// Creation order doubles as succession order.
    frames: RwLock<IndexMap<FrameId, FrameSlot>>,
    leases: Arc<LeaseTable>,
    heartbeat: Duration,
}

impl MeshInner {
    fn deliver(&self, target: FrameId, envelope: Envelope) -> bool {
        let frames = self.frames.read();
        match frames.get(&target) {
            Some(slot) => {
                trace!(to = %target, channel = ?envelope.channel, "deliver");
                // No subscribers is fine; the frame exists.
                let _ = slot.tx.send(envelope);
                true
            }
            None => false,
        }
    }

    fn close(&self, id: FrameId) {
        let Some(slot) = self.frames.write().shift_remove(&id) else {
            return;
        };
        slot.leader.send_replace(false);
        debug!(frame = %id, name = %slot.name, "frame closed");

        if !self.leases.release(&slot.origin, id) {
            return;
        }
        // Promote the oldest surviving same-origin frame right away.
        let frames = self.frames.read();
        for (&fid, other) in frames.iter().filter(|(_, f)| f.origin == slot.origin) {
            if self.leases.try_acquire(&other.origin, fid) {
                other.leader.send_replace(true);
                debug!(frame = %fid, origin = %other.origin, "promoted to leader");
                break;
            }
        }
    }
}

/// Registry of simulated frames.
#[derive(Clone)]
pub struct FrameMesh {
    inner: Arc<MeshInner>,
}

impl Default for FrameMesh {
    fn default() -> Self {
        Self::new(DEFAULT_LEADER_HEARTBEAT, DEFAULT_LEADER_LEASE)
    }
}

impl FrameMesh {
    pub fn new(heartbeat: Duration, lease: Duration) -> Self {
        Self {
            inner: Arc::new(MeshInner {
                frames: RwLock::new(IndexMap::new()),
                leases: Arc::new(LeaseTable::new(lease)),
                heartbeat,
            }),
        }
    }

    /// Open a top-level window (a tab).
    pub fn open_window(&self, name: &str, origin: &str) -> MeshFrame {
        self.open(name, origin, None)
    }

    /// Open an iframe inside `parent`.
    pub fn open_child(&self, parent: &MeshFrame, name: &str, origin: &str) -> MeshFrame {
        self.open(name, origin, Some(parent.id))
    }

    pub fn leader_of(&self, origin: &str) -> Option<FrameId> {
        self.inner.leases.holder(origin)
    }

    pub fn frame_count(&self) -> usize {
        self.inner.frames.read().len()
    }

    fn open(&self, name: &str, origin: &str, parent: Option<FrameId>) -> MeshFrame {
        let id = FrameId::new();
        let (tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let is_leader = self.inner.leases.try_acquire(origin, id);
        let (leader_tx, leader_rx) = watch::channel(is_leader);
        let leader_tx = Arc::new(leader_tx);

        self.inner.frames.write().insert(
            id,
            FrameSlot {
                name: name.to_string(),
                origin: origin.to_string(),
                parent,
                tx: tx.clone(),
                leader: leader_tx.clone(),
            },
        );
        debug!(frame = %id, name, origin, is_leader, "frame opened");

        let heartbeat = spawn_heartbeat(
            self.inner.leases.clone(),
            origin.to_string(),
            id,
            self.inner.heartbeat,
            leader_tx,
        );

        MeshFrame {
            id,
            name: name.to_string(),
            origin: origin.to_string(),
            parent,
            tx,
            leader: leader_rx,
            heartbeat,
            mesh: self.inner.clone(),
        }
    }
}

/// One simulated browsing context. Dropping it closes the frame.
pub struct MeshFrame {
    id: FrameId,
    name: String,
    origin: String,
    parent: Option<FrameId>,
    tx: broadcast::Sender<Envelope>,
    leader: watch::Receiver<bool>,
    heartbeat: JoinHandle<()>,
    mesh: Arc<MeshInner>,
}

impl MeshFrame {
    /// Simulate a hung frame: heartbeats stop but the lease is not
    /// released, so other frames only take over once it expires.
    pub fn stall(&self) {
        self.heartbeat.abort();
        if let Some(slot) = self.mesh.frames.read().get(&self.id) {
            slot.leader.send_replace(false);
        }
    }

    fn envelope(&self, channel: Channel, message: FrameMessage) -> Envelope {
        Envelope { source: self.id, origin: self.origin.clone(), channel, message }
    }
}

impl Drop for MeshFrame {
    fn drop(&mut self) {
        self.heartbeat.abort();
        self.mesh.close(self.id);
    }
}

#[async_trait]
impl FrameBus for MeshFrame {
    fn frame_id(&self) -> FrameId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn origin(&self) -> &str {
        &self.origin
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    fn post_to_parent(&self, message: FrameMessage) -> bool {
        match self.parent {
            Some(parent) => self.mesh.deliver(parent, self.envelope(Channel::FromChild, message)),
            None => false,
        }
    }

    fn post_to_children(&self, message: FrameMessage) -> usize {
        let children: Vec<FrameId> = self
            .mesh
            .frames
            .read()
            .iter()
            .filter(|(_, f)| f.parent == Some(self.id))
            .map(|(id, _)| *id)
            .collect();
        children
            .into_iter()
            .filter(|&child| {
                self.mesh.deliver(child, self.envelope(Channel::FromParent, message.clone()))
            })
            .count()
    }

    fn post_to_frame(&self, name: &str, only_if_same_origin: bool, message: FrameMessage) -> bool {
        let target = {
            let frames = self.mesh.frames.read();
            // Own children shadow same-named frames elsewhere.
            let mut named = frames.iter().filter(|(_, f)| f.name == name);
            let child = named.clone().find(|(_, f)| f.parent == Some(self.id));
            child.or_else(|| named.next()).map(|(id, f)| (*id, f.origin.clone()))
        };
        match target {
            Some((_, origin)) if only_if_same_origin && origin != self.origin => {
                debug!(name, %origin, "not posting to cross-origin frame");
                false
            }
            Some((id, _)) => self.mesh.deliver(id, self.envelope(Channel::Direct, message)),
            None => false,
        }
    }

    fn post_to_origin(&self, message: FrameMessage) -> usize {
        let peers: Vec<FrameId> = self
            .mesh
            .frames
            .read()
            .iter()
            .filter(|(id, f)| **id != self.id && f.origin == self.origin)
            .map(|(id, _)| *id)
            .collect();
        peers
            .into_iter()
            .filter(|&peer| self.mesh.deliver(peer, self.envelope(Channel::FromOrigin, message.clone())))
            .count()
    }

    fn is_leader(&self) -> bool {
        *self.leader.borrow()
    }

    async fn when_leader(&self) {
        let mut rx = self.leader.clone();
        let closed = rx.wait_for(|held| *held).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    const ORIGIN: &str = "https://acme.weavy.io";

    fn mesh() -> FrameMesh {
        FrameMesh::new(Duration::from_secs(1), Duration::from_secs(3))
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_child_routing() {
        let mesh = mesh();
        let top = mesh.open_window("top", ORIGIN);
        let child = mesh.open_child(&top, "panel-a", ORIGIN);
        let mut top_rx = top.subscribe();
        let mut child_rx = child.subscribe();

        assert_eq!(top.post_to_children(FrameMessage::Show), 1);
        let env = child_rx.try_recv().unwrap();
        assert_eq!(env.channel, Channel::FromParent);
        assert_eq!(env.source, top.frame_id());

        assert!(child.post_to_parent(FrameMessage::RequestUser));
        assert_eq!(top_rx.try_recv().unwrap().channel, Channel::FromChild);
        assert!(!top.post_to_parent(FrameMessage::Hide));
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_to_frame_respects_origin() {
        let mesh = mesh();
        let top = mesh.open_window("top", ORIGIN);
        let foreign = mesh.open_child(&top, "foreign", "https://elsewhere.example");
        let mut rx = foreign.subscribe();

        assert!(!top.post_to_frame("foreign", true, FrameMessage::Show));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        assert!(top.post_to_frame("foreign", false, FrameMessage::Show));
        assert_eq!(rx.try_recv().unwrap().channel, Channel::Direct);

        assert!(!top.post_to_frame("missing", false, FrameMessage::Show));
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_to_origin_skips_self_and_other_origins() {
        let mesh = mesh();
        let a = mesh.open_window("a", ORIGIN);
        let b = mesh.open_window("b", ORIGIN);
        let c = mesh.open_window("c", "https://other.example");
        let mut a_rx = a.subscribe();
        let mut b_rx = b.subscribe();
        let mut c_rx = c.subscribe();

        assert_eq!(a.post_to_origin(FrameMessage::ClearUser), 1);
        assert_eq!(b_rx.try_recv().unwrap().channel, Channel::FromOrigin);
        assert!(a_rx.try_recv().is_err());
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_leader_per_origin() {
        let mesh = mesh();
        let a = mesh.open_window("a", ORIGIN);
        let b = mesh.open_window("b", ORIGIN);
        let c = mesh.open_window("c", "https://other.example");
        assert!(a.is_leader());
        assert!(!b.is_leader());
        assert!(c.is_leader());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(a.is_leader());
        assert!(!b.is_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_leader_promotes_successor() {
        let mesh = mesh();
        let a = mesh.open_window("a", ORIGIN);
        let b = Arc::new(mesh.open_window("b", ORIGIN));
        let waiter = {
            let b = b.clone();
            tokio::spawn(async move { b.when_leader().await })
        };

        drop(a);
        waiter.await.unwrap();
        assert!(b.is_leader());
        assert_eq!(mesh.leader_of(ORIGIN), Some(b.frame_id()));
        assert_eq!(mesh.frame_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_leader_loses_lease() {
        let mesh = mesh();
        let a = mesh.open_window("a", ORIGIN);
        let b = mesh.open_window("b", ORIGIN);

        a.stall();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!b.is_leader());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(b.is_leader());
        assert!(!a.is_leader());
    }
}
