//! Lease-based leader election among same-origin frames.
//!
//! One lease per origin. A frame holds leadership while its lease is fresh:
//!
//! - no lease, or an expired lease → the asking frame takes it
//! - a lease held by the asking frame → renewed
//! - a fresh lease held by someone else → refused
//!
//! Every frame runs a heartbeat task that asks once per heartbeat interval,
//! so a leader that stops heartbeating (hung tab) loses the lease after the
//! lease window and the next follower to tick takes over. A frame that
//! closes releases its lease immediately and the mesh promotes a successor
//! without waiting for a tick.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use weavy_types::FrameId;

#[derive(Clone, Copy, Debug)]
struct Lease {
    holder: FrameId,
    renewed_at: Instant,
}

/// Per-origin leases.
#[derive(Debug)]
pub struct LeaseTable {
    leases: DashMap<String, Lease>,
    lease: Duration,
}

impl LeaseTable {
    pub fn new(lease: Duration) -> Self {
        Self { leases: DashMap::new(), lease }
    }

    /// Acquire or renew. Returns whether `frame` is the holder afterwards.
    pub fn try_acquire(&self, origin: &str, frame: FrameId) -> bool {
        let now = Instant::now();
        let mut entry = self
            .leases
            .entry(origin.to_string())
            .or_insert(Lease { holder: frame, renewed_at: now });

        if entry.holder == frame {
            entry.renewed_at = now;
            return true;
        }
        if now.duration_since(entry.renewed_at) >= self.lease {
            info!(origin, previous = %entry.holder, next = %frame, "leader lease expired, taking over");
            *entry = Lease { holder: frame, renewed_at: now };
            return true;
        }
        false
    }

    /// Drop the lease if `frame` holds it. Returns whether it did.
    pub fn release(&self, origin: &str, frame: FrameId) -> bool {
        let released = self.leases.remove_if(origin, |_, l| l.holder == frame).is_some();
        if released {
            debug!(origin, %frame, "leader lease released");
        }
        released
    }

    pub fn holder(&self, origin: &str) -> Option<FrameId> {
        self.leases.get(origin).map(|l| l.holder)
    }
}

/// Run the heartbeat for one frame, publishing leadership into `leader`.
pub fn spawn_heartbeat(
    table: Arc<LeaseTable>,
    origin: String,
    frame: FrameId,
    heartbeat: Duration,
    leader: Arc<watch::Sender<bool>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; creation already asked once.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let held = table.try_acquire(&origin, frame);
            leader.send_if_modified(|current| {
                if *current != held {
                    debug!(%frame, origin = %origin, held, "leadership changed");
                    *current = held;
                    true
                } else {
                    false
                }
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(3);

    #[tokio::test(start_paused = true)]
    async fn test_first_frame_wins() {
        let table = LeaseTable::new(LEASE);
        let (a, b) = (FrameId::new(), FrameId::new());
        assert!(table.try_acquire("https://x", a));
        assert!(!table.try_acquire("https://x", b));
        assert!(table.try_acquire("https://y", b));
        assert_eq!(table.holder("https://x"), Some(a));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_is_taken() {
        let table = LeaseTable::new(LEASE);
        let (a, b) = (FrameId::new(), FrameId::new());
        table.try_acquire("o", a);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!table.try_acquire("o", b));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(table.try_acquire("o", b));
        assert!(!table.try_acquire("o", a));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_keeps_lease() {
        let table = LeaseTable::new(LEASE);
        let (a, b) = (FrameId::new(), FrameId::new());
        for _ in 0..5 {
            assert!(table.try_acquire("o", a));
            tokio::time::advance(Duration::from_secs(2)).await;
        }
        assert!(!table.try_acquire("o", b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_only_by_holder() {
        let table = LeaseTable::new(LEASE);
        let (a, b) = (FrameId::new(), FrameId::new());
        table.try_acquire("o", a);
        assert!(!table.release("o", b));
        assert!(table.release("o", a));
        assert_eq!(table.holder("o"), None);
        assert!(table.try_acquire("o", b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_takes_over_stale_lease() {
        let table = Arc::new(LeaseTable::new(LEASE));
        let (a, b) = (FrameId::new(), FrameId::new());
        table.try_acquire("o", a);

        let (tx, mut rx) = watch::channel(false);
        let task = spawn_heartbeat(table.clone(), "o".into(), b, Duration::from_secs(1), Arc::new(tx));

        rx.wait_for(|held| *held).await.unwrap();
        assert_eq!(table.holder("o"), Some(b));
        task.abort();
    }
}
