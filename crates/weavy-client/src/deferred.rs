//! Resettable deferred value.
//!
//! A [`Deferred`] is a stable handle onto "the current outstanding result" of
//! some logical operation (an authentication check, a frame load). Each
//! generation of the result lives in its own [`DeferredSlot`]:
//!
//! ```text
//!   Deferred (stable handle)
//!       │ current
//!       ▼
//!   slot #1 ── Abandoned   ← reset() while pending
//!   slot #2 ── Resolved(v) ← waiters attached before the next reset see v
//!   slot #3 ── Pending     ← new waiters attach here
//! ```
//!
//! `reset()` never touches a settled slot and never moves waiters between
//! slots. Waiters on an abandoned slot are woken with
//! [`DeferredError::Abandoned`]; resolving an abandoned slot is a no-op, so a
//! superseded operation can never settle the generation that replaced it.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Observable settlement state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferredState {
    Pending,
    Resolved,
    Rejected,
}

/// Why a wait did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeferredError<E> {
    #[error("rejected: {0}")]
    Rejected(E),
    #[error("deferred value was reset before it settled")]
    Abandoned,
}

#[derive(Clone, Debug)]
enum Cell<T, E> {
    Pending,
    Resolved(T),
    Rejected(E),
    Abandoned,
}

/// One generation of a deferred value.
pub struct DeferredSlot<T, E> {
    tx: Arc<watch::Sender<Cell<T, E>>>,
}

impl<T, E> Clone for DeferredSlot<T, E> {
    fn clone(&self) -> Self {
        Self { tx: Arc::clone(&self.tx) }
    }
}

impl<T, E> std::fmt::Debug for DeferredSlot<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match &*self.tx.borrow() {
            Cell::Pending => "pending",
            Cell::Resolved(_) => "resolved",
            Cell::Rejected(_) => "rejected",
            Cell::Abandoned => "abandoned",
        };
        write!(f, "DeferredSlot({label})")
    }
}

impl<T, E> DeferredSlot<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn pending() -> Self {
        let (tx, _) = watch::channel(Cell::Pending);
        Self { tx: Arc::new(tx) }
    }

    /// Settle with a value. Returns false if already settled or abandoned.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Cell::Resolved(value))
    }

    /// Settle with an error. Returns false if already settled or abandoned.
    pub fn reject(&self, error: E) -> bool {
        self.settle(Cell::Rejected(error))
    }

    fn settle(&self, next: Cell<T, E>) -> bool {
        let mut applied = false;
        self.tx.send_if_modified(|cell| {
            if matches!(cell, Cell::Pending) {
                *cell = next;
                applied = true;
            }
            applied
        });
        applied
    }

    fn abandon(&self) {
        self.settle(Cell::Abandoned);
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(&*self.tx.borrow(), Cell::Abandoned)
    }

    pub fn state(&self) -> DeferredState {
        match &*self.tx.borrow() {
            Cell::Pending | Cell::Abandoned => DeferredState::Pending,
            Cell::Resolved(_) => DeferredState::Resolved,
            Cell::Rejected(_) => DeferredState::Rejected,
        }
    }

    /// The settlement, if any, without waiting.
    pub fn peek(&self) -> Option<Result<T, DeferredError<E>>> {
        match &*self.tx.borrow() {
            Cell::Pending => None,
            Cell::Resolved(v) => Some(Ok(v.clone())),
            Cell::Rejected(e) => Some(Err(DeferredError::Rejected(e.clone()))),
            Cell::Abandoned => Some(Err(DeferredError::Abandoned)),
        }
    }

    /// Wait for this generation to settle.
    ///
    /// The returned future owns its receiver and does not borrow the slot.
    pub fn wait(&self) -> impl Future<Output = Result<T, DeferredError<E>>> + Send + use<T, E> {
        let mut rx = self.tx.subscribe();
        async move {
            let cell = match rx.wait_for(|c| !matches!(c, Cell::Pending)).await {
                Ok(cell) => cell.clone(),
                Err(_) => return Err(DeferredError::Abandoned),
            };
            match cell {
                Cell::Resolved(v) => Ok(v),
                Cell::Rejected(e) => Err(DeferredError::Rejected(e)),
                Cell::Pending | Cell::Abandoned => Err(DeferredError::Abandoned),
            }
        }
    }
}

/// Stable, clonable handle over successive [`DeferredSlot`] generations.
pub struct Deferred<T, E> {
    current: Arc<Mutex<DeferredSlot<T, E>>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self { current: Arc::clone(&self.current) }
    }
}

impl<T, E> std::fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Deferred").field(&*self.current.lock()).finish()
    }
}

impl<T, E> Default for Deferred<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { current: Arc::new(Mutex::new(DeferredSlot::pending())) }
    }

    /// An instantly resolved instance.
    pub fn resolved(value: T) -> Self {
        let d = Self::new();
        d.resolve(value);
        d
    }

    /// An instantly rejected instance.
    pub fn rejected(error: E) -> Self {
        let d = Self::new();
        d.reject(error);
        d
    }

    /// Drive a future to completion on the runtime and settle with its output.
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let d = Self::new();
        let slot = d.slot();
        tokio::spawn(async move {
            match fut.await {
                Ok(v) => slot.resolve(v),
                Err(e) => slot.reject(e),
            };
        });
        d
    }

    /// The current generation.
    pub fn slot(&self) -> DeferredSlot<T, E> {
        self.current.lock().clone()
    }

    pub fn resolve(&self, value: T) -> bool {
        self.slot().resolve(value)
    }

    pub fn reject(&self, error: E) -> bool {
        self.slot().reject(error)
    }

    pub fn state(&self) -> DeferredState {
        self.slot().state()
    }

    pub fn peek(&self) -> Option<Result<T, DeferredError<E>>> {
        self.slot().peek()
    }

    /// Re-arm with a fresh pending generation and return it.
    ///
    /// A still-pending previous generation is abandoned; a settled one is
    /// left as it was for whoever already holds it.
    pub fn reset(&self) -> DeferredSlot<T, E> {
        let fresh = DeferredSlot::pending();
        let old = std::mem::replace(&mut *self.current.lock(), fresh.clone());
        old.abandon();
        fresh
    }

    /// Wait on the generation current at call time.
    pub fn wait(&self) -> impl Future<Output = Result<T, DeferredError<E>>> + Send + use<T, E> {
        self.slot().wait()
    }

    /// True when both handles are clones of one another.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.current, &other.current)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    type D = Deferred<u32, String>;

    #[tokio::test]
    async fn test_resolve_then_wait() {
        let d = D::new();
        assert_eq!(d.state(), DeferredState::Pending);
        assert!(d.resolve(3));
        assert_eq!(d.state(), DeferredState::Resolved);
        assert_eq!(d.wait().await, Ok(3));
    }

    #[tokio::test]
    async fn test_first_settlement_wins() {
        let d = D::new();
        assert!(d.reject("nope".into()));
        assert!(!d.resolve(1));
        assert_eq!(d.wait().await, Err(DeferredError::Rejected("nope".into())));
    }

    #[tokio::test]
    async fn test_static_helpers() {
        assert_eq!(D::resolved(9).wait().await, Ok(9));
        assert_eq!(D::rejected("x".into()).state(), DeferredState::Rejected);
    }

    #[tokio::test]
    async fn test_waiter_before_reset_sees_only_old_generation() {
        let d = D::new();
        let before = tokio::spawn(d.wait());
        tokio::task::yield_now().await;

        d.reset();
        d.resolve(2);

        assert_eq!(before.await.unwrap(), Err(DeferredError::Abandoned));
        assert_eq!(d.wait().await, Ok(2));
    }

    #[tokio::test]
    async fn test_settled_generation_survives_reset() {
        let d = D::new();
        let before = d.wait();
        d.resolve(1);
        d.reset();
        d.resolve(2);

        assert_eq!(before.await, Ok(1));
        assert_eq!(d.wait().await, Ok(2));
    }

    #[tokio::test]
    async fn test_stale_slot_cannot_settle_new_generation() {
        let d = D::new();
        let stale = d.slot();
        let fresh = d.reset();

        assert!(stale.is_abandoned());
        assert!(!stale.resolve(7));
        assert_eq!(fresh.state(), DeferredState::Pending);
        assert_eq!(d.state(), DeferredState::Pending);
    }

    #[tokio::test]
    async fn test_reset_on_fresh_instance_is_safe() {
        let d = D::new();
        d.reset();
        d.reset();
        assert_eq!(d.state(), DeferredState::Pending);
        assert!(d.peek().is_none());
    }

    #[tokio::test]
    async fn test_clones_share_generations() {
        let d = D::new();
        let other = d.clone();
        other.reset();
        d.resolve(4);
        assert_eq!(other.wait().await, Ok(4));
    }

    #[tokio::test]
    async fn test_wait_outlives_handle() {
        let d = D::new();
        let slot = d.slot();
        let waiting = D::clone(&d).wait();
        drop(d);
        slot.resolve(5);
        assert_eq!(waiting.await, Ok(5));
    }

    #[tokio::test]
    async fn test_from_future() {
        let d = D::from_future(async { Ok(11) });
        assert_eq!(d.wait().await, Ok(11));
    }
}
