//! Test doubles for the widget core's collaborators.
//!
//! Public so integration tests and the `demo` command can drive a whole
//! widget without a server or a browser.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use weavy_types::{Bubble, BubbleId, PanelId, User};

use crate::panels::FrameHost;
use crate::transport::{BubbleApi, IdentityApi, TransportError};

pub use crate::storage::MemoryStorage;

// ============================================================================
// MockIdentityApi
// ============================================================================

/// Identity endpoint answering from memory.
pub struct MockIdentityApi {
    user: Mutex<User>,
    delay: Duration,
    fetch_failures: Mutex<VecDeque<TransportError>>,
    sign_out_failure: Mutex<Option<TransportError>>,
    reject_jwts: Mutex<bool>,
    jwts_seen: Mutex<Vec<String>>,
    fetch_calls: AtomicUsize,
    jwt_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
}

impl MockIdentityApi {
    pub fn new(user: User) -> Self {
        Self {
            user: Mutex::new(user),
            delay: Duration::ZERO,
            fetch_failures: Mutex::new(VecDeque::new()),
            sign_out_failure: Mutex::new(None),
            reject_jwts: Mutex::new(false),
            jwts_seen: Mutex::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
            jwt_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
        }
    }

    /// Every call takes this long.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_user(&self, user: User) {
        *self.user.lock() = user;
    }

    pub fn fail_next_fetch(&self, error: TransportError) {
        self.fetch_failures.lock().push_back(error);
    }

    pub fn fail_sign_out(&self, error: TransportError) {
        *self.sign_out_failure.lock() = Some(error);
    }

    /// Answer every JWT sign-in with 401.
    pub fn reject_jwts(&self) {
        *self.reject_jwts.lock() = true;
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn jwt_calls(&self) -> usize {
        self.jwt_calls.load(Ordering::SeqCst)
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    pub fn jwts_seen(&self) -> Vec<String> {
        self.jwts_seen.lock().clone()
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl IdentityApi for MockIdentityApi {
    async fn fetch_user(&self) -> Result<User, TransportError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let failure = self.fetch_failures.lock().pop_front();
        match failure {
            Some(e) => Err(e),
            None => Ok(self.user.lock().clone()),
        }
    }

    async fn sign_in_jwt(&self, jwt: &str) -> Result<User, TransportError> {
        self.jwt_calls.fetch_add(1, Ordering::SeqCst);
        self.jwts_seen.lock().push(jwt.to_string());
        self.pause().await;
        let reject = *self.reject_jwts.lock();
        if reject {
            return Err(TransportError::Unauthorized);
        }
        Ok(self.user.lock().clone())
    }

    async fn sign_out(&self) -> Result<(), TransportError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let failure = self.sign_out_failure.lock().clone();
        match failure {
            Some(e) => Err(e),
            None => {
                *self.user.lock() = User::signed_out();
                Ok(())
            }
        }
    }
}

// ============================================================================
// MockBubbleApi
// ============================================================================

/// Bubble endpoint answering from memory. Removal is recorded, not applied;
/// the server's realtime echo is what changes client state.
#[derive(Default)]
pub struct MockBubbleApi {
    bubbles: Mutex<Vec<Bubble>>,
    removed: Mutex<Vec<BubbleId>>,
    failure: Mutex<Option<TransportError>>,
}

impl MockBubbleApi {
    pub fn new(bubbles: Vec<Bubble>) -> Self {
        Self { bubbles: Mutex::new(bubbles), ..Self::default() }
    }

    pub fn set_bubbles(&self, bubbles: Vec<Bubble>) {
        *self.bubbles.lock() = bubbles;
    }

    pub fn fail_with(&self, error: Option<TransportError>) {
        *self.failure.lock() = error;
    }

    pub fn removed(&self) -> Vec<BubbleId> {
        self.removed.lock().clone()
    }

    fn check(&self) -> Result<(), TransportError> {
        match self.failure.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BubbleApi for MockBubbleApi {
    async fn list_bubbles(&self) -> Result<Vec<Bubble>, TransportError> {
        self.check()?;
        Ok(self.bubbles.lock().clone())
    }

    async fn remove_bubble(&self, bubble_id: BubbleId) -> Result<(), TransportError> {
        self.check()?;
        self.removed.lock().push(bubble_id);
        Ok(())
    }
}

// ============================================================================
// RecordingFrameHost
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameCall {
    Create { frame: String, panel: PanelId },
    Load { frame: String, url: String },
    Destroy { frame: String },
}

/// Frame host that records every call. Loads succeed after `load_time`
/// unless the frame was told to fail or hang.
#[derive(Default)]
pub struct RecordingFrameHost {
    calls: Mutex<Vec<FrameCall>>,
    load_time: Duration,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
}

impl RecordingFrameHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_time(mut self, load_time: Duration) -> Self {
        self.load_time = load_time;
        self
    }

    pub fn fail_frame(&self, frame: &str) {
        self.failing.lock().insert(frame.to_string());
    }

    pub fn hang_frame(&self, frame: &str) {
        self.hanging.lock().insert(frame.to_string());
    }

    /// Undo `fail_frame` / `hang_frame`.
    pub fn recover_frame(&self, frame: &str) {
        self.failing.lock().remove(frame);
        self.hanging.lock().remove(frame);
    }

    pub fn calls(&self) -> Vec<FrameCall> {
        self.calls.lock().clone()
    }

    /// Frame names that were given a `src`, in order.
    pub fn loads(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                FrameCall::Load { frame, .. } => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                FrameCall::Destroy { frame } => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl FrameHost for RecordingFrameHost {
    fn create_frame(&self, frame_name: &str, panel_id: &PanelId) {
        self.calls.lock().push(FrameCall::Create {
            frame: frame_name.to_string(),
            panel: panel_id.clone(),
        });
    }

    async fn when_idle(&self) {}

    async fn load(&self, frame_name: &str, url: &str) -> Result<(), String> {
        self.calls.lock().push(FrameCall::Load {
            frame: frame_name.to_string(),
            url: url.to_string(),
        });
        let hang = self.hanging.lock().contains(frame_name);
        if hang {
            std::future::pending::<()>().await;
        }
        if !self.load_time.is_zero() {
            tokio::time::sleep(self.load_time).await;
        }
        let fail = self.failing.lock().contains(frame_name);
        if fail {
            return Err(format!("{url} did not load"));
        }
        Ok(())
    }

    fn destroy_frame(&self, frame_name: &str) {
        self.calls.lock().push(FrameCall::Destroy { frame: frame_name.to_string() });
    }
}
