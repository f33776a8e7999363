//! Authentication session: who is signed in, replicated across frames.
//!
//! One [`AuthenticationSession`] exists per Weavy base URL, owned by an
//! [`AuthRegistry`]. The session is a small state machine:
//!
//! ```text
//!   Unknown ──check──► Authenticating ──► Authenticated (authorized or not)
//!      ▲                                      │
//!      └──────────── sign_in / sign_out ──────┘
//! ```
//!
//! # Leader frame
//!
//! Only the bus leader for the origin talks to the identity endpoint.
//! Followers post `request-user` to the origin and wait for the leader's
//! `user` or `user-error` broadcast. A follower's `sign-in` names the frame
//! to answer, and the leader replies with a `sign-in-result` without touching
//! its own JWT provider. A follower that gets promoted while waiting finishes
//! the job itself.
//!
//! # Gates
//!
//! `when_authenticated` settles once any identity answer is known;
//! `when_authorized` only once a real user is signed in. Both are
//! [`Deferred`] values re-armed before each new check, so a late answer from
//! a superseded check can never settle the gate that replaced it.
//!
//! # Fan-out
//!
//! Every processed user is re-posted to child frames. An answer this frame
//! fetched itself is also posted to same-origin peers. Nothing is ever posted
//! back to the parent, so updates cannot ping-pong.

use std::future::Future;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use weavy_types::{User, UserTransition};

use crate::bus::{Channel, Envelope, FrameBus, FrameMessage, SignInOutcome};
use crate::deferred::{Deferred, DeferredError, DeferredSlot, DeferredState};
use crate::events::{EventBus, NoticeLevel, WidgetEvent};
use crate::transport::{IdentityApi, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("jwt option must be a string or a function that returns a promise")]
    InvalidJwtProvider,
    #[error("no JWT provider configured")]
    NoJwtProvider,
    #[error("JWT was rejected by the server")]
    JwtRejected,
    #[error("JWT provider failed: {0}")]
    Provider(String),
    #[error("identity check failed: {0}")]
    Transport(#[from] TransportError),
    #[error("leader frame reported: {0}")]
    Leader(String),
}

// ============================================================================
// JWT provider
// ============================================================================

pub type JwtFuture = BoxFuture<'static, Result<String, AuthError>>;

/// Where JWTs come from: a fixed token or an async function.
#[derive(Clone)]
pub enum JwtProvider {
    Token(String),
    Provider(Arc<dyn Fn() -> JwtFuture + Send + Sync>),
}

impl JwtProvider {
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(token.into())
    }

    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, AuthError>> + Send + 'static,
    {
        Self::Provider(Arc::new(move || -> JwtFuture { Box::pin(f()) }))
    }

    /// Accept a loosely typed configuration value. Only strings can be
    /// expressed this way; anything else is an integration bug.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, AuthError> {
        match value {
            serde_json::Value::String(s) => Ok(Self::Token(s.clone())),
            other => {
                error!("invalid jwt option: {other}");
                Err(AuthError::InvalidJwtProvider)
            }
        }
    }

    async fn fetch(&self) -> Result<String, AuthError> {
        match self {
            Self::Token(t) => Ok(t.clone()),
            Self::Provider(f) => f().await,
        }
    }
}

impl PartialEq for JwtProvider {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Token(a), Self::Token(b)) => a == b,
            (Self::Provider(a), Self::Provider(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for JwtProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("JwtProvider::Token(..)"),
            Self::Provider(_) => f.write_str("JwtProvider::Provider(..)"),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Where a user snapshot came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UserSource {
    /// This frame fetched it or decided it (sign-out, ambient id).
    Local,
    /// Relayed by the parent frame or a same-origin peer.
    Relayed,
}

enum CheckOutcome {
    Fetched(Result<User, AuthError>),
    Relayed(Result<User, AuthError>),
}

#[derive(Default)]
struct SessionState {
    user: Option<User>,
    /// `None` = never checked.
    is_authenticated: Option<bool>,
    jwt_provider: Option<JwtProvider>,
    cached_jwt: Option<String>,
    signing_out: bool,
    initialized: bool,
    /// Why the last identity check failed, until a user is known again.
    last_error: Option<String>,
    in_flight: Option<Deferred<User, AuthError>>,
    listener: Option<JoinHandle<()>>,
}

pub struct AuthenticationSession {
    base_url: String,
    api: Arc<dyn IdentityApi>,
    bus: Arc<dyn FrameBus>,
    events: EventBus,
    ambient_user_id: Option<i64>,
    state: Mutex<SessionState>,
    when_authenticated: Deferred<User, AuthError>,
    when_authorized: Deferred<User, AuthError>,
}

impl AuthenticationSession {
    pub fn new(
        base_url: impl Into<String>,
        api: Arc<dyn IdentityApi>,
        bus: Arc<dyn FrameBus>,
        events: EventBus,
        ambient_user_id: Option<i64>,
    ) -> Arc<Self> {
        Arc::new(Self {
            base_url: base_url.into(),
            api,
            bus,
            events,
            ambient_user_id,
            state: Mutex::new(SessionState::default()),
            when_authenticated: Deferred::new(),
            when_authorized: Deferred::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn user(&self) -> Option<User> {
        self.state.lock().user.clone()
    }

    /// Tri-state: `None` until the first answer.
    pub fn is_authenticated(&self) -> Option<bool> {
        self.state.lock().is_authenticated
    }

    pub fn is_authorized(&self) -> bool {
        self.state.lock().user.as_ref().is_some_and(User::is_authorized)
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn authenticated_state(&self) -> DeferredState {
        self.when_authenticated.state()
    }

    /// Wait until any identity answer is known.
    pub async fn when_authenticated(&self) -> Result<User, AuthError> {
        wait_gate(&self.when_authenticated).await
    }

    /// Wait until a real user is signed in.
    pub async fn when_authorized(&self) -> Result<User, AuthError> {
        wait_gate(&self.when_authorized).await
    }

    // ------------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------------

    /// Idempotent start. Registers the cross-frame listener once, then:
    /// a new JWT provider re-authenticates; an existing answer is reused;
    /// otherwise JWT, then ambient user id, then a network check.
    #[tracing::instrument(skip(self, jwt), name = "auth.init", fields(url = %self.base_url))]
    pub async fn init(self: &Arc<Self>, jwt: Option<JwtProvider>) -> Result<User, AuthError> {
        self.ensure_listener();

        let (jwt_changed, has_provider, checked) = {
            let state = self.state.lock();
            let changed = jwt.as_ref().is_some_and(|j| state.jwt_provider.as_ref() != Some(j));
            (changed, state.jwt_provider.is_some(), state.is_authenticated.is_some())
        };

        if jwt_changed {
            return self.sign_in(jwt).await;
        }
        if checked {
            debug!("already checked, reusing answer");
            return self.when_authenticated().await;
        }
        if has_provider {
            return self.sign_in(None).await;
        }
        if let Some(id) = self.ambient_user_id {
            info!(user_id = id, "adopting signed-in user from page context");
            let user = User::with_id(id);
            self.process_user(user.clone(), UserSource::Local);
            return Ok(user);
        }
        self.update_user_state().await
    }

    /// Sign in with a JWT. Only the leader talks to the server; a follower
    /// hands its token to the leader and gets an explicit verdict back.
    #[tracing::instrument(skip(self, jwt), name = "auth.sign_in", fields(url = %self.base_url))]
    pub async fn sign_in(self: &Arc<Self>, jwt: Option<JwtProvider>) -> Result<User, AuthError> {
        {
            let mut state = self.state.lock();
            if let Some(jwt) = jwt {
                state.jwt_provider = Some(jwt);
                state.cached_jwt = None;
            }
            if state.jwt_provider.is_none() {
                error!("sign-in requested without a JWT provider");
                return Err(AuthError::NoJwtProvider);
            }
            abandon_in_flight(&mut state);
        }
        self.rearm_gates();
        self.events.publish(WidgetEvent::SigningIn);
        self.validate_jwt().await
    }

    /// Sign out. Always ends in the signed-out state, whatever the server
    /// says.
    #[tracing::instrument(skip(self), name = "auth.sign_out", fields(url = %self.base_url))]
    pub async fn sign_out(self: &Arc<Self>, clear_jwt: bool) -> User {
        {
            let mut state = self.state.lock();
            state.signing_out = true;
            if clear_jwt {
                state.jwt_provider = None;
                state.cached_jwt = None;
            }
            abandon_in_flight(&mut state);
        }
        self.rearm_gates();
        self.events.publish(WidgetEvent::ClearUser);
        self.bus.post_to_children(FrameMessage::ClearUser);

        if let Err(e) = self.api.sign_out().await {
            warn!("sign-out request failed, signing out locally anyway: {e}");
        }

        let user = User::signed_out();
        self.process_user(user.clone(), UserSource::Local);
        self.state.lock().signing_out = false;
        user
    }

    /// The JWT to present. Memoized; `refresh` re-invokes the provider.
    pub async fn get_jwt(&self, refresh: bool) -> Result<String, AuthError> {
        let provider = {
            let state = self.state.lock();
            if !refresh {
                if let Some(token) = &state.cached_jwt {
                    return Ok(token.clone());
                }
            }
            state.jwt_provider.clone()
        };
        let provider = provider.ok_or(AuthError::NoJwtProvider)?;
        let token = provider.fetch().await?;

        let mut state = self.state.lock();
        if state.jwt_provider.as_ref() == Some(&provider) {
            state.cached_jwt = Some(token.clone());
        }
        Ok(token)
    }

    /// Network identity check, debounced to one in flight. Concurrent
    /// callers share the outstanding answer.
    #[tracing::instrument(skip(self), name = "auth.update_user_state", fields(url = %self.base_url))]
    pub async fn update_user_state(self: &Arc<Self>) -> Result<User, AuthError> {
        let (deferred, started) = {
            let mut state = self.state.lock();
            match &state.in_flight {
                Some(d) => (d.clone(), false),
                None => {
                    let d = Deferred::new();
                    state.in_flight = Some(d.clone());
                    (d, true)
                }
            }
        };

        if started {
            self.rearm_gates();
            let this = Arc::clone(self);
            let slot = deferred.slot();
            let handle = deferred.clone();
            tokio::spawn(async move { this.run_user_check(handle, slot).await });
        } else {
            debug!("identity check already in flight");
        }

        match deferred.wait().await {
            Ok(user) => Ok(user),
            Err(DeferredError::Rejected(e)) => Err(e),
            Err(DeferredError::Abandoned) => self.when_authenticated().await,
        }
    }

    /// Stop listening to the bus.
    pub fn shutdown(&self) {
        if let Some(listener) = self.state.lock().listener.take() {
            listener.abort();
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn run_user_check(
        self: Arc<Self>,
        handle: Deferred<User, AuthError>,
        slot: DeferredSlot<User, AuthError>,
    ) {
        let outcome = if self.bus.is_leader() {
            CheckOutcome::Fetched(self.api.fetch_user().await.map_err(AuthError::from))
        } else {
            self.bus.post_to_origin(FrameMessage::RequestUser);
            trace!("asked leader for user");
            tokio::select! {
                answer = self.when_authenticated() => CheckOutcome::Relayed(answer),
                _ = self.bus.when_leader() => {
                    debug!("promoted while waiting, checking identity locally");
                    CheckOutcome::Fetched(self.api.fetch_user().await.map_err(AuthError::from))
                }
            }
        };

        if slot.is_abandoned() {
            debug!("discarding answer from superseded identity check");
            return;
        }

        match outcome {
            CheckOutcome::Fetched(Ok(user)) => {
                self.process_user(user.clone(), UserSource::Local);
                slot.resolve(user);
            }
            CheckOutcome::Fetched(Err(e)) => {
                self.fail(&e, UserSource::Local);
                slot.reject(e);
            }
            CheckOutcome::Relayed(Ok(user)) => {
                slot.resolve(user);
            }
            CheckOutcome::Relayed(Err(e)) => {
                slot.reject(e);
            }
        }

        let mut state = self.state.lock();
        if state.in_flight.as_ref().is_some_and(|d| d.ptr_eq(&handle)) {
            state.in_flight = None;
        }
    }

    /// JWT validation: one retry with a refreshed token on 401.
    async fn validate_jwt(self: &Arc<Self>) -> Result<User, AuthError> {
        let result = match self.try_jwt(false).await {
            Err(AuthError::Transport(TransportError::Unauthorized)) => {
                debug!("JWT rejected, retrying once with a refreshed token");
                self.try_jwt(true).await
            }
            other => other,
        };

        match result {
            Ok((user, source)) => {
                self.process_user(user.clone(), source);
                Ok(user)
            }
            Err(AuthError::Transport(TransportError::Unauthorized)) => {
                warn!("JWT rejected after refresh");
                let message = AuthError::JwtRejected.to_string();
                self.events.publish(WidgetEvent::AuthenticationError { message: message.clone() });
                self.events.publish(WidgetEvent::Notice { level: NoticeLevel::Error, message });
                // Settle everyone on whatever the server thinks now.
                if let Err(e) = self.update_user_state().await {
                    debug!("identity check after rejected JWT failed: {e}");
                }
                Err(AuthError::JwtRejected)
            }
            Err(e) => {
                self.fail(&e, UserSource::Local);
                Err(e)
            }
        }
    }

    async fn try_jwt(&self, refresh: bool) -> Result<(User, UserSource), AuthError> {
        let jwt = self.get_jwt(refresh).await?;
        if self.bus.is_leader() {
            let user = self.api.sign_in_jwt(&jwt).await?;
            return Ok((user, UserSource::Local));
        }
        self.ask_leader_to_sign_in(jwt).await
    }

    /// Follower side of a JWT sign-in. Subscribes before posting so the
    /// verdict cannot slip past.
    async fn ask_leader_to_sign_in(&self, jwt: String) -> Result<(User, UserSource), AuthError> {
        let mut rx = self.bus.subscribe();
        let reply_to = self.bus.name().to_string();
        self.bus.post_to_origin(FrameMessage::SignIn { jwt: jwt.clone(), reply_to });
        debug!("waiting for leader to validate JWT");

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(Envelope {
                        channel: Channel::Direct,
                        message: FrameMessage::SignInResult { outcome },
                        ..
                    }) => {
                        return match outcome {
                            SignInOutcome::Accepted { user } => Ok((user, UserSource::Relayed)),
                            SignInOutcome::Rejected => Err(TransportError::Unauthorized.into()),
                            SignInOutcome::Failed { message } => Err(AuthError::Leader(message)),
                        };
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!("{n} frame messages dropped while waiting for sign-in result");
                    }
                    Err(RecvError::Closed) => {
                        return Err(AuthError::Leader("frame closed before sign-in result".into()));
                    }
                },
                _ = self.bus.when_leader() => {
                    debug!("promoted while waiting, validating JWT locally");
                    let user = self.api.sign_in_jwt(&jwt).await?;
                    return Ok((user, UserSource::Local));
                }
            }
        }
    }

    /// Validate a follower's token. The leader keeps its own provider, and
    /// the follower decides whether to retry.
    async fn sign_in_for_follower(self: Arc<Self>, jwt: String, reply_to: String) {
        let outcome = match self.api.sign_in_jwt(&jwt).await {
            Ok(user) => {
                self.process_user(user.clone(), UserSource::Local);
                SignInOutcome::Accepted { user }
            }
            Err(TransportError::Unauthorized) => {
                debug!(follower = %reply_to, "follower JWT rejected");
                SignInOutcome::Rejected
            }
            Err(e) => {
                warn!(follower = %reply_to, "sign-in on behalf of follower failed: {e}");
                SignInOutcome::Failed { message: e.to_string() }
            }
        };
        if !self.bus.post_to_frame(&reply_to, true, FrameMessage::SignInResult { outcome }) {
            debug!(follower = %reply_to, "follower closed before sign-in result");
        }
    }

    fn rearm_gates(&self) {
        self.when_authenticated.reset();
        self.when_authorized.reset();
    }

    /// Apply a user snapshot: state first, then gates, then listeners.
    fn process_user(&self, user: User, source: UserSource) {
        let (previous, self_initiated) = {
            let mut state = self.state.lock();
            let previous = state.user.replace(user.clone());
            state.last_error = None;
            let already_known = state.is_authenticated.is_some();
            state.is_authenticated = Some(user.is_authorized());
            if source == UserSource::Relayed && already_known && previous.as_ref() == Some(&user) {
                drop(state);
                trace!("relayed user unchanged");
                settle(&self.when_authenticated, Ok(user.clone()));
                if user.is_authorized() {
                    settle(&self.when_authorized, Ok(user));
                }
                return;
            }
            (previous, state.signing_out)
        };

        let transition = UserTransition::between(previous.as_ref(), &user);
        let authorized = user.is_authorized();
        debug!(state = %transition, authorized, "user processed");

        settle(&self.when_authenticated, Ok(user.clone()));
        if authorized {
            settle(&self.when_authorized, Ok(user.clone()));
        } else if self.when_authorized.state() != DeferredState::Pending {
            self.when_authorized.reset();
        }

        self.events.publish(WidgetEvent::User {
            state: transition,
            authorized,
            user: user.clone(),
        });
        match transition {
            UserTransition::SignedIn => {
                self.events.publish(WidgetEvent::SignedIn { user: user.clone() });
            }
            UserTransition::ChangedUser => {
                self.events.publish(WidgetEvent::SignedIn { user: user.clone() });
                self.events.publish(WidgetEvent::Notice {
                    level: NoticeLevel::Warning,
                    message: "You have been signed in as another user".into(),
                });
            }
            UserTransition::SignedOut => {
                self.events.publish(WidgetEvent::SignedOut);
                if !self_initiated {
                    self.events.publish(WidgetEvent::Notice {
                        level: NoticeLevel::Info,
                        message: "You have been signed out".into(),
                    });
                }
            }
            UserTransition::Updated => {}
        }

        self.bus.post_to_children(FrameMessage::User { user: user.clone() });
        if source == UserSource::Local {
            self.bus.post_to_origin(FrameMessage::User { user });
        }
    }

    /// The identity answer is unknown: distinct from signed out. Children
    /// always hear about it; same-origin peers only from the leader.
    fn fail(&self, error: &AuthError, source: UserSource) {
        let cause = match error {
            AuthError::Leader(cause) => cause.clone(),
            other => other.to_string(),
        };
        let repeated = {
            let mut state = self.state.lock();
            let repeated = source == UserSource::Relayed
                && state.last_error.as_deref() == Some(cause.as_str())
                && state.user.as_ref().is_some_and(User::is_unknown);
            state.user = Some(User::unknown());
            state.is_authenticated = Some(false);
            state.last_error = Some(cause.clone());
            repeated
        };
        settle(&self.when_authenticated, Err(error.clone()));
        settle(&self.when_authorized, Err(error.clone()));
        if repeated {
            trace!("relayed identity failure unchanged");
            return;
        }

        warn!("identity check failed: {error}");
        let message = error.to_string();
        self.events.publish(WidgetEvent::UserError { message: message.clone() });
        self.events.publish(WidgetEvent::Notice { level: NoticeLevel::Error, message });

        self.bus.post_to_children(FrameMessage::UserError { message: cause.clone() });
        if source == UserSource::Local && self.bus.is_leader() {
            self.bus.post_to_origin(FrameMessage::UserError { message: cause });
        }
    }

    fn ensure_listener(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.initialized {
            return;
        }
        state.initialized = true;

        let mut rx = self.bus.subscribe();
        let weak: Weak<Self> = Arc::downgrade(self);
        state.listener = Some(tokio::spawn(async move {
            loop {
                let envelope = match rx.recv().await {
                    Ok(envelope) => envelope,
                    Err(RecvError::Lagged(n)) => {
                        warn!("auth listener lagged, {n} frame messages dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(session) = weak.upgrade() else { break };
                session.handle_envelope(envelope);
            }
            trace!("auth listener stopped");
        }));
    }

    fn handle_envelope(self: &Arc<Self>, envelope: Envelope) {
        let Envelope { channel, message, .. } = envelope;
        match message {
            FrameMessage::User { .. } if channel == Channel::FromChild => {
                trace!("ignoring user from child frame");
            }
            FrameMessage::User { user } => self.process_user(user, UserSource::Relayed),
            FrameMessage::UserError { message }
                if channel == Channel::FromParent
                    || (channel == Channel::FromOrigin && !self.bus.is_leader()) =>
            {
                self.fail(&AuthError::Leader(message), UserSource::Relayed);
            }
            FrameMessage::RequestUser if self.bus.is_leader() => self.answer_user_request(),
            FrameMessage::SignIn { jwt, reply_to } if self.bus.is_leader() => {
                tokio::spawn(Arc::clone(self).sign_in_for_follower(jwt, reply_to));
            }
            FrameMessage::ClearUser if channel != Channel::FromChild => {
                self.events.publish(WidgetEvent::ClearUser);
                self.bus.post_to_children(FrameMessage::ClearUser);
            }
            _ => {}
        }
    }

    fn answer_user_request(self: &Arc<Self>) {
        let (known, last_error) = {
            let state = self.state.lock();
            (state.is_authenticated.and(state.user.clone()), state.last_error.clone())
        };
        match (known, last_error) {
            (Some(_), Some(message)) => {
                trace!("answering user request with last failure");
                self.bus.post_to_origin(FrameMessage::UserError { message });
            }
            (Some(user), None) => {
                trace!("answering user request");
                self.bus.post_to_origin(FrameMessage::User { user });
            }
            (None, _) => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = this.update_user_state().await {
                        debug!("identity check for follower failed: {e}");
                    }
                });
            }
        }
    }
}

impl Drop for AuthenticationSession {
    fn drop(&mut self) {
        if let Some(listener) = self.state.get_mut().listener.take() {
            listener.abort();
        }
    }
}

fn abandon_in_flight(state: &mut SessionState) {
    if let Some(in_flight) = state.in_flight.take() {
        in_flight.reset();
    }
}

/// Settle the gate's current generation, re-arming first if it is already
/// settled so a newer answer replaces an older one.
fn settle(gate: &Deferred<User, AuthError>, result: Result<User, AuthError>) {
    if gate.state() != DeferredState::Pending {
        gate.reset();
    }
    match result {
        Ok(user) => gate.resolve(user),
        Err(e) => gate.reject(e),
    };
}

async fn wait_gate(gate: &Deferred<User, AuthError>) -> Result<User, AuthError> {
    loop {
        match gate.wait().await {
            Ok(user) => return Ok(user),
            Err(DeferredError::Rejected(e)) => return Err(e),
            Err(DeferredError::Abandoned) => continue,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

type SessionFactory = dyn Fn(&str) -> Arc<AuthenticationSession> + Send + Sync;

/// One session per base URL, owned by the composition root.
pub struct AuthRegistry {
    sessions: DashMap<String, Arc<AuthenticationSession>>,
    default_url: String,
    factory: Box<SessionFactory>,
}

impl AuthRegistry {
    pub fn new<F>(default_url: &str, factory: F) -> Self
    where
        F: Fn(&str) -> Arc<AuthenticationSession> + Send + Sync + 'static,
    {
        Self {
            sessions: DashMap::new(),
            default_url: normalize_url(default_url),
            factory: Box::new(factory),
        }
    }

    /// The session for `url`, created on first use.
    pub fn get(&self, url: &str) -> Arc<AuthenticationSession> {
        let key = normalize_url(url);
        if let Some(existing) = self.sessions.get(&key) {
            return Arc::clone(existing.value());
        }
        let created = (self.factory)(&key);
        Arc::clone(self.sessions.entry(key).or_insert(created).value())
    }

    pub fn get_default(&self) -> Arc<AuthenticationSession> {
        self.get(&self.default_url)
    }

    /// Drop the session for `url` and detach its listeners.
    pub fn remove(&self, url: &str) -> Option<Arc<AuthenticationSession>> {
        let (_, session) = self.sessions.remove(&normalize_url(url))?;
        session.shutdown();
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

// ============================================================================
// Tests
// ============================================================================
