//! Session state shared between the client and the application.
//!
//! The application owns the session; the client only takes snapshots of it
//! and dispatches lifecycle events back into it.

use crate::storage::{PersistedStorage, TENANT_ID_KEY};
use arc_swap::{ArcSwap, ArcSwapOption};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Capacity of the event feed; slow subscribers observe `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Bearer token of the authenticated session.
///
/// Formatting never reveals the value. The buffer is zeroed on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read access for building the `Authorization` header. Do not log.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Snapshot of the authenticated session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub tenant_id: Option<String>,
    pub auth_token: Option<AuthToken>,
}

impl SessionContext {
    /// A session scoped to `tenant_id` with no token.
    #[must_use]
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            auth_token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: AuthToken) -> Self {
        self.auth_token = Some(token);
        self
    }

    /// The tenant id, treating an empty string as absent.
    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        self.tenant_id.as_deref().filter(|t| !t.is_empty())
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }
}

/// Lifecycle events the client dispatches into the state container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The server rejected the session; `message` is for the user.
    SessionTimeout { message: String },
    /// Drop all session state.
    StoreReset,
    /// Load the authenticated user.
    FetchCurrentUser,
    /// A login succeeded; install this session.
    SignedIn(SessionContext),
    /// The user logged out; forget the session and persisted tenant.
    SignedOut,
}

/// External state container the client reads from and dispatches into.
///
/// Implementations must tolerate the same event arriving more than once:
/// concurrent requests that all fail with 401 each dispatch a reset.
pub trait SessionStore: Send + Sync {
    /// Current session, read at request time.
    fn snapshot(&self) -> SessionContext;

    fn dispatch(&self, event: SessionEvent);
}

/// Lock-free in-process session store.
///
/// Dispatched events are applied to the store and then published on a
/// broadcast feed (see [`subscribe`](Self::subscribe)).
pub struct InMemorySessionStore {
    session: ArcSwap<SessionContext>,
    timeout_message: ArcSwapOption<String>,
    storage: Arc<dyn PersistedStorage>,
    events: broadcast::Sender<SessionEvent>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new(storage: Arc<dyn PersistedStorage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session: ArcSwap::from_pointee(SessionContext::default()),
            timeout_message: ArcSwapOption::empty(),
            storage,
            events,
        }
    }

    /// Storage the tenant id is persisted to.
    #[must_use]
    pub fn storage(&self) -> Arc<dyn PersistedStorage> {
        Arc::clone(&self.storage)
    }

    /// Install an authenticated session and persist its tenant.
    ///
    /// A storage failure is logged; the in-memory session still applies.
    pub fn establish(&self, session: SessionContext) {
        if let Some(tenant) = session.tenant()
            && let Err(e) = self.storage.set(TENANT_ID_KEY, tenant)
        {
            tracing::warn!(error = %e, "failed to persist tenant id");
        }
        self.timeout_message.store(None);
        self.session.store(Arc::new(session));
    }

    /// Forget the session and the persisted tenant.
    pub fn logout(&self) {
        self.session.store(Arc::new(SessionContext::default()));
        if let Err(e) = self.storage.remove(TENANT_ID_KEY) {
            tracing::warn!(error = %e, "failed to clear persisted tenant id");
        }
    }

    /// Message of the last session timeout, until the next login.
    #[must_use]
    pub fn timeout_message(&self) -> Option<String> {
        self.timeout_message.load_full().map(|m| (*m).clone())
    }

    /// Receive every event dispatched from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

impl fmt::Debug for InMemorySessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySessionStore")
            .field("session", &self.session.load_full())
            .field("timeout_message", &self.timeout_message.load_full())
            .finish_non_exhaustive()
    }
}

impl SessionStore for InMemorySessionStore {
    fn snapshot(&self) -> SessionContext {
        (*self.session.load_full()).clone()
    }

    fn dispatch(&self, event: SessionEvent) {
        match &event {
            SessionEvent::SessionTimeout { message } => {
                self.timeout_message.store(Some(Arc::new(message.clone())));
            }
            SessionEvent::StoreReset => {
                self.session.store(Arc::new(SessionContext::default()));
            }
            SessionEvent::SignedIn(session) => self.establish(session.clone()),
            SessionEvent::SignedOut => self.logout(),
            SessionEvent::FetchCurrentUser => {}
        }
        tracing::debug!(?event, "session event dispatched");
        // No subscribers is fine.
        _ = self.events.send(event);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn store() -> InMemorySessionStore {
        InMemorySessionStore::new(Arc::new(MemoryStorage::new()))
    }

    #[test]
    fn auth_token_is_redacted() {
        let token = AuthToken::new("secret-token");
        assert_eq!(format!("{token:?}"), "[REDACTED]");
        assert_eq!(format!("{token}"), "[REDACTED]");
        assert_eq!(token.expose(), "secret-token");
    }

    #[test]
    fn empty_tenant_counts_as_absent() {
        assert_eq!(SessionContext::for_tenant("").tenant(), None);
        assert_eq!(SessionContext::for_tenant("12").tenant(), Some("12"));
        assert_eq!(SessionContext::default().tenant(), None);
    }

    #[test]
    fn establish_persists_tenant() {
        let store = store();
        store.establish(SessionContext::for_tenant("123").with_token(AuthToken::new("t")));

        assert_eq!(store.snapshot().tenant(), Some("123"));
        assert!(store.snapshot().is_authenticated());
        assert_eq!(store.storage().get(TENANT_ID_KEY).as_deref(), Some("123"));
    }

    #[test]
    fn logout_clears_session_and_storage() {
        let store = store();
        store.establish(SessionContext::for_tenant("123"));
        store.logout();

        assert_eq!(store.snapshot(), SessionContext::default());
        assert_eq!(store.storage().get(TENANT_ID_KEY), None);
    }

    #[test]
    fn store_reset_keeps_persisted_tenant() {
        let store = store();
        store.establish(SessionContext::for_tenant("123"));
        store.dispatch(SessionEvent::StoreReset);

        assert_eq!(store.snapshot(), SessionContext::default());
        assert_eq!(store.storage().get(TENANT_ID_KEY).as_deref(), Some("123"));
    }

    #[test]
    fn repeated_reset_is_harmless() {
        let store = store();
        store.establish(SessionContext::for_tenant("9").with_token(AuthToken::new("t")));

        for _ in 0..2 {
            store.dispatch(SessionEvent::SessionTimeout {
                message: "expired".to_owned(),
            });
            store.dispatch(SessionEvent::StoreReset);
        }

        assert_eq!(store.snapshot(), SessionContext::default());
        assert_eq!(store.timeout_message().as_deref(), Some("expired"));
    }

    #[test]
    fn events_are_published() {
        let store = store();
        let mut rx = store.subscribe();

        store.dispatch(SessionEvent::FetchCurrentUser);
        store.dispatch(SessionEvent::StoreReset);

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::FetchCurrentUser);
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::StoreReset);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sign_in_and_out_events() {
        let store = store();
        store.dispatch(SessionEvent::SignedIn(
            SessionContext::for_tenant("42").with_token(AuthToken::new("t")),
        ));
        assert!(store.snapshot().is_authenticated());
        assert_eq!(store.storage().get(TENANT_ID_KEY).as_deref(), Some("42"));

        store.dispatch(SessionEvent::SignedOut);
        assert!(!store.snapshot().is_authenticated());
        assert_eq!(store.storage().get(TENANT_ID_KEY), None);
    }

    #[test]
    fn establish_clears_timeout_message() {
        let store = store();
        store.dispatch(SessionEvent::SessionTimeout {
            message: "expired".to_owned(),
        });
        store.establish(SessionContext::for_tenant("1"));
        assert_eq!(store.timeout_message(), None);
    }
}
