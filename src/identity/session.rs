use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use super::credentials::{validate_email, validate_password};
use super::principal::Identity;
use super::store::{PersistedSession, SessionStore};
use crate::data::DataClient;
use crate::error::{AppError, AppResult};
use crate::profile::ProfileAccess;
use crate::tprintln;

/// Snapshot published to subscribers on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub loading: bool,
}

impl Default for SessionState {
    fn default() -> Self { Self { identity: None, loading: true } }
}

struct SessionInner {
    client: DataClient,
    store: Arc<dyn SessionStore>,
    token: RwLock<Option<String>>,
    state: watch::Sender<SessionState>,
}

/// Current identity of this process and the transitions between signed-out
/// and signed-in. Clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Starts in the loading state until `initialize` has run.
    pub fn new(client: DataClient, store: Arc<dyn SessionStore>) -> Self {
        let (state, _rx) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(SessionInner { client: client.anonymous(), store, token: RwLock::new(None), state }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> { self.inner.state.subscribe() }

    pub fn state(&self) -> SessionState { self.inner.state.borrow().clone() }

    pub fn identity(&self) -> Option<Identity> { self.inner.state.borrow().identity.clone() }

    pub fn is_loading(&self) -> bool { self.inner.state.borrow().loading }

    /// Data client acting as the current identity, or anonymous when signed out.
    pub fn client(&self) -> DataClient {
        match self.inner.token.read().as_deref() {
            Some(t) => self.inner.client.with_token(t),
            None => self.inner.client.anonymous(),
        }
    }

    fn publish(&self, identity: Option<Identity>, loading: bool) {
        tprintln!("session.publish user={:?} loading={}", identity.as_ref().map(|i| i.id), loading);
        self.inner.state.send_replace(SessionState { identity, loading });
    }

    fn set_loading(&self) {
        let current = self.identity();
        self.publish(current, true);
    }

    fn adopt(&self, token: String, identity: Identity) {
        if let Err(e) = self.inner.store.save(&PersistedSession::new(token.clone())) {
            warn!(target: "session", "could not persist session: {}", e);
        }
        *self.inner.token.write() = Some(token);
        self.publish(Some(identity), false);
    }

    fn drop_session(&self) {
        *self.inner.token.write() = None;
        if let Err(e) = self.inner.store.clear() {
            warn!(target: "session", "could not clear persisted session: {}", e);
        }
        self.publish(None, false);
    }

    /// Restore a persisted session. Always ends with loading cleared.
    pub async fn initialize(&self) -> Option<Identity> {
        self.set_loading();
        let Some(saved) = self.inner.store.load() else {
            self.publish(None, false);
            return None;
        };
        match self.inner.client.get_user(&saved.access_token).await {
            Ok(identity) => {
                info!(target: "session", user = %identity.id, "restored session");
                *self.inner.token.write() = Some(saved.access_token);
                self.publish(Some(identity.clone()), false);
                Some(identity)
            }
            Err(e) => {
                warn!(target: "session", "persisted session rejected: {}", e);
                if e.is_transient() {
                    // keep the token for the next start; we just could not check it
                    *self.inner.token.write() = None;
                    self.publish(None, false);
                } else {
                    self.drop_session();
                }
                None
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<Identity> {
        self.set_loading();
        let result = self.inner.client.sign_in(email.trim(), password).await;
        match result {
            Ok(auth) => {
                let Some(token) = auth.access_token else {
                    self.publish(None, false);
                    return Err(AppError::unauthorized("missing_token", "auth service issued no session"));
                };
                let identity = auth.identity;
                self.adopt(token, identity.clone());
                self.ensure_profile(&identity).await;
                info!(target: "session", user = %identity.id, "signed in");
                Ok(identity)
            }
            Err(e) => {
                let current = self.identity();
                self.publish(current, false);
                Err(e)
            }
        }
    }

    /// Create the account and its profile row.
    pub async fn sign_up(&self, email: &str, password: &str, full_name: &str) -> AppResult<Identity> {
        let email = email.trim();
        let full_name = full_name.trim();
        validate_email(email)?;
        validate_password(password)?;
        if full_name.is_empty() {
            return Err(AppError::validation("invalid_full_name", "full name is required"));
        }

        self.set_loading();
        let auth = match self.inner.client.sign_up(email, password, &json!({"full_name": full_name})).await {
            Ok(a) => a,
            Err(e) => {
                let current = self.identity();
                self.publish(current, false);
                return Err(e);
            }
        };
        let identity = auth.identity;
        let Some(token) = auth.access_token else {
            // the profile is created on first sign-in once the address is confirmed
            self.publish(None, false);
            return Err(AppError::unauthorized(
                "email_confirmation_required",
                "account created; confirm the e-mail address, then sign in",
            ));
        };

        // The identity is only adopted once its profile row exists.
        let profiles = ProfileAccess::new(self.inner.client.with_token(token.as_str()));
        match profiles.create_profile(&identity, full_name).await {
            Ok(_) | Err(AppError::Conflict { .. }) => {}
            Err(e) => {
                warn!(target: "session", user = %identity.id, "profile creation failed: {}", e);
                if let Err(out) = self.inner.client.sign_out(&token).await {
                    warn!(target: "session", "could not revoke sign-up session: {}", out);
                }
                let current = self.identity();
                self.publish(current, false);
                return Err(e);
            }
        }
        self.adopt(token, identity.clone());
        info!(target: "session", user = %identity.id, "signed up");
        Ok(identity)
    }

    /// Forget the session locally even if the auth service cannot be reached.
    pub async fn sign_out(&self) -> AppResult<()> {
        let token = self.inner.token.read().clone();
        self.set_loading();
        let remote = match token {
            Some(t) => self.inner.client.sign_out(&t).await,
            None => Ok(()),
        };
        self.drop_session();
        info!(target: "session", "signed out");
        match remote {
            Ok(()) | Err(AppError::Unauthorized { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Identities confirmed by e-mail reach us without a profile row; create it
    /// from the name given at sign-up.
    async fn ensure_profile(&self, identity: &Identity) {
        let profiles = ProfileAccess::new(self.client());
        match profiles.get_current_profile(identity).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                let name = identity.full_name().map(str::to_string).unwrap_or_else(|| {
                    identity.email.split('@').next().unwrap_or_default().to_string()
                });
                match profiles.create_profile(identity, &name).await {
                    Ok(_) | Err(AppError::Conflict { .. }) => {}
                    Err(e) => warn!(target: "session", user = %identity.id, "could not create missing profile: {}", e),
                }
            }
            Err(e) => warn!(target: "session", user = %identity.id, "profile check failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use crate::data::{AuthSession, Backend, MemoryBackend, Query, PROFILES};
    use crate::identity::{FileSessionStore, MemorySessionStore};

    fn manager(b: &Arc<MemoryBackend>) -> (SessionManager, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        (SessionManager::new(DataClient::new(b.clone()), store.clone()), store)
    }

    #[tokio::test]
    async fn starts_loading_and_initialize_clears_it() {
        let b = Arc::new(MemoryBackend::new());
        let (sm, _) = manager(&b);
        assert!(sm.is_loading());
        assert_eq!(sm.initialize().await, None);
        assert_eq!(sm.state(), SessionState { identity: None, loading: false });
    }

    #[tokio::test]
    async fn sign_up_creates_matching_profile() {
        let b = Arc::new(MemoryBackend::new());
        let (sm, store) = manager(&b);
        sm.initialize().await;
        let me = sm.sign_up("a@x.com", "secret1", "Ada").await.unwrap();
        assert_eq!(sm.identity(), Some(me.clone()));
        assert!(store.load().is_some());

        let profile = ProfileAccess::new(sm.client()).get_current_profile(&me).await.unwrap().unwrap();
        assert_eq!(profile.email, "a@x.com");
        assert_eq!(profile.full_name, "Ada");
        assert_eq!(profile.phone, None);
        assert_eq!(b.dump(PROFILES).len(), 1);
    }

    /// Memory store whose `profiles` table refuses every insert.
    struct RejectingProfiles(MemoryBackend);

    #[async_trait::async_trait]
    impl Backend for RejectingProfiles {
        fn name(&self) -> &'static str { "rejecting-profiles" }
        async fn select(&self, token: Option<&str>, query: &Query) -> AppResult<Vec<Value>> {
            self.0.select(token, query).await
        }
        async fn insert(&self, token: Option<&str>, table: &str, row: &Value) -> AppResult<Vec<Value>> {
            if table == PROFILES {
                return Err(AppError::remote("XX000", "profiles insert rejected"));
            }
            self.0.insert(token, table, row).await
        }
        async fn update(&self, token: Option<&str>, query: &Query, patch: &Value) -> AppResult<Vec<Value>> {
            self.0.update(token, query, patch).await
        }
        async fn sign_up(&self, email: &str, password: &str, metadata: &Value) -> AppResult<AuthSession> {
            self.0.sign_up(email, password, metadata).await
        }
        async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession> {
            self.0.sign_in(email, password).await
        }
        async fn sign_out(&self, token: &str) -> AppResult<()> { self.0.sign_out(token).await }
        async fn get_user(&self, token: &str) -> AppResult<Identity> { self.0.get_user(token).await }
    }

    #[tokio::test]
    async fn failed_profile_insert_leaves_sign_up_signed_out() {
        let b = Arc::new(RejectingProfiles(MemoryBackend::new()));
        let store = Arc::new(MemorySessionStore::new());
        let sm = SessionManager::new(DataClient::new(b.clone()), store.clone());
        sm.initialize().await;
        let mut rx = sm.subscribe();

        let err = sm.sign_up("a@x.com", "secret1", "Ada").await.unwrap_err();
        assert_eq!(err.code_str(), "XX000");
        assert_eq!(sm.identity(), None);
        assert!(!sm.is_loading());
        assert!(store.load().is_none());
        assert!(sm.client().access_token().is_none());
        assert_eq!(rx.borrow_and_update().identity, None);
    }

    #[tokio::test]
    async fn sign_up_validates_before_calling_out() {
        let b = Arc::new(MemoryBackend::new());
        let (sm, _) = manager(&b);
        assert!(matches!(sm.sign_up("bad", "secret1", "Ada").await, Err(AppError::Validation { .. })));
        assert!(matches!(sm.sign_up("a@x.com", "123", "Ada").await, Err(AppError::Validation { .. })));
        assert!(matches!(sm.sign_up("a@x.com", "secret1", " ").await, Err(AppError::Validation { .. })));
        assert!(b.sign_in("a@x.com", "secret1").await.is_err());
    }

    #[tokio::test]
    async fn subscribers_see_every_transition() {
        let b = Arc::new(MemoryBackend::new());
        let (sm, _) = manager(&b);
        let mut rx = sm.subscribe();
        sm.initialize().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().identity, None);

        let me = sm.sign_up("a@x.com", "secret1", "Ada").await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().identity.as_ref().map(|i| i.id), Some(me.id));

        sm.sign_out().await.unwrap();
        let st = rx.borrow_and_update().clone();
        assert_eq!(st, SessionState { identity: None, loading: false });
    }

    #[tokio::test]
    async fn failed_sign_in_clears_loading_and_stays_signed_out() {
        let b = Arc::new(MemoryBackend::new());
        let (sm, store) = manager(&b);
        sm.initialize().await;
        let err = sm.sign_in("nobody@x.com", "whatever").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized { .. }));
        assert!(!sm.is_loading());
        assert_eq!(sm.identity(), None);
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn sign_in_repairs_missing_profile() {
        let b = Arc::new(MemoryBackend::new());
        b.sign_up("c@x.com", "secret1", &json!({"full_name": "Cy"})).await.unwrap();
        let (sm, _) = manager(&b);
        let me = sm.sign_in("c@x.com", "secret1").await.unwrap();
        let p = ProfileAccess::new(sm.client()).get_current_profile(&me).await.unwrap().unwrap();
        assert_eq!(p.full_name, "Cy");
    }

    #[tokio::test]
    async fn persisted_session_restores_across_managers() {
        let b = Arc::new(MemoryBackend::new());
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("session.json");

        let first = SessionManager::new(DataClient::new(b.clone()), Arc::new(FileSessionStore::new(&path)));
        first.initialize().await;
        let me = first.sign_up("a@x.com", "secret1", "Ada").await.unwrap();

        let second = SessionManager::new(DataClient::new(b.clone()), Arc::new(FileSessionStore::new(&path)));
        assert_eq!(second.initialize().await.map(|i| i.id), Some(me.id));
        assert!(second.client().access_token().is_some());

        second.sign_out().await.unwrap();
        assert!(!path.exists());

        let third = SessionManager::new(DataClient::new(b.clone()), Arc::new(FileSessionStore::new(&path)));
        assert_eq!(third.initialize().await, None);
    }

    #[tokio::test]
    async fn revoked_persisted_token_is_discarded() {
        let b = Arc::new(MemoryBackend::new());
        let (sm, store) = manager(&b);
        store.save(&PersistedSession::new("stale-token")).unwrap();
        assert_eq!(sm.initialize().await, None);
        assert!(store.load().is_none());
        assert!(!sm.is_loading());
    }
}
