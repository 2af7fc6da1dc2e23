use async_trait::async_trait;
use serde_json::Value;

use super::query::Query;
use crate::error::AppResult;
use crate::identity::Identity;

/// Result of a sign-in or sign-up against the auth service.
///
/// `access_token` is absent when the service created the account but wants
/// the e-mail address confirmed before issuing a session.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub access_token: Option<String>,
    pub identity: Identity,
}

/// Everything the portal needs from the hosted service.
///
/// `token` is the caller's access token; `None` means the anonymous role.
/// Row-level authorization is the backend's job, not the caller's.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn select(&self, token: Option<&str>, query: &Query) -> AppResult<Vec<Value>>;
    async fn insert(&self, token: Option<&str>, table: &str, row: &Value) -> AppResult<Vec<Value>>;
    async fn update(&self, token: Option<&str>, query: &Query, patch: &Value) -> AppResult<Vec<Value>>;

    async fn sign_up(&self, email: &str, password: &str, metadata: &Value) -> AppResult<AuthSession>;
    async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession>;
    async fn sign_out(&self, token: &str) -> AppResult<()>;
    async fn get_user(&self, token: &str) -> AppResult<Identity>;
}
