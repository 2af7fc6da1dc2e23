use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, Url};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::backend::{AuthSession, Backend};
use super::query::Query;
use crate::error::{AppError, AppResult};
use crate::identity::Identity;

/// Client for the hosted service's REST (`/rest/v1`) and auth (`/auth/v1`) APIs.
pub struct RestBackend {
    base: Url,
    api_key: String,
    client: reqwest::Client,
}

impl RestBackend {
    pub fn new(base: &str, api_key: &str) -> AppResult<Self> {
        let normalized = format!("{}/", base.trim_end_matches('/'));
        let base = Url::parse(&normalized)
            .map_err(|e| AppError::validation("invalid_url".to_string(), format!("{}: {}", base, e)))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::internal("http_client".to_string(), e.to_string()))?;
        Ok(Self { base, api_key: api_key.to_string(), client })
    }

    pub fn base_url(&self) -> &Url { &self.base }

    fn url(&self, path: &str) -> AppResult<Url> {
        self.base
            .join(path)
            .map_err(|e| AppError::validation("invalid_url".to_string(), e.to_string()))
    }

    fn request(&self, method: Method, url: Url, token: Option<&str>) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(token.unwrap_or(&self.api_key))
    }

    fn table_url(&self, table: &str) -> AppResult<Url> {
        self.url(&format!("rest/v1/{}", table))
    }
}

/// Turn a non-success response into an `AppError`, passing the service's message through.
async fn remote_error(resp: Response) -> AppError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
    let message = ["message", "error_description", "msg", "error"]
        .iter()
        .find_map(|k| body.get(*k).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text.clone()
            }
        });
    let code = ["code", "error_code"]
        .iter()
        .find_map(|k| body.get(*k).and_then(|v| v.as_str()));
    AppError::from_remote_status(status.as_u16(), code, message)
}

async fn read_rows(resp: Response) -> AppResult<Vec<Value>> {
    if !resp.status().is_success() {
        return Err(remote_error(resp).await);
    }
    let text = resp.text().await?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<Value>(&text)? {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}

fn parse_auth_session(body: Value) -> AppResult<AuthSession> {
    let access_token = body.get("access_token").and_then(|v| v.as_str()).map(str::to_string);
    let user = match body.get("user") {
        Some(u) if u.is_object() => u.clone(),
        _ => body,
    };
    let identity: Identity = serde_json::from_value(user)?;
    Ok(AuthSession { access_token, identity })
}

/// Credential and token rejections are authorization failures whatever status the
/// auth service chose for them.
fn as_auth_failure(e: AppError) -> AppError {
    match e {
        AppError::Remote { code, message } | AppError::NotFound { code, message } => {
            AppError::Unauthorized { code, message }
        }
        other => other,
    }
}

#[async_trait]
impl Backend for RestBackend {
    fn name(&self) -> &'static str { "rest" }

    async fn select(&self, token: Option<&str>, query: &Query) -> AppResult<Vec<Value>> {
        let url = self.table_url(&query.table)?;
        let resp = self
            .request(Method::GET, url, token)
            .query(&query.to_params(true))
            .send()
            .await?;
        read_rows(resp).await
    }

    async fn insert(&self, token: Option<&str>, table: &str, row: &Value) -> AppResult<Vec<Value>> {
        let url = self.table_url(table)?;
        let resp = self
            .request(Method::POST, url, token)
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;
        read_rows(resp).await
    }

    async fn update(&self, token: Option<&str>, query: &Query, patch: &Value) -> AppResult<Vec<Value>> {
        if query.filters.is_empty() {
            return Err(AppError::validation("unfiltered_update", "refusing to update without a filter"));
        }
        let url = self.table_url(&query.table)?;
        let resp = self
            .request(Method::PATCH, url, token)
            .header("Prefer", "return=representation")
            .query(&query.to_params(false))
            .json(patch)
            .send()
            .await?;
        read_rows(resp).await
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: &Value) -> AppResult<AuthSession> {
        let url = self.url("auth/v1/signup")?;
        let resp = self
            .request(Method::POST, url, None)
            .json(&json!({"email": email, "password": password, "data": metadata}))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(remote_error(resp).await);
        }
        let session = parse_auth_session(resp.json().await?)?;
        if session.access_token.is_none() {
            debug!(target: "auth", "sign-up for {} awaits e-mail confirmation", email);
        }
        Ok(session)
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        let mut url = self.url("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let resp = self
            .request(Method::POST, url, None)
            .json(&json!({"email": email, "password": password}))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(as_auth_failure(remote_error(resp).await));
        }
        let session = parse_auth_session(resp.json().await?)?;
        if session.access_token.is_none() {
            return Err(AppError::remote("missing_token", "auth service returned no access token"));
        }
        Ok(session)
    }

    async fn sign_out(&self, token: &str) -> AppResult<()> {
        let url = self.url("auth/v1/logout")?;
        let resp = self.request(Method::POST, url, Some(token)).send().await?;
        if !resp.status().is_success() {
            let e = remote_error(resp).await;
            warn!(target: "auth", "remote sign-out failed: {}", e);
            return Err(as_auth_failure(e));
        }
        Ok(())
    }

    async fn get_user(&self, token: &str) -> AppResult<Identity> {
        let url = self.url("auth/v1/user")?;
        let resp = self.request(Method::GET, url, Some(token)).send().await?;
        if !resp.status().is_success() {
            return Err(as_auth_failure(remote_error(resp).await));
        }
        Ok(resp.json::<Identity>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let b = RestBackend::new("https://abc.example.co", "k").unwrap();
        assert_eq!(b.table_url("profiles").unwrap().as_str(), "https://abc.example.co/rest/v1/profiles");
        let b = RestBackend::new("http://127.0.0.1:9999/base/", "k").unwrap();
        assert_eq!(b.url("auth/v1/user").unwrap().as_str(), "http://127.0.0.1:9999/base/auth/v1/user");
    }

    #[test]
    fn invalid_base_is_validation_error() {
        assert!(matches!(RestBackend::new("not a url", "k"), Err(AppError::Validation { .. })));
    }

    #[test]
    fn auth_session_with_and_without_token() {
        let with = parse_auth_session(json!({
            "access_token": "t",
            "user": {"id": "6f1b6f4e-3a4c-4a6e-9d65-0c1f2c3d4e5f", "email": "a@x.com"}
        }))
        .unwrap();
        assert_eq!(with.access_token.as_deref(), Some("t"));
        assert_eq!(with.identity.email, "a@x.com");

        let bare = parse_auth_session(json!({"id": "6f1b6f4e-3a4c-4a6e-9d65-0c1f2c3d4e5f", "email": "b@x.com"})).unwrap();
        assert!(bare.access_token.is_none());
        assert_eq!(bare.identity.email, "b@x.com");
    }

    #[test]
    fn auth_failures_become_unauthorized() {
        let e = as_auth_failure(AppError::remote("invalid_grant", "Invalid login credentials"));
        assert!(matches!(e, AppError::Unauthorized { .. }));
        let e = as_auth_failure(AppError::network("network_error", "down"));
        assert!(matches!(e, AppError::Network { .. }));
    }
}
