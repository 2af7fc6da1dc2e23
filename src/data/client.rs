use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::backend::{AuthSession, Backend};
use super::memory::MemoryBackend;
use super::query::{Filter, Order, Query};
use super::rest::RestBackend;
use crate::config::DataSource;
use crate::error::{AppError, AppResult};
use crate::identity::Identity;

/// Handle to the data service, optionally acting as one authenticated user.
///
/// Cloning is cheap; `with_token` yields a client scoped to another caller
/// while sharing the same backend.
#[derive(Clone)]
pub struct DataClient {
    backend: Arc<dyn Backend>,
    token: Option<String>,
}

impl std::fmt::Debug for DataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataClient")
            .field("backend", &self.backend.name())
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl DataClient {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend, token: None }
    }

    /// Build a client for the configured data source.
    pub fn connect(source: &DataSource) -> AppResult<Self> {
        match source {
            DataSource::Remote { url, api_key } => Ok(Self::new(Arc::new(RestBackend::new(url, api_key)?))),
            DataSource::Memory => Ok(Self::new(Arc::new(MemoryBackend::with_demo_events()))),
        }
    }

    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self { backend: self.backend.clone(), token: Some(token.into()) }
    }

    pub fn anonymous(&self) -> Self {
        Self { backend: self.backend.clone(), token: None }
    }

    pub fn access_token(&self) -> Option<&str> { self.token.as_deref() }

    pub fn backend(&self) -> &Arc<dyn Backend> { &self.backend }

    pub fn table(&self, table: &str) -> TableQuery<'_> {
        TableQuery { client: self, query: Query::new(table) }
    }

    pub async fn sign_up(&self, email: &str, password: &str, metadata: &Value) -> AppResult<AuthSession> {
        self.backend.sign_up(email, password, metadata).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        self.backend.sign_in(email, password).await
    }

    pub async fn sign_out(&self, token: &str) -> AppResult<()> {
        self.backend.sign_out(token).await
    }

    /// Resolve an access token to the identity it was issued for.
    pub async fn get_user(&self, token: &str) -> AppResult<Identity> {
        self.backend.get_user(token).await
    }
}

/// Builder for a single table call.
pub struct TableQuery<'a> {
    client: &'a DataClient,
    query: Query,
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> AppResult<Vec<T>> {
    rows.into_iter()
        .map(|r| serde_json::from_value(r).map_err(AppError::from))
        .collect()
}

impl<'a> TableQuery<'a> {
    pub fn select(mut self, columns: &str) -> Self {
        self.query.columns = columns.to_string();
        self
    }

    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.query.filters.push(Filter::eq(column, value));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.query.order = Some(Order { column: column.to_string(), ascending });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.query.limit = Some(n);
        self
    }

    pub fn query(&self) -> &Query { &self.query }

    pub async fn fetch_raw(self) -> AppResult<Vec<Value>> {
        debug!(target: "data", table = %self.query.table, filters = self.query.filters.len(), "select");
        self.client.backend.select(self.client.access_token(), &self.query).await
    }

    pub async fn fetch<T: DeserializeOwned>(self) -> AppResult<Vec<T>> {
        decode_rows(self.fetch_raw().await?)
    }

    /// Zero rows is `Ok(None)`; more than one is an error.
    pub async fn maybe_single<T: DeserializeOwned>(self) -> AppResult<Option<T>> {
        let table = self.query.table.clone();
        let mut rows = self.fetch_raw().await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(Some(serde_json::from_value(rows.remove(0))?)),
            n => Err(AppError::remote(
                "PGRST116".to_string(),
                format!("expected at most one row from {}, got {}", table, n),
            )),
        }
    }

    pub async fn insert<T: DeserializeOwned>(self, row: &impl Serialize) -> AppResult<Vec<T>> {
        let row = serde_json::to_value(row)
            .map_err(|e| AppError::validation("encode_error".to_string(), e.to_string()))?;
        debug!(target: "data", table = %self.query.table, "insert");
        let rows = self.client.backend.insert(self.client.access_token(), &self.query.table, &row).await?;
        decode_rows(rows)
    }

    /// Update every row matching the filters that the caller may write.
    pub async fn update<T: DeserializeOwned>(self, patch: &impl Serialize) -> AppResult<Vec<T>> {
        let patch = serde_json::to_value(patch)
            .map_err(|e| AppError::validation("encode_error".to_string(), e.to_string()))?;
        debug!(target: "data", table = %self.query.table, filters = self.query.filters.len(), "update");
        let rows = self.client.backend.update(self.client.access_token(), &self.query, &patch).await?;
        decode_rows(rows)
    }
}
