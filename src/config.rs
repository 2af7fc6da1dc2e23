//! Process configuration read from the environment, with CLI flag overrides
//! applied by the binaries.

use std::env;
use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

pub const DEFAULT_HTTP_PORT: u16 = 8787;
pub const DEFAULT_SESSION_FILE: &str = ".portal_session.json";
/// Value of `PORTAL_DATA_URL` that selects the in-process backend.
pub const MEMORY_DATA_URL: &str = "memory";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// Hosted REST service at the given base URL.
    Remote { url: String, api_key: String },
    /// In-process store seeded with demo events.
    Memory,
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub data: DataSource,
    pub http_port: u16,
    pub session_file: PathBuf,
}

fn var(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| env::var(k).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

pub fn parse_port(key: &'static str, raw: &str) -> Result<u16, ConfigError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid { key, value: raw.to_string() })
}

impl PortalConfig {
    /// Load from `PORTAL_*` variables, falling back to the hosted service's
    /// conventional `SUPABASE_URL` / `SUPABASE_ANON_KEY` names.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = var(&["PORTAL_DATA_URL", "SUPABASE_URL"]);
        let key = var(&["PORTAL_API_KEY", "SUPABASE_ANON_KEY"]);
        let data = Self::data_source(url, key)?;
        let http_port = match var(&["PORTAL_HTTP_PORT"]) {
            Some(raw) => parse_port("PORTAL_HTTP_PORT", &raw)?,
            None => DEFAULT_HTTP_PORT,
        };
        let session_file = var(&["PORTAL_SESSION_FILE"])
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE));
        Ok(Self { data, http_port, session_file })
    }

    pub fn data_source(url: Option<String>, api_key: Option<String>) -> Result<DataSource, ConfigError> {
        let Some(url) = url else { return Err(ConfigError::Missing("PORTAL_DATA_URL")); };
        if url.eq_ignore_ascii_case(MEMORY_DATA_URL) {
            return Ok(DataSource::Memory);
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid { key: "PORTAL_DATA_URL", value: url });
        }
        let Some(api_key) = api_key else { return Err(ConfigError::Missing("PORTAL_API_KEY")); };
        Ok(DataSource::Remote { url: url.trim_end_matches('/').to_string(), api_key })
    }

    pub fn log_summary(&self) {
        let data = match &self.data {
            DataSource::Remote { url, .. } => url.as_str(),
            DataSource::Memory => MEMORY_DATA_URL,
        };
        info!(
            target: "startup",
            "portal configuration: data={}, http_port={}, session_file={:?}",
            data, self.http_port, self.session_file
        );
    }
}
