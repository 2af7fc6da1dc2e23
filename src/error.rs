//! Unified application error model and mapping helpers.
//! This module provides the error enum shared by the data client, the access
//! components, the session manager and the HTTP endpoint, along with the
//! mapping from hosted-service failures and to HTTP statuses.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    Unauthorized { code: String, message: String },
    NotFound { code: String, message: String },
    Validation { code: String, message: String },
    Conflict { code: String, message: String },
    Remote { code: String, message: String },
    Network { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Unauthorized { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Validation { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Remote { code, .. }
            | AppError::Network { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Unauthorized { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Validation { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Remote { message, .. }
            | AppError::Network { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn unauthorized<S: Into<String>>(code: S, msg: S) -> Self { AppError::Unauthorized { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn validation<S: Into<String>>(code: S, msg: S) -> Self { AppError::Validation { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn remote<S: Into<String>>(code: S, msg: S) -> Self { AppError::Remote { code: code.into(), message: msg.into() } }
    pub fn network<S: Into<String>>(code: S, msg: S) -> Self { AppError::Network { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Unauthorized { .. } => 401,
            AppError::NotFound { .. } => 404,
            AppError::Validation { .. } => 400,
            AppError::Conflict { .. } => 409,
            AppError::Remote { .. } => 400,
            AppError::Network { .. } => 502,
            AppError::Internal { .. } => 500,
        }
    }

    /// True for failures worth retrying later (transport faults), as opposed to
    /// rejections the store or auth service made on purpose.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Network { .. })
    }

    /// Classify a non-success response from the hosted service.
    ///
    /// `pg_code` is the SQLSTATE or auth error code carried in the body when present.
    pub fn from_remote_status(status: u16, pg_code: Option<&str>, message: String) -> Self {
        let code = pg_code.unwrap_or("remote_error").to_string();
        if pg_code == Some("23505") || status == 409 {
            return AppError::Conflict { code, message };
        }
        match status {
            401 | 403 => AppError::Unauthorized { code, message },
            404 => AppError::NotFound { code, message },
            400..=499 => AppError::Remote { code, message },
            _ => AppError::Remote { code, message: format!("HTTP {}: {}", status, message) },
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return AppError::Remote { code: "decode_error".into(), message: err.to_string() };
        }
        AppError::Network { code: "network_error".into(), message: err.to_string() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Remote { code: "decode_error".into(), message: err.to_string() }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: treat as Internal unless downcasted elsewhere
        if let Some(app) = err.downcast_ref::<AppError>() {
            return app.clone();
        }
        AppError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}
