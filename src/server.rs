//!
//! portal HTTP server
//! ------------------
//! Axum-based profile endpoint for callers outside the terminal front end.
//!
//! Responsibilities:
//! - Resolve the `Authorization: Bearer` token to an identity before any table is touched.
//! - GET returns the caller's profile (or null); PUT applies a partial update.
//! - Permissive CORS on every response, including the `OPTIONS` preflight.
//! - Convert every failure, panics included, into a JSON `{"error": ...}` body.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{extract::State, Json, Router};
use futures_util::FutureExt; // for catch_unwind on async blocks
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::data::DataClient;
use crate::error::AppError;
use crate::identity::RequestContext;
use crate::profile::{ProfileAccess, ProfileUpdate};

pub const PROFILE_API_PATH: &str = "/profile-api";
/// Path the endpoint had when deployed as a hosted edge function.
pub const FUNCTIONS_PROFILE_API_PATH: &str = "/functions/v1/profile-api";

const CORS_ALLOW_ORIGIN: &str = "*";
const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const CORS_ALLOW_HEADERS: &str = "Content-Type, Authorization, X-Client-Info, Apikey";

/// Shared server state injected into all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Anonymous client; each request derives a client scoped to its bearer token.
    pub client: DataClient,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "portal ok" }))
        .route(PROFILE_API_PATH, any(profile_api))
        .route(FUNCTIONS_PROFILE_API_PATH, any(profile_api))
        .with_state(state)
}

/// Start the profile endpoint on the given port and serve until the process exits.
pub async fn run_with_port(http_port: u16, client: DataClient) -> anyhow::Result<()> {
    let app = router(AppState { client });
    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!(target: "startup", "Starting profile endpoint on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn with_cors(mut resp: Response) -> Response {
    let h = resp.headers_mut();
    h.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static(CORS_ALLOW_ORIGIN));
    h.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(CORS_ALLOW_METHODS));
    h.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(CORS_ALLOW_HEADERS));
    resp
}

fn json_response(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    json_response(status, json!({"error": message}))
}

/// Statuses this endpoint promises: 401 for identity problems, 500 for faults,
/// 400 for anything the store or validation rejected.
fn endpoint_status(err: &AppError) -> StatusCode {
    match err {
        AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        AppError::Network { .. } | AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn failure(err: &AppError) -> Response {
    let status = endpoint_status(err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(target: "profile_api", "request failed: {}", err);
        return error_response(status, "Internal server error");
    }
    error_response(status, err.message())
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

async fn profile_api(State(state): State<AppState>, method: Method, headers: HeaderMap, body: Bytes) -> Response {
    if method == Method::OPTIONS {
        return with_cors(StatusCode::OK.into_response());
    }
    let fut = handle(state, method, headers, body);
    let resp = match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(resp) => resp,
        Err(panic_payload) => {
            // Convert panics to a 500 error response without crashing the server task
            let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() { *s }
                      else if let Some(s) = panic_payload.downcast_ref::<String>() { s.as_str() }
                      else { "panic" };
            error!(target: "panic", "profile_api panic: {}", msg);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    };
    with_cors(resp)
}

async fn handle(state: AppState, method: Method, headers: HeaderMap, body: Bytes) -> Response {
    let mut ctx = RequestContext::new(method.as_str());
    let Some(token) = bearer_token(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    };
    let client = state.client.with_token(token);
    let identity = match client.get_user(token).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(target: "profile_api", request = %ctx.request_id, "token rejected: {}", e);
            return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
        }
    };
    ctx.identity = Some(identity.clone());
    let profiles = ProfileAccess::new(client);

    let resp = match method {
        Method::GET => match profiles.get_current_profile(&identity).await {
            Ok(profile) => json_response(StatusCode::OK, json!({"profile": profile})),
            Err(e) => failure(&e),
        },
        Method::PUT => {
            let update: ProfileUpdate = match serde_json::from_slice(&body) {
                Ok(u) => u,
                Err(e) => return error_response(StatusCode::BAD_REQUEST, &format!("invalid profile update: {}", e)),
            };
            match profiles.update_profile(&identity, update).await {
                Ok(profile) => json_response(
                    StatusCode::OK,
                    json!({"message": "Profile updated successfully", "profile": profile}),
                ),
                Err(e) => failure(&e),
            }
        }
        _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
    };
    info!(
        target: "profile_api",
        request = %ctx.request_id, method = %ctx.method, user = %ctx.user_label(), status = resp.status().as_u16(),
        "handled"
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(auth: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        h
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token(&headers_with("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("bearer   abc ")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("Basic abc")), None);
        assert_eq!(bearer_token(&headers_with("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn status_narrowing() {
        assert_eq!(endpoint_status(&AppError::unauthorized("u", "u")), StatusCode::UNAUTHORIZED);
        assert_eq!(endpoint_status(&AppError::validation("v", "v")), StatusCode::BAD_REQUEST);
        assert_eq!(endpoint_status(&AppError::not_found("n", "n")), StatusCode::BAD_REQUEST);
        assert_eq!(endpoint_status(&AppError::remote("r", "r")), StatusCode::BAD_REQUEST);
        assert_eq!(endpoint_status(&AppError::network("x", "x")), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
