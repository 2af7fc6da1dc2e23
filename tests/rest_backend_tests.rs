use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use portal::data::{DataClient, RestBackend};
use portal::error::AppError;
use portal::events::{EventAccess, EventBoard, RegisterOutcome};
use portal::identity::{Identity, MemorySessionStore, SessionManager};
use portal::profile::{ProfileAccess, ProfileUpdate};

const API_KEY: &str = "anon-key";
const USER_TOKEN: &str = "user-token";

#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    path: String,
    query: String,
    apikey: Option<String>,
    authorization: Option<String>,
    prefer: Option<String>,
    body: Value,
}

#[derive(Clone)]
struct Mock {
    user_id: Uuid,
    event_id: Uuid,
    seen: Arc<Mutex<Vec<Seen>>>,
}

fn header(h: &HeaderMap, name: &str) -> Option<String> {
    h.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn user_json(m: &Mock) -> Value {
    json!({"id": m.user_id, "email": "a@x.com", "user_metadata": {"full_name": "Ada"}})
}

async fn hosted(State(m): State<Mock>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let query = uri.query().unwrap_or_default().to_string();
    m.seen.lock().push(Seen {
        method: method.clone(),
        path: uri.path().to_string(),
        query: query.clone(),
        apikey: header(&headers, "apikey"),
        authorization: header(&headers, "authorization"),
        prefer: header(&headers, "prefer"),
        body: body.clone(),
    });
    let authed = header(&headers, "authorization").as_deref() == Some("Bearer user-token");
    match (method, uri.path()) {
        (Method::POST, "/auth/v1/token") => {
            if body["password"] == "secret1" {
                Json(json!({"access_token": USER_TOKEN, "token_type": "bearer", "user": user_json(&m)})).into_response()
            } else {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "invalid_grant", "error_description": "Invalid login credentials"})),
                )
                    .into_response()
            }
        }
        (Method::POST, "/auth/v1/signup") => {
            // confirmation pending: a user object without a session
            Json(json!({"id": Uuid::new_v4(), "email": body["email"], "user_metadata": body["data"]})).into_response()
        }
        (Method::GET, "/auth/v1/user") if authed => Json(user_json(&m)).into_response(),
        (Method::GET, "/auth/v1/user") => {
            (StatusCode::UNAUTHORIZED, Json(json!({"code": 401, "msg": "invalid JWT"}))).into_response()
        }
        (Method::POST, "/auth/v1/logout") => StatusCode::NO_CONTENT.into_response(),
        (Method::GET, "/rest/v1/profiles") => Json(json!([{
            "id": m.user_id, "full_name": "Ada", "email": "a@x.com", "phone": null,
            "department": null, "year": null, "bio": null,
            "created_at": "2024-01-01T00:00:00+00:00", "updated_at": "2024-01-01T00:00:00+00:00"
        }]))
        .into_response(),
        (Method::PATCH, "/rest/v1/profiles") => {
            let mut row = json!({
                "id": m.user_id, "full_name": "Ada", "email": "a@x.com",
                "created_at": "2024-01-01T00:00:00+00:00", "updated_at": "2024-01-01T00:00:00+00:00"
            });
            if let (Some(r), Some(p)) = (row.as_object_mut(), body.as_object()) {
                for (k, v) in p {
                    r.insert(k.clone(), v.clone());
                }
            }
            Json(json!([row])).into_response()
        }
        (Method::GET, "/rest/v1/events") => Json(json!([
            {"id": m.event_id, "title": "Mixer", "event_date": "2030-03-01T18:00:00+00:00",
             "max_participants": 40, "status": "active"},
            {"id": Uuid::new_v4(), "title": "Gone", "event_date": "2030-02-01T18:00:00+00:00",
             "max_participants": 0, "status": "cancelled"}
        ]))
        .into_response(),
        (Method::GET, "/rest/v1/event_registrations") => Json(json!([])).into_response(),
        (Method::POST, "/rest/v1/event_registrations") => (
            StatusCode::CONFLICT,
            Json(json!({"code": "23505", "message": "duplicate key value violates unique constraint"})),
        )
            .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn start() -> (Mock, String) {
    let mock = Mock { user_id: Uuid::new_v4(), event_id: Uuid::new_v4(), seen: Arc::new(Mutex::new(Vec::new())) };
    let app = Router::new().fallback(hosted).with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (mock, format!("http://{}/", addr))
}

fn client(base: &str) -> DataClient {
    DataClient::new(Arc::new(RestBackend::new(base, API_KEY).unwrap()))
}

fn last(m: &Mock, path: &str) -> Seen {
    m.seen.lock().iter().rev().find(|s| s.path == path).cloned().expect("request recorded")
}

#[tokio::test]
async fn sign_in_uses_password_grant_and_api_key() {
    let (m, base) = start().await;
    let session = client(&base).sign_in("a@x.com", "secret1").await.unwrap();
    assert_eq!(session.access_token.as_deref(), Some(USER_TOKEN));
    assert_eq!(session.identity.id, m.user_id);
    assert_eq!(session.identity.full_name(), Some("Ada"));

    let seen = last(&m, "/auth/v1/token");
    assert_eq!(seen.query, "grant_type=password");
    assert_eq!(seen.apikey.as_deref(), Some(API_KEY));
    assert_eq!(seen.authorization.as_deref(), Some("Bearer anon-key"));
}

#[tokio::test]
async fn rejected_credentials_are_unauthorized() {
    let (_, base) = start().await;
    let err = client(&base).sign_in("a@x.com", "wrong").await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized { .. }), "{:?}", err);
    assert_eq!(err.message(), "Invalid login credentials");

    let err = client(&base).get_user("stale").await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized { .. }), "{:?}", err);
}

#[tokio::test]
async fn table_reads_send_filters_and_user_token() {
    let (m, base) = start().await;
    let me = Identity::new(m.user_id, "a@x.com");
    let access = EventAccess::new(client(&base).with_token(USER_TOKEN));
    let events = access.list_active_events().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].capacity(), Some(40));

    let seen = last(&m, "/rest/v1/events");
    assert!(seen.query.contains("status=eq.active"), "{}", seen.query);
    assert!(seen.query.contains("order=event_date.asc"), "{}", seen.query);
    assert_eq!(seen.authorization.as_deref(), Some("Bearer user-token"));
    assert_eq!(seen.apikey.as_deref(), Some(API_KEY));

    access.list_my_registrations(&me).await.unwrap();
    let seen = last(&m, "/rest/v1/event_registrations");
    assert!(seen.query.contains(&format!("user_id=eq.{}", m.user_id)), "{}", seen.query);
    assert!(seen.query.contains("status=eq.registered"), "{}", seen.query);
}

#[tokio::test]
async fn profile_update_patches_by_owner_id() {
    let (m, base) = start().await;
    let me = Identity::new(m.user_id, "a@x.com");
    let mut update = ProfileUpdate::default();
    update.set("department", "Physics").unwrap();
    update.set("bio", "").unwrap();
    let p = ProfileAccess::new(client(&base).with_token(USER_TOKEN)).update_profile(&me, update).await.unwrap();
    assert_eq!(p.department.as_deref(), Some("Physics"));
    assert_eq!(p.bio, None);

    let seen = last(&m, "/rest/v1/profiles");
    assert_eq!(seen.method, Method::PATCH);
    assert_eq!(seen.query, format!("id=eq.{}", m.user_id));
    assert_eq!(seen.prefer.as_deref(), Some("return=representation"));
    assert_eq!(seen.body["department"], "Physics");
    assert!(seen.body["bio"].is_null());
    assert!(seen.body.get("updated_at").is_some());
    assert!(seen.body.get("email").is_none());
}

#[tokio::test]
async fn duplicate_registration_maps_to_conflict() {
    let (m, base) = start().await;
    let me = Identity::new(m.user_id, "a@x.com");
    let access = EventAccess::new(client(&base).with_token(USER_TOKEN));
    let err = access.register(&me, m.event_id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict { .. }), "{:?}", err);

    let seen = last(&m, "/rest/v1/event_registrations");
    assert_eq!(seen.method, Method::POST);
    assert_eq!(seen.prefer.as_deref(), Some("return=representation"));
    assert_eq!(seen.body["status"], "registered");
    assert_eq!(seen.body["event_id"], json!(m.event_id));

    // the board treats the conflict as an existing registration
    let mut board = EventBoard::new(access, me);
    board.refresh().await;
    assert_eq!(board.register(m.event_id).await.unwrap(), RegisterOutcome::AlreadyRegistered);
    assert!(board.is_registered(&m.event_id));
}

#[tokio::test]
async fn sign_up_pending_confirmation_leaves_session_signed_out() {
    let (m, base) = start().await;
    let sm = SessionManager::new(client(&base), Arc::new(MemorySessionStore::new()));
    sm.initialize().await;
    let err = sm.sign_up("new@x.com", "secret1", "Nia").await.unwrap_err();
    assert_eq!(err.code_str(), "email_confirmation_required");
    assert_eq!(sm.identity(), None);
    assert!(!sm.is_loading());

    let seen = last(&m, "/auth/v1/signup");
    assert_eq!(seen.body["data"]["full_name"], "Nia");
    assert!(m.seen.lock().iter().all(|s| !s.path.starts_with("/rest/v1/profiles")));
}

#[tokio::test]
async fn sign_in_then_sign_out_round_trip_through_session() {
    let (m, base) = start().await;
    let sm = SessionManager::new(client(&base), Arc::new(MemorySessionStore::new()));
    sm.initialize().await;
    let me = sm.sign_in("a@x.com", "secret1").await.unwrap();
    assert_eq!(me.id, m.user_id);
    assert_eq!(sm.client().access_token(), Some(USER_TOKEN));

    sm.sign_out().await.unwrap();
    let seen = last(&m, "/auth/v1/logout");
    assert_eq!(seen.authorization.as_deref(), Some("Bearer user-token"));
    assert_eq!(sm.identity(), None);
}
