//! In-process stand-in for the hosted service.
//!
//! Tables are JSON rows guarded by one lock. The row-level policies of the
//! hosted schema are reproduced here: profiles and registrations are visible
//! and writable only by their owner, events are read-only to authenticated
//! users, and the anonymous role sees nothing. Seeding bypasses the policies
//! the way a trusted server context would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};
use async_trait::async_trait;
use base64::Engine;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::backend::{AuthSession, Backend};
use super::query::{scalar_text, Query};
use super::{EVENTS, PROFILES, REGISTRATIONS};
use crate::error::{AppError, AppResult};
use crate::identity::Identity;
use crate::tprintln;

#[derive(Debug, Clone)]
struct UserRecord {
    identity: Identity,
    password_hash: String,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Value>>,
    /// lower-cased e-mail -> user
    users: HashMap<String, UserRecord>,
    /// access token -> user id
    tokens: HashMap<String, Uuid>,
}

pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    table_calls: AtomicUsize,
    enforce_unique_registration: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self { Self::new() }
}

fn gen_token() -> AppResult<String> {
    // 256-bit random token base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| AppError::internal("rng".to_string(), e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

fn hasher() -> Argon2<'static> {
    // Light parameters: this store holds demo and test accounts only.
    let params = Params::new(8 * 1024, 1, 1, None).unwrap_or_default();
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

fn hash_password(password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| AppError::internal("rng".to_string(), e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AppError::internal("salt".to_string(), e.to_string()))?;
    let phc = hasher()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::internal("hash".to_string(), e.to_string()))?
        .to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        hasher().verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

/// Column holding the owning user id, for tables with per-user rows.
fn owner_column(table: &str) -> Option<&'static str> {
    match table {
        PROFILES => Some("id"),
        REGISTRATIONS => Some("user_id"),
        _ => None,
    }
}

fn rls_violation(table: &str) -> AppError {
    AppError::from_remote_status(
        403,
        Some("42501"),
        format!("new row violates row-level security policy for table \"{}\"", table),
    )
}

fn invalid_jwt() -> AppError {
    AppError::unauthorized("bad_jwt", "invalid JWT: unable to parse or verify signature")
}

fn now_text() -> Value { json!(Utc::now().to_rfc3339()) }

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            table_calls: AtomicUsize::new(0),
            enforce_unique_registration: true,
        }
    }

    /// Accept duplicate active registrations, as a store without a unique
    /// constraint would.
    pub fn without_registration_constraint(mut self) -> Self {
        self.enforce_unique_registration = false;
        self
    }

    /// A store pre-populated with upcoming events, used for local runs.
    pub fn with_demo_events() -> Self {
        let backend = Self::new();
        let now = Utc::now();
        let demo = [
            ("Welcome Mixer", "Meet the committee and other members.", 3, "Student Union Hall", 0, "active"),
            ("Intro to Rust Workshop", "Hands-on session, bring a laptop.", 10, "Lab 2.14", 30, "active"),
            ("Annual General Meeting", "Elections and yearly report.", 21, "Main Auditorium", 200, "active"),
            ("Spring Hackathon", "Postponed indefinitely.", 14, "Innovation Centre", 80, "cancelled"),
            ("Orientation Day", "Done for this year.", -30, "Campus", 0, "completed"),
        ];
        for (title, description, days, location, max, status) in demo {
            backend.seed(EVENTS, json!({
                "title": title,
                "description": description,
                "event_date": (now + Duration::days(days)).to_rfc3339(),
                "location": location,
                "max_participants": max,
                "status": status,
            }));
        }
        tracing::info!(target: "startup", "memory backend seeded with {} demo events", demo.len());
        backend
    }

    /// Insert a row as a trusted context, bypassing row-level policies.
    /// Returns the stored row with defaults filled in.
    pub fn seed(&self, table: &str, row: Value) -> Value {
        let row = fill_defaults(table, row);
        self.state.write().tables.entry(table.to_string()).or_default().push(row.clone());
        row
    }

    /// All rows of a table, unfiltered.
    pub fn dump(&self, table: &str) -> Vec<Value> {
        self.state.read().tables.get(table).cloned().unwrap_or_default()
    }

    /// Number of select/insert/update calls received so far.
    pub fn table_calls(&self) -> usize { self.table_calls.load(Ordering::SeqCst) }

    fn resolve(&self, st: &MemoryState, token: Option<&str>) -> AppResult<Option<Uuid>> {
        match token {
            None => Ok(None),
            Some(t) => st.tokens.get(t).copied().map(Some).ok_or_else(invalid_jwt),
        }
    }

    fn issue_token(st: &mut MemoryState, user_id: Uuid) -> AppResult<String> {
        let token = gen_token()?;
        st.tokens.insert(token.clone(), user_id);
        tprintln!("memory.issue_token user={}", user_id);
        Ok(token)
    }
}

fn merge(row: &mut Value, patch: &Value) {
    if let (Some(dst), Some(src)) = (row.as_object_mut(), patch.as_object()) {
        for (k, v) in src {
            dst.insert(k.clone(), v.clone());
        }
    }
}

fn fill_defaults(table: &str, row: Value) -> Value {
    let mut m = match row {
        Value::Object(m) => m,
        _ => Map::new(),
    };
    m.entry("id").or_insert_with(|| json!(Uuid::new_v4().to_string()));
    match table {
        REGISTRATIONS => {
            m.entry("registered_at").or_insert_with(now_text);
            m.entry("status").or_insert_with(|| json!("registered"));
        }
        EVENTS => {
            m.entry("status").or_insert_with(|| json!("active"));
            m.entry("max_participants").or_insert_with(|| json!(0));
            m.entry("created_at").or_insert_with(now_text);
            m.entry("updated_at").or_insert_with(now_text);
        }
        _ => {
            m.entry("created_at").or_insert_with(now_text);
            m.entry("updated_at").or_insert_with(now_text);
        }
    }
    Value::Object(m)
}

fn visible(table: &str, user: Option<Uuid>, row: &Value) -> bool {
    let Some(uid) = user else { return false; };
    match owner_column(table) {
        Some(col) => row.get(col).and_then(scalar_text).as_deref() == Some(uid.to_string().as_str()),
        None => true,
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str { "memory" }

    async fn select(&self, token: Option<&str>, query: &Query) -> AppResult<Vec<Value>> {
        self.table_calls.fetch_add(1, Ordering::SeqCst);
        let st = self.state.read();
        let user = self.resolve(&st, token)?;
        let rows = st.tables.get(&query.table).map(|v| v.as_slice()).unwrap_or(&[]);
        Ok(query.apply(rows.iter().filter(|r| visible(&query.table, user, r)).cloned()))
    }

    async fn insert(&self, token: Option<&str>, table: &str, row: &Value) -> AppResult<Vec<Value>> {
        self.table_calls.fetch_add(1, Ordering::SeqCst);
        let mut st = self.state.write();
        let Some(uid) = self.resolve(&st, token)? else { return Err(rls_violation(table)); };
        let Some(col) = owner_column(table) else { return Err(rls_violation(table)); };
        if row.get(col).and_then(scalar_text) != Some(uid.to_string()) {
            return Err(rls_violation(table));
        }
        let row = fill_defaults(table, row.clone());
        let existing = st.tables.get(table).map(|v| v.as_slice()).unwrap_or(&[]);
        let id = row.get("id").and_then(scalar_text);
        if existing.iter().any(|r| r.get("id").and_then(scalar_text) == id) {
            return Err(AppError::from_remote_status(
                409,
                Some("23505"),
                format!("duplicate key value violates unique constraint \"{}_pkey\"", table),
            ));
        }
        if table == REGISTRATIONS {
            let event_id = row.get("event_id").and_then(scalar_text);
            let event_known = st
                .tables
                .get(EVENTS)
                .map(|evs| evs.iter().any(|e| e.get("id").and_then(scalar_text) == event_id))
                .unwrap_or(false);
            if !event_known {
                return Err(AppError::remote(
                    "23503",
                    "insert or update on table \"event_registrations\" violates foreign key constraint \"event_registrations_event_id_fkey\"",
                ));
            }
            let active_dup = existing.iter().any(|r| {
                r.get("user_id").and_then(scalar_text) == Some(uid.to_string())
                    && r.get("event_id").and_then(scalar_text) == event_id
                    && r.get("status").and_then(|v| v.as_str()) == Some("registered")
            });
            if self.enforce_unique_registration && active_dup {
                return Err(AppError::from_remote_status(
                    409,
                    Some("23505"),
                    "duplicate key value violates unique constraint \"event_registrations_active_key\"".to_string(),
                ));
            }
        }
        st.tables.entry(table.to_string()).or_default().push(row.clone());
        Ok(vec![row])
    }

    async fn update(&self, token: Option<&str>, query: &Query, patch: &Value) -> AppResult<Vec<Value>> {
        self.table_calls.fetch_add(1, Ordering::SeqCst);
        let mut st = self.state.write();
        let user = self.resolve(&st, token)?;
        let table = query.table.as_str();
        let Some(col) = owner_column(table) else { return Ok(Vec::new()); };
        if let (Some(uid), Some(v)) = (user, patch.get(col)) {
            if scalar_text(v) != Some(uid.to_string()) {
                return Err(rls_violation(table));
            }
        }
        let mut out = Vec::new();
        if let Some(rows) = st.tables.get_mut(table) {
            for row in rows.iter_mut() {
                if visible(table, user, row) && query.matches(row) {
                    merge(row, patch);
                    out.push(row.clone());
                }
            }
        }
        Ok(out)
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: &Value) -> AppResult<AuthSession> {
        let key = email.trim().to_lowercase();
        let password_hash = hash_password(password)?;
        let mut st = self.state.write();
        if st.users.contains_key(&key) {
            return Err(AppError::from_remote_status(422, Some("user_already_exists"), "User already registered".to_string()));
        }
        let identity = Identity {
            id: Uuid::new_v4(),
            email: email.trim().to_string(),
            user_metadata: metadata.as_object().cloned().unwrap_or_default(),
        };
        let token = Self::issue_token(&mut st, identity.id)?;
        st.users.insert(key, UserRecord { identity: identity.clone(), password_hash });
        Ok(AuthSession { access_token: Some(token), identity })
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        let key = email.trim().to_lowercase();
        let record = self.state.read().users.get(&key).cloned();
        let Some(record) = record.filter(|r| verify_password(&r.password_hash, password)) else {
            return Err(AppError::unauthorized("invalid_credentials", "Invalid login credentials"));
        };
        let mut st = self.state.write();
        let token = Self::issue_token(&mut st, record.identity.id)?;
        Ok(AuthSession { access_token: Some(token), identity: record.identity })
    }

    async fn sign_out(&self, token: &str) -> AppResult<()> {
        match self.state.write().tokens.remove(token) {
            Some(_) => Ok(()),
            None => Err(invalid_jwt()),
        }
    }

    async fn get_user(&self, token: &str) -> AppResult<Identity> {
        let st = self.state.read();
        let uid = st.tokens.get(token).copied().ok_or_else(invalid_jwt)?;
        st.users
            .values()
            .find(|u| u.identity.id == uid)
            .map(|u| u.identity.clone())
            .ok_or_else(invalid_jwt)
    }
}
