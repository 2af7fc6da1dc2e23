//! Event listing and registration.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::data::{DataClient, EVENTS, REGISTRATIONS};
use crate::error::{AppError, AppResult};
use crate::identity::Identity;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Active,
    Completed,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Active => "active",
            EventStatus::Completed => "completed",
            EventStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool { !matches!(self, EventStatus::Active) }

    /// Lifecycle is one-way: active ends as completed or cancelled.
    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        matches!((self, next), (EventStatus::Active, EventStatus::Completed) | (EventStatus::Active, EventStatus::Cancelled))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Registered,
    Cancelled,
    Attended,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Registered => "registered",
            RegistrationStatus::Cancelled => "cancelled",
            RegistrationStatus::Attended => "attended",
        }
    }

    pub fn can_transition_to(&self, next: RegistrationStatus) -> bool {
        matches!(
            (self, next),
            (RegistrationStatus::Registered, RegistrationStatus::Cancelled)
                | (RegistrationStatus::Registered, RegistrationStatus::Attended)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub event_date: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub max_participants: u32,
    pub status: EventStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Participant cap; `None` when unlimited.
    pub fn capacity(&self) -> Option<u32> {
        (self.max_participants > 0).then_some(self.max_participants)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Registration {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub status: RegistrationStatus,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct NewRegistration {
    user_id: Uuid,
    event_id: Uuid,
    status: RegistrationStatus,
}

#[derive(Debug, Deserialize)]
struct RegisteredEvent {
    event_id: Uuid,
}

#[derive(Clone, Debug)]
pub struct EventAccess {
    client: DataClient,
}

impl EventAccess {
    pub fn new(client: DataClient) -> Self { Self { client } }

    /// Active events, soonest first.
    pub async fn list_active_events(&self) -> AppResult<Vec<Event>> {
        let mut events: Vec<Event> = self
            .client
            .table(EVENTS)
            .select("*")
            .eq("status", EventStatus::Active.as_str())
            .order("event_date", true)
            .fetch()
            .await?;
        events.retain(|e| e.status == EventStatus::Active);
        events.sort_by_key(|e| e.event_date);
        Ok(events)
    }

    /// Ids of events the identity currently holds a `registered` row for.
    pub async fn list_my_registrations(&self, identity: &Identity) -> AppResult<BTreeSet<Uuid>> {
        let rows: Vec<RegisteredEvent> = self
            .client
            .table(REGISTRATIONS)
            .select("event_id")
            .eq("user_id", identity.id)
            .eq("status", RegistrationStatus::Registered.as_str())
            .fetch()
            .await?;
        Ok(rows.into_iter().map(|r| r.event_id).collect())
    }

    /// Insert a registration. Callers check `list_my_registrations` first;
    /// a store-level duplicate surfaces as `Conflict`.
    pub async fn register(&self, identity: &Identity, event_id: Uuid) -> AppResult<Registration> {
        let row = NewRegistration { user_id: identity.id, event_id, status: RegistrationStatus::Registered };
        let mut rows: Vec<Registration> = self.client.table(REGISTRATIONS).insert(&row).await?;
        if rows.is_empty() {
            return Err(AppError::remote("empty_insert", "registration insert returned no row"));
        }
        info!(target: "events", user = %identity.id, event = %event_id, "registered");
        Ok(rows.remove(0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    Registered(Registration),
    AlreadyRegistered,
}

/// Event list plus the caller's registration set, kept consistent across writes.
#[derive(Debug)]
pub struct EventBoard {
    access: EventAccess,
    identity: Identity,
    events: Vec<Event>,
    registered: BTreeSet<Uuid>,
}

impl EventBoard {
    pub fn new(access: EventAccess, identity: Identity) -> Self {
        Self { access, identity, events: Vec::new(), registered: BTreeSet::new() }
    }

    pub fn identity(&self) -> &Identity { &self.identity }

    pub fn events(&self) -> &[Event] { &self.events }

    pub fn registered(&self) -> &BTreeSet<Uuid> { &self.registered }

    pub fn is_registered(&self, event_id: &Uuid) -> bool { self.registered.contains(event_id) }

    /// Reload events and registrations. A failed event fetch leaves an empty
    /// list; a failed registration fetch keeps the last known set.
    pub async fn refresh(&mut self) {
        self.events = match self.access.list_active_events().await {
            Ok(evs) => evs,
            Err(e) => {
                warn!(target: "events", "event list unavailable: {}", e);
                Vec::new()
            }
        };
        self.reload_registrations().await;
    }

    async fn reload_registrations(&mut self) {
        match self.access.list_my_registrations(&self.identity).await {
            Ok(set) => self.registered = set,
            Err(e) => warn!(target: "events", "registrations unavailable: {}", e),
        }
    }

    /// Register unless the cached set says we already are. On success the set
    /// reflects the new registration before this returns.
    pub async fn register(&mut self, event_id: Uuid) -> AppResult<RegisterOutcome> {
        if self.registered.contains(&event_id) {
            return Ok(RegisterOutcome::AlreadyRegistered);
        }
        match self.access.register(&self.identity, event_id).await {
            Ok(reg) => {
                self.reload_registrations().await;
                self.registered.insert(event_id);
                Ok(RegisterOutcome::Registered(reg))
            }
            Err(AppError::Conflict { .. }) => {
                self.reload_registrations().await;
                self.registered.insert(event_id);
                Ok(RegisterOutcome::AlreadyRegistered)
            }
            Err(e) => Err(e),
        }
    }
}
