//! Profile access: the signed-in user's own profile row.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::data::{DataClient, PROFILES};
use crate::error::{AppError, AppResult};
use crate::identity::Identity;

pub const YEAR_CHOICES: [&str; 4] = ["1st Year", "2nd Year", "3rd Year", "4th Year"];
pub const MAX_BIO_CHARS: usize = 500;

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9+()\- ]{5,20}$").expect("phone pattern"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update of the editable profile fields. Absent fields are left
/// alone; an empty string or an explicit `null` clears an optional field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProfileUpdate {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

/// A key that is present in the body is a change, even when its value is
/// `null`; `null` is read as the empty string. Missing keys stay `None`
/// through `#[serde(default)]`.
fn present<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Some(Option::<String>::deserialize(d)?.unwrap_or_default()))
}

fn invalid(code: &str, msg: String) -> AppError {
    AppError::validation(code.to_string(), msg)
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.phone.is_none()
            && self.department.is_none()
            && self.year.is_none()
            && self.bio.is_none()
    }

    /// Set one field by its column name.
    pub fn set(&mut self, field: &str, value: impl Into<String>) -> AppResult<()> {
        let slot = match field {
            "full_name" => &mut self.full_name,
            "phone" => &mut self.phone,
            "department" => &mut self.department,
            "year" => &mut self.year,
            "bio" => &mut self.bio,
            other => return Err(invalid("unknown_field", format!("{} is not an editable profile field", other))),
        };
        *slot = Some(value.into());
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if let Some(name) = &self.full_name {
            if name.trim().is_empty() {
                return Err(invalid("invalid_full_name", "full_name must not be blank".into()));
            }
        }
        if let Some(phone) = self.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            if !PHONE_RE.is_match(phone) {
                return Err(invalid("invalid_phone", format!("{} is not a valid phone number", phone)));
            }
        }
        if let Some(year) = self.year.as_deref().map(str::trim).filter(|y| !y.is_empty()) {
            if !YEAR_CHOICES.contains(&year) {
                return Err(invalid("invalid_year", format!("year must be one of: {}", YEAR_CHOICES.join(", "))));
            }
        }
        if let Some(bio) = &self.bio {
            if bio.trim().chars().count() > MAX_BIO_CHARS {
                return Err(invalid("invalid_bio", format!("bio is limited to {} characters", MAX_BIO_CHARS)));
            }
        }
        Ok(())
    }

    /// Column patch for the store: trimmed values, blanks as null, and the
    /// update timestamp.
    pub fn to_patch(&self, now: DateTime<Utc>) -> Value {
        let mut m = Map::new();
        if let Some(name) = &self.full_name {
            m.insert("full_name".into(), json!(name.trim()));
        }
        let optional = [
            ("phone", &self.phone),
            ("department", &self.department),
            ("year", &self.year),
            ("bio", &self.bio),
        ];
        for (col, val) in optional {
            if let Some(v) = val {
                let v = v.trim();
                m.insert(col.into(), if v.is_empty() { Value::Null } else { json!(v) });
            }
        }
        m.insert("updated_at".into(), json!(now.to_rfc3339()));
        Value::Object(m)
    }
}

#[derive(Debug, Serialize)]
struct NewProfile<'a> {
    id: Uuid,
    full_name: &'a str,
    email: &'a str,
}

/// Reads and writes the profile row of the identity the client acts for.
#[derive(Clone, Debug)]
pub struct ProfileAccess {
    client: DataClient,
}

impl ProfileAccess {
    pub fn new(client: DataClient) -> Self { Self { client } }

    /// The identity's profile, or `None` if the row does not exist (yet).
    pub async fn get_current_profile(&self, identity: &Identity) -> AppResult<Option<Profile>> {
        self.client
            .table(PROFILES)
            .select("*")
            .eq("id", identity.id)
            .maybe_single()
            .await
    }

    pub async fn update_profile(&self, identity: &Identity, update: ProfileUpdate) -> AppResult<Profile> {
        update.validate()?;
        let patch = update.to_patch(Utc::now());
        let mut rows: Vec<Profile> = self.client.table(PROFILES).eq("id", identity.id).update(&patch).await?;
        if rows.is_empty() {
            return Err(AppError::not_found(
                "profile_not_found".to_string(),
                format!("no profile owned by {}", identity.id),
            ));
        }
        info!(target: "profile", user = %identity.id, "profile updated");
        Ok(rows.remove(0))
    }

    /// Create the profile row that accompanies a new identity.
    pub async fn create_profile(&self, identity: &Identity, full_name: &str) -> AppResult<Profile> {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(invalid("invalid_full_name", "full_name must not be blank".into()));
        }
        let row = NewProfile { id: identity.id, full_name, email: identity.email.as_str() };
        let mut rows: Vec<Profile> = self.client.table(PROFILES).insert(&row).await?;
        if rows.is_empty() {
            return Err(AppError::remote("empty_insert", "profile insert returned no row"));
        }
        info!(target: "profile", user = %identity.id, "profile created");
        Ok(rows.remove(0))
    }
}
