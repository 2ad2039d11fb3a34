//! Canonical user record and cache entry types

use crate::identity::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// User identifier as sent by the API: numeric for legacy accounts,
/// string otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Int(i64),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{}", id),
            Self::Text(id) => f.write_str(id),
        }
    }
}

/// Student-specific sub-record.
///
/// Only `portfolioUrl` is interpreted; every other field the API sends is
/// carried through untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    #[serde(default)]
    pub portfolio_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Canonical user record, the single shape every cache tier stores.
///
/// Array fields are never null (empty instead), string fields are never
/// null (empty instead). `age`, `nationality`, `theme` and
/// `specialization` are the only nullable scalars.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserRecord {
    pub id: Option<UserId>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub profile_picture_url: String,
    pub birth_date: String,
    pub nationality: Option<String>,
    pub age: Option<u32>,
    pub theme: Option<String>,
    pub specialization: Option<String>,
    pub roles: Vec<String>,
    pub diplomas: Vec<Value>,
    pub addresses: Vec<Value>,
    pub documents: Vec<Value>,
    pub student_profile: Option<StudentProfile>,
    pub stats: Map<String, Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRecord {
    /// Display name, falling back to the email when no name is known.
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn portfolio_url(&self) -> Option<&str> {
        self.student_profile
            .as_ref()
            .and_then(|profile| profile.portfolio_url.as_deref())
    }
}

/// A record together with the time it was fetched from the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: UserRecord,
    pub fetched_at: Timestamp,
}

impl CacheEntry {
    pub fn new(data: UserRecord, fetched_at: Timestamp) -> Self {
        Self { data, fetched_at }
    }

    /// Entry stamped with the current time.
    pub fn fetched_now(data: UserRecord) -> Self {
        Self::new(data, Utc::now())
    }
}
