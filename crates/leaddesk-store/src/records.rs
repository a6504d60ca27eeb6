//! Records exchanged with the remote store.
//!
//! Field names follow the `leads` and `profiles` table columns so the same
//! types serialize directly into PostgREST payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store-assigned lead identifier.
pub type LeadId = Uuid;

/// Profile role that unlocks the admin workflow.
pub const ADMIN_ROLE: &str = "admin";

/// Role assumed for profiles without an explicit role.
pub const DEFAULT_ROLE: &str = "user";

// ── Leads ────────────────────────────────────────────────────────────

/// Review status of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    InProgress,
    Done,
}

impl LeadStatus {
    /// Every status, in workflow order.
    pub const ALL: [Self; 3] = [Self::New, Self::InProgress, Self::Done];

    /// Column value as stored.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::InProgress => "In progress",
            Self::Done => "Done",
        }
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "new" => Ok(Self::New),
            "in_progress" | "in-progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            other => Err(format!("unknown lead status: {other}")),
        }
    }
}

/// Marketing variant a lead was submitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Base,
    Sales,
}

impl Variant {
    /// Tag stored in the `source` column.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Sales => "sales",
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "base" => Ok(Self::Base),
            "sales" => Ok(Self::Sales),
            other => Err(format!("unknown variant: {other}")),
        }
    }
}

/// A lead row as listed from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
    pub telegram: Option<String>,
    pub seats: i32,
    pub company: Option<String>,
    pub goal: Option<String>,
    pub status: LeadStatus,
    pub notes: Option<String>,
    /// Variant tag; older rows may lack it.
    #[serde(default)]
    pub source: Option<String>,
}

/// Insert payload for a new lead. `id` and `created_at` are store-assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewLead {
    pub name: String,
    pub email: String,
    pub telegram: Option<String>,
    pub seats: i32,
    pub company: Option<String>,
    pub goal: Option<String>,
    pub status: LeadStatus,
    pub source: Variant,
}

/// Partial update of a lead row. Only the fields that are set are sent.
///
/// `notes` is doubly optional: `Some(None)` clears the column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeadPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<LeadStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

impl LeadPatch {
    /// Patch that changes only the status.
    #[must_use]
    pub const fn status(status: LeadStatus) -> Self {
        Self {
            status: Some(status),
            notes: None,
        }
    }

    /// Patch that replaces only the notes.
    #[must_use]
    pub const fn notes(notes: Option<String>) -> Self {
        Self {
            status: None,
            notes: Some(notes),
        }
    }

    /// Whether the patch carries no field at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.status.is_none() && self.notes.is_none()
    }

    /// Apply the supplied fields to a local copy of the row.
    pub fn apply_to(&self, lead: &mut Lead) {
        if let Some(status) = self.status {
            lead.status = status;
        }
        if let Some(notes) = &self.notes {
            lead.notes.clone_from(notes);
        }
    }
}

// ── Profiles ─────────────────────────────────────────────────────────

/// Identity metadata linked one-to-one with a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub role: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

impl Profile {
    /// Role with the default applied.
    #[must_use]
    pub fn role(&self) -> &str {
        self.role.as_deref().unwrap_or(DEFAULT_ROLE)
    }

    /// Whether this profile unlocks the admin workflow.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some(ADMIN_ROLE)
    }
}

/// Insert payload for an auto-provisioned profile. Carries no role: elevation
/// only ever happens out-of-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewProfile {
    pub id: Uuid,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

// ── Sessions ─────────────────────────────────────────────────────────

/// The user behind a session, as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

impl SessionUser {
    /// Display name from provider metadata (`full_name`, else `name`).
    #[must_use]
    pub fn full_name(&self) -> Option<String> {
        self.metadata_str("full_name")
            .or_else(|| self.metadata_str("name"))
    }

    /// Avatar URL from provider metadata.
    #[must_use]
    pub fn avatar_url(&self) -> Option<String> {
        self.metadata_str("avatar_url")
    }

    fn metadata_str(&self, key: &str) -> Option<String> {
        self.user_metadata
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
    }
}

/// Read-only reflection of a signed-in session.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry as a unix timestamp, when the provider reports one.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: SessionUser,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}
