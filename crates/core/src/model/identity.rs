use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::UserId;

/// Whether an identity is device-local or account-backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    Guest,
    Authenticated,
}

/// Self-reported gender on a profile. Closed set; defaults to undisclosed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
    Other,
    #[default]
    Undisclosed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdentityError {
    #[error("identity id must not be empty")]
    EmptyId,

    #[error("display name must not be empty")]
    EmptyDisplayName,
}

/// The active player of a session.
///
/// Exactly one identity is in effect at a time; a guest identity is
/// superseded when its progress is migrated into an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    id: UserId,
    kind: IdentityKind,
    display_name: String,
    organization: Option<String>,
    country: Option<String>,
    gender: Gender,
    created_at: DateTime<Utc>,
}

/// Unvalidated identity fields, as collected from a sign-up form or storage.
#[derive(Clone, Debug)]
pub struct IdentityDraft {
    pub id: UserId,
    pub kind: IdentityKind,
    pub display_name: String,
    pub organization: Option<String>,
    pub country: Option<String>,
    pub gender: Gender,
    pub created_at: DateTime<Utc>,
}

impl IdentityDraft {
    /// Validate and normalize the draft into an identity.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError` if the id or display name is empty after
    /// trimming.
    pub fn validate(self) -> Result<Identity, IdentityError> {
        if self.id.as_str().trim().is_empty() {
            return Err(IdentityError::EmptyId);
        }
        let display_name = self.display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(IdentityError::EmptyDisplayName);
        }

        Ok(Identity {
            id: self.id,
            kind: self.kind,
            display_name,
            organization: normalize_optional(self.organization),
            country: normalize_optional(self.country),
            gender: self.gender,
            created_at: self.created_at,
        })
    }
}

impl Identity {
    /// Create a fresh guest identity with a device-generated id.
    #[must_use]
    pub fn new_guest(now: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new(format!("guest_{}", Uuid::new_v4().simple())),
            kind: IdentityKind::Guest,
            display_name: "Guest".to_string(),
            organization: None,
            country: None,
            gender: Gender::default(),
            created_at: now,
        }
    }

    /// Rehydrate an identity from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError` if a required field is empty.
    pub fn from_persisted(
        id: UserId,
        kind: IdentityKind,
        display_name: String,
        organization: Option<String>,
        country: Option<String>,
        gender: Gender,
        created_at: DateTime<Utc>,
    ) -> Result<Self, IdentityError> {
        IdentityDraft {
            id,
            kind,
            display_name,
            organization,
            country,
            gender,
            created_at,
        }
        .validate()
    }

    #[must_use]
    pub fn id(&self) -> &UserId {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }

    #[must_use]
    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    #[must_use]
    pub fn gender(&self) -> Gender {
        self.gender
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.kind == IdentityKind::Guest
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.kind == IdentityKind::Authenticated
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}
