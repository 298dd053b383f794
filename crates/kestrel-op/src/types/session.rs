//! Authentication session types.
//!
//! A [`Session`] records one completed authentication of a subject for one
//! client. It owns a single [`Grant`] and the ids of every token issued
//! from it.

use std::collections::BTreeSet;

use base64::{Engine, engine::general_purpose::STANDARD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::client::{Client, SubjectType};

// =============================================================================
// Authentication Event
// =============================================================================

/// Record of the upstream authentication that created a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthnEvent {
    /// Authenticated user id as reported by the backend.
    pub uid: String,

    /// When the user authenticated.
    #[serde(with = "time::serde::rfc3339")]
    pub authn_time: OffsetDateTime,

    /// Authentication method reference.
    pub method: String,

    /// Base64 encoded random salt.
    pub salt: String,
}

impl AuthnEvent {
    /// Creates an event with a fresh random salt of `salt_size` bytes.
    #[must_use]
    pub fn new(
        uid: impl Into<String>,
        method: impl Into<String>,
        authn_time: OffsetDateTime,
        salt_size: usize,
    ) -> Self {
        Self {
            uid: uid.into(),
            authn_time,
            method: method.into(),
            salt: Self::generate_salt(salt_size),
        }
    }

    /// Generates `size` random bytes, base64 encoded.
    #[must_use]
    pub fn generate_salt(size: usize) -> String {
        let mut bytes = vec![0u8; size];
        rand::thread_rng().fill_bytes(&mut bytes);
        STANDARD.encode(bytes)
    }
}

// =============================================================================
// Grant
// =============================================================================

/// Scopes and user attributes approved for a (session, client) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grant {
    /// The client this grant was made to.
    pub client_id: String,

    /// Approved scopes.
    pub scopes: Vec<String>,

    /// Subject policy of the client at authentication time.
    pub subject_type: SubjectType,

    /// Sector used for pairwise subjects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector_identifier: Option<String>,

    /// Raw user attributes supplied by the authentication backend.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Grant {
    /// Creates a grant for `client` with the given scopes.
    #[must_use]
    pub fn new(client: &Client, scopes: Vec<String>) -> Self {
        Self {
            client_id: client.client_id.clone(),
            scopes,
            subject_type: client.subject_type,
            sector_identifier: client.sector_identifier(),
            attributes: Map::new(),
        }
    }

    /// Attaches the backend-supplied attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Returns `true` if the scope was approved.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

// =============================================================================
// Session
// =============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Usable.
    Active,
    /// Lifetime elapsed.
    Expired,
    /// Explicitly revoked (logout).
    Revoked,
}

impl SessionState {
    /// Returns the state name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

/// An authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Opaque unique id.
    pub id: Uuid,

    /// Internal subject id of the authenticated user.
    pub subject: String,

    /// Client the session was created for.
    pub client_id: String,

    /// The authentication that created this session.
    pub authn_event: AuthnEvent,

    /// Approved scopes and attributes.
    pub grant: Grant,

    /// Ids of tokens issued from this session.
    #[serde(default)]
    pub tokens: BTreeSet<String>,

    /// Stored lifecycle state. Expiry is derived from `expires_at`,
    /// use [`Session::effective_state`].
    pub state: SessionState,

    /// When the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the session expires. Extended when a longer-lived token is issued.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Nonce from the authorization request that created the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl Session {
    /// Builds a new active session with a fresh id.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        authn_event: AuthnEvent,
        grant: Grant,
        lifetime: Duration,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            client_id: grant.client_id.clone(),
            authn_event,
            grant,
            tokens: BTreeSet::new(),
            state: SessionState::Active,
            created_at: now,
            expires_at: now + lifetime,
            nonce: None,
        }
    }

    /// Records the nonce of the authorization request.
    #[must_use]
    pub fn with_nonce(mut self, nonce: Option<String>) -> Self {
        self.nonce = nonce;
        self
    }

    /// Returns `true` if the session lifetime has elapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Returns `true` if the session had expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.state == SessionState::Expired || now >= self.expires_at
    }

    /// Returns `true` if the session was revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.state == SessionState::Revoked
    }

    /// State taking the clock into account.
    #[must_use]
    pub fn effective_state(&self) -> SessionState {
        if self.is_revoked() {
            SessionState::Revoked
        } else if self.is_expired() {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }

    /// Approved scopes.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.grant.scopes
    }
}
