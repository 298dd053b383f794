//! Storage traits for provider state.
//!
//! The provider keeps five kinds of state: client registrations, sessions,
//! token records, authorization codes and authorization requests parked
//! while the user logs in. Each is behind its own trait so deployments can
//! back them with a durable key-value store.
//!
//! # Implementation Notes
//!
//! Implementations must make every operation atomic per key. In particular:
//!
//! - [`SessionStore::update`] applies its mutation under the entry lock and
//!   commits only if the mutation succeeds
//! - [`CodeStore::consume`] must let exactly one caller redeem a code
//! - [`PendingStore::take`] must hand a ticket to exactly one caller
//!
//! No operation may lock more than the single key it is given.
//!
//! An in-memory implementation lives in [`memory`].

pub mod memory;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::OpResult;
use crate::flow::authorize::PendingAuthorization;
use crate::types::{AuthorizationCode, Client, Session, TokenRecord};

pub use memory::{
    MemoryClientStore, MemoryCodeStore, MemoryPendingStore, MemorySessionStore, MemoryTokenStore,
};

/// A mutation applied atomically to one stored session.
///
/// Returning an error leaves the stored session untouched.
pub type SessionMutation = Box<dyn FnOnce(&mut Session) -> OpResult<()> + Send>;

/// Client registrations.
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Finds a client by id.
    async fn find(&self, client_id: &str) -> OpResult<Option<Client>>;

    /// Registers or replaces a client.
    async fn register(&self, client: Client) -> OpResult<()>;

    /// Removes a client. Returns `true` if it existed.
    async fn remove(&self, client_id: &str) -> OpResult<bool>;

    /// Lists all registered clients.
    async fn list(&self) -> OpResult<Vec<Client>>;
}

/// Authenticated sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Commits a fully built session.
    ///
    /// # Errors
    ///
    /// Returns `CapacityError` when the store is full.
    async fn insert(&self, session: Session) -> OpResult<()>;

    /// Returns a copy of the stored session.
    async fn get(&self, id: Uuid) -> OpResult<Option<Session>>;

    /// Applies `mutation` atomically and returns the updated session, or
    /// `None` if no session has this id.
    async fn update(&self, id: Uuid, mutation: SessionMutation) -> OpResult<Option<Session>>;

    /// Removes a session. Returns `true` if it existed.
    async fn remove(&self, id: Uuid) -> OpResult<bool>;

    /// Removes sessions that expired before `now`. Returns how many were removed.
    async fn purge_expired(&self, now: OffsetDateTime) -> OpResult<usize>;

    /// Number of stored sessions.
    async fn len(&self) -> OpResult<usize>;
}

/// Issued token records, keyed by `jti`.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Stores a new token record.
    async fn insert(&self, record: TokenRecord) -> OpResult<()>;

    /// Finds a record by token id.
    async fn get(&self, token_id: &str) -> OpResult<Option<TokenRecord>>;

    /// Sets the revocation flag. Returns `true` if the record exists.
    async fn revoke(&self, token_id: &str) -> OpResult<bool>;

    /// Atomically revokes a record that is not yet revoked.
    ///
    /// Returns `true` only for the caller that flipped the flag, so at most
    /// one of several concurrent callers wins.
    async fn consume(&self, token_id: &str) -> OpResult<bool>;

    /// Sets the revocation flag on every listed record. Returns how many existed.
    async fn revoke_many(&self, token_ids: &[String]) -> OpResult<usize>;

    /// Removes records that expired before `now`.
    async fn purge_expired(&self, now: OffsetDateTime) -> OpResult<usize>;
}

/// Authorization codes, keyed by code hash.
#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Stores a freshly minted code.
    async fn insert(&self, code: AuthorizationCode) -> OpResult<()>;

    /// Marks the code consumed and returns it as it was before consumption.
    ///
    /// Returns `None` for unknown codes. A code that was already consumed is
    /// returned with `consumed_at` set so the caller can detect replay.
    async fn consume(&self, code_hash: &str) -> OpResult<Option<AuthorizationCode>>;
}

/// Authorization requests waiting for an out-of-band login.
#[async_trait]
pub trait PendingStore: Send + Sync {
    /// Parks a validated authorization request under its ticket.
    async fn park(&self, pending: PendingAuthorization) -> OpResult<()>;

    /// Removes and returns the request parked under `ticket`.
    async fn take(&self, ticket: &str) -> OpResult<Option<PendingAuthorization>>;
}
