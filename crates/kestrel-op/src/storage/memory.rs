//! In-memory storage backed by `DashMap`.
//!
//! Every operation touches a single key, so the shard lock held by the
//! `DashMap` entry is the only synchronisation needed. Guards are never
//! held across an `.await`.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{ClientStore, CodeStore, PendingStore, SessionMutation, SessionStore, TokenStore};
use crate::error::OpError;
use crate::flow::authorize::PendingAuthorization;
use crate::types::{AuthorizationCode, Client, Session, TokenRecord};
use crate::OpResult;

// =============================================================================
// Clients
// =============================================================================

/// Client registrations held in memory.
#[derive(Default)]
pub struct MemoryClientStore {
    clients: DashMap<String, Client>,
}

impl MemoryClientStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStore for MemoryClientStore {
    async fn find(&self, client_id: &str) -> OpResult<Option<Client>> {
        Ok(self.clients.get(client_id).map(|c| c.value().clone()))
    }

    async fn register(&self, client: Client) -> OpResult<()> {
        self.clients.insert(client.client_id.clone(), client);
        Ok(())
    }

    async fn remove(&self, client_id: &str) -> OpResult<bool> {
        Ok(self.clients.remove(client_id).is_some())
    }

    async fn list(&self) -> OpResult<Vec<Client>> {
        let mut clients: Vec<Client> = self.clients.iter().map(|c| c.value().clone()).collect();
        clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        Ok(clients)
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// Sessions held in memory, bounded by a maximum count.
pub struct MemorySessionStore {
    sessions: DashMap<Uuid, Session>,
    capacity: usize,
    count: AtomicUsize,
}

impl MemorySessionStore {
    /// Creates a store holding at most `capacity` sessions.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            capacity,
            count: AtomicUsize::new(0),
        }
    }

    fn reserve_slot(&self) -> OpResult<()> {
        self.count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| OpError::capacity("session store is full"))
    }

    fn release_slots(&self, n: usize) {
        if n > 0 {
            self.count.fetch_sub(n, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: Session) -> OpResult<()> {
        self.reserve_slot()?;
        match self.sessions.entry(session.id) {
            Entry::Occupied(_) => {
                self.release_slots(1);
                Err(OpError::storage(format!("duplicate session id {}", session.id)))
            }
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> OpResult<Option<Session>> {
        Ok(self.sessions.get(&id).map(|s| s.value().clone()))
    }

    async fn update(&self, id: Uuid, mutation: SessionMutation) -> OpResult<Option<Session>> {
        let Some(mut entry) = self.sessions.get_mut(&id) else {
            return Ok(None);
        };
        let mut candidate = entry.value().clone();
        mutation(&mut candidate)?;
        *entry.value_mut() = candidate.clone();
        Ok(Some(candidate))
    }

    async fn remove(&self, id: Uuid) -> OpResult<bool> {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            self.release_slots(1);
        }
        Ok(removed)
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> OpResult<usize> {
        let mut removed = 0;
        self.sessions.retain(|_, session| {
            let keep = !session.is_expired_at(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        self.release_slots(removed);
        Ok(removed)
    }

    async fn len(&self) -> OpResult<usize> {
        Ok(self.sessions.len())
    }
}

// =============================================================================
// Tokens
// =============================================================================

/// Token records held in memory.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: DashMap<String, TokenRecord>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, record: TokenRecord) -> OpResult<()> {
        match self.tokens.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(OpError::storage(format!(
                "duplicate token id {}",
                record.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn get(&self, token_id: &str) -> OpResult<Option<TokenRecord>> {
        Ok(self.tokens.get(token_id).map(|t| t.value().clone()))
    }

    async fn revoke(&self, token_id: &str) -> OpResult<bool> {
        Ok(match self.tokens.get_mut(token_id) {
            Some(mut record) => {
                record.revoked = true;
                true
            }
            None => false,
        })
    }

    async fn consume(&self, token_id: &str) -> OpResult<bool> {
        // the shard stays write-locked while the entry guard lives
        Ok(match self.tokens.get_mut(token_id) {
            Some(mut record) if !record.revoked => {
                record.revoked = true;
                true
            }
            _ => false,
        })
    }

    async fn revoke_many(&self, token_ids: &[String]) -> OpResult<usize> {
        let mut revoked = 0;
        for id in token_ids {
            if let Some(mut record) = self.tokens.get_mut(id) {
                record.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> OpResult<usize> {
        let before = self.tokens.len();
        self.tokens.retain(|_, record| !record.is_expired_at(now));
        Ok(before.saturating_sub(self.tokens.len()))
    }
}

// =============================================================================
// Authorization Codes
// =============================================================================

/// Authorization codes held in memory.
#[derive(Default)]
pub struct MemoryCodeStore {
    codes: DashMap<String, AuthorizationCode>,
}

impl MemoryCodeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CodeStore for MemoryCodeStore {
    async fn insert(&self, code: AuthorizationCode) -> OpResult<()> {
        // expired codes are dropped here, there is no sweeper task
        self.codes.retain(|_, c| !c.is_expired());
        match self.codes.entry(code.code_hash.clone()) {
            Entry::Occupied(_) => Err(OpError::storage("duplicate authorization code")),
            Entry::Vacant(slot) => {
                slot.insert(code);
                Ok(())
            }
        }
    }

    async fn consume(&self, code_hash: &str) -> OpResult<Option<AuthorizationCode>> {
        let Some(mut entry) = self.codes.get_mut(code_hash) else {
            return Ok(None);
        };
        let before = entry.value().clone();
        if entry.consumed_at.is_none() {
            entry.consumed_at = Some(OffsetDateTime::now_utc());
        }
        Ok(Some(before))
    }
}

// =============================================================================
// Pending Authorizations
// =============================================================================

/// Parked authorization requests held in memory.
#[derive(Default)]
pub struct MemoryPendingStore {
    pending: DashMap<String, PendingAuthorization>,
}

impl MemoryPendingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingStore for MemoryPendingStore {
    async fn park(&self, pending: PendingAuthorization) -> OpResult<()> {
        self.pending.retain(|_, p| !p.is_expired());
        self.pending.insert(pending.ticket.clone(), pending);
        Ok(())
    }

    async fn take(&self, ticket: &str) -> OpResult<Option<PendingAuthorization>> {
        Ok(self
            .pending
            .remove(ticket)
            .map(|(_, pending)| pending)
            .filter(|pending| !pending.is_expired()))
    }
}
