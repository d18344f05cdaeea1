//! The persistence manager and its transaction handle.
//!
//! A [`PersistenceManager`] ties together everything the authority core needs
//! besides the data itself: the persistence collaborator, the listener registry,
//! the secret key ring for encrypted signatories, the clock, the configuration
//! and the per-entity locks guarding compound read-modify-write sequences.
//!
//! Every operation of the core runs inside a [`Transaction`] obtained from
//! [`PersistenceManager::begin`]. Dropping a transaction without committing
//! discards its writes and its queued events.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::backend::{Backend, BackendTransaction};
use crate::clock::{Clock, SystemClock};
use crate::config::AuthorityConfig;
use crate::crypto::SecretKeyRing;
use crate::events::{AuthorityEvent, ListenerManager};
use crate::{Namespace, Result};

/// Entities whose compound mutations are serialized by a per-entity mutex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    /// The root node (and successor chain) of a statement's delegate tree.
    DelegateRoot(Uuid),
    /// A delegate authorizer, keyed by (statement, prefix, delegate).
    DelegateAuthorizer(Uuid, Namespace, Uuid),
}

/// Owner of the persistence collaborator and the shared authority services.
pub struct PersistenceManager {
    backend: Arc<dyn Backend>,
    listeners: ListenerManager,
    secrets: SecretKeyRing,
    clock: Arc<dyn Clock>,
    config: AuthorityConfig,
    entity_locks: Mutex<HashMap<EntityKey, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("backend", &"<Backend>")
            .field("listeners", &self.listeners)
            .field("secrets", &self.secrets)
            .field("clock", &self.clock)
            .field("config", &self.config)
            .finish()
    }
}

impl PersistenceManager {
    /// Create a manager over `backend` with the system clock and default configuration.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    /// Create a manager with a custom clock (typically a [`FixedClock`](crate::FixedClock) in tests).
    pub fn with_clock(backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            listeners: ListenerManager::new(),
            secrets: SecretKeyRing::new(),
            clock,
            config: AuthorityConfig::default(),
            entity_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the configuration after validating it.
    pub fn with_config(mut self, config: AuthorityConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn listeners(&self) -> &ListenerManager {
        &self.listeners
    }

    /// The key ring holding the secret passphrase for encrypted signatories.
    pub fn secrets(&self) -> &SecretKeyRing {
        &self.secrets
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    /// The mutex guarding compound mutation of `key`.
    ///
    /// Lock it for the whole read-modify-write sequence:
    ///
    /// ```ignore
    /// let lock = manager.entity_lock(EntityKey::DelegateRoot(uuid));
    /// let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
    /// ```
    ///
    /// Mutexes nobody holds a handle to are dropped from the table, so it only
    /// grows with the number of entities locked at the same time.
    pub fn entity_lock(&self, key: EntityKey) -> Arc<Mutex<()>> {
        let mut locks = self.entity_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key).or_default().clone()
    }

    /// Begin a transaction against the persistence collaborator.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        Ok(Transaction {
            manager: self,
            inner: self.backend.begin()?,
            events: Vec::new(),
        })
    }
}

/// A unit of work: backend transaction, manager services and queued events.
///
/// Dereferences to the backend's repository traits.
pub struct Transaction<'m> {
    manager: &'m PersistenceManager,
    inner: Box<dyn BackendTransaction + 'm>,
    events: Vec<AuthorityEvent>,
}

impl<'m> Transaction<'m> {
    pub fn manager(&self) -> &'m PersistenceManager {
        self.manager
    }

    /// Current time from the manager's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.manager.clock.now()
    }

    /// Queue an event for dispatch after commit.
    pub fn emit(&mut self, event: AuthorityEvent) {
        self.events.push(event);
    }

    /// Events queued so far.
    pub fn pending_events(&self) -> &[AuthorityEvent] {
        &self.events
    }

    /// Commit the writes and dispatch the queued events.
    ///
    /// Events are only dispatched when the commit succeeds.
    pub fn commit(self) -> Result<()> {
        let Transaction {
            manager,
            inner,
            events,
        } = self;
        inner.commit()?;
        debug!(events = events.len(), "Transaction committed");
        for event in &events {
            manager.listeners.dispatch(event);
        }
        Ok(())
    }
}

impl<'m> Deref for Transaction<'m> {
    type Target = dyn BackendTransaction + 'm;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl<'m> DerefMut for Transaction<'m> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}
