//! State-change notifications.
//!
//! Operations queue [`AuthorityEvent`]s on their [`Transaction`](crate::Transaction);
//! the events are dispatched after a successful commit through the
//! [`ListenerManager`] owned by the [`PersistenceManager`](crate::PersistenceManager).
//!
//! # Reentrancy
//!
//! Dispatch is synchronous, on the committing thread, and happens while the
//! listener table lock is held. A listener must not block, must not register or
//! remove listeners, and must not start a transaction that mutates the entity
//! that fired the event. Doing so deadlocks on the listener lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

/// A committed change to authority state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityEvent {
    /// A signature was added or replaced on a statement authority.
    SignatureAdded {
        statement_uuid: Uuid,
        authorizer_uuid: Uuid,
    },
    /// A signature was removed from a statement authority.
    SignatureRemoved {
        statement_uuid: Uuid,
        authorizer_uuid: Uuid,
    },
    ValidSignatureChanged { statement_uuid: Uuid, value: bool },
    SignedDependenciesChanged { statement_uuid: Uuid, value: bool },
    SignedProofChanged { statement_uuid: Uuid, value: bool },
    /// A node, authorizer or the successor chain of a statement's delegate tree changed.
    DelegateTreeChanged { statement_uuid: Uuid },
    AuthorityDeleted { statement_uuid: Uuid },
    /// A person became orphan (`orphan: true`) or was referenced again.
    PersonOrphanChanged { person_uuid: Uuid, orphan: bool },
}

impl AuthorityEvent {
    /// The entity key listeners register against.
    pub fn key(&self) -> Uuid {
        match self {
            AuthorityEvent::SignatureAdded { statement_uuid, .. }
            | AuthorityEvent::SignatureRemoved { statement_uuid, .. }
            | AuthorityEvent::ValidSignatureChanged { statement_uuid, .. }
            | AuthorityEvent::SignedDependenciesChanged { statement_uuid, .. }
            | AuthorityEvent::SignedProofChanged { statement_uuid, .. }
            | AuthorityEvent::DelegateTreeChanged { statement_uuid }
            | AuthorityEvent::AuthorityDeleted { statement_uuid } => *statement_uuid,
            AuthorityEvent::PersonOrphanChanged { person_uuid, .. } => *person_uuid,
        }
    }
}

/// Receiver of [`AuthorityEvent`]s.
pub trait AuthorityListener: Send + Sync {
    fn on_event(&self, event: &AuthorityEvent);
}

impl<F> AuthorityListener for F
where
    F: Fn(&AuthorityEvent) + Send + Sync,
{
    fn on_event(&self, event: &AuthorityEvent) {
        self(event)
    }
}

/// Handle returned by [`ListenerManager::register`], used to remove a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ListenerVec = Vec<(ListenerId, Arc<dyn AuthorityListener>)>;

/// Per-key observer registry.
///
/// Owned by a [`PersistenceManager`](crate::PersistenceManager) and dropped with it.
#[derive(Default)]
pub struct ListenerManager {
    listeners: Mutex<HashMap<Uuid, ListenerVec>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ListenerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys = self.listeners.lock().map(|l| l.len()).unwrap_or(0);
        f.debug_struct("ListenerManager")
            .field("listeners", &format!("<{keys} keys>"))
            .finish()
    }
}

impl ListenerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe events whose [`key`](AuthorityEvent::key) is `key`.
    pub fn register(&self, key: Uuid, listener: Arc<dyn AuthorityListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove one listener; returns whether it was registered.
    pub fn remove(&self, key: Uuid, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entries) = listeners.get_mut(&key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(&key);
        }
        removed
    }

    /// Remove every listener registered for `key`.
    pub fn clear(&self, key: Uuid) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
    }

    pub fn clear_all(&self) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn listener_count(&self, key: Uuid) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .map_or(0, Vec::len)
    }

    /// Deliver `event` to the listeners of its key, holding the registry lock.
    pub fn dispatch(&self, event: &AuthorityEvent) {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entries) = listeners.get(&event.key()) {
            for (_, listener) in entries {
                listener.on_event(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_reaches_only_matching_key() {
        let manager = ListenerManager::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let key = Uuid::new_v4();
        let other = Uuid::new_v4();

        let sink = seen.clone();
        let id = manager.register(
            key,
            Arc::new(move |event: &AuthorityEvent| sink.lock().unwrap().push(event.clone())),
        );

        manager.dispatch(&AuthorityEvent::AuthorityDeleted {
            statement_uuid: other,
        });
        manager.dispatch(&AuthorityEvent::DelegateTreeChanged {
            statement_uuid: key,
        });
        assert_eq!(seen.lock().unwrap().len(), 1);

        assert!(manager.remove(key, id));
        assert!(!manager.remove(key, id));
        manager.dispatch(&AuthorityEvent::DelegateTreeChanged {
            statement_uuid: key,
        });
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn clear_drops_all_listeners_of_a_key() {
        let manager = ListenerManager::new();
        let key = Uuid::new_v4();
        manager.register(key, Arc::new(|_: &AuthorityEvent| {}));
        manager.register(key, Arc::new(|_: &AuthorityEvent| {}));
        assert_eq!(manager.listener_count(key), 2);
        manager.clear(key);
        assert_eq!(manager.listener_count(key), 0);
    }
}
