use std::collections::HashMap;

use uuid::Uuid;

/// Identifier of one socket connection. Fresh for every upgrade.
pub type ConnId = Uuid;

/// Which connection each online user is reachable on.
///
/// One entry per user; a second connection for the same user replaces the
/// first. Not synchronized: the owner wraps it in a lock.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: HashMap<Uuid, ConnId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `user_id` at `conn_id`. Returns the connection it replaced, if any.
    pub fn register(&mut self, user_id: Uuid, conn_id: ConnId) -> Option<ConnId> {
        self.entries.insert(user_id, conn_id)
    }

    /// Remove `user_id`, but only while it still points at `conn_id`.
    /// A connection that was superseded by a newer one cannot evict it.
    pub fn unregister(&mut self, user_id: Uuid, conn_id: ConnId) -> bool {
        match self.entries.get(&user_id) {
            Some(current) if *current == conn_id => {
                self.entries.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, user_id: Uuid) -> Option<ConnId> {
        self.entries.get(&user_id).copied()
    }

    /// Online user ids, sorted so broadcasts are stable.
    pub fn snapshot(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.entries.keys().copied().collect();
        ids.sort();
        ids
    }
}
