//! Stream identifier allocation and the `id -> stream` map
//! (`spec.md` §4.4). Guarded by the session-wide lock; never held across
//! transport I/O (`spec.md` §5).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::stream::StreamState;

/// Which side of the session we are. Determines identifier parity: the
/// initiator allocates odd ids, the accepter even ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    fn first_id(self) -> u32 {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }

    /// Whether `id` carries the parity this role allocates locally.
    pub fn owns(self, id: u32) -> bool {
        match self {
            Role::Client => id % 2 == 1,
            Role::Server => id % 2 == 0,
        }
    }
}

pub(crate) struct Registry {
    streams: HashMap<u32, Arc<StreamState>>,
    next_id: u32,
    role: Role,
}

impl Registry {
    pub(crate) fn new(role: Role) -> Self {
        Self { streams: HashMap::new(), next_id: role.first_id(), role }
    }

    /// Allocate the next locally-owned stream identifier.
    pub(crate) fn allocate_id(&mut self) -> Result<u32> {
        let id = self.next_id;
        let next = id.checked_add(2).ok_or(Error::StreamsExhausted)?;
        self.next_id = next;
        Ok(id)
    }

    pub(crate) fn insert(&mut self, id: u32, stream: Arc<StreamState>) {
        self.streams.insert(id, stream);
    }

    pub(crate) fn get(&self, id: u32) -> Option<Arc<StreamState>> {
        self.streams.get(&id).cloned()
    }

    pub(crate) fn contains(&self, id: u32) -> bool {
        self.streams.contains_key(&id)
    }

    pub(crate) fn remove(&mut self, id: u32) -> Option<Arc<StreamState>> {
        self.streams.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.streams.len()
    }

    pub(crate) fn all(&self) -> Vec<Arc<StreamState>> {
        self.streams.values().cloned().collect()
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_odd() {
        let mut r = Registry::new(Role::Client);
        assert_eq!(r.allocate_id().unwrap(), 1);
        assert_eq!(r.allocate_id().unwrap(), 3);
        assert_eq!(r.allocate_id().unwrap(), 5);
    }

    #[test]
    fn server_ids_are_even() {
        let mut r = Registry::new(Role::Server);
        assert_eq!(r.allocate_id().unwrap(), 2);
        assert_eq!(r.allocate_id().unwrap(), 4);
    }

    #[test]
    fn role_owns_checks_parity() {
        assert!(Role::Client.owns(1));
        assert!(!Role::Client.owns(2));
        assert!(Role::Server.owns(2));
        assert!(!Role::Server.owns(3));
    }
}
