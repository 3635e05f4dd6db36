//! Ordered room membership.

use duelforge_protocol::ConnectionId;

/// The members of one room, in join order.
///
/// Join order matters: in a match, a member's slot is its position plus
/// one. Passes that may remove members iterate a [`snapshot`](Self::snapshot)
/// and re-check [`contains`](Self::contains) before touching each entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Members {
    ids: Vec<ConnectionId>,
}

impl Members {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.ids.contains(&id)
    }

    /// Appends `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: ConnectionId) -> bool {
        if self.contains(id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Removes `id`, keeping the order of the rest. Returns `false` if it
    /// was not present.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        match self.ids.iter().position(|m| *m == id) {
            Some(index) => {
                self.ids.remove(index);
                true
            }
            None => false,
        }
    }

    /// A copy of the current membership.
    pub fn snapshot(&self) -> Vec<ConnectionId> {
        self.ids.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
