//! Session identity and clipboard ownership.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// Identifier of a connected peer. Ids are positive and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic source of [`SessionId`]s, starting at 1.
#[derive(Debug)]
pub struct SessionIdAllocator {
    last: AtomicU64,
}

impl SessionIdAllocator {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> SessionId {
        SessionId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl Default for SessionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// The session that most recently committed a write containing deferred
/// items. Used to route render requests, never for access control.
///
/// Only a successful write may change the mark.
#[derive(Debug, Default)]
pub struct OwnerMark {
    current: Mutex<Option<SessionId>>,
}

impl OwnerMark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<SessionId> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, owner: SessionId) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        #[cfg(feature = "tracing")]
        tracing::debug!(previous = ?*current, owner = %owner, "clipboard owner changed");
        *current = Some(owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn allocator_starts_at_one_and_increments() {
        let allocator = SessionIdAllocator::new();
        assert_eq!(allocator.next(), SessionId::new(1));
        assert_eq!(allocator.next(), SessionId::new(2));
        assert_eq!(allocator.next().get(), 3);
    }

    #[test]
    fn allocator_never_hands_out_duplicates_across_threads() {
        let allocator = Arc::new(SessionIdAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = allocator.clone();
                std::thread::spawn(move || (0..100).map(|_| allocator.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("thread panicked") {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 800);
    }

    #[test]
    fn owner_mark_starts_empty() {
        let mark = OwnerMark::new();
        assert_eq!(mark.get(), None);
        mark.set(SessionId::new(4));
        assert_eq!(mark.get(), Some(SessionId::new(4)));
    }
}
