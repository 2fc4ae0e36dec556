//! Correlation-id registry for in-flight messages.
//!
//! Every request that expects a response registers here and carries the
//! returned id as `user_arg` on the wire. Ids are allocated cyclically over
//! the non-negative 31-bit range so a stale response racing a reused id is
//! statistically rare.

use crate::error::{MuonError, Result};
use std::collections::BTreeMap;

/// Highest id handed out before the allocator wraps to zero.
const MAX_ID: u32 = i32::MAX as u32;

/// Map of outstanding correlation ids to their pending entries.
///
/// Iteration order (for bulk fail/resend) is ascending id order.
#[derive(Debug)]
pub struct Registry<T> {
    entries: BTreeMap<u32, T>,
    next_id: u32,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 0,
        }
    }
}

impl<T> Registry<T> {
    /// Register an entry and return its freshly allocated id.
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhausted` if every id in the 31-bit range is in use.
    pub fn register(&mut self, entry: T) -> Result<u32> {
        let id = self.allocate_id()?;
        self.entries.insert(id, entry);
        Ok(id)
    }

    /// Remove an entry. Subsequent lookups of `id` miss.
    pub fn deregister(&mut self, id: u32) -> Option<T> {
        self.entries.remove(&id)
    }

    /// Look up an outstanding entry.
    pub fn find(&self, id: u32) -> Option<&T> {
        self.entries.get(&id)
    }

    /// Number of outstanding entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All outstanding ids in ascending order.
    pub fn ids(&self) -> Vec<u32> {
        self.entries.keys().copied().collect()
    }

    fn allocate_id(&mut self) -> Result<u32> {
        if self.entries.len() > MAX_ID as usize {
            return Err(MuonError::resource_exhausted("correlation ids"));
        }

        // Cyclic scan from the cursor, skipping ids still in flight.
        loop {
            let candidate = self.next_id;
            self.next_id = if self.next_id == MAX_ID {
                0
            } else {
                self.next_id + 1
            };
            if !self.entries.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_unique() {
        let mut reg = Registry::default();
        let a = reg.register("a").unwrap();
        let b = reg.register("b").unwrap();
        let c = reg.register("c").unwrap();
        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(reg.find(b), Some(&"b"));
    }

    #[test]
    fn deregistered_ids_miss() {
        let mut reg = Registry::default();
        let id = reg.register(7u32).unwrap();
        assert_eq!(reg.deregister(id), Some(7));
        assert_eq!(reg.find(id), None);
        assert_eq!(reg.deregister(id), None);
    }

    #[test]
    fn freed_ids_are_not_reused_immediately() {
        let mut reg = Registry::default();
        let first = reg.register(()).unwrap();
        reg.deregister(first);
        let second = reg.register(()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn allocation_skips_ids_still_in_use() {
        let mut reg = Registry::default();
        let held = reg.register("held").unwrap();

        // Walk the cursor all the way around the 31-bit space.
        reg.next_id = MAX_ID;
        let wrapped = reg.register("wrapped").unwrap();
        assert_eq!(wrapped, MAX_ID);
        let after = reg.register("after").unwrap();
        assert_ne!(after, held);
        assert_eq!(reg.find(held), Some(&"held"));
    }

    #[test]
    fn ids_iterate_in_order() {
        let mut reg = Registry::default();
        reg.next_id = 5;
        reg.register("x").unwrap();
        reg.next_id = 1;
        reg.register("y").unwrap();
        assert_eq!(reg.ids(), vec![1, 5]);
    }
}
