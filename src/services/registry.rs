/// Session Registry
/// Owns the slot -> session mapping. The session manager holds the only
/// instance and serializes every mutation behind its lock.

use std::collections::HashMap;

use crate::error::RegistryError;
use crate::models::SlotId;
use crate::services::pty::PtySession;

pub struct SessionRegistry<S = PtySession> {
    sessions: HashMap<SlotId, S>,
}

impl<S> SessionRegistry<S> {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Insert a session; the slot must be empty
    pub fn put(&mut self, slot: SlotId, session: S) -> Result<(), RegistryError> {
        if self.sessions.contains_key(&slot) {
            return Err(RegistryError::DuplicateSlot(slot));
        }
        self.sessions.insert(slot, session);
        Ok(())
    }

    pub fn get(&self, slot: SlotId) -> Result<&S, RegistryError> {
        self.sessions.get(&slot).ok_or(RegistryError::NotFound(slot))
    }

    pub fn get_mut(&mut self, slot: SlotId) -> Result<&mut S, RegistryError> {
        self.sessions
            .get_mut(&slot)
            .ok_or(RegistryError::NotFound(slot))
    }

    /// Remove and return the session in `slot`; no-op when empty
    pub fn remove(&mut self, slot: SlotId) -> Option<S> {
        self.sessions.remove(&slot)
    }

    pub fn contains(&self, slot: SlotId) -> bool {
        self.sessions.contains_key(&slot)
    }

    /// Occupied slots in ascending order
    pub fn slots(&self) -> Vec<SlotId> {
        let mut slots: Vec<SlotId> = self.sessions.keys().copied().collect();
        slots.sort();
        slots
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SlotId, &S)> {
        self.sessions.iter()
    }

    /// Empty the registry, returning every session
    pub fn drain(&mut self) -> Vec<(SlotId, S)> {
        self.sessions.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_rejects_occupied_slot() {
        let mut registry = SessionRegistry::new();
        registry.put(SlotId(1), "first").unwrap();
        assert_eq!(
            registry.put(SlotId(1), "second"),
            Err(RegistryError::DuplicateSlot(SlotId(1)))
        );
        assert_eq!(registry.get(SlotId(1)), Ok(&"first"));
    }

    #[test]
    fn get_reports_missing_slot() {
        let registry: SessionRegistry<u32> = SessionRegistry::new();
        assert_eq!(registry.get(SlotId(4)), Err(RegistryError::NotFound(SlotId(4))));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut registry = SessionRegistry::new();
        registry.put(SlotId(2), 20).unwrap();
        assert_eq!(registry.remove(SlotId(2)), Some(20));
        assert_eq!(registry.remove(SlotId(2)), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn slot_is_reusable_after_remove() {
        let mut registry = SessionRegistry::new();
        registry.put(SlotId(3), 'a').unwrap();
        registry.remove(SlotId(3));
        registry.put(SlotId(3), 'b').unwrap();
        assert_eq!(registry.get(SlotId(3)), Ok(&'b'));
    }

    #[test]
    fn slots_are_sorted_and_drain_empties() {
        let mut registry = SessionRegistry::new();
        for slot in [5, 1, 3] {
            registry.put(SlotId(slot), slot).unwrap();
        }
        assert_eq!(registry.slots(), vec![SlotId(1), SlotId(3), SlotId(5)]);
        assert_eq!(registry.drain().len(), 3);
        assert_eq!(registry.len(), 0);
    }
}
