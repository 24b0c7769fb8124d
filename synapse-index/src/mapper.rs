//! Entity id interning.
//!
//! Posting sets and HNSW neighbor lists hold compact u32 keys instead of
//! string ids; this mapper is the shared bijection. Keys are never reused
//! within a process lifetime so a stale key can only miss, not alias.

use dashmap::DashMap;
use parking_lot::RwLock;
use synapse_core::SynapseId;

/// Bijection between entity ids and compact integer keys.
#[derive(Debug, Default)]
pub struct EntityIdMapper {
    to_key: DashMap<SynapseId, u32>,
    to_id: RwLock<Vec<Option<SynapseId>>>,
}

impl EntityIdMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern an id, returning its key; idempotent.
    pub fn intern(&self, id: SynapseId) -> u32 {
        if let Some(existing) = self.to_key.get(&id) {
            return *existing;
        }
        let mut table = self.to_id.write();
        // Re-check under the write lock to keep the bijection
        if let Some(existing) = self.to_key.get(&id) {
            return *existing;
        }
        let key = table.len() as u32;
        table.push(Some(id));
        self.to_key.insert(id, key);
        key
    }

    /// Look up the key for an id without interning.
    pub fn key_of(&self, id: SynapseId) -> Option<u32> {
        self.to_key.get(&id).map(|k| *k)
    }

    /// Resolve a key back to its id.
    pub fn resolve(&self, key: u32) -> Option<SynapseId> {
        self.to_id.read().get(key as usize).copied().flatten()
    }

    /// Drop an id from the bijection; its key is retired, not recycled.
    pub fn remove(&self, id: SynapseId) -> Option<u32> {
        let (_, key) = self.to_key.remove(&id)?;
        if let Some(slot) = self.to_id.write().get_mut(key as usize) {
            *slot = None;
        }
        Some(key)
    }

    /// Number of live mappings.
    pub fn len(&self) -> usize {
        self.to_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_idempotent() {
        let mapper = EntityIdMapper::new();
        let id = SynapseId::new();
        let key = mapper.intern(id);
        assert_eq!(mapper.intern(id), key);
        assert_eq!(mapper.resolve(key), Some(id));
        assert_eq!(mapper.key_of(id), Some(key));
    }

    #[test]
    fn test_keys_not_recycled() {
        let mapper = EntityIdMapper::new();
        let a = SynapseId::new();
        let key_a = mapper.intern(a);
        mapper.remove(a);
        assert_eq!(mapper.resolve(key_a), None);

        let b = SynapseId::new();
        let key_b = mapper.intern(b);
        assert_ne!(key_a, key_b);
    }

    #[test]
    fn test_remove_missing() {
        let mapper = EntityIdMapper::new();
        assert_eq!(mapper.remove(SynapseId::new()), None);
    }
}
