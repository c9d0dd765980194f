//! Generation-tagged handle arena.
//!
//! The binding surface identifies every object by an opaque integer. A
//! `Handle` packs (slot index, generation); closing an object bumps the
//! slot's generation, so a stale handle fails a lookup instead of
//! reaching freed state.

use std::sync::Arc;

use parking_lot::RwLock;

/// An opaque object handle: slot index in the low 32 bits, generation in
/// the high 32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    /// The raw integer a binding layer carries around.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Rebuild a handle from its raw integer.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    const fn pack(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    const fn index(self) -> u32 {
        self.0 as u32
    }

    const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<Arc<T>>,
}

/// A thread-safe arena of reference-counted objects addressed by handle.
pub struct HandleTable<T> {
    inner: RwLock<Slots<T>>,
}

struct Slots<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    /// Insert an object, returning its handle.
    pub fn insert(&self, value: T) -> Handle {
        let value = Arc::new(value);
        let mut inner = self.inner.write();
        if let Some(index) = inner.free.pop() {
            let slot = &mut inner.slots[index as usize];
            slot.value = Some(value);
            Handle::pack(index, slot.generation)
        } else {
            let index = inner.slots.len() as u32;
            inner.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            Handle::pack(index, 0)
        }
    }

    /// Look up a live object.
    ///
    /// Returns `None` for a slot that was freed (generation mismatch) or
    /// never existed.
    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<Arc<T>> {
        let inner = self.inner.read();
        let slot = inner.slots.get(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.clone()
    }

    /// Remove an object, invalidating its handle.
    ///
    /// Idempotent: a second remove of the same handle returns `None`.
    pub fn remove(&self, handle: Handle) -> Option<Arc<T>> {
        let mut inner = self.inner.write();
        let slot = inner.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;
        // Bump the generation so the old handle can never resolve again.
        slot.generation = slot.generation.wrapping_add(1);
        inner.free.push(handle.index());
        Some(value)
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.slots.len() - inner.free.len()
    }

    /// Check whether the table holds no live objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let table = HandleTable::new();
        let h = table.insert(42u32);
        assert_eq!(*table.get(h).unwrap(), 42);
        assert_eq!(table.len(), 1);

        assert_eq!(*table.remove(h).unwrap(), 42);
        assert!(table.get(h).is_none());
        assert!(table.remove(h).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn stale_handle_rejected_after_reuse() {
        let table = HandleTable::new();
        let h1 = table.insert("first");
        table.remove(h1);

        // Slot is reused with a bumped generation.
        let h2 = table.insert("second");
        assert_eq!(h1.index(), h2.index());
        assert_ne!(h1.raw(), h2.raw());

        assert!(table.get(h1).is_none());
        assert_eq!(*table.get(h2).unwrap(), "second");
    }

    #[test]
    fn raw_round_trip() {
        let table = HandleTable::new();
        let h = table.insert(7u8);
        let rebuilt = Handle::from_raw(h.raw());
        assert_eq!(*table.get(rebuilt).unwrap(), 7);
    }
}
