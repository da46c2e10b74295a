//! Generational handle arena for reference-counted RHI objects.
//!
//! Buffers, textures, pipelines and render passes live in an [`Arena`] owned by the
//! [`Device`](crate::Device). Callers hold [`Handle`]s: a slot index plus the slot's
//! generation at insertion time. When the last reference to a slot is released the
//! record is removed and the generation is bumped, so every old handle to that slot
//! stops resolving even after the slot is recycled.
//!
//! # Example
//!
//! ```
//! use redlilium_rhi::arena::Arena;
//!
//! let mut arena = Arena::new();
//! let a = arena.insert("albedo");
//! arena.retain(a);
//! assert!(arena.release(a).is_none()); // one reference left
//! assert_eq!(arena.release(a), Some("albedo"));
//! assert!(arena.get(a).is_none());
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Typed handle into an [`Arena`].
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index inside the arena.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = std::any::type_name::<T>();
        let short = name.rsplit("::").next().unwrap_or(name);
        write!(f, "{short}({}@{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    refs: u32,
    value: Option<T>,
}

/// Slot storage with generation counters, a LIFO free list and per-slot reference counts.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    count: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            count: 0,
        }
    }

    /// Insert a value with a reference count of one.
    pub fn insert(&mut self, value: T) -> Handle<T> {
        self.count += 1;

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.refs = 1;
            slot.value = Some(value);
            Handle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                refs: 1,
                value: Some(value),
            });
            Handle::new(index, 0)
        }
    }

    fn slot(&self, handle: Handle<T>) -> Option<&Slot<T>> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
    }

    fn slot_mut(&mut self, handle: Handle<T>) -> Option<&mut Slot<T>> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
    }

    /// Whether `handle` still refers to a live value.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.slot(handle).is_some()
    }

    /// Resolve a handle.
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slot(handle).and_then(|slot| slot.value.as_ref())
    }

    /// Resolve a handle mutably.
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slot_mut(handle).and_then(|slot| slot.value.as_mut())
    }

    /// Add a reference. Returns false for a stale handle.
    pub fn retain(&mut self, handle: Handle<T>) -> bool {
        match self.slot_mut(handle) {
            Some(slot) => {
                slot.refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drop a reference. Returns the value once the last reference is gone.
    pub fn release(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slot_mut(handle)?;
        slot.refs -= 1;
        if slot.refs > 0 {
            return None;
        }

        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        self.count -= 1;
        value
    }

    /// Current reference count, or `None` for a stale handle.
    pub fn ref_count(&self, handle: Handle<T>) -> Option<u32> {
        self.slot(handle).map(|slot| slot.refs)
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the arena holds no live values.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterate over live values with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Handle::new(index as u32, slot.generation), value))
        })
    }

    /// Remove every live value regardless of reference counts.
    pub fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.count);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1);
                slot.refs = 0;
                self.free_list.push(index as u32);
                values.push(value);
            }
        }
        self.count = 0;
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut arena = Arena::new();
        let a = arena.insert(1u32);
        let b = arena.insert(2u32);
        assert_eq!(arena.get(a), Some(&1));
        assert_eq!(arena.get(b), Some(&2));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_stale_handle_after_recycle() {
        let mut arena = Arena::new();
        let old = arena.insert("old");
        assert_eq!(arena.release(old), Some("old"));

        let new = arena.insert("new");
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        assert!(arena.get(old).is_none());
        assert!(!arena.retain(old));
        assert_eq!(arena.get(new), Some(&"new"));
    }

    #[test]
    fn test_reference_counting() {
        let mut arena = Arena::new();
        let h = arena.insert(7);
        assert!(arena.retain(h));
        assert_eq!(arena.ref_count(h), Some(2));

        assert_eq!(arena.release(h), None);
        assert!(arena.contains(h));
        assert_eq!(arena.release(h), Some(7));
        assert!(!arena.contains(h));
        assert!(arena.is_empty());
    }

    #[test]
    fn test_release_stale_is_noop() {
        let mut arena = Arena::new();
        let h = arena.insert(3);
        arena.release(h);
        assert_eq!(arena.release(h), None);
        assert_eq!(arena.len(), 0);
    }

    #[test]
    fn test_iter_skips_free_slots() {
        let mut arena = Arena::new();
        let a = arena.insert('a');
        let _b = arena.insert('b');
        arena.release(a);
        let values: Vec<char> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec!['b']);
    }

    #[test]
    fn test_drain_invalidates_handles() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        arena.retain(a);
        assert_eq!(arena.drain(), vec![1]);
        assert!(arena.get(a).is_none());
        assert!(arena.is_empty());
    }
}
