//! Generation-checked handle table.
//!
//! The overlay client reports every completion with a small opaque context
//! value so the loop can find the object the completion belongs to.  Instead
//! of smuggling raw pointers through that context, the loop stores its
//! objects in a [`HandleTable`] and hands the overlay a [`HandleId`].
//!
//! # How generation checking works
//!
//! A `HandleId` is an `(index, generation)` pair.  The table keeps one slot
//! per index and bumps the slot's generation every time its value is removed.
//! A lookup succeeds only when both the index and the generation match, so an
//! id that outlived its object (a *stale* id) resolves to `None` even after
//! the slot has been reused for a different object.
//!
//! ```text
//! insert(a) -> #0v0      remove(#0v0)      insert(b) -> #0v1
//!                        slot 0: gen 1     get(#0v0) == None   (stale)
//!                                          get(#0v1) == Some(b)
//! ```

use std::fmt;

/// Opaque, copyable identifier for a value stored in a [`HandleTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl HandleId {
    /// Builds an id from its raw parts.
    ///
    /// Useful for collaborators that need to round-trip the id through an
    /// integer context value; the table still validates the generation.
    pub fn from_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the owning table.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation the slot had when this id was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Packs the id into a single `u64` (`generation` in the high half).
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Inverse of [`HandleId::to_bits`].
    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of values addressed by generation-checked [`HandleId`]s.
///
/// Removed slots are recycled (LIFO) so the table does not grow without bound
/// when connections churn.
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> HandleTable<T> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Stores `value` and returns the id that addresses it.
    pub fn insert(&mut self, value: T) -> HandleId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return HandleId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        HandleId {
            index,
            generation: 0,
        }
    }

    /// Returns the value for `id`, or `None` if the id is stale or unknown.
    pub fn get(&self, id: HandleId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Mutable variant of [`HandleTable::get`].
    pub fn get_mut(&mut self, id: HandleId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Returns `true` if `id` currently addresses a live value.
    pub fn contains(&self, id: HandleId) -> bool {
        self.get(id).is_some()
    }

    /// Removes and returns the value for `id`.
    ///
    /// The slot's generation is bumped so every copy of `id` becomes stale.
    pub fn remove(&mut self, id: HandleId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Ids of all live values, in slot order.
    pub fn ids(&self) -> Vec<HandleId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Iterates over live values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (HandleId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    HandleId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Removes every live value, returning them in slot order.
    pub fn drain(&mut self) -> Vec<(HandleId, T)> {
        let ids = self.ids();
        ids.into_iter()
            .filter_map(|id| self.remove(id).map(|value| (id, value)))
            .collect()
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("len", &self.len)
            .field("capacity", &self.slots.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
