//! Arena allocation infrastructure.
//!
//! Every IR entity of a method compilation (nodes, statements, blocks,
//! locals, layouts) lives in an [`Arena`] owned by the compilation context.
//! Entities refer to each other through small copyable handles instead of
//! references, which gives us:
//!
//! - **Fast allocation**: O(1) push onto a contiguous vector
//! - **Cheap handles**: 4-byte ids that are `Copy` and hashable
//! - **Simple deallocation**: everything is freed when the compilation ends
//! - **No dangling links**: a handle stays valid for the arena's lifetime
//!
//! # Usage
//!
//! ```rust
//! use jitmorph::arena::{Arena, ArenaId};
//! use jitmorph::define_id;
//!
//! define_id!(
//!     /// Example handle.
//!     pub struct ThingId, "T"
//! );
//!
//! let mut arena: Arena<ThingId, &str> = Arena::new();
//! let a = arena.alloc("first");
//! let b = arena.alloc("second");
//! assert_eq!(arena[a], "first");
//! assert_eq!(b.index(), 1);
//! ```
//!
//! Nothing is ever removed from an arena. Rewrites that change the shape of
//! an entity swap a freshly built value into the existing slot with
//! [`Arena::replace`]; entities that become unreachable simply stay behind
//! until the compilation is dropped.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Index, IndexMut};

/// A typed handle into an [`Arena`].
pub trait ArenaId: Copy + Eq + Hash + fmt::Debug {
    /// Build a handle from a raw arena index.
    fn from_index(index: usize) -> Self;

    /// The raw arena index of this handle.
    fn index(self) -> usize;
}

/// Define a `u32` newtype handle implementing [`ArenaId`] and `Display`.
///
/// The second argument is the dump prefix (`"V"` prints `V03`).
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* $vis:vis struct $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis struct $name(pub u32);

        impl $name {
            /// Create a new handle from a raw index.
            pub const fn new(index: u32) -> Self {
                $name(index)
            }
        }

        impl $crate::arena::ArenaId for $name {
            fn from_index(index: usize) -> Self {
                $name(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, concat!($prefix, "{:02}"), self.0)
            }
        }
    };
}

/// A typed, append-only arena addressed by handles of type `I`.
pub struct Arena<I, T> {
    items: Vec<T>,
    _marker: PhantomData<fn(I) -> I>,
}

impl<I: ArenaId, T> Arena<I, T> {
    /// Create a new empty arena.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Create a new arena with room for `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            _marker: PhantomData,
        }
    }

    /// Allocate a value in the arena and return its handle.
    pub fn alloc(&mut self, value: T) -> I {
        let id = I::from_index(self.items.len());
        self.items.push(value);
        id
    }

    /// Get a value by handle.
    pub fn get(&self, id: I) -> Option<&T> {
        self.items.get(id.index())
    }

    /// Get a mutable value by handle.
    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.items.get_mut(id.index())
    }

    /// Swap a new value into an existing slot, returning the old value.
    ///
    /// Every holder of `id` observes the new value at once.
    pub fn replace(&mut self, id: I, value: T) -> T {
        mem::replace(&mut self.items[id.index()], value)
    }

    /// Check whether a handle was allocated by this arena.
    pub fn contains(&self, id: I) -> bool {
        id.index() < self.items.len()
    }

    /// Number of allocated values.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing has been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over all handles in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = I> + '_ {
        (0..self.items.len()).map(I::from_index)
    }

    /// Iterate over all values with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (I::from_index(i), item))
    }

    /// Iterate mutably over all values with their handles.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (I, &mut T)> {
        self.items
            .iter_mut()
            .enumerate()
            .map(|(i, item)| (I::from_index(i), item))
    }

    /// Get statistics about the arena.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            num_items: self.items.len(),
            total_capacity: self.items.capacity() * mem::size_of::<T>(),
            total_used: self.items.len() * mem::size_of::<T>(),
        }
    }
}

impl<I: ArenaId, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: ArenaId, T: Clone> Clone for Arena<I, T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            _marker: PhantomData,
        }
    }
}

impl<I: ArenaId, T: fmt::Debug> fmt::Debug for Arena<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<I: ArenaId, T> Index<I> for Arena<I, T> {
    type Output = T;

    fn index(&self, id: I) -> &T {
        &self.items[id.index()]
    }
}

impl<I: ArenaId, T> IndexMut<I> for Arena<I, T> {
    fn index_mut(&mut self, id: I) -> &mut T {
        &mut self.items[id.index()]
    }
}

/// Statistics about arena usage.
#[derive(Debug, Clone, Copy)]
pub struct ArenaStats {
    /// Number of values allocated.
    pub num_items: usize,
    /// Total capacity in bytes.
    pub total_capacity: usize,
    /// Total used bytes.
    pub total_used: usize,
}

impl ArenaStats {
    /// Calculate utilization as a percentage.
    pub fn utilization(&self) -> f64 {
        if self.total_capacity == 0 {
            0.0
        } else {
            (self.total_used as f64 / self.total_capacity as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    define_id!(
        /// Test handle.
        struct TestId, "T"
    );

    #[test]
    fn test_arena_basic() {
        let mut arena: Arena<TestId, i32> = Arena::new();
        let a = arena.alloc(1);
        let b = arena.alloc(2);
        let c = arena.alloc(3);

        assert_eq!(arena[a], 1);
        assert_eq!(arena[b], 2);
        assert_eq!(arena[c], 3);
        assert_eq!(arena.len(), 3);
    }

    #[test]
    fn test_arena_many_allocations() {
        let mut arena: Arena<TestId, u64> = Arena::new();
        let ids: Vec<_> = (0..10000).map(|i| arena.alloc(i)).collect();

        for (i, id) in ids.iter().enumerate() {
            assert_eq!(arena[*id], i as u64);
            assert_eq!(id.index(), i);
        }
    }

    #[test]
    fn test_arena_replace_is_visible_through_handle() {
        let mut arena: Arena<TestId, &str> = Arena::new();
        let id = arena.alloc("old");
        let previous = arena.replace(id, "new");

        assert_eq!(previous, "old");
        assert_eq!(arena[id], "new");
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_arena_contains() {
        let mut arena: Arena<TestId, u8> = Arena::new();
        let id = arena.alloc(7);
        assert!(arena.contains(id));
        assert!(!arena.contains(TestId::new(5)));
    }

    #[test]
    fn test_id_display() {
        assert_eq!(TestId::new(3).to_string(), "T03");
        assert_eq!(TestId::new(123).to_string(), "T123");
    }

    #[test]
    fn test_arena_stats() {
        let mut arena: Arena<TestId, u64> = Arena::with_capacity(4);
        arena.alloc(1);
        arena.alloc(2);

        let stats = arena.stats();
        assert_eq!(stats.num_items, 2);
        assert_eq!(stats.total_used, 16);
        assert!(stats.utilization() > 0.0);
    }
}
