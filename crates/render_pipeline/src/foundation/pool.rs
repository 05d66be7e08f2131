//! # Object Pools
//!
//! Recycles short-lived objects (batchable elements, batches) that the
//! pipeline would otherwise allocate and drop every rebuild.
//!
//! ## Architecture
//!
//! ```text
//! Pools (owned by the renderer, passed by &mut)
//! ├── Pool<BatchableElement>
//! ├── Pool<Batch>
//! └── Pool<T: Poolable> ... created on first use, keyed by TypeId
//! ```
//!
//! An object handed back with [`Pools::put`] is reset before it is stored, so
//! [`Pools::get`] always returns an object that is indistinguishable from a
//! freshly constructed one apart from retained heap capacity.

use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Objects that can be recycled through a [`Pool`]
pub trait Poolable: Default + 'static {
    /// Return the object to its default observable state
    ///
    /// Implementations should keep heap capacity (e.g. `Vec::clear`) so a
    /// reused object does not reallocate.
    fn reset(&mut self);
}

/// Usage counters for a single pool
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects constructed because the pool was empty
    pub created: usize,
    /// Objects handed out from the free list
    pub reused: usize,
    /// Objects returned to the pool
    pub returned: usize,
    /// Objects currently waiting in the free list
    pub available: usize,
}

/// Free list of recyclable objects of one type
#[derive(Debug)]
pub struct Pool<T: Poolable> {
    free: Vec<T>,
    stats: PoolStats,
}

impl<T: Poolable> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Poolable> Pool<T> {
    /// Create an empty pool
    pub const fn new() -> Self {
        Self {
            free: Vec::new(),
            stats: PoolStats {
                created: 0,
                reused: 0,
                returned: 0,
                available: 0,
            },
        }
    }

    /// Take an object from the pool, constructing one if the pool is empty
    pub fn get(&mut self) -> T {
        if let Some(item) = self.free.pop() {
            self.stats.reused += 1;
            self.stats.available = self.free.len();
            item
        } else {
            self.stats.created += 1;
            T::default()
        }
    }

    /// Reset an object and store it for reuse
    pub fn put(&mut self, mut item: T) {
        item.reset();
        self.free.push(item);
        self.stats.returned += 1;
        self.stats.available = self.free.len();
    }

    /// Number of objects waiting in the free list
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Usage counters
    pub const fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Drop every pooled object
    pub fn clear(&mut self) {
        self.free.clear();
        self.stats.available = 0;
    }
}

/// Registry of typed pools
///
/// Owned by the renderer and handed to pipes by reference; there is no
/// process-wide pool state.
#[derive(Default)]
pub struct Pools {
    pools: HashMap<TypeId, Box<dyn Any>>,
}

impl std::fmt::Debug for Pools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pools")
            .field("pool_count", &self.pools.len())
            .finish()
    }
}

impl Pools {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The pool for `T`, created on first access
    pub fn pool<T: Poolable>(&mut self) -> &mut Pool<T> {
        self.pools
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Pool::<T>::new()))
            .downcast_mut::<Pool<T>>()
            .expect("pool registry is keyed by the pooled type")
    }

    /// Take an object of type `T`
    pub fn get<T: Poolable>(&mut self) -> T {
        self.pool::<T>().get()
    }

    /// Return an object of type `T`
    pub fn put<T: Poolable>(&mut self, item: T) {
        self.pool::<T>().put(item);
    }

    /// Usage counters for `T`'s pool, if it has been used
    pub fn stats<T: Poolable>(&self) -> Option<PoolStats> {
        self.pools
            .get(&TypeId::of::<T>())
            .and_then(|pool| pool.downcast_ref::<Pool<T>>())
            .map(Pool::stats)
    }

    /// Drop every pooled object of every type
    pub fn clear(&mut self) {
        self.pools.clear();
    }
}
