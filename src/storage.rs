//! Concurrent storage for service registrations
//!
//! Uses DashMap for lock-free concurrent access, plus the helpers that move
//! instances in and out of their type-erased form.

use crate::descriptor::ServiceDescriptor;
use crate::pool::Pool;
use crate::{DiError, Injectable, Result};
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::{Any, TypeId};
use std::sync::Arc;

// =============================================================================
// Type-erased instances
// =============================================================================

/// A resolved instance with its type erased.
///
/// The payload is always an `Arc<C>` for the contract `C` it was produced
/// for, so unsized contracts such as `dyn Trait` survive the erasure.
pub type AnyInstance = Arc<dyn Any + Send + Sync>;

/// Erase a shared instance
#[inline]
pub fn erase<C: ?Sized + Injectable>(instance: Arc<C>) -> AnyInstance {
    Arc::new(instance)
}

/// Recover the shared instance stored by [`erase`]
#[inline]
pub fn downcast<C: ?Sized + Injectable>(instance: &AnyInstance) -> Result<Arc<C>> {
    (**instance)
        .downcast_ref::<Arc<C>>()
        .cloned()
        .ok_or_else(DiError::type_mismatch::<C>)
}

/// Address of the value behind a shared instance, used as its identity
#[inline]
pub fn instance_addr<C: ?Sized>(instance: &Arc<C>) -> usize {
    Arc::as_ptr(instance) as *const () as usize
}

/// Address of the value behind an erased `Arc<C>`
pub(crate) fn erased_addr<C: ?Sized + Injectable>(instance: &AnyInstance) -> usize {
    (**instance)
        .downcast_ref::<Arc<C>>()
        .map(instance_addr)
        .unwrap_or_default()
}

// =============================================================================
// Descriptor store
// =============================================================================

/// Thread-safe registry of service descriptors keyed by contract type
///
/// Registration order is preserved through each descriptor's sequence
/// number so snapshots are deterministic.
pub(crate) struct DescriptorStore {
    descriptors: DashMap<TypeId, ServiceDescriptor, RandomState>,
}

impl DescriptorStore {
    /// Create new empty storage with optimized shard count.
    ///
    /// Uses 8 shards; typical containers hold well under a hundred services.
    #[inline]
    pub fn new() -> Self {
        Self {
            descriptors: DashMap::with_capacity_and_hasher_and_shard_amount(
                0,
                RandomState::new(),
                8,
            ),
        }
    }

    /// Insert a descriptor, rejecting a second registration for the same contract
    pub fn insert(&self, descriptor: ServiceDescriptor) -> Result<()> {
        match self.descriptors.entry(descriptor.contract().id()) {
            Entry::Occupied(_) => Err(DiError::DuplicateRegistration {
                type_name: descriptor.contract().name(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(descriptor);
                Ok(())
            }
        }
    }

    /// Check if a contract is registered
    #[inline]
    pub fn contains(&self, type_id: &TypeId) -> bool {
        self.descriptors.contains_key(type_id)
    }

    /// Remove a descriptor
    #[inline]
    pub fn remove(&self, type_id: &TypeId) -> bool {
        self.descriptors.remove(type_id).is_some()
    }

    /// Get number of registered services
    #[inline]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// The pool backing a contract, if it is pool-backed
    pub fn pool(&self, type_id: &TypeId) -> Option<Arc<Pool>> {
        self.descriptors.get(type_id)?.pool.clone()
    }

    /// All descriptors in registration order
    pub fn snapshot(&self) -> Vec<ServiceDescriptor> {
        let mut all: Vec<_> = self.descriptors.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(ServiceDescriptor::seq);
        all
    }
}

impl Default for DescriptorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DescriptorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorStore")
            .field("count", &self.len())
            .finish()
    }
}
