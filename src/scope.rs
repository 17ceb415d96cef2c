//! Scopes
//!
//! A [`Scope`] is a caller-owned unit of work. It holds one instance per
//! scoped contract and remembers the pool slots it leased so they can be
//! released when the scope is disposed.

use crate::pool::{Pool, PoolLease, PoolMode};
use crate::provider::ServiceProvider;
use crate::storage::{AnyInstance, downcast, erase};
use crate::{DiError, Injectable, Result, ServiceKey};
use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::any::TypeId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::debug;

/// Unique scope identifier.
///
/// Each scope gets a unique ID for tracking and debugging. Pools record the
/// owning scope by this ID; they never hold the scope itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Generate a new unique scope ID.
    #[inline]
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// Leases taken from one pool
struct PoolLeases {
    pool: Arc<Pool>,
    leases: Vec<PoolLease>,
}

struct ScopeInner {
    id: ScopeId,
    provider: Arc<ServiceProvider>,
    services: DashMap<TypeId, Arc<OnceCell<AnyInstance>>, RandomState>,
    leases: Mutex<Vec<PoolLeases>>,
    disposed: AtomicBool,
}

impl ScopeInner {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let leases = std::mem::take(&mut *self.leases.lock());
        let mut _released = 0usize;
        for entry in &leases {
            for lease in &entry.leases {
                if entry.pool.release(lease) {
                    _released += 1;
                }
            }
        }
        self.services.clear();

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            scope_id = self.id.id(),
            released = _released,
            "Disposed scope"
        );
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A unit of work bounding scoped services and pooled leases.
///
/// Cloning a scope yields another handle to the same scope. The scope is
/// disposed explicitly with [`Scope::dispose`] or when the last handle is
/// dropped. Dispose only after every in-flight resolution against the scope
/// has completed.
///
/// # Examples
///
/// ```rust
/// use service_container::{Constructible, Constructor, Container};
///
/// struct RequestContext;
///
/// impl Constructible for RequestContext {
///     fn constructors() -> Vec<Constructor<Self>> {
///         vec![Constructor::new(|_: ()| RequestContext)]
///     }
/// }
///
/// let container = Container::new();
/// container.add_scoped::<RequestContext, RequestContext>().unwrap();
///
/// let scope = container.create_scope().unwrap();
/// let a = scope.get::<RequestContext>().unwrap();
/// let b = scope.get::<RequestContext>().unwrap();
/// assert!(std::sync::Arc::ptr_eq(&a, &b));
///
/// scope.dispose();
/// ```
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub(crate) fn new(provider: Arc<ServiceProvider>) -> Self {
        let id = ScopeId::next();

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            scope_id = id.id(),
            "Creating scope"
        );

        Self {
            inner: Arc::new(ScopeInner {
                id,
                provider,
                services: DashMap::with_capacity_and_hasher_and_shard_amount(
                    0,
                    RandomState::new(),
                    4,
                ),
                leases: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// The scope identifier
    #[inline]
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// The provider this scope resolves from
    #[inline]
    pub fn provider(&self) -> &Arc<ServiceProvider> {
        &self.inner.provider
    }

    /// Resolve a service within this scope.
    ///
    /// Fails with `ScopeDisposed` once the scope has been disposed.
    #[inline]
    pub fn get<C: ?Sized + Injectable>(&self) -> Result<Arc<C>> {
        self.check_live(ServiceKey::of::<C>())?;
        self.inner.provider.get::<C>(Some(self))
    }

    /// Resolve a service within this scope, `None` if it is not registered
    #[inline]
    pub fn try_get<C: ?Sized + Injectable>(&self) -> Result<Option<Arc<C>>> {
        self.check_live(ServiceKey::of::<C>())?;
        self.inner.provider.try_get::<C>(Some(self))
    }

    #[inline]
    fn check_live(&self, key: ServiceKey) -> Result<()> {
        if self.is_disposed() {
            return Err(DiError::ScopeDisposed {
                type_name: key.name(),
            });
        }
        Ok(())
    }

    /// Place an instance in the scope cache.
    ///
    /// Returns `false` if the scope already holds an instance for `C` or has
    /// been disposed.
    pub fn put_item<C: ?Sized + Injectable>(&self, instance: Arc<C>) -> bool {
        if self.is_disposed() {
            return false;
        }
        let cell = self.cell(TypeId::of::<C>());
        cell.set(erase(instance)).is_ok()
    }

    /// The cached instance for `C`, if this scope has resolved one
    pub fn cached<C: ?Sized + Injectable>(&self) -> Option<Arc<C>> {
        let cell = self.inner.services.get(&TypeId::of::<C>())?;
        cell.get().and_then(|i| downcast::<C>(i).ok())
    }

    /// Return the cached instance for `key`, creating it with `init` once
    pub(crate) fn get_or_init(
        &self,
        key: ServiceKey,
        init: impl FnOnce() -> Result<AnyInstance>,
    ) -> Result<AnyInstance> {
        self.check_live(key)?;
        let cell = self.cell(key.id());
        cell.get_or_try_init(init).map(Arc::clone)
    }

    fn cell(&self, type_id: TypeId) -> Arc<OnceCell<AnyInstance>> {
        Arc::clone(&self.inner.services.entry(type_id).or_default())
    }

    /// Record a lease so it is released when the scope is disposed.
    ///
    /// Scoped pools track only their first lease per scope; transient pools
    /// track every lease. A lease offered to a disposed scope is released
    /// straight away and the call fails with `ScopeDisposed`.
    pub(crate) fn use_pool_item(&self, pool: &Arc<Pool>, lease: PoolLease) -> Result<()> {
        let mut tracked = self.inner.leases.lock();
        // dispose() sets the flag before taking this lock
        if self.is_disposed() {
            drop(tracked);
            pool.release(&lease);
            return Err(DiError::ScopeDisposed {
                type_name: pool.contract(),
            });
        }
        match tracked.iter_mut().find(|e| e.pool.id() == pool.id()) {
            Some(entry) => {
                if pool.mode() == PoolMode::Transient {
                    entry.leases.push(lease);
                }
            }
            None => tracked.push(PoolLeases {
                pool: Arc::clone(pool),
                leases: vec![lease],
            }),
        }
        Ok(())
    }

    /// Number of pool leases this scope will release on disposal
    pub fn lease_count(&self) -> usize {
        self.inner.leases.lock().iter().map(|e| e.leases.len()).sum()
    }

    /// Release every leased pool slot and drop scoped instances.
    ///
    /// Calling this more than once is a no-op.
    #[inline]
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// True once [`dispose`](Scope::dispose) has run
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("services", &self.inner.services.len())
            .field("leases", &self.lease_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PoolOptions;
    use crate::descriptor::ServiceDescriptor;

    struct Session(u32);

    fn provider() -> Arc<ServiceProvider> {
        Arc::new(ServiceProvider::build(Vec::<ServiceDescriptor>::new(), None).unwrap())
    }

    #[test]
    fn test_scope_ids_unique() {
        let s1 = ScopeId::next();
        let s2 = ScopeId::next();
        assert_ne!(s1, s2);
        assert!(s1.to_string().starts_with("scope-"));
    }

    #[test]
    fn test_put_item_is_write_once() {
        let scope = Scope::new(provider());
        assert!(scope.put_item(Arc::new(Session(1))));
        assert!(!scope.put_item(Arc::new(Session(2))));
        assert_eq!(scope.cached::<Session>().unwrap().0, 1);
    }

    #[test]
    fn test_get_or_init_runs_once() {
        let scope = Scope::new(provider());
        let key = ServiceKey::of::<Session>();
        let mut calls = 0;
        let first = scope
            .get_or_init(key, || {
                calls += 1;
                Ok(erase(Arc::new(Session(7))))
            })
            .unwrap();
        let second = scope
            .get_or_init(key, || Ok(erase(Arc::new(Session(8)))))
            .unwrap();
        assert_eq!(calls, 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_dispose_releases_each_lease_once() {
        let pool = Arc::new(Pool::new::<Session>(PoolMode::Transient, PoolOptions::default()));
        let create = || -> Result<AnyInstance> { Ok(erase(Arc::new(Session(0)))) };
        let scope = Scope::new(provider());

        for _ in 0..3 {
            let lease = pool.get_and_lock(Some(scope.id()), &create).unwrap().unwrap();
            scope.use_pool_item(&pool, lease).unwrap();
        }
        assert_eq!(scope.lease_count(), 3);
        assert_eq!(pool.status().locked, 3);

        scope.dispose();
        assert_eq!(pool.status().locked, 0);
        assert_eq!(scope.lease_count(), 0);

        scope.dispose();
        assert!(scope.is_disposed());
        assert_eq!(pool.status().slots, 3);
    }

    #[test]
    fn test_scoped_pool_tracks_first_lease_only() {
        let pool = Arc::new(Pool::new::<Session>(PoolMode::Scoped, PoolOptions::default()));
        let create = || -> Result<AnyInstance> { Ok(erase(Arc::new(Session(0)))) };
        let scope = Scope::new(provider());

        for _ in 0..2 {
            let lease = pool.get_and_lock(Some(scope.id()), &create).unwrap().unwrap();
            scope.use_pool_item(&pool, lease).unwrap();
        }
        assert_eq!(scope.lease_count(), 1);
        assert_eq!(pool.status().slots, 1);
    }

    #[test]
    fn test_lease_offered_after_dispose_is_released() {
        let pool = Arc::new(Pool::new::<Session>(PoolMode::Scoped, PoolOptions::default()));
        let create = || -> Result<AnyInstance> { Ok(erase(Arc::new(Session(0)))) };
        let scope = Scope::new(provider());
        scope.dispose();

        let lease = pool.get_and_lock(Some(scope.id()), &create).unwrap().unwrap();
        let err = scope.use_pool_item(&pool, lease).err().unwrap();
        assert!(matches!(err, DiError::ScopeDisposed { .. }));
        assert_eq!(scope.lease_count(), 0);
        assert_eq!(pool.status().locked, 0);

        let key = ServiceKey::of::<Session>();
        let err = scope.get_or_init(key, || Ok(erase(Arc::new(Session(1))))).err().unwrap();
        assert!(matches!(err, DiError::ScopeDisposed { .. }));
        assert!(!scope.put_item(Arc::new(Session(2))));
    }

    #[test]
    fn test_drop_disposes() {
        let pool = Arc::new(Pool::new::<Session>(PoolMode::Transient, PoolOptions::default()));
        let create = || -> Result<AnyInstance> { Ok(erase(Arc::new(Session(0)))) };
        {
            let scope = Scope::new(provider());
            let lease = pool.get_and_lock(Some(scope.id()), &create).unwrap().unwrap();
            scope.use_pool_item(&pool, lease).unwrap();
        }
        assert_eq!(pool.status().locked, 0);
    }
}
