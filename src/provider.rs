//! Resolution facade
//!
//! A [`ServiceProvider`] is built from a snapshot of descriptors. Building
//! binds each implementation to its constructor and links every parameter to
//! the descriptor that satisfies it, so a broken graph fails here rather
//! than halfway through creating an object. Resolution then dispatches on
//! the descriptor's lifetime.

use crate::constructor::{Arg, Param, ParamKind, select_constructor};
use crate::descriptor::{BuiltDescriptor, ServiceDescriptor};
use crate::factory::InstanceFactory;
use crate::options::OptionsSource;
use crate::pool::{Pool, PoolMode, PoolStatus};
use crate::scope::Scope;
use crate::storage::{AnyInstance, downcast, instance_addr};
use crate::{DiError, Injectable, Lifetime, Result, ServiceKey};
use ahash::RandomState;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

// =============================================================================
// Re-entrancy guard
// =============================================================================

thread_local! {
    static RESOLVING: RefCell<Vec<ServiceKey>> = const { RefCell::new(Vec::new()) };
    static SINGLETON_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Marks a contract as being resolved on this thread.
///
/// Entering a contract that is already on the stack means a factory asked
/// for one of its own ancestors.
struct ResolutionGuard;

impl ResolutionGuard {
    fn enter(key: ServiceKey) -> Result<Self> {
        RESOLVING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&key) {
                let service = stack.last().copied().unwrap_or(key);
                return Err(DiError::CircularReference {
                    service: service.name(),
                    circular: key.name(),
                });
            }
            stack.push(key);
            Ok(ResolutionGuard)
        })
    }
}

impl Drop for ResolutionGuard {
    fn drop(&mut self) {
        RESOLVING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Marks that a singleton is being built on this thread
struct SingletonBuild;

impl SingletonBuild {
    fn enter() -> Self {
        SINGLETON_DEPTH.with(|depth| depth.set(depth.get() + 1));
        SingletonBuild
    }

    fn active() -> bool {
        SINGLETON_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for SingletonBuild {
    fn drop(&mut self) {
        SINGLETON_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Handed to factory functions so they can resolve their own dependencies
/// within the current scope.
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    provider: &'a ServiceProvider,
    scope: Option<&'a Scope>,
}

impl<'a> Resolver<'a> {
    /// Resolve a service
    #[inline]
    pub fn get<C: ?Sized + Injectable>(&self) -> Result<Arc<C>> {
        self.provider.get::<C>(self.scope)
    }

    /// Resolve a service, `None` if it is not registered
    #[inline]
    pub fn try_get<C: ?Sized + Injectable>(&self) -> Result<Option<Arc<C>>> {
        self.provider.try_get::<C>(self.scope)
    }

    /// The scope the resolution runs in
    #[inline]
    pub fn scope(&self) -> Option<&'a Scope> {
        self.scope
    }

    /// The provider
    #[inline]
    pub fn provider(&self) -> &'a ServiceProvider {
        self.provider
    }
}

// =============================================================================
// ServiceProvider
// =============================================================================

/// Resolves services from a built set of descriptors
pub struct ServiceProvider {
    services: DashMap<TypeId, Arc<BuiltDescriptor>, RandomState>,
    options_source: Option<Arc<dyn OptionsSource>>,
}

impl ServiceProvider {
    /// Bind constructors and link parameter descriptors.
    ///
    /// Fails with `NoPublicConstructor`/`NoUsableConstructor` when an
    /// implementation cannot be bound, `MissingReference` when a bound
    /// parameter has no registration and `CircularReference` when the links
    /// form a cycle.
    pub(crate) fn build(
        descriptors: Vec<ServiceDescriptor>,
        options_source: Option<Arc<dyn OptionsSource>>,
    ) -> Result<Self> {
        let registered: HashSet<TypeId, RandomState> =
            descriptors.iter().map(|d| d.contract().id()).collect();

        let provider = Self {
            services: DashMap::with_capacity_and_hasher_and_shard_amount(
                descriptors.len(),
                RandomState::new(),
                8,
            ),
            options_source,
        };

        for descriptor in descriptors {
            let constructor = if descriptor.needs_constructor() {
                let metadata = descriptor.metadata.as_ref().ok_or_else(|| {
                    DiError::Internal(format!(
                        "{} has no constructor metadata",
                        descriptor.implementation()
                    ))
                })?;
                let selected = select_constructor(descriptor.contract(), metadata, |key| {
                    registered.contains(&key.id())
                })?;
                Some(selected.ok_or(DiError::NoUsableConstructor {
                    service: descriptor.contract().name(),
                    implementation: descriptor.implementation().name(),
                })?)
            } else {
                None
            };

            provider.services.insert(
                descriptor.contract().id(),
                Arc::new(BuiltDescriptor::new(descriptor, constructor)),
            );
        }

        let roots: Vec<_> = provider.services.iter().map(|r| Arc::clone(r.value())).collect();
        let mut done = HashSet::with_hasher(RandomState::new());
        let mut path = Vec::new();
        for root in &roots {
            provider.link(root, &mut path, &mut done)?;
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            service_count = provider.services.len(),
            "Built service provider"
        );

        Ok(provider)
    }

    fn link(
        &self,
        node: &Arc<BuiltDescriptor>,
        path: &mut Vec<TypeId>,
        done: &mut HashSet<TypeId, RandomState>,
    ) -> Result<()> {
        let id = node.key().id();
        if done.contains(&id) {
            return Ok(());
        }
        path.push(id);

        let mut links = Vec::with_capacity(node.parameters.len());
        for param in &node.parameters {
            let linked = match param.kind {
                ParamKind::Scope => None,
                ParamKind::Options { .. } => self.lookup(&param.key),
                ParamKind::Service | ParamKind::Scalar => {
                    Some(self.lookup(&param.key).ok_or(DiError::MissingReference {
                        service: node.key().name(),
                        missing: param.key.name(),
                    })?)
                }
            };
            if let Some(child) = &linked {
                if path.contains(&child.key().id()) {
                    return Err(DiError::CircularReference {
                        service: node.key().name(),
                        circular: child.key().name(),
                    });
                }
                self.link(child, path, done)?;
            }
            links.push(linked);
        }

        path.pop();
        let _ = node.parameter_descriptors.set(links);
        done.insert(id);
        Ok(())
    }

    #[inline]
    fn lookup(&self, key: &ServiceKey) -> Option<Arc<BuiltDescriptor>> {
        self.services.get(&key.id()).map(|d| Arc::clone(d.value()))
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Resolve a service, optionally within a scope
    #[inline]
    pub fn get<C: ?Sized + Injectable>(&self, scope: Option<&Scope>) -> Result<Arc<C>> {
        let instance = self.resolve(ServiceKey::of::<C>(), scope)?;
        downcast::<C>(&instance)
    }

    /// Resolve a service, `Ok(None)` if it is not registered.
    ///
    /// Errors other than a missing registration are still returned.
    #[inline]
    pub fn try_get<C: ?Sized + Injectable>(&self, scope: Option<&Scope>) -> Result<Option<Arc<C>>> {
        if !self.contains::<C>() {
            return Ok(None);
        }
        self.get::<C>(scope).map(Some)
    }

    /// Check if a contract is registered
    #[inline]
    pub fn contains<C: ?Sized + 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<C>())
    }

    /// Number of resolvable contracts
    #[inline]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Create a new scope resolving from this provider
    #[inline]
    pub fn create_scope(self: &Arc<Self>) -> Scope {
        Scope::new(Arc::clone(self))
    }

    /// Release a pooled instance of `C` back to its pool.
    ///
    /// Returns `false` if `C` is not pool-backed or the instance is not
    /// currently leased.
    pub fn release_pool_item<C: ?Sized + Injectable>(&self, instance: &Arc<C>) -> bool {
        self.pool_of(&TypeId::of::<C>())
            .is_some_and(|pool| pool.release_instance(instance_addr(instance)))
    }

    /// Occupancy of the pool backing `C`
    pub fn pool_status<C: ?Sized + 'static>(&self) -> Option<PoolStatus> {
        self.pool_of(&TypeId::of::<C>()).map(|pool| pool.status())
    }

    fn pool_of(&self, type_id: &TypeId) -> Option<Arc<Pool>> {
        self.services.get(type_id)?.source.pool.clone()
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    pub(crate) fn resolve(&self, key: ServiceKey, scope: Option<&Scope>) -> Result<AnyInstance> {
        let descriptor = self.lookup(&key).ok_or(DiError::ServiceNotFound {
            type_name: key.name(),
        })?;
        self.resolve_descriptor(&descriptor, scope)
    }

    /// Resolve a constructor parameter that has no linked descriptor
    pub(crate) fn resolve_param(&self, param: &Param, scope: Option<&Scope>) -> Result<AnyInstance> {
        match param.kind {
            ParamKind::Options { value, wrap } => self.resolve_options(param.key, value, wrap, scope),
            _ => self.resolve(param.key, scope),
        }
    }

    fn resolve_descriptor(&self, descriptor: &Arc<BuiltDescriptor>, scope: Option<&Scope>) -> Result<AnyInstance> {
        if let Some(instance) = descriptor.instance.get() {
            return Ok(Arc::clone(instance));
        }

        let key = descriptor.key();
        let _guard = ResolutionGuard::enter(key)?;

        #[cfg(feature = "logging")]
        trace!(
            target: "service_container",
            service = key.name(),
            lifetime = %descriptor.source.lifetime(),
            scoped = scope.is_some(),
            "Resolving service"
        );

        if let Some(pool) = &descriptor.source.pool {
            return self.get_from_pool(descriptor, pool, scope);
        }

        match descriptor.source.lifetime() {
            Lifetime::Transient => self.create(descriptor, scope),
            Lifetime::Singleton => descriptor
                .instance
                .get_or_try_init(|| {
                    let _building = SingletonBuild::enter();
                    self.create(descriptor, scope)
                })
                .map(Arc::clone),
            Lifetime::Scoped => {
                let scope = scope.ok_or(DiError::ScopeRequired {
                    type_name: key.name(),
                })?;
                scope.get_or_init(key, || self.create(descriptor, Some(scope)))
            }
        }
    }

    /// Create, then decorate
    fn create(&self, descriptor: &BuiltDescriptor, scope: Option<&Scope>) -> Result<AnyInstance> {
        let instance = self.create_raw(descriptor, scope)?;
        match &descriptor.source.decorator {
            Some(spec) => {
                InstanceFactory::new(self).decorate(descriptor.key(), spec, instance, scope)
            }
            None => Ok(instance),
        }
    }

    fn create_raw(&self, descriptor: &BuiltDescriptor, scope: Option<&Scope>) -> Result<AnyInstance> {
        let source = &descriptor.source;
        if let Some(instance) = &source.instance {
            return Ok(Arc::clone(instance));
        }
        if let Some(factory) = &source.factory {
            return factory(&Resolver {
                provider: self,
                scope,
            });
        }

        let unbound = || DiError::Internal(format!("{} has no bound constructor", descriptor.key()));
        let constructor = source
            .metadata
            .as_ref()
            .zip(descriptor.constructor)
            .and_then(|(metadata, index)| metadata.constructors.get(index))
            .ok_or_else(unbound)?;
        let links = descriptor.parameter_descriptors.get();

        let mut args = Vec::with_capacity(descriptor.parameters.len());
        for (index, param) in descriptor.parameters.iter().enumerate() {
            let arg = match param.kind {
                ParamKind::Scope => Arg::Scope(scope.cloned()),
                _ => match links.and_then(|l| l.get(index)).and_then(Option::as_ref) {
                    Some(linked) => Arg::Instance(self.resolve_descriptor(linked, scope)?),
                    None => Arg::Instance(self.resolve_param(param, scope)?),
                },
            };
            args.push(arg);
        }

        let instance = constructor.call(args)?;
        if let Some(hook) = &source.after_created {
            hook(&instance)?;
        }
        (source.upcast)(instance)
    }

    /// Build a new pool slot instance, trying every constructor in order
    fn create_pooled(&self, descriptor: &BuiltDescriptor, scope: Option<&Scope>) -> Result<AnyInstance> {
        let source = &descriptor.source;
        let metadata = source.metadata.as_ref().ok_or_else(|| {
            DiError::Internal(format!("{} has no constructor metadata", descriptor.key()))
        })?;
        let factory = InstanceFactory::new(self);
        let raw = factory.create_instance(
            descriptor.key(),
            metadata,
            None,
            scope,
            source.after_created.as_ref(),
        )?;
        let instance = (source.upcast)(raw)?;
        match &source.decorator {
            Some(spec) => factory.decorate(descriptor.key(), spec, instance, scope),
            None => Ok(instance),
        }
    }

    fn get_from_pool(
        &self,
        descriptor: &BuiltDescriptor,
        pool: &Arc<Pool>,
        scope: Option<&Scope>,
    ) -> Result<AnyInstance> {
        let key = descriptor.key();
        let create = || self.create_pooled(descriptor, scope);
        let exhausted = || DiError::PoolExhausted {
            type_name: key.name(),
        };

        match pool.mode() {
            PoolMode::Scoped => {
                let scope = scope.ok_or(DiError::ScopeRequired {
                    type_name: key.name(),
                })?;
                scope.get_or_init(key, || {
                    let lease = pool
                        .get_and_lock(Some(scope.id()), &create)?
                        .ok_or_else(exhausted)?;
                    let instance = Arc::clone(lease.instance());
                    scope.use_pool_item(pool, lease)?;
                    Ok(instance)
                })
            }
            PoolMode::Transient => {
                let lease = pool
                    .get_and_lock(scope.map(Scope::id), &create)?
                    .ok_or_else(exhausted)?;
                let instance = Arc::clone(lease.instance());
                // A singleton outlives the scope it was first built in, so its
                // leases must not be released by that scope's disposal
                if let Some(scope) = scope.filter(|_| !SingletonBuild::active()) {
                    scope.use_pool_item(pool, lease)?;
                }
                Ok(instance)
            }
        }
    }

    /// Resolve `Options<T>`, asking the options source when nothing is registered.
    ///
    /// A value from the source is cached as a singleton entry.
    fn resolve_options(
        &self,
        key: ServiceKey,
        value: ServiceKey,
        wrap: fn(Arc<dyn Any + Send + Sync>) -> Option<AnyInstance>,
        scope: Option<&Scope>,
    ) -> Result<AnyInstance> {
        if let Some(descriptor) = self.lookup(&key) {
            return self.resolve_descriptor(&descriptor, scope);
        }

        let not_found = || DiError::ServiceNotFound {
            type_name: key.name(),
        };
        let raw = self
            .options_source
            .as_ref()
            .and_then(|source| source.lookup(&value))
            .ok_or_else(not_found)?;
        let instance = wrap(raw).ok_or_else(not_found)?;

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            options = key.name(),
            "Caching options from external source"
        );

        let built = BuiltDescriptor::resolved(
            ServiceDescriptor::keyed_instance(key, Arc::clone(&instance), u64::MAX).mark_options(),
        );
        let entry = self.services.entry(key.id()).or_insert_with(|| Arc::new(built));
        Ok(entry.instance.get().cloned().unwrap_or(instance))
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("service_count", &self.len())
            .field("options_source", &self.options_source.is_some())
            .finish()
    }
}
