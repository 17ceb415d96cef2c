//! Service registration container
//!
//! The `Container` is the composition root. It collects service descriptors
//! and lazily builds the [`ServiceProvider`] that resolves them. Any change
//! to the registrations drops the built provider; the next resolution
//! rebuilds it.

use crate::checker::DependencyGraphValidator;
use crate::constructor::Constructible;
use crate::descriptor::{DecoratorSpec, FactoryFn, HookFn, ServiceDescriptor};
use crate::factory::{decorator_instance, decorator_type};
use crate::options::{Options, OptionsSource};
use crate::pool::{Pool, PoolMode, PoolOptions, PoolStatus};
use crate::provider::{Resolver, ServiceProvider};
use crate::scope::Scope;
use crate::storage::{AnyInstance, DescriptorStore, downcast, erase, instance_addr};
use crate::{Decorator, DiError, Implements, Injectable, Lifetime, Result};
use parking_lot::RwLock;
use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::debug;

struct ContainerInner {
    storage: DescriptorStore,
    provider: RwLock<Option<Arc<ServiceProvider>>>,
    options_source: RwLock<Option<Arc<dyn OptionsSource>>>,
    locked: AtomicBool,
    seq: AtomicU64,
}

/// Dependency injection container.
///
/// Cloning a container yields another handle to the same registrations.
///
/// # Examples
///
/// ```rust
/// use service_container::{Constructible, Constructor, Container};
/// use std::sync::Arc;
///
/// struct Database {
///     url: String,
/// }
///
/// impl Constructible for Database {
///     fn constructors() -> Vec<Constructor<Self>> {
///         vec![Constructor::new(|_: ()| Database { url: "postgres://localhost".into() })]
///     }
/// }
///
/// struct UserService {
///     db: Arc<Database>,
/// }
///
/// impl Constructible for UserService {
///     fn constructors() -> Vec<Constructor<Self>> {
///         vec![Constructor::new(|db: Arc<Database>| UserService { db })]
///     }
/// }
///
/// let container = Container::new();
/// container.add_singleton::<Database, Database>().unwrap();
/// container.add_transient::<UserService, UserService>().unwrap();
/// container.check_services().unwrap();
///
/// let users = container.get::<UserService>().unwrap();
/// assert_eq!(users.db.url, "postgres://localhost");
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    /// Create an empty container.
    #[inline]
    pub fn new() -> Self {
        #[cfg(feature = "logging")]
        debug!(target: "service_container", "Creating new DI container");

        Self {
            inner: Arc::new(ContainerInner {
                storage: DescriptorStore::new(),
                provider: RwLock::new(None),
                options_source: RwLock::new(None),
                locked: AtomicBool::new(false),
                seq: AtomicU64::new(0),
            }),
        }
    }

    // =========================================================================
    // Registration Methods
    // =========================================================================

    /// Start registering `I` as the implementation of contract `C`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use service_container::{Constructible, Constructor, Container, Decorator, implements};
    /// use std::sync::Arc;
    ///
    /// trait Greeter: Send + Sync {
    ///     fn greet(&self) -> String;
    /// }
    ///
    /// struct English;
    /// impl Greeter for English {
    ///     fn greet(&self) -> String { "hello".into() }
    /// }
    /// impl Constructible for English {
    ///     fn constructors() -> Vec<Constructor<Self>> {
    ///         vec![Constructor::new(|_: ()| English)]
    ///     }
    /// }
    /// implements!(dyn Greeter: English);
    ///
    /// struct Shout;
    /// struct Shouting(Arc<dyn Greeter>);
    /// impl Greeter for Shouting {
    ///     fn greet(&self) -> String { self.0.greet().to_uppercase() }
    /// }
    /// impl Decorator<dyn Greeter> for Shout {
    ///     fn proxy(&self, inner: Arc<dyn Greeter>) -> Arc<dyn Greeter> {
    ///         Arc::new(Shouting(inner))
    ///     }
    /// }
    ///
    /// let container = Container::new();
    /// container
    ///     .service::<dyn Greeter, English>()
    ///     .decorate_with(Shout)
    ///     .singleton()
    ///     .unwrap();
    ///
    /// assert_eq!(container.get::<dyn Greeter>().unwrap().greet(), "HELLO");
    /// ```
    #[inline]
    pub fn service<C, I>(&self) -> ServiceBuilder<'_, C, I>
    where
        C: ?Sized + Injectable,
        I: Constructible + Implements<C>,
    {
        ServiceBuilder {
            container: self,
            decorator: None,
            hook: None,
            _marker: PhantomData,
        }
    }

    /// Register a transient service: a new instance on every resolve
    #[inline]
    pub fn add_transient<C, I>(&self) -> Result<()>
    where
        C: ?Sized + Injectable,
        I: Constructible + Implements<C>,
    {
        self.service::<C, I>().transient()
    }

    /// Register a scoped service: one instance per scope
    #[inline]
    pub fn add_scoped<C, I>(&self) -> Result<()>
    where
        C: ?Sized + Injectable,
        I: Constructible + Implements<C>,
    {
        self.service::<C, I>().scoped()
    }

    /// Register a singleton service, created on first access
    #[inline]
    pub fn add_singleton<C, I>(&self) -> Result<()>
    where
        C: ?Sized + Injectable,
        I: Constructible + Implements<C>,
    {
        self.service::<C, I>().singleton()
    }

    /// Register a transient pool: each resolve leases a free slot
    #[inline]
    pub fn add_transient_pool<C, I>(&self, options: PoolOptions) -> Result<()>
    where
        C: ?Sized + Injectable,
        I: Constructible + Implements<C>,
    {
        self.service::<C, I>().transient_pool(options)
    }

    /// Register a scoped pool: each scope leases one slot until disposed
    #[inline]
    pub fn add_scoped_pool<C, I>(&self, options: PoolOptions) -> Result<()>
    where
        C: ?Sized + Injectable,
        I: Constructible + Implements<C>,
    {
        self.service::<C, I>().scoped_pool(options)
    }

    /// Register a pre-built singleton.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use service_container::Container;
    /// use std::sync::Arc;
    ///
    /// trait Clock: Send + Sync {
    ///     fn now(&self) -> u64;
    /// }
    ///
    /// struct Fixed(u64);
    /// impl Clock for Fixed {
    ///     fn now(&self) -> u64 { self.0 }
    /// }
    ///
    /// let container = Container::new();
    /// container.add_instance::<dyn Clock>(Arc::new(Fixed(42))).unwrap();
    /// assert_eq!(container.get::<dyn Clock>().unwrap().now(), 42);
    /// ```
    pub fn add_instance<C: ?Sized + Injectable>(&self, instance: Arc<C>) -> Result<()> {
        let descriptor = ServiceDescriptor::instance::<C>(erase(instance), self.next_seq());
        self.register(descriptor)
    }

    /// Register a factory function.
    ///
    /// The factory receives a [`Resolver`] bound to the current scope so it
    /// can resolve its own dependencies.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use service_container::{Container, Lifetime, Resolver};
    /// use std::sync::Arc;
    ///
    /// struct Port(u16);
    /// struct Address(String);
    ///
    /// let container = Container::new();
    /// container.add_instance(Arc::new(Port(8080))).unwrap();
    /// container
    ///     .add_factory::<Address, _>(Lifetime::Transient, |resolver: &Resolver<'_>| {
    ///         let port = resolver.get::<Port>()?;
    ///         Ok(Arc::new(Address(format!("127.0.0.1:{}", port.0))))
    ///     })
    ///     .unwrap();
    ///
    /// assert_eq!(container.get::<Address>().unwrap().0, "127.0.0.1:8080");
    /// ```
    pub fn add_factory<C, F>(&self, lifetime: Lifetime, factory: F) -> Result<()>
    where
        C: ?Sized + Injectable,
        F: Fn(&Resolver<'_>) -> Result<Arc<C>> + Send + Sync + 'static,
    {
        let factory: FactoryFn = Arc::new(move |resolver: &Resolver<'_>| -> Result<AnyInstance> {
            factory(resolver).map(erase::<C>)
        });
        let descriptor = ServiceDescriptor::factory::<C>(lifetime, factory, self.next_seq());
        self.register(descriptor)
    }

    /// Register an `Options<T>` singleton built from `T::default()` and `configure`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use service_container::{Container, Options};
    ///
    /// #[derive(Default)]
    /// struct HttpSettings {
    ///     port: u16,
    /// }
    ///
    /// let container = Container::new();
    /// container.configure::<HttpSettings, _>(|s| s.port = 8080).unwrap();
    ///
    /// let settings = container.get::<Options<HttpSettings>>().unwrap();
    /// assert_eq!(settings.port, 8080);
    /// ```
    pub fn configure<T, F>(&self, configure: F) -> Result<()>
    where
        T: Injectable + Default,
        F: FnOnce(&mut T),
    {
        let mut value = T::default();
        configure(&mut value);
        let instance = erase(Arc::new(Options::new(value)));
        let descriptor =
            ServiceDescriptor::instance::<Options<T>>(instance, self.next_seq()).mark_options();
        self.register(descriptor)
    }

    /// Install the external lookup consulted for unregistered `Options<T>` parameters
    pub fn set_options_source(&self, source: Arc<dyn OptionsSource>) -> Result<()> {
        self.check_not_locked()?;
        *self.inner.options_source.write() = Some(source);
        self.invalidate();
        Ok(())
    }

    /// Remove the registration for `C`.
    ///
    /// Returns `Ok(false)` if `C` was not registered.
    pub fn remove<C: ?Sized + 'static>(&self) -> Result<bool> {
        self.check_not_locked()?;
        let removed = self.inner.storage.remove(&TypeId::of::<C>());
        if removed {
            #[cfg(feature = "logging")]
            debug!(
                target: "service_container",
                service = std::any::type_name::<C>(),
                "Removed service registration"
            );
            self.invalidate();
        }
        Ok(removed)
    }

    /// Add a descriptor built by one of the registration methods
    fn register(&self, descriptor: ServiceDescriptor) -> Result<()> {
        self.check_not_locked()?;

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            service = descriptor.contract().name(),
            implementation = descriptor.implementation().name(),
            lifetime = %descriptor.lifetime(),
            pooled = descriptor.pool_mode().is_some(),
            service_count = self.inner.storage.len() + 1,
            "Registering service"
        );

        self.inner.storage.insert(descriptor)?;
        self.invalidate();
        Ok(())
    }

    #[inline]
    fn next_seq(&self) -> u64 {
        self.inner.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Drop the built provider so the next resolution sees current registrations
    #[inline]
    fn invalidate(&self) {
        if self.inner.provider.write().take().is_some() {
            #[cfg(feature = "logging")]
            debug!(
                target: "service_container",
                "Registrations changed - provider will be rebuilt"
            );
        }
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validate the whole service graph without creating anything.
    ///
    /// Fails with the first `MissingReference` or `CircularReference` found.
    /// Intended to be called once at startup.
    ///
    /// ```rust
    /// use service_container::{Constructible, Constructor, Container, DiError};
    /// use std::sync::Arc;
    ///
    /// struct Repository;
    /// struct Handler;
    ///
    /// impl Constructible for Handler {
    ///     fn constructors() -> Vec<Constructor<Self>> {
    ///         vec![Constructor::new(|_: Arc<Repository>| Handler)]
    ///     }
    /// }
    ///
    /// let container = Container::new();
    /// container.add_transient::<Handler, Handler>().unwrap();
    ///
    /// let err = container.check_services().unwrap_err();
    /// assert!(matches!(err, DiError::MissingReference { .. }));
    /// ```
    pub fn check_services(&self) -> Result<()> {
        let descriptors = self.inner.storage.snapshot();
        DependencyGraphValidator::new(&descriptors).validate()
    }

    // =========================================================================
    // Resolution Methods
    // =========================================================================

    /// The provider for the current registrations, building it if needed
    pub fn provider(&self) -> Result<Arc<ServiceProvider>> {
        if let Some(provider) = self.inner.provider.read().as_ref() {
            return Ok(Arc::clone(provider));
        }

        let mut slot = self.inner.provider.write();
        if let Some(provider) = slot.as_ref() {
            return Ok(Arc::clone(provider));
        }

        let source = self.inner.options_source.read().clone();
        let provider = Arc::new(ServiceProvider::build(self.inner.storage.snapshot(), source)?);
        *slot = Some(Arc::clone(&provider));
        Ok(provider)
    }

    /// Resolve a service without a scope.
    ///
    /// Scoped services and scoped pools fail with `ScopeRequired`; resolve
    /// them through a [`Scope`].
    #[inline]
    pub fn get<C: ?Sized + Injectable>(&self) -> Result<Arc<C>> {
        self.provider()?.get::<C>(None)
    }

    /// Resolve a service without a scope, `Ok(None)` if it is not registered
    #[inline]
    pub fn try_get<C: ?Sized + Injectable>(&self) -> Result<Option<Arc<C>>> {
        self.provider()?.try_get::<C>(None)
    }

    /// Resolve a service on tokio's blocking pool.
    ///
    /// Pool waits poll on the calling thread; this keeps them off the async
    /// executor.
    #[cfg(feature = "async")]
    pub async fn get_async<C: ?Sized + Injectable>(&self) -> Result<Arc<C>> {
        let container = self.clone();
        tokio::task::spawn_blocking(move || container.get::<C>())
            .await
            .map_err(|e| DiError::Internal(format!("resolution task failed: {e}")))?
    }

    /// Create a scope for scoped services and pooled leases
    #[inline]
    pub fn create_scope(&self) -> Result<Scope> {
        Ok(self.provider()?.create_scope())
    }

    /// Release a pooled instance of `C` back to its pool.
    ///
    /// Returns `false` if `C` is not pool-backed or the instance is not
    /// currently leased.
    pub fn release_pool_item<C: ?Sized + Injectable>(&self, instance: &Arc<C>) -> bool {
        self.inner
            .storage
            .pool(&TypeId::of::<C>())
            .is_some_and(|pool| pool.release_instance(instance_addr(instance)))
    }

    /// Occupancy of the pool backing `C`
    pub fn pool_status<C: ?Sized + 'static>(&self) -> Option<PoolStatus> {
        self.inner
            .storage
            .pool(&TypeId::of::<C>())
            .map(|pool| pool.status())
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Check if a contract is registered
    #[inline]
    pub fn contains<C: ?Sized + 'static>(&self) -> bool {
        self.inner.storage.contains(&TypeId::of::<C>())
    }

    /// Number of registered contracts
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.storage.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.storage.is_empty()
    }

    /// All registrations in registration order
    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        self.inner.storage.snapshot()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Lock the container to prevent further registrations.
    ///
    /// Resolution keeps working; registration, removal and changing the
    /// options source fail with [`DiError::Locked`].
    pub fn lock(&self) {
        self.inner.locked.store(true, Ordering::Release);

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            service_count = self.inner.storage.len(),
            "Container locked - no further registrations allowed"
        );
    }

    /// Check if the container is locked
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.inner.locked.load(Ordering::Acquire)
    }

    #[inline]
    fn check_not_locked(&self) -> Result<()> {
        if self.is_locked() {
            return Err(DiError::Locked);
        }
        Ok(())
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("service_count", &self.len())
            .field("locked", &self.is_locked())
            .field("built", &self.inner.provider.read().is_some())
            .finish()
    }
}

// =============================================================================
// ServiceBuilder
// =============================================================================

/// Fluent registration of one contract/implementation pair.
///
/// Finish with one of the lifetime methods; nothing is registered until then.
#[must_use = "call a lifetime method such as .singleton() to register the service"]
pub struct ServiceBuilder<'a, C: ?Sized, I> {
    container: &'a Container,
    decorator: Option<DecoratorSpec>,
    hook: Option<HookFn>,
    _marker: PhantomData<fn(&C) -> I>,
}

impl<'a, C, I> ServiceBuilder<'a, C, I>
where
    C: ?Sized + Injectable,
    I: Constructible + Implements<C>,
{
    /// Wrap created instances with a decorator the container constructs
    #[inline]
    pub fn decorate<D>(mut self) -> Self
    where
        D: Decorator<C> + Constructible,
    {
        self.decorator = Some(decorator_type::<C, D>());
        self
    }

    /// Wrap created instances with the given decorator
    #[inline]
    pub fn decorate_with<D: Decorator<C>>(mut self, decorator: D) -> Self {
        self.decorator = Some(decorator_instance::<C, D>(decorator));
        self
    }

    /// Run `hook` on every newly constructed implementation instance
    pub fn after_created<F>(mut self, hook: F) -> Self
    where
        F: Fn(&I) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(move |instance: &AnyInstance| -> Result<()> {
            hook(&*downcast::<I>(instance)?);
            Ok(())
        }));
        self
    }

    /// Register with transient lifetime
    #[inline]
    pub fn transient(self) -> Result<()> {
        self.finish(Lifetime::Transient, None)
    }

    /// Register with scoped lifetime
    #[inline]
    pub fn scoped(self) -> Result<()> {
        self.finish(Lifetime::Scoped, None)
    }

    /// Register with singleton lifetime
    #[inline]
    pub fn singleton(self) -> Result<()> {
        self.finish(Lifetime::Singleton, None)
    }

    /// Register backed by a transient pool
    #[inline]
    pub fn transient_pool(self, options: PoolOptions) -> Result<()> {
        self.finish(Lifetime::Transient, Some((PoolMode::Transient, options)))
    }

    /// Register backed by a scoped pool
    #[inline]
    pub fn scoped_pool(self, options: PoolOptions) -> Result<()> {
        self.finish(Lifetime::Scoped, Some((PoolMode::Scoped, options)))
    }

    fn finish(self, lifetime: Lifetime, pool: Option<(PoolMode, PoolOptions)>) -> Result<()> {
        let container = self.container;
        let mut descriptor = ServiceDescriptor::constructed::<C, I>(lifetime, container.next_seq())
            .with_decorator(self.decorator)
            .with_hook(self.hook);
        if let Some((mode, options)) = pool {
            descriptor = descriptor.with_pool(Arc::new(Pool::new::<C>(mode, options)));
        }
        container.register(descriptor)
    }
}
