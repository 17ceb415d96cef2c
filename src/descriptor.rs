//! Service descriptors
//!
//! A [`ServiceDescriptor`] is the registration record for one contract
//! type. When the provider is built each descriptor is bound into a
//! [`BuiltDescriptor`] that carries the selected constructor, the linked
//! parameter descriptors and the singleton cell.

use crate::constructor::{Constructible, Constructor, ImplMetadata, Param};
use crate::factory::{identity, upcast_erased};
use crate::pool::{Pool, PoolMode};
use crate::provider::Resolver;
use crate::storage::AnyInstance;
use crate::{Implements, Injectable, Lifetime, Result, ServiceKey};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

pub(crate) type FactoryFn = Arc<dyn Fn(&Resolver<'_>) -> Result<AnyInstance> + Send + Sync>;
pub(crate) type HookFn = Arc<dyn Fn(&AnyInstance) -> Result<()> + Send + Sync>;
pub(crate) type UpcastFn = fn(AnyInstance) -> Result<AnyInstance>;
pub(crate) type ApplyFn = fn(&AnyInstance, AnyInstance) -> Result<AnyInstance>;

/// How a created instance is wrapped before it is returned or cached
pub(crate) enum DecoratorSpec {
    /// A decorator type built by the container
    Type { metadata: ImplMetadata, apply: ApplyFn },
    /// A decorator instance supplied at registration
    Instance(Arc<dyn Fn(AnyInstance) -> Result<AnyInstance> + Send + Sync>),
}

/// Registration record for one contract type
#[derive(Clone)]
pub struct ServiceDescriptor {
    contract: ServiceKey,
    implementation: ServiceKey,
    lifetime: Lifetime,
    pub(crate) instance: Option<AnyInstance>,
    pub(crate) factory: Option<FactoryFn>,
    pub(crate) decorator: Option<Arc<DecoratorSpec>>,
    pub(crate) after_created: Option<HookFn>,
    pub(crate) metadata: Option<Arc<ImplMetadata>>,
    pub(crate) upcast: UpcastFn,
    pub(crate) pool: Option<Arc<Pool>>,
    is_options: bool,
    seq: u64,
}

impl ServiceDescriptor {
    fn base(contract: ServiceKey, implementation: ServiceKey, lifetime: Lifetime, seq: u64) -> Self {
        Self {
            contract,
            implementation,
            lifetime,
            instance: None,
            factory: None,
            decorator: None,
            after_created: None,
            metadata: None,
            upcast: identity,
            pool: None,
            is_options: false,
            seq,
        }
    }

    /// Descriptor built from an implementation's declared constructors
    pub(crate) fn constructed<C, I>(lifetime: Lifetime, seq: u64) -> Self
    where
        C: ?Sized + Injectable,
        I: Constructible + Implements<C>,
    {
        Self::with_metadata::<C, I>(lifetime, ImplMetadata::of::<I>(), seq)
    }

    /// Descriptor built from an explicit constructor list
    #[cfg(test)]
    pub(crate) fn from_constructors<C, I>(
        lifetime: Lifetime,
        constructors: Vec<Constructor<I>>,
        seq: u64,
    ) -> Self
    where
        C: ?Sized + Injectable,
        I: Implements<C>,
    {
        Self::with_metadata::<C, I>(lifetime, ImplMetadata::from_constructors(constructors), seq)
    }

    fn with_metadata<C, I>(lifetime: Lifetime, metadata: ImplMetadata, seq: u64) -> Self
    where
        C: ?Sized + Injectable,
        I: Implements<C>,
    {
        let mut descriptor =
            Self::base(ServiceKey::of::<C>(), ServiceKey::of::<I>(), lifetime, seq);
        descriptor.metadata = Some(Arc::new(metadata));
        descriptor.upcast = upcast_erased::<C, I>;
        descriptor
    }

    /// Singleton descriptor holding a pre-built instance
    pub(crate) fn instance<C: ?Sized + Injectable>(instance: AnyInstance, seq: u64) -> Self {
        Self::keyed_instance(ServiceKey::of::<C>(), instance, seq)
    }

    pub(crate) fn keyed_instance(key: ServiceKey, instance: AnyInstance, seq: u64) -> Self {
        let mut descriptor = Self::base(key, key, Lifetime::Singleton, seq);
        descriptor.instance = Some(instance);
        descriptor
    }

    /// Descriptor whose instances come from a user factory
    pub(crate) fn factory<C: ?Sized + Injectable>(
        lifetime: Lifetime,
        factory: FactoryFn,
        seq: u64,
    ) -> Self {
        let key = ServiceKey::of::<C>();
        let mut descriptor = Self::base(key, key, lifetime, seq);
        descriptor.factory = Some(factory);
        descriptor
    }

    pub(crate) fn with_decorator(mut self, decorator: Option<DecoratorSpec>) -> Self {
        self.decorator = decorator.map(Arc::new);
        self
    }

    pub(crate) fn with_hook(mut self, hook: Option<HookFn>) -> Self {
        self.after_created = hook;
        self
    }

    pub(crate) fn with_pool(mut self, pool: Arc<Pool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub(crate) fn mark_options(mut self) -> Self {
        self.is_options = true;
        self
    }

    /// The contract type clients ask for
    #[inline]
    pub fn contract(&self) -> ServiceKey {
        self.contract
    }

    /// The concrete type instantiated for the contract
    #[inline]
    pub fn implementation(&self) -> ServiceKey {
        self.implementation
    }

    /// Nominal lifetime; pools override it at resolution
    #[inline]
    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// True when registered with a pre-built instance
    #[inline]
    pub fn has_instance(&self) -> bool {
        self.instance.is_some()
    }

    /// True when instances come from a user factory
    #[inline]
    pub fn has_factory(&self) -> bool {
        self.factory.is_some()
    }

    /// True when a decorator wraps created instances
    #[inline]
    pub fn has_decorator(&self) -> bool {
        self.decorator.is_some()
    }

    /// Pool mode if the service is pool-backed
    #[inline]
    pub fn pool_mode(&self) -> Option<PoolMode> {
        self.pool.as_ref().map(|p| p.mode())
    }

    /// True for configuration carriers registered through `configure`
    #[inline]
    pub fn is_options(&self) -> bool {
        self.is_options
    }

    /// Whether the instance is produced by a constructor rather than given
    #[inline]
    pub(crate) fn needs_constructor(&self) -> bool {
        self.pool.is_some() || (self.instance.is_none() && self.factory.is_none())
    }

    #[inline]
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("contract", &self.contract)
            .field("implementation", &self.implementation)
            .field("lifetime", &self.lifetime)
            .field("instance", &self.instance.is_some())
            .field("factory", &self.factory.is_some())
            .field("decorator", &self.decorator.is_some())
            .field("pool", &self.pool_mode())
            .finish()
    }
}

/// A descriptor bound for resolution
pub(crate) struct BuiltDescriptor {
    pub source: ServiceDescriptor,
    /// Index of the selected constructor in the implementation metadata
    pub constructor: Option<usize>,
    /// Parameters of the selected constructor
    pub parameters: Vec<Param>,
    /// Descriptor for each parameter; `None` for the scope and for
    /// options that come from an external source
    pub parameter_descriptors: OnceCell<Vec<Option<Arc<BuiltDescriptor>>>>,
    /// Cached singleton, pre-filled for instance registrations
    pub instance: OnceCell<AnyInstance>,
}

impl BuiltDescriptor {
    pub fn new(source: ServiceDescriptor, constructor: Option<usize>) -> Self {
        let parameters = match (&source.metadata, constructor) {
            (Some(metadata), Some(index)) => metadata
                .constructors
                .get(index)
                .map(|c| c.params.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        let instance = OnceCell::new();
        if let Some(given) = &source.instance {
            let _ = instance.set(Arc::clone(given));
        }
        Self {
            source,
            constructor,
            parameters,
            parameter_descriptors: OnceCell::new(),
            instance,
        }
    }

    /// An already-resolved singleton entry, e.g. options fetched from a source
    pub fn resolved(source: ServiceDescriptor) -> Self {
        let built = Self::new(source, None);
        let _ = built.parameter_descriptors.set(Vec::new());
        built
    }

    #[inline]
    pub fn key(&self) -> ServiceKey {
        self.source.contract()
    }
}

impl fmt::Debug for BuiltDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltDescriptor")
            .field("source", &self.source)
            .field("constructor", &self.constructor)
            .field("parameters", &self.parameters)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::erase;
    use crate::{ParamKind, PoolOptions};

    trait Store: Send + Sync {}

    struct Disk;
    impl Store for Disk {}
    crate::implements!(dyn Store: Disk);

    struct Index {
        _disk: Arc<Disk>,
    }

    fn disk_descriptor() -> ServiceDescriptor {
        ServiceDescriptor::from_constructors::<dyn Store, Disk>(
            Lifetime::Singleton,
            vec![Constructor::new(|_: ()| Disk)],
            0,
        )
    }

    #[test]
    fn test_constructed_descriptor_keys() {
        let descriptor = disk_descriptor();
        assert_eq!(descriptor.contract(), ServiceKey::of::<dyn Store>());
        assert_eq!(descriptor.implementation(), ServiceKey::of::<Disk>());
        assert!(descriptor.needs_constructor());
        assert!(!descriptor.has_instance());
    }

    #[test]
    fn test_instance_descriptor_prefills_singleton() {
        let descriptor = ServiceDescriptor::instance::<Disk>(erase(Arc::new(Disk)), 0);
        assert!(!descriptor.needs_constructor());

        let built = BuiltDescriptor::new(descriptor, None);
        assert!(built.instance.get().is_some());
        assert!(built.parameters.is_empty());
    }

    #[test]
    fn test_pool_descriptor_needs_constructor() {
        let pool = Arc::new(Pool::new::<dyn Store>(PoolMode::Transient, PoolOptions::default()));
        let descriptor = disk_descriptor().with_pool(pool);
        assert_eq!(descriptor.pool_mode(), Some(PoolMode::Transient));
        assert!(descriptor.needs_constructor());
    }

    #[test]
    fn test_built_descriptor_copies_selected_params() {
        let descriptor = ServiceDescriptor::from_constructors::<Index, Index>(
            Lifetime::Transient,
            vec![Constructor::new(|disk: Arc<Disk>| Index { _disk: disk })],
            0,
        );
        let built = BuiltDescriptor::new(descriptor, Some(0));
        assert_eq!(built.parameters.len(), 1);
        assert_eq!(built.parameters[0].key, ServiceKey::of::<Disk>());
        assert!(matches!(built.parameters[0].kind, ParamKind::Service));
    }
}
