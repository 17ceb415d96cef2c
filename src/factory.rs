//! Instance creation
//!
//! [`InstanceFactory`] builds implementation instances from their
//! constructor metadata, resolving each argument from the provider. The
//! helpers here convert built implementations to their contracts and apply
//! decorators.

use crate::constructor::{Arg, ImplMetadata, ParamKind};
use crate::descriptor::{DecoratorSpec, HookFn};
use crate::provider::ServiceProvider;
use crate::scope::Scope;
use crate::storage::{AnyInstance, downcast, erase};
use crate::{Decorator, DiError, Implements, Injectable, Result, ServiceKey};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

// =============================================================================
// Erased conversions
// =============================================================================

/// Pass an instance through unchanged
#[inline]
pub(crate) fn identity(instance: AnyInstance) -> Result<AnyInstance> {
    Ok(instance)
}

/// Convert an erased `Arc<I>` into an erased `Arc<C>`
pub(crate) fn upcast_erased<C, I>(instance: AnyInstance) -> Result<AnyInstance>
where
    C: ?Sized + Injectable,
    I: Implements<C>,
{
    let implementation = downcast::<I>(&instance)?;
    Ok(erase::<C>(implementation.upcast()))
}

/// Wrap an erased `Arc<C>` with an erased decorator `Arc<D>`
pub(crate) fn apply_decorator<C, D>(decorator: &AnyInstance, inner: AnyInstance) -> Result<AnyInstance>
where
    C: ?Sized + Injectable,
    D: Decorator<C>,
{
    let decorator = downcast::<D>(decorator)?;
    let inner = downcast::<C>(&inner)?;
    Ok(erase::<C>(decorator.proxy(inner)))
}

/// Erase a decorator instance supplied at registration
pub(crate) fn decorator_instance<C, D>(decorator: D) -> DecoratorSpec
where
    C: ?Sized + Injectable,
    D: Decorator<C>,
{
    let decorator = Arc::new(decorator);
    DecoratorSpec::Instance(Arc::new(move |inner: AnyInstance| -> Result<AnyInstance> {
        let inner = downcast::<C>(&inner)?;
        Ok(erase::<C>(decorator.proxy(inner)))
    }))
}

/// Describe a decorator type the container builds itself
pub(crate) fn decorator_type<C, D>() -> DecoratorSpec
where
    C: ?Sized + Injectable,
    D: Decorator<C> + crate::Constructible,
{
    DecoratorSpec::Type {
        metadata: ImplMetadata::of::<D>(),
        apply: apply_decorator::<C, D>,
    }
}

// =============================================================================
// Instance factory
// =============================================================================

/// Builds instances by trying constructors in order
pub(crate) struct InstanceFactory<'a> {
    provider: &'a ServiceProvider,
}

impl<'a> InstanceFactory<'a> {
    #[inline]
    pub fn new(provider: &'a ServiceProvider) -> Self {
        Self { provider }
    }

    /// Create an instance of the implementation described by `metadata`.
    ///
    /// `candidates` lists constructor indices to try; `None` tries all of
    /// them in declaration order. A candidate whose argument resolution
    /// fails because a type is not registered is skipped; any other error
    /// is returned as is.
    pub fn create_instance(
        &self,
        service: ServiceKey,
        metadata: &ImplMetadata,
        candidates: Option<&[usize]>,
        scope: Option<&Scope>,
        hook: Option<&HookFn>,
    ) -> Result<AnyInstance> {
        if metadata.constructors.is_empty() {
            return Err(DiError::NoPublicConstructor {
                service: service.name(),
                implementation: metadata.key.name(),
            });
        }

        let all: Vec<usize>;
        let candidates = match candidates {
            Some(indices) => indices,
            None => {
                all = (0..metadata.constructors.len()).collect();
                &all
            }
        };

        for &index in candidates {
            let Some(constructor) = metadata.constructors.get(index) else {
                continue;
            };

            let mut args = Vec::with_capacity(constructor.params.len());
            let mut skipped = false;
            for param in &constructor.params {
                if let ParamKind::Scope = param.kind {
                    args.push(Arg::Scope(scope.cloned()));
                    continue;
                }
                match self.provider.resolve_param(param, scope) {
                    Ok(instance) => args.push(Arg::Instance(instance)),
                    Err(e) if e.is_not_found() => {
                        #[cfg(feature = "logging")]
                        trace!(
                            target: "service_container",
                            implementation = metadata.key.name(),
                            constructor = index,
                            missing = param.key.name(),
                            "Skipping constructor with unregistered parameter"
                        );
                        skipped = true;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            if skipped {
                continue;
            }

            let instance = constructor.call(args)?;
            if let Some(hook) = hook {
                hook(&instance)?;
            }
            return Ok(instance);
        }

        Err(DiError::NoUsableConstructor {
            service: service.name(),
            implementation: metadata.key.name(),
        })
    }

    /// Wrap a freshly created contract instance with its decorator
    pub fn decorate(
        &self,
        service: ServiceKey,
        spec: &DecoratorSpec,
        instance: AnyInstance,
        scope: Option<&Scope>,
    ) -> Result<AnyInstance> {
        match spec {
            DecoratorSpec::Instance(apply) => apply(instance),
            DecoratorSpec::Type { metadata, apply } => {
                let decorator = self.create_instance(service, metadata, None, scope, None)?;
                apply(&decorator, instance)
            }
        }
    }
}
