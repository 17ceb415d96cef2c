//! Constructor metadata
//!
//! Implementation types describe how they can be built by listing
//! [`Constructor`]s. Each constructor is a closure over a tuple of
//! dependencies; the tuple type reports the parameter list the container
//! uses to pick a constructor and to wire its arguments.
//!
//! # Example
//!
//! ```rust
//! use service_container::{Constructible, Constructor};
//! use std::sync::Arc;
//!
//! struct Database;
//!
//! struct UserRepository {
//!     db: Arc<Database>,
//!     table: String,
//! }
//!
//! impl Constructible for UserRepository {
//!     fn constructors() -> Vec<Constructor<Self>> {
//!         vec![
//!             // Never selected: scalars are not injected
//!             Constructor::new(|(db, table): (Arc<Database>, String)| UserRepository { db, table }),
//!             Constructor::new(|db: Arc<Database>| UserRepository {
//!                 db,
//!                 table: "users".into(),
//!             }),
//!         ]
//!     }
//! }
//!
//! assert_eq!(UserRepository::constructors().len(), 2);
//! ```

use crate::options::Options;
use crate::scope::Scope;
use crate::storage::{AnyInstance, downcast, erase};
use crate::{DiError, Injectable, Result, ServiceKey};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Parameters
// =============================================================================

/// How a constructor parameter is satisfied
#[derive(Clone, Copy)]
pub enum ParamKind {
    /// Resolved from the provider by contract type
    Service,
    /// Bound to the current scope, which may be absent
    Scope,
    /// A configuration carrier `Options<T>`
    Options {
        /// Key of the configured value `T`
        value: ServiceKey,
        /// Wraps a raw `T` from an options source into an erased `Options<T>`
        wrap: fn(Arc<dyn Any + Send + Sync>) -> Option<AnyInstance>,
    },
    /// Primitive or string value; never injected
    Scalar,
}

impl fmt::Debug for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Service => f.write_str("Service"),
            ParamKind::Scope => f.write_str("Scope"),
            ParamKind::Options { value, .. } => write!(f, "Options({value})"),
            ParamKind::Scalar => f.write_str("Scalar"),
        }
    }
}

/// One constructor parameter
#[derive(Debug, Clone, Copy)]
pub struct Param {
    /// Type requested by the parameter
    pub key: ServiceKey,
    /// How the parameter is satisfied
    pub kind: ParamKind,
}

/// A resolved constructor argument
#[derive(Clone)]
pub enum Arg {
    /// A resolved instance, erased
    Instance(AnyInstance),
    /// The scope the resolution runs in
    Scope(Option<Scope>),
}

// =============================================================================
// Dependency traits
// =============================================================================

/// A single value a constructor can ask for
pub trait Dependency: Sized + 'static {
    /// Describe the parameter
    fn param() -> Param;

    /// Rebuild the typed value from its resolved argument
    fn from_arg(arg: Arg) -> Result<Self>;
}

impl<T: ?Sized + Injectable> Dependency for Arc<T> {
    #[inline]
    fn param() -> Param {
        Param {
            key: ServiceKey::of::<T>(),
            kind: ParamKind::Service,
        }
    }

    #[inline]
    fn from_arg(arg: Arg) -> Result<Self> {
        match arg {
            Arg::Instance(instance) => downcast::<T>(&instance),
            Arg::Scope(_) => Err(DiError::type_mismatch::<T>()),
        }
    }
}

impl Dependency for Option<Scope> {
    #[inline]
    fn param() -> Param {
        Param {
            key: ServiceKey::of::<Scope>(),
            kind: ParamKind::Scope,
        }
    }

    #[inline]
    fn from_arg(arg: Arg) -> Result<Self> {
        match arg {
            Arg::Scope(scope) => Ok(scope),
            Arg::Instance(_) => Err(DiError::type_mismatch::<Scope>()),
        }
    }
}

fn wrap_options<T: Injectable>(raw: Arc<dyn Any + Send + Sync>) -> Option<AnyInstance> {
    let value = raw.downcast::<T>().ok()?;
    Some(erase(Arc::new(Options::from_arc(value))))
}

impl<T: Injectable> Dependency for Options<T> {
    #[inline]
    fn param() -> Param {
        Param {
            key: ServiceKey::of::<Options<T>>(),
            kind: ParamKind::Options {
                value: ServiceKey::of::<T>(),
                wrap: wrap_options::<T>,
            },
        }
    }

    #[inline]
    fn from_arg(arg: Arg) -> Result<Self> {
        match arg {
            Arg::Instance(instance) => downcast::<Options<T>>(&instance).map(|o| (*o).clone()),
            Arg::Scope(_) => Err(DiError::type_mismatch::<Options<T>>()),
        }
    }
}

// Scalars are described so selection can reject them; they resolve only
// when someone registered the exact type.
macro_rules! impl_scalar_dependency {
    ($($T:ty),+ $(,)?) => {
        $(
            impl Dependency for $T {
                #[inline]
                fn param() -> Param {
                    Param {
                        key: ServiceKey::of::<$T>(),
                        kind: ParamKind::Scalar,
                    }
                }

                #[inline]
                fn from_arg(arg: Arg) -> Result<Self> {
                    match arg {
                        Arg::Instance(instance) => downcast::<$T>(&instance).map(|v| (*v).clone()),
                        Arg::Scope(_) => Err(DiError::type_mismatch::<$T>()),
                    }
                }
            }
        )+
    };
}

impl_scalar_dependency!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, String,
);

/// The full argument list of a constructor.
///
/// Implemented for:
/// - `()` - No dependencies
/// - `Arc<T>`, `Options<T>`, `Option<Scope>` - A single dependency
/// - Tuples of [`Dependency`] values (up to 12)
pub trait Dependencies: Sized + 'static {
    /// Ordered parameter list
    fn params() -> Vec<Param>;

    /// Rebuild the typed arguments from resolved values
    fn from_args(args: Vec<Arg>) -> Result<Self>;
}

impl Dependencies for () {
    #[inline]
    fn params() -> Vec<Param> {
        Vec::new()
    }

    #[inline]
    fn from_args(_args: Vec<Arg>) -> Result<Self> {
        Ok(())
    }
}

fn single<D: Dependency>(args: Vec<Arg>) -> Result<D> {
    let arg = args
        .into_iter()
        .next()
        .ok_or_else(|| DiError::Internal("missing constructor argument".into()))?;
    D::from_arg(arg)
}

impl<T: ?Sized + Injectable> Dependencies for Arc<T> {
    #[inline]
    fn params() -> Vec<Param> {
        vec![<Self as Dependency>::param()]
    }

    #[inline]
    fn from_args(args: Vec<Arg>) -> Result<Self> {
        single(args)
    }
}

impl<T: Injectable> Dependencies for Options<T> {
    #[inline]
    fn params() -> Vec<Param> {
        vec![<Self as Dependency>::param()]
    }

    #[inline]
    fn from_args(args: Vec<Arg>) -> Result<Self> {
        single(args)
    }
}

impl Dependencies for Option<Scope> {
    #[inline]
    fn params() -> Vec<Param> {
        vec![<Self as Dependency>::param()]
    }

    #[inline]
    fn from_args(args: Vec<Arg>) -> Result<Self> {
        single(args)
    }
}

// Tuple implementations (1-12 elements)
macro_rules! impl_dependencies_tuple {
    ($($T:ident),+) => {
        impl<$($T: Dependency),+> Dependencies for ($($T,)+) {
            #[inline]
            fn params() -> Vec<Param> {
                vec![$($T::param()),+]
            }

            #[inline]
            fn from_args(args: Vec<Arg>) -> Result<Self> {
                let mut args = args.into_iter();
                Ok(($(
                    $T::from_arg(args.next().ok_or_else(|| {
                        DiError::Internal("missing constructor argument".into())
                    })?)?,
                )+))
            }
        }
    };
}

impl_dependencies_tuple!(A);
impl_dependencies_tuple!(A, B);
impl_dependencies_tuple!(A, B, C);
impl_dependencies_tuple!(A, B, C, D);
impl_dependencies_tuple!(A, B, C, D, E);
impl_dependencies_tuple!(A, B, C, D, E, F);
impl_dependencies_tuple!(A, B, C, D, E, F, G);
impl_dependencies_tuple!(A, B, C, D, E, F, G, H);
impl_dependencies_tuple!(A, B, C, D, E, F, G, H, I);
impl_dependencies_tuple!(A, B, C, D, E, F, G, H, I, J);
impl_dependencies_tuple!(A, B, C, D, E, F, G, H, I, J, K);
impl_dependencies_tuple!(A, B, C, D, E, F, G, H, I, J, K, L);

// =============================================================================
// Constructor
// =============================================================================

type BuildFn<T> = Arc<dyn Fn(Vec<Arg>) -> Result<T> + Send + Sync>;

/// A way to build `T` from resolved dependencies
pub struct Constructor<T> {
    params: Vec<Param>,
    hinted: bool,
    build: BuildFn<T>,
}

impl<T: 'static> Constructor<T> {
    /// Create a constructor from a closure over its dependencies
    pub fn new<D, F>(f: F) -> Self
    where
        D: Dependencies,
        F: Fn(D) -> T + Send + Sync + 'static,
    {
        Self {
            params: D::params(),
            hinted: false,
            build: Arc::new(move |args| D::from_args(args).map(&f)),
        }
    }

    /// Create a constructor from a fallible closure
    pub fn try_new<D, F>(f: F) -> Self
    where
        D: Dependencies,
        F: Fn(D) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            params: D::params(),
            hinted: false,
            build: Arc::new(move |args| f(D::from_args(args)?)),
        }
    }

    /// Mark this constructor as the designated injection constructor
    #[inline]
    pub fn hinted(mut self) -> Self {
        self.hinted = true;
        self
    }

    /// The ordered parameter list
    #[inline]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Whether the injection hint is set
    #[inline]
    pub fn is_hinted(&self) -> bool {
        self.hinted
    }

    /// Invoke the constructor with resolved arguments
    #[inline]
    pub fn call(&self, args: Vec<Arg>) -> Result<T> {
        (self.build)(args)
    }
}

impl<T> Clone for Constructor<T> {
    fn clone(&self) -> Self {
        Self {
            params: self.params.clone(),
            hinted: self.hinted,
            build: Arc::clone(&self.build),
        }
    }
}

impl<T> fmt::Debug for Constructor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("params", &self.params)
            .field("hinted", &self.hinted)
            .finish()
    }
}

/// Implementation types the container can build
///
/// Constructors are listed in declaration order. An empty list means the
/// type has no public constructor.
///
/// With the `derive` feature, `#[derive(Constructible)]` generates a single
/// constructor from the struct's `#[inject]` fields.
pub trait Constructible: Injectable + Sized {
    /// All constructors, in declaration order
    fn constructors() -> Vec<Constructor<Self>>;
}

// =============================================================================
// Erased metadata
// =============================================================================

/// A constructor whose output is an erased `Arc<I>`
#[derive(Clone)]
pub(crate) struct ErasedConstructor {
    pub params: Vec<Param>,
    pub hinted: bool,
    build: BuildFn<AnyInstance>,
}

impl ErasedConstructor {
    #[inline]
    pub fn call(&self, args: Vec<Arg>) -> Result<AnyInstance> {
        (self.build)(args)
    }
}

/// Constructor metadata of one implementation type
#[derive(Clone)]
pub(crate) struct ImplMetadata {
    pub key: ServiceKey,
    pub constructors: Vec<ErasedConstructor>,
}

impl ImplMetadata {
    pub fn of<I: Constructible>() -> Self {
        Self::from_constructors(I::constructors())
    }

    pub fn from_constructors<I: Injectable>(constructors: Vec<Constructor<I>>) -> Self {
        let constructors = constructors
            .into_iter()
            .map(|c| {
                let Constructor {
                    params,
                    hinted,
                    build,
                } = c;
                ErasedConstructor {
                    params,
                    hinted,
                    build: Arc::new(move |args| build(args).map(|v| erase(Arc::new(v)))),
                }
            })
            .collect();
        Self {
            key: ServiceKey::of::<I>(),
            constructors,
        }
    }
}

impl fmt::Debug for ImplMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplMetadata")
            .field("key", &self.key)
            .field("constructors", &self.constructors.len())
            .finish()
    }
}

// =============================================================================
// Selection
// =============================================================================

/// Pick the constructor used for injection.
///
/// A single constructor is always chosen. With several, unhinted
/// constructors are preferred (all of them are candidates if every one is
/// hinted) and the first candidate whose parameters are all registered
/// services, options carriers or the scope wins. Scalars disqualify.
///
/// `registered` is asked about contract keys only. A parameter naming an
/// implementation type that is registered solely under some other contract
/// does not qualify, because resolution looks parameters up by contract and
/// would fail with `MissingReference` later.
///
/// Returns `Ok(None)` when no candidate qualifies.
pub(crate) fn select_constructor(
    service: ServiceKey,
    metadata: &ImplMetadata,
    registered: impl Fn(&ServiceKey) -> bool,
) -> Result<Option<usize>> {
    let constructors = &metadata.constructors;
    match constructors.len() {
        0 => {
            return Err(DiError::NoPublicConstructor {
                service: service.name(),
                implementation: metadata.key.name(),
            });
        }
        1 => return Ok(Some(0)),
        _ => {}
    }

    let all_hinted = constructors.iter().all(|c| c.hinted);
    let selected = constructors
        .iter()
        .enumerate()
        .filter(|(_, c)| all_hinted || !c.hinted)
        .find(|(_, c)| {
            c.params.iter().all(|p| match p.kind {
                ParamKind::Service => registered(&p.key),
                ParamKind::Options { .. } | ParamKind::Scope => true,
                ParamKind::Scalar => false,
            })
        })
        .map(|(index, _)| index);

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Database;
    struct Cache;

    struct Repository {
        label: &'static str,
    }

    fn metadata(constructors: Vec<Constructor<Repository>>) -> ImplMetadata {
        ImplMetadata::from_constructors(constructors)
    }

    fn only_database(key: &ServiceKey) -> bool {
        *key == ServiceKey::of::<Database>()
    }

    #[test]
    fn test_params_follow_tuple_order() {
        let ctor = Constructor::new(|(_db, _cache, _scope): (Arc<Database>, Arc<Cache>, Option<Scope>)| {
            Repository { label: "x" }
        });
        let params = ctor.params();
        assert_eq!(params.len(), 3);
        assert_eq!(params[0].key, ServiceKey::of::<Database>());
        assert_eq!(params[1].key, ServiceKey::of::<Cache>());
        assert!(matches!(params[2].kind, ParamKind::Scope));
    }

    #[test]
    fn test_no_constructors_is_an_error() {
        let err = select_constructor(ServiceKey::of::<Repository>(), &metadata(vec![]), |_| true)
            .err().unwrap();
        assert!(matches!(err, DiError::NoPublicConstructor { .. }));
    }

    #[test]
    fn test_single_constructor_always_selected() {
        let meta = metadata(vec![Constructor::new(|_: (Arc<Cache>, u32)| Repository {
            label: "only",
        })]);
        let selected = select_constructor(ServiceKey::of::<Repository>(), &meta, |_| false).unwrap();
        assert_eq!(selected, Some(0));
    }

    #[test]
    fn test_scalars_disqualify() {
        let meta = metadata(vec![
            Constructor::new(|_: (Arc<Database>, String)| Repository { label: "scalar" }),
            Constructor::new(|_: Arc<Database>| Repository { label: "db" }),
        ]);
        let selected =
            select_constructor(ServiceKey::of::<Repository>(), &meta, only_database).unwrap();
        assert_eq!(selected, Some(1));
    }

    #[test]
    fn test_unregistered_service_disqualifies() {
        let meta = metadata(vec![
            Constructor::new(|_: (Arc<Database>, Arc<Cache>)| Repository { label: "both" }),
            Constructor::new(|_: Arc<Database>| Repository { label: "db" }),
        ]);
        let selected =
            select_constructor(ServiceKey::of::<Repository>(), &meta, only_database).unwrap();
        assert_eq!(selected, Some(1));

        let none = select_constructor(ServiceKey::of::<Repository>(), &meta, |_| false).unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn test_unhinted_preferred_over_hinted() {
        let meta = metadata(vec![
            Constructor::new(|_: Arc<Database>| Repository { label: "hinted" }).hinted(),
            Constructor::new(|_: ()| Repository { label: "plain" }),
        ]);
        let selected =
            select_constructor(ServiceKey::of::<Repository>(), &meta, only_database).unwrap();
        assert_eq!(selected, Some(1));
    }

    #[test]
    fn test_all_hinted_are_candidates() {
        let meta = metadata(vec![
            Constructor::new(|_: Arc<Cache>| Repository { label: "cache" }).hinted(),
            Constructor::new(|_: Arc<Database>| Repository { label: "db" }).hinted(),
        ]);
        let selected =
            select_constructor(ServiceKey::of::<Repository>(), &meta, only_database).unwrap();
        assert_eq!(selected, Some(1));
    }

    #[test]
    fn test_erased_call_builds_instance() {
        let meta = metadata(vec![Constructor::new(|_: ()| Repository { label: "built" })]);
        let instance = meta.constructors[0].call(Vec::new()).unwrap();
        assert_eq!(downcast::<Repository>(&instance).unwrap().label, "built");
    }

    #[test]
    fn test_argument_type_mismatch() {
        let ctor = Constructor::new(|db: Arc<Database>| {
            let _ = db;
            Repository { label: "db" }
        });
        let err = ctor.call(vec![Arg::Scope(None)]).err().unwrap();
        assert!(matches!(err, DiError::Internal(_)));
    }
}
