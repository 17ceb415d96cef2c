//! Core traits for dependency injection
//!
//! These traits define what types can be injected, how implementations are
//! exposed through their contracts and how decorators wrap them.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Marker trait for types that can flow through the container.
///
/// This is automatically implemented for all types that are `Send + Sync + 'static`,
/// including trait objects such as `dyn Repository` when the trait has
/// `Send + Sync` supertraits. You never need to implement this manually.
pub trait Injectable: Send + Sync + 'static {}

// Blanket implementation - everything that's Send + Sync + 'static is Injectable
impl<T: ?Sized + Send + Sync + 'static> Injectable for T {}

/// Service lifetime specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifetime {
    /// New instance created on every resolve
    #[default]
    Transient,

    /// Single instance shared across all resolves, created on first access
    Singleton,

    /// One instance per scope
    Scoped,
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Lifetime::Transient => "transient",
            Lifetime::Singleton => "singleton",
            Lifetime::Scoped => "scoped",
        })
    }
}

/// Identity of a contract or implementation type.
///
/// Equality and hashing use the `TypeId` only; the name is carried for
/// diagnostics.
#[derive(Clone, Copy)]
pub struct ServiceKey {
    id: TypeId,
    name: &'static str,
}

impl ServiceKey {
    /// Key for type `T` (which may be unsized, e.g. `dyn Trait`)
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying TypeId
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Human-readable type name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ServiceKey {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Conversion from an implementation to the contract it satisfies.
///
/// Every type implements `Implements<Self>`. Trait-object contracts are wired
/// with the [`implements!`](crate::implements) macro.
///
/// # Examples
///
/// ```rust
/// use service_container::{implements, Implements};
/// use std::sync::Arc;
///
/// trait Greeter: Send + Sync {
///     fn greet(&self) -> String;
/// }
///
/// struct English;
///
/// impl Greeter for English {
///     fn greet(&self) -> String {
///         "hello".into()
///     }
/// }
///
/// implements!(dyn Greeter: English);
///
/// let greeter: Arc<dyn Greeter> = Arc::new(English).upcast();
/// assert_eq!(greeter.greet(), "hello");
/// ```
pub trait Implements<C: ?Sized>: Injectable {
    /// Convert the shared implementation into the shared contract
    fn upcast(self: Arc<Self>) -> Arc<C>;
}

impl<T: Injectable> Implements<T> for T {
    #[inline]
    fn upcast(self: Arc<Self>) -> Arc<T> {
        self
    }
}

/// Declare that one or more implementation types satisfy a trait-object contract
#[macro_export]
macro_rules! implements {
    ($contract:ty : $($implementation:ty),+ $(,)?) => {
        $(
            impl $crate::Implements<$contract> for $implementation {
                #[inline]
                fn upcast(self: ::std::sync::Arc<Self>) -> ::std::sync::Arc<$contract> {
                    self
                }
            }
        )+
    };
}

/// A wrapper applied to a freshly created instance before it is returned or cached.
///
/// The value returned by `proxy` replaces the raw instance everywhere: it is
/// what singletons cache and what pools lease.
pub trait Decorator<C: ?Sized>: Injectable {
    /// Wrap the created instance
    fn proxy(&self, inner: Arc<C>) -> Arc<C>;
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Shape: Send + Sync {
        fn area(&self) -> u32;
    }

    struct Square(u32);

    impl Shape for Square {
        fn area(&self) -> u32 {
            self.0 * self.0
        }
    }

    crate::implements!(dyn Shape: Square);

    #[test]
    fn test_key_identity() {
        assert_eq!(ServiceKey::of::<Square>(), ServiceKey::of::<Square>());
        assert_ne!(ServiceKey::of::<Square>(), ServiceKey::of::<dyn Shape>());
        assert!(ServiceKey::of::<dyn Shape>().name().contains("Shape"));
    }

    #[test]
    fn test_upcast_to_trait_object() {
        let shape: Arc<dyn Shape> = Arc::new(Square(3)).upcast();
        assert_eq!(shape.area(), 9);
    }

    #[test]
    fn test_identity_upcast() {
        let square = Arc::new(Square(2));
        let same: Arc<Square> = Arc::clone(&square).upcast();
        assert!(Arc::ptr_eq(&square, &same));
    }

    #[test]
    fn test_lifetime_display() {
        assert_eq!(Lifetime::default(), Lifetime::Transient);
        assert_eq!(Lifetime::Scoped.to_string(), "scoped");
    }
}
