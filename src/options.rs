//! Configuration carriers
//!
//! `Options<T>` wraps a configured value so constructors can ask for it
//! like any other dependency. Values come either from
//! [`Container::configure`](crate::Container::configure) or from an
//! external [`OptionsSource`].

use crate::{Injectable, ServiceKey};
use ahash::RandomState;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A configured value of type `T`
pub struct Options<T>(Arc<T>);

impl<T> Options<T> {
    /// Wrap a value
    #[inline]
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Wrap an already shared value
    #[inline]
    pub fn from_arc(value: Arc<T>) -> Self {
        Self(value)
    }

    /// The shared value
    #[inline]
    pub fn value(&self) -> &Arc<T> {
        &self.0
    }
}

impl<T> Clone for Options<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Deref for Options<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for Options<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Options").field(&self.0).finish()
    }
}

/// External lookup for configuration values.
///
/// Asked for `T` when a constructor needs `Options<T>` and nothing is
/// registered for it. The returned value must be an `Arc<T>` erased to
/// `Any`; anything else counts as a miss.
pub trait OptionsSource: Injectable {
    /// Look up the configured value for `key`
    fn lookup(&self, key: &ServiceKey) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// A ready-made [`OptionsSource`] keyed by type
///
/// # Examples
///
/// ```rust
/// use service_container::{OptionsMap, OptionsSource, ServiceKey};
///
/// #[derive(Debug, PartialEq)]
/// struct SmtpSettings {
///     host: String,
/// }
///
/// let map = OptionsMap::new();
/// map.insert(SmtpSettings { host: "mail.local".into() });
///
/// let raw = map.lookup(&ServiceKey::of::<SmtpSettings>()).unwrap();
/// let settings = raw.downcast::<SmtpSettings>().unwrap();
/// assert_eq!(settings.host, "mail.local");
/// ```
#[derive(Default)]
pub struct OptionsMap {
    values: DashMap<TypeId, Arc<dyn Any + Send + Sync>, RandomState>,
}

impl OptionsMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value for `T`, replacing any previous one
    pub fn insert<T: Injectable>(&self, value: T) {
        self.values.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Remove the value for `T`
    pub fn remove<T: Injectable>(&self) -> bool {
        self.values.remove(&TypeId::of::<T>()).is_some()
    }

    /// Number of configured types
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when nothing is configured
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl OptionsSource for OptionsMap {
    fn lookup(&self, key: &ServiceKey) -> Option<Arc<dyn Any + Send + Sync>> {
        self.values.get(&key.id()).map(|v| Arc::clone(v.value()))
    }
}

impl fmt::Debug for OptionsMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionsMap")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Limits {
        max: u32,
    }

    #[test]
    fn test_options_deref_and_clone() {
        let opts = Options::new(Limits { max: 3 });
        let copy = opts.clone();
        assert_eq!(copy.max, 3);
        assert!(Arc::ptr_eq(opts.value(), copy.value()));
    }

    #[test]
    fn test_map_lookup_and_remove() {
        let map = OptionsMap::new();
        assert!(map.lookup(&ServiceKey::of::<Limits>()).is_none());

        map.insert(Limits { max: 9 });
        let raw = map.lookup(&ServiceKey::of::<Limits>()).unwrap();
        assert_eq!(raw.downcast::<Limits>().unwrap().max, 9);

        assert!(map.remove::<Limits>());
        assert!(map.is_empty());
    }
}
