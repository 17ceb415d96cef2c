//! Error types for dependency injection

use thiserror::Error;

/// Errors that can occur while registering, validating or resolving services
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiError {
    /// The contract type already has a registration
    #[error("Service type is already registered: {type_name}")]
    DuplicateRegistration { type_name: &'static str },

    /// The implementation type lists no constructors
    #[error("{implementation} (registered for {service}) does not have a public constructor")]
    NoPublicConstructor {
        service: &'static str,
        implementation: &'static str,
    },

    /// No constructor of the implementation type can be satisfied
    #[error("{implementation} (registered for {service}) has no usable constructor")]
    NoUsableConstructor {
        service: &'static str,
        implementation: &'static str,
    },

    /// A constructor parameter has no registration
    #[error("{service} requires {missing} but it is not registered")]
    MissingReference {
        service: &'static str,
        missing: &'static str,
    },

    /// A dependency chain revisits one of its ancestors
    #[error("Circular reference between {service} and {circular}")]
    CircularReference {
        service: &'static str,
        circular: &'static str,
    },

    /// A scoped service or scoped pool was resolved without a scope
    #[error("{type_name} requires a scope but none was supplied")]
    ScopeRequired { type_name: &'static str },

    /// Resolution was attempted through a scope that has been disposed
    #[error("{type_name} was requested from a disposed scope")]
    ScopeDisposed { type_name: &'static str },

    /// The pool is at capacity and no slot became available in time
    #[error("No pooled instance of {type_name} is available")]
    PoolExhausted { type_name: &'static str },

    /// The requested type has no registration
    #[error("Service not found: {type_name}")]
    ServiceNotFound { type_name: &'static str },

    /// A user supplied factory failed
    #[error("Failed to create service {type_name}: {reason}")]
    CreationFailed {
        type_name: &'static str,
        reason: String,
    },

    /// Container is locked and cannot be modified
    #[error("Container is locked - cannot register new services")]
    Locked,

    /// Internal error
    #[error("Internal DI error: {0}")]
    Internal(String),
}

impl DiError {
    /// Create a ServiceNotFound error for a type
    #[inline]
    pub fn not_found<T: ?Sized + 'static>() -> Self {
        Self::ServiceNotFound {
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Create a CreationFailed error
    #[inline]
    pub fn creation_failed<T: ?Sized + 'static>(reason: impl Into<String>) -> Self {
        Self::CreationFailed {
            type_name: std::any::type_name::<T>(),
            reason: reason.into(),
        }
    }

    /// Create a DuplicateRegistration error
    #[inline]
    pub fn duplicate<T: ?Sized + 'static>() -> Self {
        Self::DuplicateRegistration {
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Create a ScopeRequired error
    #[inline]
    pub fn scope_required<T: ?Sized + 'static>() -> Self {
        Self::ScopeRequired {
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Error raised when a type-erased value does not hold the expected type
    pub(crate) fn type_mismatch<T: ?Sized + 'static>() -> Self {
        Self::Internal(format!(
            "stored instance is not of type {}",
            std::any::type_name::<T>()
        ))
    }

    /// True when the error means "this type has no registration"
    ///
    /// Constructor fallback only skips a candidate for this kind of failure.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ServiceNotFound { .. })
    }
}

/// Result type alias for DI operations
pub type Result<T> = std::result::Result<T, DiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_messages_name_both_types() {
        let err = DiError::MissingReference {
            service: "app::UserService",
            missing: "app::Database",
        };
        let msg = err.to_string();
        assert!(msg.contains("app::UserService"));
        assert!(msg.contains("app::Database"));

        let err = DiError::CircularReference {
            service: "app::A",
            circular: "app::B",
        };
        assert_eq!(err.to_string(), "Circular reference between app::A and app::B");
    }

    #[test]
    fn test_not_found_helpers() {
        struct Missing;

        let err = DiError::not_found::<Missing>();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Missing"));
        assert!(!DiError::scope_required::<Missing>().is_not_found());
    }
}
