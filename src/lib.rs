//! # service-container - Constructor-wired dependency injection for Rust
//!
//! A dependency injection container that maps service contracts (usually
//! `dyn Trait`) to implementation types and builds object graphs by calling
//! declared constructors.
//!
//! ## Features
//!
//! - **Constructor wiring** - Implementations declare constructors over
//!   `Arc<T>` dependencies; the container picks one and resolves its arguments
//! - **Lifetimes** - Transient, scoped and singleton services
//! - **Pools** - Bounded, leased instances with wait, timeout and idle eviction
//! - **Validation** - Missing and circular references are caught before anything
//!   is created
//! - **Decorators** - Wrap created instances before they are cached or returned
//! - **Observable** - Optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use service_container::{Constructible, Constructor, Container, implements};
//! use std::sync::Arc;
//!
//! trait Repository: Send + Sync {
//!     fn find(&self, id: u32) -> String;
//! }
//!
//! struct SqlRepository;
//!
//! impl Repository for SqlRepository {
//!     fn find(&self, id: u32) -> String {
//!         format!("user-{id}")
//!     }
//! }
//!
//! impl Constructible for SqlRepository {
//!     fn constructors() -> Vec<Constructor<Self>> {
//!         vec![Constructor::new(|_: ()| SqlRepository)]
//!     }
//! }
//!
//! implements!(dyn Repository: SqlRepository);
//!
//! struct UserService {
//!     repository: Arc<dyn Repository>,
//! }
//!
//! impl Constructible for UserService {
//!     fn constructors() -> Vec<Constructor<Self>> {
//!         vec![Constructor::new(|repository: Arc<dyn Repository>| UserService { repository })]
//!     }
//! }
//!
//! let container = Container::new();
//! container.add_singleton::<dyn Repository, SqlRepository>().unwrap();
//! container.add_transient::<UserService, UserService>().unwrap();
//!
//! // Fail fast on a broken graph
//! container.check_services().unwrap();
//!
//! let users = container.get::<UserService>().unwrap();
//! assert_eq!(users.repository.find(7), "user-7");
//! ```
//!
//! ## Choosing a Constructor
//!
//! With several constructors the container prefers those without the
//! injection hint, then takes the first whose parameters are all registered.
//!
//! ```rust
//! use service_container::{Constructible, Constructor, Container};
//! use std::sync::Arc;
//!
//! struct Cache;
//! struct Metrics;
//!
//! struct Catalog {
//!     cached: bool,
//! }
//!
//! impl Constructible for Catalog {
//!     fn constructors() -> Vec<Constructor<Self>> {
//!         vec![
//!             Constructor::new(|_: (Arc<Cache>, Arc<Metrics>)| Catalog { cached: true }),
//!             Constructor::new(|_: ()| Catalog { cached: false }),
//!         ]
//!     }
//! }
//!
//! let container = Container::new();
//! container.add_transient::<Catalog, Catalog>().unwrap();
//! assert!(!container.get::<Catalog>().unwrap().cached);
//! ```
//!
//! ## Scopes
//!
//! ```rust
//! use service_container::{Constructible, Constructor, Container, DiError};
//! use std::sync::Arc;
//!
//! struct UnitOfWork;
//!
//! impl Constructible for UnitOfWork {
//!     fn constructors() -> Vec<Constructor<Self>> {
//!         vec![Constructor::new(|_: ()| UnitOfWork)]
//!     }
//! }
//!
//! let container = Container::new();
//! container.add_scoped::<UnitOfWork, UnitOfWork>().unwrap();
//!
//! let request = container.create_scope().unwrap();
//! let a = request.get::<UnitOfWork>().unwrap();
//! let b = request.get::<UnitOfWork>().unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//!
//! // Scoped services need a scope
//! assert!(matches!(
//!     container.get::<UnitOfWork>(),
//!     Err(DiError::ScopeRequired { .. })
//! ));
//! ```
//!
//! ## Pools
//!
//! ```rust
//! use service_container::{Constructible, Constructor, Container, DiError, PoolOptions};
//!
//! struct Connection;
//!
//! impl Constructible for Connection {
//!     fn constructors() -> Vec<Constructor<Self>> {
//!         vec![Constructor::new(|_: ()| Connection)]
//!     }
//! }
//!
//! let container = Container::new();
//! container
//!     .add_transient_pool::<Connection, Connection>(PoolOptions::default().max_size(1))
//!     .unwrap();
//!
//! let connection = container.get::<Connection>().unwrap();
//! assert!(matches!(
//!     container.get::<Connection>(),
//!     Err(DiError::PoolExhausted { .. })
//! ));
//!
//! container.release_pool_item(&connection);
//! assert!(container.get::<Connection>().is_ok());
//! ```

// Lets `#[derive(Constructible)]` output name this crate from inside it
extern crate self as service_container;

mod checker;
mod constructor;
mod container;
mod descriptor;
mod error;
mod factory;
mod injectable;
#[cfg(feature = "logging")]
pub mod logging;
mod options;
mod pool;
mod provider;
mod scope;
mod storage;

pub use checker::DependencyGraphValidator;
pub use constructor::{Arg, Constructible, Constructor, Dependencies, Dependency, Param, ParamKind};
pub use container::{Container, ServiceBuilder};
pub use descriptor::ServiceDescriptor;
pub use error::*;
pub use injectable::{Decorator, Implements, Injectable, Lifetime, ServiceKey};
pub use options::{Options, OptionsMap, OptionsSource};
pub use pool::{POLL_INTERVAL, Pool, PoolLease, PoolMode, PoolOptions, PoolStatus};
pub use provider::{Resolver, ServiceProvider};
pub use scope::{Scope, ScopeId};
pub use storage::{AnyInstance, downcast, erase, instance_addr};

#[cfg(feature = "derive")]
pub use service_container_derive::Constructible;

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Constructible, Constructor, Container, Decorator, DiError, Implements, Lifetime, Options,
        PoolOptions, Resolver, Result, Scope, implements,
    };
    pub use std::sync::Arc;
}
