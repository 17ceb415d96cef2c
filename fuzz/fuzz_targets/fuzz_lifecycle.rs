#![no_main]

//! Fuzz target for registration and lifetime semantics
//!
//! Interleaves registration, removal, locking, scope creation and
//! resolution, checking lifetime identity after every resolve.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use service_container::{Constructible, Constructor, Container, DiError, Scope};
use std::sync::Arc;

struct Leaf;

impl Constructible for Leaf {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(|_: ()| Leaf)]
    }
}

struct Node {
    leaf: Arc<Leaf>,
}

impl Constructible for Node {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(|leaf: Arc<Leaf>| Node { leaf })]
    }
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Kind {
    Transient,
    Scoped,
    Singleton,
}

#[derive(Debug, Arbitrary)]
enum LifecycleOp {
    RegisterLeaf(Kind),
    RegisterNode(Kind),
    RemoveLeaf,
    RemoveNode,
    Lock,
    CreateScope,
    DisposeScope,
    GetLeaf { scoped: bool },
    GetNode { scoped: bool },
    Check,
}

fn register<T: Constructible>(container: &Container, kind: Kind) -> Result<(), DiError> {
    match kind {
        Kind::Transient => container.add_transient::<T, T>(),
        Kind::Scoped => container.add_scoped::<T, T>(),
        Kind::Singleton => container.add_singleton::<T, T>(),
    }
}

fn resolve_twice<T: Send + Sync + 'static>(
    container: &Container,
    scope: Option<&Scope>,
    kind: Option<Kind>,
) {
    let get = || match scope {
        Some(scope) => scope.get::<T>(),
        None => container.get::<T>(),
    };
    match (get(), get(), kind) {
        (Ok(a), Ok(b), Some(Kind::Transient)) => assert!(!Arc::ptr_eq(&a, &b)),
        (Ok(a), Ok(b), Some(_)) => assert!(Arc::ptr_eq(&a, &b)),
        (Err(DiError::ScopeRequired { .. }), _, Some(Kind::Scoped)) => assert!(scope.is_none()),
        _ => {}
    }
}

fuzz_target!(|ops: Vec<LifecycleOp>| {
    let container = Container::new();
    let mut leaf: Option<Kind> = None;
    let mut node: Option<Kind> = None;
    let mut scope: Option<Scope> = None;

    for op in ops.into_iter().take(100) {
        match op {
            LifecycleOp::RegisterLeaf(kind) => match register::<Leaf>(&container, kind) {
                Ok(()) => leaf = Some(kind),
                Err(e) => assert!(matches!(
                    e,
                    DiError::Locked | DiError::DuplicateRegistration { .. }
                )),
            },
            LifecycleOp::RegisterNode(kind) => match register::<Node>(&container, kind) {
                Ok(()) => node = Some(kind),
                Err(e) => assert!(matches!(
                    e,
                    DiError::Locked | DiError::DuplicateRegistration { .. }
                )),
            },
            LifecycleOp::RemoveLeaf => {
                if let Ok(true) = container.remove::<Leaf>() {
                    leaf = None;
                    // A live scope still resolves from the provider it was created with
                    scope = None;
                }
            }
            LifecycleOp::RemoveNode => {
                if let Ok(true) = container.remove::<Node>() {
                    node = None;
                    scope = None;
                }
            }
            LifecycleOp::Lock => container.lock(),
            LifecycleOp::CreateScope => {
                scope = container.create_scope().ok();
            }
            LifecycleOp::DisposeScope => {
                if let Some(scope) = scope.take() {
                    scope.dispose();
                    scope.dispose();
                    assert!(scope.is_disposed());
                }
            }
            LifecycleOp::GetLeaf { scoped } => {
                let scope = if scoped { scope.as_ref() } else { None };
                resolve_twice::<Leaf>(&container, scope, leaf);
            }
            LifecycleOp::GetNode { scoped } => {
                let scope = if scoped { scope.as_ref() } else { None };
                if leaf.is_some() {
                    resolve_twice::<Node>(&container, scope, node);
                } else if node.is_some() {
                    assert!(matches!(
                        container.get::<Node>(),
                        Err(DiError::MissingReference { .. })
                    ));
                }
            }
            LifecycleOp::Check => {
                let result = container.check_services();
                if node.is_some() && leaf.is_none() {
                    assert!(matches!(result, Err(DiError::MissingReference { .. })));
                } else {
                    assert!(result.is_ok());
                }
            }
        }
    }
});
