#![no_main]

//! Fuzz target for pool leasing
//!
//! Drives a transient pool and a scoped pool through random lease, release
//! and scope disposal sequences, checking capacity and identity invariants.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use service_container::{Constructible, Constructor, Container, DiError, PoolOptions, Scope};
use std::sync::Arc;

struct Connection;

impl Constructible for Connection {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(|_: ()| Connection)]
    }
}

struct Session;

impl Constructible for Session {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(|_: ()| Session)]
    }
}

#[derive(Debug, Arbitrary)]
enum PoolOp {
    Lease,
    LeaseInScope(u8),
    Release(u8),
    CreateScope,
    SessionInScope(u8),
    DisposeScope(u8),
}

fuzz_target!(|input: (u8, Vec<PoolOp>)| {
    let (size, ops) = input;
    let max_size = usize::from(size % 8) + 1;

    let container = Container::new();
    container
        .add_transient_pool::<Connection, Connection>(PoolOptions::default().max_size(max_size))
        .unwrap();
    container
        .add_scoped_pool::<Session, Session>(PoolOptions::default().max_size(max_size))
        .unwrap();

    let mut leased: Vec<Arc<Connection>> = Vec::new();
    let mut scopes: Vec<Scope> = Vec::new();

    for op in ops.into_iter().take(200) {
        match op {
            PoolOp::Lease => match container.get::<Connection>() {
                Ok(connection) => {
                    assert!(leased.iter().all(|c| !Arc::ptr_eq(c, &connection)));
                    leased.push(connection);
                }
                Err(e) => assert!(matches!(e, DiError::PoolExhausted { .. })),
            },
            PoolOp::LeaseInScope(index) => {
                if let Some(scope) = scopes.get(usize::from(index) % scopes.len().max(1)) {
                    let _ = scope.get::<Connection>();
                }
            }
            PoolOp::Release(index) => {
                if !leased.is_empty() {
                    let connection = leased.swap_remove(usize::from(index) % leased.len());
                    assert!(container.release_pool_item(&connection));
                    assert!(!container.release_pool_item(&connection));
                }
            }
            PoolOp::CreateScope => {
                if let Ok(scope) = container.create_scope() {
                    scopes.push(scope);
                }
            }
            PoolOp::SessionInScope(index) => {
                if let Some(scope) = scopes.get(usize::from(index) % scopes.len().max(1)) {
                    match (scope.get::<Session>(), scope.get::<Session>()) {
                        (Ok(a), Ok(b)) => assert!(Arc::ptr_eq(&a, &b)),
                        (Err(e), _) => assert!(matches!(e, DiError::PoolExhausted { .. })),
                        _ => {}
                    }
                }
            }
            PoolOp::DisposeScope(index) => {
                if !scopes.is_empty() {
                    let scope = scopes.swap_remove(usize::from(index) % scopes.len());
                    scope.dispose();
                    scope.dispose();
                }
            }
        }

        let connections = container.pool_status::<Connection>().unwrap();
        assert!(connections.slots <= max_size);
        assert!(connections.locked <= connections.slots);

        let sessions = container.pool_status::<Session>().unwrap();
        assert!(sessions.slots <= max_size);
        assert!(sessions.locked <= scopes.len());
    }
});
