//! Benchmarks for registration, provider build and resolution

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use service_container::{Constructible, Constructor, Container, PoolOptions, implements};
use std::hint::black_box;
use std::sync::Arc;

trait Store: Send + Sync {
    fn get(&self, key: u32) -> u32;
}

struct MemoryStore;

impl Store for MemoryStore {
    fn get(&self, key: u32) -> u32 {
        key
    }
}

impl Constructible for MemoryStore {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(|_: ()| MemoryStore)]
    }
}

implements!(dyn Store: MemoryStore);

struct Config;

impl Constructible for Config {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(|_: ()| Config)]
    }
}

#[allow(dead_code)]
struct Repository {
    store: Arc<dyn Store>,
    config: Arc<Config>,
}

impl Constructible for Repository {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(|(store, config): (Arc<dyn Store>, Arc<Config>)| {
            Repository { store, config }
        })]
    }
}

#[allow(dead_code)]
struct Handler {
    repository: Arc<Repository>,
    config: Arc<Config>,
}

impl Constructible for Handler {
    fn constructors() -> Vec<Constructor<Self>> {
        vec![Constructor::new(
            |(repository, config): (Arc<Repository>, Arc<Config>)| Handler { repository, config },
        )]
    }
}

/// Store and config singletons, repository scoped, handler transient
fn app_container() -> Container {
    let container = Container::new();
    container.add_singleton::<dyn Store, MemoryStore>().unwrap();
    container.add_singleton::<Config, Config>().unwrap();
    container.add_scoped::<Repository, Repository>().unwrap();
    container.add_transient::<Handler, Handler>().unwrap();
    container
}

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");

    group.bench_function("register_4_services", |b| {
        b.iter(|| black_box(app_container()))
    });

    group.bench_function("register_and_build", |b| {
        b.iter(|| {
            let container = app_container();
            black_box(container.provider().unwrap())
        })
    });

    group.bench_function("check_services", |b| {
        let container = app_container();
        b.iter(|| black_box(container.check_services()))
    });

    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");
    group.throughput(Throughput::Elements(1));

    let container = app_container();
    let scope = container.create_scope().unwrap();

    group.bench_function("get_singleton", |b| {
        b.iter(|| black_box(container.get::<dyn Store>().unwrap()))
    });

    group.bench_function("get_scoped_cached", |b| {
        b.iter(|| black_box(scope.get::<Repository>().unwrap()))
    });

    group.bench_function("get_transient_graph", |b| {
        b.iter(|| black_box(scope.get::<Handler>().unwrap()))
    });

    group.bench_function("contains_check", |b| {
        b.iter(|| black_box(container.contains::<Handler>()))
    });

    group.bench_function("try_get_not_found", |b| {
        b.iter(|| black_box(container.try_get::<String>()))
    });

    group.finish();
}

fn bench_scoped(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoped");

    group.bench_function("create_scope", |b| {
        let container = app_container();
        b.iter(|| black_box(container.create_scope().unwrap()))
    });

    group.bench_function("scope_request_cycle", |b| {
        let container = app_container();
        b.iter(|| {
            let scope = container.create_scope().unwrap();
            let handler = scope.get::<Handler>().unwrap();
            scope.dispose();
            black_box(handler)
        })
    });

    group.finish();
}

fn bench_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool");

    group.bench_function("lease_release", |b| {
        let container = Container::new();
        container
            .add_transient_pool::<dyn Store, MemoryStore>(PoolOptions::default().max_size(4))
            .unwrap();
        b.iter(|| {
            let store = container.get::<dyn Store>().unwrap();
            container.release_pool_item(&store);
            black_box(store)
        })
    });

    group.bench_function("scoped_pool_per_scope", |b| {
        let container = Container::new();
        container
            .add_scoped_pool::<dyn Store, MemoryStore>(PoolOptions::default().max_size(4))
            .unwrap();
        b.iter(|| {
            let scope = container.create_scope().unwrap();
            let store = scope.get::<dyn Store>().unwrap();
            scope.dispose();
            black_box(store)
        })
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");

    group.bench_function("concurrent_reads_4", |b| {
        let container = app_container();
        container.provider().unwrap();

        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let c = container.clone();
                    thread::spawn(move || {
                        for _ in 0..100 {
                            let _ = c.get::<dyn Store>().unwrap();
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_registration,
    bench_resolution,
    bench_scoped,
    bench_pool,
    bench_concurrent,
);

criterion_main!(benches);
