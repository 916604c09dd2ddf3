use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use std::hint::black_box;
use std::sync::Arc;

use fluxstore::{ActionMap, HelperMap, HelperRegistry, LocalDispatcher, Store, StoreOptions};

#[derive(Default)]
struct State {
    counter: i64,
}

fn counter_store(
    name: &str,
    dispatcher: &Arc<LocalDispatcher>,
    registry: &HelperRegistry,
) -> Store<State> {
    let store = Store::with_options(
        name,
        dispatcher.clone(),
        StoreOptions::new().registry(registry.clone()),
    );
    store.actions(ActionMap::new().with("incrementBy", |s: &mut State, args| {
        s.counter += args.first().and_then(Value::as_i64).unwrap_or(0);
        Ok(())
    }));
    store.helpers(HelperMap::new().with("getCount", |s: &State, _| json!(s.counter)));
    store
}

fn dispatch_benchmark(c: &mut Criterion) {
    let registry = HelperRegistry::new();
    let dispatcher = Arc::new(LocalDispatcher::new());
    let _store = counter_store("bench", &dispatcher, &registry);

    c.bench_function("dispatch_action", |b| {
        b.iter(|| {
            dispatcher
                .dispatch_action(black_box("incrementBy"), [json!(1)])
                .unwrap();
        });
    });
}

fn dispatch_fan_out_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_fan_out");

    for store_count in [1, 10, 100].iter() {
        let registry = HelperRegistry::new();
        let dispatcher = Arc::new(LocalDispatcher::new());
        let _stores: Vec<Store<State>> = (0..*store_count)
            .map(|i| counter_store(&format!("store-{i}"), &dispatcher, &registry))
            .collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(store_count),
            store_count,
            |b, _| {
                b.iter(|| {
                    dispatcher
                        .dispatch_action("incrementBy", [black_box(json!(1))])
                        .unwrap();
                });
            },
        );
    }
    group.finish();
}

fn lifecycle_benchmark(c: &mut Criterion) {
    let registry = HelperRegistry::new();
    let dispatcher = Arc::new(LocalDispatcher::new());
    let store = counter_store("cycle", &dispatcher, &registry);

    c.bench_function("destroy_create_cycle", |b| {
        b.iter(|| {
            store.destroy().unwrap();
            store.create().unwrap();
        });
    });
}

fn helper_call_benchmark(c: &mut Criterion) {
    let registry = HelperRegistry::new();
    let dispatcher = Arc::new(LocalDispatcher::new());
    let _store = counter_store("helpers", &dispatcher, &registry);

    c.bench_function("registry_helper_call", |b| {
        b.iter(|| {
            black_box(registry.call("helpers", "getCount", &[]).unwrap());
        });
    });
}

criterion_group!(
    benches,
    dispatch_benchmark,
    dispatch_fan_out_benchmark,
    lifecycle_benchmark,
    helper_call_benchmark,
);
criterion_main!(benches);
