//! Counter application driven through a dispatcher

use std::sync::Arc;

use fluxstore::{ActionMap, HelperMap, HelperRegistry, LocalDispatcher, Store, StoreOptions};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct CounterState {
    count: i64,
    step: i64,
    history: Vec<i64>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fluxstore=debug".parse()?))
        .init();

    println!("=== Counter Application ===\n");

    let dispatcher = Arc::new(LocalDispatcher::new());

    println!("1. Declaring the counter store");
    let store: Store<CounterState> = Store::with_options(
        "counter",
        dispatcher.clone(),
        StoreOptions::new().autocreate(false),
    );

    store.on_created(|state| {
        state.step = 1;
        state.history.push(0);
        Ok(())
    })?;
    store.on_destroyed(|state| {
        println!("   [Destroyed] history was {:?}", state.history);
        Ok(())
    });

    store.actions(
        ActionMap::new()
            .with("increment", |state: &mut CounterState, _| {
                state.count += state.step;
                state.history.push(state.count);
                Ok(())
            })
            .with("decrement", |state: &mut CounterState, _| {
                state.count -= state.step;
                state.history.push(state.count);
                Ok(())
            })
            .with("setStep", |state: &mut CounterState, args| {
                let step = args
                    .first()
                    .and_then(Value::as_i64)
                    .ok_or_else(|| anyhow::anyhow!("setStep needs a number"))?;
                state.step = step;
                Ok(())
            })
            .with("reset", |state: &mut CounterState, _| {
                state.count = 0;
                state.history.push(0);
                Ok(())
            }),
    );

    store.helpers(
        HelperMap::new()
            .with("count", |state: &CounterState, _| json!(state.count))
            .with("isEven", |state: &CounterState, _| json!(state.count % 2 == 0))
            .with("history", |state: &CounterState, _| json!(state.history)),
    );

    println!("   created: {}, registrations: {}", store.created(), dispatcher.len());

    println!("\n2. Creating the store");
    store.create()?;
    println!("   created: {}, registrations: {}", store.created(), dispatcher.len());

    let registry = HelperRegistry::current();
    let print_state = || -> anyhow::Result<()> {
        println!(
            "   Count: {} | Even: {}",
            registry.call("counter", "count", &[])?,
            registry.call("counter", "isEven", &[])?
        );
        Ok(())
    };

    println!("\n3. Incrementing...");
    for _ in 0..3 {
        dispatcher.dispatch_action("increment", [])?;
        print_state()?;
    }

    println!("\n4. Changing step size to 5");
    dispatcher.dispatch_action("setStep", [json!(5)])?;
    dispatcher.dispatch_action("increment", [])?;
    print_state()?;

    println!("\n5. Decrementing...");
    dispatcher.dispatch_action("decrement", [])?;
    print_state()?;

    println!("\n6. A malformed dispatch is rejected");
    if let Err(e) = dispatcher.dispatch(&[json!(42)]) {
        println!("   error: {e}");
    }

    println!("\n7. History: {}", store.call_helper("history", &[])?);

    println!("\n8. Resetting...");
    dispatcher.dispatch_action("reset", [])?;
    print_state()?;

    println!("\n9. Destroying the store");
    store.destroy()?;
    println!(
        "   created: {}, registrations: {}, helpers published: {}",
        store.created(),
        dispatcher.len(),
        registry.contains("counter")
    );

    println!("\n✓ Counter application complete!");
    Ok(())
}
