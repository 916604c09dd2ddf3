//! # Fluxstore
//!
//! Flux-style stores for Rust.
//!
//! A [`Store`] holds private state, reacts to actions dispatched through a
//! [`Dispatcher`], and exposes read-only helpers to a view layer.
//!
//! ## Lifecycle
//!
//! Stores are created and destroyed independently, any number of times:
//! - `create()` runs the `on_created` hooks, registers with the dispatcher
//!   if actions are declared, and publishes the helpers
//! - `destroy()` runs the `on_destroyed` hooks, withdraws the helpers and
//!   unregisters, keeping the declarations for the next cycle
//!
//! Actions and helpers may be declared before or after creation.
//!
//! ## Collaborators
//!
//! - [`Dispatcher`] - the `register`/`unregister` contract a store consumes,
//!   with [`LocalDispatcher`] as an in-process implementation
//! - [`HelperRegistry`] - process-wide mapping from store name to its helpers

pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod store;

// Re-export main types for convenience
pub use dispatcher::{Callback, DispatchToken, Dispatcher, LocalDispatcher};
pub use error::{HookPhase, StoreError};
pub use registry::HelperRegistry;
pub use store::{Action, ActionMap, Helper, HelperMap, HelperSet, Lifecycle, Store, StoreOptions};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Default)]
    struct Counter {
        count: i64,
    }

    #[test]
    fn it_works() {
        // Basic smoke test
        HelperRegistry::scope(|| {
            let dispatcher = Arc::new(LocalDispatcher::new());
            let store: Store<Counter> = Store::new("smoke", dispatcher.clone());
            store.actions(ActionMap::new().with("increment", |s: &mut Counter, _| {
                s.count += 1;
                Ok(())
            }));
            store.helpers(HelperMap::new().with("getCount", |s: &Counter, _| json!(s.count)));

            dispatcher.dispatch_action("increment", []).unwrap();
            assert_eq!(store.call_helper("getCount", &[]).unwrap(), json!(1));
        });
    }
}
