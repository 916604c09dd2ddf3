//! Flux stores.
//!
//! A store owns private state, reacts to actions dispatched by name, and
//! exposes read-only helpers. Declarations (actions, helpers, hooks) are kept
//! across create/destroy cycles; everything a cycle produces is dropped on
//! destruction.

mod actions;
mod helpers;
mod store;

pub use actions::{Action, ActionMap};
pub use helpers::{Helper, HelperMap, HelperSet};
pub use store::{Lifecycle, Store, StoreOptions};
