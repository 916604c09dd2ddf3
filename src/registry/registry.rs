use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::HelperSet;

struct Published {
    owner: u64,
    helpers: HelperSet,
}

/// Registry mapping store names to their currently exposed helpers.
///
/// Supports both a global registry (default) and scoped registries for
/// isolation. Cloning yields another handle to the same registry.
///
/// # Examples
///
/// Stores publish into the current registry:
///
/// ```
/// use fluxstore::{HelperMap, HelperRegistry, LocalDispatcher, Store};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// #[derive(Default)]
/// struct Greeting;
///
/// HelperRegistry::scope(|| {
///     let store: Store<Greeting> = Store::new("greeting", Arc::new(LocalDispatcher::new()));
///     store.helpers(HelperMap::new().with("hello", |_: &Greeting, _| json!("hi")));
///
///     let registry = HelperRegistry::current();
///     assert_eq!(registry.call("greeting", "hello", &[]).unwrap(), json!("hi"));
/// });
/// ```
#[derive(Clone)]
pub struct HelperRegistry {
    entries: Arc<RwLock<HashMap<String, Published>>>,
}

// Thread-local stack for scoped registries
thread_local! {
    static REGISTRY_STACK: RefCell<Vec<HelperRegistry>> = const { RefCell::new(Vec::new()) };
}

impl HelperRegistry {
    /// Create a new, empty registry unrelated to the global one.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Run a function with a fresh isolated registry as the current one.
    ///
    /// Stores constructed inside `f` publish into that registry.
    pub fn scope<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        Self::with_registry(Self::new(), f)
    }

    /// Get the global registry (fallback).
    pub fn global() -> Self {
        static REGISTRY: OnceLock<HelperRegistry> = OnceLock::new();
        REGISTRY.get_or_init(Self::new).clone()
    }

    /// Get the current registry: the innermost scoped one on this thread,
    /// or the global registry.
    pub fn current() -> Self {
        REGISTRY_STACK.with(|stack| stack.borrow().last().cloned().unwrap_or_else(Self::global))
    }

    /// Run a function with a specific registry as the current one.
    ///
    /// The previous registry is current again once `f` returns or unwinds.
    pub fn with_registry<F, R>(registry: Self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _entered = ScopeEntry::push(registry);
        f()
    }

    /// Publish the full helper set of a store, replacing any previous set.
    pub fn publish(&self, store: &str, helpers: HelperSet) {
        self.publish_owned(store, 0, helpers);
    }

    pub(crate) fn publish_owned(&self, store: &str, owner: u64, helpers: HelperSet) {
        let mut entries = self.write();
        if let Some(previous) = entries.get(store) {
            if previous.owner != owner {
                warn!(store, "helper set replaces one published by another store");
            }
        }
        debug!(store, helpers = helpers.len(), "published helpers");
        entries.insert(store.to_string(), Published { owner, helpers });
    }

    /// Remove a store's helpers, returning them.
    pub fn clear(&self, store: &str) -> Option<HelperSet> {
        let removed = self.write().remove(store).map(|p| p.helpers);
        if removed.is_some() {
            debug!(store, "cleared helpers");
        }
        removed
    }

    /// Remove a store's helpers only if `owner` published them.
    pub(crate) fn retract(&self, store: &str, owner: u64) {
        let mut entries = self.write();
        if entries.get(store).is_some_and(|p| p.owner == owner) {
            entries.remove(store);
            debug!(store, "cleared helpers");
        }
    }

    /// The helper set currently published for `store`.
    pub fn get(&self, store: &str) -> Option<HelperSet> {
        self.read().get(store).map(|p| p.helpers.clone())
    }

    pub fn contains(&self, store: &str) -> bool {
        self.read().contains_key(store)
    }

    /// Call a published helper.
    pub fn call(&self, store: &str, helper: &str, args: &[Value]) -> Result<Value, StoreError> {
        let found = self
            .read()
            .get(store)
            .and_then(|p| p.helpers.get(helper).cloned());
        match found {
            Some(h) => h.call(args),
            None => Err(StoreError::UnknownHelper {
                store: store.to_string(),
                helper: helper.to_string(),
            }),
        }
    }

    /// Names of all stores with published helpers, sorted.
    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every published helper set.
    ///
    /// Useful for resetting between tests.
    pub fn clear_all(&self) {
        self.write().clear();
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Published>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Published>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One entry on the scoped registry stack, popped on drop.
struct ScopeEntry;

impl ScopeEntry {
    fn push(registry: HelperRegistry) -> Self {
        REGISTRY_STACK.with(|stack| stack.borrow_mut().push(registry));
        ScopeEntry
    }
}

impl Drop for ScopeEntry {
    fn drop(&mut self) {
        REGISTRY_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

impl Default for HelperRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HelperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperRegistry")
            .field("stores", &self.store_names())
            .finish()
    }
}
