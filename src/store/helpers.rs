use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::Value;

use super::store::StoreCore;
use crate::error::StoreError;

pub(crate) type HelperFn<S> = Arc<dyn Fn(&S, &[Value]) -> Value + Send + Sync>;

type BoundHelperFn = Arc<dyn Fn(&[Value]) -> Result<Value, StoreError> + Send + Sync>;

/// Helper declarations for [`Store::helpers`](crate::Store::helpers).
///
/// Each helper reads the store state, optionally looks at forwarded
/// arguments, and returns a value.
///
/// ```
/// use fluxstore::HelperMap;
/// use serde_json::json;
///
/// #[derive(Default)]
/// struct Counter {
///     count: i64,
/// }
///
/// let helpers = HelperMap::<Counter>::new()
///     .with("getCount", |s, _| json!(s.count))
///     .with("isAbove", |s, args| {
///         json!(args.first().and_then(|v| v.as_i64()).is_some_and(|n| s.count > n))
///     });
/// assert_eq!(helpers.len(), 2);
/// ```
pub struct HelperMap<S> {
    pub(crate) entries: Vec<(String, HelperFn<S>)>,
}

impl<S> HelperMap<S> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a helper. A later helper with the same name wins.
    pub fn with<F>(mut self, name: impl Into<String>, helper: F) -> Self
    where
        F: Fn(&S, &[Value]) -> Value + Send + Sync + 'static,
    {
        self.entries.push((name.into(), Arc::new(helper)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S> Default for HelperMap<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// A helper bound to its store.
///
/// Cheap to clone. Calling it after the store was destroyed returns
/// [`StoreError::NotCreated`] rather than reading stale state.
#[derive(Clone)]
pub struct Helper {
    name: Arc<str>,
    call: BoundHelperFn,
}

impl Helper {
    pub(crate) fn bind<S>(core: Weak<StoreCore<S>>, name: &str, helper: HelperFn<S>) -> Self
    where
        S: Default + Send + Sync + 'static,
    {
        let call: BoundHelperFn = Arc::new(move |args: &[Value]| -> Result<Value, StoreError> {
            let core = core.upgrade().ok_or(StoreError::StoreDropped)?;
            core.read_created(|state| helper(state, args))
        });
        Self {
            name: Arc::from(name),
            call,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, StoreError> {
        (self.call)(args)
    }
}

impl fmt::Debug for Helper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Helper").field("name", &self.name).finish()
    }
}

/// The set of helpers a created store exposes, keyed by helper name.
#[derive(Clone, Debug, Default)]
pub struct HelperSet {
    helpers: BTreeMap<String, Helper>,
}

impl HelperSet {
    pub(crate) fn insert(&mut self, helper: Helper) {
        self.helpers.insert(helper.name().to_string(), helper);
    }

    pub fn get(&self, name: &str) -> Option<&Helper> {
        self.helpers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    /// Helper names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.helpers.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Helper> {
        self.helpers.values()
    }

    pub fn len(&self) -> usize {
        self.helpers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.helpers.is_empty()
    }
}
