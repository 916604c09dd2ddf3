use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::{trace, warn};

use super::store::StoreCore;
use crate::dispatcher::Callback;
use crate::error::StoreError;

pub(crate) type ActionFn<S> = Arc<dyn Fn(&mut S, &[Value]) -> anyhow::Result<()> + Send + Sync>;

type BoundActionFn = Arc<dyn Fn(&[Value]) -> Result<(), StoreError> + Send + Sync>;

/// Action declarations for [`Store::actions`](crate::Store::actions).
///
/// Actions describe what happened ("select-page"), not how to change the
/// state ("set-page-id"). They receive the store state and the dispatched
/// arguments.
///
/// ```
/// use fluxstore::ActionMap;
///
/// #[derive(Default)]
/// struct Counter {
///     count: i64,
/// }
///
/// let actions = ActionMap::<Counter>::new()
///     .with("increment", |s, _| {
///         s.count += 1;
///         Ok(())
///     })
///     .with("incrementBy", |s, args| {
///         s.count += args.first().and_then(|v| v.as_i64()).unwrap_or(0);
///         Ok(())
///     });
/// assert_eq!(actions.len(), 2);
/// ```
pub struct ActionMap<S> {
    pub(crate) entries: Vec<(String, ActionFn<S>)>,
}

impl<S> ActionMap<S> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add an action. A later action with the same name wins.
    pub fn with<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&mut S, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.entries.push((name.into(), Arc::new(action)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S> Default for ActionMap<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// An action bound to its store at declaration time.
///
/// By convention actions are only triggered through the dispatcher, but the
/// bound handle can be called directly.
#[derive(Clone)]
pub struct Action {
    name: Arc<str>,
    call: BoundActionFn,
}

impl Action {
    pub(crate) fn bind<S>(core: Weak<StoreCore<S>>, name: &str, action: ActionFn<S>) -> Self
    where
        S: Default + Send + Sync + 'static,
    {
        let action_name: Arc<str> = Arc::from(name);
        let err_name = Arc::clone(&action_name);
        let call: BoundActionFn = Arc::new(move |args: &[Value]| -> Result<(), StoreError> {
            let core = core.upgrade().ok_or(StoreError::StoreDropped)?;
            core.write_created(|state| action(state, args))?
                .map_err(|e| StoreError::action(core.name(), &err_name, e))
        });
        Self {
            name: action_name,
            call,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<(), StoreError> {
        (self.call)(args)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("name", &self.name).finish()
    }
}

/// Build the callback a store registers with its dispatcher.
///
/// The first payload element names the action, the rest are its arguments.
/// Names without a matching action are ignored, and so is every payload
/// while the store is not created.
pub(crate) fn dispatch_bridge<S>(core: Weak<StoreCore<S>>) -> Callback
where
    S: Default + Send + Sync + 'static,
{
    Arc::new(move |payload: &[Value]| -> Result<(), StoreError> {
        let Some(core) = core.upgrade() else {
            return Ok(());
        };
        // Destroyed earlier in the same dispatch
        if !core.created() {
            trace!(store = core.name(), "store not created, ignoring dispatch");
            return Ok(());
        }

        let name = match payload.first() {
            Some(Value::String(name)) => name.as_str(),
            Some(other) => {
                warn!(store = core.name(), payload = %other, "dispatched action name is not a string");
                return Err(StoreError::MalformedDispatch(other.to_string()));
            }
            None => {
                warn!(store = core.name(), "empty dispatch payload");
                return Err(StoreError::MalformedDispatch("nothing".to_string()));
            }
        };

        match core.action(name) {
            Some(action) => {
                trace!(store = core.name(), action = name, args = payload.len() - 1, "running action");
                action.call(&payload[1..])
            }
            None => {
                trace!(store = core.name(), action = name, "no matching action");
                Ok(())
            }
        }
    })
}
