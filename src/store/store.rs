use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::debug;

use super::actions::{dispatch_bridge, Action, ActionFn, ActionMap};
use super::helpers::{Helper, HelperFn, HelperMap, HelperSet};
use crate::dispatcher::{DispatchToken, Dispatcher};
use crate::error::{HookPhase, StoreError};
use crate::registry::HelperRegistry;

type Hook<S> = Arc<dyn Fn(&mut S) -> anyhow::Result<()> + Send + Sync>;

// 0 is reserved for sets published directly through the registry
static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Where a store is in its create/destroy cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed, never created.
    Uninitialized,
    Created,
    /// Destroyed at least once and not created since.
    Destroyed,
}

/// Options for [`Store::with_options`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Create the store right away. Defaults to `true`.
    pub autocreate: bool,
    /// Registry to publish helpers to. Defaults to [`HelperRegistry::current`].
    pub registry: Option<HelperRegistry>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn autocreate(mut self, autocreate: bool) -> Self {
        self.autocreate = autocreate;
        self
    }

    pub fn registry(mut self, registry: HelperRegistry) -> Self {
        self.registry = Some(registry);
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            autocreate: true,
            registry: None,
        }
    }
}

/// What the application declared. Survives destruction.
struct Declarations<S> {
    actions: HashMap<String, Action>,
    helpers: BTreeMap<String, HelperFn<S>>,
    on_created: Vec<Hook<S>>,
    on_destroyed: Vec<Hook<S>>,
}

/// What a create/destroy cycle produces. Reset wholesale on destruction.
struct Runtime<S> {
    created: bool,
    token: Option<DispatchToken>,
    state: Option<S>,
    attached: HelperSet,
}

impl<S> Default for Runtime<S> {
    fn default() -> Self {
        Self {
            created: false,
            token: None,
            state: None,
            attached: HelperSet::default(),
        }
    }
}

pub(crate) struct StoreCore<S> {
    id: u64,
    name: String,
    dispatcher: Arc<dyn Dispatcher>,
    registry: HelperRegistry,
    declarations: RwLock<Declarations<S>>,
    runtime: RwLock<Runtime<S>>,
    destroyed: AtomicUsize,
}

impl<S> StoreCore<S>
where
    S: Default + Send + Sync + 'static,
{
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn action(&self, name: &str) -> Option<Action> {
        self.declarations().actions.get(name).cloned()
    }

    pub(crate) fn created(&self) -> bool {
        self.runtime().created
    }

    /// Read the state of a created store.
    pub(crate) fn read_created<R>(&self, f: impl FnOnce(&S) -> R) -> Result<R, StoreError> {
        let runtime = self.runtime();
        match runtime.state.as_ref() {
            Some(state) if runtime.created => Ok(f(state)),
            _ => Err(self.not_created()),
        }
    }

    /// Mutate the state of a created store.
    pub(crate) fn write_created<R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R, StoreError> {
        let mut runtime = self.runtime_mut();
        let created = runtime.created;
        match runtime.state.as_mut() {
            Some(state) if created => Ok(f(state)),
            _ => Err(self.not_created()),
        }
    }

    fn not_created(&self) -> StoreError {
        StoreError::NotCreated {
            store: self.name.clone(),
        }
    }

    fn declarations(&self) -> RwLockReadGuard<'_, Declarations<S>> {
        self.declarations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn declarations_mut(&self) -> RwLockWriteGuard<'_, Declarations<S>> {
        self.declarations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn runtime(&self) -> RwLockReadGuard<'_, Runtime<S>> {
        self.runtime.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn runtime_mut(&self) -> RwLockWriteGuard<'_, Runtime<S>> {
        self.runtime.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> Drop for StoreCore<S> {
    fn drop(&mut self) {
        let runtime = self
            .runtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = runtime.token.take() {
            self.dispatcher.unregister(&token);
        }
        if runtime.created {
            self.registry.retract(&self.name, self.id);
        }
    }
}

/// A named Flux store.
///
/// A store owns private state of type `S`, reacts to actions dispatched by
/// name, and exposes read-only helpers. It registers with its dispatcher only
/// while it is created and has actions, and publishes its helpers to a
/// [`HelperRegistry`] only while it is created.
///
/// Handles are cheap to clone and share the same store. Hooks, actions and
/// helpers run while the state is locked and must not call back into the
/// same store.
///
/// # Examples
///
/// ```
/// use fluxstore::{ActionMap, HelperMap, HelperRegistry, LocalDispatcher, Store};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// #[derive(Default)]
/// struct Counter {
///     count: i64,
/// }
///
/// HelperRegistry::scope(|| {
///     let dispatcher = Arc::new(LocalDispatcher::new());
///     let store: Store<Counter> = Store::new("counter", dispatcher.clone());
///
///     store.actions(ActionMap::new().with("increment", |s: &mut Counter, _| {
///         s.count += 1;
///         Ok(())
///     }));
///     store.helpers(HelperMap::new().with("getCount", |s: &Counter, _| json!(s.count)));
///
///     dispatcher.dispatch_action("increment", []).unwrap();
///     assert_eq!(store.call_helper("getCount", &[]).unwrap(), json!(1));
///
///     store.destroy().unwrap();
///     assert!(dispatcher.is_empty());
/// });
/// ```
pub struct Store<S> {
    core: Arc<StoreCore<S>>,
}

impl<S> Store<S>
where
    S: Default + Send + Sync + 'static,
{
    /// Create a store bound to `dispatcher` and create it right away.
    pub fn new(name: impl Into<String>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::with_options(name, dispatcher, StoreOptions::default())
    }

    /// Create a store with explicit options.
    pub fn with_options(
        name: impl Into<String>,
        dispatcher: Arc<dyn Dispatcher>,
        options: StoreOptions,
    ) -> Self {
        let core = Arc::new(StoreCore {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::SeqCst),
            name: name.into(),
            dispatcher,
            registry: options.registry.unwrap_or_else(HelperRegistry::current),
            declarations: RwLock::new(Declarations {
                actions: HashMap::new(),
                helpers: BTreeMap::new(),
                on_created: Vec::new(),
                on_destroyed: Vec::new(),
            }),
            runtime: RwLock::new(Runtime::default()),
            destroyed: AtomicUsize::new(0),
        });
        let store = Self { core };

        if options.autocreate {
            // Nothing is declared yet, so there are no hooks that could fail
            let mut runtime = store.core.runtime_mut();
            runtime.state = Some(S::default());
            store.finish_create(&mut runtime);
        }
        store
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// The dispatcher this store is bound to.
    pub fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        Arc::clone(&self.core.dispatcher)
    }

    /// The token the dispatcher knows this store by, while registered.
    pub fn dispatch_token(&self) -> Option<DispatchToken> {
        self.core.runtime().token
    }

    /// Whether the store is created.
    pub fn created(&self) -> bool {
        self.core.created()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        if self.created() {
            Lifecycle::Created
        } else if self.core.destroyed.load(Ordering::SeqCst) > 0 {
            Lifecycle::Destroyed
        } else {
            Lifecycle::Uninitialized
        }
    }

    /// Declare actions this store handles.
    ///
    /// Merges into the actions declared so far. If the store is already
    /// created but not registered yet, it registers with the dispatcher now.
    pub fn actions(&self, actions: ActionMap<S>) {
        {
            let mut declarations = self.core.declarations_mut();
            for (name, action) in actions.entries {
                let bound = self.bind_action(&name, action);
                declarations.actions.insert(name, bound);
            }
        }

        let mut runtime = self.core.runtime_mut();
        if runtime.created && runtime.token.is_none() {
            runtime.token = self.register();
        }
    }

    /// Declare the helpers this store exposes, replacing earlier ones.
    ///
    /// If the store is created the new set is attached and published now.
    pub fn helpers(&self, helpers: HelperMap<S>) {
        self.core.declarations_mut().helpers = helpers.entries.into_iter().collect();

        let mut runtime = self.core.runtime_mut();
        if runtime.created {
            self.attach_helpers(&mut runtime);
        }
    }

    /// Register a hook run when the store is created.
    ///
    /// If the store is already created the hook also runs immediately, once.
    pub fn on_created<F>(&self, hook: F) -> Result<(), StoreError>
    where
        F: Fn(&mut S) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let hook: Hook<S> = Arc::new(hook);
        self.core.declarations_mut().on_created.push(Arc::clone(&hook));

        let mut runtime = self.core.runtime_mut();
        let created = runtime.created;
        match runtime.state.as_mut() {
            Some(state) if created => {
                hook(state).map_err(|e| StoreError::hook(self.name(), HookPhase::Created, e))
            }
            _ => Ok(()),
        }
    }

    /// Register a hook run when the store is destroyed.
    pub fn on_destroyed<F>(&self, hook: F)
    where
        F: Fn(&mut S) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.core.declarations_mut().on_destroyed.push(Arc::new(hook));
    }

    /// Create the store.
    ///
    /// Runs the `on_created` hooks against fresh state, registers with the
    /// dispatcher if actions are declared, and attaches the helpers. Does
    /// nothing if the store is already created. A failing hook stops the
    /// creation and leaves the store not created.
    pub fn create(&self) -> Result<(), StoreError> {
        let mut runtime = self.core.runtime_mut();
        if runtime.created {
            return Ok(());
        }

        let hooks = self.core.declarations().on_created.clone();
        let state = runtime.state.insert(S::default());
        for hook in &hooks {
            hook(state).map_err(|e| StoreError::hook(self.name(), HookPhase::Created, e))?;
        }

        self.finish_create(&mut runtime);
        Ok(())
    }

    /// Destroy the store.
    ///
    /// Runs the `on_destroyed` hooks, withdraws the helpers, unregisters
    /// from the dispatcher and drops the state. Declarations are kept, so the
    /// store can be created again. Does nothing if the store is not created.
    pub fn destroy(&self) -> Result<(), StoreError> {
        let mut runtime = self.core.runtime_mut();
        if !runtime.created {
            debug!(store = self.name(), "destroy on a store that is not created");
            return Ok(());
        }

        let hooks = self.core.declarations().on_destroyed.clone();
        let state = runtime.state.get_or_insert_with(S::default);
        for hook in &hooks {
            hook(state).map_err(|e| StoreError::hook(self.name(), HookPhase::Destroyed, e))?;
        }

        self.core.registry.retract(self.name(), self.core.id);
        if let Some(token) = runtime.token.take() {
            self.core.dispatcher.unregister(&token);
            debug!(store = self.name(), %token, "unregistered from dispatcher");
        }

        *runtime = Runtime::default();
        self.core.destroyed.fetch_add(1, Ordering::SeqCst);
        debug!(store = self.name(), "destroyed");
        Ok(())
    }

    /// Read the state. `None` unless the store is created.
    pub fn read<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&S) -> R,
    {
        self.core.read_created(f).ok()
    }

    /// A declared action, bound to this store.
    pub fn action(&self, name: &str) -> Option<Action> {
        self.core.action(name)
    }

    /// An attached helper. `None` unless the store is created.
    pub fn helper(&self, name: &str) -> Option<Helper> {
        self.core.runtime().attached.get(name).cloned()
    }

    /// Names of the attached helpers, sorted.
    pub fn helper_names(&self) -> Vec<String> {
        self.core.runtime().attached.names()
    }

    /// Call an attached helper by name.
    pub fn call_helper(&self, name: &str, args: &[Value]) -> Result<Value, StoreError> {
        let helper = {
            let runtime = self.core.runtime();
            if !runtime.created {
                return Err(self.core.not_created());
            }
            runtime.attached.get(name).cloned()
        };
        match helper {
            Some(helper) => helper.call(args),
            None => Err(StoreError::UnknownHelper {
                store: self.name().to_string(),
                helper: name.to_string(),
            }),
        }
    }

    fn finish_create(&self, runtime: &mut Runtime<S>) {
        if runtime.token.is_none() {
            runtime.token = self.register();
        }
        self.attach_helpers(runtime);
        runtime.created = true;
        debug!(store = self.name(), token = ?runtime.token, "created");
    }

    /// Register with the dispatcher if any actions are declared.
    fn register(&self) -> Option<DispatchToken> {
        if self.core.declarations().actions.is_empty() {
            return None;
        }
        let token = self
            .core
            .dispatcher
            .register(dispatch_bridge(Arc::downgrade(&self.core)));
        debug!(store = self.name(), %token, "registered with dispatcher");
        Some(token)
    }

    fn bind_action(&self, name: &str, action: ActionFn<S>) -> Action {
        Action::bind(Arc::downgrade(&self.core), name, action)
    }

    fn attach_helpers(&self, runtime: &mut Runtime<S>) {
        let mut attached = HelperSet::default();
        for (name, helper) in self.core.declarations().helpers.iter() {
            attached.insert(Helper::bind(
                Arc::downgrade(&self.core),
                name,
                Arc::clone(helper),
            ));
        }
        self.core
            .registry
            .publish_owned(self.name(), self.core.id, attached.clone());
        runtime.attached = attached;
    }
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<S> fmt::Debug for Store<S>
where
    S: Default + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.core.name)
            .field("lifecycle", &self.lifecycle())
            .field("token", &self.dispatch_token())
            .finish()
    }
}
