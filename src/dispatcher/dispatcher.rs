use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, ThreadId};

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::StoreError;

/// Callback handed to [`Dispatcher::register`].
///
/// Receives the whole dispatch payload: the action name followed by its
/// arguments.
pub type Callback = Arc<dyn Fn(&[Value]) -> Result<(), StoreError> + Send + Sync>;

/// Opaque handle identifying one registration with a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DispatchToken(u64);

impl DispatchToken {
    /// Wrap a raw id.
    ///
    /// Only for [`Dispatcher`] implementations minting the tokens they hand
    /// out from [`Dispatcher::register`]. A token does not prove ownership of
    /// a registration by itself: dispatchers hand each one to exactly one
    /// registrant, and stores only ever unregister the token they received.
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DispatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID_{}", self.0)
    }
}

/// The registration side of a dispatcher.
///
/// At most one callback is active per token. A store unregisters only tokens
/// it received itself.
pub trait Dispatcher: Send + Sync {
    /// Register a callback and return the token identifying it.
    fn register(&self, callback: Callback) -> DispatchToken;

    /// Remove a registration. Unknown tokens should be ignored.
    fn unregister(&self, token: &DispatchToken);
}

/// In-process dispatcher invoking callbacks in registration order.
///
/// Dispatches from different threads are serialised. Dispatching again from
/// inside a callback on the same thread is rejected with
/// [`StoreError::NestedDispatch`]. A callback must not block on a dispatch
/// running on another thread.
///
/// # Examples
///
/// ```
/// use fluxstore::{Dispatcher, LocalDispatcher, StoreError};
/// use serde_json::{json, Value};
/// use std::sync::Arc;
///
/// let dispatcher = LocalDispatcher::new();
/// let token = dispatcher.register(Arc::new(|payload: &[Value]| -> Result<(), StoreError> {
///     assert_eq!(payload[0], json!("ping"));
///     Ok(())
/// }));
///
/// dispatcher.dispatch_action("ping", []).unwrap();
/// dispatcher.unregister(&token);
/// assert!(dispatcher.is_empty());
/// ```
pub struct LocalDispatcher {
    next_id: AtomicU64,
    callbacks: RwLock<BTreeMap<DispatchToken, Callback>>,
    /// Held for the whole of a dispatch.
    serial: Mutex<()>,
    /// Thread currently dispatching.
    owner: Mutex<Option<ThreadId>>,
}

impl LocalDispatcher {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            callbacks: RwLock::new(BTreeMap::new()),
            serial: Mutex::new(()),
            owner: Mutex::new(None),
        }
    }

    /// Dispatch a raw payload to every registered callback.
    ///
    /// Stops at the first callback error and returns it. Callbacks
    /// unregistered by an earlier callback of the same dispatch are skipped.
    pub fn dispatch(&self, payload: &[Value]) -> Result<(), StoreError> {
        let current = thread::current().id();
        if *self.owner() == Some(current) {
            return Err(StoreError::NestedDispatch);
        }
        let _serial = self.serial.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = DispatchingGuard::enter(&self.owner, current);

        // Snapshot so callbacks may register or unregister while we iterate
        let callbacks: Vec<(DispatchToken, Callback)> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(token, cb)| (*token, Arc::clone(cb)))
            .collect();

        trace!(callbacks = callbacks.len(), "dispatching payload");
        for (token, callback) in callbacks {
            if !self.is_registered(&token) {
                trace!(%token, "skipping callback unregistered during dispatch");
                continue;
            }
            trace!(%token, "invoking callback");
            callback(payload)?;
        }
        Ok(())
    }

    /// Dispatch `name` followed by `args`.
    pub fn dispatch_action<I>(&self, name: &str, args: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = Value>,
    {
        let payload: Vec<Value> = std::iter::once(Value::from(name)).chain(args).collect();
        self.dispatch(&payload)
    }

    /// Whether a dispatch is currently running on any thread.
    pub fn is_dispatching(&self) -> bool {
        self.owner().is_some()
    }

    /// Number of active registrations.
    pub fn len(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_registered(&self, token: &DispatchToken) -> bool {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(token)
    }

    fn owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LocalDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for LocalDispatcher {
    fn register(&self, callback: Callback) -> DispatchToken {
        let token = DispatchToken(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, callback);
        debug!(%token, "registered callback");
        token
    }

    fn unregister(&self, token: &DispatchToken) {
        let removed = self
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
        debug!(%token, known = removed.is_some(), "unregistered callback");
    }
}

/// Marks the dispatching thread, cleared even if a callback panics.
struct DispatchingGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> DispatchingGuard<'a> {
    fn enter(owner: &'a Mutex<Option<ThreadId>>, thread: ThreadId) -> Self {
        *owner.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread);
        Self(owner)
    }
}

impl Drop for DispatchingGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::time::Duration;

    fn cb<F>(f: F) -> Callback
    where
        F: Fn(&[Value]) -> Result<(), StoreError> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let dispatcher = LocalDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let seen = seen.clone();
            dispatcher.register(cb(move |_| {
                seen.lock().unwrap().push(label);
                Ok(())
            }));
        }

        dispatcher.dispatch_action("anything", []).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn payload_carries_name_and_args() {
        let dispatcher = LocalDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        dispatcher.register(cb(move |payload| {
            seen_clone.lock().unwrap().extend_from_slice(payload);
            Ok(())
        }));

        dispatcher
            .dispatch_action("incrementBy", [json!(5), json!("x")])
            .unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![json!("incrementBy"), json!(5), json!("x")]
        );
    }

    #[test]
    fn unregister_removes_only_that_token() {
        let dispatcher = LocalDispatcher::new();
        let a = dispatcher.register(cb(|_| Ok(())));
        let b = dispatcher.register(cb(|_| Ok(())));
        assert_ne!(a, b);
        assert_eq!(dispatcher.len(), 2);

        dispatcher.unregister(&a);
        assert_eq!(dispatcher.len(), 1);

        // Unknown tokens are ignored
        dispatcher.unregister(&a);
        dispatcher.unregister(&DispatchToken::from_raw(999));
        assert_eq!(dispatcher.len(), 1);

        dispatcher.unregister(&b);
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn first_error_stops_dispatch() {
        let dispatcher = LocalDispatcher::new();
        let reached = Arc::new(Mutex::new(false));
        let reached_clone = reached.clone();

        dispatcher.register(cb(|_| Err(StoreError::StoreDropped)));
        dispatcher.register(cb(move |_| {
            *reached_clone.lock().unwrap() = true;
            Ok(())
        }));

        let err = dispatcher.dispatch_action("x", []).unwrap_err();
        assert!(matches!(err, StoreError::StoreDropped));
        assert!(!*reached.lock().unwrap());
        assert!(!dispatcher.is_dispatching());
    }

    #[test]
    fn nested_dispatch_is_rejected() {
        let dispatcher = Arc::new(LocalDispatcher::new());
        let inner = Arc::downgrade(&dispatcher);
        let nested = Arc::new(Mutex::new(None));
        let nested_clone = nested.clone();

        dispatcher.register(cb(move |_| {
            if let Some(d) = inner.upgrade() {
                assert!(d.is_dispatching());
                *nested_clone.lock().unwrap() = Some(d.dispatch_action("again", []));
            }
            Ok(())
        }));

        dispatcher.dispatch_action("outer", []).unwrap();
        let result = nested.lock().unwrap().take().unwrap();
        assert!(matches!(result, Err(StoreError::NestedDispatch)));
        assert!(!dispatcher.is_dispatching());
    }

    #[test]
    fn callback_unregistered_mid_dispatch_is_skipped() {
        let dispatcher = Arc::new(LocalDispatcher::new());
        let inner = Arc::downgrade(&dispatcher);
        let victim = Arc::new(Mutex::new(None::<DispatchToken>));
        let victim_clone = victim.clone();
        let reached = Arc::new(AtomicUsize::new(0));
        let reached_clone = reached.clone();

        dispatcher.register(cb(move |_| {
            if let (Some(d), Some(token)) = (inner.upgrade(), *victim_clone.lock().unwrap()) {
                d.unregister(&token);
            }
            Ok(())
        }));
        let token = dispatcher.register(cb(move |_| {
            reached_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        *victim.lock().unwrap() = Some(token);

        dispatcher.dispatch_action("logout", []).unwrap();
        assert_eq!(reached.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.len(), 1);
    }

    #[test]
    fn concurrent_dispatches_are_serialised() {
        let dispatcher = LocalDispatcher::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        dispatcher.register(cb(move |_| {
            std::thread::sleep(Duration::from_millis(20));
            runs_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let barrier = &Barrier::new(2);
        let dispatcher = &dispatcher;
        let results: Vec<Result<(), StoreError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(move || {
                        barrier.wait();
                        dispatcher.dispatch_action("slow", [])
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(results.iter().all(Result::is_ok), "{results:?}");
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(!dispatcher.is_dispatching());
    }

    #[test]
    fn token_display_is_opaque_id() {
        assert_eq!(DispatchToken::from_raw(3).to_string(), "ID_3");
    }
}
