//! Error types for stores and dispatchers.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Boxed error produced by a user supplied hook or action.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Lifecycle phase a hook belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Created,
    Destroyed,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::Created => f.write_str("onCreated"),
            HookPhase::Destroyed => f.write_str("onDestroyed"),
        }
    }
}

/// Errors that can occur while driving a store or dispatching to it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("malformed dispatch: first argument must be an action name string, got {0}")]
    MalformedDispatch(String),

    #[error("{phase} hook of store '{store}' failed: {source}")]
    Hook {
        store: String,
        phase: HookPhase,
        #[source]
        source: BoxError,
    },

    #[error("action '{action}' of store '{store}' failed: {source}")]
    Action {
        store: String,
        action: String,
        #[source]
        source: BoxError,
    },

    #[error("store '{store}' is not created")]
    NotCreated { store: String },

    #[error("store has been dropped")]
    StoreDropped,

    #[error("store '{store}' has no helper named '{helper}'")]
    UnknownHelper { store: String, helper: String },

    #[error("cannot dispatch in the middle of a dispatch")]
    NestedDispatch,
}

impl StoreError {
    pub(crate) fn hook(store: &str, phase: HookPhase, source: anyhow::Error) -> Self {
        StoreError::Hook {
            store: store.to_string(),
            phase,
            source: source.into(),
        }
    }

    pub(crate) fn action(store: &str, action: &str, source: anyhow::Error) -> Self {
        StoreError::Action {
            store: store.to_string(),
            action: action.to_string(),
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_error_keeps_source() {
        let err = StoreError::hook("counter", HookPhase::Created, anyhow::anyhow!("boom"));
        assert_eq!(
            err.to_string(),
            "onCreated hook of store 'counter' failed: boom"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn malformed_dispatch_names_the_payload() {
        let err = StoreError::MalformedDispatch("42".to_string());
        assert!(err.to_string().contains("got 42"));
    }
}
