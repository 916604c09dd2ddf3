//! Dispatcher contract consumed by stores.
//!
//! A store only needs `register` and `unregister`; how a dispatcher fans an
//! action out to its callbacks is its own business. [`LocalDispatcher`] is a
//! small in-process implementation that calls callbacks in registration order.

mod dispatcher;

pub use dispatcher::{Callback, DispatchToken, Dispatcher, LocalDispatcher};
