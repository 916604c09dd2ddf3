//! Process-wide registry of exposed store helpers.
//!
//! Created stores publish their helper set here under the store name, and
//! destroyed stores clear it. View layers look helpers up by name instead of
//! holding on to store handles.

mod registry;

pub use registry::HelperRegistry;
