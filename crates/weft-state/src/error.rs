#![forbid(unsafe_code)]

//! Error type for state declaration misuse.
//!
//! Only declaration-time misuse surfaces as an error: redeclaring a field or
//! declaring an async field on a store with no spawner installed. Misuse on
//! the render path (logging a read outside a window, removing an observer
//! that was never added) is a silent no-op so a render can never crash.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// A field name was declared twice on the same store. Field kind is
    /// fixed at declaration and never changes.
    #[error("field `{field}` already declared on store `{store}`")]
    FieldRedeclared { store: String, field: String },

    /// An async field was declared on a store that has no spawner to run
    /// its operation on.
    #[error("no spawner installed on store `{store}` for async field `{field}`")]
    SpawnerMissing { store: String, field: String },
}
