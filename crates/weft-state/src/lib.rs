#![forbid(unsafe_code)]

//! Dependency-tracked reactive state for Weft.
//!
//! This crate provides the change-tracking primitives a component system
//! binds against:
//!
//! - [`recorder`]: a single-slot, thread-local log of which fields are read
//!   during one render pass — the source of every dependency set.
//! - [`Store`]: a named collection of observable fields with per-field
//!   change subscriptions.
//! - [`StateVar`]: a typed plain field; reads report to the recorder,
//!   writes of an unequal value notify observers.
//! - [`AsyncVar`]: a deferred field with a pending/fulfilled/rejected
//!   lifecycle, lazy initiation on first read, and reload semantics.
//! - [`Derived`]: a lazily-evaluated, memoized value whose dependencies
//!   are auto-discovered through the recorder.
//!
//! # Architecture
//!
//! Everything is single-threaded: `Rc<RefCell<..>>` shared ownership,
//! driven by an external event loop reached through
//! [`futures::task::LocalSpawn`]. There are no locks because there is no
//! parallelism; the one shared mutable resource is the recorder's single
//! slot, which is why nested recording windows are unsupported.
//!
//! # Invariants
//!
//! 1. A field's kind (plain or async) is fixed at declaration.
//! 2. Writing an equal value is a no-op: no notification fires.
//! 3. Observers are notified synchronously, in registration order, with
//!    the changed field's name.
//! 4. An async settlement notifies unconditionally — rejection included —
//!    and a settlement from a superseded run is discarded.

pub mod async_var;
pub mod derived;
pub mod error;
pub mod recorder;
pub mod store;

pub use async_var::AsyncVar;
pub use derived::Derived;
pub use error::{Result, StateError};
pub use recorder::RenderLog;
pub use store::{ObserverFn, StateVar, Store, StoreId, Subscription};

// Observer scopes and render logs use ordered sets; re-exported for
// downstream callers building scopes by hand.
pub use indexmap::IndexSet;
