#![forbid(unsafe_code)]

//! Read recording for dependency tracking.
//!
//! The recorder is a single-slot, thread-local buffer that captures which
//! store fields are read during one render pass. A binding opens a window
//! with [`start()`], lets the render run, then closes it with [`finish()`]
//! and subscribes to exactly the fields the log contains.
//!
//! # Design
//!
//! The slot holds at most one open [`RenderLog`]. Nested windows are not
//! supported: [`start()`] discards any log already open. Reads outside a
//! window are no-ops, so state accessors can log unconditionally.
//!
//! # Invariants
//!
//! 1. A field appears at most once per store entry, in order of first read.
//! 2. Store entries appear in order of each store's first logged read.
//! 3. [`finish()`] closes the window; subsequent reads are not recorded
//!    until the next [`start()`].
//! 4. A window never spans a suspension point: it is opened and closed
//!    synchronously around the render, so reads inside async continuations
//!    are never attributed to a render's dependency set.

use std::cell::RefCell;

use indexmap::{IndexMap, IndexSet};
use tracing::{trace, warn};

use crate::store::{Store, StoreId};

thread_local! {
    static ACTIVE: RefCell<Option<RenderLog>> = const { RefCell::new(None) };
}

/// One store's entry in a [`RenderLog`].
#[derive(Debug, Clone)]
struct LogEntry {
    store: Store,
    fields: IndexSet<String>,
}

/// The set of fields read during one recording window, grouped by store.
#[derive(Debug, Clone, Default)]
pub struct RenderLog {
    entries: IndexMap<StoreId, LogEntry>,
}

impl RenderLog {
    /// Number of stores that had at least one field read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no fields were read at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in order of each store's first read.
    pub fn iter(&self) -> impl Iterator<Item = (&Store, &IndexSet<String>)> {
        self.entries.values().map(|e| (&e.store, &e.fields))
    }

    /// Consume the log into `(store, fields)` pairs, first-read order.
    #[must_use]
    pub fn into_entries(self) -> Vec<(Store, IndexSet<String>)> {
        self.entries
            .into_values()
            .map(|e| (e.store, e.fields))
            .collect()
    }

    /// The fields read from `store`, if any.
    #[must_use]
    pub fn fields_for(&self, store: &Store) -> Option<&IndexSet<String>> {
        self.entries.get(&store.id()).map(|e| &e.fields)
    }
}

/// Open a new recording window, discarding any window already open.
pub fn start() {
    ACTIVE.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            warn!("recorder window already open; discarding its log");
        }
        trace!("recorder window opened");
        *slot = Some(RenderLog::default());
    });
}

/// Record a read of `field` on `store`. No-op when no window is open.
pub fn log_read(store: &Store, field: &str) {
    ACTIVE.with(|slot| {
        if let Some(log) = slot.borrow_mut().as_mut() {
            let entry = log.entries.entry(store.id()).or_insert_with(|| LogEntry {
                store: store.clone(),
                fields: IndexSet::new(),
            });
            if entry.fields.insert(field.to_string()) {
                trace!(store = %store.name(), field, "read recorded");
            }
        }
    });
}

/// Close the window and return its log. `None` if no window was open.
pub fn finish() -> Option<RenderLog> {
    ACTIVE.with(|slot| {
        let log = slot.borrow_mut().take();
        if let Some(log) = &log {
            trace!(stores = log.len(), "recorder window closed");
        }
        log
    })
}

/// Whether a recording window is currently open.
#[must_use]
pub fn is_recording() -> bool {
    ACTIVE.with(|slot| slot.borrow().is_some())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
