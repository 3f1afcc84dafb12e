#![forbid(unsafe_code)]

//! Lazy derived values that auto-track their field dependencies.
//!
//! # Design
//!
//! [`Derived<T>`] wraps a compute function and its cached result in shared,
//! reference-counted storage. Dependencies are not declared up front:
//! each recomputation runs the compute function inside a recorder window
//! and subscribes to exactly the fields it read, so the dependency set
//! follows the computation as it changes between runs. When any dependency
//! changes, the cached value is invalidated (marked dirty) and the next
//! [`get()`](Derived::get) recomputes.
//!
//! Because the recorder is single-slot, a `get()` that happens while some
//! other window is already open (a component render, another derived's
//! recomputation) does not open its own window. If clean, it replays its
//! current dependency set into the open window and returns the cache; if
//! dirty, it recomputes directly into the open window — the surrounding
//! pass picks up the underlying reads — and stays dirty, deferring its own
//! memoization to the next stand-alone `get()`.
//!
//! # Invariants
//!
//! 1. `get()` never returns a value that is stale with respect to a
//!    dependency mutation that has completed.
//! 2. Version increments by exactly 1 per memoized recomputation.
//! 3. If no dependency has changed, a stand-alone `get()` returns the
//!    cached value without calling the compute function.
//!
//! # Failure Modes
//!
//! - **Dependency store dropped**: the subscription guards become inert;
//!   the derived keeps its last cached value and never dirties from that
//!   source again.
//! - **Compute function writes state**: unsupported; the notification round
//!   would re-enter the derived while it is borrowed.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use crate::recorder;
use crate::store::{ObserverFn, Store, Subscription};

use indexmap::IndexSet;

struct DerivedInner<T> {
    compute: Box<dyn Fn() -> T>,
    cached: Option<T>,
    dirty: Cell<bool>,
    version: u64,
    /// Last read set, replayed into an enclosing window on clean reads.
    deps: Vec<(Store, IndexSet<String>)>,
    /// Guards keeping the dirty-marking callbacks alive.
    subscriptions: Vec<Subscription>,
}

/// A lazily-evaluated, memoized value derived from whatever fields its
/// compute function reads.
///
/// Cloning a `Derived` creates a new handle to the **same** inner state.
pub struct Derived<T> {
    inner: Rc<RefCell<DerivedInner<T>>>,
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Derived")
            .field("cached", &inner.cached)
            .field("dirty", &inner.dirty.get())
            .field("version", &inner.version)
            .finish()
    }
}

impl<T: Clone + 'static> Derived<T> {
    /// Create a derived value. The compute function runs on first `get()`,
    /// not here.
    #[must_use]
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DerivedInner {
                compute: Box::new(compute),
                cached: None,
                dirty: Cell::new(true),
                version: 0,
                deps: Vec::new(),
                subscriptions: Vec::new(),
            })),
        }
    }

    /// Get the current value, recomputing if any dependency has changed.
    ///
    /// # Panics
    ///
    /// Panics if the compute function reads this same `Derived`
    /// (re-entrant borrow).
    #[must_use]
    pub fn get(&self) -> T {
        if recorder::is_recording() {
            return self.get_within_open_window();
        }
        let mut inner = self.inner.borrow_mut();
        if inner.dirty.get() || inner.cached.is_none() {
            recorder::start();
            let value = (inner.compute)();
            let log = recorder::finish().unwrap_or_default();
            self.rewire(&mut inner, log.into_entries());
            inner.cached = Some(value);
            inner.dirty.set(false);
            inner.version += 1;
            trace!(version = inner.version, deps = inner.deps.len(), "derived recomputed");
        }
        inner
            .cached
            .as_ref()
            .expect("cached is always Some after refresh")
            .clone()
    }

    /// `get()` while some other recorder window is open: never claim the
    /// slot. Clean reads replay the dependency set so the surrounding pass
    /// subscribes to the underlying fields; dirty reads recompute straight
    /// into the open window and stay dirty.
    fn get_within_open_window(&self) -> T {
        let inner = self.inner.borrow();
        if !inner.dirty.get() {
            if let Some(cached) = &inner.cached {
                for (store, fields) in &inner.deps {
                    for field in fields {
                        recorder::log_read(store, field);
                    }
                }
                return cached.clone();
            }
        }
        (inner.compute)()
    }

    /// Replace the dependency subscriptions with ones matching `entries`.
    fn rewire(&self, inner: &mut DerivedInner<T>, entries: Vec<(Store, IndexSet<String>)>) {
        // Old guards drop first so a shared callback identity cannot strip
        // the fresh registrations.
        inner.subscriptions.clear();

        let weak = Rc::downgrade(&self.inner);
        let mark_dirty: ObserverFn = Rc::new(move |_field: &str| {
            if let Some(strong) = weak.upgrade() {
                strong.borrow().dirty.set(true);
            }
        });

        let mut subscriptions = Vec::with_capacity(entries.len());
        for (store, fields) in &entries {
            subscriptions.push(store.observe(mark_dirty.clone(), Some(fields.clone())));
        }
        inner.subscriptions = subscriptions;
        inner.deps = entries;
    }

    /// Access the current value by reference without cloning. Forces
    /// recomputation if dirty.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let _ = self.get();
        let inner = self.inner.borrow();
        match inner.cached.as_ref() {
            Some(cached) => f(cached),
            // Only reachable inside an open window while dirty; recompute
            // once more rather than hold a stale reference.
            None => f(&(inner.compute)()),
        }
    }

    /// Whether the cached value is stale.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.borrow().dirty.get()
    }

    /// Force invalidation; the next stand-alone `get()` recomputes.
    pub fn invalidate(&self) {
        self.inner.borrow().dirty.set(true);
    }

    /// Current version number. Increments by 1 on each memoized
    /// recomputation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
