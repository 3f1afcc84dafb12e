#![forbid(unsafe_code)]

//! Async fields: deferred values with a pending/fulfilled/rejected lifecycle.
//!
//! An [`AsyncVar`] wraps a future-producing operation. The operation is not
//! started at declaration: the first read of any status accessor initiates
//! it lazily, so a render that only checks [`is_pending`](AsyncVar::is_pending)
//! still starts the load and still subscribes to the field. Settlement flips
//! the status to fulfilled or rejected and notifies the owning store's
//! observers for this field — unconditionally, rejection included, since
//! that notification is what re-renders dependents.
//!
//! # Design
//!
//! States: uninitiated → pending → (fulfilled | rejected), re-entering
//! pending on [`reload`](AsyncVar::reload); there is no terminal state.
//! The operation runs as a task spawned on the store's `LocalSpawn` handle;
//! the recorder window never spans the suspension because the read is
//! logged synchronously and the settlement arrives on a later event-loop
//! turn.
//!
//! Reloading does not cancel an in-flight operation. Instead each launch
//! bumps a generation counter and a settlement carrying a stale generation
//! is discarded, so a superseded run can never overwrite a newer result.
//!
//! # Failure Modes
//!
//! - **Operation rejects**: first-class, non-fatal. Captured as the error,
//!   surfaced through [`error`](AsyncVar::error)/[`is_rejected`](AsyncVar::is_rejected),
//!   never propagated into the render path.
//! - **Spawner gone**: spawning the operation fails; the var stays pending
//!   and a warning is logged. With a dead host loop no settlement could be
//!   delivered anyway.
//! - **All handles dropped mid-flight**: the settlement task holds only a
//!   weak reference and becomes inert.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use futures::task::{LocalSpawn, LocalSpawnExt};
use tracing::{debug, trace, warn};

use crate::recorder;
use crate::store::Store;

type Operation<T, E> = Rc<dyn Fn() -> LocalBoxFuture<'static, Result<T, E>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Fulfilled,
    Rejected,
}

struct AsyncInner<T, E> {
    store: Store,
    field: Rc<str>,
    operation: Operation<T, E>,
    default: T,
    spawner: Rc<dyn LocalSpawn>,
    initiated: bool,
    phase: Phase,
    result: Option<T>,
    error: Option<E>,
    /// Bumped per launch; stale settlements are discarded.
    generation: u64,
}

/// Typed handle to an async field.
///
/// Cloning shares the same state. Every status accessor reports a read to
/// the recorder before returning, which is what lets a render subscribe to
/// the field through any of them.
pub struct AsyncVar<T, E> {
    inner: Rc<RefCell<AsyncInner<T, E>>>,
}

impl<T, E> Clone for AsyncVar<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E> std::fmt::Debug for AsyncVar<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("AsyncVar")
            .field("field", &inner.field)
            .field("initiated", &inner.initiated)
            .field("phase", &inner.phase)
            .field("generation", &inner.generation)
            .finish()
    }
}

impl<T, E> AsyncVar<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    pub(crate) fn new<F>(
        store: Store,
        field: Rc<str>,
        default: T,
        operation: impl Fn() -> F + 'static,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self
    where
        F: Future<Output = Result<T, E>> + 'static,
    {
        Self {
            inner: Rc::new(RefCell::new(AsyncInner {
                store,
                field,
                operation: Rc::new(move || operation().boxed_local()),
                default,
                spawner,
                initiated: false,
                phase: Phase::Pending,
                result: None,
                error: None,
                generation: 0,
            })),
        }
    }

    /// Log a read of this field and lazily initiate the operation.
    fn touch(&self) {
        {
            let inner = self.inner.borrow();
            recorder::log_read(&inner.store, &inner.field);
        }
        self.initiate();
    }

    /// Start the operation if it has never been started. Subsequent calls
    /// are no-ops; use [`reload`](AsyncVar::reload) to re-run it.
    pub fn initiate(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.initiated {
                return;
            }
            inner.initiated = true;
            inner.phase = Phase::Pending;
            inner.result = None;
            inner.error = None;
            trace!(field = %inner.field, "async field initiated");
        }
        self.launch();
    }

    /// Bump the generation and spawn one run of the operation.
    fn launch(&self) {
        let (operation, generation, spawner, field) = {
            let mut inner = self.inner.borrow_mut();
            inner.generation += 1;
            (
                Rc::clone(&inner.operation),
                inner.generation,
                Rc::clone(&inner.spawner),
                Rc::clone(&inner.field),
            )
        };
        // The operation closure runs outside the inner borrow so it may
        // read other state freely.
        let future = operation();
        let weak: Weak<RefCell<AsyncInner<T, E>>> = Rc::downgrade(&self.inner);
        let task = async move {
            let outcome = future.await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            Self::settle(&inner, generation, outcome);
        };
        if let Err(err) = spawner.spawn_local(task) {
            warn!(field = %field, error = %err, "failed to spawn async operation; field stays pending");
        }
    }

    fn settle(inner: &Rc<RefCell<AsyncInner<T, E>>>, generation: u64, outcome: Result<T, E>) {
        let (store, field) = {
            let mut inner = inner.borrow_mut();
            if generation != inner.generation {
                warn!(
                    field = %inner.field,
                    stale = generation,
                    current = inner.generation,
                    "discarding stale async settlement"
                );
                return;
            }
            match outcome {
                Ok(value) => {
                    inner.phase = Phase::Fulfilled;
                    inner.result = Some(value);
                    inner.error = None;
                }
                Err(error) => {
                    inner.phase = Phase::Rejected;
                    inner.error = Some(error);
                    inner.result = None;
                }
            }
            let rejected = inner.phase == Phase::Rejected;
            debug!(field = %inner.field, rejected, "async field settled");
            (inner.store.clone(), Rc::clone(&inner.field))
        };
        // Unconditional: rejection must re-render dependents too.
        store.notify(&field);
    }

    /// Whether the operation has not yet settled. Reports a read and
    /// lazily initiates.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.touch();
        self.inner.borrow().phase == Phase::Pending
    }

    /// Whether the operation settled successfully. Reports a read and
    /// lazily initiates.
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        self.touch();
        self.inner.borrow().phase == Phase::Fulfilled
    }

    /// Whether the operation settled with an error. Reports a read and
    /// lazily initiates.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.touch();
        self.inner.borrow().phase == Phase::Rejected
    }

    /// The fulfilled result, or the default while pending or rejected.
    /// Reports a read and lazily initiates.
    #[must_use]
    pub fn value(&self) -> T {
        self.touch();
        let inner = self.inner.borrow();
        match &inner.result {
            Some(value) if inner.phase == Phase::Fulfilled => value.clone(),
            _ => inner.default.clone(),
        }
    }

    /// The rejection error, if rejected. Reports a read and lazily
    /// initiates.
    #[must_use]
    pub fn error(&self) -> Option<E> {
        self.touch();
        self.inner.borrow().error.clone()
    }

    /// Re-run the operation, resetting visible state first: the field
    /// reverts to pending with the result cleared and observers are
    /// notified synchronously, so dependents show the loading state before
    /// the operation settles (and are notified again when it does).
    pub fn reload(&self) {
        let (store, field) = {
            let mut inner = self.inner.borrow_mut();
            recorder::log_read(&inner.store, &inner.field);
            inner.initiated = true;
            inner.phase = Phase::Pending;
            inner.result = None;
            inner.error = None;
            debug!(field = %inner.field, "reload requested");
            (inner.store.clone(), Rc::clone(&inner.field))
        };
        store.notify(&field);
        self.launch();
    }

    /// Re-run the operation without touching visible state: the previous
    /// result (or error) stays in place while the new run is in flight, and
    /// observers hear nothing until it settles.
    pub fn revalidate(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            recorder::log_read(&inner.store, &inner.field);
            inner.initiated = true;
            debug!(field = %inner.field, "revalidate requested");
        }
        self.launch();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
