#![forbid(unsafe_code)]

//! Per-component binding between render passes and field subscriptions.
//!
//! A [`Binding`] belongs to one component instance in an external component
//! system. On every update it runs the component's render inside a recorder
//! window, then registers itself as a scoped observer of exactly the fields
//! the render read. When any of those fields later changes, the binding
//! calls the host's re-render trigger, which leads the host back into
//! [`on_update`](Binding::on_update) — the loop that keeps a component
//! subscribed to precisely what it last rendered from.
//!
//! # Invariants
//!
//! 1. A component is subscribed to a field iff that field was read during
//!    its most recent completed render.
//! 2. Stale subscriptions never outlive the render that produced them:
//!    they are cleared before new ones are established.
//! 3. After [`disconnect`](Binding::disconnect), no write reaches the
//!    re-render trigger.
//!
//! # Failure Modes
//!
//! - **Render panics**: the recorder window is left open; the next
//!   `start()` discards it with a warning. The binding keeps no
//!   subscriptions from the aborted pass.
//! - **Host drops the binding mid-notification**: the observer callback
//!   holds only a weak reference and goes inert.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, trace};

use weft_state::{ObserverFn, Store, recorder};

struct BindingInner {
    connected: bool,
    /// Stores currently holding this binding's observer callback.
    subscriptions: Vec<Store>,
}

/// Glue between one component instance and the stores it renders from.
///
/// Cloning shares the same subscription state (and callback identity).
pub struct Binding {
    inner: Rc<RefCell<BindingInner>>,
    callback: ObserverFn,
}

impl Clone for Binding {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            callback: Rc::clone(&self.callback),
        }
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Binding")
            .field("connected", &inner.connected)
            .field("subscriptions", &inner.subscriptions.len())
            .finish()
    }
}

impl Binding {
    /// Create a binding for a freshly mounted component. `request_update`
    /// is the host's re-render trigger; it may be called any number of
    /// times and coalescing is the host's responsibility.
    #[must_use]
    pub fn new(request_update: impl Fn() + 'static) -> Self {
        let inner = Rc::new(RefCell::new(BindingInner {
            connected: true,
            subscriptions: Vec::new(),
        }));
        let weak = Rc::downgrade(&inner);
        let callback: ObserverFn = Rc::new(move |field: &str| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.borrow().connected {
                return;
            }
            trace!(field, "observed field changed; requesting update");
            request_update();
        });
        Self { inner, callback }
    }

    /// Run one update cycle. Call from the host's update hook.
    ///
    /// Clears the previous render's subscriptions first. If the binding is
    /// disconnected, stops there — the render is skipped and `None` is
    /// returned. Otherwise runs `render` inside a recorder window and
    /// subscribes to exactly the fields it read.
    pub fn on_update<R>(&self, render: impl FnOnce() -> R) -> Option<R> {
        self.clear_subscriptions();
        if !self.inner.borrow().connected {
            debug!("update after disconnect; render skipped");
            return None;
        }

        recorder::start();
        let output = render();
        let log = recorder::finish();

        if let Some(log) = log {
            let mut subscriptions = Vec::with_capacity(log.len());
            for (store, fields) in log.into_entries() {
                store.add_observer(Rc::clone(&self.callback), Some(fields));
                subscriptions.push(store);
            }
            debug!(stores = subscriptions.len(), "render dependencies subscribed");
            self.inner.borrow_mut().subscriptions = subscriptions;
        }
        Some(output)
    }

    /// The unmount hook: clears all subscriptions and disconnects.
    /// Idempotent.
    pub fn disconnect(&self) {
        self.clear_subscriptions();
        let mut inner = self.inner.borrow_mut();
        if inner.connected {
            inner.connected = false;
            debug!("binding disconnected");
        }
    }

    fn clear_subscriptions(&self) {
        let stores = std::mem::take(&mut self.inner.borrow_mut().subscriptions);
        for store in stores {
            store.remove_observer(&self.callback);
        }
    }

    /// Whether the component is still mounted.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.borrow().connected
    }

    /// Number of stores this binding currently observes.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.borrow().subscriptions.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
