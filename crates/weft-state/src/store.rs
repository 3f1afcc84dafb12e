#![forbid(unsafe_code)]

//! Observable state containers.
//!
//! A [`Store`] is a named collection of fields, each declared once as either
//! plain ([`StateVar`]) or async ([`AsyncVar`](crate::AsyncVar)). Reads go
//! through typed per-field handles and report themselves to the
//! [`recorder`](crate::recorder); writes notify the store's observers for
//! that field name.
//!
//! # Design
//!
//! `Store` is a cheap `Rc`-backed handle; cloning shares the same inner
//! state. Field values live in their handles, not in the store — the store
//! keeps the field registry (name → kind, fixed at declaration) and the
//! observer list.
//!
//! # Invariants
//!
//! 1. A field's kind never changes after declaration; redeclaring any field
//!    name is an error.
//! 2. Setting a value equal to the current one (by `PartialEq`) is a no-op:
//!    no notification fires.
//! 3. Observers are notified synchronously, in registration order, with the
//!    name of the field that changed. The list is snapshotted per round, so
//!    callbacks may subscribe or unsubscribe re-entrantly.
//! 4. Removing an observer that was never added is a no-op.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use futures::task::LocalSpawn;
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, trace, warn};

use crate::async_var::AsyncVar;
use crate::error::{Result, StateError};
use crate::recorder;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a [`Store`], used as the recorder's log key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(u64);

impl StoreId {
    fn next() -> Self {
        Self(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identity value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Observer callback. Receives the name of the field that changed.
pub type ObserverFn = Rc<dyn Fn(&str)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Plain,
    Async,
}

struct ObserverEntry {
    callback: ObserverFn,
    /// `None` means "all fields".
    scope: Option<IndexSet<String>>,
}

impl ObserverEntry {
    fn covers(&self, field: &str) -> bool {
        match &self.scope {
            None => true,
            Some(scope) => scope.contains(field),
        }
    }
}

struct StoreInner {
    id: StoreId,
    name: String,
    fields: IndexMap<String, FieldKind>,
    observers: Vec<ObserverEntry>,
    spawner: Option<Rc<dyn LocalSpawn>>,
}

/// A named collection of observable fields.
pub struct Store {
    inner: Rc<RefCell<StoreInner>>,
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Store")
            .field("id", &inner.id.raw())
            .field("name", &inner.name)
            .field("fields", &inner.fields.len())
            .field("observers", &inner.observers.len())
            .finish()
    }
}

impl Store {
    /// Create a store with no spawner. Plain fields only until
    /// [`set_spawner`](Store::set_spawner) is called.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(StoreInner {
                id: StoreId::next(),
                name: name.into(),
                fields: IndexMap::new(),
                observers: Vec::new(),
                spawner: None,
            })),
        }
    }

    /// Create a store wired to the host event loop, enabling async fields.
    #[must_use]
    pub fn with_spawner(name: impl Into<String>, spawner: impl LocalSpawn + 'static) -> Self {
        let store = Self::new(name);
        store.set_spawner(spawner);
        store
    }

    /// Install (or replace) the spawner used to run async field operations.
    pub fn set_spawner(&self, spawner: impl LocalSpawn + 'static) {
        self.inner.borrow_mut().spawner = Some(Rc::new(spawner));
    }

    /// This store's identity.
    #[must_use]
    pub fn id(&self) -> StoreId {
        self.inner.borrow().id
    }

    /// This store's name.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    /// Number of declared fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.inner.borrow().fields.len()
    }

    /// Number of registered observer entries.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.borrow().observers.len()
    }

    /// Whether `field` has been declared on this store.
    #[must_use]
    pub fn is_declared(&self, field: &str) -> bool {
        self.inner.borrow().fields.contains_key(field)
    }

    fn register(&self, field: &str, kind: FieldKind) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.fields.contains_key(field) {
            warn!(store = %inner.name, field, "field already declared");
            return Err(StateError::FieldRedeclared {
                store: inner.name.clone(),
                field: field.to_string(),
            });
        }
        inner.fields.insert(field.to_string(), kind);
        Ok(())
    }

    /// Declare a plain field with an initial value.
    ///
    /// # Errors
    ///
    /// [`StateError::FieldRedeclared`] if the name is already taken.
    pub fn var<T>(&self, field: impl Into<String>, initial: T) -> Result<StateVar<T>>
    where
        T: Clone + PartialEq + 'static,
    {
        let field = field.into();
        self.register(&field, FieldKind::Plain)?;
        Ok(StateVar {
            value: Rc::new(RefCell::new(initial)),
            store: self.clone(),
            field: Rc::from(field),
        })
    }

    /// Declare an async field backed by a future-producing operation.
    ///
    /// The operation is not started here; the first read of any status
    /// accessor initiates it lazily.
    ///
    /// # Errors
    ///
    /// [`StateError::FieldRedeclared`] if the name is already taken,
    /// [`StateError::SpawnerMissing`] if no spawner is installed.
    pub fn async_var<T, E, F>(
        &self,
        field: impl Into<String>,
        default: T,
        operation: impl Fn() -> F + 'static,
    ) -> Result<AsyncVar<T, E>>
    where
        T: Clone + 'static,
        E: Clone + 'static,
        F: Future<Output = std::result::Result<T, E>> + 'static,
    {
        let field = field.into();
        let spawner = {
            let inner = self.inner.borrow();
            inner
                .spawner
                .clone()
                .ok_or_else(|| StateError::SpawnerMissing {
                    store: inner.name.clone(),
                    field: field.clone(),
                })?
        };
        self.register(&field, FieldKind::Async)?;
        Ok(AsyncVar::new(
            self.clone(),
            Rc::from(field),
            default,
            operation,
            spawner,
        ))
    }

    /// Register an observer, optionally scoped to a set of field names.
    /// `None` means all fields. The same callback may be registered on any
    /// number of stores.
    pub fn add_observer(&self, callback: ObserverFn, scope: Option<IndexSet<String>>) {
        let mut inner = self.inner.borrow_mut();
        trace!(store = %inner.name, scoped = scope.is_some(), "observer added");
        inner.observers.push(ObserverEntry { callback, scope });
    }

    /// Remove every registration of `callback` (by callback identity).
    /// Idempotent: removing a never-added callback is a no-op.
    pub fn remove_observer(&self, callback: &ObserverFn) {
        let mut inner = self.inner.borrow_mut();
        let before = inner.observers.len();
        inner
            .observers
            .retain(|entry| !Rc::ptr_eq(&entry.callback, callback));
        let removed = before - inner.observers.len();
        if removed > 0 {
            trace!(store = %inner.name, removed, "observer removed");
        }
    }

    /// Register an observer and get an RAII guard; dropping the guard
    /// unsubscribes.
    #[must_use]
    pub fn observe(&self, callback: ObserverFn, scope: Option<IndexSet<String>>) -> Subscription {
        self.add_observer(callback.clone(), scope);
        Subscription {
            store: Rc::downgrade(&self.inner),
            callback,
        }
    }

    /// Notify every observer whose scope covers `field`, in registration
    /// order, passing the field name.
    ///
    /// The observer list is snapshotted before the round: callbacks may
    /// re-entrantly subscribe or unsubscribe, but changes take effect from
    /// the next round.
    pub fn notify(&self, field: &str) {
        let round: Vec<ObserverFn> = {
            let inner = self.inner.borrow();
            inner
                .observers
                .iter()
                .filter(|entry| entry.covers(field))
                .map(|entry| entry.callback.clone())
                .collect()
        };
        if round.is_empty() {
            return;
        }
        debug!(store = %self.name(), field, observers = round.len(), "notifying");
        for callback in round {
            callback(field);
        }
    }
}

/// RAII observer registration; dropping it unsubscribes.
///
/// Becomes inert if the store is dropped first.
pub struct Subscription {
    store: Weak<RefCell<StoreInner>>,
    callback: ObserverFn,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            inner
                .borrow_mut()
                .observers
                .retain(|entry| !Rc::ptr_eq(&entry.callback, &self.callback));
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &(self.store.strong_count() > 0))
            .finish()
    }
}

/// Typed handle to a plain field.
///
/// Cloning shares the same slot. Reads report to the recorder; writes
/// notify the owning store's observers when the value actually changed.
pub struct StateVar<T> {
    value: Rc<RefCell<T>>,
    store: Store,
    field: Rc<str>,
}

impl<T> Clone for StateVar<T> {
    fn clone(&self) -> Self {
        Self {
            value: Rc::clone(&self.value),
            store: self.store.clone(),
            field: Rc::clone(&self.field),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for StateVar<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateVar")
            .field("field", &self.field)
            .field("value", &*self.value.borrow())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> StateVar<T> {
    /// Read the current value. Reports the read to the recorder.
    #[must_use]
    pub fn get(&self) -> T {
        recorder::log_read(&self.store, &self.field);
        self.value.borrow().clone()
    }

    /// Read by reference without cloning. Reports the read to the recorder.
    ///
    /// # Panics
    ///
    /// Panics if the closure writes back through this same handle
    /// (re-entrant borrow).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        recorder::log_read(&self.store, &self.field);
        f(&self.value.borrow())
    }

    /// Write a new value. Notifies observers of this field only when the
    /// value differs from the current one; equal writes are no-ops.
    pub fn set(&self, value: T) {
        let changed = {
            let mut current = self.value.borrow_mut();
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        };
        if changed {
            trace!(store = %self.store.name(), field = %self.field, "value changed");
            self.store.notify(&self.field);
        } else {
            trace!(store = %self.store.name(), field = %self.field, "no-op write");
        }
    }

    /// Mutate the value in place. Notifies only if the result differs from
    /// the previous value.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let changed = {
            let mut current = self.value.borrow_mut();
            let before = current.clone();
            f(&mut current);
            *current != before
        };
        if changed {
            self.store.notify(&self.field);
        }
    }

    /// The owning store.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The field name.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn collector() -> (ObserverFn, Rc<RefCell<Vec<String>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let callback: ObserverFn = Rc::new(move |field: &str| {
            sink.borrow_mut().push(field.to_string());
        });
        (callback, seen)
    }

    fn scope(fields: &[&str]) -> Option<IndexSet<String>> {
        Some(fields.iter().map(|f| (*f).to_string()).collect())
    }

    #[test]
    fn redeclared_field_is_an_error() {
        let store = Store::new("app");
        let _x = store.var("x", 0).unwrap();
        let err = store.var("x", 1).unwrap_err();
        assert_eq!(
            err,
            StateError::FieldRedeclared {
                store: "app".into(),
                field: "x".into(),
            }
        );
        assert_eq!(store.field_count(), 1);
    }

    #[test]
    fn changing_write_notifies_with_field_name() {
        let store = Store::new("app");
        let x = store.var("x", 0).unwrap();
        let (callback, seen) = collector();
        store.add_observer(callback, None);

        x.set(1);
        assert_eq!(*seen.borrow(), ["x"]);
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let store = Store::new("app");
        let x = store.var("x", 5).unwrap();
        let (callback, seen) = collector();
        store.add_observer(callback, None);

        x.set(5);
        assert!(seen.borrow().is_empty());
        assert_eq!(x.get(), 5);
    }

    #[test]
    fn scoped_observer_only_sees_its_fields() {
        let store = Store::new("app");
        let a = store.var("a", 0).unwrap();
        let b = store.var("b", 0).unwrap();
        let (callback, seen) = collector();
        store.add_observer(callback, scope(&["a"]));

        b.set(1);
        a.set(1);
        b.set(2);
        assert_eq!(*seen.borrow(), ["a"]);
    }

    #[test]
    fn observers_fire_in_registration_order() {
        let store = Store::new("app");
        let x = store.var("x", 0).unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let sink = Rc::clone(&order);
            store.add_observer(Rc::new(move |_| sink.borrow_mut().push(tag)), None);
        }
        x.set(1);
        assert_eq!(*order.borrow(), ["first", "second", "third"]);
    }

    #[test]
    fn each_changing_write_triggers_its_own_round() {
        let store = Store::new("app");
        let x = store.var("x", 0).unwrap();
        let (callback, seen) = collector();
        store.add_observer(callback, None);

        x.set(1);
        x.set(2);
        x.set(2); // no-op
        x.set(3);
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn remove_observer_is_idempotent() {
        let store = Store::new("app");
        let x = store.var("x", 0).unwrap();
        let (callback, seen) = collector();

        store.remove_observer(&callback); // never added
        store.add_observer(callback.clone(), None);
        store.remove_observer(&callback);
        store.remove_observer(&callback);

        x.set(1);
        assert!(seen.borrow().is_empty());
        assert_eq!(store.observer_count(), 0);
    }

    #[test]
    fn remove_strips_every_registration_of_the_callback() {
        let store = Store::new("app");
        let (callback, _seen) = collector();
        store.add_observer(callback.clone(), scope(&["a"]));
        store.add_observer(callback.clone(), scope(&["b"]));
        assert_eq!(store.observer_count(), 2);

        store.remove_observer(&callback);
        assert_eq!(store.observer_count(), 0);
    }

    #[test]
    fn callback_may_unsubscribe_during_notification() {
        let store = Store::new("app");
        let x = store.var("x", 0).unwrap();

        let store_handle = store.clone();
        let slot: Rc<RefCell<Option<ObserverFn>>> = Rc::new(RefCell::new(None));
        let slot_for_cb = Rc::clone(&slot);
        let fired = Rc::new(Cell::new(0u32));
        let fired_in_cb = Rc::clone(&fired);

        let callback: ObserverFn = Rc::new(move |_| {
            fired_in_cb.set(fired_in_cb.get() + 1);
            if let Some(me) = slot_for_cb.borrow().as_ref() {
                store_handle.remove_observer(me);
            }
        });
        *slot.borrow_mut() = Some(callback.clone());
        store.add_observer(callback, None);

        x.set(1); // fires once, unsubscribes itself mid-round
        x.set(2); // no observers left
        assert_eq!(fired.get(), 1);
        assert_eq!(store.observer_count(), 0);
    }

    #[test]
    fn subscription_guard_unsubscribes_on_drop() {
        let store = Store::new("app");
        let x = store.var("x", 0).unwrap();
        let (callback, seen) = collector();

        let guard = store.observe(callback, None);
        x.set(1);
        assert_eq!(seen.borrow().len(), 1);

        drop(guard);
        x.set(2);
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(store.observer_count(), 0);
    }

    #[test]
    fn subscription_survives_store_drop() {
        let guard;
        {
            let store = Store::new("short-lived");
            let (callback, _seen) = collector();
            guard = store.observe(callback, None);
        }
        drop(guard); // must not panic
    }

    #[test]
    fn update_notifies_only_on_change() {
        let store = Store::new("app");
        let items = store.var("items", vec![1, 2]).unwrap();
        let (callback, seen) = collector();
        store.add_observer(callback, None);

        items.update(|v| v.push(3));
        items.update(|_| {}); // unchanged
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(items.get(), vec![1, 2, 3]);
    }

    #[test]
    fn with_reads_by_reference() {
        let store = Store::new("app");
        let name = store.var("name", String::from("weft")).unwrap();
        let len = name.with(String::len);
        assert_eq!(len, 4);
    }

    #[test]
    fn cloned_handle_shares_the_slot() {
        let store = Store::new("app");
        let x = store.var("x", 0).unwrap();
        let y = x.clone();
        y.set(7);
        assert_eq!(x.get(), 7);
    }

    #[test]
    fn debug_formats() {
        let store = Store::new("app");
        let x = store.var("x", 42).unwrap();
        assert!(format!("{store:?}").contains("app"));
        assert!(format!("{x:?}").contains("42"));
    }
}
