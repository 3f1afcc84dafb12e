//! E2E: async fields driven through the full render/settle/re-render loop.
//!
//! Verifies, against a real `Binding` and `TestHost`:
//!
//! 1. Lazy initiation: the operation starts on the first render that reads
//!    any status accessor, and only once.
//! 2. Settlement (fulfilled or rejected) re-renders dependents.
//! 3. Reload resets to pending synchronously, re-renders, then re-renders
//!    again on settlement.
//! 4. Revalidate keeps the old value visible until the new run settles.
//! 5. A stale settlement from a superseded run never surfaces.

#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::channel::oneshot;
use weft_harness::TestHost;
use weft_state::Store;

#[test]
fn pending_render_then_fulfilled_render() {
    let host = TestHost::new();
    let store = Store::with_spawner("remote", host.spawner());
    let runs = Rc::new(Cell::new(0u32));
    let runs_in_op = Rc::clone(&runs);
    let greeting = store
        .async_var::<String, String, _>("greeting", String::new(), move || {
            runs_in_op.set(runs_in_op.get() + 1);
            async { Ok(String::from("ok")) }
        })
        .unwrap();

    assert_eq!(runs.get(), 0, "no read yet, no operation");

    let observed = Rc::new(RefCell::new(Vec::new()));
    let (var, sink) = (greeting.clone(), Rc::clone(&observed));
    let id = host.mount(move || {
        sink.borrow_mut().push((var.is_pending(), var.value()));
    });

    assert_eq!(runs.get(), 1, "first render initiated the operation");
    assert_eq!(
        *observed.borrow(),
        [(true, String::new())],
        "first render sees pending + default"
    );

    assert_eq!(host.tick(), 1, "settlement re-renders the component");
    assert_eq!(host.render_count(id), 2);
    assert_eq!(
        observed.borrow().last(),
        Some(&(false, String::from("ok")))
    );
    assert!(greeting.is_fulfilled());
    assert_eq!(runs.get(), 1, "settlement must not restart the operation");
}

#[test]
fn rejection_rerenders_with_error_and_default() {
    let host = TestHost::new();
    let store = Store::with_spawner("remote", host.spawner());
    let load = store
        .async_var::<i32, String, _>("load", -1, || async { Err(String::from("boom")) })
        .unwrap();

    let var = load.clone();
    let id = host.mount(move || {
        let _ = var.is_pending();
    });

    assert_eq!(host.tick(), 1);
    assert_eq!(host.render_count(id), 2);
    assert!(load.is_rejected());
    assert_eq!(load.error().as_deref(), Some("boom"));
    assert_eq!(load.value(), -1, "rejected value falls back to the default");
}

#[test]
fn reload_shows_loading_then_the_new_result() {
    let host = TestHost::new();
    let store = Store::with_spawner("remote", host.spawner());
    let counter = Rc::new(Cell::new(0u32));
    let counter_in_op = Rc::clone(&counter);
    let load = store
        .async_var::<u32, String, _>("load", 0, move || {
            counter_in_op.set(counter_in_op.get() + 1);
            let run = counter_in_op.get();
            async move { Ok(run) }
        })
        .unwrap();

    let phases = Rc::new(RefCell::new(Vec::new()));
    let (var, sink) = (load.clone(), Rc::clone(&phases));
    let id = host.mount(move || {
        sink.borrow_mut().push((var.is_pending(), var.value()));
    });
    host.tick();
    assert_eq!(phases.borrow().last(), Some(&(false, 1)));

    load.reload();
    // The reset is synchronous: an update is already queued and the
    // component, once flushed, renders the loading state.
    assert_eq!(host.flush(), 1);
    assert_eq!(phases.borrow().last(), Some(&(true, 0)));

    assert_eq!(host.tick(), 1);
    assert_eq!(host.render_count(id), 4);
    assert_eq!(phases.borrow().last(), Some(&(false, 2)));
}

#[test]
fn revalidate_swaps_the_value_without_a_loading_state() {
    let host = TestHost::new();
    let store = Store::with_spawner("remote", host.spawner());
    let counter = Rc::new(Cell::new(0u32));
    let counter_in_op = Rc::clone(&counter);
    let load = store
        .async_var::<u32, String, _>("load", 0, move || {
            counter_in_op.set(counter_in_op.get() + 1);
            let run = counter_in_op.get();
            async move { Ok(run) }
        })
        .unwrap();

    let phases = Rc::new(RefCell::new(Vec::new()));
    let (var, sink) = (load.clone(), Rc::clone(&phases));
    host.mount(move || {
        sink.borrow_mut().push((var.is_pending(), var.value()));
    });
    host.tick();
    assert_eq!(phases.borrow().last(), Some(&(false, 1)));

    load.revalidate();
    assert_eq!(host.flush(), 0, "no synchronous notification");
    assert_eq!(host.tick(), 1, "one re-render on settlement");
    assert_eq!(phases.borrow().last(), Some(&(false, 2)));
    let loading_renders = phases.borrow().iter().filter(|(pending, _)| *pending).count();
    assert_eq!(loading_renders, 1, "only the initial render was pending");
}

#[test]
fn superseded_run_cannot_overwrite_the_newer_result() {
    let host = TestHost::new();
    let store = Store::with_spawner("remote", host.spawner());

    // Launch order pops from the back: old receiver first, then new.
    let (tx_old, rx_old) = oneshot::channel::<u32>();
    let (tx_new, rx_new) = oneshot::channel::<u32>();
    let receivers = Rc::new(RefCell::new(vec![rx_new, rx_old]));

    let queue = Rc::clone(&receivers);
    let load = store
        .async_var::<u32, String, _>("load", 0, move || {
            let rx = queue.borrow_mut().pop();
            async move {
                match rx {
                    Some(rx) => rx.await.map_err(|_| String::from("cancelled")),
                    None => Err(String::from("exhausted")),
                }
            }
        })
        .unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let (var, sink) = (load.clone(), Rc::clone(&seen));
    let id = host.mount(move || {
        sink.borrow_mut().push(var.value());
    });

    load.revalidate(); // supersedes the first run
    tx_new.send(2).unwrap();
    host.tick();
    assert_eq!(seen.borrow().last(), Some(&2));
    let renders_after_new = host.render_count(id);

    tx_old.send(1).unwrap();
    host.tick();
    assert_eq!(seen.borrow().last(), Some(&2), "stale result discarded");
    assert_eq!(
        host.render_count(id),
        renders_after_new,
        "stale settlement must not re-render"
    );
}

#[test]
fn async_and_plain_fields_mix_in_one_render() {
    let host = TestHost::new();
    let store = Store::with_spawner("mixed", host.spawner());
    let label = store.var("label", String::from("loading")).unwrap();
    let load = store
        .async_var::<u32, String, _>("load", 0, || async { Ok(9) })
        .unwrap();

    let (text, var) = (label.clone(), load.clone());
    let id = host.mount(move || {
        let _ = text.get();
        let _ = var.value();
    });

    host.tick(); // settle
    assert_eq!(host.render_count(id), 2);

    label.set(String::from("done"));
    assert_eq!(host.flush(), 1);
    assert_eq!(host.render_count(id), 3);

    host.unmount(id);
    load.reload();
    host.tick();
    assert_eq!(host.render_count(id), 3, "unmounted component stays quiet");
}
