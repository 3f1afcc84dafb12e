#![forbid(unsafe_code)]

//! Deterministic component-lifecycle host for tests.
//!
//! [`TestHost`] plays the role of the external component system: it mounts
//! components (a render closure plus a render counter), hands each one a
//! [`Binding`] whose `request_update` trigger pushes the component onto a
//! coalescing update queue, and owns the single-threaded executor that
//! async field operations run on.
//!
//! A test drives the world explicitly:
//!
//! - writes happen synchronously and enqueue updates;
//! - [`flush`](TestHost::flush) re-renders everything queued;
//! - [`run_until_stalled`](TestHost::run_until_stalled) advances the
//!   executor until every ready async operation has settled;
//! - [`tick`](TestHost::tick) does both, in that order.
//!
//! Nothing re-renders behind the test's back, so render counts are exact.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::executor::{LocalPool, LocalSpawner};
use tracing::debug;

use weft_bind::Binding;

/// Handle to a component mounted on a [`TestHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentId(usize);

struct Component {
    binding: Binding,
    render: Rc<dyn Fn()>,
    renders: Cell<u32>,
    mounted: bool,
}

/// A fake component-lifecycle host with a manual update queue.
pub struct TestHost {
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
    components: RefCell<Vec<Component>>,
    queue: Rc<RefCell<Vec<ComponentId>>>,
}

impl TestHost {
    #[must_use]
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            pool: RefCell::new(pool),
            spawner,
            components: RefCell::new(Vec::new()),
            queue: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Spawner for stores with async fields
    /// (`Store::with_spawner("name", host.spawner())`).
    #[must_use]
    pub fn spawner(&self) -> LocalSpawner {
        self.spawner.clone()
    }

    /// Mount a component and run its initial render.
    pub fn mount(&self, render: impl Fn() + 'static) -> ComponentId {
        let id = ComponentId(self.components.borrow().len());
        let queue = Rc::clone(&self.queue);
        let binding = Binding::new(move || {
            let mut queue = queue.borrow_mut();
            if !queue.contains(&id) {
                queue.push(id);
            }
        });
        self.components.borrow_mut().push(Component {
            binding,
            render: Rc::new(render),
            renders: Cell::new(0),
            mounted: true,
        });
        debug!(id = id.0, "component mounted");
        self.render(id);
        id
    }

    fn render(&self, id: ComponentId) -> bool {
        let (binding, render) = {
            let components = self.components.borrow();
            let component = &components[id.0];
            if !component.mounted {
                return false;
            }
            (component.binding.clone(), Rc::clone(&component.render))
        };
        let rendered = binding.on_update(|| render()).is_some();
        if rendered {
            let components = self.components.borrow();
            let counter = &components[id.0].renders;
            counter.set(counter.get() + 1);
        }
        rendered
    }

    /// Drain the update queue, re-rendering each pending component, until
    /// the queue is empty. Returns the number of renders performed.
    pub fn flush(&self) -> usize {
        let mut performed = 0;
        loop {
            let next = {
                let mut queue = self.queue.borrow_mut();
                if queue.is_empty() {
                    None
                } else {
                    Some(queue.remove(0))
                }
            };
            let Some(id) = next else {
                break;
            };
            if self.render(id) {
                performed += 1;
            }
        }
        performed
    }

    /// Advance the executor until no spawned operation can make progress.
    pub fn run_until_stalled(&self) {
        self.pool.borrow_mut().run_until_stalled();
    }

    /// Advance the executor, then flush the updates the settlements queued.
    /// Returns the number of renders performed.
    pub fn tick(&self) -> usize {
        self.run_until_stalled();
        self.flush()
    }

    /// Unmount a component: runs its disconnect hook exactly once.
    pub fn unmount(&self, id: ComponentId) {
        let binding = {
            let mut components = self.components.borrow_mut();
            let component = &mut components[id.0];
            if !component.mounted {
                return;
            }
            component.mounted = false;
            component.binding.clone()
        };
        binding.disconnect();
        debug!(id = id.0, "component unmounted");
    }

    /// How many times the component has rendered (including the mount
    /// render).
    #[must_use]
    pub fn render_count(&self, id: ComponentId) -> u32 {
        self.components.borrow()[id.0].renders.get()
    }

    /// Number of updates waiting in the queue.
    #[must_use]
    pub fn pending_updates(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
