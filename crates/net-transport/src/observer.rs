//! Observable transport state

use std::fmt::Debug;
use std::panic::{AssertUnwindSafe, catch_unwind};

use parking_lot::{ReentrantMutex, RwLock};
use tokio::sync::watch;
use tracing::warn;

/// Callback invoked with the new state after every transition
pub type StateHandler<S> = Box<dyn Fn(S) + Send + Sync>;

/// A state value with change notification.
///
/// Only the owning transport calls `set`. Handlers run synchronously on the
/// writer's task, once per transition; writing the current value again is
/// not a transition. A panicking handler is logged and skipped.
///
/// Commit and dispatch happen under one lock, so writers on different
/// threads deliver transitions to handlers in the order they were committed.
/// A write made from inside a handler is dispatched before the outer
/// transition reaches the remaining handlers.
pub struct StateCell<S> {
    tx: watch::Sender<S>,
    handlers: RwLock<Vec<StateHandler<S>>>,
    /// Reentrant so a handler may still write to the cell it observes
    dispatch: ReentrantMutex<()>,
    label: &'static str,
}

impl<S> StateCell<S>
where
    S: Copy + PartialEq + Debug + Send + Sync + 'static,
{
    pub fn new(label: &'static str, initial: S) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            handlers: RwLock::new(Vec::new()),
            dispatch: ReentrantMutex::new(()),
            label,
        }
    }

    /// Current state
    pub fn get(&self) -> S {
        *self.tx.borrow()
    }

    /// Receiver that wakes on every transition
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }

    /// Register a handler; it does not see the current state, only changes
    pub fn on_change(&self, handler: StateHandler<S>) {
        self.handlers.write().push(handler);
    }

    /// Move to `next`. Returns false when `next` equals the current state.
    pub fn set(&self, next: S) -> bool {
        self.set_if(|_| true, next)
    }

    /// Move to `next` only if `allow` holds for the current state. The check
    /// and the write are one step, so no other writer can land in between.
    pub fn set_if(&self, allow: impl FnOnce(S) -> bool, next: S) -> bool {
        let _order = self.dispatch.lock();

        let changed = self.tx.send_if_modified(|current| {
            if *current == next || !allow(*current) {
                false
            } else {
                *current = next;
                true
            }
        });

        if changed {
            for handler in self.handlers.read().iter() {
                if catch_unwind(AssertUnwindSafe(|| handler(next))).is_err() {
                    warn!("{} state handler panicked on {:?}", self.label, next);
                }
            }
        }

        changed
    }

    /// Wait until `done` holds for the current state
    pub async fn wait_for(&self, done: impl Fn(&S) -> bool) -> S {
        let mut rx = self.subscribe();
        match rx.wait_for(|state| done(state)).await {
            Ok(state) => *state,
            // The sender lives as long as `self`, so this only happens
            // while the cell is being torn down.
            Err(_) => self.get(),
        }
    }
}
