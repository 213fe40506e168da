//! Typed event fan-out with explicit subscription handles
//!
//! Every entity exposes one `Emitter` per event. Handlers run synchronously,
//! in registration order, on the thread that emits. The handler list is
//! snapshotted before dispatch so a handler may subscribe, unsubscribe or
//! emit again without deadlocking.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

pub struct Emitter<T> {
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }
}

impl<T: 'static> Emitter<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; it stays registered until the returned
    /// subscription is dropped or unsubscribed
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut slots = self.slots.lock();
            let id = slots.next_id;
            slots.next_id += 1;
            slots.handlers.push((id, Arc::new(handler)));
            id
        };

        let slots: Weak<Mutex<Slots<T>>> = Arc::downgrade(&self.slots);
        Subscription::new(move || {
            if let Some(slots) = slots.upgrade() {
                slots.lock().handlers.retain(|(handler_id, _)| *handler_id != id);
            }
        })
    }

    /// Register a handler that only runs for the first emitted value
    pub fn once<F>(&self, handler: F) -> Subscription
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let handler = Mutex::new(Some(handler));
        self.subscribe(move |value| {
            if let Some(handler) = handler.lock().take() {
                handler(value);
            }
        })
    }

    pub fn emit(&self, value: &T) {
        let handlers: Vec<Handler<T>> = self
            .slots
            .lock()
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler(value);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registered handler
    pub fn clear(&self) {
        self.slots.lock().handlers.clear();
    }
}

/// Handle to a registered handler
///
/// Dropping the handle unsubscribes. Use [`Subscription::detach`] to keep the
/// handler registered for the emitter's whole lifetime.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    on_unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new<F>(on_unsubscribe: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            on_unsubscribe: Some(Box::new(on_unsubscribe)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.run();
    }

    /// Keep the handler registered forever
    pub fn detach(mut self) {
        self.on_unsubscribe = None;
    }

    fn run(&mut self) {
        if let Some(on_unsubscribe) = self.on_unsubscribe.take() {
            on_unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.on_unsubscribe.is_some())
            .finish()
    }
}
