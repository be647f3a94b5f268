//! Named event dispatch.
//!
//! Every mutation in the runtime broadcasts through an `EventDispatcher`.
//! Handlers are bound under a unique name; binding a second handler under
//! an existing name is a no-op until the original is unbound.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use flow_core::IndexableName;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Dispatches a payload to a set of named handlers.
pub struct EventDispatcher<T> {
    handlers: RwLock<HashMap<IndexableName, Handler<T>>>,
}

impl<T> EventDispatcher<T> {
    /// Creates a dispatcher with no bound handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Binds a handler under a unique name. The first bind under a name
    /// wins; rebinding requires unbinding first.
    pub fn bind(
        &self,
        name: impl Into<IndexableName>,
        handler: impl Fn(&T) + Send + Sync + 'static,
    ) {
        self.handlers
            .write()
            .entry(name.into())
            .or_insert_with(|| Arc::new(handler));
    }

    /// Unbinds the handler with the given name.
    pub fn unbind(&self, name: impl Into<IndexableName>) {
        self.handlers.write().remove(&name.into());
    }

    /// Unbinds every handler.
    pub fn unbind_all(&self) {
        self.handlers.write().clear();
    }

    /// Number of bound handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no handlers are bound.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Broadcasts the payload to every bound handler.
    ///
    /// The handler list is snapshotted before invocation so handlers may
    /// bind or unbind reentrantly.
    pub fn broadcast(&self, payload: &T) {
        let handlers: Vec<Handler<T>> = self.handlers.read().values().cloned().collect();
        for handler in handlers {
            handler(payload);
        }
    }
}

impl<T> Default for EventDispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_broadcast_reaches_all_handlers() {
        let dispatcher = EventDispatcher::<i32>::new();
        let count = Arc::new(AtomicUsize::new(0));

        for name in ["first", "second", "third"] {
            let count = Arc::clone(&count);
            dispatcher.bind(name, move |value: &i32| {
                count.fetch_add(*value as usize, Ordering::SeqCst);
            });
        }

        dispatcher.broadcast(&2);
        assert_eq!(count.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_first_bind_wins() {
        let dispatcher = EventDispatcher::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        {
            let count = Arc::clone(&count);
            dispatcher.bind("handler", move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        dispatcher.bind("handler", |_| panic!("rebind must not replace"));

        dispatcher.broadcast(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.len(), 1);
    }

    #[test]
    fn test_unbind() {
        let dispatcher = EventDispatcher::<()>::new();
        dispatcher.bind("handler", |_| {});
        assert!(!dispatcher.is_empty());

        dispatcher.unbind("handler");
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_reentrant_unbind_does_not_deadlock() {
        let dispatcher = Arc::new(EventDispatcher::<()>::new());
        {
            let dispatcher = Arc::clone(&dispatcher);
            let inner = Arc::downgrade(&dispatcher);
            dispatcher.bind("once", move |_| {
                if let Some(dispatcher) = inner.upgrade() {
                    dispatcher.unbind("once");
                }
            });
        }

        dispatcher.broadcast(&());
        assert!(dispatcher.is_empty());
    }
}
