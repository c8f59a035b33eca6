// Listener registries - Synchronous fan-out of engine events
//
// Delivery happens on the emitting thread, in registration order, once per event.
// Late subscribers see nothing that was emitted before they registered.

pub type ListenerId = u64;

type Listener<E> = Box<dyn FnMut(&E) + Send>;

pub struct ListenerRegistry<E> {
    listeners: Vec<(ListenerId, Listener<E>)>,
    next_id: ListenerId,
}

impl<E> ListenerRegistry<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 1,
        }
    }

    pub fn register<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&E) + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false if `id` was not registered
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    pub fn emit(&mut self, event: &E) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<E> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for ListenerRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_emit_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::<u32>::new();

        let first = Arc::clone(&seen);
        registry.register(move |event| first.lock().unwrap().push(("first", *event)));
        let second = Arc::clone(&seen);
        registry.register(move |event| second.lock().unwrap().push(("second", *event)));

        registry.emit(&7);

        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_unregister() {
        let count = Arc::new(Mutex::new(0));
        let mut registry = ListenerRegistry::<()>::new();

        let counter = Arc::clone(&count);
        let id = registry.register(move |_| *counter.lock().unwrap() += 1);

        registry.emit(&());
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        registry.emit(&());

        assert_eq!(*count.lock().unwrap(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_no_replay_for_late_listener() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::<&'static str>::new();

        registry.emit(&"early");
        let sink = Arc::clone(&seen);
        registry.register(move |event| sink.lock().unwrap().push(*event));
        registry.emit(&"late");

        assert_eq!(*seen.lock().unwrap(), vec!["late"]);
    }
}
