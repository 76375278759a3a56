use std::{
    mem,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, Weak},
};

use crate::utils::{lock, panic_message};

/// Undoes a registration when [`dispose`](Disposable::dispose) is called.
///
/// Dropping a `Disposable` without calling `dispose` leaves the registration in place.
pub struct Disposable(Option<Box<dyn FnOnce() + Send>>);

impl Disposable {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }
    pub fn empty() -> Self {
        Self(None)
    }
    pub fn dispose(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct EmitterState<T> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
}

/// Synchronous one-to-many notification, delivered in registration order.
pub struct Emitter<T>(Arc<Mutex<EmitterState<T>>>);

impl<T: 'static> Emitter<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(EmitterState {
            next_id: 0,
            listeners: Vec::new(),
        })))
    }

    pub fn event(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Disposable {
        let id = {
            let mut s = lock(&self.0);
            let id = s.next_id;
            s.next_id += 1;
            s.listeners.push((id, Arc::new(listener)));
            id
        };
        let state: Weak<Mutex<EmitterState<T>>> = Arc::downgrade(&self.0);
        Disposable::new(move || {
            if let Some(state) = state.upgrade() {
                lock(&state).listeners.retain(|(i, _)| *i != id);
            }
        })
    }

    /// Calls every listener registered at the time of the call.
    ///
    /// A panicking listener is logged and does not prevent the others from running.
    pub fn fire(&self, value: &T) {
        let listeners: Vec<Listener<T>> = lock(&self.0)
            .listeners
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            if let Err(e) = catch_unwind(AssertUnwindSafe(|| listener(value))) {
                tracing::error!(
                    "event listener panicked: {}",
                    panic_message(&*e).unwrap_or_default()
                );
            }
        }
    }

    /// Removes every listener.
    pub fn dispose(&self) {
        let listeners = mem::take(&mut lock(&self.0).listeners);
        drop(listeners);
    }
}

impl<T: 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::Emitter;

    #[test]
    fn fire_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let e = Emitter::<u32>::new();
        let l0 = log.clone();
        let _ = e.event(move |v| l0.lock().unwrap().push(format!("a{v}")));
        let l1 = log.clone();
        let _ = e.event(move |v| l1.lock().unwrap().push(format!("b{v}")));
        e.fire(&1);
        e.fire(&2);
        assert_eq!(*log.lock().unwrap(), ["a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn disposed_listener_is_not_called() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let e = Emitter::<u32>::new();
        let l = log.clone();
        let d = e.event(move |v| l.lock().unwrap().push(*v));
        e.fire(&1);
        d.dispose();
        e.fire(&2);
        assert_eq!(*log.lock().unwrap(), [1]);
    }

    #[test]
    fn fire_after_dispose_is_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let e = Emitter::<u32>::new();
        let l = log.clone();
        let _ = e.event(move |v| l.lock().unwrap().push(*v));
        e.dispose();
        e.fire(&1);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let e = Emitter::<()>::new();
        let _ = e.event(|_| panic!("listener failed"));
        let l = log.clone();
        let _ = e.event(move |_| l.lock().unwrap().push("called"));
        e.fire(&());
        assert_eq!(*log.lock().unwrap(), ["called"]);
    }
}
