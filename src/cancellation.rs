use std::{
    future::pending,
    mem,
    sync::{Arc, Mutex},
};

use tokio::sync::oneshot;

use crate::{Disposable, utils::lock};

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TokenState {
    is_requested: bool,
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

/// Observer side of cooperative cancellation.
///
/// Cancellation never interrupts the observer; it only flips a flag and runs the registered
/// callbacks.
#[derive(Clone)]
pub struct CancellationToken(Option<Arc<Mutex<TokenState>>>);

impl CancellationToken {
    /// A token that is never cancelled.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.0.as_ref().is_some_and(|s| lock(s).is_requested)
    }

    /// Runs `f` once cancellation is requested, or immediately if it already was.
    pub fn on_cancellation_requested(&self, f: impl FnOnce() + Send + 'static) -> Disposable {
        let Some(state) = &self.0 else {
            return Disposable::empty();
        };
        let mut s = lock(state);
        if s.is_requested {
            drop(s);
            f();
            return Disposable::empty();
        }
        let id = s.next_id;
        s.next_id += 1;
        s.callbacks.push((id, Box::new(f)));
        let state = Arc::downgrade(state);
        Disposable::new(move || {
            if let Some(state) = state.upgrade() {
                lock(&state).callbacks.retain(|(i, _)| *i != id);
            }
        })
    }

    /// Completes when cancellation is requested.
    pub async fn cancelled(&self) {
        if self.0.is_none() {
            return pending().await;
        }
        let (tx, rx) = oneshot::channel();
        let d = self.on_cancellation_requested(move || {
            let _ = tx.send(());
        });
        let _guard = DisposeOnDrop(Some(d));
        let _ = rx.await;
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("is_cancellation_requested", &self.is_cancellation_requested())
            .finish()
    }
}

struct DisposeOnDrop(Option<Disposable>);

impl Drop for DisposeOnDrop {
    fn drop(&mut self) {
        if let Some(d) = self.0.take() {
            d.dispose();
        }
    }
}

/// Owner side of cooperative cancellation.
#[derive(Clone, Default)]
pub struct CancellationTokenSource(Arc<Mutex<TokenState>>);

impl CancellationTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken(Some(self.0.clone()))
    }

    /// Requests cancellation. Only the first call has an effect.
    pub fn cancel(&self) {
        let callbacks = {
            let mut s = lock(&self.0);
            if s.is_requested {
                return;
            }
            s.is_requested = true;
            mem::take(&mut s.callbacks)
        };
        for (_, f) in callbacks {
            f();
        }
    }
}
