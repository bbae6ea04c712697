//! A generic registry of event listeners.
//!
//! Both the [`Refresher`](crate::Refresher) and the
//! [`Resolver`](crate::Resolver) hold one of these to fan events out to
//! subscribers.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Removes the listener it is associated with.
///
/// Returned by the `add_listener` methods. Cancellation is idempotent:
/// after the first call, further calls have no effect. Dropping the handle
/// without calling [`CancelListener::cancel`] leaves the listener
/// registered, which is the common case for listeners that live for the
/// life of the application.
#[must_use = "dropping the handle without calling cancel leaves the listener registered"]
pub struct CancelListener {
    cancel: Box<dyn Fn() + Send + Sync>,
}

impl CancelListener {
    /// Removes the associated listener from its registry.
    pub fn cancel(&self) {
        (self.cancel)();
    }
}

impl fmt::Debug for CancelListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelListener").finish_non_exhaustive()
    }
}

/// An ordered collection of listeners, safe for concurrent registration
/// and dispatch.
///
/// Dispatch through [`Listeners::visit`] holds the registry lock, which
/// serializes it with registration. Listeners must therefore be short and
/// must not register or cancel listeners from within a callback.
pub(crate) struct Listeners<L: ?Sized> {
    registry: Arc<Mutex<Registry<L>>>,
}

struct Registry<L: ?Sized> {
    next_id: u64,
    entries: Vec<(u64, Arc<L>)>,
}

impl<L: ?Sized> Listeners<L> {
    pub(crate) fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Appends a listener and returns its idempotent cancellation handle.
    pub(crate) fn add(&self, listener: Arc<L>) -> CancelListener
    where
        L: Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, listener));
            id
        };

        let registry = Arc::downgrade(&self.registry);
        CancelListener {
            cancel: Box::new(move || cancel_entry(&registry, id)),
        }
    }

    /// Invokes `f` on every listener in registration order.
    ///
    /// The registry lock is held for the duration of the visit.
    pub(crate) fn visit(&self, mut f: impl FnMut(&L)) {
        let registry = lock(&self.registry);
        for (_, listener) in &registry.entries {
            f(listener);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.registry).entries.len()
    }
}

impl<L: ?Sized> Clone for Listeners<L> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<L: ?Sized> Default for Listeners<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> fmt::Debug for Listeners<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &lock(&self.registry).entries.len())
            .finish()
    }
}

fn lock<L: ?Sized>(registry: &Mutex<Registry<L>>) -> std::sync::MutexGuard<'_, Registry<L>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removal by unique id makes cancellation naturally idempotent.
fn cancel_entry<L: ?Sized>(registry: &Weak<Mutex<Registry<L>>>, id: u64) {
    if let Some(registry) = registry.upgrade() {
        let mut registry = lock(&registry);
        registry.entries.retain(|(entry_id, _)| *entry_id != id);
    }
}
