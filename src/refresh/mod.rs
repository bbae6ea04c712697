//! Background key refresh.
//!
//! A [`Refresher`] polls a configured set of sources, computes the delta
//! against each source's previous poll, and dispatches a [`RefreshEvent`]
//! per iteration to registered listeners. A [`KeyRing`](crate::KeyRing) is
//! the usual listener, keeping a local cache coherent with the sources.

mod task;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{validate_sources, ConfigError, RefreshSource};
use crate::fetcher::{Fetch, FetchError, Fetcher};
use crate::jitter::Jitterer;
use crate::key::Key;
use crate::listeners::{CancelListener, Listeners};

use task::RefreshTask;

/// An error from [`Refresher`] lifecycle operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RefreshError {
    /// [`Refresher::start`] was called on a running refresher.
    #[error("that refresher has already been started")]
    AlreadyStarted,

    /// [`Refresher::stop`] was called on an idle refresher.
    #[error("that refresher is not running")]
    NotRunning,
}

/// A set of keys from a given URI that has been asynchronously refreshed.
#[derive(Debug, Default)]
pub struct RefreshEvent {
    /// The source of the keys.
    pub uri: String,

    /// The error that occurred while interacting with the URI, if any.
    /// When set, `keys` holds the last valid set of keys from the URI.
    pub err: Option<FetchError>,

    /// The complete set of keys from the URI, sorted by key ID.
    pub keys: Vec<Key>,

    /// The keys that are brand new with this event. Always a subset of
    /// `keys`; empty when `err` is set.
    pub new: Vec<Key>,

    /// The keys that were present in previous events but are now missing.
    /// Never present in `keys`; empty when `err` is set.
    pub deleted: Vec<Key>,
}

/// A sink for [`RefreshEvent`]s.
pub trait RefreshListener: Send + Sync {
    /// Receives a refresh event. This method must not panic and must not
    /// register or cancel listeners.
    fn on_refresh_event(&self, event: &RefreshEvent);
}

/// Asynchronously refreshes sets of keys from one or more sources.
///
/// Each configured [`RefreshSource`] is polled by its own background task
/// on a jittered schedule. Failed polls are non-fatal: the event carries
/// the error together with the last good key set, and the task retries on
/// the next tick.
///
/// Listeners receive only events dispatched after they were added; there
/// is no replay. Subscribers that need the current state should read the
/// [`KeyRing`](crate::KeyRing) directly in addition to subscribing.
pub struct Refresher {
    fetcher: Arc<dyn Fetch>,
    sources: Vec<RefreshSource>,
    listeners: Listeners<dyn RefreshListener>,
    running: Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    // Held so the handles aren't detached invisibly; stop() drops them
    // without joining.
    #[allow(dead_code)]
    handles: Vec<JoinHandle<()>>,
}

impl Refresher {
    /// Returns a builder for constructing a `Refresher`.
    pub fn builder() -> RefresherBuilder {
        RefresherBuilder::new()
    }

    /// Spawns the per-source polling tasks.
    ///
    /// The tasks run under a cancellation scope owned by this refresher,
    /// deliberately not tied to the caller: stopping is the only way to
    /// end them. Keys arrive asynchronously at registered listeners. Must
    /// be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::AlreadyStarted`] when already running.
    pub fn start(&self) -> Result<(), RefreshError> {
        let mut running = lock(&self.running);
        if running.is_some() {
            return Err(RefreshError::AlreadyStarted);
        }

        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let task = RefreshTask {
                jitterer: Jitterer::new(source),
                source: source.clone(),
                fetcher: Arc::clone(&self.fetcher),
                listeners: self.listeners.clone(),
            };
            handles.push(tokio::spawn(task.run(cancel.clone())));
        }

        *running = Some(Running { cancel, handles });
        Ok(())
    }

    /// Cancels all refresh tasks.
    ///
    /// Cancellation is signalled but not awaited; a task mid-fetch exits
    /// as soon as its fetch returns.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::NotRunning`] when not running.
    pub fn stop(&self) -> Result<(), RefreshError> {
        let mut running = lock(&self.running);
        match running.take() {
            Some(state) => {
                state.cancel.cancel();
                Ok(())
            }
            None => Err(RefreshError::NotRunning),
        }
    }

    /// Attaches a sink for [`RefreshEvent`]s.
    ///
    /// The listener receives events only for polls that complete after
    /// this call; recent events are not replayed. The returned handle
    /// cancels the registration; callers keeping the listener for the life
    /// of the application are free to drop it.
    pub fn add_listener(&self, listener: Arc<dyn RefreshListener>) -> CancelListener {
        self.listeners.add(listener)
    }
}

impl Drop for Refresher {
    fn drop(&mut self) {
        // Best-effort cancellation so dropped refreshers don't leak tasks.
        if let Some(state) = lock(&self.running).take() {
            state.cancel.cancel();
        }
    }
}

impl fmt::Debug for Refresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Refresher")
            .field("sources", &self.sources.len())
            .field("running", &lock(&self.running).is_some())
            .finish_non_exhaustive()
    }
}

fn lock(running: &Mutex<Option<Running>>) -> std::sync::MutexGuard<'_, Option<Running>> {
    running.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for [`Refresher`].
pub struct RefresherBuilder {
    fetcher: Option<Arc<dyn Fetch>>,
    sources: Vec<RefreshSource>,
}

impl RefresherBuilder {
    fn new() -> Self {
        Self {
            fetcher: None,
            sources: Vec::new(),
        }
    }

    /// Appends a refresh source.
    #[must_use]
    pub fn source(mut self, source: RefreshSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Appends several refresh sources.
    #[must_use]
    pub fn sources<I>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = RefreshSource>,
    {
        self.sources.extend(sources);
        self
    }

    /// Uses the given fetcher instead of a default [`Fetcher`].
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Builds the [`Refresher`].
    ///
    /// An empty source set is allowed and yields a refresher that starts
    /// and stops cleanly without emitting events.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the source set is invalid.
    pub fn build(self) -> Result<Refresher, ConfigError> {
        validate_sources(&self.sources)?;

        Ok(Refresher {
            fetcher: self
                .fetcher
                .unwrap_or_else(|| Arc::new(Fetcher::new())),
            sources: self.sources,
            listeners: Listeners::new(),
            running: Mutex::new(None),
        })
    }
}

impl fmt::Debug for RefresherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefresherBuilder")
            .field("sources", &self.sources.len())
            .finish_non_exhaustive()
    }
}
