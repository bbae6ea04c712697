//! On-demand key resolution.
//!
//! A [`Resolver`] turns a key ID into a [`Key`] by expanding a URI
//! template, fetching the referenced document, and picking the matching
//! key. Concurrent resolutions of the same key ID are coalesced so that
//! only one fetch is inflight per key ID; late arrivals wait for the
//! inflight result instead of dialing out themselves.

pub(crate) mod template;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::fetcher::{Fetch, FetchError, FetchOutcome, Fetcher};
use crate::key::Key;
use crate::key_ring::KeyRing;
use crate::listeners::{CancelListener, Listeners};
use crate::loader::ContentMeta;

pub use template::{TemplateError, UriTemplate, KEY_ID_PARAMETER};

/// An error that can arise resolving a key.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ResolveError {
    /// No key with the requested key ID exists at the source.
    #[error("no such key exists")]
    KeyNotFound,

    /// No URI template carrying the `{keyID}` parameter was configured.
    #[error("a URI template with a {{keyID}} parameter is required")]
    NoTemplate,

    /// The configured URI template could not be parsed.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The fetch against the expanded URI failed.
    #[error("{0}")]
    Fetch(Arc<FetchError>),

    /// The configured resolve timeout elapsed before the fetch completed.
    #[error("timed out fetching key material")]
    Timeout,
}

impl From<FetchError> for ResolveError {
    fn from(err: FetchError) -> Self {
        Self::Fetch(Arc::new(err))
    }
}

/// Describes one attempt to resolve a key ID.
#[derive(Clone, Debug)]
pub struct ResolveEvent {
    /// The actual, expanded URI used to obtain the key material.
    pub uri: String,

    /// The key ID that was resolved.
    pub key_id: String,

    /// The key that was returned. `None` when an error occurred.
    pub key: Option<Key>,

    /// Any error that occurred while trying to fetch key material.
    pub err: Option<ResolveError>,
}

/// A sink for [`ResolveEvent`]s.
pub trait ResolveListener: Send + Sync {
    /// Receives notification of an attempt to resolve a key. This method
    /// must not panic and must not register or cancel listeners.
    fn on_resolve_event(&self, event: &ResolveEvent);
}

/// Resolves keys by key ID on demand, coalescing concurrent requests.
///
/// When a [`KeyRing`] is attached it acts as a cache: resolution checks the
/// ring first, and successfully fetched keys are added to it.
///
/// Cloning a `Resolver` yields a handle to the same resolver; clones share
/// the pending-request table, listeners, and cache.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<Inner>,
}

struct Inner {
    fetcher: Arc<dyn Fetch>,
    template: UriTemplate,
    key_ring: Option<KeyRing>,
    timeout: Option<Duration>,
    listeners: Listeners<dyn ResolveListener>,
    pending: Mutex<HashMap<String, PendingRequest>>,
}

/// One inflight resolution, shared by its owner and any waiters.
#[derive(Clone)]
struct PendingRequest {
    done: watch::Receiver<bool>,
    slot: Arc<OnceLock<Key>>,
}

/// What a caller turned out to be once the pending table was consulted.
enum Role {
    /// The ring satisfied the request under the lock.
    Cached(Key),
    /// Another caller owns the fetch; wait for it.
    Waiter(PendingRequest),
    /// This caller owns the fetch.
    Owner(OwnerGuard, Arc<OnceLock<Key>>),
}

impl Resolver {
    /// Returns a builder for constructing a `Resolver`.
    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::new()
    }

    /// Attempts to locate the key with the given key ID.
    ///
    /// At most one fetch is inflight per key ID: concurrent callers for the
    /// same key ID share a single fetch, and all of them observe its
    /// result. Dropping the returned future abandons the wait without
    /// disturbing the inflight fetch (unless this caller was the one
    /// performing it, in which case waiters are released empty-handed).
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::KeyNotFound`] when the source has no key
    /// with (or solely identified by) the requested ID, or another
    /// [`ResolveError`] describing a fetch failure.
    pub async fn resolve(&self, key_id: &str) -> Result<Key, ResolveError> {
        if let Some(key) = self.check_ring(key_id) {
            return Ok(key);
        }

        let role = self.join_or_own(key_id);
        match role {
            Role::Cached(key) => Ok(key),
            Role::Waiter(request) => Self::wait_for_key(request).await,
            Role::Owner(guard, slot) => self.fetch_key(key_id, guard, slot).await,
        }
    }

    /// Attaches a sink for [`ResolveEvent`]s. Only events for resolutions
    /// that complete after this call are dispatched to the listener.
    pub fn add_listener(&self, listener: Arc<dyn ResolveListener>) -> CancelListener {
        self.inner.listeners.add(listener)
    }

    fn check_ring(&self, key_id: &str) -> Option<Key> {
        self.inner.key_ring.as_ref()?.get(key_id)
    }

    /// Consults the pending table under its lock, either joining an
    /// inflight request or installing a new one owned by this caller.
    fn join_or_own(&self, key_id: &str) -> Role {
        let mut pending = lock(&self.inner.pending);

        // The ring may have been populated while we raced to the lock.
        if let Some(key) = self.check_ring(key_id) {
            return Role::Cached(key);
        }

        if let Some(request) = pending.get(key_id) {
            return Role::Waiter(request.clone());
        }

        let (done_tx, done_rx) = watch::channel(false);
        let slot = Arc::new(OnceLock::new());
        pending.insert(
            key_id.to_owned(),
            PendingRequest {
                done: done_rx,
                slot: Arc::clone(&slot),
            },
        );

        let guard = OwnerGuard {
            inner: Arc::clone(&self.inner),
            key_id: key_id.to_owned(),
            done: done_tx,
        };

        Role::Owner(guard, slot)
    }

    async fn wait_for_key(mut request: PendingRequest) -> Result<Key, ResolveError> {
        // The value flips to true exactly once, right after the pending
        // entry is removed. A closed channel means the owner is gone; the
        // slot then decides the outcome either way.
        let _changed = request.done.wait_for(|done| *done).await;
        request.slot.get().cloned().ok_or(ResolveError::KeyNotFound)
    }

    /// Performs the fetch on behalf of every caller for this key ID.
    async fn fetch_key(
        &self,
        key_id: &str,
        guard: OwnerGuard,
        slot: Arc<OnceLock<Key>>,
    ) -> Result<Key, ResolveError> {
        let uri = self
            .inner
            .template
            .expand(&[(KEY_ID_PARAMETER, key_id)]);

        let result = self.fetch_and_select(&uri, key_id).await;

        if let Ok(key) = &result {
            if let Some(ring) = &self.inner.key_ring {
                ring.add([key.clone()]);
            }
            let _ = slot.set(key.clone());
        }

        // Removes the pending entry and releases the waiters, in that
        // order, under the pending lock.
        drop(guard);

        let event = ResolveEvent {
            uri,
            key_id: key_id.to_owned(),
            key: result.as_ref().ok().cloned(),
            err: result.as_ref().err().cloned(),
        };
        self.inner
            .listeners
            .visit(|listener| listener.on_resolve_event(&event));

        result
    }

    async fn fetch_and_select(&self, uri: &str, key_id: &str) -> Result<Key, ResolveError> {
        let content_meta = ContentMeta::default();
        let fetch = self.inner.fetcher.fetch(uri, &content_meta);
        let outcome = match self.inner.timeout {
            Some(timeout) => tokio::time::timeout(timeout, fetch)
                .await
                .map_err(|_| ResolveError::Timeout)??,
            None => fetch.await?,
        };

        let keys = match outcome {
            FetchOutcome::Fetched { keys, .. } => keys,
            // A fetch with empty previous metadata cannot be conditional.
            FetchOutcome::Unchanged => Vec::new(),
        };

        select_key(keys, key_id)
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("template", &self.inner.template.to_string())
            .field("timeout", &self.inner.timeout)
            .field("cached", &self.inner.key_ring.is_some())
            .finish_non_exhaustive()
    }
}

/// Selects the resolved key from a fetched document.
///
/// A document holding exactly one key satisfies the request even when its
/// key ID differs, since the URI itself was indexed by key ID. A document
/// holding several keys must contain an exact match.
fn select_key(mut keys: Vec<Key>, key_id: &str) -> Result<Key, ResolveError> {
    match keys.len() {
        0 => Err(ResolveError::KeyNotFound),
        1 => Ok(keys.remove(0)),
        _ => keys
            .into_iter()
            .find(|key| key.key_id() == key_id)
            .ok_or(ResolveError::KeyNotFound),
    }
}

/// Cleans up the pending table on behalf of the owning caller.
///
/// Running in `Drop` covers both the normal path and an owner whose future
/// was dropped mid-fetch: waiters are always released, and the entry is
/// always removed before the done signal fires, under the same lock, so a
/// request arriving just after completion observes a clean table and
/// starts a fresh fetch.
struct OwnerGuard {
    inner: Arc<Inner>,
    key_id: String,
    done: watch::Sender<bool>,
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        let mut pending = lock(&self.inner.pending);
        pending.remove(&self.key_id);
        let _ = self.done.send(true);
    }
}

fn lock(
    pending: &Mutex<HashMap<String, PendingRequest>>,
) -> std::sync::MutexGuard<'_, HashMap<String, PendingRequest>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for [`Resolver`].
pub struct ResolverBuilder {
    template: Option<String>,
    fetcher: Option<Arc<dyn Fetch>>,
    key_ring: Option<KeyRing>,
    timeout: Option<Duration>,
}

impl ResolverBuilder {
    fn new() -> Self {
        Self {
            template: None,
            fetcher: None,
            key_ring: None,
            timeout: None,
        }
    }

    /// Sets the URI template used to locate keys. The template must carry
    /// the `{keyID}` parameter, e.g. `https://keys.example.com/{keyID}`.
    #[must_use]
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Uses the given fetcher instead of a default [`Fetcher`].
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Attaches a [`KeyRing`] to act as a cache. By default a resolver is
    /// not associated with any ring and every resolution fetches.
    #[must_use]
    pub fn key_ring(mut self, key_ring: KeyRing) -> Self {
        self.key_ring = Some(key_ring);
        self
    }

    /// Applies a timeout to each resolve-driven fetch.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the [`Resolver`].
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::NoTemplate`] when no template was supplied
    /// or the template lacks the `{keyID}` parameter, or
    /// [`ResolveError::Template`] when the template does not parse.
    pub fn build(self) -> Result<Resolver, ResolveError> {
        let raw = self.template.ok_or(ResolveError::NoTemplate)?;
        let template = UriTemplate::parse(&raw)?;
        if !template.has_variable(KEY_ID_PARAMETER) {
            return Err(ResolveError::NoTemplate);
        }

        Ok(Resolver {
            inner: Arc::new(Inner {
                fetcher: self
                    .fetcher
                    .unwrap_or_else(|| Arc::new(Fetcher::new())),
                template,
                key_ring: self.key_ring,
                timeout: self.timeout,
                listeners: Listeners::new(),
                pending: Mutex::new(HashMap::new()),
            }),
        })
    }
}

impl fmt::Debug for ResolverBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverBuilder")
            .field("template", &self.template)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(key_id: &str) -> Key {
        Key::from_jwk_value(json!({
            "kty": "oct",
            "kid": key_id,
            "k": "GawgguFyGrWKav7AX4VKUg"
        }))
        .unwrap()
    }

    #[test]
    fn select_key_single_key_wins_regardless_of_id() {
        let selected = select_key(vec![key("other")], "wanted").unwrap();
        assert_eq!(selected.key_id(), "other");
    }

    #[test]
    fn select_key_scans_multi_key_sets() {
        let keys = vec![key("a"), key("wanted"), key("b")];
        let selected = select_key(keys, "wanted").unwrap();
        assert_eq!(selected.key_id(), "wanted");

        let keys = vec![key("a"), key("b"), key("c")];
        assert!(matches!(
            select_key(keys, "wanted").unwrap_err(),
            ResolveError::KeyNotFound
        ));
    }

    #[test]
    fn select_key_empty_set_is_not_found() {
        assert!(matches!(
            select_key(Vec::new(), "wanted").unwrap_err(),
            ResolveError::KeyNotFound
        ));
    }

    #[test]
    fn builder_requires_a_key_id_template() {
        assert!(matches!(
            Resolver::builder().build().unwrap_err(),
            ResolveError::NoTemplate
        ));
        assert!(matches!(
            Resolver::builder()
                .template("https://keys.example.com/static")
                .build()
                .unwrap_err(),
            ResolveError::NoTemplate
        ));
        assert!(matches!(
            Resolver::builder()
                .template("https://keys.example.com/{keyID")
                .build()
                .unwrap_err(),
            ResolveError::Template(_)
        ));
        assert!(Resolver::builder()
            .template("https://keys.example.com/{keyID}")
            .build()
            .is_ok());
    }
}
