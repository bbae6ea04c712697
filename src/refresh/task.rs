//! The per-source polling loop.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{RefreshEvent, RefreshListener};
use crate::config::RefreshSource;
use crate::fetcher::{Fetch, FetchOutcome};
use crate::jitter::Jitterer;
use crate::key::{sort_keys_by_id, Key};
use crate::listeners::Listeners;
use crate::loader::ContentMeta;

/// One source's polling task. Owns everything it needs, so the task is
/// independent of the [`Refresher`](super::Refresher) that spawned it.
pub(super) struct RefreshTask {
    pub(super) source: RefreshSource,
    pub(super) fetcher: Arc<dyn Fetch>,
    pub(super) listeners: Listeners<dyn RefreshListener>,
    pub(super) jitterer: Jitterer,
}

impl RefreshTask {
    pub(super) async fn run(self, cancel: CancellationToken) {
        let mut prev_keys: Vec<Key> = Vec::new();
        let mut prev_map: HashMap<String, Key> = HashMap::new();
        let mut prev_meta = ContentMeta::default();

        loop {
            let result = self.fetcher.fetch(&self.source.uri, &prev_meta).await;

            // Cancellation is checked here rather than inferred from the
            // fetch result: a child context may have been used for the
            // underlying operation, so an error is not a reliable signal
            // that this task was asked to shut down.
            if cancel.is_cancelled() {
                return;
            }

            let mut event = RefreshEvent {
                uri: self.source.uri.clone(),
                ..RefreshEvent::default()
            };

            match result {
                Ok(FetchOutcome::Fetched { keys, meta }) => {
                    let next_map: HashMap<String, Key> = keys
                        .iter()
                        .map(|key| (key.key_id().to_owned(), key.clone()))
                        .collect();

                    event.keys = keys.clone();
                    for (key_id, key) in &next_map {
                        if !prev_map.contains_key(key_id) {
                            event.new.push(key.clone());
                        }
                    }
                    for (key_id, key) in &prev_map {
                        if !next_map.contains_key(key_id) {
                            event.deleted.push(key.clone());
                        }
                    }

                    debug!(
                        uri = %self.source.uri,
                        keys = event.keys.len(),
                        new = event.new.len(),
                        deleted = event.deleted.len(),
                        "refreshed keys"
                    );

                    prev_keys = keys;
                    prev_map = next_map;
                    prev_meta = meta;
                }

                // The source reported the content unchanged; keep the
                // previous keys and metadata as they are.
                Ok(FetchOutcome::Unchanged) => {
                    event.keys = prev_keys.clone();
                }

                Err(err) => {
                    warn!(uri = %self.source.uri, error = %err, "key refresh failed");

                    // Drop the cached metadata so the next attempt is an
                    // unconditional fetch rather than carrying stale
                    // conditional-request state.
                    prev_meta = ContentMeta::default();

                    // Send out the previous keys and leave new/deleted
                    // unset.
                    event.keys = prev_keys.clone();
                    event.err = Some(err);
                }
            }

            sort_keys_by_id(&mut event.keys);
            sort_keys_by_id(&mut event.new);
            sort_keys_by_id(&mut event.deleted);

            self.listeners
                .visit(|listener| listener.on_refresh_event(&event));

            let next = self
                .jitterer
                .next_interval(prev_meta.ttl, event.err.is_some());

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(next) => {}
            }
        }
    }
}
