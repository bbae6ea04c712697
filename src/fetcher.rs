//! The application-level fetch pipeline.
//!
//! A [`Fetcher`] composes a [`Loader`] and a [`Parser`] and guarantees that
//! every returned key carries a key ID, synthesizing one from the RFC 7638
//! thumbprint when the source did not provide one. Clients should generally
//! use this interface rather than driving the loader and parser directly.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::key::{Key, ThumbprintAlgorithm};
use crate::loader::{ContentMeta, LoadError, Loaded, Loader, SchemeLoader};
use crate::parser::{FormatParser, ParseError, Parser};

/// An error that can arise fetching keys from a location.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FetchError {
    /// The content could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The content could not be parsed into keys.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// The outcome of a successful fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Keys were fetched. Every key carries a non-empty key ID.
    Fetched {
        /// The keys, in source order.
        keys: Vec<Key>,
        /// Metadata for the fetched content, to be passed to the next fetch
        /// of the same location.
        meta: ContentMeta,
    },

    /// The source reported the content unchanged since the previous fetch.
    /// The caller should retain its previous keys and metadata.
    Unchanged,
}

/// Handles fetching keys from URI locations.
///
/// This is the seam between the fetch pipeline and the components that
/// drive it; [`Refresher`](crate::Refresher) and
/// [`Resolver`](crate::Resolver) accept any implementation.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetches keys from `location`.
    ///
    /// `prev` is either an empty [`ContentMeta`] or the metadata from a
    /// previous fetch of the same location.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] when the content cannot be loaded or
    /// parsed.
    async fn fetch(&self, location: &str, prev: &ContentMeta)
        -> Result<FetchOutcome, FetchError>;
}

/// The default [`Fetch`] implementation: [`SchemeLoader`] into
/// [`FormatParser`], followed by key ID normalization.
pub struct Fetcher {
    loader: Arc<dyn Loader>,
    parser: Arc<dyn Parser>,
    key_id_algorithm: ThumbprintAlgorithm,
}

impl Fetcher {
    /// Builds a `Fetcher` with the default loader, parser, and SHA-256 key
    /// ID synthesis.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a builder for customizing the pipeline.
    pub fn builder() -> FetcherBuilder {
        FetcherBuilder::new()
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("key_id_algorithm", &self.key_id_algorithm)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Fetch for Fetcher {
    async fn fetch(
        &self,
        location: &str,
        prev: &ContentMeta,
    ) -> Result<FetchOutcome, FetchError> {
        let (data, meta) = match self.loader.load(location, prev).await? {
            Loaded::Content { data, meta } => (data, meta),
            Loaded::Unchanged => return Ok(FetchOutcome::Unchanged),
        };

        let keys = self.parser.parse(&meta.format, &data)?;
        let keys = keys
            .into_iter()
            .map(|key| {
                if key.key_id().is_empty() {
                    let key_id = key.thumbprint_key_id(self.key_id_algorithm);
                    key.with_key_id(key_id)
                } else {
                    key
                }
            })
            .collect();

        Ok(FetchOutcome::Fetched { keys, meta })
    }
}

/// Builder for [`Fetcher`].
pub struct FetcherBuilder {
    loader: Option<Arc<dyn Loader>>,
    parser: Option<Arc<dyn Parser>>,
    key_id_algorithm: ThumbprintAlgorithm,
}

impl FetcherBuilder {
    fn new() -> Self {
        Self {
            loader: None,
            parser: None,
            key_id_algorithm: ThumbprintAlgorithm::default(),
        }
    }

    /// Uses the given loader instead of the default [`SchemeLoader`].
    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Uses the given parser instead of the default [`FormatParser`].
    #[must_use]
    pub fn parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Sets the hash used to synthesize key IDs for keys without one.
    #[must_use]
    pub fn key_id_algorithm(mut self, algorithm: ThumbprintAlgorithm) -> Self {
        self.key_id_algorithm = algorithm;
        self
    }

    /// Builds the [`Fetcher`].
    pub fn build(self) -> Fetcher {
        Fetcher {
            loader: self
                .loader
                .unwrap_or_else(|| Arc::new(SchemeLoader::new())),
            parser: self
                .parser
                .unwrap_or_else(|| Arc::new(FormatParser::new())),
            key_id_algorithm: self.key_id_algorithm,
        }
    }
}

impl fmt::Debug for FetcherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherBuilder")
            .field("key_id_algorithm", &self.key_id_algorithm)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLoader {
        data: &'static [u8],
        format: &'static str,
    }

    #[async_trait]
    impl Loader for FixedLoader {
        async fn load(&self, _location: &str, _prev: &ContentMeta) -> Result<Loaded, LoadError> {
            Ok(Loaded::Content {
                data: self.data.to_vec(),
                meta: ContentMeta {
                    format: self.format.to_owned(),
                    ..ContentMeta::default()
                },
            })
        }
    }

    struct UnchangedLoader;

    #[async_trait]
    impl Loader for UnchangedLoader {
        async fn load(&self, _location: &str, _prev: &ContentMeta) -> Result<Loaded, LoadError> {
            Ok(Loaded::Unchanged)
        }
    }

    // One key with a kid, one without.
    const MIXED_SET: &[u8] = br#"{
        "keys": [
            {
                "kty": "oct",
                "kid": "named",
                "k": "GawgguFyGrWKav7AX4VKUg"
            },
            {
                "kty": "OKP",
                "crv": "Ed25519",
                "x": "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"
            }
        ]
    }"#;

    #[tokio::test]
    async fn every_fetched_key_has_a_key_id() {
        let fetcher = Fetcher::builder()
            .loader(Arc::new(FixedLoader {
                data: MIXED_SET,
                format: ".jwk-set",
            }))
            .build();

        let outcome = fetcher
            .fetch("memory://keys", &ContentMeta::default())
            .await
            .unwrap();
        let FetchOutcome::Fetched { keys, .. } = outcome else {
            panic!("expected fetched keys");
        };

        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].key_id(), "named");
        // RFC 8037 appendix A.3 thumbprint of the bare Ed25519 key.
        assert_eq!(keys[1].key_id(), "kPrK_qmxVWaYVA9wwBF6Iuo3vVzz7TxHCTwXBygrS4k");
    }

    #[tokio::test]
    async fn synthesized_key_ids_are_deterministic() {
        let fetcher = Fetcher::builder()
            .loader(Arc::new(FixedLoader {
                data: MIXED_SET,
                format: ".jwk-set",
            }))
            .build();

        let mut ids = Vec::new();
        for _ in 0..2 {
            let outcome = fetcher
                .fetch("memory://keys", &ContentMeta::default())
                .await
                .unwrap();
            if let FetchOutcome::Fetched { keys, .. } = outcome {
                ids.push(keys[1].key_id().to_owned());
            }
        }

        assert_eq!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn unchanged_passes_through() {
        let fetcher = Fetcher::builder().loader(Arc::new(UnchangedLoader)).build();
        let outcome = fetcher
            .fetch("memory://keys", &ContentMeta::default())
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Unchanged));
    }

    #[tokio::test]
    async fn parse_failures_surface() {
        let fetcher = Fetcher::builder()
            .loader(Arc::new(FixedLoader {
                data: b"not json",
                format: ".json",
            }))
            .build();

        let err = fetcher
            .fetch("memory://keys", &ContentMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }
}
