#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! Client-side cryptographic key management for services that validate
//! JWTs or other signed material.
//!
//! This crate maintains a local cache of keys indexed by key ID (the JWK
//! `kid`) and keeps that cache coherent with one or more remote or local
//! sources of key material:
//!
//! * A [`Refresher`] polls each configured source on a jittered schedule,
//!   honoring server cache directives, and dispatches the delta (added and
//!   removed keys) to listeners, typically a [`KeyRing`].
//! * A [`Resolver`] fetches individual keys on demand by expanding a URI
//!   template with the requested key ID, coalescing concurrent requests so
//!   only one fetch is inflight per key ID.
//! * Both run on the same fetch pipeline: a scheme-dispatched [`Loader`]
//!   (`file://`, bare paths, `http://`, `https://`), a format-dispatched
//!   [`Parser`] (JWK, JWK-Set, PEM), and a [`Fetcher`] that guarantees
//!   every returned key carries a key ID, synthesizing RFC 7638
//!   thumbprints for keys without one.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use keysource::{KeyRing, Refresher, RefreshSource, Resolver};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ring = KeyRing::new();
//!
//! // Poll a JWKS endpoint in the background, feeding the ring.
//! let refresher = Refresher::builder()
//!     .source(RefreshSource::new("https://issuer.example.com/jwks.json"))
//!     .build()?;
//! let _listener = refresher.add_listener(Arc::new(ring.clone()));
//! refresher.start()?;
//!
//! // Resolve keys on demand, caching through the same ring.
//! let resolver = Resolver::builder()
//!     .template("https://issuer.example.com/keys/{keyID}")
//!     .key_ring(ring.clone())
//!     .build()?;
//! let key = resolver.resolve("2024-signing-key").await?;
//! println!("resolved {} ({})", key.key_id(), key.key_type());
//!
//! refresher.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod fetcher;
pub mod key;
pub mod key_ring;
pub mod loader;
pub mod parser;
pub mod refresh;
pub mod resolve;

mod jitter;
mod listeners;

// Key material
pub use crate::key::{Key, KeyError, ThumbprintAlgorithm};
pub use crate::key_ring::KeyRing;

// Fetch pipeline
pub use crate::fetcher::{Fetch, FetchError, FetchOutcome, Fetcher, FetcherBuilder};
pub use crate::loader::{
    ContentMeta, FileLoader, HttpLoader, LoadError, Loaded, Loader, SchemeLoader,
};
pub use crate::parser::{FormatParser, JwkParser, JwkSetParser, ParseError, Parser, PemParser};

// Background refresh
pub use crate::refresh::{
    RefreshError, RefreshEvent, RefreshListener, Refresher, RefresherBuilder,
};

// On-demand resolution
pub use crate::resolve::{
    ResolveError, ResolveEvent, ResolveListener, Resolver, ResolverBuilder, TemplateError,
    UriTemplate, KEY_ID_PARAMETER,
};

// Configuration
pub use crate::config::{
    Config, ConfigError, RefreshConfig, RefreshSource, ResolveConfig, DEFAULT_REFRESH_INTERVAL,
    DEFAULT_REFRESH_JITTER, DEFAULT_REFRESH_MIN_INTERVAL,
};

// Listener registration
pub use crate::listeners::CancelListener;
