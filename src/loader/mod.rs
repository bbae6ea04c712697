//! Retrieval of raw key material from URIs.
//!
//! A [`Loader`] turns a location into bytes plus [`ContentMeta`] describing
//! the content. The default [`SchemeLoader`] dispatches on the URI scheme:
//! `http`/`https` to the [`HttpLoader`], `file` and bare filesystem paths to
//! the [`FileLoader`]. Custom loaders can be registered per scheme,
//! displacing the built-ins.

mod file;
mod http;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use file::FileLoader;
pub use http::{HttpEncoder, HttpLoader, HttpLoaderBuilder};

/// The format assumed for files without an extension.
pub const DEFAULT_FILE_FORMAT: &str = ".pem";

/// The format assumed for HTTP responses without a `Content-Type` header.
pub const DEFAULT_HTTP_FORMAT: &str = "application/json";

/// Describes content retrieved by a [`Loader`], mostly around caching.
///
/// The metadata returned by one load can be passed to the next load of the
/// same location to make retrieval more efficient, e.g. by turning it into
/// a conditional HTTP request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContentMeta {
    /// The media type or file suffix used to select a parser.
    pub format: String,

    /// How long the content may be reused, as advertised by the server.
    /// `None` when the source did not advertise a lifetime.
    pub ttl: Option<Duration>,

    /// When the content was last modified. `None` when unknown.
    pub last_modified: Option<DateTime<Utc>>,
}

/// The outcome of a successful load.
#[derive(Debug)]
pub enum Loaded {
    /// Content was retrieved.
    Content {
        /// The raw bytes of the content.
        data: Vec<u8>,
        /// Metadata describing the content.
        meta: ContentMeta,
    },

    /// The source reported the content unchanged since the previous load
    /// (HTTP `304 Not Modified`). The caller should retain its previous
    /// content and metadata.
    Unchanged,
}

/// An error that can arise loading content from a location.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    /// No loader is registered for the location's scheme.
    #[error("cannot load keys from unsupported location: {location}")]
    UnsupportedScheme {
        /// The offending location.
        location: String,
    },

    /// A file location referred to a directory, pipe, or other non-regular
    /// file.
    #[error("location does not refer to a regular file: {location}")]
    NotAFile {
        /// The offending location.
        location: String,
    },

    /// A `file://` URI could not be converted into a filesystem path.
    #[error("file URI has no usable path: {location}")]
    InvalidFilePath {
        /// The offending location.
        location: String,
    },

    /// An HTTP source answered with an unexpected status code.
    #[error("status code {status} received from {location}")]
    Http {
        /// The requested location.
        location: String,
        /// The response status code.
        status: u16,
    },

    /// The location could not be parsed as a URI.
    #[error(transparent)]
    InvalidLocation(#[from] url::ParseError),

    /// Reading from the filesystem failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The HTTP transaction failed below the status-code level.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// A request encoder rejected the outgoing request.
    #[error("request encoder failed: {0}")]
    Encoder(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Handles the retrieval of content from an external location.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Retrieves the key content at `location`.
    ///
    /// `prev` is either an empty [`ContentMeta`] or the metadata from a
    /// previous load of the same location; loaders may use it to avoid
    /// transferring unchanged content.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] describing why the content could not be
    /// retrieved.
    async fn load(&self, location: &str, prev: &ContentMeta) -> Result<Loaded, LoadError>;
}

/// The default [`Loader`]: dispatches to registered loaders by URI scheme.
///
/// Locations without a scheme are treated as filesystem paths.
pub struct SchemeLoader {
    loaders: HashMap<String, Arc<dyn Loader>>,
}

impl SchemeLoader {
    /// Builds a `SchemeLoader` with the built-in scheme registrations.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a builder for customizing scheme registrations.
    pub fn builder() -> SchemeLoaderBuilder {
        SchemeLoaderBuilder::new()
    }
}

impl Default for SchemeLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SchemeLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<&str> = self.loaders.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        f.debug_struct("SchemeLoader")
            .field("schemes", &schemes)
            .finish()
    }
}

#[async_trait]
impl Loader for SchemeLoader {
    async fn load(&self, location: &str, prev: &ContentMeta) -> Result<Loaded, LoadError> {
        // A full URI parse is unnecessary to pick the loader; the text
        // before the first ':' is the scheme, and its absence means a
        // filesystem path.
        let scheme = match location.find(':') {
            Some(at) if at > 0 => &location[..at],
            _ => "",
        };

        match self.loaders.get(scheme) {
            Some(loader) => loader.load(location, prev).await,
            None => Err(LoadError::UnsupportedScheme {
                location: location.to_owned(),
            }),
        }
    }
}

/// Builder for [`SchemeLoader`].
pub struct SchemeLoaderBuilder {
    loaders: HashMap<String, Arc<dyn Loader>>,
}

impl SchemeLoaderBuilder {
    fn new() -> Self {
        let http: Arc<dyn Loader> = Arc::new(HttpLoader::new());
        let file: Arc<dyn Loader> = Arc::new(FileLoader::new());

        let mut loaders: HashMap<String, Arc<dyn Loader>> = HashMap::new();
        loaders.insert("http".to_owned(), Arc::clone(&http));
        loaders.insert("https".to_owned(), http);
        loaders.insert("file".to_owned(), Arc::clone(&file));
        // The default when no scheme is present in the location.
        loaders.insert(String::new(), file);

        Self { loaders }
    }

    /// Registers `loader` for one or more URI schemes.
    ///
    /// Registering a built-in scheme (`http`, `https`, `file`, or the empty
    /// scheme for bare paths) displaces the built-in loader.
    #[must_use]
    pub fn with_schemes<I, S>(mut self, loader: Arc<dyn Loader>, schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for scheme in schemes {
            self.loaders.insert(scheme.into(), Arc::clone(&loader));
        }
        self
    }

    /// Builds the [`SchemeLoader`].
    pub fn build(self) -> SchemeLoader {
        SchemeLoader {
            loaders: self.loaders,
        }
    }
}

impl fmt::Debug for SchemeLoaderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemeLoaderBuilder").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recording;

    #[async_trait]
    impl Loader for Recording {
        async fn load(&self, location: &str, _prev: &ContentMeta) -> Result<Loaded, LoadError> {
            Ok(Loaded::Content {
                data: location.as_bytes().to_vec(),
                meta: ContentMeta::default(),
            })
        }
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let loader = SchemeLoader::new();
        let err = loader
            .load("gopher://keys.example.com", &ContentMeta::default())
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::UnsupportedScheme { .. }));
    }

    #[tokio::test]
    async fn custom_scheme_displaces_nothing_else() {
        let loader = SchemeLoader::builder()
            .with_schemes(Arc::new(Recording), ["vault"])
            .build();

        let loaded = loader
            .load("vault://secrets/key", &ContentMeta::default())
            .await
            .unwrap();
        match loaded {
            Loaded::Content { data, .. } => assert_eq!(data, b"vault://secrets/key"),
            Loaded::Unchanged => panic!("expected content"),
        }

        // Built-ins are still present.
        let err = loader
            .load("gopher://nope", &ContentMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedScheme { .. }));
    }

    #[tokio::test]
    async fn custom_scheme_can_displace_builtin() {
        let loader = SchemeLoader::builder()
            .with_schemes(Arc::new(Recording), ["https"])
            .build();

        let loaded = loader
            .load("https://keys.example.com", &ContentMeta::default())
            .await
            .unwrap();
        assert!(matches!(loaded, Loaded::Content { .. }));
    }
}
