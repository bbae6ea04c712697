//! Loading key material over HTTP(S).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::{Method, Request, StatusCode};

use super::{ContentMeta, LoadError, Loaded, Loader, DEFAULT_HTTP_FORMAT};

/// A hook that may modify an outgoing request before it is sent, e.g. to
/// attach authentication headers. Returning an error aborts the load.
pub type HttpEncoder =
    Arc<dyn Fn(&mut Request) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Loads key material from `http://` and `https://` locations.
///
/// Issues `GET` requests through a shared [`reqwest::Client`]. When the
/// previous [`ContentMeta`] carries a last-modified timestamp, the request
/// is made conditional with `If-Modified-Since`, and a `304 Not Modified`
/// answer yields [`Loaded::Unchanged`].
pub struct HttpLoader {
    client: reqwest::Client,
    encoders: Vec<HttpEncoder>,
    timeout: Option<Duration>,
}

impl HttpLoader {
    /// Builds an `HttpLoader` with a default client, no encoders, and no
    /// per-request timeout.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a builder for customizing the client, encoders, and timeout.
    pub fn builder() -> HttpLoaderBuilder {
        HttpLoaderBuilder::new()
    }

    fn meta_from_headers(headers: &HeaderMap) -> ContentMeta {
        let format = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_HTTP_FORMAT)
            .to_owned();

        // An unparseable Last-Modified is treated as if it were missing.
        let last_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date);

        let ttl = headers
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_max_age);

        ContentMeta {
            format,
            ttl,
            last_modified,
        }
    }
}

impl Default for HttpLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HttpLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpLoader")
            .field("encoders", &self.encoders.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Loader for HttpLoader {
    async fn load(&self, location: &str, prev: &ContentMeta) -> Result<Loaded, LoadError> {
        let mut request = self.client.get(location).build()?;

        if let Some(timeout) = self.timeout {
            *request.timeout_mut() = Some(timeout);
        }

        for encoder in &self.encoders {
            encoder(&mut request).map_err(LoadError::Encoder)?;
        }

        // An encoder is allowed to change the method, so guard against
        // sending conditional headers for methods that don't support them.
        let conditional = *request.method() == Method::GET || *request.method() == Method::HEAD;
        if conditional {
            if let Some(last_modified) = prev.last_modified {
                if let Ok(value) = HeaderValue::from_str(&format_http_date(last_modified)) {
                    request.headers_mut().insert(IF_MODIFIED_SINCE, value);
                }
            }
        }

        let response = self.client.execute(request).await?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            Ok(Loaded::Unchanged)
        } else if status == StatusCode::OK {
            let meta = Self::meta_from_headers(response.headers());
            let data = response.bytes().await?.to_vec();
            Ok(Loaded::Content { data, meta })
        } else {
            Err(LoadError::Http {
                location: response.url().to_string(),
                status: status.as_u16(),
            })
        }
    }
}

/// Builder for [`HttpLoader`].
pub struct HttpLoaderBuilder {
    client: Option<reqwest::Client>,
    encoders: Vec<HttpEncoder>,
    timeout: Option<Duration>,
}

impl HttpLoaderBuilder {
    fn new() -> Self {
        Self {
            client: None,
            encoders: Vec::new(),
            timeout: None,
        }
    }

    /// Uses the given client instead of a default one.
    #[must_use]
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Appends a request encoder. Encoders run in registration order before
    /// each request.
    #[must_use]
    pub fn encoder(mut self, encoder: HttpEncoder) -> Self {
        self.encoders.push(encoder);
        self
    }

    /// Applies a timeout to each request issued by the loader.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the [`HttpLoader`].
    pub fn build(self) -> HttpLoader {
        HttpLoader {
            client: self.client.unwrap_or_default(),
            encoders: self.encoders,
            timeout: self.timeout,
        }
    }
}

impl fmt::Debug for HttpLoaderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpLoaderBuilder")
            .field("encoders", &self.encoders.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn format_http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

/// Extracts the first `max-age` directive from a `Cache-Control` header.
///
/// Only the first occurrence is used; an unparseable value is ignored.
/// `max-age` is honored regardless of other directives such as `no-store`.
fn parse_max_age(cache_control: &str) -> Option<Duration> {
    for directive in cache_control.split(',') {
        let mut parts = directive.splitn(2, '=');
        let name = parts.next().unwrap_or("").trim();
        if name.eq_ignore_ascii_case("max-age") {
            return parts
                .next()
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
        }
    }

    None
}
