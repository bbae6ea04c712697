//! Decoding raw bytes into [`Key`] sequences.
//!
//! A [`Parser`] maps `(format, bytes)` to an ordered sequence of keys. The
//! default [`FormatParser`] dispatches on the format, a media type or a
//! file suffix, after stripping any MIME parameters, and comes with the
//! JWK, JWK-Set, JSON, and PEM formats registered.

mod jwk;
mod pem;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::key::{Key, KeyError};

pub use jwk::{JwkParser, JwkSetParser};
pub use pem::PemParser;

/// The media type for JSON data, which may contain either a single JWK or a
/// JWK set.
pub const MEDIA_TYPE_JSON: &str = "application/json";

/// The file suffix for JSON data.
pub const SUFFIX_JSON: &str = ".json";

/// The media type for a single JWK.
pub const MEDIA_TYPE_JWK: &str = "application/jwk+json";

/// The file suffix for a single JWK.
pub const SUFFIX_JWK: &str = ".jwk";

/// The media type for a JWK set.
pub const MEDIA_TYPE_JWK_SET: &str = "application/jwk-set+json";

/// The file suffix for a JWK set.
pub const SUFFIX_JWK_SET: &str = ".jwk-set";

/// The media type for PEM-encoded keys.
pub const MEDIA_TYPE_PEM: &str = "application/x-pem-file";

/// The file suffix for PEM-encoded keys.
pub const SUFFIX_PEM: &str = ".pem";

/// An error that can arise parsing key material.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// No parser is registered for the format.
    #[error("unsupported key format: {format}")]
    UnsupportedFormat {
        /// The offending format.
        format: String,
    },

    /// A format registration carried MIME parameters, which are stripped
    /// before dispatch and so can never match.
    #[error("formats must not carry media type parameters: {format}")]
    InvalidFormat {
        /// The offending format.
        format: String,
    },

    /// A single JWK was expected but the content held a JWK set.
    #[error("expected a single jwk, found a jwk set")]
    UnexpectedKeySet,

    /// The content was not valid JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The content did not form a supported key.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// A PEM block could not be decoded.
    #[error("malformed pem content: {0}")]
    Pem(String),

    /// A PEM block carried a label this parser does not handle.
    #[error("unsupported pem label: {label}")]
    UnsupportedPemLabel {
        /// The offending block label.
        label: String,
    },

    /// A PEM block decoded to key material this parser does not handle.
    #[error("unsupported key material in pem block: {0}")]
    UnsupportedPemKey(String),
}

/// Turns raw data into one or more [`Key`] instances.
///
/// Custom parsers should usually avoid validating the format: a parser may
/// be registered under a nonstandard format, and the format argument exists
/// primarily for debugging.
pub trait Parser: Send + Sync {
    /// Parses `data`, expected to be in the given format, into zero or more
    /// keys. Content holding a single key yields a one-element vector.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] when the data does not decode in the given
    /// format.
    fn parse(&self, format: &str, data: &[u8]) -> Result<Vec<Key>, ParseError>;
}

/// The default [`Parser`]: dispatches to registered parsers by format.
///
/// The format is matched as an opaque key after stripping anything from the
/// first `;` on, so `application/json; charset=utf-8` selects the parser
/// registered for `application/json`.
pub struct FormatParser {
    parsers: HashMap<String, Arc<dyn Parser>>,
}

impl FormatParser {
    /// Builds a `FormatParser` with the built-in format registrations.
    pub fn new() -> Self {
        // The built-in registrations cannot produce an invalid format.
        match Self::builder().build() {
            Ok(parser) => parser,
            Err(_) => FormatParser {
                parsers: HashMap::new(),
            },
        }
    }

    /// Returns a builder for adding or replacing format registrations.
    pub fn builder() -> FormatParserBuilder {
        FormatParserBuilder::new()
    }
}

impl Default for FormatParser {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FormatParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut formats: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        formats.sort_unstable();
        f.debug_struct("FormatParser")
            .field("formats", &formats)
            .finish()
    }
}

impl Parser for FormatParser {
    fn parse(&self, format: &str, data: &[u8]) -> Result<Vec<Key>, ParseError> {
        let stripped = format
            .split(';')
            .next()
            .unwrap_or(format)
            .trim();

        match self.parsers.get(stripped) {
            Some(parser) => parser.parse(format, data),
            None => Err(ParseError::UnsupportedFormat {
                format: format.to_owned(),
            }),
        }
    }
}

/// Builder for [`FormatParser`].
pub struct FormatParserBuilder {
    parsers: Vec<(String, Arc<dyn Parser>)>,
}

impl FormatParserBuilder {
    fn new() -> Self {
        let set: Arc<dyn Parser> = Arc::new(JwkSetParser);
        let single: Arc<dyn Parser> = Arc::new(JwkParser);
        let pem: Arc<dyn Parser> = Arc::new(PemParser);

        let mut parsers: Vec<(String, Arc<dyn Parser>)> = Vec::new();
        for format in [MEDIA_TYPE_JSON, SUFFIX_JSON, MEDIA_TYPE_JWK_SET, SUFFIX_JWK_SET] {
            parsers.push((format.to_owned(), Arc::clone(&set)));
        }
        for format in [MEDIA_TYPE_JWK, SUFFIX_JWK] {
            parsers.push((format.to_owned(), Arc::clone(&single)));
        }
        for format in [MEDIA_TYPE_PEM, SUFFIX_PEM] {
            parsers.push((format.to_owned(), Arc::clone(&pem)));
        }

        Self { parsers }
    }

    /// Registers `parser` for one or more formats, each either a media type
    /// (`application/json`) or a file suffix with leading period (`.json`).
    ///
    /// Registering a built-in format displaces the built-in parser.
    #[must_use]
    pub fn with_formats<I, S>(mut self, parser: Arc<dyn Parser>, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for format in formats {
            self.parsers.push((format.into(), Arc::clone(&parser)));
        }
        self
    }

    /// Builds the [`FormatParser`].
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidFormat`] if any registered format
    /// contains MIME parameters (a `;`).
    pub fn build(self) -> Result<FormatParser, ParseError> {
        let mut parsers = HashMap::with_capacity(self.parsers.len());
        for (format, parser) in self.parsers {
            if format.contains(';') {
                return Err(ParseError::InvalidFormat { format });
            }
            parsers.insert(format, parser);
        }

        Ok(FormatParser { parsers })
    }
}

impl fmt::Debug for FormatParserBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatParserBuilder").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_JWK: &[u8] = br#"{
        "kty": "EC",
        "kid": "C6vs25welZOx6WksNYfbMfiw9l96pMnD",
        "crv": "P-256",
        "x": "ngLYQnlfF6GsojUwqtcEE3WgTNG2RUlsGhK73RNEl5k",
        "y": "tKbiDSUSsQ3F1P7wteeHNXIcU-cx6CgSbroeQrQHTLM"
    }"#;

    #[test]
    fn mime_parameters_are_stripped_on_dispatch() {
        let parser = FormatParser::new();
        let keys = parser
            .parse("application/jwk+json; charset=utf-8", SINGLE_JWK)
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_id(), "C6vs25welZOx6WksNYfbMfiw9l96pMnD");
    }

    #[test]
    fn unknown_format_is_rejected() {
        let parser = FormatParser::new();
        let err = parser.parse("application/x-no-such", SINGLE_JWK).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormat { .. }));
    }

    #[test]
    fn registering_format_with_parameters_fails() {
        let err = FormatParser::builder()
            .with_formats(Arc::new(JwkParser), ["application/json; charset=utf-8"])
            .build()
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidFormat { .. }));
    }

    #[test]
    fn custom_format_registration_dispatches() {
        let parser = FormatParser::builder()
            .with_formats(Arc::new(JwkParser), [".mykey"])
            .build()
            .unwrap();
        let keys = parser.parse(".mykey", SINGLE_JWK).unwrap();
        assert_eq!(keys.len(), 1);
    }
}
