//! Configuration types.
//!
//! These structs are designed to be deserialized from externally managed
//! JSON or YAML documents; the crate itself performs no file loading. The
//! core components consume validated values, so callers should run
//! [`Config::validate`] (or [`validate_sources`]) after deserializing.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resolve::template::{UriTemplate, KEY_ID_PARAMETER};
use crate::TemplateError;

/// The base interval between key refreshes when no interval could be
/// determined any other way.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// The hard minimum for the interval between key refreshes, regardless of
/// how the interval was determined.
pub const DEFAULT_REFRESH_MIN_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// The default randomization factor for key refreshes.
pub const DEFAULT_REFRESH_JITTER: f64 = 0.1;

/// An error describing an invalid configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A refresh source was configured without a URI.
    #[error("a URI is required for each refresh source")]
    MissingSourceUri,

    /// Two refresh sources share a URI.
    #[error("duplicate refresh source URI: {uri}")]
    DuplicateSourceUri {
        /// The duplicated URI.
        uri: String,
    },

    /// A source's minimum interval exceeds its base interval.
    #[error("minInterval {min_interval:?} exceeds interval {interval:?} for source {uri}")]
    MinIntervalTooLarge {
        /// The source URI.
        uri: String,
        /// The configured minimum interval.
        min_interval: Duration,
        /// The effective base interval.
        interval: Duration,
    },

    /// A source's jitter lies outside the open interval (0.0, 1.0).
    #[error("jitter {jitter} for source {uri} must lie in (0.0, 1.0)")]
    JitterOutOfRange {
        /// The source URI.
        uri: String,
        /// The configured jitter.
        jitter: f64,
    },

    /// The resolve template could not be parsed.
    #[error(transparent)]
    InvalidTemplate(#[from] TemplateError),

    /// The resolve template does not mention the `{keyID}` parameter.
    #[error("the resolve template must contain the {{keyID}} parameter")]
    TemplateMissingKeyId,
}

/// A single location where keys are retrieved on a schedule.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RefreshSource {
    /// The location keys are served from. `file://`, `http://`, and
    /// `https://` URIs are supported out of the box.
    ///
    /// Required, and unique within a refresher's source set.
    pub uri: String,

    /// The base time between refreshes, used when the source doesn't
    /// advertise a time-to-live (e.g. no `Cache-Control` header).
    ///
    /// Defaults to [`DEFAULT_REFRESH_INTERVAL`].
    #[serde(with = "humantime_serde")]
    pub interval: Option<Duration>,

    /// The absolute minimum time between refreshes from this source, no
    /// matter what intervals or TTLs are in play.
    ///
    /// Defaults to [`DEFAULT_REFRESH_MIN_INTERVAL`]; must not exceed the
    /// effective interval.
    #[serde(with = "humantime_serde")]
    pub min_interval: Option<Duration>,

    /// The randomization factor applied to the time between refreshes.
    /// However the interval is determined, the actual delay is sampled from
    /// a window scaled by this factor.
    ///
    /// Must lie in (0.0, 1.0) exclusive. Defaults to
    /// [`DEFAULT_REFRESH_JITTER`].
    pub jitter: Option<f64>,
}

impl RefreshSource {
    /// Builds a source polling the given URI with default scheduling.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// The base interval, with the default substituted for unset or
    /// non-positive values.
    pub fn effective_interval(&self) -> Duration {
        match self.interval {
            Some(interval) if !interval.is_zero() => interval,
            _ => DEFAULT_REFRESH_INTERVAL,
        }
    }

    /// The minimum interval, with the default substituted for unset or
    /// non-positive values.
    pub fn effective_min_interval(&self) -> Duration {
        match self.min_interval {
            Some(min_interval) if !min_interval.is_zero() => min_interval,
            _ => DEFAULT_REFRESH_MIN_INTERVAL,
        }
    }

    /// The jitter factor, with the default substituted for unset or
    /// out-of-range values.
    pub fn effective_jitter(&self) -> f64 {
        match self.jitter {
            Some(jitter) if jitter > 0.0 && jitter < 1.0 => jitter,
            _ => DEFAULT_REFRESH_JITTER,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.uri.is_empty() {
            return Err(ConfigError::MissingSourceUri);
        }

        if let Some(jitter) = self.jitter {
            if jitter <= 0.0 || jitter >= 1.0 {
                return Err(ConfigError::JitterOutOfRange {
                    uri: self.uri.clone(),
                    jitter,
                });
            }
        }

        if let Some(min_interval) = self.min_interval {
            let interval = self.effective_interval();
            if min_interval > interval {
                return Err(ConfigError::MinIntervalTooLarge {
                    uri: self.uri.clone(),
                    min_interval,
                    interval,
                });
            }
        }

        Ok(())
    }
}

/// Validates a set of refresh sources: every source must carry a unique,
/// non-empty URI and internally consistent scheduling fields.
///
/// # Errors
///
/// Returns the first [`ConfigError`] encountered.
pub fn validate_sources(sources: &[RefreshSource]) -> Result<(), ConfigError> {
    let mut seen = HashSet::with_capacity(sources.len());
    for source in sources {
        source.validate()?;
        if !seen.insert(source.uri.as_str()) {
            return Err(ConfigError::DuplicateSourceUri {
                uri: source.uri.clone(),
            });
        }
    }

    Ok(())
}

/// Configures how individual keys are fetched on demand.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolveConfig {
    /// A URI template used to fetch keys, carrying a single `{keyID}`
    /// parameter, e.g. `https://keys.example.com/{keyID}`.
    pub template: String,

    /// The maximum time to wait for a resolve-driven fetch. No timeout is
    /// applied when unset.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

/// Configures background key refresh.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RefreshConfig {
    /// The set of sources polled for key material. An empty set yields a
    /// refresher that does nothing.
    pub sources: Vec<RefreshSource>,
}

/// Top-level configuration, typically unmarshaled from an external JSON or
/// YAML document.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// How individual keys are resolved on demand.
    pub resolve: ResolveConfig,

    /// How keys are refreshed in the background.
    pub refresh: RefreshConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a refresh source is invalid, or when
    /// a non-empty resolve template does not parse or lacks the `{keyID}`
    /// parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_sources(&self.refresh.sources)?;

        if !self.resolve.template.is_empty() {
            let template = UriTemplate::parse(&self.resolve.template)?;
            if !template.has_variable(KEY_ID_PARAMETER) {
                return Err(ConfigError::TemplateMissingKeyId);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_deserialize_with_humantime_durations() {
        let source: RefreshSource = serde_json::from_str(
            r#"{"uri": "https://keys.example.com", "interval": "24h", "minInterval": "10m", "jitter": 0.25}"#,
        )
        .unwrap();

        assert_eq!(source.interval, Some(Duration::from_secs(24 * 60 * 60)));
        assert_eq!(source.min_interval, Some(Duration::from_secs(600)));
        assert_eq!(source.jitter, Some(0.25));
        assert!(validate_sources(std::slice::from_ref(&source)).is_ok());
    }

    #[test]
    fn defaults_substitute_for_unset_fields() {
        let source = RefreshSource::new("https://keys.example.com");

        assert_eq!(source.effective_interval(), DEFAULT_REFRESH_INTERVAL);
        assert_eq!(source.effective_min_interval(), DEFAULT_REFRESH_MIN_INTERVAL);
        assert!((source.effective_jitter() - DEFAULT_REFRESH_JITTER).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_uri_is_rejected() {
        let err = validate_sources(&[RefreshSource::default()]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSourceUri));
    }

    #[test]
    fn duplicate_uris_are_rejected() {
        let sources = vec![
            RefreshSource::new("https://keys.example.com"),
            RefreshSource::new("https://keys.example.com"),
        ];
        let err = validate_sources(&sources).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSourceUri { .. }));
    }

    #[test]
    fn min_interval_must_not_exceed_interval() {
        let source = RefreshSource {
            uri: "https://keys.example.com".to_owned(),
            interval: Some(Duration::from_secs(60)),
            min_interval: Some(Duration::from_secs(3600)),
            jitter: None,
        };
        let err = validate_sources(&[source]).unwrap_err();
        assert!(matches!(err, ConfigError::MinIntervalTooLarge { .. }));
    }

    #[test]
    fn jitter_must_be_a_proper_fraction() {
        for jitter in [0.0, 1.0, -0.5, 3.0] {
            let source = RefreshSource {
                uri: "https://keys.example.com".to_owned(),
                jitter: Some(jitter),
                ..RefreshSource::default()
            };
            let err = validate_sources(&[source]).unwrap_err();
            assert!(matches!(err, ConfigError::JitterOutOfRange { .. }));
        }
    }

    #[test]
    fn config_validates_resolve_template() {
        let config: Config = serde_json::from_str(
            r#"{
                "resolve": {"template": "https://keys.example.com/{keyID}", "timeout": "5s"},
                "refresh": {"sources": [{"uri": "https://keys.example.com/jwks.json"}]}
            }"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.resolve.timeout, Some(Duration::from_secs(5)));

        let missing: Config = serde_json::from_str(
            r#"{"resolve": {"template": "https://keys.example.com/static"}}"#,
        )
        .unwrap();
        assert!(matches!(
            missing.validate().unwrap_err(),
            ConfigError::TemplateMissingKeyId
        ));
    }
}
