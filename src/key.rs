//! Key types.
//!
//! A [`Key`] is an immutable piece of cryptographic key material identified
//! by an optional key ID (the JWK `kid` member). Keys are cheap to clone and
//! safe to share across tasks; the same `Key` value can flow through a
//! refresh event, a [`KeyRing`](crate::KeyRing) insertion, and any number of
//! listener callbacks without copying the underlying material.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, PublicKeyUse};
use jsonwebtoken::DecodingKey;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha384, Sha512};
use thiserror::Error;

/// JWK members that hold private key material, per key type.
///
/// Stripping these from a JWK yields its public projection. Symmetric
/// (`oct`) keys have no separate public form.
const RSA_PRIVATE_MEMBERS: &[&str] = &["d", "p", "q", "dp", "dq", "qi", "oth"];
const EC_PRIVATE_MEMBERS: &[&str] = &["d"];
const OKP_PRIVATE_MEMBERS: &[&str] = &["d"];

/// An error that can arise building a [`Key`] from JWK material.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyError {
    /// The JWK members could not be deserialized into a supported key type.
    #[error("cannot deserialize jwk: {0}")]
    Json(#[from] serde_json::Error),

    /// The supplied JSON value was not an object.
    #[error("a jwk must be a json object")]
    NotAnObject,
}

/// The hash algorithm used to compute RFC 7638 thumbprints.
///
/// SHA-256 is the interoperable default; the others are provided for
/// deployments that standardize on a longer digest.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum ThumbprintAlgorithm {
    /// SHA-256 (the RFC 7638 recommendation).
    #[default]
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

/// Immutable cryptographic key material.
///
/// A `Key` corresponds to one JWK. It retains the full set of JWK members it
/// was built from (including private members, when present) alongside a
/// typed view of the public parameters. Cloning is cheap; the material is
/// shared.
///
/// The key ID may be empty immediately after parsing. Keys returned by a
/// [`Fetcher`](crate::Fetcher) always carry a non-empty key ID, synthesized
/// from the RFC 7638 thumbprint when the source did not provide one.
#[derive(Clone)]
pub struct Key {
    inner: Arc<KeyInner>,
}

struct KeyInner {
    key_id: String,
    jwk: Jwk,
    raw: Map<String, Value>,
    public: Map<String, Value>,
}

impl Key {
    /// Builds a `Key` from the JSON value of a single JWK.
    ///
    /// The value must be a JSON object with a `kty` member describing one of
    /// the supported key types (`RSA`, `EC`, `OKP`, `oct`). Members beyond
    /// the typed parameters, such as private key material, are retained and
    /// exposed through [`Key::raw`].
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`] if the value is not an object or its members
    /// do not form a supported JWK.
    pub fn from_jwk_value(value: Value) -> Result<Self, KeyError> {
        let jwk: Jwk = serde_json::from_value(value.clone())?;
        let Value::Object(raw) = value else {
            return Err(KeyError::NotAnObject);
        };

        let key_id = jwk.common.key_id.clone().unwrap_or_default();
        let public = public_projection(&raw, &jwk.algorithm);

        Ok(Self {
            inner: Arc::new(KeyInner {
                key_id,
                jwk,
                raw,
                public,
            }),
        })
    }

    /// Builds a `Key` from an already-parsed JWK.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`] if the JWK cannot be round-tripped through its
    /// JSON representation.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, KeyError> {
        Self::from_jwk_value(serde_json::to_value(jwk)?)
    }

    /// The identifier for this key, corresponding to the JWK `kid` member.
    ///
    /// A key ID is optional at parse time; this method can return the empty
    /// string.
    pub fn key_id(&self) -> &str {
        &self.inner.key_id
    }

    /// The type of this key, corresponding to the JWK `kty` member.
    ///
    /// Always non-empty: one of `RSA`, `EC`, `OKP`, or `oct`.
    pub fn key_type(&self) -> &str {
        match &self.inner.jwk.algorithm {
            AlgorithmParameters::RSA(_) => "RSA",
            AlgorithmParameters::EllipticCurve(_) => "EC",
            AlgorithmParameters::OctetKeyPair(_) => "OKP",
            AlgorithmParameters::OctetKey(_) => "oct",
        }
    }

    /// How this key may be used, corresponding to the JWK `use` member.
    pub fn key_usage(&self) -> Option<&str> {
        match &self.inner.jwk.common.public_key_use {
            Some(PublicKeyUse::Signature) => Some("sig"),
            Some(PublicKeyUse::Encryption) => Some("enc"),
            Some(PublicKeyUse::Other(other)) => Some(other.as_str()),
            None => None,
        }
    }

    /// The full set of JWK members this key was built from.
    ///
    /// For keys parsed from private material this includes the private
    /// members.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.inner.raw
    }

    /// The public projection of [`Key::raw`].
    ///
    /// Private members are stripped. For purely public keys, and for `oct`
    /// keys where no separate public form exists, this equals `raw`.
    pub fn public(&self) -> &Map<String, Value> {
        &self.inner.public
    }

    /// The typed view of this key's public JWK parameters.
    pub fn jwk(&self) -> &Jwk {
        &self.inner.jwk
    }

    /// Builds a [`DecodingKey`] for verifying JWT signatures with this key.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying JOSE library does not support this
    /// key's parameters for verification.
    pub fn decoding_key(&self) -> Result<DecodingKey, jsonwebtoken::errors::Error> {
        DecodingKey::from_jwk(&self.inner.jwk)
    }

    /// Computes the RFC 7638 thumbprint of this key.
    ///
    /// The thumbprint is the digest of the canonical JSON serialization of
    /// the required public members for this key's type. Keys with identical
    /// type and material produce identical thumbprints, regardless of any
    /// other members such as `kid` or `use`.
    ///
    /// The returned bytes are the raw digest. Use [`Key::thumbprint_key_id`]
    /// for the base64url form conventionally used as a key ID.
    pub fn thumbprint(&self, algorithm: ThumbprintAlgorithm) -> Vec<u8> {
        let canonical = canonical_members(&self.inner.jwk.algorithm);
        match algorithm {
            ThumbprintAlgorithm::Sha256 => Sha256::digest(&canonical).to_vec(),
            ThumbprintAlgorithm::Sha384 => Sha384::digest(&canonical).to_vec(),
            ThumbprintAlgorithm::Sha512 => Sha512::digest(&canonical).to_vec(),
        }
    }

    /// Computes the RFC 7638 thumbprint encoded as a key ID.
    ///
    /// This is the base64url encoding, without padding, of
    /// [`Key::thumbprint`].
    pub fn thumbprint_key_id(&self, algorithm: ThumbprintAlgorithm) -> String {
        URL_SAFE_NO_PAD.encode(self.thumbprint(algorithm))
    }

    /// Returns a copy of this key carrying the given key ID.
    ///
    /// The `kid` member of both the raw and public projections is updated.
    pub fn with_key_id(&self, key_id: impl Into<String>) -> Self {
        let key_id = key_id.into();

        let mut jwk = self.inner.jwk.clone();
        jwk.common.key_id = Some(key_id.clone());

        let mut raw = self.inner.raw.clone();
        raw.insert("kid".to_owned(), Value::String(key_id.clone()));

        let mut public = self.inner.public.clone();
        public.insert("kid".to_owned(), Value::String(key_id.clone()));

        Self {
            inner: Arc::new(KeyInner {
                key_id,
                jwk,
                raw,
                public,
            }),
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.inner.raw == other.inner.raw
    }
}

impl Eq for Key {}

impl fmt::Debug for Key {
    // Key material is deliberately not printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("key_id", &self.inner.key_id)
            .field("key_type", &self.key_type())
            .field("key_usage", &self.key_usage())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.key_id)
    }
}

/// Serializes the canonical RFC 7638 member subset for thumbprinting.
///
/// Members are written in lexicographic order with no insignificant
/// whitespace, as the RFC requires. All member values here are base64url or
/// curve-name strings, so no JSON escaping is needed.
fn canonical_members(algorithm: &AlgorithmParameters) -> Vec<u8> {
    let canonical = match algorithm {
        AlgorithmParameters::EllipticCurve(params) => format!(
            r#"{{"crv":"{}","kty":"EC","x":"{}","y":"{}"}}"#,
            curve_name(&params.curve),
            params.x,
            params.y,
        ),
        AlgorithmParameters::OctetKeyPair(params) => format!(
            r#"{{"crv":"{}","kty":"OKP","x":"{}"}}"#,
            curve_name(&params.curve),
            params.x,
        ),
        AlgorithmParameters::RSA(params) => {
            format!(r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#, params.e, params.n)
        }
        AlgorithmParameters::OctetKey(params) => {
            format!(r#"{{"k":"{}","kty":"oct"}}"#, params.value)
        }
    };

    canonical.into_bytes()
}

fn curve_name(curve: &EllipticCurve) -> &'static str {
    match curve {
        EllipticCurve::P256 => "P-256",
        EllipticCurve::P384 => "P-384",
        EllipticCurve::P521 => "P-521",
        EllipticCurve::Ed25519 => "Ed25519",
    }
}

fn public_projection(
    raw: &Map<String, Value>,
    algorithm: &AlgorithmParameters,
) -> Map<String, Value> {
    let private_members = match algorithm {
        AlgorithmParameters::RSA(_) => RSA_PRIVATE_MEMBERS,
        AlgorithmParameters::EllipticCurve(_) => EC_PRIVATE_MEMBERS,
        AlgorithmParameters::OctetKeyPair(_) => OKP_PRIVATE_MEMBERS,
        AlgorithmParameters::OctetKey(_) => &[],
    };

    let mut public = raw.clone();
    for member in private_members {
        public.remove(*member);
    }

    public
}

/// Sorts keys by key ID, ascending. Keys without a key ID sort last.
pub(crate) fn sort_keys_by_id(keys: &mut [Key]) {
    keys.sort_by(|a, b| {
        let (left, right) = (a.key_id(), b.key_id());
        match (left.is_empty(), right.is_empty()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => left.cmp(right),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ed25519_key() -> Key {
        // Test vector from RFC 8037, appendix A.3.
        Key::from_jwk_value(json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"
        }))
        .unwrap()
    }

    #[test]
    fn ed25519_thumbprint_matches_rfc_8037_vector() {
        let key = ed25519_key();
        assert_eq!(
            key.thumbprint_key_id(ThumbprintAlgorithm::Sha256),
            "kPrK_qmxVWaYVA9wwBF6Iuo3vVzz7TxHCTwXBygrS4k"
        );
    }

    #[test]
    fn thumbprint_is_deterministic_and_ignores_extra_members() {
        let bare = Key::from_jwk_value(json!({
            "kty": "oct",
            "k": "GawgguFyGrWKav7AX4VKUg"
        }))
        .unwrap();
        let decorated = Key::from_jwk_value(json!({
            "kty": "oct",
            "kid": "some-kid",
            "use": "sig",
            "k": "GawgguFyGrWKav7AX4VKUg"
        }))
        .unwrap();

        assert_eq!(
            bare.thumbprint(ThumbprintAlgorithm::Sha256),
            decorated.thumbprint(ThumbprintAlgorithm::Sha256)
        );
        assert_eq!(
            bare.thumbprint(ThumbprintAlgorithm::Sha256),
            bare.thumbprint(ThumbprintAlgorithm::Sha256)
        );
        assert_ne!(
            bare.thumbprint(ThumbprintAlgorithm::Sha256),
            bare.thumbprint(ThumbprintAlgorithm::Sha512)
        );
    }

    #[test]
    fn key_exposes_jwk_members() {
        let key = Key::from_jwk_value(json!({
            "kty": "EC",
            "kid": "ec-1",
            "use": "sig",
            "crv": "P-256",
            "x": "ngLYQnlfF6GsojUwqtcEE3WgTNG2RUlsGhK73RNEl5k",
            "y": "tKbiDSUSsQ3F1P7wteeHNXIcU-cx6CgSbroeQrQHTLM"
        }))
        .unwrap();

        assert_eq!(key.key_id(), "ec-1");
        assert_eq!(key.key_type(), "EC");
        assert_eq!(key.key_usage(), Some("sig"));
        assert_eq!(key.to_string(), "ec-1");
    }

    #[test]
    fn public_projection_strips_private_members() {
        let key = Key::from_jwk_value(json!({
            "kty": "EC",
            "crv": "P-256",
            "x": "ngLYQnlfF6GsojUwqtcEE3WgTNG2RUlsGhK73RNEl5k",
            "y": "tKbiDSUSsQ3F1P7wteeHNXIcU-cx6CgSbroeQrQHTLM",
            "d": "870MB6gfuTJ4HtUnUvYMyJpr5eUZNP4Bk43bVdj3eAE"
        }))
        .unwrap();

        assert!(key.raw().contains_key("d"));
        assert!(!key.public().contains_key("d"));
        assert!(key.public().contains_key("x"));
    }

    #[test]
    fn oct_public_projection_equals_raw() {
        let key = Key::from_jwk_value(json!({
            "kty": "oct",
            "k": "GawgguFyGrWKav7AX4VKUg"
        }))
        .unwrap();

        assert_eq!(key.raw(), key.public());
    }

    #[test]
    fn with_key_id_updates_all_projections() {
        let key = ed25519_key();
        assert_eq!(key.key_id(), "");

        let updated = key.with_key_id("assigned");
        assert_eq!(updated.key_id(), "assigned");
        assert_eq!(updated.raw()["kid"], json!("assigned"));
        assert_eq!(updated.public()["kid"], json!("assigned"));
        // The original is untouched.
        assert_eq!(key.key_id(), "");
    }

    #[test]
    fn non_object_value_is_rejected() {
        let result = Key::from_jwk_value(json!(["not", "a", "jwk"]));
        assert!(result.is_err());
    }

    #[test]
    fn sort_places_empty_key_ids_last() {
        let mut keys = vec![
            ed25519_key().with_key_id("b"),
            ed25519_key(),
            ed25519_key().with_key_id("a"),
        ];
        sort_keys_by_id(&mut keys);

        let ids: Vec<&str> = keys.iter().map(Key::key_id).collect();
        assert_eq!(ids, vec!["a", "b", ""]);
    }
}
