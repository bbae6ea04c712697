//! PEM parsing.
//!
//! PEM blocks carry no `kid` member; keys parsed here have an empty key ID
//! until a [`Fetcher`](crate::Fetcher) synthesizes one from the thumbprint.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::pkcs8::{DecodePrivateKey as _, DecodePublicKey as _};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::pkcs1::{DecodeRsaPrivateKey as _, DecodeRsaPublicKey as _};
use rsa::pkcs8::{DecodePrivateKey as _, DecodePublicKey as _};
use rsa::traits::{PrivateKeyParts as _, PublicKeyParts as _};
use serde_json::{json, Value};
use x509_parser::pem::Pem;

use super::{ParseError, Parser};
use crate::key::Key;

/// Parses content as one or more concatenated PEM blocks.
///
/// Supported block labels:
///
/// * `PUBLIC KEY`: SPKI public keys (RSA, EC P-256, Ed25519)
/// * `RSA PUBLIC KEY`: PKCS#1 public keys
/// * `PRIVATE KEY`: PKCS#8 private keys (RSA, EC P-256, Ed25519)
/// * `RSA PRIVATE KEY`: PKCS#1 private keys
/// * `EC PRIVATE KEY`: SEC1 private keys (P-256)
///
/// This is the parser registered for the `.pem` and
/// `application/x-pem-file` formats.
#[derive(Clone, Copy, Debug, Default)]
pub struct PemParser;

impl Parser for PemParser {
    fn parse(&self, _format: &str, data: &[u8]) -> Result<Vec<Key>, ParseError> {
        let mut keys = Vec::new();

        for block in Pem::iter_from_buffer(data) {
            let block = block.map_err(|err| ParseError::Pem(err.to_string()))?;
            let jwk = block_to_jwk(&block)?;
            keys.push(Key::from_jwk_value(jwk)?);
        }

        Ok(keys)
    }
}

fn block_to_jwk(block: &Pem) -> Result<Value, ParseError> {
    let der = block.contents.as_slice();

    match block.label.as_str() {
        "PUBLIC KEY" => spki_to_jwk(der),
        "RSA PUBLIC KEY" => {
            let key = rsa::RsaPublicKey::from_pkcs1_der(der)
                .map_err(|err| ParseError::UnsupportedPemKey(err.to_string()))?;
            Ok(rsa_public_jwk(&key))
        }
        "PRIVATE KEY" => pkcs8_to_jwk(der),
        "RSA PRIVATE KEY" => {
            let key = rsa::RsaPrivateKey::from_pkcs1_der(der)
                .map_err(|err| ParseError::UnsupportedPemKey(err.to_string()))?;
            Ok(rsa_private_jwk(&key))
        }
        "EC PRIVATE KEY" => {
            let key = p256::SecretKey::from_sec1_der(der)
                .map_err(|err| ParseError::UnsupportedPemKey(err.to_string()))?;
            Ok(ec_private_jwk(&key))
        }
        label => Err(ParseError::UnsupportedPemLabel {
            label: label.to_owned(),
        }),
    }
}

/// Decodes an SPKI (`PUBLIC KEY`) block, trying each supported key type.
fn spki_to_jwk(der: &[u8]) -> Result<Value, ParseError> {
    if let Ok(key) = rsa::RsaPublicKey::from_public_key_der(der) {
        return Ok(rsa_public_jwk(&key));
    }

    if let Ok(key) = p256::PublicKey::from_public_key_der(der) {
        return Ok(ec_public_jwk(&key));
    }

    if let Ok(key) = ed25519_dalek::VerifyingKey::from_public_key_der(der) {
        return Ok(okp_public_jwk(&key));
    }

    Err(ParseError::UnsupportedPemKey(
        "unrecognized public key algorithm".to_owned(),
    ))
}

/// Decodes a PKCS#8 (`PRIVATE KEY`) block, trying each supported key type.
fn pkcs8_to_jwk(der: &[u8]) -> Result<Value, ParseError> {
    if let Ok(key) = rsa::RsaPrivateKey::from_pkcs8_der(der) {
        return Ok(rsa_private_jwk(&key));
    }

    if let Ok(key) = p256::SecretKey::from_pkcs8_der(der) {
        return Ok(ec_private_jwk(&key));
    }

    if let Ok(key) = ed25519_dalek::SigningKey::from_pkcs8_der(der) {
        return Ok(okp_private_jwk(&key));
    }

    Err(ParseError::UnsupportedPemKey(
        "unrecognized private key algorithm".to_owned(),
    ))
}

fn b64(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn rsa_public_jwk(key: &rsa::RsaPublicKey) -> Value {
    json!({
        "kty": "RSA",
        "n": b64(key.n().to_bytes_be()),
        "e": b64(key.e().to_bytes_be()),
    })
}

fn rsa_private_jwk(key: &rsa::RsaPrivateKey) -> Value {
    let mut jwk = rsa_public_jwk(&key.to_public_key());
    if let Some(members) = jwk.as_object_mut() {
        members.insert("d".to_owned(), Value::String(b64(key.d().to_bytes_be())));
        // Prime factors are only representable for two-prime keys.
        if let [p, q] = key.primes() {
            members.insert("p".to_owned(), Value::String(b64(p.to_bytes_be())));
            members.insert("q".to_owned(), Value::String(b64(q.to_bytes_be())));
        }
    }

    jwk
}

fn ec_public_jwk(key: &p256::PublicKey) -> Value {
    let point = key.to_encoded_point(false);
    json!({
        "kty": "EC",
        "crv": "P-256",
        "x": point.x().map(b64).unwrap_or_default(),
        "y": point.y().map(b64).unwrap_or_default(),
    })
}

fn ec_private_jwk(key: &p256::SecretKey) -> Value {
    let mut jwk = ec_public_jwk(&key.public_key());
    if let Some(members) = jwk.as_object_mut() {
        members.insert("d".to_owned(), Value::String(b64(key.to_bytes())));
    }

    jwk
}

fn okp_public_jwk(key: &ed25519_dalek::VerifyingKey) -> Value {
    json!({
        "kty": "OKP",
        "crv": "Ed25519",
        "x": b64(key.to_bytes()),
    })
}

fn okp_private_jwk(key: &ed25519_dalek::SigningKey) -> Value {
    json!({
        "kty": "OKP",
        "crv": "Ed25519",
        "x": b64(key.verifying_key().to_bytes()),
        "d": b64(key.to_bytes()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::pkcs8::EncodePrivateKey as _;
    use p256::pkcs8::EncodePublicKey as _;
    use rsa::pkcs8::{EncodePublicKey as _, LineEnding};
    use rsa::BigUint;

    fn ed25519_signing_key() -> ed25519_dalek::SigningKey {
        ed25519_dalek::SigningKey::from_bytes(&[7u8; 32])
    }

    fn p256_public_pem() -> String {
        let secret = p256::SecretKey::from_slice(&[11u8; 32]).unwrap();
        secret
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap()
    }

    fn rsa_public_pem() -> String {
        // Modulus and exponent from the RFC 7517 appendix A.1 example key.
        let n = URL_SAFE_NO_PAD
            .decode(
                "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw",
            )
            .unwrap();
        let e = URL_SAFE_NO_PAD.decode("AQAB").unwrap();

        let key = rsa::RsaPublicKey::new(
            BigUint::from_bytes_be(&n),
            BigUint::from_bytes_be(&e),
        )
        .unwrap();
        key.to_public_key_pem(LineEnding::LF).unwrap()
    }

    #[test]
    fn parses_rsa_spki_block() {
        let keys = PemParser.parse(".pem", rsa_public_pem().as_bytes()).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_type(), "RSA");
        // PEM blocks carry no kid.
        assert_eq!(keys[0].key_id(), "");
        assert_eq!(keys[0].raw()["e"], json!("AQAB"));
    }

    #[test]
    fn parses_ec_spki_block() {
        let keys = PemParser.parse(".pem", p256_public_pem().as_bytes()).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_type(), "EC");
        assert_eq!(keys[0].raw()["crv"], json!("P-256"));
    }

    #[test]
    fn parses_ed25519_pkcs8_block_with_private_material() {
        let pem = ed25519_signing_key().to_pkcs8_pem(LineEnding::LF).unwrap();
        let keys = PemParser.parse(".pem", pem.as_bytes()).unwrap();

        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_type(), "OKP");
        assert!(keys[0].raw().contains_key("d"));
        assert!(!keys[0].public().contains_key("d"));
    }

    #[test]
    fn parses_concatenated_blocks_in_order() {
        let pem = format!(
            "{}{}",
            rsa_public_pem(),
            ed25519_signing_key()
                .to_pkcs8_pem(LineEnding::LF)
                .unwrap()
                .as_str()
        );
        let keys = PemParser.parse(".pem", pem.as_bytes()).unwrap();

        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].key_type(), "RSA");
        assert_eq!(keys[1].key_type(), "OKP");
    }

    #[test]
    fn unsupported_label_is_rejected() {
        let pem = "-----BEGIN CERTIFICATE REQUEST-----\nAAAA\n-----END CERTIFICATE REQUEST-----\n";
        let err = PemParser.parse(".pem", pem.as_bytes()).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedPemLabel { .. }));
    }
}
