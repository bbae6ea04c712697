//! JWK and JWK-Set parsing.

use serde_json::Value;

use super::{ParseError, Parser};
use crate::key::Key;

/// Parses content as a JWK set.
///
/// Content holding a single JWK instead of a set is also accepted, yielding
/// a one-element result. This is the parser registered for the `.json`,
/// `.jwk-set`, `application/json`, and `application/jwk-set+json` formats.
#[derive(Clone, Copy, Debug, Default)]
pub struct JwkSetParser;

impl Parser for JwkSetParser {
    fn parse(&self, _format: &str, data: &[u8]) -> Result<Vec<Key>, ParseError> {
        let value: Value = serde_json::from_slice(data)?;

        match keys_member(&value) {
            Some(entries) => entries
                .iter()
                .map(|entry| Key::from_jwk_value(entry.clone()).map_err(ParseError::from))
                .collect(),
            None => Ok(vec![Key::from_jwk_value(value)?]),
        }
    }
}

/// Parses content as a single JWK.
///
/// Content holding a JWK set is an error. This is the parser registered for
/// the `.jwk` and `application/jwk+json` formats.
#[derive(Clone, Copy, Debug, Default)]
pub struct JwkParser;

impl Parser for JwkParser {
    fn parse(&self, _format: &str, data: &[u8]) -> Result<Vec<Key>, ParseError> {
        let value: Value = serde_json::from_slice(data)?;

        if keys_member(&value).is_some() {
            return Err(ParseError::UnexpectedKeySet);
        }

        Ok(vec![Key::from_jwk_value(value)?])
    }
}

/// Returns the `keys` array when `value` is shaped like a JWK set.
fn keys_member(value: &Value) -> Option<&Vec<Value>> {
    value.as_object()?.get("keys")?.as_array()
}
