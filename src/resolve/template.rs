//! URI template expansion.
//!
//! Implements the simple string expansion subset of RFC 6570 (level 1):
//! literal text interleaved with `{var}` expressions whose values are
//! percent-encoded on expansion. That is all key resolution needs: resolve
//! templates carry a single `{keyID}` variable.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;

/// The template variable substituted with the key ID during resolution.
pub const KEY_ID_PARAMETER: &str = "keyID";

/// Everything except RFC 3986 unreserved characters is percent-encoded on
/// expansion.
const ENCODED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// An error that can arise parsing a URI template.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum TemplateError {
    /// A `{` was never closed.
    #[error("unterminated expression in URI template: {template}")]
    Unterminated {
        /// The offending template.
        template: String,
    },

    /// An expression was empty (`{}`).
    #[error("empty expression in URI template: {template}")]
    EmptyExpression {
        /// The offending template.
        template: String,
    },

    /// An expression contained a nested `{`.
    #[error("nested expression in URI template: {template}")]
    NestedExpression {
        /// The offending template.
        template: String,
    },

    /// A variable name contained an unsupported character.
    #[error("invalid character {character:?} in URI template variable: {template}")]
    InvalidVariable {
        /// The offending template.
        template: String,
        /// The character that is not allowed in a variable name.
        character: char,
    },
}

#[derive(Clone, Debug)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A parsed URI template.
///
/// ```
/// use keysource::UriTemplate;
///
/// let template: UriTemplate = "https://keys.example.com/{keyID}".parse()?;
/// let uri = template.expand(&[("keyID", "a key/id")]);
/// assert_eq!(uri, "https://keys.example.com/a%20key%2Fid");
/// # Ok::<(), keysource::TemplateError>(())
/// ```
#[derive(Clone, Debug)]
pub struct UriTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl UriTemplate {
    /// Parses a URI template.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] describing the first malformed
    /// expression.
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            if c != '{' {
                literal.push(c);
                continue;
            }

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }

            let mut variable = String::new();
            loop {
                match chars.next() {
                    None => {
                        return Err(TemplateError::Unterminated {
                            template: raw.to_owned(),
                        })
                    }
                    Some('{') => {
                        return Err(TemplateError::NestedExpression {
                            template: raw.to_owned(),
                        })
                    }
                    Some('}') => break,
                    Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '.' => {
                        variable.push(c);
                    }
                    Some(character) => {
                        return Err(TemplateError::InvalidVariable {
                            template: raw.to_owned(),
                            character,
                        })
                    }
                }
            }

            if variable.is_empty() {
                return Err(TemplateError::EmptyExpression {
                    template: raw.to_owned(),
                });
            }

            segments.push(Segment::Variable(variable));
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_owned(),
            segments,
        })
    }

    /// Returns `true` when the template mentions the given variable.
    pub fn has_variable(&self, name: &str) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Variable(variable) if variable == name))
    }

    /// Expands the template with the given variable values.
    ///
    /// Values are percent-encoded. Variables without a supplied value
    /// expand to the empty string, per RFC 6570.
    pub fn expand(&self, variables: &[(&str, &str)]) -> String {
        let mut expanded = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => expanded.push_str(literal),
                Segment::Variable(name) => {
                    if let Some((_, value)) =
                        variables.iter().find(|(variable, _)| variable == name)
                    {
                        expanded.extend(utf8_percent_encode(value, ENCODED));
                    }
                }
            }
        }

        expanded
    }
}

impl FromStr for UriTemplate {
    type Err = TemplateError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_key_id() {
        let template = UriTemplate::parse("https://keys.example.com/{keyID}").unwrap();
        assert!(template.has_variable(KEY_ID_PARAMETER));
        assert_eq!(
            template.expand(&[(KEY_ID_PARAMETER, "testKey")]),
            "https://keys.example.com/testKey"
        );
    }

    #[test]
    fn values_are_percent_encoded() {
        let template = UriTemplate::parse("https://keys.example.com/{keyID}").unwrap();
        assert_eq!(
            template.expand(&[(KEY_ID_PARAMETER, "a/b c")]),
            "https://keys.example.com/a%2Fb%20c"
        );
        // Unreserved characters pass through untouched.
        assert_eq!(
            template.expand(&[(KEY_ID_PARAMETER, "A-b_c.d~e")]),
            "https://keys.example.com/A-b_c.d~e"
        );
    }

    #[test]
    fn unknown_variables_expand_empty() {
        let template = UriTemplate::parse("https://keys.example.com/{other}/x").unwrap();
        assert_eq!(template.expand(&[]), "https://keys.example.com//x");
    }

    #[test]
    fn literal_only_templates_are_fine() {
        let template = UriTemplate::parse("https://keys.example.com/static").unwrap();
        assert!(!template.has_variable(KEY_ID_PARAMETER));
        assert_eq!(template.expand(&[]), "https://keys.example.com/static");
    }

    #[test]
    fn malformed_templates_are_rejected() {
        assert!(matches!(
            UriTemplate::parse("https://x/{keyID").unwrap_err(),
            TemplateError::Unterminated { .. }
        ));
        assert!(matches!(
            UriTemplate::parse("https://x/{}").unwrap_err(),
            TemplateError::EmptyExpression { .. }
        ));
        assert!(matches!(
            UriTemplate::parse("https://x/{a{b}}").unwrap_err(),
            TemplateError::NestedExpression { .. }
        ));
        assert!(matches!(
            UriTemplate::parse("https://x/{key id}").unwrap_err(),
            TemplateError::InvalidVariable { .. }
        ));
    }
}
