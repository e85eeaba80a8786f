//! Identifier normalization.
//!
//! Raw sender/chat identifiers arrive in several shapes: numeric IDs,
//! `@username` forms, scheme-prefixed forms (`telegram:alice`, `tg:123`),
//! and the wildcard `*`. Every comparison in the stores and the policy
//! engine goes through [`IdentToken::parse`] so a value written by one path
//! is always found by a lookup from another.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Scheme prefixes stripped case-insensitively before classification.
const SCHEME_PREFIXES: &[&str] = &["telegram:", "tg:"];

/// Canonical form of an external identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IdentToken {
    /// Numeric identifier, kept as the exact digit string (may lead with `-`).
    Id { value: String },
    /// Username, lowercased, without `@` or scheme prefix.
    Username { value: String },
    /// Matches every identifier.
    Wildcard,
}

impl IdentToken {
    /// Normalize a raw identifier.
    ///
    /// Trims whitespace, strips one leading scheme prefix and one leading
    /// `@`, then classifies the remainder. Empty input after stripping is a
    /// validation error, never a wildcard or an empty username.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let mut rest = raw.trim();
        for prefix in SCHEME_PREFIXES {
            if let Some(head) = rest.get(..prefix.len()) {
                if head.eq_ignore_ascii_case(prefix) {
                    rest = &rest[prefix.len()..];
                    break;
                }
            }
        }
        let rest = rest.strip_prefix('@').unwrap_or(rest).trim();

        if rest.is_empty() {
            return Err(StoreError::Validation(format!(
                "empty identifier: {raw:?}"
            )));
        }
        if rest == "*" {
            return Ok(Self::Wildcard);
        }
        if is_integer(rest) {
            return Ok(Self::Id {
                value: rest.to_string(),
            });
        }
        Ok(Self::Username {
            value: rest.to_lowercase(),
        })
    }

    /// Convenience constructor for numeric chat/user IDs from the transport.
    pub fn from_id(id: i64) -> Self {
        Self::Id {
            value: id.to_string(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }
}

impl fmt::Display for IdentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id { value } | Self::Username { value } => f.write_str(value),
            Self::Wildcard => f.write_str("*"),
        }
    }
}

fn is_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_forms() {
        assert_eq!(
            IdentToken::parse("12345").unwrap(),
            IdentToken::Id {
                value: "12345".to_string()
            }
        );
        assert_eq!(
            IdentToken::parse("-100123").unwrap(),
            IdentToken::Id {
                value: "-100123".to_string()
            }
        );
        // Leading zeros survive as-is.
        assert_eq!(
            IdentToken::parse("007").unwrap(),
            IdentToken::Id {
                value: "007".to_string()
            }
        );
    }

    #[test]
    fn test_username_forms_converge() {
        let expected = IdentToken::Username {
            value: "foo".to_string(),
        };
        assert_eq!(IdentToken::parse("foo").unwrap(), expected);
        assert_eq!(IdentToken::parse("@Foo").unwrap(), expected);
        assert_eq!(IdentToken::parse("telegram:foo").unwrap(), expected);
        assert_eq!(IdentToken::parse("TG:FOO").unwrap(), expected);
        assert_eq!(IdentToken::parse("  @foo  ").unwrap(), expected);
    }

    #[test]
    fn test_prefixed_numeric_is_id() {
        assert_eq!(
            IdentToken::parse("tg:555").unwrap(),
            IdentToken::Id {
                value: "555".to_string()
            }
        );
    }

    #[test]
    fn test_wildcard() {
        assert!(IdentToken::parse("*").unwrap().is_wildcard());
        assert!(IdentToken::parse("telegram:*").unwrap().is_wildcard());
    }

    #[test]
    fn test_empty_is_invalid() {
        IdentToken::parse("").unwrap_err();
        IdentToken::parse("   ").unwrap_err();
        IdentToken::parse("@").unwrap_err();
        IdentToken::parse("telegram:").unwrap_err();
    }

    #[test]
    fn test_idempotent_through_display() {
        for raw in ["@Alice", "tg:42", "*", "bob"] {
            let once = IdentToken::parse(raw).unwrap();
            let twice = IdentToken::parse(&once.to_string()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_not_an_integer() {
        assert_eq!(
            IdentToken::parse("12ab").unwrap(),
            IdentToken::Username {
                value: "12ab".to_string()
            }
        );
        // Bare "-" is a username, not an id.
        assert_eq!(
            IdentToken::parse("-").unwrap(),
            IdentToken::Username {
                value: "-".to_string()
            }
        );
    }
}
