//! Canonical three-part component identity.
//!
//! Every pluggable component (prompt section, codec, service) is addressed by
//! an `(origin, bucket, name)` triple, normalized to lowercase snake-case and
//! rendered as `"origin.bucket.name"`. Names are derived from a defining
//! type's simple name by stripping configured tokens from the edges, then
//! case-converting; the derivation is a pure function so it can be tested
//! without reflection.

use crate::error::IdentityError;
use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default bucket for components that declare none.
pub const DEFAULT_BUCKET: &str = "default";

/// Canonical three-part name for a pluggable component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    origin: String,
    bucket: String,
    name: String,
}

impl Identity {
    /// Build an identity, normalizing each segment to lowercase snake-case.
    pub fn new(origin: &str, bucket: &str, name: &str) -> Result<Self, IdentityError> {
        let origin = normalize_segment(origin);
        let bucket = normalize_segment(bucket);
        let name = normalize_segment(name);
        let id = Self {
            origin,
            bucket,
            name,
        };
        id.check_segments()?;
        Ok(id)
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The same identity with a different name segment. The segment must
    /// already be canonical; used by registry collision suffixing and codec
    /// fallback resolution.
    pub(crate) fn with_name(&self, name: &str) -> Self {
        Self {
            origin: self.origin.clone(),
            bucket: self.bucket.clone(),
            name: name.to_string(),
        }
    }

    /// The same identity with a different bucket segment. Same contract as
    /// `with_name`.
    pub(crate) fn with_bucket(&self, bucket: &str) -> Self {
        Self {
            origin: self.origin.clone(),
            bucket: bucket.to_string(),
            name: self.name.clone(),
        }
    }

    fn check_segments(&self) -> Result<(), IdentityError> {
        let input = format!("{}.{}.{}", self.origin, self.bucket, self.name);
        for (label, segment) in [
            ("origin", &self.origin),
            ("bucket", &self.bucket),
            ("name", &self.name),
        ] {
            if segment.is_empty() {
                return Err(IdentityError::EmptySegment {
                    segment: label,
                    input,
                });
            }
            if segment.contains('.') {
                return Err(IdentityError::Malformed(input));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.origin, self.bucket, self.name)
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let (origin, bucket, name) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(o), Some(b), Some(n), None) => (o, b, n),
            _ => return Err(IdentityError::Malformed(s.to_string())),
        };
        Identity::new(origin, bucket, name)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.to_string()
    }
}

/// Optional explicit identity segments supplied at registration.
///
/// Resolution precedence per segment: explicit spec value > component hint >
/// inferred default (catalog namespace, `"default"`, derived type name).
#[derive(Debug, Clone, Default)]
pub struct IdentitySpec {
    pub origin: Option<String>,
    pub bucket: Option<String>,
    pub name: Option<String>,
}

impl IdentitySpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn bucketed(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            origin: None,
            bucket: Some(bucket.into()),
            name: Some(name.into()),
        }
    }
}

/// Derive a component name from a raw type name.
///
/// Strip tokens are removed from the edges only, never the interior, and
/// stripping repeats until no edge token matches. A token that would consume
/// the whole name is left in place. The survivor is snake-cased.
pub fn derive_name(raw_name: &str, strip_tokens: &[String]) -> String {
    let mut current = raw_name;
    loop {
        let mut stripped = current;
        for token in strip_tokens {
            if token.is_empty() {
                continue;
            }
            if let Some(rest) = stripped.strip_prefix(token.as_str()) {
                if !rest.is_empty() {
                    stripped = rest;
                }
            }
            if let Some(rest) = stripped.strip_suffix(token.as_str()) {
                if !rest.is_empty() {
                    stripped = rest;
                }
            }
        }
        if stripped == current {
            break;
        }
        current = stripped;
    }
    current.to_snake_case()
}

/// Simple (unqualified, ungeneric) name of a type.
pub fn simple_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

fn normalize_segment(segment: &str) -> String {
    let trimmed = segment.trim();
    // Already-canonical segments (including registry "-2" suffixes) pass
    // through unchanged; anything else is snake-cased.
    if trimmed
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        trimmed.to_string()
    } else {
        trimmed.to_snake_case()
    }
}
