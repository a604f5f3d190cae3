//! validated tag type used as the identity of tagged nodes.
//!
//! tags must start with "tag:" followed by 1-50 lowercase alphanumeric
//! characters, hyphens or underscores.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// maximum length for a tag name (after "tag:" prefix).
pub const MAX_TAG_NAME_LEN: usize = 50;

/// maximum number of tags per node.
pub const MAX_TAGS: usize = 100;

const PREFIX: &str = "tag:";

/// a validated tag string.
///
/// # Example
/// ```
/// use tailmesh_types::Tag;
///
/// let tag: Tag = "tag:server".parse().unwrap();
/// assert_eq!(tag.name(), "server");
/// assert_eq!(tag.as_str(), "tag:server");
///
/// // policy identifiers are case-insensitive
/// let tag = Tag::normalized("tag:Web").unwrap();
/// assert_eq!(tag.as_str(), "tag:web");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(String);

impl Tag {
    /// create a new tag, validating the format.
    pub fn new(s: impl Into<String>) -> Result<Self, TagError> {
        let s = s.into();
        validate(&s)?;
        Ok(Self(s))
    }

    /// lower-case `s` before validating it.
    pub fn normalized(s: &str) -> Result<Self, TagError> {
        Self::new(s.to_lowercase())
    }

    /// get the full tag string (e.g., "tag:server").
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// get just the name portion (e.g., "server" from "tag:server").
    pub fn name(&self) -> &str {
        &self.0[PREFIX.len()..]
    }
}

fn validate(s: &str) -> Result<(), TagError> {
    let Some(name) = s.strip_prefix(PREFIX) else {
        return Err(TagError::MissingPrefix);
    };

    if name.is_empty() {
        return Err(TagError::EmptyName);
    }
    if name.len() > MAX_TAG_NAME_LEN {
        return Err(TagError::NameTooLong(name.len()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(TagError::InvalidCharacters);
    }
    Ok(())
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Tag {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Tag {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Tag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Tag::new(s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Tag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

/// error type for tag validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("tag must start with 'tag:'")]
    MissingPrefix,
    #[error("tag name cannot be empty")]
    EmptyName,
    #[error("tag name too long ({0} chars, max {MAX_TAG_NAME_LEN})")]
    NameTooLong(usize),
    #[error("tag name must be lowercase alphanumeric with hyphens or underscores")]
    InvalidCharacters,
}
