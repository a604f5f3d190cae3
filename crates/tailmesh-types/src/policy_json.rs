//! the size gate every submitted policy text passes before it is parsed.

/// largest policy document accepted, in bytes (1 MiB).
pub const MAX_POLICY_SIZE: usize = 1024 * 1024;

/// borrowed policy text known to be within [`MAX_POLICY_SIZE`].
///
/// the gate runs before any json parsing, so an oversized submission never
/// reaches serde. parsing and validation live in the policy crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyJson<'a>(&'a str);

impl<'a> PolicyJson<'a> {
    pub fn new(text: &'a str) -> Result<Self, PolicyJsonError> {
        if text.len() > MAX_POLICY_SIZE {
            return Err(PolicyJsonError::TooLarge {
                size: text.len(),
                limit: MAX_POLICY_SIZE,
            });
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &'a str {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyJsonError {
    #[error("policy document is {size} bytes, the limit is {limit}")]
    TooLarge { size: usize, limit: usize },
}
