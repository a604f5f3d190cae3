//! version counters carried by compiled policies and network maps.

use serde::{Deserialize, Serialize};

/// monotonically increasing identifier of an activated policy.
///
/// every network map is tagged with the version it was derived from so
/// consumers can detect stale maps.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PolicyVersion(pub u64);

impl PolicyVersion {
    /// version of the policy installed at startup.
    pub const INITIAL: PolicyVersion = PolicyVersion(1);

    /// the version following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for PolicyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// counter bumped on every policy activation or inventory change.
///
/// a recomputation pass publishes its maps only if the generation it
/// started from is still the current one.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}
