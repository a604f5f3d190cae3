//! configuration types for tailmesh

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// path to the policy document (json).
    pub policy_file: Option<PathBuf>,

    /// path to an inventory file (json list of users and nodes).
    pub inventory_file: Option<PathBuf>,

    /// policy used until a document is supplied.
    pub default_policy: DefaultPolicy,

    /// logging options.
    pub logging: LoggingConfig,

    /// map distribution options.
    pub distribution: DistributionConfig,
}

/// behaviour before any policy document has been activated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefaultPolicy {
    /// every node may reach every other node on every port.
    #[default]
    AllowAll,
    /// no node may reach any other node.
    DenyAll,
}

/// logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// one of trace, debug, info, warn, error.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// map distribution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// capacity of the broadcast channel feeding session handlers.
    ///
    /// a subscriber that falls behind receives `Lagged` and should
    /// re-fetch its map.
    pub channel_capacity: usize,

    /// how many times a superseded or failed inventory pass is retried
    /// against a fresher snapshot before giving up.
    pub max_recompute_attempts: u32,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            max_recompute_attempts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.default_policy, DefaultPolicy::AllowAll);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.distribution.channel_capacity, 256);
        assert!(config.policy_file.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            policy_file = "/etc/tailmesh/policy.json"
            default_policy = "deny-all"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.policy_file,
            Some(PathBuf::from("/etc/tailmesh/policy.json"))
        );
        assert_eq!(config.default_policy, DefaultPolicy::DenyAll);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.distribution.max_recompute_attempts, 3);
    }
}
