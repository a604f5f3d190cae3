//! configuration file discovery.

use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result};
use tailmesh_types::Config;
use tracing::debug;

/// default config file search paths, in order of priority.
pub const CONFIG_SEARCH_PATHS: &[&str] = &["/etc/tailmesh/config.toml", "./config.toml"];

/// load the config file.
///
/// an explicit path must exist. otherwise the first file found on
/// [`CONFIG_SEARCH_PATHS`] is used, and `None` means none was found.
pub fn load_config_file(explicit: Option<&Path>) -> Result<Option<Config>> {
    if let Some(path) = explicit {
        return read_config(path).map(Some);
    }

    for path in CONFIG_SEARCH_PATHS.iter().map(PathBuf::from) {
        if path.exists() {
            debug!("Found config file at {:?}", path);
            return read_config(&path).map(Some);
        }
    }

    Ok(None)
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("failed to parse config file: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tailmesh_types::DefaultPolicy;

    #[test]
    fn test_explicit_config_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_policy = "deny-all"

[distribution]
channel_capacity = 8
"#
        )
        .unwrap();

        let config = load_config_file(Some(file.path())).unwrap().unwrap();
        assert_eq!(config.default_policy, DefaultPolicy::DenyAll);
        assert_eq!(config.distribution.channel_capacity, 8);
        assert_eq!(config.distribution.max_recompute_attempts, 3);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config_file(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_policy = 3").unwrap();
        let err = load_config_file(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("failed to parse config file"));
    }
}
