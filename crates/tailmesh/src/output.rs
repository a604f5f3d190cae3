//! rendering command results.

use clap::ValueEnum;
use color_eyre::eyre::{Context, Result};
use serde::Serialize;

/// output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// pretty-printed json
    #[default]
    Json,
    /// yaml
    Yaml,
}

impl OutputFormat {
    /// render `value` in this format.
    pub fn render<T: Serialize>(self, value: &T) -> Result<String> {
        match self {
            OutputFormat::Json => {
                serde_json::to_string_pretty(value).context("failed to render JSON")
            }
            OutputFormat::Yaml => serde_yaml::to_string(value).context("failed to render YAML"),
        }
    }
}
