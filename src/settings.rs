use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::debug;

use crate::collection::AddReporting;
use crate::error::Result;
use crate::fetch::Strategy;

pub const ENV_PREFIX: &str = "KEEPSAKE";

/// Collection defaults, read from an optional settings file and then from
/// `KEEPSAKE_*` environment variables, which win.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub eager: bool,
    pub add_reporting: AddReporting,
    pub strategy: Strategy,
    pub filter_props: Vec<String>,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            eager: false,
            add_reporting: AddReporting::default(),
            strategy: Strategy::default(),
            filter_props: Vec::new(),
            log_filter: String::from("keepsake=info"),
        }
    }
}

impl Settings {
    /// The file format follows its extension (toml, json, yaml, ...). A given
    /// path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("filter_props"),
            )
            .build()?
            .try_deserialize()?;
        debug!(?settings, "settings loaded");
        Ok(settings)
    }

    /// Parses settings from an in-memory document, without the environment layer.
    pub fn parse_str(source: &str, format: config::FileFormat) -> Result<Self> {
        Ok(Config::builder()
            .add_source(File::from_str(source, format))
            .build()?
            .try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_missing_keys() {
        let settings = Settings::parse_str("eager = true", config::FileFormat::Toml).unwrap();
        assert!(settings.eager);
        assert_eq!(settings.strategy, Strategy::Add);
        assert_eq!(settings.add_reporting, AddReporting::RawOnly);
        assert_eq!(settings.log_filter, "keepsake=info");
    }
}
