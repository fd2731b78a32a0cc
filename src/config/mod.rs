//! Configuration management
//!
//! Everything in config.toml is optional; a missing key takes the value of
//! the two-switch lab topology.

mod types;
pub mod validation;

pub use types::*;
pub use validation::{ValidationResult, validate};

use crate::{Error, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let config: Config = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(config)
}

/// Load `path` if it exists, otherwise use the defaults
pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Config> {
    if path.as_ref().exists() {
        load(path)
    } else {
        Ok(Config::default())
    }
}

/// Effective configuration as TOML
pub fn render(config: &Config) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| Error::Config(e.to_string()))
}
