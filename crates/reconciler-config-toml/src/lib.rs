// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;
use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PHONE_HOME_URL: &str = "http://localhost";

/// Configuration for the instance reconciliation engine.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub site: Site,
    pub limits: Limits,
    pub interfaces: InterfacePolicy,
}

/// Settings describing the site the engine provisions for.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Site {
    /// The URL booted machines notify through cloud-init's `phone_home`
    /// module.
    pub phone_home_url: String,
}

impl Default for Site {
    fn default() -> Self {
        Self { phone_home_url: DEFAULT_PHONE_HOME_URL.to_owned() }
    }
}

/// Bounds applied to instance requests before reconciliation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Limits {
    pub max_interfaces: usize,
    pub max_labels: usize,
    pub max_label_key_length: usize,
    pub max_label_value_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_interfaces: 16,
            max_labels: 10,
            max_label_key_length: 255,
            max_label_value_length: 255,
        }
    }
}

/// Policy knobs for Ethernet interface requests.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct InterfacePolicy {
    /// If no single-device interface is marked physical, mark the first one
    /// physical instead of rejecting the request.
    pub default_first_physical: bool,
}

impl Default for InterfacePolicy {
    fn default() -> Self {
        Self { default_first_physical: true }
    }
}

impl Config {
    /// Checks values that parse correctly but cannot be used.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.site.phone_home_url.trim().is_empty() {
            return Err(ParseError::InvalidPhoneHomeUrl(
                self.site.phone_home_url.clone(),
            ));
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cfg = toml::from_str::<Config>(s)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Errors which may be returned when parsing the engine configuration.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Cannot parse toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid site phone-home url {0:?}")]
    InvalidPhoneHomeUrl(String),
}

/// Parses a TOML file into a configuration object.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<Config, ParseError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    contents.parse()
}
