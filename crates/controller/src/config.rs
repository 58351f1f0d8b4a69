//! Controller configuration
//!
//! Page-independent settings shared by every slot a controller factory
//! creates: the ad endpoint, the identity wait bound and wire constants.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default ad-serving endpoint
pub const DEFAULT_AD_ENDPOINT: &str = "https://googleads.g.doubleclick.net/pagead/ads";

/// Default bound on the identity token wait (1 second)
pub const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Longest request URL the endpoint accepts without complaint
pub const DEFAULT_MAX_URL_LENGTH: usize = 16_384;

/// Slot controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Endpoint ad requests are sent to
    pub ad_endpoint: String,

    /// Maximum time to wait for the identity token
    #[serde(with = "humantime_serde")]
    pub identity_timeout: Duration,

    /// Network name used to scope the shared slot registry
    pub network: String,

    /// Runtime version reported as `amp_v`
    pub runtime_version: String,

    /// Request URLs above this length are logged
    pub max_url_length: usize,

    /// Message a frame inside a sticky container posts when it is ready
    pub sticky_ready_message: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ad_endpoint: DEFAULT_AD_ENDPOINT.to_string(),
            identity_timeout: DEFAULT_IDENTITY_TIMEOUT,
            network: "adsense".to_string(),
            runtime_version: "011830043289240".to_string(),
            max_url_length: DEFAULT_MAX_URL_LENGTH,
            sticky_ready_message: "fill_sticky".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load config from a TOML file; missing keys take their defaults
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&raw)
    }

    /// Parse config from a TOML string
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the ad endpoint is an absolute URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.ad_endpoint).map_err(|source| ConfigError::InvalidEndpoint {
            endpoint: self.ad_endpoint.clone(),
            source,
        })?;
        Ok(())
    }
}
