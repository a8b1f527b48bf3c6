use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::capabilities::MAX_TIMEOUT_MS;

pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://api.flickr.com/services/rest/";
pub const DEFAULT_SEARCH_METHOD: &str = "flickr.photos.search";
pub const PHOTOS_PER_PAGE: u32 = 21;
pub const MAX_PHOTOS_PER_PAGE: u32 = 500;
pub const BBOX_HALF_WIDTH: f64 = 0.1;
pub const BBOX_HALF_HEIGHT: f64 = 0.1;
pub const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_IMAGE_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config field '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("could not parse config: {0}")]
    Parse(String),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: String,
    pub method: String,
    pub api_key: String,
    pub per_page: u32,
    pub bbox_half_width: f64,
    pub bbox_half_height: f64,
    pub safe_search: bool,
    pub timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            method: DEFAULT_SEARCH_METHOD.to_string(),
            api_key: String::new(),
            per_page: PHOTOS_PER_PAGE,
            bbox_half_width: BBOX_HALF_WIDTH,
            bbox_half_height: BBOX_HALF_HEIGHT,
            safe_search: true,
            timeout_ms: DEFAULT_SEARCH_TIMEOUT_MS,
        }
    }
}

impl SearchConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = Url::parse(&self.endpoint)
            .map_err(|e| ConfigError::invalid("search.endpoint", e.to_string()))?;
        if endpoint.scheme() != "https" && endpoint.scheme() != "http" {
            return Err(ConfigError::invalid(
                "search.endpoint",
                "endpoint must be http(s)",
            ));
        }
        if self.method.trim().is_empty() {
            return Err(ConfigError::invalid("search.method", "must not be empty"));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::invalid("search.api_key", "must not be empty"));
        }
        if self.per_page == 0 || self.per_page > MAX_PHOTOS_PER_PAGE {
            return Err(ConfigError::invalid(
                "search.per_page",
                format!("must be between 1 and {}", MAX_PHOTOS_PER_PAGE),
            ));
        }
        for (field, value) in [
            ("search.bbox_half_width", self.bbox_half_width),
            ("search.bbox_half_height", self.bbox_half_height),
        ] {
            if !value.is_finite() || value <= 0.0 || value > 90.0 {
                return Err(ConfigError::invalid(field, format!("out of range: {}", value)));
            }
        }
        validate_timeout("search.timeout_ms", self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub timeout_ms: u64,
    pub max_bytes: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_IMAGE_TIMEOUT_MS,
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

impl ImageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_bytes == 0 {
            return Err(ConfigError::invalid("image.max_bytes", "must be > 0"));
        }
        validate_timeout("image.timeout_ms", self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub search: SearchConfig,
    pub image: ImageConfig,
}

impl CoreConfig {
    /// Parses and validates a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.search.validate()?;
        self.image.validate()
    }
}

fn validate_timeout(field: &'static str, timeout_ms: u64) -> Result<(), ConfigError> {
    if timeout_ms == 0 || timeout_ms > MAX_TIMEOUT_MS {
        return Err(ConfigError::invalid(
            field,
            format!("must be between 1 and {}ms", MAX_TIMEOUT_MS),
        ));
    }
    Ok(())
}
