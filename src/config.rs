use std::time::Duration;

use crate::{Error, Result};

pub const ENDPOINT_ENV: &str = "VISION_ENDPOINT";
pub const KEY_ENV: &str = "VISION_KEY";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for the vision service. Built once at startup and handed to the client;
/// nothing below this reads the environment.
#[derive(Clone)]
pub struct VisionConfig {
    pub endpoint: String,
    pub key: String,
    pub timeout: Duration,
}

impl VisionConfig {
    pub fn new(endpoint: Option<String>, key: Option<String>) -> Result<Self> {
        let endpoint = endpoint
            .filter(|it| !it.trim().is_empty())
            .ok_or(Error::ConfigurationMissing("vision endpoint"))?;
        let key = key
            .filter(|it| !it.trim().is_empty())
            .ok_or(Error::ConfigurationMissing("vision key"))?;
        Ok(Self {
            endpoint: endpoint.trim().trim_end_matches('/').to_string(),
            key: key.trim().to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionConfig")
            .field("endpoint", &self.endpoint)
            .field("key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}
