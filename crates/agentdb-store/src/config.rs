use agentdb_types::AgentDbError;
use std::fmt;
use std::time::Duration;

use crate::RetryPolicy;

/// Content store configuration.
#[derive(Clone)]
pub struct StoreConfig {
    /// Upload endpoint of the content network. `None` means uploads are simulated.
    pub upload_url: Option<String>,
    /// Public gateway used to fetch content by CID.
    pub gateway_url: String,
    /// Bearer token authorizing uploads to a space.
    pub auth_token: Option<String>,
    /// Attempts per network call, including the first.
    pub max_attempts: u32,
    /// Linear backoff unit between attempts.
    pub base_delay: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Fall back to simulated storage when uploads fail after all retries.
    pub simulate_on_failure: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            upload_url: None,
            gateway_url: "https://storacha.link".to_string(),
            auth_token: None,
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(30),
            simulate_on_failure: true,
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("upload_url", &self.upload_url)
            .field("gateway_url", &self.gateway_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("request_timeout", &self.request_timeout)
            .field("simulate_on_failure", &self.simulate_on_failure)
            .finish()
    }
}

impl StoreConfig {
    /// Read overrides from `AGENTDB_*` environment variables.
    pub fn from_env() -> Result<Self, AgentDbError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AgentDbError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup("AGENTDB_UPLOAD_URL") {
            config.upload_url = Some(url.trim_end_matches('/').to_string());
        }
        if let Some(url) = lookup("AGENTDB_GATEWAY_URL") {
            config.gateway_url = url.trim_end_matches('/').to_string();
        }
        if let Some(token) = lookup("AGENTDB_TOKEN") {
            config.auth_token = Some(token);
        }
        if let Some(n) = lookup("AGENTDB_MAX_ATTEMPTS") {
            config.max_attempts = parse_number("AGENTDB_MAX_ATTEMPTS", &n)?;
        }
        if let Some(ms) = lookup("AGENTDB_BASE_DELAY_MS") {
            config.base_delay = Duration::from_millis(parse_number("AGENTDB_BASE_DELAY_MS", &ms)?);
        }
        if let Some(secs) = lookup("AGENTDB_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse_number("AGENTDB_TIMEOUT_SECS", &secs)?);
        }
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, AgentDbError> {
    raw.trim()
        .parse()
        .map_err(|_| AgentDbError::Validation(format!("{key} must be a number, got {raw:?}")))
}
