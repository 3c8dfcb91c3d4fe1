//! Configuration for the wallet core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level wallet configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Session lifecycle settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Balance polling settings.
    #[serde(default)]
    pub balance: BalanceConfig,

    /// Relay submission and confirmation settings.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Identity provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            balance: BalanceConfig::default(),
            relay: RelayConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl WalletConfig {
    /// Set the balance polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.balance.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the maximum relay submission attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.relay.max_retries = max_retries;
        self
    }

    /// Set the session time-to-live.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session.ttl_secs = ttl.as_secs();
        self
    }
}

/// Session lifecycle settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds a session stays valid after establishment.
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_session_ttl_secs() -> u64 {
    3600
}

/// Balance polling settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BalanceConfig {
    /// Milliseconds between authoritative balance reads.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl BalanceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    5000
}

/// Relay submission and confirmation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Maximum submission attempts per request id.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff between attempts; doubles per retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on a single backoff sleep.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Milliseconds between finality status polls.
    #[serde(default = "default_confirm_poll_interval_ms")]
    pub confirm_poll_interval_ms: u64,

    /// Seconds to wait for finality before giving up.
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            confirm_poll_interval_ms: default_confirm_poll_interval_ms(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
        }
    }
}

impl RelayConfig {
    /// Backoff before the given retry, exponential with a cap.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.backoff_cap_ms);
        Duration::from_millis(ms)
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_interval_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_cap_ms() -> u64 {
    8000
}

fn default_confirm_poll_interval_ms() -> u64 {
    500
}

fn default_confirm_timeout_secs() -> u64 {
    60
}

/// Identity provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Seconds to wait for a provider call before failing.
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_provider_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WalletConfig::default();
        assert_eq!(config.relay.max_retries, 3);
        assert_eq!(config.balance.poll_interval(), Duration::from_millis(5000));
        assert_eq!(config.session.ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_backoff_is_bounded() {
        let relay = RelayConfig::default();
        assert_eq!(relay.backoff_for_attempt(0), Duration::from_millis(250));
        assert_eq!(relay.backoff_for_attempt(1), Duration::from_millis(500));
        assert_eq!(
            relay.backoff_for_attempt(30),
            Duration::from_millis(relay.backoff_cap_ms)
        );
    }

    #[test]
    fn test_deserializes_with_defaults() {
        let config: WalletConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.relay.max_retries, 3);
    }
}
