//! Device configuration.
//!
//! Every tunable the controller consumes lives here, deserializable from a
//! TOML provisioning file. Secrets (the device password and the local shared
//! secret) are held as [`SecretString`] and exposed only at their use sites.

use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML could not be parsed.
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level device configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Firmware version published in heartbeats.
    #[serde(default = "default_firmware_version")]
    pub firmware_version: String,

    /// Cloud credential/session and command-channel settings.
    pub cloud: CloudConfig,

    /// Offline signed-unlock settings.
    pub local_auth: LocalAuthConfig,

    /// Relay pulse settings.
    #[serde(default)]
    pub relay: RelayConfig,
}

impl DeviceConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Cloud session lifecycle and command-channel settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    /// Opaque lock identifier under which commands, state, and audit live.
    pub lock_id: String,

    /// Base URL of the remote command-and-control database.
    pub database_url: String,

    /// Provider API key, appended as the `key` query parameter to identity
    /// requests.
    pub api_key: String,

    /// Device account email.
    pub device_email: String,

    /// Device account password.
    pub device_password: SecretString,

    /// Password sign-in endpoint.
    #[serde(default = "default_sign_in_url")]
    pub sign_in_url: String,

    /// Refresh-token exchange endpoint.
    #[serde(default = "default_token_refresh_url")]
    pub token_refresh_url: String,

    /// Refresh the token this many seconds before its expiry.
    #[serde(default = "default_token_refresh_skew_secs")]
    pub token_refresh_skew_secs: u64,

    /// Upper bound on commands requested per poll.
    #[serde(default = "default_command_fetch_limit")]
    pub command_fetch_limit: u8,

    /// Transport-level response deadline.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u32,

    /// Initial (and floor) authentication retry delay.
    #[serde(default = "default_auth_retry_initial_ms")]
    pub auth_retry_initial_ms: u32,

    /// Cap on the doubling authentication retry delay.
    #[serde(default = "default_auth_retry_max_ms")]
    pub auth_retry_max_ms: u32,

    /// Minimum interval between backoff log lines.
    #[serde(default = "default_backoff_log_interval_ms")]
    pub backoff_log_interval_ms: u32,

    /// Backoff and cooldown applied on a provider rate-limit response.
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u32,

    /// Backoff and cooldown applied on an unauthorized response.
    #[serde(default = "default_unauthorized_backoff_ms")]
    pub unauthorized_backoff_ms: u32,

    /// Mandatory gap between successive encrypted requests.
    #[serde(default = "default_secure_request_gap_ms")]
    pub secure_request_gap_ms: u32,

    /// Backoff applied when memory admission control refuses a request.
    #[serde(default = "default_low_heap_backoff_ms")]
    pub low_heap_backoff_ms: u32,

    /// Minimum free heap required to admit an encrypted request.
    #[serde(default = "default_min_free_heap_bytes")]
    pub min_free_heap_bytes: u32,

    /// Minimum largest contiguous free block required to admit an encrypted
    /// request.
    #[serde(default = "default_min_largest_block_bytes")]
    pub min_largest_block_bytes: u32,
}

/// Offline signed-unlock settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalAuthConfig {
    /// Pre-shared secret the unlock signature is keyed with.
    pub shared_secret: SecretString,

    /// Symmetric acceptance window around approximate now, in seconds.
    #[serde(default = "default_timestamp_window_secs")]
    pub timestamp_window_secs: u64,

    /// How long accepted signatures are retained for replay detection.
    #[serde(default = "default_replay_retention_secs")]
    pub replay_retention_secs: u64,

    /// Configured replay ledger capacity (clamped to the hard bound).
    #[serde(default = "default_replay_cache_size")]
    pub replay_cache_size: usize,
}

/// Relay pulse settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// How long the relay stays energized per unlock.
    #[serde(default = "default_pulse_ms")]
    pub pulse_ms: u32,

    /// Cooldown between pulses, counted from pulse start.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            pulse_ms: default_pulse_ms(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

fn default_firmware_version() -> String {
    concat!("hasp-", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_sign_in_url() -> String {
    "https://identitytoolkit.googleapis.com/v1/accounts:signInWithPassword".to_string()
}

fn default_token_refresh_url() -> String {
    "https://securetoken.googleapis.com/v1/token".to_string()
}

const fn default_token_refresh_skew_secs() -> u64 {
    120
}

const fn default_command_fetch_limit() -> u8 {
    6
}

const fn default_http_timeout_ms() -> u32 {
    2_000
}

const fn default_auth_retry_initial_ms() -> u32 {
    8_000
}

const fn default_auth_retry_max_ms() -> u32 {
    120_000
}

const fn default_backoff_log_interval_ms() -> u32 {
    5_000
}

const fn default_rate_limit_backoff_ms() -> u32 {
    300_000
}

const fn default_unauthorized_backoff_ms() -> u32 {
    300_000
}

const fn default_secure_request_gap_ms() -> u32 {
    2_500
}

const fn default_low_heap_backoff_ms() -> u32 {
    60_000
}

const fn default_min_free_heap_bytes() -> u32 {
    20_000
}

const fn default_min_largest_block_bytes() -> u32 {
    9_000
}

const fn default_timestamp_window_secs() -> u64 {
    300
}

const fn default_replay_retention_secs() -> u64 {
    600
}

const fn default_replay_cache_size() -> usize {
    24
}

const fn default_pulse_ms() -> u32 {
    5_000
}

const fn default_cooldown_ms() -> u32 {
    5_000
}
