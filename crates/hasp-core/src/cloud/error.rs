//! Cloud-path error taxonomy.
//!
//! The display form of each variant is its stable diagnostic code; nothing
//! here is shown to an end user beyond an allow/deny outcome.

use thiserror::Error;

/// Failures of the cloud credential/session lifecycle and command channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CloudError {
    /// The network link is down; nothing cloud-side can be attempted.
    #[error("wifi_disconnected")]
    WifiDisconnected,

    /// A backoff or cooldown window is still in force.
    #[error("auth_backoff")]
    AuthBackoff,

    /// No session is held and active authentication was not permitted.
    #[error("auth_required")]
    AuthRequired,

    /// The session is expiring and active refresh was not permitted.
    #[error("auth_refresh_required")]
    AuthRefreshRequired,

    /// Memory admission control refused an encrypted request.
    #[error("low_heap")]
    LowHeap,

    /// The provider rejected the device credentials; sticky until a future
    /// success or out-of-band correction.
    #[error("invalid_device_credentials")]
    InvalidDeviceCredentials,

    /// The provider reported too many authentication attempts.
    #[error("auth_rate_limited")]
    AuthRateLimited,

    /// The provider no longer accepts the held session.
    #[error("unauthorized")]
    Unauthorized,

    /// Sign-in failed with an unclassified provider status.
    #[error("sign_in_failed_{status}")]
    SignInFailed {
        /// HTTP status of the failed sign-in.
        status: u16,
    },

    /// Token refresh failed.
    #[error("refresh_failed_{status}")]
    RefreshFailed {
        /// HTTP status of the failed refresh.
        status: u16,
    },

    /// A 2xx identity response carried no id token.
    #[error("missing_id_token")]
    MissingIdToken,

    /// Refresh was attempted without a refresh token on hand.
    #[error("missing_refresh_token")]
    MissingRefreshToken,

    /// A response body could not be parsed as JSON.
    #[error("invalid_json")]
    InvalidJson,

    /// The provider returned an in-band error value.
    #[error("provider error: {message}")]
    Provider {
        /// Provider-supplied error string, used for classification only.
        message: String,
    },

    /// The transport could not set up the connection.
    #[error("http_begin_failed")]
    HttpBeginFailed,

    /// The transport set up the connection but the request did not complete.
    #[error("http_request_failed")]
    HttpRequestFailed,

    /// A command operation was attempted with an empty id.
    #[error("invalid_command_id")]
    InvalidCommandId,

    /// The heartbeat publish was rejected.
    #[error("state_patch_failed_{status}")]
    StatePatchFailed {
        /// HTTP status of the failed patch.
        status: u16,
    },

    /// The command delete was rejected.
    #[error("command_delete_failed_{status}")]
    CommandDeleteFailed {
        /// HTTP status of the failed delete.
        status: u16,
    },

    /// The audit append was rejected.
    #[error("audit_write_failed_{status}")]
    AuditWriteFailed {
        /// HTTP status of the failed write.
        status: u16,
    },
}

impl CloudError {
    /// Whether this failure is part of normal degraded operation and should
    /// be logged quietly rather than warned about on every poll.
    #[must_use]
    pub const fn is_expected_denial(&self) -> bool {
        matches!(
            self,
            Self::WifiDisconnected
                | Self::AuthBackoff
                | Self::AuthRequired
                | Self::AuthRefreshRequired
                | Self::LowHeap
        )
    }
}
