//! Denial reasons for the offline unlock path.

use thiserror::Error;

/// Why a local unlock request was denied.
///
/// Denials are final for the request that produced them; a new attempt needs
/// a fresh timestamp and signature from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LocalAuthError {
    /// Structurally invalid request (zero timestamp or truncated signature).
    #[error("bad_request")]
    BadRequest,

    /// The supplied signature does not match the expected keyed hash.
    #[error("signature_mismatch")]
    SignatureMismatch,

    /// The timestamp falls outside the symmetric acceptance window.
    #[error("timestamp_out_of_window")]
    TimestampOutOfWindow,

    /// The signature was already accepted within the retention window.
    #[error("replay_detected")]
    ReplayDetected,
}
