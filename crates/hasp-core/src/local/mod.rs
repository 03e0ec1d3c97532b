//! Offline signed-unlock validation.
//!
//! The local path authorizes an unlock with nothing but a pre-shared secret,
//! an approximated clock, and a bounded replay ledger. It has no network
//! dependency at all, which is the point of its existence as a fallback
//! channel.
//!
//! A request is a unix timestamp plus the lowercase-hex HMAC-SHA256 of that
//! timestamp's decimal string under the shared secret. Validation order is
//! structural checks, signature (constant time, before any time-window logic
//! so clock state never leaks through timing), window check against
//! approximate now, then replay detection.
//!
//! The validator owns the only path that bootstraps the device clock when no
//! external time sync has ever happened: the first signature-verified request
//! anchors it.

pub mod error;
pub mod replay;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub use error::LocalAuthError;
pub use replay::{REPLAY_LEDGER_MAX, ReplayLedger, ReplayRecord};

use crate::clock::{ClockAnchor, MonotonicClock};
use crate::config::LocalAuthConfig;
use crate::storage::PersistenceGateway;

type HmacSha256 = Hmac<Sha256>;

/// Shortest signature accepted before any cryptographic work.
pub const MIN_SIGNATURE_HEX_LEN: usize = 32;

/// An offline unlock request.
#[derive(Debug, Clone)]
pub struct UnlockRequest {
    /// Decimal unix timestamp the signature covers.
    pub timestamp: u64,

    /// Lowercase hex HMAC-SHA256 of the timestamp's decimal string.
    pub signature_hex: String,
}

/// Validates offline signed unlock requests.
pub struct LocalAuthValidator {
    shared_secret: SecretString,
    timestamp_window_secs: u64,
    ledger: ReplayLedger,
    anchor: Option<ClockAnchor>,
    store: Arc<dyn PersistenceGateway>,
    clock: Box<dyn MonotonicClock>,
}

impl LocalAuthValidator {
    /// Creates a validator, restoring the persisted clock anchor and replay
    /// records.
    ///
    /// Persistence failures fall back to an unset anchor and an empty ledger.
    #[must_use]
    pub fn new(
        config: &LocalAuthConfig,
        store: Arc<dyn PersistenceGateway>,
        clock: Box<dyn MonotonicClock>,
    ) -> Self {
        let capacity = config.replay_cache_size.min(REPLAY_LEDGER_MAX);

        let anchor_epoch = store.load_clock_anchor().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "clock anchor load failed, starting unset");
            0
        });
        let anchor = (anchor_epoch != 0).then(|| ClockAnchor::new(anchor_epoch, clock.now_ms()));

        let records = store.load_replay_records(capacity).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "replay record load failed, starting empty");
            Vec::new()
        });
        let ledger = ReplayLedger::from_records(records, capacity, config.replay_retention_secs);

        tracing::debug!(
            clock_anchor = anchor_epoch,
            replay_count = ledger.len(),
            window_secs = config.timestamp_window_secs,
            retention_secs = config.replay_retention_secs,
            cache_size = capacity,
            "local validator initialized"
        );

        Self {
            shared_secret: config.shared_secret.clone(),
            timestamp_window_secs: config.timestamp_window_secs,
            ledger,
            anchor,
            store,
            clock,
        }
    }

    /// Sets and persists the clock anchor. Zero is ignored.
    pub fn set_clock_anchor(&mut self, epoch_secs: u64) {
        if epoch_secs == 0 {
            return;
        }

        self.anchor = Some(ClockAnchor::new(epoch_secs, self.clock.now_ms()));
        if let Err(err) = self.store.save_clock_anchor(epoch_secs) {
            tracing::warn!(error = %err, "clock anchor save failed");
        }
        tracing::debug!(epoch = epoch_secs, "clock anchor set");
    }

    /// Approximate current epoch seconds, `None` until an anchor exists.
    #[must_use]
    pub fn approximate_now(&self) -> Option<u64> {
        self.anchor
            .map(|anchor| anchor.approximate_now(self.clock.now_ms()))
    }

    /// Validates an unlock request.
    ///
    /// On success the signature is remembered in the replay ledger and the
    /// ledger is persisted before the result is reported.
    pub fn validate(&mut self, request: &UnlockRequest) -> Result<(), LocalAuthError> {
        if request.timestamp == 0 || request.signature_hex.len() < MIN_SIGNATURE_HEX_LEN {
            tracing::warn!(
                ts = request.timestamp,
                sig_len = request.signature_hex.len(),
                "unlock denied: bad_request"
            );
            return Err(LocalAuthError::BadRequest);
        }

        let expected = self.signature_for(request.timestamp);
        let matches: bool = expected
            .as_bytes()
            .ct_eq(request.signature_hex.as_bytes())
            .into();
        if !matches {
            tracing::warn!(ts = request.timestamp, "unlock denied: signature_mismatch");
            return Err(LocalAuthError::SignatureMismatch);
        }

        let now_secs = match self.approximate_now() {
            Some(now) => now,
            None => {
                // The clock has never been set; the request's timestamp is
                // already signature-verified, so it anchors the clock.
                self.set_clock_anchor(request.timestamp);
                tracing::info!(ts = request.timestamp, "clock anchor bootstrapped from request");
                request.timestamp
            },
        };

        #[allow(clippy::cast_possible_wrap)]
        let delta = (request.timestamp as i64).saturating_sub(now_secs as i64);
        #[allow(clippy::cast_possible_wrap)]
        let window = self.timestamp_window_secs as i64;
        if delta < -window || delta > window {
            tracing::warn!(
                ts = request.timestamp,
                now = now_secs,
                delta,
                "unlock denied: timestamp_out_of_window"
            );
            return Err(LocalAuthError::TimestampOutOfWindow);
        }

        self.ledger.compact(now_secs);
        if self.ledger.contains(&request.signature_hex) {
            tracing::warn!(ts = request.timestamp, "unlock denied: replay_detected");
            return Err(LocalAuthError::ReplayDetected);
        }

        self.ledger.remember(&request.signature_hex, request.timestamp);
        let records: Vec<ReplayRecord> = self.ledger.records().cloned().collect();
        if let Err(err) = self.store.save_replay_records(&records) {
            tracing::warn!(error = %err, "replay ledger save failed");
        }

        tracing::debug!(ts = request.timestamp, now = now_secs, "unlock authorized");
        Ok(())
    }

    /// Expected lowercase-hex signature for `timestamp`.
    fn signature_for(&self, timestamp: u64) -> String {
        // HMAC-SHA256 accepts keys of any length; new_from_slice cannot fail.
        let mut mac = HmacSha256::new_from_slice(self.shared_secret.expose_secret().as_bytes())
            .expect("hmac accepts keys of any length");
        mac.update(timestamp.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
