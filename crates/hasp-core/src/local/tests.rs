//! Behavior tests for the offline unlock path.

// Test code uses proptest-generated patterns that trigger these lints.
#![allow(clippy::items_after_statements)]

use std::sync::Arc;

use hmac::{Hmac, Mac};
use proptest::prelude::*;
use secrecy::SecretString;
use sha2::Sha256;

use super::{LocalAuthError, LocalAuthValidator, UnlockRequest};
use crate::config::LocalAuthConfig;
use crate::storage::{MemoryStore, PersistenceGateway};
use crate::testing::FakeMonotonicClock;

const SECRET: &str = "perimeter-shared-secret";
const T0: u64 = 1_700_000_000;

// ============================================================================
// Helpers
// ============================================================================

fn sign(secret: &str, ts: u64) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("any key length works");
    mac.update(ts.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn request(ts: u64) -> UnlockRequest {
    UnlockRequest {
        timestamp: ts,
        signature_hex: sign(SECRET, ts),
    }
}

fn config(window_secs: u64, retention_secs: u64, cache_size: usize) -> LocalAuthConfig {
    LocalAuthConfig {
        shared_secret: SecretString::from(SECRET.to_string()),
        timestamp_window_secs: window_secs,
        replay_retention_secs: retention_secs,
        replay_cache_size: cache_size,
    }
}

fn validator_with(
    config: &LocalAuthConfig,
) -> (LocalAuthValidator, Arc<MemoryStore>, FakeMonotonicClock) {
    let store = Arc::new(MemoryStore::new());
    let clock = FakeMonotonicClock::new(50_000);
    let validator = LocalAuthValidator::new(
        config,
        Arc::<MemoryStore>::clone(&store),
        Box::new(clock.clone()),
    );
    (validator, store, clock)
}

fn fresh_validator() -> (LocalAuthValidator, Arc<MemoryStore>, FakeMonotonicClock) {
    validator_with(&config(300, 600, 24))
}

// ============================================================================
// Structural checks and signature verification
// ============================================================================

#[test]
fn zero_timestamp_is_bad_request() {
    let (mut validator, _, _) = fresh_validator();
    let denied = validator.validate(&UnlockRequest {
        timestamp: 0,
        signature_hex: sign(SECRET, 0),
    });
    assert_eq!(denied, Err(LocalAuthError::BadRequest));
}

#[test]
fn truncated_signature_is_bad_request() {
    let (mut validator, _, _) = fresh_validator();
    let denied = validator.validate(&UnlockRequest {
        timestamp: T0,
        signature_hex: "abcdef0123".to_string(),
    });
    assert_eq!(denied, Err(LocalAuthError::BadRequest));
}

#[test]
fn flipped_hex_character_is_signature_mismatch() {
    let (mut validator, _, _) = fresh_validator();

    let mut sig = sign(SECRET, T0);
    let flipped = if sig.as_bytes()[0] == b'a' { 'b' } else { 'a' };
    sig.replace_range(0..1, &flipped.to_string());

    let denied = validator.validate(&UnlockRequest {
        timestamp: T0,
        signature_hex: sig,
    });
    assert_eq!(denied, Err(LocalAuthError::SignatureMismatch));
}

#[test]
fn signature_is_checked_before_time_window() {
    let (mut validator, _, _) = fresh_validator();
    validator.set_clock_anchor(T0);

    // Timestamp is far outside any window, but the signature is wrong for a
    // different secret: the denial must not leak clock state.
    let denied = validator.validate(&UnlockRequest {
        timestamp: T0 + 1_000_000,
        signature_hex: sign("wrong-secret", T0 + 1_000_000),
    });
    assert_eq!(denied, Err(LocalAuthError::SignatureMismatch));
}

#[test]
fn uppercase_signature_is_rejected() {
    let (mut validator, _, _) = fresh_validator();
    let denied = validator.validate(&UnlockRequest {
        timestamp: T0,
        signature_hex: sign(SECRET, T0).to_uppercase(),
    });
    assert_eq!(denied, Err(LocalAuthError::SignatureMismatch));
}

// ============================================================================
// Clock bootstrap and acceptance window
// ============================================================================

#[test]
fn first_valid_request_bootstraps_the_anchor() {
    let (mut validator, store, _) = fresh_validator();
    assert_eq!(validator.approximate_now(), None);

    assert_eq!(validator.validate(&request(T0)), Ok(()));

    assert_eq!(validator.approximate_now(), Some(T0));
    assert_eq!(store.load_clock_anchor().unwrap(), T0);
}

#[test]
fn window_boundary_is_inclusive() {
    let (mut validator, _, _) = fresh_validator();
    validator.set_clock_anchor(T0);

    assert_eq!(validator.validate(&request(T0 + 300)), Ok(()));
    assert_eq!(validator.validate(&request(T0 - 300)), Ok(()));
    assert_eq!(
        validator.validate(&request(T0 + 301)),
        Err(LocalAuthError::TimestampOutOfWindow)
    );
    assert_eq!(
        validator.validate(&request(T0 - 301)),
        Err(LocalAuthError::TimestampOutOfWindow)
    );
}

#[test]
fn window_tracks_elapsed_uptime() {
    let (mut validator, _, clock) = fresh_validator();
    validator.set_clock_anchor(T0);

    // 400 seconds of uptime later, T0 has fallen out of the window.
    clock.advance(400_000);
    assert_eq!(
        validator.validate(&request(T0)),
        Err(LocalAuthError::TimestampOutOfWindow)
    );
    assert_eq!(validator.validate(&request(T0 + 400)), Ok(()));
}

// ============================================================================
// Replay detection
// ============================================================================

#[test]
fn resubmission_within_retention_is_replay() {
    let (mut validator, _, _) = fresh_validator();

    let req = request(T0);
    assert_eq!(validator.validate(&req), Ok(()));
    assert_eq!(validator.validate(&req), Err(LocalAuthError::ReplayDetected));
}

#[test]
fn fifo_eviction_forgets_the_oldest_signature() {
    let (mut validator, _, _) = validator_with(&config(300, 600, 3));
    validator.set_clock_anchor(T0);

    let a = request(T0 + 1);
    let b = request(T0 + 2);
    let c = request(T0 + 3);
    let d = request(T0 + 4);
    for req in [&a, &b, &c, &d] {
        assert_eq!(validator.validate(req), Ok(()));
    }

    // B, C, D are still replays; A was evicted and is accepted again.
    assert_eq!(validator.validate(&b), Err(LocalAuthError::ReplayDetected));
    assert_eq!(validator.validate(&c), Err(LocalAuthError::ReplayDetected));
    assert_eq!(validator.validate(&d), Err(LocalAuthError::ReplayDetected));
    assert_eq!(validator.validate(&a), Ok(()));
}

#[test]
fn compaction_drops_entries_past_retention() {
    let (mut validator, store, clock) = fresh_validator();

    assert_eq!(validator.validate(&request(T0)), Ok(()));

    // Past the retention window, a new acceptance compacts the old entry out
    // of the persisted ledger.
    clock.advance(650_000);
    assert_eq!(validator.validate(&request(T0 + 650)), Ok(()));

    let records = store.load_replay_records(32).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].ts, T0 + 650);
}

// ============================================================================
// Persistence across restart
// ============================================================================

#[test]
fn ledger_and_anchor_survive_restart() {
    let store = Arc::new(MemoryStore::new());
    let clock = FakeMonotonicClock::new(50_000);
    let cfg = config(300, 600, 24);

    let mut validator = LocalAuthValidator::new(
        &cfg,
        Arc::<MemoryStore>::clone(&store),
        Box::new(clock.clone()),
    );
    let req = request(T0);
    assert_eq!(validator.validate(&req), Ok(()));
    drop(validator);

    // Simulated restart: a fresh validator over the same store still knows
    // the anchor and the accepted signature.
    let mut validator = LocalAuthValidator::new(&cfg, store, Box::new(clock));
    assert_eq!(validator.approximate_now(), Some(T0));
    assert_eq!(validator.validate(&req), Err(LocalAuthError::ReplayDetected));
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any correctly signed timestamp bootstraps a fresh validator and is
    /// accepted.
    #[test]
    fn prop_valid_signature_bootstraps_and_passes(ts in 1u64..=u64::from(u32::MAX)) {
        let (mut validator, _, _) = fresh_validator();
        prop_assert_eq!(validator.validate(&request(ts)), Ok(()));
        prop_assert_eq!(validator.approximate_now(), Some(ts));
    }

    /// A signature under any other secret is always a mismatch, regardless
    /// of timestamp plausibility.
    #[test]
    fn prop_foreign_secret_never_validates(
        ts in 1u64..=u64::from(u32::MAX),
        secret in "[a-z0-9]{8,32}",
    ) {
        prop_assume!(secret != SECRET);
        let (mut validator, _, _) = fresh_validator();
        let denied = validator.validate(&UnlockRequest {
            timestamp: ts,
            signature_hex: sign(&secret, ts),
        });
        prop_assert_eq!(denied, Err(LocalAuthError::SignatureMismatch));
    }
}
