//! Restart survival: cooldown, clock anchor, and replay ledger are
//! reconstructed purely from the persisted state document.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use secrecy::SecretString;
use sha2::Sha256;

use hasp_core::cloud::{CloudError, CredentialBroker};
use hasp_core::config::{CloudConfig, LocalAuthConfig};
use hasp_core::local::{LocalAuthError, LocalAuthValidator, UnlockRequest};
use hasp_core::storage::{FileStore, PersistenceGateway};
use hasp_core::testing::{
    FakeLinkMonitor, FakeMemoryGauge, FakeMonotonicClock, FakeWallClock, ScriptedTransport,
};

const SECRET: &str = "perimeter-shared-secret";
const T0: u64 = 1_700_000_000;

fn sign(ts: u64) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).expect("any key length works");
    mac.update(ts.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn local_config() -> LocalAuthConfig {
    LocalAuthConfig {
        shared_secret: SecretString::from(SECRET.to_string()),
        timestamp_window_secs: 300,
        replay_retention_secs: 600,
        replay_cache_size: 24,
    }
}

fn cloud_config() -> CloudConfig {
    CloudConfig {
        lock_id: "front-door".to_string(),
        database_url: "https://db.example".to_string(),
        api_key: "apikey".to_string(),
        device_email: "device@example.com".to_string(),
        device_password: SecretString::from("hunter2".to_string()),
        sign_in_url: "https://id.example/signin".to_string(),
        token_refresh_url: "https://id.example/refresh".to_string(),
        token_refresh_skew_secs: 120,
        command_fetch_limit: 6,
        http_timeout_ms: 2_000,
        auth_retry_initial_ms: 8_000,
        auth_retry_max_ms: 120_000,
        backoff_log_interval_ms: 5_000,
        rate_limit_backoff_ms: 300_000,
        unauthorized_backoff_ms: 300_000,
        secure_request_gap_ms: 2_500,
        low_heap_backoff_ms: 60_000,
        min_free_heap_bytes: 20_000,
        min_largest_block_bytes: 9_000,
    }
}

fn broker_over(
    store: &Arc<FileStore>,
    transport: &ScriptedTransport,
    wall: &FakeWallClock,
    clock: &FakeMonotonicClock,
) -> CredentialBroker {
    CredentialBroker::new(
        cloud_config(),
        Arc::<FileStore>::clone(store),
        Box::new(transport.clone()),
        Box::new(FakeLinkMonitor::new(true)),
        Box::new(FakeMemoryGauge::ample()),
        Box::new(wall.clone()),
        Box::new(clock.clone()),
    )
}

#[test]
fn replay_ledger_and_anchor_survive_power_loss() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let request = UnlockRequest {
        timestamp: T0,
        signature_hex: sign(T0),
    };

    // First boot: the request bootstraps the clock and lands in the ledger.
    {
        let store = Arc::new(FileStore::open(&path).unwrap());
        let clock = FakeMonotonicClock::new(10_000);
        let mut validator = LocalAuthValidator::new(&local_config(), store, Box::new(clock));
        assert_eq!(validator.validate(&request), Ok(()));
    }

    // Second boot, fresh process state: the same signature is still a replay
    // and the anchor still approximates T0.
    let store = Arc::new(FileStore::open(&path).unwrap());
    let clock = FakeMonotonicClock::new(0);
    let mut validator = LocalAuthValidator::new(&local_config(), store, Box::new(clock));

    assert_eq!(validator.approximate_now(), Some(T0));
    assert_eq!(
        validator.validate(&request),
        Err(LocalAuthError::ReplayDetected)
    );
}

#[test]
fn cloud_cooldown_survives_power_loss_even_without_wall_clock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    // First boot: a local unlock anchors the clock, then the provider rate
    // limits the sign-in, which persists a cooldown deadline.
    {
        let store = Arc::new(FileStore::open(&path).unwrap());
        let clock = FakeMonotonicClock::new(10_000);
        let mut validator = LocalAuthValidator::new(
            &local_config(),
            Arc::<FileStore>::clone(&store),
            Box::new(clock.clone()),
        );
        assert_eq!(
            validator.validate(&UnlockRequest {
                timestamp: T0,
                signature_hex: sign(T0),
            }),
            Ok(())
        );

        let transport = ScriptedTransport::new();
        transport.push_response(
            400,
            r#"{"error":{"message":"TOO_MANY_ATTEMPTS_TRY_LATER"}}"#,
        );
        let wall = FakeWallClock::new(T0);
        let mut broker = broker_over(&store, &transport, &wall, &clock);
        assert_eq!(
            broker.ensure_signed_in(true),
            Err(CloudError::AuthRateLimited)
        );
    }

    // Second boot with no authoritative wall clock at all: the cooldown is
    // enforced from the persisted deadline and the persisted anchor.
    let store = Arc::new(FileStore::open(&path).unwrap());
    let transport = ScriptedTransport::new();
    let wall = FakeWallClock::new(0);
    let clock = FakeMonotonicClock::new(5_000);
    let mut broker = broker_over(&store, &transport, &wall, &clock);

    assert_eq!(broker.ensure_signed_in(true), Err(CloudError::AuthBackoff));
    assert_eq!(transport.request_count(), 0);

    // Once anchor-approximated time passes the deadline, authentication is
    // admitted again and success clears the persisted cooldown.
    clock.advance(301_000);
    transport.push_response(
        200,
        r#"{"idToken":"tok1","refreshToken":"ref1","expiresIn":"3600"}"#,
    );
    assert_eq!(broker.ensure_signed_in(true), Ok(()));

    let store = FileStore::open(&path).unwrap();
    assert_eq!(store.load_cloud_cooldown_until().unwrap(), 0);
}
