//! Cloud credential/session lifecycle.
//!
//! The broker holds exactly one valid or refreshable session, gated by
//! layered admission checks so that no caller issues a network request while
//! connectivity, credentials, or memory make it pointless or dangerous.
//!
//! Failure scheduling is two-layered:
//!
//! - an **uptime backoff** (`next_auth_attempt_ms`) that doubles per failure
//!   up to a cap and resets only on success;
//! - an **epoch cooldown** (`cloud_cooldown_until_epoch`) for provider-imposed
//!   waits, persisted so it survives restart and cleared only by a successful
//!   authentication, never by the deadline merely passing.
//!
//! When no authoritative wall clock exists, epoch comparisons fall back to a
//! clock anchor restored from persistence; with a cooldown set and no usable
//! clock at all, the cooldown counts as active (fail closed).

use std::sync::Arc;

use crate::clock::{ClockAnchor, EPOCH_VALID_MIN, MonotonicClock, WallClock, millis_before};
use crate::config::CloudConfig;
use crate::storage::PersistenceGateway;
use crate::transport::{
    HttpMethod, HttpRequest, HttpResponse, LinkMonitor, MemoryGauge, TransportClient,
    TransportError,
};

use super::error::CloudError;
use super::wire;

pub(super) const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// Owns the cloud identity session and every request that rides on it.
pub struct CredentialBroker {
    config: CloudConfig,
    store: Arc<dyn PersistenceGateway>,
    transport: Box<dyn TransportClient>,
    link: Box<dyn LinkMonitor>,
    memory: Box<dyn MemoryGauge>,
    wall: Box<dyn WallClock>,
    clock: Box<dyn MonotonicClock>,

    id_token: String,
    refresh_token: String,
    token_expiry_epoch: u64,

    cloud_cooldown_until_epoch: u64,
    fallback_anchor: Option<ClockAnchor>,

    next_auth_attempt_ms: Option<u32>,
    auth_backoff_ms: u32,
    last_backoff_log_ms: Option<u32>,
    next_secure_allowed_ms: Option<u32>,
    last_spacing_log_ms: Option<u32>,

    // Intentionally memory-only: cleared by a future success or by an
    // out-of-band credentials/firmware update, not by restart bookkeeping.
    credentials_rejected: bool,
}

impl CredentialBroker {
    /// Creates a broker, restoring the persisted cooldown and the fallback
    /// clock anchor.
    #[must_use]
    pub fn new(
        config: CloudConfig,
        store: Arc<dyn PersistenceGateway>,
        transport: Box<dyn TransportClient>,
        link: Box<dyn LinkMonitor>,
        memory: Box<dyn MemoryGauge>,
        wall: Box<dyn WallClock>,
        clock: Box<dyn MonotonicClock>,
    ) -> Self {
        let auth_backoff_ms = config.auth_retry_initial_ms;
        let mut broker = Self {
            config,
            store,
            transport,
            link,
            memory,
            wall,
            clock,
            id_token: String::new(),
            refresh_token: String::new(),
            token_expiry_epoch: 0,
            cloud_cooldown_until_epoch: 0,
            fallback_anchor: None,
            next_auth_attempt_ms: None,
            auth_backoff_ms,
            last_backoff_log_ms: None,
            next_secure_allowed_ms: None,
            last_spacing_log_ms: None,
            credentials_rejected: false,
        };
        broker.load_persisted_state();
        broker
    }

    /// Restores the persisted cooldown and fallback anchor; failures fall
    /// back to defaults.
    fn load_persisted_state(&mut self) {
        self.cloud_cooldown_until_epoch =
            self.store.load_cloud_cooldown_until().unwrap_or_else(|err| {
                tracing::warn!(error = %err, "cloud cooldown load failed, assuming none");
                0
            });

        let anchor_epoch = self.store.load_clock_anchor().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "clock anchor load failed, no fallback clock");
            0
        });
        self.fallback_anchor = (anchor_epoch > EPOCH_VALID_MIN)
            .then(|| ClockAnchor::new(anchor_epoch, self.clock.now_ms()));

        tracing::debug!(
            cooldown_until = self.cloud_cooldown_until_epoch,
            fallback_anchor = anchor_epoch,
            "loaded persisted cloud state"
        );
    }

    /// Startup pass: defer when the link is down, otherwise run a passive
    /// sign-in check.
    pub fn begin(&mut self) -> Result<(), CloudError> {
        tracing::debug!("cloud broker starting");

        if !self.link.is_connected() {
            tracing::debug!("link down, auth deferred");
            return Err(CloudError::WifiDisconnected);
        }

        let result = self.ensure_signed_in(false);
        tracing::debug!(ready = result.is_ok(), "cloud broker startup check");
        result
    }

    /// The central admission decision, evaluated immediately before every
    /// cloud operation; first match wins.
    ///
    /// With `allow_active_auth` false the broker only reports what would be
    /// needed (`auth_required` / `auth_refresh_required`) instead of talking
    /// to the identity service.
    pub fn ensure_signed_in(&mut self, allow_active_auth: bool) -> Result<(), CloudError> {
        if !self.link.is_connected() {
            return Err(CloudError::WifiDisconnected);
        }

        let now_epoch = self.effective_now_epoch();
        if self.cooldown_active(now_epoch) {
            return Err(CloudError::AuthBackoff);
        }

        if self.credentials_rejected {
            return Err(CloudError::InvalidDeviceCredentials);
        }

        if self.auth_backoff_active(self.clock.now_ms()) {
            return Err(CloudError::AuthBackoff);
        }

        if self.id_token.is_empty() {
            if !allow_active_auth {
                return Err(CloudError::AuthRequired);
            }
            tracing::debug!("no id token, signing in");
            let result = self.sign_in_with_password();
            self.record_auth_result(result.is_ok(), "sign-in");
            return result;
        }

        if self.token_expiring_soon() {
            if !allow_active_auth {
                return Err(CloudError::AuthRefreshRequired);
            }

            if self.refresh_token.is_empty() {
                tracing::debug!("refresh token missing, signing in");
                let result = self.sign_in_with_password();
                self.record_auth_result(result.is_ok(), "sign-in");
                return result;
            }

            tracing::debug!("id token expiring soon, refreshing");
            let result = self.refresh_id_token();
            self.record_auth_result(result.is_ok(), "refresh");
            if result.is_err() {
                // Fall back to a full sign-in on the next cycle.
                self.id_token.clear();
                tracing::debug!("refresh failed, sign-in deferred");
            }
            return result;
        }

        Ok(())
    }

    /// Fast precondition check so callers avoid constructing work that would
    /// be rejected anyway.
    #[must_use]
    pub fn should_skip_cloud_writes(&self) -> bool {
        if !self.link.is_connected() {
            return true;
        }
        if self.id_token.is_empty() {
            return true;
        }
        if self.auth_backoff_active(self.clock.now_ms()) {
            return true;
        }
        self.cooldown_active(self.effective_now_epoch())
    }

    /// Current cooldown deadline epoch, zero when none is in force.
    #[must_use]
    pub fn cloud_cooldown_until_epoch(&self) -> u64 {
        self.cloud_cooldown_until_epoch
    }

    /// Whether a session token is currently held.
    #[must_use]
    pub fn has_session(&self) -> bool {
        !self.id_token.is_empty()
    }

    pub(super) fn id_token(&self) -> &str {
        &self.id_token
    }

    pub(super) fn config(&self) -> &CloudConfig {
        &self.config
    }

    pub(super) fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    /// Wall-clock epoch for published timestamps; zero when never synced.
    pub(super) fn wall_epoch_or_zero(&self) -> u64 {
        self.wall.now_epoch().unwrap_or(0)
    }

    /// Invalidates the session after a provider-reported unauthorized
    /// response: both tokens dropped, long cooldown (persisted when a clock
    /// exists), uptime backoff either way.
    pub(super) fn note_unauthorized(&mut self) {
        self.id_token.clear();
        self.refresh_token.clear();
        self.token_expiry_epoch = 0;

        match self.effective_now_epoch() {
            Some(now) => self.set_cloud_cooldown_until(
                now + u64::from(self.config.unauthorized_backoff_ms / 1000),
                "unauthorized",
            ),
            None => tracing::warn!(
                "unauthorized cooldown not persisted (no clock), memory backoff only"
            ),
        }
        self.apply_auth_backoff(self.config.unauthorized_backoff_ms, "unauthorized");
    }

    /// Issues one request, applying spacing and memory admission control to
    /// encrypted requests.
    pub(super) fn json_request(
        &mut self,
        method: HttpMethod,
        url: &str,
        payload: &str,
        content_type: &str,
        secure: bool,
    ) -> Result<HttpResponse, CloudError> {
        if secure {
            self.wait_out_secure_spacing();

            let free = self.memory.free_bytes();
            let largest_block = self.memory.largest_free_block_bytes();
            if free < self.config.min_free_heap_bytes
                || largest_block < self.config.min_largest_block_bytes
            {
                // Refusing up front beats an allocation failure mid-handshake.
                self.apply_auth_backoff(self.config.low_heap_backoff_ms, "low_heap");
                if let Some(now) = self.effective_now_epoch() {
                    self.set_cloud_cooldown_until(
                        now + u64::from(self.config.low_heap_backoff_ms / 1000),
                        "low_heap",
                    );
                }
                tracing::warn!(
                    free,
                    largest_block,
                    min_free = self.config.min_free_heap_bytes,
                    min_block = self.config.min_largest_block_bytes,
                    "secure request refused: low heap"
                );
                return Err(CloudError::LowHeap);
            }

            // The gap opens at request start, bounding peak memory of
            // overlapping TLS sessions to one.
            self.next_secure_allowed_ms = Some(
                self.clock
                    .now_ms()
                    .wrapping_add(self.config.secure_request_gap_ms),
            );
        }

        tracing::debug!(method = method.as_str(), secure, "issuing request");

        let request = HttpRequest {
            method,
            url,
            body: payload,
            content_type,
            secure,
            timeout_ms: self.config.http_timeout_ms,
        };
        self.transport.perform(&request).map_err(|err| {
            let mapped = match err {
                TransportError::BeginFailed => CloudError::HttpBeginFailed,
                TransportError::RequestFailed => CloudError::HttpRequestFailed,
            };
            tracing::warn!(method = method.as_str(), error = %mapped, "request failed");
            mapped
        })
    }

    /// Blocks until the mandatory gap since the previous encrypted request
    /// has elapsed. Callers wait rather than fail.
    fn wait_out_secure_spacing(&mut self) {
        let now_ms = self.clock.now_ms();
        let wait_ms = self.secure_spacing_remaining_ms(now_ms);
        if wait_ms == 0 {
            return;
        }

        if wait_ms >= 1_000 {
            let should_log = self.last_spacing_log_ms.map_or(true, |last| {
                now_ms.wrapping_sub(last) >= self.config.backoff_log_interval_ms
            });
            if should_log {
                tracing::debug!(wait_ms, "secure request deferred for spacing");
                self.last_spacing_log_ms = Some(now_ms);
            }
        }
        self.clock.sleep_ms(wait_ms);
    }

    fn secure_spacing_remaining_ms(&self, now_ms: u32) -> u32 {
        match self.next_secure_allowed_ms {
            Some(allowed_ms) if millis_before(now_ms, allowed_ms) => {
                allowed_ms.wrapping_sub(now_ms)
            },
            _ => 0,
        }
    }

    fn auth_backoff_active(&self, now_ms: u32) -> bool {
        self.next_auth_attempt_ms
            .is_some_and(|deadline| millis_before(now_ms, deadline))
    }

    /// Epoch now from the authoritative clock, else approximated from the
    /// restored anchor, else unknown.
    fn effective_now_epoch(&self) -> Option<u64> {
        if let Some(now) = self.wall.now_epoch() {
            return Some(now);
        }
        self.fallback_anchor
            .map(|anchor| anchor.approximate_now(self.clock.now_ms()))
    }

    /// A set cooldown with unknown current time counts as active.
    fn cooldown_active(&self, now_epoch: Option<u64>) -> bool {
        if self.cloud_cooldown_until_epoch == 0 {
            return false;
        }
        match now_epoch {
            None => true,
            Some(now) => now < self.cloud_cooldown_until_epoch,
        }
    }

    fn token_expiring_soon(&self) -> bool {
        if self.id_token.is_empty() {
            return true;
        }
        if self.token_expiry_epoch == 0 {
            return false;
        }
        let Some(now) = self.wall.now_epoch() else {
            return false;
        };
        now + self.config.token_refresh_skew_secs >= self.token_expiry_epoch
    }

    /// Success resets backoff to initial and clears the sticky flag and
    /// cooldown; failure applies the current backoff, then doubles it (up to
    /// the cap) for the next failure.
    fn record_auth_result(&mut self, success: bool, op_name: &'static str) {
        if success {
            self.next_auth_attempt_ms = None;
            self.auth_backoff_ms = self.config.auth_retry_initial_ms;
            self.credentials_rejected = false;
            self.clear_cloud_cooldown();
            return;
        }

        self.auth_backoff_ms = self.auth_backoff_ms.max(self.config.auth_retry_initial_ms);
        self.apply_auth_backoff(self.auth_backoff_ms, op_name);

        if self.auth_backoff_ms < self.config.auth_retry_max_ms {
            self.auth_backoff_ms = self
                .auth_backoff_ms
                .saturating_mul(2)
                .min(self.config.auth_retry_max_ms);
        }
    }

    fn apply_auth_backoff(&mut self, backoff_ms: u32, reason: &'static str) {
        let backoff_ms = backoff_ms.max(self.config.auth_retry_initial_ms);
        let now_ms = self.clock.now_ms();
        self.next_auth_attempt_ms = Some(now_ms.wrapping_add(backoff_ms));
        self.auth_backoff_ms = backoff_ms;

        let should_log = self.last_backoff_log_ms.map_or(true, |last| {
            now_ms.wrapping_sub(last) >= self.config.backoff_log_interval_ms
        });
        if should_log {
            tracing::warn!(
                reason,
                retry_in_secs = (backoff_ms + 999) / 1000,
                "auth backoff applied"
            );
            self.last_backoff_log_ms = Some(now_ms);
        }
    }

    /// Persists the cooldown deadline synchronously; restart reconstructs it
    /// from this record alone.
    fn set_cloud_cooldown_until(&mut self, until_epoch: u64, reason: &'static str) {
        self.cloud_cooldown_until_epoch = until_epoch;
        if let Err(err) = self.store.save_cloud_cooldown_until(until_epoch) {
            tracing::warn!(error = %err, "cloud cooldown save failed");
        }
        tracing::warn!(until = until_epoch, reason, "cloud cooldown set");
    }

    fn clear_cloud_cooldown(&mut self) {
        if self.cloud_cooldown_until_epoch == 0 {
            return;
        }

        self.cloud_cooldown_until_epoch = 0;
        if let Err(err) = self.store.save_cloud_cooldown_until(0) {
            tracing::warn!(error = %err, "cloud cooldown clear failed");
        }
        tracing::debug!("cloud cooldown cleared");
    }

    fn sign_in_with_password(&mut self) -> Result<(), CloudError> {
        tracing::debug!("signing in with device credentials");

        let payload =
            wire::sign_in_payload(&self.config.device_email, &self.config.device_password);
        let url = format!("{}?key={}", self.config.sign_in_url, self.config.api_key);

        let response =
            self.json_request(HttpMethod::Post, &url, &payload, CONTENT_TYPE_JSON, true)?;

        if !response.is_success() {
            return Err(self.classify_sign_in_failure(&response));
        }

        let tokens = wire::parse_sign_in_response(&response.body).map_err(|err| {
            tracing::warn!("sign-in failed: invalid response body");
            err
        })?;

        self.refresh_token = tokens.refresh_token;
        self.token_expiry_epoch = self
            .wall
            .now_epoch()
            .map_or(0, |now| now + tokens.expires_in_secs);

        if tokens.id_token.is_empty() {
            self.id_token.clear();
            tracing::warn!("sign-in failed: missing id token");
            return Err(CloudError::MissingIdToken);
        }
        self.id_token = tokens.id_token;

        tracing::info!("sign-in succeeded");
        Ok(())
    }

    /// Maps a non-2xx sign-in response onto the error taxonomy and applies
    /// the matching provider-imposed schedule.
    fn classify_sign_in_failure(&mut self, response: &HttpResponse) -> CloudError {
        let message = wire::extract_provider_error(&response.body).unwrap_or_default();

        let error = if response.status == 400 && wire::is_rate_limit_error(&message) {
            self.credentials_rejected = false;
            self.auth_backoff_ms = self.config.rate_limit_backoff_ms;
            match self.effective_now_epoch() {
                Some(now) => self.set_cloud_cooldown_until(
                    now + u64::from(self.config.rate_limit_backoff_ms / 1000),
                    "rate_limited",
                ),
                None => tracing::warn!("rate limit cooldown not persisted (no clock)"),
            }
            CloudError::AuthRateLimited
        } else if response.status == 400
            && (message.is_empty() || wire::is_credential_error(&message))
        {
            // Requires out-of-band credential correction; backoff far beyond
            // the normal cap so retries stay rare until then.
            self.credentials_rejected = true;
            self.auth_backoff_ms = self.config.auth_retry_max_ms.saturating_mul(2);
            CloudError::InvalidDeviceCredentials
        } else {
            CloudError::SignInFailed {
                status: response.status,
            }
        };

        let provider_error = if message.is_empty() {
            "unknown"
        } else {
            message.as_str()
        };
        tracing::warn!(status = response.status, provider_error, "sign-in failed");
        error
    }

    fn refresh_id_token(&mut self) -> Result<(), CloudError> {
        if self.refresh_token.is_empty() {
            tracing::debug!("refresh skipped: no refresh token");
            return Err(CloudError::MissingRefreshToken);
        }

        tracing::debug!("refreshing id token");

        let payload = wire::refresh_payload(&self.refresh_token);
        let url = format!("{}?key={}", self.config.token_refresh_url, self.config.api_key);

        let response =
            self.json_request(HttpMethod::Post, &url, &payload, CONTENT_TYPE_FORM, true)?;

        if !response.is_success() {
            let message = wire::extract_provider_error(&response.body).unwrap_or_default();
            let provider_error = if message.is_empty() {
                "unknown"
            } else {
                message.as_str()
            };
            tracing::warn!(status = response.status, provider_error, "refresh failed");
            return Err(CloudError::RefreshFailed {
                status: response.status,
            });
        }

        let tokens = wire::parse_refresh_response(&response.body).map_err(|err| {
            tracing::warn!("refresh failed: invalid response body");
            err
        })?;

        self.id_token = tokens.id_token;
        self.refresh_token = tokens.refresh_token;
        self.token_expiry_epoch = self
            .wall
            .now_epoch()
            .map_or(0, |now| now + tokens.expires_in_secs);

        if self.id_token.is_empty() {
            tracing::warn!("refresh failed: missing id token");
            return Err(CloudError::MissingIdToken);
        }

        tracing::debug!("refresh succeeded");
        Ok(())
    }
}
