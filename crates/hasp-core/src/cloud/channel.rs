//! Command polling, heartbeat publishing, and audit appends.
//!
//! Every operation rides on the broker: `ensure_signed_in` is evaluated
//! immediately before each request (never cached across operations), and all
//! failures are recovered through the broker's backoff/cooldown scheduling.
//! Heartbeat and audit writes are best-effort; their failures are logged and
//! never block the lock's physical function.

use rand::Rng;

use crate::transport::HttpMethod;

use super::broker::{CONTENT_TYPE_JSON, CredentialBroker};
use super::error::CloudError;
use super::wire::{self, Command};

/// One append-only audit record.
#[derive(Debug, Clone, Copy)]
pub struct AuditEntry<'a> {
    /// What happened, e.g. `unlock`.
    pub action: &'a str,
    /// Authorization channel the action arrived through.
    pub channel: &'a str,
    /// Outcome, e.g. `ok` or `denied`.
    pub result: &'a str,
    /// Denial reason or empty.
    pub reason: &'a str,
    /// Originating command id, empty for local actions.
    pub command_id: &'a str,
    /// Requesting account uid, empty for local actions.
    pub actor_uid: &'a str,
}

/// Cloud command channel over an authenticated session.
pub struct CommandChannel {
    broker: CredentialBroker,
}

impl CommandChannel {
    /// Wraps a broker.
    #[must_use]
    pub fn new(broker: CredentialBroker) -> Self {
        Self { broker }
    }

    /// Shared access to the underlying broker.
    #[must_use]
    pub fn broker(&self) -> &CredentialBroker {
        &self.broker
    }

    /// Mutable access to the underlying broker.
    pub fn broker_mut(&mut self) -> &mut CredentialBroker {
        &mut self.broker
    }

    /// Fetches the most recent batch of pending commands, ordered by key.
    ///
    /// A 401/403 response invalidates the whole in-memory session and is
    /// reported distinctly as [`CloudError::Unauthorized`].
    pub fn poll_commands(&mut self) -> Result<Vec<Command>, CloudError> {
        if let Err(err) = self.broker.ensure_signed_in(true) {
            if !err.is_expected_denial() {
                tracing::warn!(error = %err, "poll denied, not signed in");
            }
            return Err(err);
        }

        let url = self.database_url(&format!(
            "/locks/{}/commands.json?orderBy=%22$key%22&limitToLast={}&auth={}",
            self.broker.config().lock_id,
            self.broker.config().command_fetch_limit,
            self.broker.id_token(),
        ));

        let response = self
            .broker
            .json_request(HttpMethod::Get, &url, "", CONTENT_TYPE_JSON, true)
            .map_err(|err| {
                if !err.is_expected_denial() {
                    tracing::warn!(error = %err, "poll request failed");
                }
                err
            })?;

        if response.status == 401 || response.status == 403 {
            let message = wire::extract_provider_error(&response.body);
            self.broker.note_unauthorized();
            tracing::warn!(
                status = response.status,
                provider_error = message.as_deref().unwrap_or("unknown"),
                "poll unauthorized, session invalidated"
            );
            return Err(CloudError::Unauthorized);
        }

        let commands = wire::parse_poll_body(&response.body).map_err(|err| {
            match &err {
                CloudError::Provider { message } => {
                    tracing::warn!(provider_error = %message, "poll provider error");
                },
                _ => tracing::warn!("poll response not valid JSON"),
            }
            err
        })?;

        tracing::debug!(count = commands.len(), "poll ok");
        Ok(commands)
    }

    /// Acknowledges a command by deleting it; idempotent for non-empty ids.
    pub fn delete_command(&mut self, command_id: &str) -> Result<(), CloudError> {
        if command_id.is_empty() {
            return Err(CloudError::InvalidCommandId);
        }
        self.broker.ensure_signed_in(false)?;

        let url = self.database_url(&format!(
            "/locks/{}/commands/{}.json?auth={}",
            self.broker.config().lock_id,
            command_id,
            self.broker.id_token(),
        ));

        let response = self
            .broker
            .json_request(HttpMethod::Delete, &url, "", CONTENT_TYPE_JSON, true)
            .map_err(|err| {
                tracing::warn!(command_id, error = %err, "command delete request failed");
                err
            })?;

        if response.is_success() {
            tracing::debug!(command_id, "command deleted");
            return Ok(());
        }

        tracing::warn!(
            command_id,
            status = response.status,
            provider_error = wire::extract_provider_error(&response.body)
                .as_deref()
                .unwrap_or("unknown"),
            "command delete failed"
        );
        Err(CloudError::CommandDeleteFailed {
            status: response.status,
        })
    }

    /// Publishes the heartbeat state document. Best-effort: callers log the
    /// error and move on.
    pub fn patch_state(
        &mut self,
        online: bool,
        relay_state: &str,
        firmware_version: &str,
    ) -> Result<(), CloudError> {
        self.broker.ensure_signed_in(false)?;

        let payload = wire::state_payload(
            online,
            self.broker.wall_epoch_or_zero(),
            relay_state,
            firmware_version,
        );
        let url = self.database_url(&format!(
            "/locks/{}/state.json?auth={}",
            self.broker.config().lock_id,
            self.broker.id_token(),
        ));

        let response = self
            .broker
            .json_request(HttpMethod::Patch, &url, &payload, CONTENT_TYPE_JSON, true)
            .map_err(|err| {
                tracing::warn!(error = %err, "state patch request failed");
                err
            })?;

        if response.is_success() {
            tracing::debug!("state patch ok");
            return Ok(());
        }

        tracing::warn!(
            status = response.status,
            provider_error = wire::extract_provider_error(&response.body)
                .as_deref()
                .unwrap_or("unknown"),
            "state patch failed"
        );
        Err(CloudError::StatePatchFailed {
            status: response.status,
        })
    }

    /// Appends an audit record under a generated, collision-resistant event
    /// id. Best-effort.
    pub fn write_audit(&mut self, entry: &AuditEntry<'_>) -> Result<(), CloudError> {
        self.broker.ensure_signed_in(false)?;

        let event_id = format!(
            "evt_{}_{}",
            self.broker.now_ms(),
            rand::thread_rng().gen_range(1_000..10_000)
        );

        let payload = wire::audit_payload(
            self.broker.wall_epoch_or_zero(),
            entry.action,
            entry.channel,
            entry.result,
            entry.reason,
            entry.command_id,
            entry.actor_uid,
        );
        let url = self.database_url(&format!(
            "/locks/{}/audit/{}.json?auth={}",
            self.broker.config().lock_id,
            event_id,
            self.broker.id_token(),
        ));

        let response = self
            .broker
            .json_request(HttpMethod::Put, &url, &payload, CONTENT_TYPE_JSON, true)
            .map_err(|err| {
                tracing::warn!(error = %err, "audit write request failed");
                err
            })?;

        if response.is_success() {
            tracing::debug!(
                action = entry.action,
                channel = entry.channel,
                result = entry.result,
                "audit ok"
            );
            return Ok(());
        }

        tracing::warn!(
            status = response.status,
            provider_error = wire::extract_provider_error(&response.body)
                .as_deref()
                .unwrap_or("unknown"),
            "audit write failed"
        );
        Err(CloudError::AuditWriteFailed {
            status: response.status,
        })
    }

    /// Fast precondition check for callers about to build cloud work.
    #[must_use]
    pub fn should_skip_cloud_writes(&self) -> bool {
        self.broker.should_skip_cloud_writes()
    }

    fn database_url(&self, path: &str) -> String {
        format!("{}{}", self.broker.config().database_url, path)
    }
}
