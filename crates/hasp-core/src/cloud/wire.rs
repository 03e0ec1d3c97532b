//! Wire formats for the remote command-and-control and identity services.
//!
//! Only the fields the controller actually consumes are modeled. Provider
//! responses are parsed defensively: absent fields default to empty/zero, and
//! provider error strings are used for classification only.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::error::CloudError;

/// Hard cap on commands accepted from a single poll, regardless of how many
/// the service returns.
pub const MAX_COMMANDS_PER_POLL: usize = 8;

/// One remote command, ephemeral between fetch and delete-by-id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Opaque id the command is keyed under; used for the acknowledge delete.
    pub id: String,

    /// Command type, e.g. `unlock`.
    pub kind: String,

    /// Creation epoch seconds as reported by the service.
    pub created_at: u64,

    /// Expiry epoch seconds as reported by the service.
    pub expires_at: u64,

    /// Uid of the account that requested the command.
    pub requested_by_uid: String,

    /// Channel the command was issued through.
    pub channel: String,
}

/// Tokens extracted from a successful identity response.
#[derive(Debug)]
pub(crate) struct IdentityTokens {
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in_secs: u64,
}

/// Pulls the provider's error message out of an error body, if any.
///
/// Bodies carry either `{"error": {"message": "..."}}` or `{"error": "..."}`.
pub(crate) fn extract_provider_error(body: &str) -> Option<String> {
    let doc: Value = serde_json::from_str(body).ok()?;
    let error = doc.get("error")?;

    if let Some(message) = error.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    error.as_str().map(ToString::to_string)
}

/// Whether a provider error message marks the device credentials as rejected.
pub(crate) fn is_credential_error(message: &str) -> bool {
    message.contains("INVALID_LOGIN_CREDENTIALS")
        || message.contains("INVALID_PASSWORD")
        || message.contains("EMAIL_NOT_FOUND")
        || message.contains("USER_DISABLED")
}

/// Whether a provider error message marks the sign-in as rate limited.
pub(crate) fn is_rate_limit_error(message: &str) -> bool {
    message.contains("TOO_MANY_ATTEMPTS_TRY_LATER")
}

/// Parses a command-poll body into at most [`MAX_COMMANDS_PER_POLL`] commands.
///
/// A JSON `null` body means the queue is empty. An in-band `{"error": ...}`
/// value is surfaced as [`CloudError::Provider`]. Entries that are not
/// objects are skipped; absent fields default to empty/zero.
pub(crate) fn parse_poll_body(body: &str) -> Result<Vec<Command>, CloudError> {
    let doc: Value = serde_json::from_str(body).map_err(|_| CloudError::InvalidJson)?;

    if doc.is_null() {
        return Ok(Vec::new());
    }

    if let Some(message) = doc.get("error").and_then(Value::as_str) {
        return Err(CloudError::Provider {
            message: message.to_string(),
        });
    }

    let Some(entries) = doc.as_object() else {
        return Ok(Vec::new());
    };

    let mut commands = Vec::new();
    for (id, entry) in entries {
        if commands.len() >= MAX_COMMANDS_PER_POLL {
            break;
        }
        let Some(fields) = entry.as_object() else {
            continue;
        };

        commands.push(Command {
            id: id.clone(),
            kind: string_field(fields, "type"),
            created_at: u64_field(fields, "createdAt"),
            expires_at: u64_field(fields, "expiresAt"),
            requested_by_uid: string_field(fields, "requestedByUid"),
            channel: string_field(fields, "channel"),
        });
    }

    Ok(commands)
}

/// Parses a password sign-in response (`idToken`/`refreshToken`/`expiresIn`).
pub(crate) fn parse_sign_in_response(body: &str) -> Result<IdentityTokens, CloudError> {
    let doc: Value = serde_json::from_str(body).map_err(|_| CloudError::InvalidJson)?;
    Ok(IdentityTokens {
        id_token: doc
            .get("idToken")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        refresh_token: doc
            .get("refreshToken")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        expires_in_secs: expires_in(&doc, "expiresIn"),
    })
}

/// Parses a refresh response (`id_token`/`refresh_token`/`expires_in`).
pub(crate) fn parse_refresh_response(body: &str) -> Result<IdentityTokens, CloudError> {
    let doc: Value = serde_json::from_str(body).map_err(|_| CloudError::InvalidJson)?;
    Ok(IdentityTokens {
        id_token: doc
            .get("id_token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        refresh_token: doc
            .get("refresh_token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        expires_in_secs: expires_in(&doc, "expires_in"),
    })
}

/// Sign-in request body.
pub(crate) fn sign_in_payload(email: &str, password: &SecretString) -> String {
    serde_json::json!({
        "email": email,
        "password": password.expose_secret(),
        "returnSecureToken": true,
    })
    .to_string()
}

/// Refresh request body (form encoded).
pub(crate) fn refresh_payload(refresh_token: &str) -> String {
    format!("grant_type=refresh_token&refresh_token={refresh_token}")
}

/// Heartbeat state body.
pub(crate) fn state_payload(
    online: bool,
    last_seen_epoch: u64,
    relay_state: &str,
    firmware_version: &str,
) -> String {
    serde_json::json!({
        "online": online,
        "lastSeen": last_seen_epoch,
        "relayState": relay_state,
        "fwVersion": firmware_version,
    })
    .to_string()
}

/// Audit record body.
pub(crate) fn audit_payload(
    ts_epoch: u64,
    action: &str,
    channel: &str,
    result: &str,
    reason: &str,
    command_id: &str,
    actor_uid: &str,
) -> String {
    serde_json::json!({
        "ts": ts_epoch,
        "action": action,
        "channel": channel,
        "result": result,
        "reason": reason,
        "commandId": command_id,
        "actorUid": actor_uid,
    })
    .to_string()
}

fn string_field(fields: &serde_json::Map<String, Value>, key: &str) -> String {
    fields
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn u64_field(fields: &serde_json::Map<String, Value>, key: &str) -> u64 {
    fields.get(key).and_then(Value::as_u64).unwrap_or_default()
}

/// Expiry seconds, tolerating both string and numeric forms; defaults to an
/// hour, the provider's usual token lifetime.
fn expires_in(doc: &Value, key: &str) -> u64 {
    let value = doc.get(key);
    value
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .or_else(|| value.and_then(Value::as_u64))
        .unwrap_or(3_600)
}
