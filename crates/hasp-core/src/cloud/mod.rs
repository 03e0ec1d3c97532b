//! Cloud trust path: credential/session lifecycle and the command channel.
//!
//! [`CredentialBroker`] owns the identity session and gates every request
//! behind layered admission checks (link, cooldown, sticky rejection, uptime
//! backoff, memory). [`CommandChannel`] rides on it to poll and acknowledge
//! remote commands, publish heartbeat state, and append audit records.
//!
//! Nothing here ever halts the device: every failure is recovered locally
//! through backoff and cooldown scheduling, and command/state/audit failures
//! never degrade the lock's physical function.

pub mod error;
pub mod wire;

mod broker;
mod channel;


pub use broker::CredentialBroker;
pub use channel::{AuditEntry, CommandChannel};
pub use error::CloudError;
pub use wire::{Command, MAX_COMMANDS_PER_POLL};
