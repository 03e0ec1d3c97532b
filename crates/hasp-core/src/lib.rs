//! Door-lock controller core.
//!
//! One physical relay, two independent trust paths:
//!
//! - the **cloud path** ([`cloud`]): a credential/session lifecycle with
//!   persistent backoff, cooldown, and low-memory admission control, and a
//!   command-polling protocol built on top of it;
//! - the **local path** ([`local`]): a fully offline authorization protocol
//!   driven by a pre-shared-secret signed request, with clock bootstrapping
//!   and bounded replay detection.
//!
//! Both feed the same [`relay::RelayController`]. Execution is
//! single-threaded and cooperative: every operation runs to completion or
//! failure before the next is considered, and blocking waits are explicit.
//!
//! Hardware and platform concerns (persistence, HTTP transport, link state,
//! memory pressure, wall/uptime clocks, the relay drive) sit behind traits in
//! [`storage`], [`transport`], and [`clock`]; the [`testing`] module provides
//! scripted fakes for all of them.

pub mod clock;
pub mod cloud;
pub mod config;
pub mod local;
pub mod relay;
pub mod storage;
pub mod testing;
pub mod transport;

pub use cloud::{AuditEntry, CloudError, Command, CommandChannel, CredentialBroker};
pub use config::{CloudConfig, DeviceConfig, LocalAuthConfig, RelayConfig};
pub use local::{LocalAuthError, LocalAuthValidator, UnlockRequest};
pub use relay::{RelayController, RelaySwitch};
pub use storage::{FileStore, MemoryStore, PersistenceGateway};
