//! # Seal
//!
//! The master key lifecycle: [`manager`] is the in-memory state machine,
//! [`protocol`] is the service that drives it against persisted settings.

pub mod manager;
pub mod protocol;

pub use manager::{KeyManager, KeyManagerError, SealState, SealStatus, ShareAdded};
pub use protocol::{KeyManagementError, KeyManagementService, KeyStatus};
