//! # Secrets
//!
//! Envelope encryption and the CRUD service built on it.

pub mod envelope;
pub mod service;

pub use envelope::{open_value, seal_value, SealedValue};
pub use service::{SecretSummary, SecretsError, SecretsService};
