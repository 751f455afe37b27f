//! # Cryptographic Primitives
//!
//! The two leaves everything else in keyseal stands on:
//!
//! - **shamir** — threshold splitting of the master key over GF(256).
//! - **encryption** — AES-256-GCM with random nonces, for the checksum,
//!   data keys, and secret values.
//!
//! Both are thin, stateless wrappers. Key lifecycle belongs to
//! [`crate::seal`], not here.

pub mod encryption;
pub mod shamir;

pub use encryption::{decrypt, encrypt, generate_key, EncryptionError};
pub use shamir::{combine, split, Share, ShamirError};
