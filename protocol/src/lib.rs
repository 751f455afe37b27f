// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # keyseal — Core Library
//!
//! A self-hosted secret store whose master key never touches disk. The key
//! is minted once, split into N Shamir shares for operators, and thrown
//! away. After every restart the store is sealed until K operators hand
//! their shares back.
//!
//! ## Architecture
//!
//! - **crypto** — Shamir over GF(256) and AES-256-GCM. The two primitives
//!   everything else is built from.
//! - **seal** — The key manager state machine and the key management
//!   protocol that creates, unseals, and inspects it.
//! - **secrets** — Envelope encryption: one data key per secret, sealed
//!   under the master key.
//! - **storage** — Settings and secret records on sled.
//! - **config** — Constants. Some of them are on disk forever.
//!
//! ## Lifecycle
//!
//! ```text
//! create_master_key(5, 3) ──► 5 shares to operators, vault unsealed
//!          restart        ──► vault sealed, 0/3 shares
//! add_share × 3           ──► reconstructed, checked against checksum, unsealed
//! ```
//!
//! ## Design Philosophy
//!
//! 1. A reconstructed key is not trusted until it decrypts the checksum.
//! 2. Key material lives in `Zeroizing` buffers and is never logged.
//! 3. One closed error enum per component. Match on it.

pub mod config;
pub mod crypto;
pub mod seal;
pub mod secrets;
pub mod storage;
