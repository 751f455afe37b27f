//! # Constants
//!
//! Every magic number in keyseal lives here. Settings keys and the checksum
//! plaintext end up on disk, so changing them after the first master key has
//! been minted strands every existing deployment. Don't.

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// AES-256-GCM for every symmetric operation: the checksum, data keys,
/// and secret values.
pub const SYMMETRIC_ALGORITHM: &str = "AES-256-GCM";

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. 96 bits, generated fresh per message.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// Length of the master key minted by `CreateMasterKey`.
pub const MASTER_KEY_LENGTH: usize = AES_KEY_LENGTH;

/// Length of the per-secret data key used for envelope encryption.
pub const DATA_KEY_LENGTH: usize = AES_KEY_LENGTH;

/// Length of the signing key stored at [`SIGNING_KEY_PATH`].
pub const SIGNING_KEY_LENGTH: usize = 32;

/// Share x-coordinates are non-zero elements of GF(256), so a single split
/// can produce at most 255 shares.
pub const MAX_TOTAL_SHARES: usize = 255;

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

/// Known plaintext encrypted under the master key at creation time.
///
/// Decrypting the stored checksum with a reconstructed key and getting this
/// value back is the only proof that the reconstruction produced *the* key
/// rather than *a* key.
pub const CHECKSUM_PLAINTEXT: &[u8] = b"keyseal_checksum";

// ---------------------------------------------------------------------------
// Settings Keys
// ---------------------------------------------------------------------------

/// Total number of shares the master key was split into.
pub const SETTING_TOTAL_SHARES: &str = "total_shares";

/// Minimum number of shares needed to reconstruct the master key.
pub const SETTING_MIN_SHARES: &str = "min_shares";

/// Base64 ciphertext of [`CHECKSUM_PLAINTEXT`] under the master key.
pub const SETTING_MASTER_KEY_CHECKSUM: &str = "master_key_checksum";

/// All settings written by `CreateMasterKey`, in the order they are read back.
pub const KEY_SETTINGS: [&str; 3] = [
    SETTING_MASTER_KEY_CHECKSUM,
    SETTING_TOTAL_SHARES,
    SETTING_MIN_SHARES,
];

// ---------------------------------------------------------------------------
// Reserved Secrets
// ---------------------------------------------------------------------------

/// Prefix of secret paths owned by the service itself. User paths must start
/// with `/`, so the two namespaces never collide.
pub const RESERVED_PATH_PREFIX: &str = "internal/";

/// Token-signing key minted alongside the master key.
pub const SIGNING_KEY_PATH: &str = "internal/signing_key";

// ---------------------------------------------------------------------------
// Network Defaults
// ---------------------------------------------------------------------------

/// Default HTTP API port.
pub const DEFAULT_API_PORT: u16 = 8090;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 8091;

/// Crate version, reported by the node's status endpoint.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_settings_are_distinct() {
        assert_ne!(KEY_SETTINGS[0], KEY_SETTINGS[1]);
        assert_ne!(KEY_SETTINGS[0], KEY_SETTINGS[2]);
        assert_ne!(KEY_SETTINGS[1], KEY_SETTINGS[2]);
    }

    #[test]
    fn test_signing_key_path_is_reserved() {
        assert!(SIGNING_KEY_PATH.starts_with(RESERVED_PATH_PREFIX));
        assert!(!SIGNING_KEY_PATH.starts_with('/'));
    }

    #[test]
    fn test_crypto_parameter_sizes() {
        assert_eq!(AES_KEY_LENGTH, 32);
        assert_eq!(AES_NONCE_LENGTH, 12);
        assert_eq!(AES_TAG_LENGTH, 16);
        assert_eq!(MASTER_KEY_LENGTH, AES_KEY_LENGTH);
        assert_eq!(DATA_KEY_LENGTH, AES_KEY_LENGTH);
    }

    #[test]
    fn test_checksum_plaintext_not_empty() {
        assert!(!CHECKSUM_PLAINTEXT.is_empty());
    }

    #[test]
    fn test_default_ports_differ() {
        assert_ne!(DEFAULT_API_PORT, DEFAULT_METRICS_PORT);
    }
}
