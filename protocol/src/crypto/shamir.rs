//! # Threshold Secret Sharing
//!
//! Shamir's scheme over GF(2^8): every byte of the secret becomes the
//! constant term of its own random polynomial of degree `threshold - 1`,
//! and share `i` holds the evaluations of all those polynomials at `x = i`.
//! Any `threshold` shares pin down the polynomials (and therefore the
//! secret) by Lagrange interpolation at zero; fewer leave every candidate
//! secret equally likely.
//!
//! ## Share encoding
//!
//! On the wire a share is `y_0 || y_1 || ... || y_{len-1} || x`: the
//! evaluations followed by a single trailing byte holding the x-coordinate.
//! x = 0 is never issued because that point *is* the secret.
//!
//! ## What recombination cannot tell you
//!
//! [`combine`] interpolates whatever it is given. Too few shares, or one
//! share with a flipped bit, yields a well-formed but wrong secret with no
//! error. Callers must verify the result out of band.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::config::MAX_TOTAL_SHARES;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while splitting or recombining.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShamirError {
    /// `threshold` must be in `1..=total` and `total` at most 255.
    #[error("invalid share parameters: total={total}, threshold={threshold}")]
    InvalidShares {
        /// Requested number of shares.
        total: usize,
        /// Requested reconstruction threshold.
        threshold: usize,
    },

    /// The secret is empty, nothing to split.
    #[error("secret must not be empty")]
    EmptySecret,

    /// `combine` was called with no shares at all.
    #[error("no shares provided")]
    NoShares,

    /// A share must carry at least one data byte plus its x-coordinate.
    #[error("share too short: {0} bytes")]
    ShareTooShort(usize),

    /// Shares have inconsistent data lengths.
    #[error("share lengths are inconsistent: expected {expected}, got {got}")]
    InconsistentShareLengths {
        /// Length of the first share.
        expected: usize,
        /// Length of the offending share.
        got: usize,
    },

    /// Two shares claim the same x-coordinate.
    #[error("duplicate share index: {0}")]
    DuplicateShareIndex(u8),

    /// x = 0 is reserved for the secret.
    #[error("share index 0 is reserved")]
    ZeroShareIndex,
}

// ---------------------------------------------------------------------------
// GF(256) Arithmetic
// ---------------------------------------------------------------------------

/// GF(2^8) modulo x^8 + x^4 + x^3 + x + 1 (0x11B), the AES field.
///
/// Multiplication goes through log/antilog tables with generator 3,
/// built at compile time.
mod gf256 {
    const REDUCTION: u16 = 0x11B;

    pub(super) struct Tables {
        /// `exp[i] = 3^i`, doubled so `log a + log b` never needs a modulo.
        exp: [u8; 510],
        log: [u8; 256],
    }

    const fn build() -> Tables {
        let mut exp = [0u8; 510];
        let mut log = [0u8; 256];
        let mut x: u16 = 1;
        let mut i = 0;
        while i < 255 {
            exp[i] = x as u8;
            exp[i + 255] = x as u8;
            log[x as usize] = i as u8;
            // x * 3 == x * 2 + x
            x ^= x << 1;
            if x & 0x100 != 0 {
                x ^= REDUCTION;
            }
            i += 1;
        }
        Tables { exp, log }
    }

    static TABLES: Tables = build();

    #[inline]
    pub(super) fn mul(a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }
        TABLES.exp[TABLES.log[a as usize] as usize + TABLES.log[b as usize] as usize]
    }

    /// Multiplicative inverse. `a` must be non-zero.
    #[inline]
    pub(super) fn inv(a: u8) -> u8 {
        debug_assert!(a != 0, "zero has no inverse in GF(256)");
        TABLES.exp[255 - TABLES.log[a as usize] as usize]
    }

    /// Horner evaluation; `coefficients[0]` is the constant term.
    pub(super) fn eval(coefficients: &[u8], x: u8) -> u8 {
        coefficients
            .iter()
            .rev()
            .fold(0u8, |acc, &c| mul(acc, x) ^ c)
    }

    /// Lagrange basis polynomials evaluated at zero for the given abscissas.
    ///
    /// `weights[i] = prod_{j != i} x_j / (x_i - x_j)`. Subtraction is XOR in
    /// characteristic 2. The abscissas must be distinct and non-zero.
    pub(super) fn lagrange_weights_at_zero(xs: &[u8]) -> Vec<u8> {
        xs.iter()
            .enumerate()
            .map(|(i, &xi)| {
                let (num, den) = xs
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .fold((1u8, 1u8), |(num, den), (_, &xj)| {
                        (mul(num, xj), mul(den, xi ^ xj))
                    });
                mul(num, inv(den))
            })
            .collect()
    }

}

// ---------------------------------------------------------------------------
// Share
// ---------------------------------------------------------------------------

/// A single share of a split secret.
///
/// Meaningless on its own. The data is wiped when the share is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    /// x-coordinate of this share's evaluation point (1..=255).
    pub index: u8,
    /// One evaluation per byte of the original secret.
    pub data: Vec<u8>,
}

impl Share {
    /// Encode as `data || index`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 1);
        out.extend_from_slice(&self.data);
        out.push(self.index);
        out
    }

    /// Decode the `data || index` form produced by [`Share::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShamirError> {
        let (index, data) = match bytes.split_last() {
            Some((index, data)) if !data.is_empty() => (*index, data),
            _ => return Err(ShamirError::ShareTooShort(bytes.len())),
        };
        if index == 0 {
            return Err(ShamirError::ZeroShareIndex);
        }
        Ok(Self {
            index,
            data: data.to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Split and Recover
// ---------------------------------------------------------------------------

/// Split `secret` into `total` shares, any `threshold` of which recover it.
///
/// # Errors
///
/// - [`ShamirError::InvalidShares`] unless `0 < threshold <= total <= 255`.
/// - [`ShamirError::EmptySecret`] for a zero-length secret.
pub fn split_secret(
    secret: &[u8],
    total: usize,
    threshold: usize,
) -> Result<Vec<Share>, ShamirError> {
    if threshold == 0 || total < threshold || total > MAX_TOTAL_SHARES {
        return Err(ShamirError::InvalidShares { total, threshold });
    }
    if secret.is_empty() {
        return Err(ShamirError::EmptySecret);
    }

    let mut shares: Vec<Share> = (1..=total)
        .map(|x| Share {
            index: x as u8,
            data: Vec::with_capacity(secret.len()),
        })
        .collect();

    let mut rng = rand::rngs::OsRng;
    let mut coefficients = Zeroizing::new(vec![0u8; threshold]);

    for &byte in secret {
        coefficients[0] = byte;
        rng.fill_bytes(&mut coefficients[1..]);

        for share in shares.iter_mut() {
            share.data.push(gf256::eval(&coefficients, share.index));
        }
    }

    Ok(shares)
}

/// Recover a secret from shares produced by [`split_secret`].
///
/// Deterministic for a given set of shares. With fewer shares than the
/// original threshold, or with a corrupted share, the result is simply
/// wrong: there is nothing in the shares to detect it.
pub fn recover_secret(shares: &[Share]) -> Result<Zeroizing<Vec<u8>>, ShamirError> {
    let first = shares.first().ok_or(ShamirError::NoShares)?;
    let expected = first.data.len();

    let mut seen = [false; 256];
    for share in shares {
        if share.data.len() != expected {
            return Err(ShamirError::InconsistentShareLengths {
                expected,
                got: share.data.len(),
            });
        }
        if share.index == 0 {
            return Err(ShamirError::ZeroShareIndex);
        }
        if std::mem::replace(&mut seen[share.index as usize], true) {
            return Err(ShamirError::DuplicateShareIndex(share.index));
        }
    }

    let xs: Vec<u8> = shares.iter().map(|s| s.index).collect();
    let weights = gf256::lagrange_weights_at_zero(&xs);

    let secret = (0..expected)
        .map(|pos| {
            shares
                .iter()
                .zip(&weights)
                .fold(0u8, |acc, (share, &w)| acc ^ gf256::mul(share.data[pos], w))
        })
        .collect();

    Ok(Zeroizing::new(secret))
}

/// Byte-level [`split_secret`]: each share comes back in its wire encoding.
pub fn split(secret: &[u8], total: usize, threshold: usize) -> Result<Vec<Vec<u8>>, ShamirError> {
    Ok(split_secret(secret, total, threshold)?
        .iter()
        .map(Share::to_bytes)
        .collect())
}

/// Byte-level [`recover_secret`] over wire-encoded shares.
pub fn combine<S: AsRef<[u8]>>(shares: &[S]) -> Result<Zeroizing<Vec<u8>>, ShamirError> {
    let decoded = shares
        .iter()
        .map(|s| Share::from_bytes(s.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    recover_secret(&decoded)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
