use crate::error::ProbeError;
use gost94::Gost94Test;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// GOST R 34.11-94 with the test parameter set.
    Gost,
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    pub fn hex_digest(self, input: &str) -> String {
        match self {
            Self::Gost => hex_digest::<Gost94Test>(input.as_bytes()),
            Self::Sha256 => hex_digest::<Sha256>(input.as_bytes()),
            Self::Sha512 => hex_digest::<Sha512>(input.as_bytes()),
        }
    }

    pub const fn hex_len(self) -> usize {
        match self {
            Self::Gost | Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }
}

fn hex_digest<D: Digest>(input: &[u8]) -> String {
    let out = D::digest(input);
    let mut hex = String::with_capacity(out.len() * 2);
    for b in out.iter() {
        let _ = write!(hex, "{b:02x}");
    }
    hex
}

/// Gate in front of every snapshot: only callers whose token digests to the
/// configured value get a record.
#[derive(Debug, Clone)]
pub struct AccessGuard {
    algorithm: DigestAlgorithm,
    expected_digest: String,
}

impl AccessGuard {
    pub fn new(algorithm: DigestAlgorithm, expected_digest: &str) -> Self {
        Self {
            algorithm,
            expected_digest: expected_digest.trim().to_ascii_lowercase(),
        }
    }

    pub fn authorize(&self, supplied_token: &str) -> Result<(), ProbeError> {
        // The empty token is hashed like any other.
        let supplied = self.algorithm.hex_digest(supplied_token);
        if constant_time_eq(supplied.as_bytes(), self.expected_digest.as_bytes()) {
            Ok(())
        } else {
            Err(ProbeError::AuthorizationFailure)
        }
    }

    #[cfg(test)]
    pub fn is_authorized(&self, supplied_token: &str) -> bool {
        self.authorize(supplied_token).is_ok()
    }
}

/// Compares every byte regardless of where the first mismatch is.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
