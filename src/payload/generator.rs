//! Reference payload generation
//!
//! A session draws one pseudorandom chunk from the OS randomness source and
//! sends that same buffer for every chunk it writes.

use crate::payload::error::{PayloadError, PayloadResult};
use bytes::Bytes;
use rand::rngs::OsRng;
use rand::RngCore;
use std::ops::Deref;

/// Fill a fresh buffer with `size` cryptographically secure random bytes.
///
/// A zero size is rejected with [`PayloadError::EmptyPayload`].
pub fn generate(size: usize) -> PayloadResult<Vec<u8>> {
    if size == 0 {
        return Err(PayloadError::EmptyPayload);
    }

    let mut buf = vec![0u8; size];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| PayloadError::RandomnessUnavailable {
            requested: size,
            reason: e.to_string(),
        })?;

    Ok(buf)
}

/// Immutable chunk content shared read-only by a session's sender and receiver.
///
/// Cloning is cheap: clones share the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePayload {
    bytes: Bytes,
}

impl ReferencePayload {
    /// Generate a new reference chunk of exactly `size` bytes
    pub fn generate(size: usize) -> PayloadResult<Self> {
        Ok(Self {
            bytes: Bytes::from(generate(size)?),
        })
    }

    /// Wrap caller-provided bytes (used by tests that need known content)
    pub fn from_bytes(bytes: impl Into<Bytes>) -> PayloadResult<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(PayloadError::EmptyPayload);
        }
        Ok(Self { bytes })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Compare a received chunk against the reference content
    pub fn matches(&self, received: &[u8]) -> bool {
        self.bytes.as_ref() == received
    }

    /// BLAKE3 digest of the reference content, used in integrity logs
    pub fn digest(&self) -> blake3::Hash {
        blake3::hash(&self.bytes)
    }
}

impl Deref for ReferencePayload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for ReferencePayload {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}
