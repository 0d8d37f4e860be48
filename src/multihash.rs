//! Content identifiers for blobs stored outside the ledger.
//!
//! A [`Multihash`] is the self-describing `header || digest` pair used to
//! address request payloads, response lists and state snapshots.  Only the
//! sha2-256 / 32-byte variant is supported: the binary form is always 34
//! bytes and the string form is its base-58 encoding (`Qm...`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

/// Multicodec code for sha2-256.
pub const SHA2_256_CODE: u8 = 0x12;
/// Digest length in bytes for sha2-256.
pub const DIGEST_LENGTH: usize = 32;
/// Fixed header carried by every supported multihash.
pub const HEADER: [u8; 2] = [SHA2_256_CODE, DIGEST_LENGTH as u8];
/// Length of the binary `header || digest` form.
pub const ENCODED_LENGTH: usize = HEADER.len() + DIGEST_LENGTH;

/// Typed content identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Multihash {
    header: [u8; 2],
    digest: [u8; DIGEST_LENGTH],
}

/// Errors produced while decoding a multihash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The string was not valid base-58.
    #[error("invalid base58: {0}")]
    InvalidBase58(String),
    /// The decoded bytes had the wrong length.
    #[error("invalid multihash length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required byte length.
        expected: usize,
        /// Decoded byte length.
        actual: usize,
    },
    /// The hash-function/length header is not sha2-256/32.
    #[error("unsupported multihash header {0:02x?}")]
    UnsupportedHeader([u8; 2]),
}

impl Multihash {
    /// Hashes `bytes` with SHA-256 and tags the digest with the fixed header.
    pub fn generate(bytes: &[u8]) -> Self {
        let mut digest = [0u8; DIGEST_LENGTH];
        digest.copy_from_slice(&Sha256::digest(bytes));
        Self::from_digest(digest)
    }

    /// Rebuilds a multihash from the bare digest (the compact on-ledger form).
    pub const fn from_digest(digest: [u8; DIGEST_LENGTH]) -> Self {
        Self {
            header: HEADER,
            digest,
        }
    }

    /// Decodes the binary `header || digest` form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != ENCODED_LENGTH {
            return Err(DecodeError::InvalidLength {
                expected: ENCODED_LENGTH,
                actual: bytes.len(),
            });
        }
        let header = [bytes[0], bytes[1]];
        if header != HEADER {
            return Err(DecodeError::UnsupportedHeader(header));
        }
        let mut digest = [0u8; DIGEST_LENGTH];
        digest.copy_from_slice(&bytes[HEADER.len()..]);
        Ok(Self { header, digest })
    }

    /// Decodes the base-58 string form.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let bytes = bs58::decode(text)
            .into_vec()
            .map_err(|err| DecodeError::InvalidBase58(err.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Encodes to the base-58 string form.
    pub fn stringify(&self) -> String {
        bs58::encode(self.to_bytes()).into_string()
    }

    /// Binary `header || digest` form.
    pub fn to_bytes(&self) -> [u8; ENCODED_LENGTH] {
        let mut out = [0u8; ENCODED_LENGTH];
        out[..HEADER.len()].copy_from_slice(&self.header);
        out[HEADER.len()..].copy_from_slice(&self.digest);
        out
    }

    /// Hash-function/length header.
    pub fn header(&self) -> &[u8; 2] {
        &self.header
    }

    /// Raw digest bytes.
    pub fn digest(&self) -> &[u8; DIGEST_LENGTH] {
        &self.digest
    }
}

impl FromStr for Multihash {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stringify())
    }
}

impl fmt::Debug for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Multihash({})", self.stringify())
    }
}

impl Serialize for Multihash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.stringify())
    }
}

impl<'de> Deserialize<'de> for Multihash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
