//! Fixed-width identifiers: accounts and block hashes.
//!
//! Both types compare, hash and order by their raw bytes. The `0x`-hex form
//! produced by `Display` exists for humans and for fixture files; it is never
//! used as a map key.

use std::fmt;
use std::str::FromStr;

use ledgerlint_error::{AuditError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Width of an account identifier in bytes.
pub const ACCOUNT_ID_LEN: usize = 32;
/// Width of a block hash in bytes.
pub const BLOCK_HASH_LEN: usize = 32;

/// Opaque 32-byte chain address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AccountId([u8; ACCOUNT_ID_LEN]);

impl AccountId {
    pub const fn new(bytes: [u8; ACCOUNT_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; ACCOUNT_ID_LEN] {
        &self.0
    }

    /// Abbreviated display form (`0x1234…cdef`) for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}…{}", &full[..6], &full[full.len() - 4..])
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({self})")
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl FromStr for AccountId {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        parse_hex::<ACCOUNT_ID_LEN>(s, "account id").map(Self)
    }
}

impl From<[u8; ACCOUNT_ID_LEN]> for AccountId {
    fn from(bytes: [u8; ACCOUNT_ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 32-byte block hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockHash([u8; BLOCK_HASH_LEN]);

impl BlockHash {
    pub const fn new(bytes: [u8; BLOCK_HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; BLOCK_HASH_LEN] {
        &self.0
    }

    /// Deterministic synthetic hash for chains that do not supply one.
    #[must_use]
    pub fn derive(chain: &str, height: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"ledgerlint.block.v1");
        hasher.update(chain.as_bytes());
        hasher.update(&height.to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({self})")
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl FromStr for BlockHash {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        parse_hex::<BLOCK_HASH_LEN>(s, "block hash").map(Self)
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    f.write_str("0x")?;
    for byte in bytes {
        write!(f, "{byte:02x}")?;
    }
    Ok(())
}

fn parse_hex<const N: usize>(raw: &str, what: &str) -> Result<[u8; N]> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    if digits.len() != N * 2 {
        return Err(AuditError::decode(format!(
            "{what} must be {} hex digits, got {}",
            N * 2,
            digits.len()
        )));
    }
    let mut out = [0_u8; N];
    for (slot, pair) in out.iter_mut().zip(digits.as_bytes().chunks_exact(2)) {
        let hi = hex_value(pair[0]);
        let lo = hex_value(pair[1]);
        match (hi, lo) {
            (Some(hi), Some(lo)) => *slot = (hi << 4) | lo,
            _ => {
                return Err(AuditError::decode(format!(
                    "{what} contains a non-hex digit: {raw}"
                )));
            }
        }
    }
    Ok(out)
}

const fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}
