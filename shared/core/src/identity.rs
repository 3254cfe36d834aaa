use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentityParseError {
    #[error("wallet address {0:?} is not 0x followed by 40 hex digits")]
    Address(String),
    #[error("transaction hash {0:?} is not 0x followed by 64 hex digits")]
    TxHash(String),
}

/// Application-level user, as handed to us by the session source.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user#{}", self.0)
    }
}

impl From<UserId> for u64 {
    fn from(user_id: UserId) -> Self {
        user_id.0
    }
}

fn is_hex_with_prefix(s: &str, digits: usize) -> bool {
    s.len() == digits + 2
        && (s.starts_with("0x") || s.starts_with("0X"))
        && s[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// An account on the escrow chain.
///
/// Comparison and hashing ignore ASCII case, so a checksummed address and its
/// lowercase form are the same account. The spelling used to construct the
/// address is kept for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 20 address bytes as lowercase hex, without the `0x` prefix.
    pub fn hex_digits(&self) -> String {
        self.0[2..].to_ascii_lowercase()
    }
}

impl FromStr for WalletAddress {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if is_hex_with_prefix(s, 40) {
            Ok(Self(s.to_string()))
        } else {
            Err(IdentityParseError::Address(s.to_string()))
        }
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = IdentityParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WalletAddress> for String {
    fn from(address: WalletAddress) -> Self {
        address.0
    }
}

impl PartialEq for WalletAddress {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for WalletAddress {}

impl Hash for WalletAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash(String);

impl TxHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TxHash {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if is_hex_with_prefix(s, 64) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(IdentityParseError::TxHash(s.to_string()))
        }
    }
}

impl TryFrom<String> for TxHash {
    type Error = IdentityParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TxHash> for String {
    fn from(hash: TxHash) -> Self {
        hash.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
