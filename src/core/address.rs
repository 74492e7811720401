//! Address - lower-case normalized 20-byte hex identity.
//!
//! Once a session holds an `Address` it is the canonical identity; the
//! denylist keeps well-known non-user contracts from ever becoming one.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{WalletError, WalletResult};

/// Known non-user addresses: zero, burn, ERC-4337 entry points v0.6/v0.7,
/// the deterministic deployment proxy and Multicall3.
pub const DENYLIST: &[&str] = &[
    "0x0000000000000000000000000000000000000000",
    "0x000000000000000000000000000000000000dead",
    "0x5ff137d4b0fdcd49dca30c7cf57e578a026d2789",
    "0x0000000071727de22e5e9d8baf0edac6f37da032",
    "0x4e59b44847b379578588920ca78fbf26c0b4956c",
    "0xca11bde05977b3631167028862be2a173976ca11",
];

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> WalletResult<Self> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| WalletError::InvalidAddress(format!("missing 0x prefix: {trimmed}")))?;
        if body.len() != 40 {
            return Err(WalletError::InvalidAddress(format!("expected 40 hex chars, got {}", body.len())));
        }
        hex::decode(body).map_err(|e| WalletError::InvalidAddress(format!("{trimmed}: {e}")))?;
        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str { &self.0 }

    pub fn is_zero(&self) -> bool { self.0[2..].bytes().all(|b| b == b'0') }

    pub fn is_denylisted(&self) -> bool { DENYLIST.contains(&self.0.as_str()) }

    /// `0xabcd..1234`, for logs.
    pub fn short(&self) -> String {
        format!("{}..{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl TryFrom<String> for Address {
    type Error = WalletError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::parse(&value) }
}

impl From<Address> for String {
    fn from(a: Address) -> Self { a.0 }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Address({})", self.0) }
}
