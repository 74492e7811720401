//! Error taxonomy for the session subsystem.
//!
//! Only `AddressResolution` and `ConflictingIdentity` ever reach the user as a
//! notice. Everything else degrades to "connected, read-only".

use thiserror::Error;

pub type WalletResult<T> = Result<T, WalletError>;

#[derive(Error, Debug)]
pub enum WalletError {
    /// No extraction strategy produced an acceptable user address.
    #[error("address resolution failed: {0}")]
    AddressResolution(String),

    /// An upgrade attempt threw or timed out.
    #[error("capability upgrade failed: {0}")]
    CapabilityUpgrade(String),

    #[error("conflicting identity: kept {kept}, dropped {dropped}")]
    ConflictingIdentity { kept: String, dropped: String },

    #[error("persisted record corrupt: {0}")]
    PersistenceCorruption(String),

    /// Pending redirect marker missing or older than its TTL.
    #[error("redirect abandoned: {0}")]
    RedirectAbandoned(String),

    #[error("redirect state mismatch")]
    RedirectStateMismatch,

    #[error("user rejected the request")]
    Rejected,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for WalletError {
    fn from(e: std::io::Error) -> Self {
        WalletError::Storage(e.to_string())
    }
}
