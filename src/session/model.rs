//! Persisted session record and pending-redirect marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::core::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderType {
    #[serde(rename = "PASSKEY")]
    Passkey,
    #[serde(rename = "OAUTH")]
    OAuth,
    #[serde(rename = "INJECTED")]
    Injected,
    #[serde(rename = "NONE")]
    None,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Passkey => "PASSKEY",
            ProviderType::OAuth => "OAUTH",
            ProviderType::Injected => "INJECTED",
            ProviderType::None => "NONE",
        }
    }
}

/// The single persisted session. `address` never changes for the lifetime of
/// a record; a different identity is a different session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSession {
    address: Address,
    provider_type: ProviderType,
    auth_artifact: Option<String>,
    transaction_capable: bool,
    needs_upgrade: bool,
    created_at: DateTime<Utc>,
}

impl WalletSession {
    pub fn new(address: Address, provider_type: ProviderType, transaction_capable: bool) -> Self {
        let needs_upgrade = !transaction_capable && provider_type == ProviderType::OAuth;
        Self { address, provider_type, auth_artifact: None, transaction_capable, needs_upgrade, created_at: Utc::now() }
    }

    /// Passkey flow always yields a capable signer.
    pub fn passkey(address: Address) -> Self { Self::new(address, ProviderType::Passkey, true) }

    /// OAuth handshake alone is read-only; an upgrade is owed.
    pub fn oauth(address: Address, artifact: impl Into<String>) -> Self {
        Self::new(address, ProviderType::OAuth, false).with_artifact(artifact)
    }

    pub fn injected(address: Address) -> Self { Self::new(address, ProviderType::Injected, true) }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self { self.auth_artifact = Some(artifact.into()); self }
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self { self.created_at = at; self }

    pub fn address(&self) -> &Address { &self.address }
    pub fn provider_type(&self) -> ProviderType { self.provider_type }
    pub fn auth_artifact(&self) -> Option<&str> { self.auth_artifact.as_deref() }
    pub fn transaction_capable(&self) -> bool { self.transaction_capable }
    pub fn needs_upgrade(&self) -> bool { self.needs_upgrade }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

    /// Read-only OAuth session with an upgrade still owed.
    pub fn upgrade_owed(&self) -> bool {
        self.needs_upgrade && !self.transaction_capable && self.provider_type == ProviderType::OAuth
    }

    pub(crate) fn mark_capable(&mut self) {
        self.transaction_capable = true;
        self.needs_upgrade = false;
    }

    /// Fold a new write for the same address into this one: capability is
    /// monotonic and the session keeps its birth time.
    pub(crate) fn merge_into(mut self, existing: &WalletSession) -> Self {
        if existing.address != self.address {
            return self;
        }
        if existing.transaction_capable {
            self.mark_capable();
        }
        if self.auth_artifact.is_none() {
            self.auth_artifact = existing.auth_artifact.clone();
        }
        self.created_at = existing.created_at;
        self
    }
}

impl fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletSession")
            .field("address", &self.address)
            .field("provider_type", &self.provider_type)
            .field("auth_artifact", &self.auth_artifact.as_deref().map(fingerprint))
            .field("transaction_capable", &self.transaction_capable)
            .field("needs_upgrade", &self.needs_upgrade)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Written before the OAuth hand-off; the callback page consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRedirect {
    pub state: String,
    pub provider_type: ProviderType,
    pub created_at: DateTime<Utc>,
}

impl PendingRedirect {
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        age.to_std().map(|age| age > ttl).unwrap_or(false)
    }
}

/// Short, non-reversible tag for an opaque token. Tokens never hit the logs.
pub fn fingerprint(secret: &str) -> String {
    blake3::hash(secret.as_bytes()).to_hex()[..12].to_string()
}
