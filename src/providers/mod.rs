//! Collaborator seams. Everything outside the session subsystem (the
//! smart-account SDK, the browser wallet, the OAuth hand-off) is reached
//! through these traits; hosts plug in real implementations, tests plug in
//! mocks.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use crate::core::Address;

/// What the smart-account SDK is asked to build.
#[derive(Clone, PartialEq, Eq)]
pub enum AccountRequest {
    /// Passkey ceremony, completes in place.
    Passkey,
    /// Exchange an OAuth artifact from the redirect callback.
    OAuth { artifact: String },
    /// Re-create a known account from its stored artifact without a gesture.
    Restore { address: Address, artifact: String },
}

impl AccountRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            AccountRequest::Passkey => "passkey",
            AccountRequest::OAuth { .. } => "oauth",
            AccountRequest::Restore { .. } => "restore",
        }
    }
}

impl fmt::Debug for AccountRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountRequest::Passkey => write!(f, "Passkey"),
            AccountRequest::OAuth { .. } => write!(f, "OAuth {{ .. }}"),
            AccountRequest::Restore { address, .. } => write!(f, "Restore {{ address: {address}, .. }}"),
        }
    }
}

/// SDK account object. `raw` is whatever shape the SDK version returns.
#[derive(Debug, Clone)]
pub struct AccountHandle {
    pub raw: Value,
    pub can_sign: bool,
}

#[async_trait]
pub trait SmartAccountSdk: Send + Sync {
    async fn create_account(&self, request: AccountRequest) -> Result<AccountHandle>;
}

/// Browser wallet (EIP-1193 style request surface).
#[async_trait]
pub trait InjectedProvider: Send + Sync {
    async fn request(&self, method: &str) -> Result<Value>;
}

/// Native notifications from the injected wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderNotice {
    AccountsChanged(Vec<String>),
    ChainChanged(String),
    Disconnect,
}

/// Full-page OAuth hand-off. Returning means the navigation was issued;
/// nothing in memory survives it.
#[async_trait]
pub trait OAuthRedirect: Send + Sync {
    async fn sign_in_with_redirect(&self, state: &str) -> Result<()>;
}

/// Query parameters the callback route receives after the redirect.
#[derive(Clone, PartialEq, Eq)]
pub struct RedirectCallback {
    pub state: String,
    pub token: String,
}

impl fmt::Debug for RedirectCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectCallback")
            .field("state", &self.state)
            .field("token", &crate::session::fingerprint(&self.token))
            .finish()
    }
}
