//! Storage keys and environment names
//!
//! Centralized registry so the session store stays the only owner of the
//! persisted layout.

/// Persisted record keys
pub mod storage {
    pub const SESSION: &str = "wallet-session";
    pub const PENDING_REDIRECT: &str = "oauth-pending";

    pub const ALL: &[&str] = &[SESSION, PENDING_REDIRECT];
}

/// Injected-wallet RPC methods
pub mod rpc {
    /// Prompts the user; needs a gesture.
    pub const REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
    /// Silent; returns already-granted accounts.
    pub const ACCOUNTS: &str = "eth_accounts";
    pub const CHAIN_ID: &str = "eth_chainId";
}

/// Environment overrides
pub mod env {
    pub const ROOT: &str = "WALLETSYNC_ROOT";
    pub const APP: &str = "WALLETSYNC_APP";
    pub const LOG_JSON: &str = "WALLETSYNC_LOG_JSON";
    pub const DEBOUNCE_MS: &str = "WALLETSYNC_DEBOUNCE_MS";
    pub const POLL_MS: &str = "WALLETSYNC_POLL_MS";
    pub const UPGRADE_ATTEMPTS: &str = "WALLETSYNC_UPGRADE_ATTEMPTS";
    pub const UPGRADE_TIMEOUT_MS: &str = "WALLETSYNC_UPGRADE_TIMEOUT_MS";
    pub const PENDING_TTL_SECS: &str = "WALLETSYNC_PENDING_TTL_SECS";
}
