//! Proxy signer - server-held credential for sponsored transactions.
//!
//! Never a stand-in for the user's identity. The engine only asks whether it
//! is ready; when it is, read-only sessions need no upgrade.

use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub struct ProxySigner {
    credential: String,
}

impl ProxySigner {
    pub fn new(credential: impl Into<String>) -> Self {
        Self { credential: credential.into() }
    }

    pub fn is_ready(&self) -> bool { !self.credential.trim().is_empty() }

    pub fn credential(&self) -> &str { &self.credential }
}

impl fmt::Debug for ProxySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySigner")
            .field("credential", &"<redacted>")
            .field("ready", &self.is_ready())
            .finish()
    }
}
