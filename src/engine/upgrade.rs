//! Read-only to signing upgrade attempts.
//!
//! One attempt asks each capability source in order (smart account first,
//! then the injected wallet) without prompting. The whole attempt is capped
//! by a timeout; running out counts as a failure.

use std::sync::Arc;
use std::time::Duration;

use crate::context::ProviderNode;
use crate::core::{Address, WalletError};
use crate::session::WalletSession;

/// Bookkeeping between clears.
#[derive(Debug, Default)]
pub(crate) struct UpgradeBudget {
    /// Store epoch this budget belongs to.
    pub epoch: u64,
    pub attempts: u32,
    /// Logical time before which no new attempt starts.
    pub not_before_ms: u64,
    pub in_flight: bool,
    pub result: Option<UpgradeResult>,
}

impl UpgradeBudget {
    pub fn reset(&mut self, epoch: u64) {
        *self = Self { epoch, ..Self::default() };
    }
}

#[derive(Debug)]
pub(crate) struct UpgradeResult {
    pub epoch: u64,
    pub address: Address,
    pub attempt: u32,
    /// Index of the node that can bind a signer, or why none could.
    pub outcome: Result<usize, WalletError>,
}

pub(crate) async fn attempt(
    nodes: Vec<Arc<dyn ProviderNode>>,
    session: WalletSession,
    timeout: Duration,
) -> Result<usize, WalletError> {
    let sources = async {
        let mut last = WalletError::CapabilityUpgrade("no capability source available".into());
        for (i, node) in nodes.iter().enumerate() {
            match node.restore_signer(&session).await {
                Ok(Some(address)) if &address == session.address() => return Ok(i),
                Ok(_) => {
                    tracing::debug!(node = node.label().as_str(), "no signer from source");
                }
                Err(e) => {
                    tracing::debug!(node = node.label().as_str(), error = %e, "capability source failed");
                    last = e;
                }
            }
        }
        Err(last)
    };
    match tokio::time::timeout(timeout, sources).await {
        Ok(result) => result,
        Err(_) => Err(WalletError::CapabilityUpgrade(format!("attempt timed out after {}ms", timeout.as_millis()))),
    }
}
