//! Provider contexts - the two in-memory views of "who is signed in".
//!
//! ```text
//!   IDLE ──connect──► CONNECTING ──ok──► CONNECTED (own, seq = precedence)
//!    ▲                    │                  │
//!    │◄──────fail─────────┘                  │ disconnect / DISCONNECT
//!    │                                       ▼
//!    └──── syncAll CONNECT ◄──────────── DISCONNECTED
//!          (CONNECTED mirror, READ_ONLY, no seq)
//! ```
//!
//! A node's own connection carries the bus seq of the CONNECT it caused.
//! Mirrors carry none and are never authoritative.

pub mod extract;
mod injected;
mod smart_account;

pub use extract::{AddressResolver, AddressStrategy};
pub use injected::{InjectedWalletNode, UserGesture};
pub use smart_account::SmartAccountNode;

use async_trait::async_trait;
use serde::Serialize;

use crate::bus::{EventKind, Source, SyncEvent};
use crate::core::{Address, WalletResult};
use crate::session::{ProviderType, WalletSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodePhase {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    None,
    ReadOnly,
    Signing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub phase: NodePhase,
    pub address: Option<Address>,
    pub capability: Capability,
    /// Seq of this node's own user-initiated CONNECT.
    pub connect_seq: Option<u64>,
    /// Lost a conflict; adopts nothing until the user reconnects.
    pub needs_prompt: bool,
}

impl Default for NodeState {
    fn default() -> Self {
        Self { phase: NodePhase::Idle, address: None, capability: Capability::None, connect_seq: None, needs_prompt: false }
    }
}

impl NodeState {
    pub fn connected(&self) -> bool { self.phase == NodePhase::Connected && self.address.is_some() }

    pub fn own_connected(&self) -> bool { self.connected() && self.connect_seq.is_some() }

    pub fn is_mirror(&self) -> bool { self.connected() && self.connect_seq.is_none() }

    /// Would take a syncAll CONNECT for `address` right now.
    pub fn accepts_sync(&self) -> bool {
        self.phase != NodePhase::Connecting && !self.needs_prompt && !self.own_connected()
    }

    pub(crate) fn begin_connecting(&mut self) {
        self.phase = NodePhase::Connecting;
        self.needs_prompt = false;
    }

    pub(crate) fn own(&mut self, address: Address, capability: Capability, seq: u64) {
        self.phase = NodePhase::Connected;
        self.address = Some(address);
        self.capability = capability;
        self.connect_seq = Some(seq);
        self.needs_prompt = false;
    }

    pub(crate) fn reset(&mut self, phase: NodePhase) {
        self.phase = phase;
        self.address = None;
        self.capability = Capability::None;
        self.connect_seq = None;
        self.needs_prompt = false;
    }

    pub(crate) fn force_out(&mut self) {
        self.reset(NodePhase::Disconnected);
        self.needs_prompt = true;
    }

    /// Move to SIGNING for `address`. Refused while connecting, after a lost
    /// conflict, or when holding a different own connection.
    pub(crate) fn bind(&mut self, address: &Address) -> bool {
        if self.phase == NodePhase::Connecting || self.needs_prompt {
            return false;
        }
        if self.own_connected() && self.address.as_ref() != Some(address) {
            return false;
        }
        self.phase = NodePhase::Connected;
        self.address = Some(address.clone());
        self.capability = Capability::Signing;
        true
    }

    /// Replay a bus event. Returns true when the state changed.
    pub(crate) fn apply_sync(&mut self, event: &SyncEvent) -> bool {
        if self.phase == NodePhase::Connecting {
            return false;
        }
        match event.kind {
            EventKind::Disconnect => {
                let before = self.clone();
                let phase = if self.phase == NodePhase::Idle { NodePhase::Idle } else { NodePhase::Disconnected };
                self.reset(phase);
                self.needs_prompt = before.needs_prompt;
                *self != before
            }
            EventKind::Connect if event.flags.sync_all => {
                let Some(address) = event.address.as_ref() else { return false };
                if !self.accepts_sync() {
                    return false;
                }
                if self.is_mirror() && (self.address.as_ref() == Some(address) || !event.flags.force_update) {
                    return false;
                }
                self.phase = NodePhase::Connected;
                self.address = Some(address.clone());
                self.capability = Capability::ReadOnly;
                self.connect_seq = None;
                true
            }
            _ => false,
        }
    }
}

/// What the engine sees of a provider context.
#[async_trait]
pub trait ProviderNode: Send + Sync {
    fn label(&self) -> Source;

    fn state(&self) -> NodeState;

    /// Provider type a session persisted from this node's own connection gets.
    fn provider_type(&self) -> ProviderType;

    fn auth_artifact(&self) -> Option<String> { None }

    /// Still subscribed to the bus.
    fn is_mounted(&self) -> bool { true }

    /// Local reset after losing a conflict. Publishes nothing.
    fn force_disconnect(&self, reason: &str);

    /// Non-gesture capability source. `Ok(Some(address))` when a signer for
    /// the session's address can be bound without prompting.
    async fn restore_signer(&self, session: &WalletSession) -> WalletResult<Option<Address>>;

    fn bind_signer(&self, address: &Address) -> bool;
}

pub(crate) fn log_transition(label: Source, before: &NodeState, after: &NodeState) {
    if before.phase != after.phase || before.address != after.address || before.capability != after.capability {
        tracing::info!(
            node = label.as_str(),
            from = ?before.phase,
            to = ?after.phase,
            address = after.address.as_ref().map(|a| a.short()).unwrap_or_default(),
            capability = ?after.capability,
            "node transition"
        );
    }
}
