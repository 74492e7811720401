//! SyncEvent - the one message type on the bus.

use serde::{Deserialize, Serialize};

use crate::core::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Connect,
    Disconnect,
    SyncRequest,
}

/// Who published. Doubles as the loop-prevention origin marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    SmartAccount,
    Injected,
    Engine,
    External,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::SmartAccount => "smart_account",
            Source::Injected => "injected",
            Source::Engine => "engine",
            Source::External => "external",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFlags {
    /// A node already mirroring a different address replaces it.
    pub force_update: bool,
    /// Every node not holding its own connection adopts the address.
    pub sync_all: bool,
    /// The session at `address` just became transaction capable.
    pub reconnect_for_capability: bool,
}

impl EventFlags {
    pub fn sync_all() -> Self { Self { sync_all: true, ..Default::default() } }
    pub fn forced() -> Self { Self { sync_all: true, force_update: true, ..Default::default() } }
    pub fn capability() -> Self { Self { reconnect_for_capability: true, ..Default::default() } }
}

/// Immutable once published; `seq` is stamped by the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub kind: EventKind,
    pub address: Option<Address>,
    pub source_provider: Source,
    pub flags: EventFlags,
    pub seq: u64,
}

impl SyncEvent {
    pub fn connect(address: Address, source: Source) -> Self {
        Self { kind: EventKind::Connect, address: Some(address), source_provider: source, flags: EventFlags::default(), seq: 0 }
    }

    pub fn disconnect(source: Source) -> Self {
        Self { kind: EventKind::Disconnect, address: None, source_provider: source, flags: EventFlags::default(), seq: 0 }
    }

    pub fn sync_request(address: Option<Address>, source: Source) -> Self {
        Self { kind: EventKind::SyncRequest, address, source_provider: source, flags: EventFlags::default(), seq: 0 }
    }

    pub fn with_flags(mut self, flags: EventFlags) -> Self { self.flags = flags; self }

    pub fn is_connect(&self) -> bool { self.kind == EventKind::Connect }
}

/// User-facing notices (toasts). Only these two failures interrupt the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserNotice {
    AddressResolutionFailed { reason: String },
    ConflictingIdentity { kept: Address, dropped: Address, reconnect: Source },
}
