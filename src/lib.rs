//! walletsync: one wallet session out of three loosely coupled sources.
//!
//! # Architecture
//!
//! ```text
//! WalletSync (entry point)
//!   │
//!   ├── SmartAccountNode (A) ── passkey / OAuth redirect ──┐
//!   ├── InjectedWalletNode (B) ── browser wallet ──────────┤ transitions
//!   │                                                      ▼
//!   ├── Bus ── CONNECT / DISCONNECT / SYNC_REQUEST, seq-stamped, + global flags
//!   │                                                      │
//!   ├── SessionStore ── persisted record, survives reload  │
//!   │                                                      ▼
//!   └── Engine ── debounced passes, poll backstop, bounded upgrade retries
//!         └── ReconcileService (tokio) advances its logical clock
//! ```
//!
//! # Sources
//!
//! | Source | Connects by | Capability |
//! |--------|-------------|------------|
//! | Smart account, passkey | SDK ceremony in place | signing |
//! | Smart account, OAuth | full-page redirect + callback | read-only until upgraded |
//! | Injected wallet | user gesture prompt | signing |
//! | Session store | whatever wrote it last | `transactionCapable` |
//!
//! # Usage
//!
//! ```ignore
//! use walletsync::{Collaborators, Shutdown, SyncConfig, WalletSync};
//!
//! let sync = WalletSync::from_config(SyncConfig::from_env(), collaborators)?;
//! let shutdown = Shutdown::new();
//! let _driver = sync.start(shutdown.subscribe());
//!
//! // OAuth callback route after the redirect
//! sync.smart_account().complete_redirect(callback).await?;
//!
//! // UI: read-only subscription
//! let mut events = sync.bus().watch();
//! ```

pub mod bus;
pub mod clock;
pub mod context;
pub mod core;
pub mod engine;
pub mod logging;
pub mod node;
pub mod providers;
pub mod proxy;
pub mod runtime;
pub mod session;
pub mod store;

pub use bus::{Bus, EventFlags, EventKind, Source, Subscription, SyncEvent, UserNotice};
pub use clock::{start_reconciler, ReconcileService};
pub use context::{
    Capability, InjectedWalletNode, NodePhase, NodeState, ProviderNode, SmartAccountNode, UserGesture,
};
pub use core::{Address, WalletError, WalletResult};
pub use engine::{Action, Engine, PassReport, Trigger};
pub use node::{Collaborators, SyncConfig, WalletSync};
pub use providers::{
    AccountHandle, AccountRequest, InjectedProvider, OAuthRedirect, ProviderNotice, RedirectCallback,
    SmartAccountSdk,
};
pub use proxy::ProxySigner;
pub use runtime::Shutdown;
pub use session::{PendingRedirect, ProviderType, SessionStore, WalletSession};
pub use store::{FileKv, KvStore, MemoryKv};
