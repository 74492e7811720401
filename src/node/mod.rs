//! WalletSync - one handle over bus, store, both contexts and the engine
//!
//! ```text
//! WalletSync (entry point)
//!   │
//!   ├── Bus ◄──────────── every transition publishes here
//!   ├── SessionStore ──── KvStore (file or memory)
//!   ├── SmartAccountNode ─ SmartAccountSdk + OAuthRedirect
//!   ├── InjectedWalletNode ─ InjectedProvider
//!   └── Engine ────────── driven by ReconcileService
//! ```

mod config;

pub use config::{
    SyncConfig, DEFAULT_DEBOUNCE_MS, DEFAULT_PENDING_TTL_SECS, DEFAULT_POLL_MS, DEFAULT_TICK_MS,
    DEFAULT_UPGRADE_ATTEMPTS, DEFAULT_UPGRADE_TIMEOUT_MS,
};

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::bus::{Bus, Source};
use crate::clock::ReconcileService;
use crate::context::{InjectedWalletNode, ProviderNode, SmartAccountNode};
use crate::core::WalletResult;
use crate::engine::Engine;
use crate::providers::{InjectedProvider, OAuthRedirect, SmartAccountSdk};
use crate::session::{SessionStore, WalletSession};
use crate::store::{FileKv, KvStore};

/// Host-supplied implementations of the external collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub sdk: Arc<dyn SmartAccountSdk>,
    pub redirect: Arc<dyn OAuthRedirect>,
    pub injected: Arc<dyn InjectedProvider>,
}

#[derive(Clone)]
pub struct WalletSync {
    config: SyncConfig,
    store: SessionStore,
    smart: SmartAccountNode,
    injected: InjectedWalletNode,
    engine: Engine,
}

impl WalletSync {
    /// File-backed store under the app's data dir, process-wide bus.
    pub fn from_config(config: SyncConfig, collaborators: Collaborators) -> WalletResult<Self> {
        let kv = Arc::new(FileKv::open(&config.app)?);
        Ok(Self::assemble(config, kv, Bus::global().clone(), collaborators))
    }

    pub fn assemble(config: SyncConfig, kv: Arc<dyn KvStore>, bus: Bus, collaborators: Collaborators) -> Self {
        let store = SessionStore::with_pending_ttl(kv, bus, config.pending_ttl());
        let smart = SmartAccountNode::new(store.clone(), collaborators.sdk, collaborators.redirect);
        let injected = InjectedWalletNode::new(store.clone(), collaborators.injected);
        let nodes: Vec<Arc<dyn ProviderNode>> = vec![Arc::new(smart.clone()), Arc::new(injected.clone())];
        let engine = Engine::new(store.clone(), nodes, config.clone());
        Self { config, store, smart, injected, engine }
    }

    pub fn config(&self) -> &SyncConfig { &self.config }
    pub fn bus(&self) -> &Bus { self.store.bus() }
    pub fn store(&self) -> &SessionStore { &self.store }
    pub fn smart_account(&self) -> &SmartAccountNode { &self.smart }
    pub fn injected(&self) -> &InjectedWalletNode { &self.injected }
    pub fn engine(&self) -> &Engine { &self.engine }

    pub fn session(&self) -> Option<WalletSession> { self.store.load() }

    /// Drive the engine in the background until `shutdown` fires.
    pub fn start(&self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        ReconcileService::new(self.engine.clone(), self.config.tick()).spawn(shutdown)
    }

    /// Sign out everywhere: the store is cleared and every context resets.
    pub fn disconnect(&self) -> WalletResult<()> {
        self.store.clear(Source::External)
    }
}
