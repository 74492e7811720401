//! Injected-wallet context (node B): the legacy browser wallet.
//!
//! Connecting prompts the user, so it takes a `UserGesture`. Everything the
//! engine does with this node (restore, bind) goes through the silent
//! account query instead.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::{log_transition, Capability, NodePhase, NodeState, ProviderNode};
use crate::bus::{Bus, Source, Subscription, SyncEvent};
use crate::core::keys::rpc;
use crate::core::{Address, WalletError, WalletResult};
use crate::providers::{InjectedProvider, ProviderNotice};
use crate::session::{ProviderType, SessionStore, WalletSession};

/// Proof that a call originates from a user interaction. Only UI event
/// handlers should construct one.
#[derive(Debug, Clone)]
pub struct UserGesture {
    origin: &'static str,
}

impl UserGesture {
    pub fn from_ui_event(origin: &'static str) -> Self { Self { origin } }

    pub fn origin(&self) -> &'static str { self.origin }
}

struct Local {
    state: NodeState,
    chain_id: Option<String>,
}

struct InjectedInner {
    store: SessionStore,
    provider: Arc<dyn InjectedProvider>,
    local: Mutex<Local>,
    subscription: Mutex<Option<Subscription>>,
}

impl InjectedInner {
    fn local(&self) -> MutexGuard<'_, Local> {
        self.local.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn update(&self, f: impl FnOnce(&mut Local)) {
        let mut local = self.local();
        let before = local.state.clone();
        f(&mut local);
        log_transition(Source::Injected, &before, &local.state);
    }

    fn on_event(&self, event: &SyncEvent) {
        let mut local = self.local();
        let before = local.state.clone();
        if local.state.apply_sync(event) {
            log_transition(Source::Injected, &before, &local.state);
        }
    }
}

/// First acceptable address in an accounts array.
fn first_account(raw: &Value) -> Option<Address> {
    raw.as_array()?
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|s| Address::parse(s).ok())
        .find(|a| !a.is_denylisted())
}

fn parse_accounts(accounts: &[String]) -> Option<Address> {
    accounts.iter().filter_map(|s| Address::parse(s).ok()).find(|a| !a.is_denylisted())
}

fn is_rejection(err: &anyhow::Error) -> bool {
    let text = err.to_string().to_ascii_lowercase();
    text.contains("4001") || text.contains("reject") || text.contains("denied")
}

#[derive(Clone)]
pub struct InjectedWalletNode {
    inner: Arc<InjectedInner>,
}

impl InjectedWalletNode {
    pub fn new(store: SessionStore, provider: Arc<dyn InjectedProvider>) -> Self {
        let inner = Arc::new(InjectedInner {
            store,
            provider,
            local: Mutex::new(Local { state: NodeState::default(), chain_id: None }),
            subscription: Mutex::new(None),
        });
        let weak: Weak<InjectedInner> = Arc::downgrade(&inner);
        let sub = inner.store.bus().subscribe_all(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_event(event);
            }
        });
        *inner.subscription.lock().unwrap_or_else(|p| p.into_inner()) = Some(sub);
        Self { inner }
    }

    fn bus(&self) -> &Bus { self.inner.store.bus() }

    pub fn unmount(&self) {
        self.inner.subscription.lock().unwrap_or_else(|p| p.into_inner()).take();
    }

    pub fn chain_id(&self) -> Option<String> { self.inner.local().chain_id.clone() }

    /// Prompt for accounts. A rejection lands back in IDLE; nothing retries.
    pub async fn connect(&self, gesture: UserGesture) -> WalletResult<Address> {
        {
            let mut local = self.inner.local();
            if local.state.phase == NodePhase::Connecting {
                return Err(WalletError::Provider("injected connect already in flight".into()));
            }
            let before = local.state.clone();
            local.state.begin_connecting();
            log_transition(Source::Injected, &before, &local.state);
        }
        tracing::debug!(origin = gesture.origin(), "requesting injected accounts");

        let accounts = match self.inner.provider.request(rpc::REQUEST_ACCOUNTS).await {
            Ok(v) => v,
            Err(e) => {
                self.inner.update(|l| l.state.reset(NodePhase::Idle));
                if is_rejection(&e) {
                    tracing::info!("injected wallet request rejected");
                    return Err(WalletError::Rejected);
                }
                return Err(WalletError::Provider(format!("{}: {e}", rpc::REQUEST_ACCOUNTS)));
            }
        };
        let Some(address) = first_account(&accounts) else {
            self.inner.update(|l| l.state.reset(NodePhase::Idle));
            return Err(WalletError::Provider("wallet granted no usable account".into()));
        };
        let chain_id = match self.inner.provider.request(rpc::CHAIN_ID).await {
            Ok(Value::String(id)) => Some(id),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "chain id unavailable");
                None
            }
        };

        let seq = self.bus().publish(SyncEvent::connect(address.clone(), Source::Injected));
        self.inner.update(|l| {
            l.state.own(address.clone(), Capability::Signing, seq);
            l.chain_id = chain_id;
        });
        Ok(address)
    }

    /// Native wallet notification. Always ends with a SYNC_REQUEST so the
    /// engine re-checks identity.
    pub fn handle_notice(&self, notice: ProviderNotice) {
        match notice {
            ProviderNotice::AccountsChanged(accounts) => match parse_accounts(&accounts) {
                Some(address) => {
                    let switch = {
                        let local = self.inner.local();
                        local.state.own_connected() && local.state.address.as_ref() != Some(&address)
                    };
                    if switch {
                        let seq = self.bus().publish(SyncEvent::connect(address.clone(), Source::Injected));
                        self.inner.update(|l| l.state.own(address.clone(), Capability::Signing, seq));
                    }
                }
                None => self.inner.update(|l| l.state.reset(NodePhase::Disconnected)),
            },
            ProviderNotice::ChainChanged(id) => {
                tracing::info!(chain = %id, "injected chain changed");
                self.inner.local().chain_id = Some(id);
            }
            ProviderNotice::Disconnect => self.inner.update(|l| l.state.reset(NodePhase::Disconnected)),
        }
        let address = self.inner.local().state.address.clone();
        self.bus().publish(SyncEvent::sync_request(address, Source::Injected));
    }

    /// Local disconnect plus a full session clear. The wallet's grant is
    /// not revoked.
    pub fn disconnect(&self) -> WalletResult<()> {
        self.inner.update(|l| l.state.reset(NodePhase::Disconnected));
        self.inner.store.clear(Source::Injected)
    }
}

#[async_trait]
impl ProviderNode for InjectedWalletNode {
    fn label(&self) -> Source { Source::Injected }

    fn state(&self) -> NodeState { self.inner.local().state.clone() }

    fn provider_type(&self) -> ProviderType { ProviderType::Injected }

    fn is_mounted(&self) -> bool { self.inner.subscription.lock().unwrap_or_else(|p| p.into_inner()).is_some() }

    fn force_disconnect(&self, reason: &str) {
        tracing::info!(node = "injected", reason, "forced disconnect");
        self.inner.update(|l| l.state.force_out());
    }

    async fn restore_signer(&self, session: &WalletSession) -> WalletResult<Option<Address>> {
        let accounts = self.inner.provider.request(rpc::ACCOUNTS).await
            .map_err(|e| WalletError::CapabilityUpgrade(format!("{}: {e}", rpc::ACCOUNTS)))?;
        let granted = accounts
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .filter_map(|s| Address::parse(s).ok())
                    .any(|a| &a == session.address())
            })
            .unwrap_or(false);
        Ok(granted.then(|| session.address().clone()))
    }

    fn bind_signer(&self, address: &Address) -> bool {
        let mut bound = false;
        self.inner.update(|l| bound = l.state.bind(address));
        bound
    }
}
