//! Smart-account context (node A): passkey or OAuth-redirect sign-in.
//!
//! The OAuth path cannot keep anything in memory across the redirect. It
//! writes a pending marker, navigates away, and `complete_redirect` on the
//! next page load picks up from the marker plus the callback parameters.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::{log_transition, AddressResolver, Capability, NodePhase, NodeState, ProviderNode};
use crate::bus::{Bus, Source, Subscription, SyncEvent, UserNotice};
use crate::core::{Address, WalletError, WalletResult};
use crate::providers::{AccountRequest, OAuthRedirect, RedirectCallback, SmartAccountSdk};
use crate::session::{fingerprint, ProviderType, SessionStore, WalletSession};

struct Local {
    state: NodeState,
    provider_type: ProviderType,
    artifact: Option<String>,
}

struct SmartInner {
    store: SessionStore,
    sdk: Arc<dyn SmartAccountSdk>,
    redirect: Arc<dyn OAuthRedirect>,
    resolver: AddressResolver,
    local: Mutex<Local>,
    subscription: Mutex<Option<Subscription>>,
}

impl SmartInner {
    fn local(&self) -> MutexGuard<'_, Local> {
        self.local.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn update(&self, f: impl FnOnce(&mut Local)) {
        let mut local = self.local();
        let before = local.state.clone();
        f(&mut local);
        log_transition(Source::SmartAccount, &before, &local.state);
    }

    fn on_event(&self, event: &SyncEvent) {
        let mut local = self.local();
        let before = local.state.clone();
        if local.state.apply_sync(event) {
            if !local.state.connected() {
                local.artifact = None;
                local.provider_type = ProviderType::None;
            }
            log_transition(Source::SmartAccount, &before, &local.state);
        }
    }
}

#[derive(Clone)]
pub struct SmartAccountNode {
    inner: Arc<SmartInner>,
}

impl SmartAccountNode {
    /// Mount the context: subscribe to the bus and drop a stale redirect marker.
    pub fn new(store: SessionStore, sdk: Arc<dyn SmartAccountSdk>, redirect: Arc<dyn OAuthRedirect>) -> Self {
        Self::with_resolver(store, sdk, redirect, AddressResolver::default())
    }

    pub fn with_resolver(
        store: SessionStore,
        sdk: Arc<dyn SmartAccountSdk>,
        redirect: Arc<dyn OAuthRedirect>,
        resolver: AddressResolver,
    ) -> Self {
        let inner = Arc::new(SmartInner {
            store,
            sdk,
            redirect,
            resolver,
            local: Mutex::new(Local { state: NodeState::default(), provider_type: ProviderType::None, artifact: None }),
            subscription: Mutex::new(None),
        });
        let weak: Weak<SmartInner> = Arc::downgrade(&inner);
        let sub = inner.store.bus().subscribe_all(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_event(event);
            }
        });
        *inner.subscription.lock().unwrap_or_else(|p| p.into_inner()) = Some(sub);

        // Expired markers are deleted on read.
        if inner.store.pending_redirect().is_some() {
            tracing::info!("smart account mounted with a redirect in flight");
        }
        Self { inner }
    }

    fn bus(&self) -> &Bus { self.inner.store.bus() }

    /// Stop replaying bus events.
    pub fn unmount(&self) {
        self.inner.subscription.lock().unwrap_or_else(|p| p.into_inner()).take();
    }

    pub fn has_pending_redirect(&self) -> bool { self.inner.store.pending_redirect().is_some() }

    fn begin_connecting(&self) -> WalletResult<()> {
        let mut local = self.inner.local();
        if local.state.phase == NodePhase::Connecting {
            return Err(WalletError::Provider("smart account connect already in flight".into()));
        }
        let before = local.state.clone();
        local.state.begin_connecting();
        log_transition(Source::SmartAccount, &before, &local.state);
        Ok(())
    }

    fn fail(&self, err: WalletError) -> WalletError {
        self.inner.update(|l| l.state.reset(NodePhase::Idle));
        if let WalletError::AddressResolution(reason) = &err {
            self.bus().notify_user(UserNotice::AddressResolutionFailed { reason: reason.clone() });
        }
        tracing::warn!(error = %err, "smart account connect failed");
        err
    }

    /// Passkey ceremony. Completes in place with a signing-capable session.
    pub async fn connect_passkey(&self) -> WalletResult<Address> {
        self.begin_connecting()?;
        let handle = match self.inner.sdk.create_account(AccountRequest::Passkey).await {
            Ok(h) => h,
            Err(e) => return Err(self.fail(WalletError::Provider(format!("passkey: {e}")))),
        };
        let address = match self.inner.resolver.resolve(&handle.raw) {
            Ok(a) => a,
            Err(e) => return Err(self.fail(e)),
        };
        let seq = match self.inner.store.save(WalletSession::passkey(address.clone()), Source::SmartAccount) {
            Ok(seq) => seq,
            Err(e) => return Err(self.fail(e)),
        };
        self.inner.update(|l| {
            l.state.own(address.clone(), Capability::Signing, seq);
            l.provider_type = ProviderType::Passkey;
            l.artifact = None;
        });
        Ok(address)
    }

    /// Start the OAuth hand-off. On success the page is navigating away and
    /// the node stays CONNECTING until it is dropped.
    pub async fn connect_oauth(&self) -> WalletResult<()> {
        self.begin_connecting()?;
        let marker = match self.inner.store.begin_redirect(ProviderType::OAuth) {
            Ok(m) => m,
            Err(e) => return Err(self.fail(e)),
        };
        if let Err(e) = self.inner.redirect.sign_in_with_redirect(&marker.state).await {
            self.inner.store.discard_redirect();
            return Err(self.fail(WalletError::Provider(format!("oauth redirect: {e}"))));
        }
        tracing::info!("oauth redirect issued");
        Ok(())
    }

    /// Callback route after the redirect. Lands CONNECTED read-only with an
    /// upgrade owed.
    pub async fn complete_redirect(&self, callback: RedirectCallback) -> WalletResult<Address> {
        let Some(marker) = self.inner.store.take_pending_redirect() else {
            return Err(WalletError::RedirectAbandoned("no live redirect marker".into()));
        };
        if marker.state != callback.state {
            tracing::warn!("redirect state mismatch, ignoring callback");
            return Err(WalletError::RedirectStateMismatch);
        }
        self.inner.update(|l| l.state.begin_connecting());

        let request = AccountRequest::OAuth { artifact: callback.token.clone() };
        let handle = match self.inner.sdk.create_account(request).await {
            Ok(h) => h,
            Err(e) => return Err(self.fail(WalletError::Provider(format!("oauth exchange: {e}")))),
        };
        let address = match self.inner.resolver.resolve(&handle.raw) {
            Ok(a) => a,
            Err(e) => return Err(self.fail(e)),
        };
        let session = WalletSession::oauth(address.clone(), callback.token.clone());
        let seq = match self.inner.store.save(session, Source::SmartAccount) {
            Ok(seq) => seq,
            Err(e) => return Err(self.fail(e)),
        };
        tracing::info!(address = %address.short(), artifact = %fingerprint(&callback.token), "oauth redirect completed");
        self.inner.update(|l| {
            l.state.own(address.clone(), Capability::ReadOnly, seq);
            l.provider_type = ProviderType::OAuth;
            l.artifact = Some(callback.token);
        });
        Ok(address)
    }

    /// Full disconnect: local state and the persisted session.
    pub fn disconnect(&self) -> WalletResult<()> {
        self.inner.update(|l| {
            l.state.reset(NodePhase::Disconnected);
            l.provider_type = ProviderType::None;
            l.artifact = None;
        });
        self.inner.store.clear(Source::SmartAccount)
    }
}

#[async_trait]
impl ProviderNode for SmartAccountNode {
    fn label(&self) -> Source { Source::SmartAccount }

    fn state(&self) -> NodeState { self.inner.local().state.clone() }

    fn provider_type(&self) -> ProviderType { self.inner.local().provider_type }

    fn is_mounted(&self) -> bool { self.inner.subscription.lock().unwrap_or_else(|p| p.into_inner()).is_some() }

    fn auth_artifact(&self) -> Option<String> { self.inner.local().artifact.clone() }

    fn force_disconnect(&self, reason: &str) {
        tracing::info!(node = "smart_account", reason, "forced disconnect");
        self.inner.update(|l| {
            l.state.force_out();
            l.provider_type = ProviderType::None;
            l.artifact = None;
        });
    }

    async fn restore_signer(&self, session: &WalletSession) -> WalletResult<Option<Address>> {
        let artifact = match session.auth_artifact() {
            Some(a) => a.to_string(),
            None => match self.auth_artifact() {
                Some(a) => a,
                None => return Ok(None),
            },
        };
        let request = AccountRequest::Restore { address: session.address().clone(), artifact };
        let handle = self.inner.sdk.create_account(request).await
            .map_err(|e| WalletError::CapabilityUpgrade(format!("restore: {e}")))?;
        if !handle.can_sign {
            return Ok(None);
        }
        let address = self.inner.resolver.resolve(&handle.raw)?;
        if &address != session.address() {
            tracing::warn!(restored = %address.short(), session = %session.address().short(), "restored account has another address");
            return Ok(None);
        }
        Ok(Some(address))
    }

    fn bind_signer(&self, address: &Address) -> bool {
        let mut bound = false;
        self.inner.update(|l| {
            bound = l.state.bind(address);
            if bound && l.provider_type == ProviderType::None {
                l.provider_type = ProviderType::OAuth;
            }
        });
        bound
    }
}
