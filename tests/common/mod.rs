#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

use walletsync::core::keys::rpc;
use walletsync::{
    AccountHandle, AccountRequest, Address, Bus, Collaborators, InjectedProvider, MemoryKv, OAuthRedirect,
    PassReport, SessionStore, SmartAccountSdk, SyncConfig, UserNotice, WalletSession, WalletSync,
};

/// `addr("aa")` is `0xaaaa...aa`.
pub fn addr(byte: &str) -> Address {
    Address::parse(&format!("0x{}", byte.repeat(20))).expect("test address")
}

#[derive(Default)]
pub struct MockSdk {
    pub account: Mutex<Value>,
    pub restore_can_sign: AtomicBool,
    pub restore_fails: AtomicBool,
    pub restore_gate: Mutex<Option<Arc<Notify>>>,
    pub restore_calls: AtomicUsize,
    pub requests: Mutex<Vec<&'static str>>,
}

impl MockSdk {
    pub fn returning(account: Value) -> Self {
        let sdk = Self::default();
        *sdk.account.lock().unwrap() = account;
        sdk.restore_can_sign.store(true, Ordering::SeqCst);
        sdk
    }

    pub fn set_account(&self, account: Value) {
        *self.account.lock().unwrap() = account;
    }

    /// Hold every restore until the returned handle is notified.
    pub fn gate_restores(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.restore_gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl SmartAccountSdk for MockSdk {
    async fn create_account(&self, request: AccountRequest) -> Result<AccountHandle> {
        self.requests.lock().unwrap().push(request.kind());
        match request {
            AccountRequest::Passkey | AccountRequest::OAuth { .. } => {
                Ok(AccountHandle { raw: self.account.lock().unwrap().clone(), can_sign: true })
            }
            AccountRequest::Restore { address, .. } => {
                self.restore_calls.fetch_add(1, Ordering::SeqCst);
                let gate = self.restore_gate.lock().unwrap().clone();
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                if self.restore_fails.load(Ordering::SeqCst) {
                    return Err(anyhow!("bundler unavailable"));
                }
                Ok(AccountHandle {
                    raw: json!({ "account": { "address": address.as_str() } }),
                    can_sign: self.restore_can_sign.load(Ordering::SeqCst),
                })
            }
        }
    }
}

#[derive(Default)]
pub struct MockRedirect {
    pub states: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl MockRedirect {
    pub fn last_state(&self) -> Option<String> {
        self.states.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl OAuthRedirect for MockRedirect {
    async fn sign_in_with_redirect(&self, state: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("popup blocked"));
        }
        self.states.lock().unwrap().push(state.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockWallet {
    pub accounts: Mutex<Vec<String>>,
    pub granted: Mutex<Vec<String>>,
    pub reject: AtomicBool,
    pub methods: Mutex<Vec<String>>,
}

impl MockWallet {
    pub fn with_account(address: &Address) -> Self {
        let wallet = Self::default();
        wallet.accounts.lock().unwrap().push(address.to_string());
        wallet
    }

    pub fn set_accounts(&self, accounts: &[&Address]) {
        *self.accounts.lock().unwrap() = accounts.iter().map(|a| a.to_string()).collect();
    }
}

#[async_trait]
impl InjectedProvider for MockWallet {
    async fn request(&self, method: &str) -> Result<Value> {
        self.methods.lock().unwrap().push(method.to_string());
        match method {
            rpc::REQUEST_ACCOUNTS => {
                if self.reject.load(Ordering::SeqCst) {
                    return Err(anyhow!("User rejected the request. (4001)"));
                }
                let accounts = self.accounts.lock().unwrap().clone();
                *self.granted.lock().unwrap() = accounts.clone();
                Ok(json!(accounts))
            }
            rpc::ACCOUNTS => Ok(json!(self.granted.lock().unwrap().clone())),
            rpc::CHAIN_ID => Ok(json!("0x1")),
            other => Err(anyhow!("unsupported method {other}")),
        }
    }
}

pub struct Harness {
    pub sync: WalletSync,
    pub kv: Arc<MemoryKv>,
    pub sdk: Arc<MockSdk>,
    pub redirect: Arc<MockRedirect>,
    pub wallet: Arc<MockWallet>,
    pub notices: broadcast::Receiver<UserNotice>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(Arc::new(MemoryKv::new()), SyncConfig::new("test"), MockSdk::returning(json!({})), MockWallet::default())
    }

    /// Fresh page load over an existing store.
    pub fn reload(kv: Arc<MemoryKv>) -> Self {
        Self::build(kv, SyncConfig::new("test"), MockSdk::returning(json!({})), MockWallet::default())
    }

    pub fn build(kv: Arc<MemoryKv>, config: SyncConfig, sdk: MockSdk, wallet: MockWallet) -> Self {
        let sdk = Arc::new(sdk);
        let redirect = Arc::new(MockRedirect::default());
        let wallet = Arc::new(wallet);
        let collaborators = Collaborators { sdk: sdk.clone(), redirect: redirect.clone(), injected: wallet.clone() };
        let sync = WalletSync::assemble(config, kv.clone(), Bus::new(), collaborators);
        let notices = sync.bus().notices();
        Self { sync, kv, sdk, redirect, wallet, notices }
    }

    /// Advance logical time in 10ms steps, collecting every pass that ran.
    pub fn step(&self, total_ms: u64) -> Vec<PassReport> {
        let mut reports = Vec::new();
        let mut elapsed = 0;
        while elapsed < total_ms {
            if let Some(report) = self.sync.engine().advance(Duration::from_millis(10)) {
                reports.push(report);
            }
            elapsed += 10;
        }
        reports
    }
}

/// Seed a store the way a previous page load would have left it.
pub fn seeded(session: WalletSession) -> Arc<MemoryKv> {
    let kv = Arc::new(MemoryKv::new());
    SessionStore::new(kv.clone(), Bus::new())
        .save(session, walletsync::Source::External)
        .expect("seed session");
    kv
}

/// Complete an OAuth sign-in through the redirect + callback path.
pub async fn oauth_sign_in(h: &Harness, address: &Address, token: &str) {
    h.sdk.set_account(json!({ "accountAddress": address.as_str() }));
    h.sync.smart_account().connect_oauth().await.expect("redirect issued");
    let state = h.redirect.last_state().expect("state recorded");
    h.sync
        .smart_account()
        .complete_redirect(walletsync::RedirectCallback { state, token: token.to_string() })
        .await
        .expect("callback completes");
}
