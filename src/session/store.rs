//! SessionStore - sole owner of the persisted session record
//!
//! Every mutation is a single kv write followed by exactly one bus event:
//!
//! | Operation | Record | Event |
//! |-----------|--------|-------|
//! | `save` | overwrite | CONNECT (syncAll, forceUpdate) |
//! | `mark_capable` | flip capability | CONNECT (reconnectForCapability) |
//! | `clear` | delete + epoch bump | DISCONNECT |
//!
//! The epoch is the cancellation token for anything that started against an
//! older session.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::model::{PendingRedirect, ProviderType, WalletSession};
use crate::bus::{Bus, EventFlags, Source, SyncEvent};
use crate::core::keys::storage;
use crate::core::{Address, WalletError, WalletResult};
use crate::store::KvStore;

pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(10 * 60);

static STATE_NONCE: AtomicU64 = AtomicU64::new(0);

struct StoreInner {
    kv: Arc<dyn KvStore>,
    bus: Bus,
    epoch: AtomicU64,
    writes: AtomicU64,
    pending_ttl: Duration,
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KvStore>, bus: Bus) -> Self {
        Self::with_pending_ttl(kv, bus, DEFAULT_PENDING_TTL)
    }

    pub fn with_pending_ttl(kv: Arc<dyn KvStore>, bus: Bus, pending_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                kv,
                bus,
                epoch: AtomicU64::new(0),
                writes: AtomicU64::new(0),
                pending_ttl,
            }),
        }
    }

    pub fn bus(&self) -> &Bus { &self.inner.bus }

    /// Bumped by every `clear`.
    pub fn epoch(&self) -> u64 { self.inner.epoch.load(Ordering::SeqCst) }

    /// Session-record writes since construction (saves, capability flips, clears).
    pub fn write_count(&self) -> u64 { self.inner.writes.load(Ordering::SeqCst) }

    pub fn pending_ttl(&self) -> Duration { self.inner.pending_ttl }

    /// Current session, if any. A record that does not parse is deleted.
    pub fn load(&self) -> Option<WalletSession> {
        let raw = match self.inner.kv.get(storage::SESSION) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "session read failed");
                return None;
            }
        };
        match serde_json::from_str::<WalletSession>(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                let err = WalletError::PersistenceCorruption(e.to_string());
                tracing::warn!(error = %err, "dropping corrupt session record");
                if let Err(e) = self.inner.kv.remove(storage::SESSION) {
                    tracing::warn!(error = %e, "corrupt session record could not be removed");
                }
                None
            }
        }
    }

    /// Like `load`, but a backend failure is an error instead of "no session".
    pub fn try_load(&self) -> WalletResult<Option<WalletSession>> {
        let Some(raw) = self.inner.kv.get(storage::SESSION)? else { return Ok(None) };
        match serde_json::from_str::<WalletSession>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!(error = %e, "dropping corrupt session record");
                self.inner.kv.remove(storage::SESSION)?;
                Ok(None)
            }
        }
    }

    /// Persist `session` and announce it. Returns the CONNECT's seq.
    pub fn save(&self, session: WalletSession, origin: Source) -> WalletResult<u64> {
        let session = match self.try_load()? {
            Some(existing) => session.merge_into(&existing),
            None => session,
        };
        self.write(&session)?;
        tracing::info!(
            address = %session.address(),
            provider = session.provider_type().as_str(),
            capable = session.transaction_capable(),
            origin = origin.as_str(),
            "session saved"
        );
        let event = SyncEvent::connect(session.address().clone(), origin).with_flags(EventFlags::forced());
        Ok(self.inner.bus.publish(event))
    }

    /// Flip the session at `address` to transaction capable. `Ok(false)` when
    /// there is nothing to do.
    pub fn mark_capable(&self, address: &Address, origin: Source) -> WalletResult<bool> {
        let Some(mut session) = self.try_load()? else { return Ok(false) };
        if session.address() != address {
            tracing::debug!(stored = %session.address(), requested = %address, "mark_capable address mismatch");
            return Ok(false);
        }
        if session.transaction_capable() && !session.needs_upgrade() {
            return Ok(false);
        }
        session.mark_capable();
        self.write(&session)?;
        tracing::info!(address = %address, "session upgraded to transaction capable");
        let event = SyncEvent::connect(address.clone(), origin).with_flags(EventFlags::capability());
        self.inner.bus.publish(event);
        Ok(true)
    }

    /// Full disconnect: record and pending marker gone, epoch bumped.
    pub fn clear(&self, origin: Source) -> WalletResult<()> {
        self.inner.kv.remove(storage::SESSION)?;
        self.inner.kv.remove(storage::PENDING_REDIRECT)?;
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(epoch, origin = origin.as_str(), "session cleared");
        self.inner.bus.publish(SyncEvent::disconnect(origin));
        Ok(())
    }

    fn write(&self, session: &WalletSession) -> WalletResult<()> {
        let raw = serde_json::to_string(session)?;
        self.inner.kv.set(storage::SESSION, &raw)?;
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Write a pending marker with a fresh random `state`.
    pub fn begin_redirect(&self, provider_type: ProviderType) -> WalletResult<PendingRedirect> {
        let marker = PendingRedirect { state: fresh_state(), provider_type, created_at: Utc::now() };
        let raw = serde_json::to_string(&marker)?;
        self.inner.kv.set(storage::PENDING_REDIRECT, &raw)?;
        tracing::debug!(provider = provider_type.as_str(), "redirect marker written");
        Ok(marker)
    }

    /// Live marker, if any. Expired or unreadable markers are deleted.
    pub fn pending_redirect(&self) -> Option<PendingRedirect> {
        let raw = match self.inner.kv.get(storage::PENDING_REDIRECT) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "redirect marker read failed");
                return None;
            }
        };
        let marker = match serde_json::from_str::<PendingRedirect>(&raw) {
            Ok(marker) => marker,
            Err(e) => {
                tracing::warn!(error = %e, "dropping corrupt redirect marker");
                self.discard_redirect();
                return None;
            }
        };
        if marker.is_expired(self.inner.pending_ttl, Utc::now()) {
            let err = WalletError::RedirectAbandoned(format!("marker from {}", marker.created_at.to_rfc3339()));
            tracing::info!(error = %err, "dropping abandoned redirect");
            self.discard_redirect();
            return None;
        }
        Some(marker)
    }

    /// Consume the live marker.
    pub fn take_pending_redirect(&self) -> Option<PendingRedirect> {
        let marker = self.pending_redirect()?;
        self.discard_redirect();
        Some(marker)
    }

    pub fn discard_redirect(&self) {
        if let Err(e) = self.inner.kv.remove(storage::PENDING_REDIRECT) {
            tracing::warn!(error = %e, "redirect marker could not be removed");
        }
    }
}

fn fresh_state() -> String {
    let nonce = STATE_NONCE.fetch_add(1, Ordering::SeqCst);
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut hasher = blake3::Hasher::new();
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&nonce.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}
