//! Bus - process-wide broadcast of session events
//!
//! ```text
//! publish(event) ──► stamp seq ──► global flags ──► queue
//!                                                    │
//!                       outermost publish drains ◄───┘
//!                                │
//!                 ┌──────────────┼──────────────┐
//!                 ▼              ▼              ▼
//!           subscribers      watchers      (re-entrant publishes
//!         (sync handlers)  (async UI)       queue up, FIFO)
//! ```
//!
//! Handlers run inside `publish`. A handler that publishes does not recurse:
//! its event is queued and delivered after the current handler returns. The
//! delivery cap per dispatch turns a runaway republish loop into a warning
//! instead of a hang.

mod event;

pub use event::{EventFlags, EventKind, Source, SyncEvent, UserNotice};

use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use tokio::sync::{broadcast, mpsc};

use crate::core::Address;

const MAX_DELIVERIES_PER_DISPATCH: usize = 256;
const NOTICE_CAPACITY: usize = 32;

static GLOBAL: Lazy<Bus> = Lazy::new(Bus::new);

type Predicate = dyn Fn(&SyncEvent) -> bool + Send + Sync;
type Handler = dyn Fn(&SyncEvent) + Send + Sync;

#[derive(Clone)]
struct Subscriber {
    id: u64,
    predicate: Arc<Predicate>,
    handler: Arc<Handler>,
}

/// Best-effort snapshot for components that paint before any context mounts.
#[derive(Debug, Default)]
pub struct GlobalFlags {
    connected: AtomicBool,
    address: RwLock<Option<Address>>,
}

impl GlobalFlags {
    pub fn connected(&self) -> bool { self.connected.load(Ordering::SeqCst) }

    pub fn address(&self) -> Option<Address> {
        match self.address.read() {
            Ok(guard) => (*guard).clone(),
            Err(poisoned) => (*poisoned.into_inner()).clone(),
        }
    }

    fn apply(&self, event: &SyncEvent) {
        let next = match event.kind {
            EventKind::Connect if event.address.is_some() => event.address.clone(),
            EventKind::Disconnect => None,
            _ => return,
        };
        self.connected.store(next.is_some(), Ordering::SeqCst);
        match self.address.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    queue: Mutex<VecDeque<SyncEvent>>,
    dispatching: AtomicBool,
    next_seq: AtomicU64,
    next_id: AtomicU64,
    flags: GlobalFlags,
    watchers: Mutex<Vec<mpsc::UnboundedSender<SyncEvent>>>,
    notices: broadcast::Sender<UserNotice>,
}

impl BusInner {
    fn remove(&self, id: u64) {
        lock(&self.subscribers).retain(|s| s.id != id);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Handle returned by `subscribe`. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 { self.id }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(self.id);
        }
    }
}

#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Default for Bus {
    fn default() -> Self { Self::new() }
}

impl Bus {
    pub fn new() -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                queue: Mutex::new(VecDeque::new()),
                dispatching: AtomicBool::new(false),
                next_seq: AtomicU64::new(0),
                next_id: AtomicU64::new(0),
                flags: GlobalFlags::default(),
                watchers: Mutex::new(Vec::new()),
                notices,
            }),
        }
    }

    /// The process-wide instance, not tied to any component's lifetime.
    pub fn global() -> &'static Bus { &GLOBAL }

    pub fn subscribe<P, H>(&self, predicate: P, handler: H) -> Subscription
    where
        P: Fn(&SyncEvent) -> bool + Send + Sync + 'static,
        H: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.inner.subscribers).push(Subscriber { id, predicate: Arc::new(predicate), handler: Arc::new(handler) });
        Subscription { id, bus: Arc::downgrade(&self.inner) }
    }

    pub fn subscribe_all<H>(&self, handler: H) -> Subscription
    where
        H: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.subscribe(|_| true, handler)
    }

    /// Stamp, record and deliver. Returns the event's sequence number.
    pub fn publish(&self, mut event: SyncEvent) -> u64 {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        event.seq = seq;
        self.inner.flags.apply(&event);
        tracing::debug!(seq, kind = ?event.kind, source = event.source_provider.as_str(), "bus publish");
        lock(&self.inner.queue).push_back(event);
        self.drain();
        seq
    }

    fn drain(&self) {
        loop {
            if self.inner.dispatching.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
                return;
            }
            let mut delivered = 0usize;
            loop {
                let next = lock(&self.inner.queue).pop_front();
                let Some(event) = next else { break };
                if delivered == MAX_DELIVERIES_PER_DISPATCH {
                    let mut queue = lock(&self.inner.queue);
                    tracing::warn!(dropped = queue.len() + 1, "bus delivery cap reached, dropping republish storm");
                    queue.clear();
                    break;
                }
                self.deliver(&event);
                delivered += 1;
            }
            self.inner.dispatching.store(false, Ordering::SeqCst);
            if lock(&self.inner.queue).is_empty() {
                return;
            }
        }
    }

    fn deliver(&self, event: &SyncEvent) {
        let subscribers = lock(&self.inner.subscribers).clone();
        for s in subscribers {
            if (s.predicate)(event) {
                (s.handler)(event);
            }
        }
        lock(&self.inner.watchers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Async stream of every event, for pure consumers.
    pub fn watch(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.watchers).push(tx);
        rx
    }

    pub fn flags(&self) -> &GlobalFlags { &self.inner.flags }

    pub fn last_seq(&self) -> u64 { self.inner.next_seq.load(Ordering::SeqCst) }

    pub fn subscriber_count(&self) -> usize { lock(&self.inner.subscribers).len() }

    pub fn notify_user(&self, notice: UserNotice) {
        tracing::info!(?notice, "user notice");
        let _ = self.inner.notices.send(notice);
    }

    pub fn notices(&self) -> broadcast::Receiver<UserNotice> { self.inner.notices.subscribe() }
}
