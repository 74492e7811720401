//! Sync configuration - passed from higher layers

use std::time::Duration;

use crate::core::keys::env;
use crate::proxy::ProxySigner;

pub const DEFAULT_DEBOUNCE_MS: u64 = 200;
pub const DEFAULT_POLL_MS: u64 = 5_000;
pub const DEFAULT_UPGRADE_ATTEMPTS: u32 = 3;
pub const DEFAULT_UPGRADE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PENDING_TTL_SECS: u64 = 600;
pub const DEFAULT_TICK_MS: u64 = 50;

/// Engine and store tuning. Higher layers construct this.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub app: String,
    /// Trailing debounce window for event bursts
    pub debounce_ms: u64,
    /// Backstop poll period
    pub poll_ms: u64,
    /// Upgrade attempts allowed between full disconnects
    pub max_upgrade_attempts: u32,
    /// Cap per attempt; a timeout counts as a failure
    pub upgrade_timeout_ms: u64,
    pub pending_ttl_secs: u64,
    /// Driver tick for `ReconcileService`
    pub tick_ms: u64,
    pub proxy: Option<ProxySigner>,
}

impl Default for SyncConfig {
    fn default() -> Self { Self::new("walletsync") }
}

impl SyncConfig {
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            poll_ms: DEFAULT_POLL_MS,
            max_upgrade_attempts: DEFAULT_UPGRADE_ATTEMPTS,
            upgrade_timeout_ms: DEFAULT_UPGRADE_TIMEOUT_MS,
            pending_ttl_secs: DEFAULT_PENDING_TTL_SECS,
            tick_ms: DEFAULT_TICK_MS,
            proxy: None,
        }
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self { self.debounce_ms = ms; self }
    pub fn with_poll_ms(mut self, ms: u64) -> Self { self.poll_ms = ms; self }
    pub fn with_max_upgrade_attempts(mut self, n: u32) -> Self { self.max_upgrade_attempts = n; self }
    pub fn with_upgrade_timeout_ms(mut self, ms: u64) -> Self { self.upgrade_timeout_ms = ms; self }
    pub fn with_pending_ttl_secs(mut self, secs: u64) -> Self { self.pending_ttl_secs = secs; self }
    pub fn with_tick_ms(mut self, ms: u64) -> Self { self.tick_ms = ms; self }
    pub fn with_proxy(mut self, proxy: ProxySigner) -> Self { self.proxy = Some(proxy); self }

    /// `WALLETSYNC_APP` plus the numeric overrides. Unparseable values are
    /// ignored with a warning.
    pub fn from_env() -> Self {
        let app = std::env::var(env::APP).unwrap_or_else(|_| "walletsync".to_string());
        let mut config = Self::new(app);
        if let Some(v) = read_u64(env::DEBOUNCE_MS) { config.debounce_ms = v; }
        if let Some(v) = read_u64(env::POLL_MS) { config.poll_ms = v; }
        if let Some(v) = read_u64(env::UPGRADE_ATTEMPTS) { config.max_upgrade_attempts = v.min(u32::MAX as u64) as u32; }
        if let Some(v) = read_u64(env::UPGRADE_TIMEOUT_MS) { config.upgrade_timeout_ms = v; }
        if let Some(v) = read_u64(env::PENDING_TTL_SECS) { config.pending_ttl_secs = v; }
        config
    }

    pub fn pending_ttl(&self) -> Duration { Duration::from_secs(self.pending_ttl_secs) }
    pub fn upgrade_timeout(&self) -> Duration { Duration::from_millis(self.upgrade_timeout_ms) }
    pub fn tick(&self) -> Duration { Duration::from_millis(self.tick_ms.max(1)) }

    pub fn proxy_ready(&self) -> bool {
        self.proxy.as_ref().map(|p| p.is_ready()).unwrap_or(false)
    }
}

fn read_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable override");
            None
        }
    }
}
