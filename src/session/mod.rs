//! Session - the persisted record that survives full-page navigation.

mod model;
mod store;

pub use model::{fingerprint, PendingRedirect, ProviderType, WalletSession};
pub use store::{SessionStore, DEFAULT_PENDING_TTL};
