//! Core types shared by every layer: addresses, errors, storage keys.

pub mod address;
pub mod error;
pub mod keys;

pub use address::{Address, DENYLIST};
pub use error::{WalletError, WalletResult};
