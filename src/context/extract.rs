//! Address extraction from SDK account objects.
//!
//! SDK versions disagree on where the user's address lives. Strategies are
//! tried in order; a candidate that does not parse or sits on the denylist is
//! skipped, never accepted as a fallback. Strategies only look at fields
//! known to carry the account address, so a factory or paymaster address
//! elsewhere in the object can never become the identity.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::core::{Address, WalletError, WalletResult};

static HEX_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b0[xX][0-9a-fA-F]{40}\b").expect("invalid address pattern"));

pub trait AddressStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn try_extract(&self, raw: &Value) -> Option<Address>;
}

fn accept(candidate: &str, strategy: &'static str) -> Option<Address> {
    match Address::parse(candidate) {
        Ok(a) if a.is_denylisted() => {
            tracing::debug!(strategy, candidate = %a, "skipping denylisted candidate");
            None
        }
        Ok(a) => Some(a),
        Err(e) => {
            tracing::debug!(strategy, error = %e, "skipping unparseable candidate");
            None
        }
    }
}

/// Reads a string at a JSON pointer.
pub struct FieldStrategy {
    name: &'static str,
    pointer: &'static str,
}

impl FieldStrategy {
    pub const fn new(name: &'static str, pointer: &'static str) -> Self { Self { name, pointer } }
}

impl AddressStrategy for FieldStrategy {
    fn name(&self) -> &'static str { self.name }

    fn try_extract(&self, raw: &Value) -> Option<Address> {
        let candidate = raw.pointer(self.pointer)?.as_str()?;
        accept(candidate, self.name)
    }
}

/// Address embedded in a known string field, e.g. a bare `"0x.."` account
/// object or a CAIP-10 id (`eip155:8453:0x..`). Only a field holding exactly
/// one address counts; the rest of the object is never scanned.
pub struct TextStrategy {
    name: &'static str,
    pointer: &'static str,
}

impl TextStrategy {
    pub const fn new(name: &'static str, pointer: &'static str) -> Self { Self { name, pointer } }
}

impl AddressStrategy for TextStrategy {
    fn name(&self) -> &'static str { self.name }

    fn try_extract(&self, raw: &Value) -> Option<Address> {
        let text = raw.pointer(self.pointer)?.as_str()?;
        let mut found = HEX_ADDRESS.find_iter(text);
        let only = found.next()?;
        if found.next().is_some() {
            tracing::debug!(strategy = self.name, "several addresses in one field, skipping");
            return None;
        }
        accept(only.as_str(), self.name)
    }
}

pub struct AddressResolver {
    strategies: Vec<Box<dyn AddressStrategy>>,
}

impl Default for AddressResolver {
    fn default() -> Self {
        Self::new(vec![
            Box::new(FieldStrategy::new("address", "/address")),
            Box::new(FieldStrategy::new("accountAddress", "/accountAddress")),
            Box::new(FieldStrategy::new("account.address", "/account/address")),
            Box::new(FieldStrategy::new("smartAccount.address", "/smartAccount/address")),
            Box::new(TextStrategy::new("text", "")),
            Box::new(TextStrategy::new("caipAddress", "/caipAddress")),
        ])
    }
}

impl AddressResolver {
    pub fn new(strategies: Vec<Box<dyn AddressStrategy>>) -> Self { Self { strategies } }

    pub fn resolve(&self, raw: &Value) -> WalletResult<Address> {
        for strategy in &self.strategies {
            if let Some(address) = strategy.try_extract(raw) {
                tracing::debug!(strategy = strategy.name(), address = %address.short(), "address resolved");
                return Ok(address);
            }
        }
        Err(WalletError::AddressResolution(format!(
            "no acceptable address after {} strategies",
            self.strategies.len()
        )))
    }
}
