//! Convergence planning. Pure: the same snapshot always yields the same plan,
//! whatever order the events that produced it arrived in.

use serde::Serialize;

use crate::bus::Source;
use crate::context::NodeState;
use crate::core::Address;
use crate::session::{ProviderType, WalletSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeView {
    pub label: Source,
    pub state: NodeState,
    pub provider_type: ProviderType,
    /// Unmounted nodes no longer hear the bus and take no part in planning.
    pub mounted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub nodes: Vec<NodeView>,
    pub session: Option<WalletSession>,
    pub epoch: u64,
}

impl Snapshot {
    pub fn stored_address(&self) -> Option<&Address> { self.session.as_ref().map(|s| s.address()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Loser of a conflict drops its connection and must re-prompt.
    ForceDisconnect { node: usize, kept: Address, dropped: Address },
    /// Write the winning node's identity to the store.
    Persist { node: usize, address: Address },
    /// Re-announce the stored address to nodes that lag behind it.
    Broadcast { address: Address, force: bool },
    /// Store empty and nobody holds an own connection: drop mirrors.
    Retract,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::ForceDisconnect { .. } => "force_disconnect",
            Action::Persist { .. } => "persist",
            Action::Broadcast { .. } => "broadcast",
            Action::Retract => "retract",
        }
    }
}

pub fn plan(snapshot: &Snapshot) -> Vec<Action> {
    let mut actions = Vec::new();

    // Most recent user-initiated connect wins.
    let winner = snapshot
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.mounted && n.state.own_connected())
        .max_by_key(|(_, n)| n.state.connect_seq);

    let mut forced = Vec::new();
    if let Some((w, winner_view)) = winner {
        let kept = winner_view.state.address.clone();
        for (i, n) in snapshot.nodes.iter().enumerate() {
            if i == w || !n.mounted || !n.state.own_connected() {
                continue;
            }
            if let (Some(kept), Some(dropped)) = (kept.as_ref(), n.state.address.as_ref()) {
                if kept != dropped {
                    actions.push(Action::ForceDisconnect { node: i, kept: kept.clone(), dropped: dropped.clone() });
                    forced.push(i);
                }
            }
        }
        if let Some(address) = kept {
            if snapshot.stored_address() != Some(&address) {
                actions.push(Action::Persist { node: w, address });
                return actions;
            }
        }
    }

    match snapshot.stored_address() {
        Some(stored) => {
            let lagging: Vec<&NodeView> = snapshot
                .nodes
                .iter()
                .enumerate()
                .filter(|(i, n)| n.mounted && !forced.contains(i) && n.state.accepts_sync())
                .map(|(_, n)| n)
                .filter(|n| n.state.address.as_ref() != Some(stored))
                .collect();
            if !lagging.is_empty() {
                let force = lagging.iter().any(|n| n.state.is_mirror());
                actions.push(Action::Broadcast { address: stored.clone(), force });
            }
        }
        None if winner.is_none() => {
            if snapshot.nodes.iter().any(|n| n.mounted && n.state.is_mirror()) {
                actions.push(Action::Retract);
            }
        }
        None => {}
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Capability, NodePhase};

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{:040x}", n)).unwrap()
    }

    fn view(label: Source, state: NodeState) -> NodeView {
        NodeView { label, state, provider_type: ProviderType::Passkey, mounted: true }
    }

    fn own(n: u8, seq: u64) -> NodeState {
        let mut s = NodeState::default();
        s.own(addr(n), Capability::Signing, seq);
        s
    }

    fn mirror(n: u8) -> NodeState {
        NodeState { phase: NodePhase::Connected, address: Some(addr(n)), capability: Capability::ReadOnly, connect_seq: None, needs_prompt: false }
    }

    fn snap(a: NodeState, b: NodeState, stored: Option<u8>) -> Snapshot {
        Snapshot {
            nodes: vec![view(Source::SmartAccount, a), view(Source::Injected, b)],
            session: stored.map(|n| WalletSession::passkey(addr(n))),
            epoch: 0,
        }
    }

    #[test]
    fn steady_states_plan_nothing() {
        assert!(plan(&snap(NodeState::default(), NodeState::default(), None)).is_empty());
        assert!(plan(&snap(own(1, 3), mirror(1), Some(1))).is_empty());
    }

    #[test]
    fn stored_address_reaches_idle_nodes() {
        let p = plan(&snap(NodeState::default(), NodeState::default(), Some(0xaa)));
        assert_eq!(p, vec![Action::Broadcast { address: addr(0xaa), force: false }]);
    }

    #[test]
    fn stale_mirror_is_forced() {
        let p = plan(&snap(own(1, 3), mirror(2), Some(1)));
        assert_eq!(p, vec![Action::Broadcast { address: addr(1), force: true }]);
    }

    #[test]
    fn own_connection_missing_from_store_is_persisted() {
        let p = plan(&snap(NodeState::default(), own(2, 5), None));
        assert_eq!(p, vec![Action::Persist { node: 1, address: addr(2) }]);
    }

    #[test]
    fn conflict_later_seq_wins() {
        let p = plan(&snap(own(0x11, 3), own(0x22, 9), Some(0x11)));
        assert_eq!(
            p,
            vec![
                Action::ForceDisconnect { node: 0, kept: addr(0x22), dropped: addr(0x11) },
                Action::Persist { node: 1, address: addr(0x22) },
            ]
        );
        let p = plan(&snap(own(0x11, 12), own(0x22, 9), Some(0x11)));
        assert_eq!(p, vec![Action::ForceDisconnect { node: 1, kept: addr(0x11), dropped: addr(0x22) }]);
    }

    #[test]
    fn orphaned_mirrors_are_retracted() {
        assert_eq!(plan(&snap(mirror(1), NodeState::default(), None)), vec![Action::Retract]);
    }

    #[test]
    fn losers_are_left_alone() {
        let mut loser = NodeState::default();
        loser.force_out();
        assert!(plan(&snap(loser, own(2, 4), Some(2))).is_empty());
    }

    #[test]
    fn unmounted_nodes_are_not_planned_for() {
        let mut s = snap(NodeState::default(), mirror(1), Some(1));
        s.nodes[0].mounted = false;
        assert!(plan(&s).is_empty());

        let mut s = snap(own(0x11, 9), own(0x22, 3), Some(0x22));
        s.nodes[0].mounted = false;
        assert!(plan(&s).is_empty());
    }
}
