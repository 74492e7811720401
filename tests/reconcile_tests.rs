//! Engine behaviour end to end: contexts, bus, store and engine wired the way
//! a host wires them, with mock collaborators.

mod common;

use common::{addr, oauth_sign_in, seeded, Harness, MockSdk, MockWallet};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use walletsync::core::keys::storage;
use walletsync::{
    Action, Bus, Capability, KvStore, MemoryKv, NodePhase, ProviderNode, ProviderType, ProxySigner, SessionStore,
    Source, SyncConfig, SyncEvent, Trigger, UserGesture, UserNotice, WalletSession,
};

#[tokio::test]
async fn redirect_survival_nodes_adopt_stored_address() {
    let kv = seeded(WalletSession::oauth(addr("aa"), "oauth-token"));
    let h = Harness::reload(kv);

    assert!(!h.sync.smart_account().state().connected());
    assert!(!h.sync.injected().state().connected());

    let report = h.sync.engine().reconcile_now();
    assert_eq!(report.actions, vec![Action::Broadcast { address: addr("aa"), force: false }]);
    assert!(!report.upgrade_started, "no signer derivation in the pass that broadcast");

    for state in [h.sync.smart_account().state(), h.sync.injected().state()] {
        assert_eq!(state.phase, NodePhase::Connected);
        assert_eq!(state.address, Some(addr("aa")));
        assert_eq!(state.capability, Capability::ReadOnly);
    }
    assert!(h.sync.bus().flags().connected());
    assert_eq!(h.sync.bus().flags().address(), Some(addr("aa")));
}

#[tokio::test]
async fn converged_passes_are_idempotent() {
    let h = Harness::new();
    h.sdk.set_account(json!({ "address": addr("01").as_str() }));
    h.sync.smart_account().connect_passkey().await.unwrap();

    let first = h.sync.engine().reconcile_now();
    assert!(first.actions.is_empty());
    let writes = h.sync.store().write_count();
    let seq = h.sync.bus().last_seq();

    let second = h.sync.engine().reconcile_now();
    let third = h.sync.engine().reconcile_now();
    for report in [&second, &third] {
        assert_eq!(report.writes, 0);
        assert_eq!(report.published, 0);
        assert!(report.actions.is_empty());
    }
    assert!(third.skipped);
    assert_eq!(h.sync.store().write_count(), writes);
    assert_eq!(h.sync.bus().last_seq(), seq);
}

#[tokio::test]
async fn zero_address_is_never_a_session() {
    let h = Harness::new();
    let mut notices = h.sync.bus().notices();
    h.sdk.set_account(json!({ "address": "0x0000000000000000000000000000000000000000" }));

    let err = h.sync.smart_account().connect_passkey().await.unwrap_err();
    assert!(matches!(err, walletsync::WalletError::AddressResolution(_)));
    assert_eq!(h.sync.smart_account().state().phase, NodePhase::Idle);
    assert!(h.sync.session().is_none());
    assert_eq!(h.sync.store().write_count(), 0);
    assert!(matches!(notices.try_recv(), Ok(UserNotice::AddressResolutionFailed { .. })));
}

#[tokio::test]
async fn conflict_latest_user_connect_wins() {
    let h = Harness::build(
        Arc::new(MemoryKv::new()),
        SyncConfig::new("test"),
        MockSdk::returning(json!({ "address": addr("11").as_str() })),
        MockWallet::with_account(&addr("22")),
    );
    let mut notices = h.sync.bus().notices();

    h.sync.smart_account().connect_passkey().await.unwrap();
    h.sync.injected().connect(UserGesture::from_ui_event("connect-button")).await.unwrap();

    let a_seq = h.sync.smart_account().state().connect_seq.unwrap();
    let b_seq = h.sync.injected().state().connect_seq.unwrap();
    assert!(b_seq > a_seq);

    let report = h.sync.engine().reconcile_now();
    assert_eq!(report.actions.len(), 2);

    assert_eq!(h.sync.session().unwrap().address(), &addr("22"));
    assert_eq!(h.sync.session().unwrap().provider_type(), ProviderType::Injected);
    let a = h.sync.smart_account().state();
    assert_eq!(a.phase, NodePhase::Disconnected);
    assert!(a.needs_prompt);
    match notices.try_recv() {
        Ok(UserNotice::ConflictingIdentity { kept, dropped, reconnect }) => {
            assert_eq!(kept, addr("22"));
            assert_eq!(dropped, addr("11"));
            assert_eq!(reconnect, Source::SmartAccount);
        }
        other => panic!("expected conflict notice, got {other:?}"),
    }

    // The loser stays out until the user reconnects.
    let reports = h.step(1_000);
    assert!(reports.iter().all(|r| r.actions.is_empty()));
    assert_eq!(h.sync.smart_account().state().phase, NodePhase::Disconnected);
}

#[tokio::test]
async fn burst_of_connects_collapses_into_one_write() {
    let h = Harness::build(
        Arc::new(MemoryKv::new()),
        SyncConfig::new("test"),
        MockSdk::returning(json!({})),
        MockWallet::with_account(&addr("33")),
    );
    // mount pass
    assert_eq!(h.step(200).len(), 1);

    h.sync.injected().connect(UserGesture::from_ui_event("click")).await.unwrap();
    for _ in 0..4 {
        assert!(h.step(30).is_empty());
        h.sync.bus().publish(SyncEvent::connect(addr("33"), Source::Injected));
    }
    assert!(h.step(190).is_empty());

    let reports = h.step(2_000);
    let writes: u64 = reports.iter().map(|r| r.writes).sum();
    assert_eq!(writes, 1);
    assert_eq!(reports[0].trigger, Trigger::Event);
    assert_eq!(reports[0].actions, vec![Action::Persist { node: 1, address: addr("33") }]);
    assert_eq!(h.sync.store().write_count(), 1);
    assert_eq!(h.sync.smart_account().state().address, Some(addr("33")));
}

#[tokio::test]
async fn disconnect_discards_late_upgrade_success() {
    let h = Harness::new();
    oauth_sign_in(&h, &addr("aa"), "oauth-token").await;
    let gate = h.sdk.gate_restores();

    let report = h.sync.engine().reconcile_now();
    assert!(report.upgrade_started);
    assert!(h.sync.engine().upgrade_in_flight());

    h.sync.smart_account().disconnect().unwrap();
    let writes_after_disconnect = h.sync.store().write_count();

    gate.notify_one();
    h.sync.engine().join_upgrade().await;
    let report = h.sync.engine().reconcile_now();

    assert!(!report.upgrade_applied);
    assert_eq!(h.sync.store().write_count(), writes_after_disconnect);
    assert!(h.sync.session().is_none());
    assert_ne!(h.sync.smart_account().state().capability, Capability::Signing);
}

#[tokio::test]
async fn upgrade_attempts_are_bounded() {
    let h = Harness::new();
    h.sdk.restore_fails.store(true, Ordering::SeqCst);
    oauth_sign_in(&h, &addr("aa"), "oauth-token").await;

    for _ in 0..40 {
        h.step(100);
        h.sync.engine().join_upgrade().await;
    }

    assert_eq!(h.sync.engine().upgrade_attempts(), 3);
    assert_eq!(h.sdk.restore_calls.load(Ordering::SeqCst), 3);
    let session = h.sync.session().unwrap();
    assert!(!session.transaction_capable());
    assert!(session.needs_upgrade());
    assert_eq!(h.sync.smart_account().state().capability, Capability::ReadOnly);
}

#[tokio::test]
async fn upgrade_budget_resets_after_disconnect() {
    let h = Harness::new();
    h.sdk.restore_fails.store(true, Ordering::SeqCst);
    oauth_sign_in(&h, &addr("aa"), "tok").await;
    for _ in 0..20 {
        h.step(100);
        h.sync.engine().join_upgrade().await;
    }
    assert_eq!(h.sync.engine().upgrade_attempts(), 3);

    h.sync.disconnect().unwrap();
    h.step(300);
    assert_eq!(h.sync.engine().upgrade_attempts(), 0);

    oauth_sign_in(&h, &addr("bb"), "tok2").await;
    h.step(300);
    h.sync.engine().join_upgrade().await;
    assert_eq!(h.sync.engine().upgrade_attempts(), 1);
}

#[tokio::test]
async fn successful_upgrade_marks_session_capable() {
    let h = Harness::new();
    let mut events = h.sync.bus().watch();
    oauth_sign_in(&h, &addr("aa"), "oauth-token").await;

    for _ in 0..5 {
        h.step(250);
        h.sync.engine().join_upgrade().await;
    }

    let session = h.sync.session().unwrap();
    assert!(session.transaction_capable());
    assert!(!session.needs_upgrade());
    assert_eq!(h.sync.engine().upgrade_attempts(), 1);
    assert_eq!(h.sync.smart_account().state().capability, Capability::Signing);

    let mut saw_capability = false;
    while let Ok(event) = events.try_recv() {
        saw_capability |= event.flags.reconnect_for_capability && event.address == Some(addr("aa"));
    }
    assert!(saw_capability);

    // A later save for the same address cannot take it back.
    h.sync.store().save(WalletSession::oauth(addr("aa"), "again"), Source::SmartAccount).unwrap();
    assert!(h.sync.session().unwrap().transaction_capable());
}

#[tokio::test]
async fn injected_wallet_serves_as_capability_source() {
    let h = Harness::build(
        Arc::new(MemoryKv::new()),
        SyncConfig::new("test"),
        MockSdk::returning(json!({})),
        MockWallet::default(),
    );
    h.sdk.restore_can_sign.store(false, Ordering::SeqCst);
    *h.wallet.granted.lock().unwrap() = vec![addr("aa").to_string()];
    oauth_sign_in(&h, &addr("aa"), "tok").await;

    for _ in 0..5 {
        h.step(250);
        h.sync.engine().join_upgrade().await;
    }
    assert!(h.sync.session().unwrap().transaction_capable());
    assert_eq!(h.sync.injected().state().capability, Capability::Signing);
}

#[tokio::test]
async fn ready_proxy_skips_upgrades() {
    let h = Harness::build(
        Arc::new(MemoryKv::new()),
        SyncConfig::new("test").with_proxy(ProxySigner::new("sponsor-key")),
        MockSdk::returning(json!({})),
        MockWallet::default(),
    );
    oauth_sign_in(&h, &addr("aa"), "tok").await;
    h.step(6_000);
    assert_eq!(h.sync.engine().upgrade_attempts(), 0);
    assert_eq!(h.sdk.restore_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn corrupt_record_is_dropped_and_mirrors_retracted() {
    let kv = seeded(WalletSession::passkey(addr("aa")));
    let h = Harness::reload(kv.clone());
    h.sync.engine().reconcile_now();
    assert!(h.sync.injected().state().is_mirror());

    kv.set(storage::SESSION, "{\"address\": 42").unwrap();
    let report = h.sync.engine().reconcile_now();

    assert_eq!(report.actions, vec![Action::Retract]);
    assert!(kv.get(storage::SESSION).unwrap().is_none());
    assert!(!h.sync.smart_account().state().connected());
    assert!(!h.sync.injected().state().connected());
    assert!(!h.sync.bus().flags().connected());
}

#[tokio::test]
async fn poll_catches_writes_the_bus_never_saw() {
    let kv = seeded(WalletSession::passkey(addr("aa")));
    let h = Harness::reload(kv.clone());
    h.step(1_000);
    assert!(h.sync.injected().state().is_mirror());

    // Another tab signs in with a different account; this page's bus never hears of it.
    SessionStore::new(kv, Bus::new())
        .save(WalletSession::passkey(addr("bb")), Source::External)
        .unwrap();

    let reports = h.step(5_000);
    let poll = reports.iter().find(|r| r.trigger == Trigger::Poll).expect("poll pass ran");
    assert_eq!(poll.actions, vec![Action::Broadcast { address: addr("bb"), force: true }]);
    assert_eq!(h.sync.smart_account().state().address, Some(addr("bb")));
    assert_eq!(h.sync.injected().state().address, Some(addr("bb")));
}

#[tokio::test]
async fn own_connection_restored_to_emptied_store() {
    let h = Harness::build(
        Arc::new(MemoryKv::new()),
        SyncConfig::new("test"),
        MockSdk::returning(json!({})),
        MockWallet::with_account(&addr("44")),
    );
    h.sync.injected().connect(UserGesture::from_ui_event("click")).await.unwrap();
    h.sync.engine().reconcile_now();
    assert_eq!(h.sync.session().unwrap().address(), &addr("44"));

    h.kv.remove(storage::SESSION).unwrap();
    let report = h.sync.engine().reconcile_now();
    assert_eq!(report.actions, vec![Action::Persist { node: 1, address: addr("44") }]);
    assert!(h.sync.session().unwrap().transaction_capable());
}

#[tokio::test]
async fn steady_event_stream_does_not_hold_off_the_poll() {
    let kv = seeded(WalletSession::passkey(addr("aa")));
    let h = Harness::reload(kv.clone());
    h.step(1_000);
    assert_eq!(h.sync.smart_account().state().address, Some(addr("aa")));

    SessionStore::new(kv, Bus::new())
        .save(WalletSession::passkey(addr("bb")), Source::External)
        .unwrap();

    // A SYNC_REQUEST every 100ms keeps the debounce window open forever.
    let mut reports = Vec::new();
    for _ in 0..100 {
        h.sync.bus().publish(SyncEvent::sync_request(None, Source::External));
        reports.extend(h.step(100));
    }

    assert!(reports.iter().any(|r| r.trigger == Trigger::Poll));
    assert_eq!(h.sync.smart_account().state().address, Some(addr("bb")));
    assert_eq!(h.sync.injected().state().address, Some(addr("bb")));
}

#[tokio::test]
async fn timed_out_attempts_count_against_the_budget() {
    let config = SyncConfig::new("test").with_upgrade_timeout_ms(50);
    let h = Harness::build(Arc::new(MemoryKv::new()), config, MockSdk::returning(json!({})), MockWallet::default());
    oauth_sign_in(&h, &addr("aa"), "oauth-token").await;
    // Restores never answer.
    let _gate = h.sdk.gate_restores();

    let run = async {
        for _ in 0..40 {
            h.step(100);
            h.sync.engine().join_upgrade().await;
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(10), run).await.expect("attempts time out instead of hanging");

    assert_eq!(h.sync.engine().upgrade_attempts(), 3);
    assert_eq!(h.sdk.restore_calls.load(Ordering::SeqCst), 3);
    assert!(!h.sync.engine().upgrade_in_flight());
    let session = h.sync.session().unwrap();
    assert!(!session.transaction_capable());
    assert!(session.needs_upgrade());
}

#[tokio::test]
async fn unmounted_node_is_not_rebroadcast_to() {
    let kv = seeded(WalletSession::passkey(addr("aa")));
    let h = Harness::reload(kv);
    h.sync.smart_account().unmount();

    let reports = h.step(3_000);
    let broadcasts = reports
        .iter()
        .flat_map(|r| r.actions.iter())
        .filter(|a| matches!(a, Action::Broadcast { .. }))
        .count();
    assert_eq!(broadcasts, 1);
    assert!(h.sync.injected().state().is_mirror());
    assert!(!h.sync.smart_account().state().connected());
    assert!(reports.len() <= 3, "passes settle once the mounted node converged: {}", reports.len());
}

#[tokio::test]
async fn conflict_loser_stays_out_after_a_full_disconnect() {
    let h = Harness::build(
        Arc::new(MemoryKv::new()),
        SyncConfig::new("test"),
        MockSdk::returning(json!({ "address": addr("11").as_str() })),
        MockWallet::with_account(&addr("22")),
    );
    h.sync.smart_account().connect_passkey().await.unwrap();
    h.sync.injected().connect(UserGesture::from_ui_event("connect-button")).await.unwrap();
    h.sync.engine().reconcile_now();
    assert!(h.sync.smart_account().state().needs_prompt);

    h.sync.disconnect().unwrap();
    h.step(500);
    let a = h.sync.smart_account().state();
    assert!(a.needs_prompt);
    assert!(!a.connected());
}
