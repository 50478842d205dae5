//! Cloud reconciliation: conflict predicates, invalid data, leases and
//! stale fetches.

use dimsave_core::{
    clock::ManualClock,
    cloud::{
        legacy_path, web_path, CloudConflict, CloudReconciler, Direction, Identity, LoadCheckOutcome,
        MemoryRemote, RemoteStore, Resolution, ResolveOutcome, SaveCheckOutcome, SaveComparison,
        Side, SqliteRemote,
    },
    codec,
    config::SaveConfig,
    error::{MigrationError, SaveError},
    event::SaveEvent,
    player::PlayerState,
    root::{SaveRoot, StoredRoot},
    session::Session,
    storage::{SaveOutcome, StorageManager},
    store::MemoryStore,
    types::{SlotId, CURRENT_VERSION},
    value::SaveValue,
};
use std::sync::Arc;

// 2024-03-05T12:00:00Z
const NOW: i64 = 1_709_640_000_000;
const USER: &str = "alice";

fn identity() -> Identity {
    Identity {
        id: USER.into(),
        display_name: Some("Alice".into()),
        email: Some("alice@example.com".into()),
    }
}

fn storage(clock: &Arc<ManualClock>) -> StorageManager {
    let mut storage = StorageManager::new(
        Box::new(MemoryStore::new()),
        SaveConfig::default_test(),
        clock.clone(),
    );
    storage.load().expect("load");
    storage
}

/// A logged-in device sharing `remote` with any other device.
fn device(remote: &MemoryRemote, clock: &Arc<ManualClock>) -> Session {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut cloud = CloudReconciler::new(
        Box::new(remote.clone()),
        &SaveConfig::default_test(),
        clock.clone(),
    );
    cloud.login(identity());
    Session::new(storage(clock), cloud)
}

fn save(realities: i64, antimatter: i64, last_update: i64) -> PlayerState {
    let mut p = PlayerState::default_start();
    p.set("realities", realities);
    p.set("antimatter", antimatter);
    p.set_last_update(last_update);
    p
}

fn put_cloud(remote: &MemoryRemote, slot: SlotId, save: PlayerState) {
    let mut root = SaveRoot::default();
    root.set_slot(slot, Some(save));
    remote.put_document(&web_path(USER), &codec::encode(&root).expect("encode"));
}

fn cloud_root(remote: &MemoryRemote) -> SaveRoot {
    let text = remote.document(&web_path(USER)).expect("cloud document");
    match codec::decode_root(&text).expect("decode cloud") {
        StoredRoot::Slotted(root) => root,
        StoredRoot::Legacy(_) => panic!("cloud holds the pre-slot layout"),
    }
}

// ── Push ───────────────────────────────────────────────────────

#[tokio::test]
async fn first_push_uploads_the_local_root() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    let mut session = device(&remote, &clock);
    session.storage.player_mut().set("antimatter", 1234i64);

    let outcome = session.save_check(false).await.expect("save check");
    let receipt = match outcome {
        SaveCheckOutcome::Pushed(receipt) => receipt,
        other => panic!("expected a push, got {other:?}"),
    };
    assert_eq!(receipt.slot, 0);
    assert_eq!(
        receipt.hash,
        codec::fingerprint(session.storage.player()).expect("fingerprint")
    );
    assert_eq!(session.cloud.record().last_known_hash.as_deref(), Some(receipt.hash.as_str()));
    assert_eq!(cloud_root(&remote).slot(0), Some(session.storage.player()));
    assert!(session.drain_events().contains(&SaveEvent::CloudSaved {
        slot: 0,
        user: Some("Alice".into()),
    }));
}

#[tokio::test]
async fn hidden_name_is_left_out_of_notices() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    let mut session = device(&remote, &clock);
    session.storage.player_mut().set("options.hideGoogleName", true);

    session.save_check(false).await.expect("save check");
    assert!(session
        .drain_events()
        .contains(&SaveEvent::CloudSaved { slot: 0, user: None }));
}

#[tokio::test]
async fn push_and_pull_predicates_are_mirrored() {
    // Cloud is farther ahead AND older.
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    put_cloud(&remote, 0, save(1, 10, NOW - 1_000));
    let mut session = device(&remote, &clock);

    match session.save_check(false).await.expect("save check") {
        SaveCheckOutcome::Conflict(conflict) => {
            assert_eq!(conflict.direction, Direction::Save);
            assert_eq!(
                conflict.comparison,
                Some(SaveComparison {
                    farther_ahead: Side::Cloud,
                    older: Side::Cloud,
                    different_name: false,
                    hash_mismatch: false,
                })
            );
        }
        other => panic!("push should prompt, got {other:?}"),
    }

    // The same inputs do not block a pull: cloud is strictly ahead.
    match session.load_check().await.expect("load check") {
        LoadCheckOutcome::Loaded { slot } => assert_eq!(slot, 0),
        other => panic!("pull should apply, got {other:?}"),
    }
    assert_eq!(session.storage.player().get("realities"), Some(&SaveValue::Number(1.0)));
    assert_eq!(
        session.cloud.record().last_known_hash,
        Some(codec::fingerprint(&save(1, 10, NOW - 1_000)).expect("fingerprint"))
    );
}

#[tokio::test]
async fn local_ahead_pushes_silently_but_prompts_on_pull() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    put_cloud(&remote, 0, save(0, 5, NOW));
    let mut session = device(&remote, &clock);

    match session.load_check().await.expect("load check") {
        LoadCheckOutcome::Conflict(conflict) => {
            assert_eq!(conflict.comparison.map(|c| c.farther_ahead), Some(Side::Local));
        }
        other => panic!("pull should prompt, got {other:?}"),
    }
    assert!(matches!(
        session.save_check(false).await.expect("save check"),
        SaveCheckOutcome::Pushed(_)
    ));
    assert_eq!(
        cloud_root(&remote).slot(0).and_then(|p| p.get("antimatter")).cloned(),
        Some(SaveValue::Number(10.0))
    );
}

#[tokio::test]
async fn unprompted_conflict_respects_overwrite_preference() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    put_cloud(&remote, 0, save(3, 10, NOW));
    let mut session = device(&remote, &clock);
    session.storage.player_mut().set("options.showCloudModal", false);

    assert!(matches!(
        session.save_check(false).await.expect("save check"),
        SaveCheckOutcome::Skipped
    ));
    assert_eq!(
        cloud_root(&remote).slot(0).and_then(|p| p.get("realities")).cloned(),
        Some(SaveValue::Number(3.0))
    );

    session.storage.player_mut().set("options.forceCloudOverwrite", true);
    assert!(matches!(
        session.save_check(false).await.expect("save check"),
        SaveCheckOutcome::Pushed(_)
    ));
}

#[tokio::test]
async fn forced_modal_prompts_without_a_conflict() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    put_cloud(&remote, 0, save(0, 10, NOW));
    let mut session = device(&remote, &clock);

    assert!(matches!(
        session.save_check(true).await.expect("save check"),
        SaveCheckOutcome::Conflict(_)
    ));
}

#[tokio::test]
async fn cloud_changed_elsewhere_is_a_hash_mismatch() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    let mut laptop = device(&remote, &clock);
    let mut phone = device(&remote, &clock);

    assert!(matches!(
        laptop.save_check(false).await.expect("laptop push"),
        SaveCheckOutcome::Pushed(_)
    ));
    // Same progress, time and name; only the content differs.
    phone.storage.player_mut().set("tutorialState", 3i64);
    phone.cloud.push(&mut phone.storage).await.expect("phone push");

    match laptop.save_check(false).await.expect("laptop check") {
        SaveCheckOutcome::Conflict(conflict) => assert_eq!(
            conflict.comparison,
            Some(SaveComparison {
                farther_ahead: Side::Neither,
                older: Side::Neither,
                different_name: false,
                hash_mismatch: true,
            })
        ),
        other => panic!("expected hash mismatch conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn different_save_names_conflict_both_ways() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    let mut cloud = save(2, 10, NOW);
    cloud.set("options.saveFileName", "other run");
    put_cloud(&remote, 0, cloud);
    let mut session = device(&remote, &clock);

    assert!(matches!(
        session.load_check().await.expect("load check"),
        LoadCheckOutcome::Conflict(c) if c.comparison.map_or(false, |c| c.different_name)
    ));
    assert!(matches!(
        session.save_check(false).await.expect("save check"),
        SaveCheckOutcome::Conflict(_)
    ));
}

// ── Invalid cloud data ─────────────────────────────────────────

#[tokio::test]
async fn uncomparable_cloud_save_is_invalid_in_both_directions() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    let mut broken = PlayerState::default();
    broken.set("version", CURRENT_VERSION);
    broken.set("antimatter", 10i64);
    broken.set("lastUpdate", NOW);
    put_cloud(&remote, 0, broken.clone());
    let mut session = device(&remote, &clock);
    session.storage.player_mut().set("options.forceCloudOverwrite", true);

    match session.save_check(false).await.expect("save check") {
        SaveCheckOutcome::InvalidCloudData(conflict) => {
            assert_eq!(conflict.comparison, None);
            assert_eq!(conflict.cloud, Some(broken.clone()));
        }
        other => panic!("expected invalid cloud data, got {other:?}"),
    }
    match session.load_check().await.expect("load check") {
        LoadCheckOutcome::InvalidCloudData(conflict) => {
            assert_eq!(conflict.direction, Direction::Load);
            assert_eq!(conflict.comparison, None);
        }
        other => panic!("expected invalid cloud data, got {other:?}"),
    }
    // Neither path wrote anything on its own.
    assert_eq!(cloud_root(&remote).slot(0), Some(&broken));
    assert_eq!(session.pending_conflicts().count(), 2);
}

#[tokio::test]
async fn undecodable_cloud_document_is_invalid() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    remote.put_document(&web_path(USER), "%%% not a save %%%");
    let mut session = device(&remote, &clock);

    assert!(matches!(
        session.load_check().await.expect("load check"),
        LoadCheckOutcome::InvalidCloudData(CloudConflict { cloud: None, .. })
    ));
}

// ── Empty / missing ────────────────────────────────────────────

#[tokio::test]
async fn empty_cloud_slot_is_never_pulled() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    put_cloud(&remote, 1, save(9, 10, NOW));
    let mut session = device(&remote, &clock);
    session.storage.player_mut().set("antimatter", 55i64);

    assert!(matches!(
        session.load_check().await.expect("load check"),
        LoadCheckOutcome::EmptyCloudSlot { slot: 0 }
    ));
    assert_eq!(session.storage.player().get("antimatter"), Some(&SaveValue::Number(55.0)));

    assert!(matches!(
        session.save_check(false).await.expect("save check"),
        SaveCheckOutcome::Pushed(_)
    ));
}

#[tokio::test]
async fn missing_cloud_document_is_reported() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    let mut session = device(&remote, &clock);

    assert!(matches!(
        session.load_check().await.expect("load check"),
        LoadCheckOutcome::NoCloudSave
    ));
    assert!(session.drain_events().contains(&SaveEvent::NoCloudSave {
        user: Some("Alice".into())
    }));
}

#[tokio::test]
async fn logged_out_checks_are_refused() {
    let clock = Arc::new(ManualClock::new(NOW));
    let mut storage = storage(&clock);
    let mut cloud = CloudReconciler::new(
        Box::new(MemoryRemote::new()),
        &SaveConfig::default_test(),
        clock.clone(),
    );
    assert!(!cloud.logged_in());
    assert!(matches!(
        cloud.save_check(&mut storage, false).await,
        Err(SaveError::NotLoggedIn)
    ));

    cloud.login(identity());
    cloud.logout();
    assert!(matches!(cloud.load_check(&mut storage).await, Err(SaveError::NotLoggedIn)));
}

// ── Leases and stale fetches ───────────────────────────────────

#[tokio::test]
async fn busy_slot_blocks_other_operations() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    let mut session = device(&remote, &clock);

    let ticket = session
        .cloud
        .begin_check(Direction::Save, &session.storage, false)
        .expect("begin");
    assert!(matches!(
        session.cloud.begin_check(Direction::Load, &session.storage, false),
        Err(SaveError::SlotBusy { slot: 0 })
    ));
    assert!(matches!(session.load_slot(1), Err(SaveError::SlotBusy { slot: 0 })));
    assert!(matches!(session.hard_reset(), Err(SaveError::SlotBusy { slot: 0 })));
    assert!(matches!(session.import("anything"), Err(SaveError::SlotBusy { slot: 0 })));

    drop(ticket);
    session.load_slot(1).expect("switch after release");
}

#[tokio::test]
async fn fetch_finishing_after_slot_switch_is_discarded() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    put_cloud(&remote, 0, save(4, 10, NOW));
    let mut session = device(&remote, &clock);

    let ticket = session
        .cloud
        .begin_check(Direction::Load, &session.storage, false)
        .expect("begin");
    let fetched = session.cloud.fetch(ticket).await.expect("fetch");
    session.storage.load_slot(1).expect("embedder switched slots");

    let outcome = session
        .cloud
        .finish_load_check(fetched, &mut session.storage)
        .expect("finish");
    assert!(matches!(outcome, LoadCheckOutcome::Discarded));
    assert_eq!(session.storage.current_slot(), 1);
    assert_eq!(session.storage.player().get("realities"), Some(&SaveValue::Number(0.0)));
}

#[tokio::test]
async fn fetch_racing_local_progress_is_recompared() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    // At begin, the cloud is strictly ahead and would be pulled.
    put_cloud(&remote, 0, save(1, 10, NOW));
    let mut session = device(&remote, &clock);

    let ticket = session
        .cloud
        .begin_check(Direction::Load, &session.storage, false)
        .expect("begin");
    let fetched = session.cloud.fetch(ticket).await.expect("fetch");
    session.storage.player_mut().set("realities", 5i64);

    match session
        .cloud
        .finish_load_check(fetched, &mut session.storage)
        .expect("finish")
    {
        LoadCheckOutcome::Conflict(conflict) => {
            assert_eq!(conflict.comparison.map(|c| c.farther_ahead), Some(Side::Local));
        }
        other => panic!("newer local progress must not be overwritten, got {other:?}"),
    }
    assert_eq!(session.storage.player().get("realities"), Some(&SaveValue::Number(5.0)));
}

#[tokio::test]
async fn phased_push_captures_state_before_send() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    let mut session = device(&remote, &clock);
    session.storage.player_mut().set("antimatter", 100i64);

    let ticket = session
        .cloud
        .begin_check(Direction::Save, &session.storage, false)
        .expect("begin");
    let fetched = session.cloud.fetch(ticket).await.expect("fetch");
    let request = match session
        .cloud
        .finish_save_check(fetched, &mut session.storage)
        .expect("finish")
    {
        SaveCheckOutcome::Push(request) => request,
        other => panic!("expected a push request, got {other:?}"),
    };
    assert!(session.cloud.is_busy(0));

    session.storage.player_mut().set("antimatter", 999i64);
    session.cloud.send(request).await.expect("send");
    assert!(!session.cloud.is_busy(0));
    assert_eq!(
        cloud_root(&remote).slot(0).and_then(|p| p.get("antimatter")).cloned(),
        Some(SaveValue::Number(100.0))
    );
}

// ── Resolution and temp state ──────────────────────────────────

#[tokio::test]
async fn resolving_a_pull_conflict_loads_the_cloud_save() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    put_cloud(&remote, 0, save(0, 5, NOW));
    let mut session = device(&remote, &clock);

    let id = match session.load_check().await.expect("load check") {
        LoadCheckOutcome::Conflict(conflict) => conflict.id,
        other => panic!("expected conflict, got {other:?}"),
    };
    let outcome = session
        .resolve_conflict(id, Resolution::Overwrite)
        .await
        .expect("resolve");
    assert!(matches!(outcome, ResolveOutcome::Loaded { slot: 0 }));
    assert_eq!(session.storage.player().get("antimatter"), Some(&SaveValue::Number(5.0)));
    assert_eq!(session.pending_conflicts().count(), 0);
    assert!(session.resolve_conflict(id, Resolution::Keep).await.is_err());
}

fn from_newer_schema(mut save: PlayerState) -> PlayerState {
    save.set_version(CURRENT_VERSION + 1);
    save
}

fn assert_future_version(result: Result<impl std::fmt::Debug, SaveError>) {
    match result {
        Err(SaveError::Migration(MigrationError::FutureVersion { found, current })) => {
            assert_eq!(found, CURRENT_VERSION + 1);
            assert_eq!(current, CURRENT_VERSION);
        }
        other => panic!("expected future-version refusal, got {other:?}"),
    }
}

#[tokio::test]
async fn newer_schema_cloud_save_is_not_pulled_and_local_stays_writable() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    put_cloud(&remote, 0, from_newer_schema(save(1, 5, NOW - 1_000)));
    let mut session = device(&remote, &clock);
    session.storage.player_mut().set("antimatter", 777i64);

    assert_future_version(session.load_check().await);
    assert!(!session.storage.is_write_protected());
    assert!(!session.cloud.is_busy(0));
    assert_eq!(session.storage.player().get("antimatter"), Some(&SaveValue::Number(777.0)));
    assert_eq!(session.storage.player().version(), CURRENT_VERSION);

    session.storage.player_mut().set("antimatter", 778i64);
    assert_eq!(session.storage.save(false, true).expect("save"), SaveOutcome::Saved);
    assert!(session.storage.export().is_ok());
}

#[tokio::test]
async fn resolving_toward_a_newer_schema_cloud_save_changes_nothing() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    put_cloud(&remote, 0, from_newer_schema(save(0, 5, NOW)));
    let mut session = device(&remote, &clock);
    let before = session.storage.player().clone();

    let id = match session.load_check().await.expect("load check") {
        LoadCheckOutcome::Conflict(conflict) => conflict.id,
        other => panic!("expected conflict, got {other:?}"),
    };
    assert_future_version(session.resolve_conflict(id, Resolution::Overwrite).await);
    assert!(!session.storage.is_write_protected());
    assert_eq!(session.storage.player(), &before);
    assert_eq!(session.storage.save(false, false).expect("save"), SaveOutcome::Saved);
}

#[tokio::test]
async fn resolving_a_push_conflict_overwrites_the_cloud() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    put_cloud(&remote, 0, save(7, 10, NOW));
    let mut session = device(&remote, &clock);

    let id = match session.save_check(false).await.expect("save check") {
        SaveCheckOutcome::Conflict(conflict) => conflict.id,
        other => panic!("expected conflict, got {other:?}"),
    };
    assert!(matches!(
        session.resolve_conflict(id, Resolution::Overwrite).await.expect("resolve"),
        ResolveOutcome::Pushed(_)
    ));
    assert_eq!(cloud_root(&remote).slot(0), Some(session.storage.player()));
}

#[tokio::test]
async fn slot_switch_resets_cloud_temp_state() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    let mut session = device(&remote, &clock);
    session.save_check(false).await.expect("push");
    assert!(session.cloud.record().last_known_hash.is_some());

    clock.advance(5_000);
    session.load_slot(2).expect("switch");
    assert_eq!(session.cloud.record().last_known_hash, None);
    assert_eq!(session.cloud.last_cloud_save(), NOW + 5_000);
    assert!(session.drain_events().contains(&SaveEvent::CloudStateReset));
}

// ── Remotes ────────────────────────────────────────────────────

#[tokio::test]
async fn legacy_bundle_is_readable() {
    let remote = MemoryRemote::new();
    let clock = Arc::new(ManualClock::new(NOW));
    let old = save(0, 77, NOW);
    let bundle = codec::encode_bundle(&codec::encode(&old).expect("encode")).expect("bundle");
    remote.put_document(&legacy_path(USER), &bundle);
    let session = device(&remote, &clock);

    assert_eq!(session.cloud.load_legacy().await.expect("legacy"), Some(old));
}

#[tokio::test]
async fn sqlite_remote_stores_documents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("remote.db");
    let remote = SqliteRemote::open(path.to_str().expect("utf-8 path")).expect("open remote");

    assert_eq!(remote.get("users/bob/web").await.expect("get"), None);
    remote.set("users/bob/web", "payload").await.expect("set");
    remote.set("users/bob/web", "payload 2").await.expect("overwrite");
    assert_eq!(
        remote.get("users/bob/web").await.expect("get"),
        Some("payload 2".to_string())
    );
}
