mod common;

use lockwise_core::platform::SecretVault;
use lockwise_core::sync::scripted::Script;
use lockwise_core::{
    ErrorCause, RemoteSyncError, StorageState, StoreEvent, SyncChanges, SyncState, KEY_ENTRY,
};

use common::{
    record, unlock_info, wait_for, wait_for_event, wait_for_state, wait_for_sync_state, Harness,
};

#[tokio::test]
async fn test_unlock_syncs_and_applies_remote_changes() {
    let harness = Harness::new();
    let remote = record("https://remote.test", "carol");
    harness.remote.push(Script::Respond(Ok(SyncChanges {
        upserted: vec![remote.clone()],
        deleted: Vec::new(),
    })));

    let store = harness.start_unlocked().await;
    let mut list = store.list();
    let records = wait_for(&mut list, |records| !records.is_empty()).await;
    assert_eq!(records, vec![remote]);
    wait_for_sync_state(&store, SyncState::Synced).await;
    assert_eq!(harness.remote.calls(), 1);
}

#[tokio::test]
async fn test_remote_deletions_are_applied() {
    let harness = Harness::new();
    let store = harness.start_synced().await;
    let login = record("https://a.test", "alice");
    let id = login.id.clone();
    harness.remote.push(Script::Respond(Ok(SyncChanges {
        upserted: Vec::new(),
        deleted: vec![id.clone()],
    })));

    // The update triggers a sync that deletes the record remotely.
    store.update(login).await.expect("update");
    let mut list = store.list();
    wait_for(&mut list, Vec::is_empty).await;
    assert_eq!(store.get(id).await.expect("get"), None);
}

#[tokio::test]
async fn test_local_changes_are_uploaded() {
    let harness = Harness::new();
    let store = harness.start_synced().await;
    let login = record("https://a.test", "alice");
    store.update(login.clone()).await.expect("update");

    harness.wait_for_syncs(&store, 2).await;
    let uploads = harness.remote.uploads();
    assert_eq!(uploads.last(), Some(&vec![login]));
}

#[tokio::test]
async fn test_sync_while_syncing_is_ignored() {
    let harness = Harness::new();
    let gate = harness.remote.push_gated(Ok(SyncChanges::default()));
    let store = harness.start_unlocked().await;
    wait_for_sync_state(
        &store,
        SyncState::Syncing {
            suppress_notification: false,
        },
    )
    .await;

    store.sync(true).await.expect("sync");
    store.sync(false).await.expect("sync");
    assert_eq!(
        store.current_sync_state(),
        SyncState::Syncing {
            suppress_notification: false
        }
    );

    gate.notify_one();
    wait_for_sync_state(&store, SyncState::Synced).await;
    assert_eq!(harness.remote.calls(), 1);
}

#[tokio::test]
async fn test_sync_timeout_then_late_completion() {
    let harness = Harness::new().with_sync_timeout(50);
    let remote = record("https://late.test", "dave");
    let gate = harness.remote.push_gated(Ok(SyncChanges {
        upserted: vec![remote.clone()],
        deleted: Vec::new(),
    }));
    let store = harness.start();
    let mut events = store.events();
    store
        .update_credentials(unlock_info(), true)
        .await
        .expect("update credentials");

    wait_for_sync_state(&store, SyncState::TimedOut).await;
    wait_for_event(&mut events, |event| *event == StoreEvent::SyncTimedOut).await;
    assert_eq!(store.current_storage_state(), StorageState::Unlocked);

    gate.notify_one();
    let mut list = store.list();
    let records = wait_for(&mut list, |records| !records.is_empty()).await;
    assert_eq!(records, vec![remote]);
    wait_for_sync_state(&store, SyncState::Synced).await;
}

#[tokio::test]
async fn test_result_arriving_after_lock_is_discarded() {
    let harness = Harness::new();
    let gate = harness.remote.push_gated(Ok(SyncChanges {
        upserted: vec![record("https://remote.test", "erin")],
        deleted: Vec::new(),
    }));
    let store = harness.start_unlocked().await;
    store.lock().await.expect("lock");

    gate.notify_one();
    wait_for_sync_state(&store, SyncState::Synced).await;
    assert!(store.current_list().is_empty());

    store.unlock().await.expect("unlock");
    assert!(store.current_list().is_empty());
}

#[tokio::test]
async fn test_auth_failure_resets_and_unlinks() {
    let harness = Harness::new();
    harness
        .remote
        .push(Script::Respond(Err(RemoteSyncError::AuthInvalid(
            "401 from token server".to_string(),
        ))));
    let store = harness.start();
    let mut events = store.events();
    store
        .update_credentials(unlock_info(), true)
        .await
        .expect("update credentials");

    let event = wait_for_event(&mut events, |event| matches!(event, StoreEvent::Error { .. })).await;
    assert!(matches!(
        event,
        StoreEvent::Error {
            cause: ErrorCause::AuthInvalid,
            ..
        }
    ));
    wait_for_state(&store, StorageState::Unprepared).await;

    assert_eq!(harness.account.unlink_count(), 1);
    assert!(store.current_list().is_empty());
    assert!(!harness.db_path().exists());
    assert!(harness.vault.get(KEY_ENTRY).expect("get").is_none());
}

#[tokio::test]
async fn test_invalid_key_resets_too() {
    let harness = Harness::new();
    harness
        .remote
        .push(Script::Respond(Err(RemoteSyncError::InvalidKey(
            "hmac mismatch".to_string(),
        ))));
    let store = harness.start();
    let mut events = store.events();
    store
        .update_credentials(unlock_info(), true)
        .await
        .expect("update credentials");

    let event = wait_for_event(&mut events, |event| matches!(event, StoreEvent::Error { .. })).await;
    assert!(matches!(
        event,
        StoreEvent::Error {
            cause: ErrorCause::InvalidKey,
            ..
        }
    ));
    wait_for_state(&store, StorageState::Unprepared).await;
    assert_eq!(harness.account.unlink_count(), 1);
}

#[tokio::test]
async fn test_transient_failure_reports_and_settles() {
    let harness = Harness::new();
    harness
        .remote
        .push(Script::Respond(Err(RemoteSyncError::Network(
            "connection reset".to_string(),
        ))));
    let store = harness.start();
    let mut events = store.events();
    store
        .update_credentials(unlock_info(), true)
        .await
        .expect("update credentials");

    let event =
        wait_for_event(&mut events, |event| matches!(event, StoreEvent::SyncFailed { .. })).await;
    assert_eq!(
        event,
        StoreEvent::SyncFailed {
            reason: "network error: connection reset".to_string()
        }
    );
    wait_for_sync_state(&store, SyncState::Synced).await;
    assert_eq!(store.current_storage_state(), StorageState::Unlocked);
    assert_eq!(harness.account.unlink_count(), 0);
}

#[tokio::test]
async fn test_offline_sync_is_a_no_op() {
    let harness = Harness::new();
    harness.network.set_online(false);
    let store = harness.start_unlocked().await;

    store.sync(false).await.expect("sync");
    assert_eq!(store.current_sync_state(), SyncState::Synced);
    assert_eq!(harness.remote.calls(), 0);
}

#[tokio::test]
async fn test_sync_without_unlock_is_skipped() {
    let harness = Harness::new();
    let store = harness.start();
    store.sync(false).await.expect("sync");
    assert_eq!(store.current_sync_state(), SyncState::Synced);
    assert_eq!(harness.remote.calls(), 0);
}
