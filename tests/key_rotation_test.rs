// ABOUTME: Integration tests for key generation, persistence, rotation and the rotation scheduler
// ABOUTME: Covers key continuity across rotations and all-or-nothing rotation on broker failure
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 TaskHub Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use common::{cached_key_pair, create_test_stack, wait_until, FailingBroker, TEST_TOPIC};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use taskhub_auth::{
    broker::KeyBroker,
    constants::keys::{PRIVATE_KEY_FILE, PUBLIC_KEY_FILE, VERSION_FILE},
    errors::ErrorCode,
    keys::{
        KeyRotationScheduler, KeyUpdateConsumer, KeyUpdatePublisher, KeyVersionStore,
        SchedulerState,
    },
    models::KeyUpdateMessage,
};
use tempfile::TempDir;
use uuid::Uuid;

#[tokio::test]
async fn test_rotation_publishes_and_advances_version() {
    let stack = create_test_stack(1).await;
    let mut updates = stack.broker.subscribe(TEST_TOPIC).await.unwrap();

    let outcome = stack.publisher.rotate().await.unwrap();
    assert_eq!(outcome.key_version, 2);
    assert_eq!(stack.store.current_version().await, 2);
    assert_eq!(stack.store.signing_key().await.version, 2);

    let payload = tokio::time::timeout(Duration::from_secs(2), updates.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let message = KeyUpdateMessage::from_payload(&payload).unwrap();
    assert_eq!(message.key_version, 2);
    assert_eq!(message.service_name, "userService");
    assert_eq!(message.public_key_pem, outcome.public_key_pem);
}

#[tokio::test]
async fn test_tokens_from_old_key_survive_rotation() {
    let stack = create_test_stack(1).await;
    let consumer = KeyUpdateConsumer::new(
        Arc::clone(&stack.broker) as Arc<dyn KeyBroker>,
        Arc::clone(&stack.registry),
        TEST_TOPIC,
        Duration::from_millis(50),
    )
    .start()
    .await;

    let user_id = Uuid::new_v4();
    let old_token = stack.login(user_id, &["read"]).await;

    stack.publisher.rotate().await.unwrap();
    let registry = Arc::clone(&stack.registry);
    assert!(
        wait_until(Duration::from_secs(2), || {
            let registry = Arc::clone(&registry);
            async move { registry.latest_version().await == Some(2) }
        })
        .await
    );

    let new_token = stack.login(user_id, &["read"]).await;

    let old = stack.verifier.verify(&old_token).await.unwrap();
    assert_eq!(old.key_version, 1);
    let new = stack.verifier.verify(&new_token).await.unwrap();
    assert_eq!(new.key_version, 2);

    consumer.shutdown().await;
}

#[tokio::test]
async fn test_failed_publish_keeps_previous_key() {
    let stack = create_test_stack(4).await;
    let publisher = KeyUpdatePublisher::new(
        Arc::clone(&stack.store),
        Arc::new(FailingBroker),
        TEST_TOPIC,
        2048,
    );
    let before = stack.store.current_record().await;

    let err = publisher.rotate().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::BrokerUnavailable);

    let after = stack.store.current_record().await;
    assert_eq!(after.version, 4);
    assert_eq!(after.public_key_pem, before.public_key_pem);

    // Tokens are still signed with the old key and verify against the registry
    let token = stack.login(Uuid::new_v4(), &[]).await;
    assert_eq!(stack.verifier.verify(&token).await.unwrap().key_version, 4);
}

#[tokio::test]
async fn test_key_files_survive_restart() {
    let dir = TempDir::new().unwrap();

    let first = KeyVersionStore::load_or_bootstrap(dir.path(), 2048, "userService")
        .await
        .unwrap();
    assert_eq!(first.current_version().await, 0);
    for file in [PRIVATE_KEY_FILE, PUBLIC_KEY_FILE, VERSION_FILE] {
        assert!(dir.path().join(file).exists(), "{file} missing");
    }

    let store = Arc::new(first);
    let broker = Arc::new(taskhub_auth::broker::InMemoryKeyBroker::new());
    let publisher = KeyUpdatePublisher::new(Arc::clone(&store), broker, TEST_TOPIC, 2048);
    let rotated = publisher.rotate().await.unwrap();
    assert_eq!(rotated.key_version, 1);

    let reloaded = KeyVersionStore::load_or_bootstrap(dir.path(), 2048, "userService")
        .await
        .unwrap();
    assert_eq!(reloaded.current_version().await, 1);
    assert_eq!(
        reloaded.current_record().await.public_key_pem,
        rotated.public_key_pem
    );
}

#[tokio::test]
async fn test_failed_rotation_leaves_key_files_untouched() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        KeyVersionStore::load_or_bootstrap(dir.path(), 2048, "userService")
            .await
            .unwrap(),
    );
    let private_before = std::fs::read_to_string(dir.path().join(PRIVATE_KEY_FILE)).unwrap();

    let publisher =
        KeyUpdatePublisher::new(Arc::clone(&store), Arc::new(FailingBroker), TEST_TOPIC, 2048);
    assert!(publisher.rotate().await.is_err());

    let private_after = std::fs::read_to_string(dir.path().join(PRIVATE_KEY_FILE)).unwrap();
    assert_eq!(private_before, private_after);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".next"))
        .collect();
    assert!(leftovers.is_empty(), "staged files were not cleaned up");

    let reloaded = KeyVersionStore::load_or_bootstrap(dir.path(), 2048, "userService")
        .await
        .unwrap();
    assert_eq!(reloaded.current_version().await, 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_private_key_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    KeyVersionStore::load_or_bootstrap(dir.path(), 2048, "userService")
        .await
        .unwrap();

    let mode = std::fs::metadata(dir.path().join(PRIVATE_KEY_FILE))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn test_announce_current_republishes_active_key() {
    let stack = create_test_stack(7).await;
    stack.publisher.announce_current().await.unwrap();

    let retained = stack.broker.retained(TEST_TOPIC).await.unwrap();
    assert_eq!(retained.len(), 1);
    let message = KeyUpdateMessage::from_payload(&retained[0]).unwrap();
    assert_eq!(message.key_version, 7);
    assert_eq!(stack.store.current_version().await, 7);
}

#[tokio::test]
async fn test_scheduler_rejects_zero_interval() {
    let stack = create_test_stack(0).await;
    let err =
        KeyRotationScheduler::start(Arc::clone(&stack.publisher), Duration::ZERO).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
}

#[tokio::test]
async fn test_scheduler_rotates_on_tick() {
    let stack = create_test_stack(0).await;
    let scheduler =
        KeyRotationScheduler::start(Arc::clone(&stack.publisher), Duration::from_millis(100))
            .unwrap();
    assert_eq!(scheduler.interval(), Duration::from_millis(100));

    let store = Arc::clone(&stack.store);
    assert!(
        wait_until(Duration::from_secs(20), || {
            let store = Arc::clone(&store);
            async move { store.current_version().await >= 1 }
        })
        .await
    );

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_scheduler_stop_is_idempotent_and_non_blocking() {
    let stack = create_test_stack(0).await;
    let scheduler =
        KeyRotationScheduler::start(Arc::clone(&stack.publisher), Duration::from_secs(3600))
            .unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    scheduler.stop();
    scheduler.stop();
    scheduler.stop();

    let stopped = wait_until(Duration::from_secs(2), || {
        let state = scheduler.state();
        async move { state == SchedulerState::Stopped }
    })
    .await;
    assert!(stopped);

    // Stopping an already stopped scheduler is harmless
    scheduler.stop();
    scheduler.shutdown().await;
    assert_eq!(stack.store.current_version().await, 0);
}

#[tokio::test]
async fn test_cached_keys_are_distinct() {
    let a = cached_key_pair(0).public_key_pem().unwrap();
    let b = cached_key_pair(1).public_key_pem().unwrap();
    assert_ne!(a, b);
}
