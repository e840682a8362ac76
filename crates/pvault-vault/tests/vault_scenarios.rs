//! End-to-end vault behaviour: key idempotence, photo round trip, tamper
//! detection, partial wipe reporting, and ephemeral cleanup on lifecycle
//! events.

mod common;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{photo_bytes, CountingCrypto, FaultyFs, Harness, MemoryStorage};
use pvault_core::VaultError;
use pvault_secrets::SecureStorageProvider;
use pvault_vault::{KeyVault, LifecycleEvent, SecureEraser, UpgradeOutcome};

#[tokio::test]
async fn fresh_device_creates_one_key_and_reuses_it() {
    let storage = Arc::new(MemoryStorage::default());
    let crypto = Arc::new(CountingCrypto::default());

    let first = {
        let vault = KeyVault::new(storage.clone(), crypto.clone(), 1);
        let key = vault.ensure_key().await.unwrap();
        assert_eq!(key.version, 1);
        assert_eq!(key.material.as_bytes().len(), 32);
        assert_eq!(vault.ensure_key().await.unwrap(), key);
        key
    };

    // later session: same storage, new vault instance
    let vault = KeyVault::new(storage.clone(), crypto.clone(), 1);
    assert_eq!(vault.ensure_key().await.unwrap(), first);
    assert_eq!(crypto.keys_generated.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_first_run_generates_a_single_key() {
    let storage = Arc::new(MemoryStorage::default());
    let crypto = Arc::new(CountingCrypto::default());
    let vault = Arc::new(KeyVault::new(storage, crypto.clone(), 1));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let vault = vault.clone();
            tokio::spawn(async move { vault.ensure_key().await })
        })
        .collect();

    let mut keys = Vec::new();
    for handle in handles {
        keys.push(handle.await.unwrap().unwrap());
    }
    assert!(keys.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(crypto.keys_generated.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn photo_round_trip_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    let controller = harness.ready_controller().await;
    let blobs = controller.blobs();

    let photo = photo_bytes(500 * 1024, 7);
    let blob = blobs.encrypt(&photo, &Default::default()).await.unwrap();
    assert!(blob.ciphertext_path.exists());
    assert_eq!(blob.plaintext_len, photo.len() as u64);

    let view = blobs.decrypt(&blob).await.unwrap();
    assert_eq!(std::fs::read(&view.path).unwrap(), photo);

    blobs.delete(&blob).await.unwrap();
    assert!(!blob.ciphertext_path.exists());
}

#[tokio::test]
async fn flipped_ciphertext_byte_is_an_integrity_error() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    let controller = harness.ready_controller().await;
    let blobs = controller.blobs();

    let blob = blobs.encrypt(&photo_bytes(4096, 1), &Default::default()).await.unwrap();
    let mut on_disk = std::fs::read(&blob.ciphertext_path).unwrap();
    on_disk[100] ^= 0x01;
    std::fs::write(&blob.ciphertext_path, &on_disk).unwrap();

    assert_eq!(blobs.decrypt(&blob).await.unwrap_err(), VaultError::Integrity);
    assert!(
        blobs.ephemeral().files().await.unwrap().is_empty(),
        "no plaintext written on integrity failure"
    );
}

#[tokio::test]
async fn partial_wipe_reports_per_item_failures() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(MemoryStorage::default());
    let fs = Arc::new(FaultyFs::default());

    let names: Vec<String> = (0..10).map(|i| format!("secret-{i}")).collect();
    for name in &names {
        storage.set(name, "sensitive value").await.unwrap();
    }
    let blobs: Vec<PathBuf> = (0..5)
        .map(|i| dir.path().join(format!("photo-{i}.blob")))
        .collect();
    for blob in &blobs {
        std::fs::write(blob, photo_bytes(2048, 3)).unwrap();
    }
    fs.fail_on(&blobs[1]);
    fs.fail_on(&blobs[3]);

    let eraser = SecureEraser::new(storage.clone(), Arc::new(CountingCrypto::default()), fs, 1);
    let report = eraser.wipe_all(&names, &blobs).await;

    assert_eq!(report.deleted_entries, 10);
    assert_eq!(report.deleted_blobs, 3);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(
        report.partial_failure(),
        Some(VaultError::WipePartialFailure { failed: 2 })
    );
    for name in &names {
        assert_eq!(storage.get(name).await.unwrap(), None);
    }
    for (i, blob) in blobs.iter().enumerate() {
        assert_eq!(blob.exists(), i == 1 || i == 3);
    }
}

#[tokio::test]
async fn wipe_leaves_no_entries_or_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(MemoryStorage::default());
    let names: Vec<String> = (0..4).map(|i| format!("entry-{i}")).collect();
    for name in &names {
        storage.set(name, &"x".repeat(60)).await.unwrap();
    }
    let blobs: Vec<PathBuf> = (0..3).map(|i| dir.path().join(format!("{i}.blob"))).collect();
    for blob in &blobs {
        std::fs::write(blob, b"ciphertext||tag").unwrap();
    }

    let eraser = SecureEraser::new(
        storage.clone(),
        Arc::new(CountingCrypto::default()),
        Arc::new(FaultyFs::default()),
        2,
    );
    let report = eraser.wipe_all(&names, &blobs).await;

    assert!(report.is_complete());
    assert!(storage.snapshot().is_empty());
    assert!(blobs.iter().all(|b| !b.exists()));
}

#[tokio::test]
async fn background_event_removes_ephemeral_file() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    let controller = harness.ready_controller().await;
    let record = controller
        .capture_photo(&photo_bytes(10_000, 9), Default::default())
        .await
        .unwrap();

    let view = controller.view_photo(record.id()).await.unwrap();
    assert!(view.path.exists());

    controller
        .on_lifecycle(LifecycleEvent::Background)
        .await
        .unwrap();
    assert!(!view.path.exists());

    // reopening the viewer decrypts again
    let decrypts_before = harness.crypto.decrypts.load(Ordering::SeqCst);
    let reopened = controller.view_photo(record.id()).await.unwrap();
    assert!(reopened.path.exists());
    assert_eq!(
        harness.crypto.decrypts.load(Ordering::SeqCst),
        decrypts_before + 1
    );
}

#[tokio::test]
async fn viewer_close_cleans_up_session_file() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    let controller = harness.ready_controller().await;
    let record = controller
        .capture_photo(b"jpeg", Default::default())
        .await
        .unwrap();

    let view = controller.view_photo(record.id()).await.unwrap();
    for event in [
        LifecycleEvent::ViewerClosed,
        LifecycleEvent::Foreground,
        LifecycleEvent::Teardown,
    ] {
        controller.on_lifecycle(event).await.unwrap();
        assert!(!view.path.exists());
    }
}

#[tokio::test]
async fn concurrent_decrypts_share_one_aead_call() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(dir.path());
    let controller = harness.ready_controller().await;
    let blobs = controller.blobs();

    let blob = blobs.encrypt(&photo_bytes(64 * 1024, 2), &Default::default()).await.unwrap();
    *harness.fs.read_delay.lock().unwrap() = Duration::from_millis(50);

    let results = futures::future::join_all((0..8).map(|_| blobs.decrypt(&blob))).await;
    let first = results[0].clone().unwrap();
    for result in results {
        assert_eq!(result.unwrap(), first);
    }
    assert_eq!(harness.crypto.decrypts.load(Ordering::SeqCst), 1);
    assert_eq!(blobs.ephemeral().files().await.unwrap().len(), 1);
}

#[tokio::test]
async fn upgrade_never_decreases_version() {
    let storage = Arc::new(MemoryStorage::default());
    let vault = KeyVault::new(storage, Arc::new(CountingCrypto::default()), 2);

    assert_eq!(vault.ensure_key().await.unwrap().version, 2);
    for target in [1, 2] {
        assert_eq!(
            vault.check_and_upgrade(target).await.unwrap(),
            UpgradeOutcome::UpToDate { version: 2 }
        );
    }
    assert_eq!(
        vault.check_and_upgrade(4).await.unwrap(),
        UpgradeOutcome::Upgraded { from: 2, to: 4 }
    );
    assert_eq!(
        vault.check_and_upgrade(3).await.unwrap(),
        UpgradeOutcome::UpToDate { version: 4 }
    );
}
