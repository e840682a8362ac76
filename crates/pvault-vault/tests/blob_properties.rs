//! Property tests through the blob store: every plaintext comes back from its
//! blob file, and any single flipped bit in the stored file is rejected.

mod common;

use proptest::prelude::*;
use pvault_core::VaultError;
use pvault_vault::VaultController;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn ready(root: &std::path::Path) -> VaultController {
    common::Harness::new(root).ready_controller().await
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn blob_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..8192)) {
        let dir = tempfile::tempdir().unwrap();
        let decrypted = runtime().block_on(async {
            let controller = ready(dir.path()).await;
            let blob = controller.blobs().encrypt(&plaintext, &Default::default()).await.unwrap();
            let view = controller.blobs().decrypt(&blob).await.unwrap();
            std::fs::read(&view.path).unwrap()
        });
        prop_assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn flipped_bit_in_blob_file_is_rejected(
        plaintext in proptest::collection::vec(any::<u8>(), 1..2048),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let (result, ephemeral_files) = runtime().block_on(async {
            let controller = ready(dir.path()).await;
            let blob = controller.blobs().encrypt(&plaintext, &Default::default()).await.unwrap();

            // covers both the ciphertext and the trailing tag
            let mut on_disk = std::fs::read(&blob.ciphertext_path).unwrap();
            let i = position.index(on_disk.len());
            on_disk[i] ^= 1 << bit;
            std::fs::write(&blob.ciphertext_path, &on_disk).unwrap();

            let result = controller.blobs().decrypt(&blob).await;
            let files = controller.blobs().ephemeral().files().await.unwrap();
            (result, files.len())
        });
        prop_assert_eq!(result, Err(VaultError::Integrity));
        prop_assert_eq!(ephemeral_files, 0);
    }
}
