mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{last_line, sample_bytes, FakeTranscoder, HangingTranscoder, Harness};
use tokio::sync::Notify;
use tessera_core::models::{ImportOptions, ImportStatus};
use tessera_db::ImportRepository;
use tessera_processing::hash_bytes;
use tessera_services::Principal;

fn optimize() -> ImportOptions {
    ImportOptions {
        optimize: true,
        transcription: true,
        ..Default::default()
    }
}

fn place_avi(h: &Harness, seed: u8) -> (String, Vec<u8>) {
    let dir = h.path("srv/in");
    std::fs::create_dir_all(&dir).unwrap();
    let data = sample_bytes(20_000, seed);
    let path = dir.join("a.avi");
    std::fs::write(&path, &data).unwrap();
    (path.display().to_string(), data)
}

#[tokio::test]
async fn test_avi_gets_mp4_derivative() {
    let h = Harness::new().await;
    let (path, data) = place_avi(&h, 10);
    let import = h
        .imports
        .create_server_import(&Principal::anonymous(), "srv-batch", &path, optimize())
        .await
        .unwrap();

    let journal = h.drive(import.id).await;
    assert_eq!(journal.status, ImportStatus::Success, "{}", journal.log);
    assert_eq!(journal.file_hash.as_deref(), Some(hash_bytes(&data).as_str()));
    assert_eq!(journal.file_format.as_deref(), Some("avi"));

    let media = h.db.all_media();
    assert_eq!(media.len(), 2);
    let original = media.iter().find(|m| m.main).unwrap();
    let derived = media.iter().find(|m| !m.main).unwrap();
    assert_eq!(original.media_file_type, "video/x-msvideo");
    assert_eq!(derived.media_file_type, "video/mp4");
    assert!(derived.media_file.ends_with(".mp4"));
    assert_ne!(original.etag, derived.etag);
    assert_eq!(original.etag, hash_bytes(&data));
    assert_eq!(original.duration.as_deref(), Some("12"));
    assert_eq!(derived.duration.as_deref(), Some("12"));
    assert_eq!(original.bulletin_id, derived.bulletin_id);
    assert!(h.object_exists(&original.media_file).await);
    assert!(h.object_exists(&derived.media_file).await);

    let bulletin = &h.db.all_bulletins()[0];
    assert_eq!(bulletin.origin_id.as_deref(), Some(path.as_str()));
    assert_eq!(bulletin.title, "a");
    assert!(bulletin.description.contains("all units report"));
    // the source file stays where the operator left it
    assert!(std::path::Path::new(&path).exists());
}

#[tokio::test]
async fn test_failed_transcode_keeps_original_only() {
    let h = Harness::with_transcoder(Some(FakeTranscoder { fail: true })).await;
    let (path, _) = place_avi(&h, 11);
    let import = h
        .imports
        .create_server_import(&Principal::anonymous(), "b", &path, optimize())
        .await
        .unwrap();

    let journal = h.drive(import.id).await;
    assert_eq!(journal.status, ImportStatus::Success);
    assert!(journal.log_lines().iter().any(|l| l.contains("transcode failed")));
    let media = h.db.all_media();
    assert_eq!(media.len(), 1);
    assert!(media[0].main);
}

#[tokio::test]
async fn test_missing_server_file_fails() {
    let h = Harness::new().await;
    let path = h.path("srv/in/gone.avi").display().to_string();
    let import = h
        .imports
        .create_server_import(&Principal::anonymous(), "b", &path, ImportOptions::default())
        .await
        .unwrap();

    let journal = h.drive(import.id).await;
    assert_eq!(journal.status, ImportStatus::Failed);
    assert!(last_line(&journal).contains("not-found"));
}

#[tokio::test]
async fn test_cancel_before_run_fails_without_bulletin() {
    let h = Harness::new().await;
    let (path, _) = place_avi(&h, 12);
    let import = h
        .imports
        .create_server_import(&Principal::anonymous(), "b", &path, optimize())
        .await
        .unwrap();
    assert!(h.imports.cancel(import.id).await.unwrap());

    let journal = h.drive(import.id).await;
    assert_eq!(journal.status, ImportStatus::Failed);
    assert!(last_line(&journal).ends_with("cancelled"));
    assert!(h.db.all_bulletins().is_empty());
    assert!(h.db.is_cancel_requested(import.id).await.unwrap());
}

#[tokio::test]
async fn test_cancel_during_transcode_keeps_stored_original() {
    let started = Arc::new(Notify::new());
    let h = Harness::build(Some(Arc::new(HangingTranscoder {
        started: started.clone(),
    })))
    .await;
    let (path, data) = place_avi(&h, 14);
    let import = h
        .imports
        .create_server_import(&Principal::anonymous(), "b", &path, optimize())
        .await
        .unwrap();

    let run = h.drive(import.id);
    let cancel = async {
        started.notified().await;
        assert!(h.imports.cancel(import.id).await.unwrap());
    };
    let (journal, ()) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(run, cancel)
    })
    .await
    .expect("transcode was not interrupted");

    assert_eq!(journal.status, ImportStatus::Failed);
    assert!(last_line(&journal).ends_with("cancelled"));
    assert!(h.db.all_bulletins().is_empty());
    assert!(h.db.all_media().is_empty());
    // Bytes stored before the cancel stay in place.
    assert_eq!(h.stored_objects(), vec![data]);
}

#[tokio::test]
async fn test_duplicate_server_file_conflicts() {
    let h = Harness::new().await;
    let (path, _) = place_avi(&h, 13);
    let user = Principal::anonymous();
    let first = h
        .imports
        .create_server_import(&user, "b", &path, ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(h.drive(first.id).await.status, ImportStatus::Success);

    let second = h
        .imports
        .create_server_import(&user, "b", &path, ImportOptions::default())
        .await
        .unwrap();
    let journal = h.drive(second.id).await;
    assert_eq!(journal.status, ImportStatus::Failed);
    assert!(last_line(&journal).contains("duplicate file"));
    assert_eq!(h.db.all_media().len(), 1);
}
