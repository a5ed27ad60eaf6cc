mod common;

use common::{id, FakeFetcher, FakeTranscoder, FetchMode, Harness, TranscodeMode};
use futures::future::join_all;
use pmotrackcache::{Error, RecordStore, Source};
use std::time::Duration;

#[tokio::test]
async fn test_miss_then_idempotent_hit() {
    let h = Harness::new(
        FakeFetcher::new(FetchMode::Ok),
        FakeTranscoder::new(TranscodeMode::Ok(1000)),
    )
    .await;
    let track = id("dQw4w9WgXcQ");

    let first = h.cache.resolve(&track).await.unwrap();
    assert_eq!(first.source, Source::Fetched);
    assert_eq!(first.size_bytes, 1000);
    assert_eq!(first.path, h.audio_dir().join("dQw4w9WgXcQ.mp3"));

    let second = h.cache.resolve(&track).await.unwrap();
    assert_eq!(second.source, Source::Cached);
    assert_eq!(second.path, first.path);

    assert_eq!(h.fetcher.calls(), 1);
    assert_eq!(h.transcoder.calls(), 1);

    let entry = h.db.find_by_entry_id(&track).unwrap().unwrap();
    assert!(entry.is_downloaded);
    assert_eq!(h.cache.storage().usage(), 1000);
    assert_eq!(h.cache.storage().file_count(), 1);

    // Le staging est vidé, aucun fichier partiel ne subsiste
    assert!(Harness::list(&h.staging_dir()).is_empty());
    assert_eq!(Harness::list(&h.audio_dir()), vec!["dQw4w9WgXcQ.mp3"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolves_fetch_once() {
    let h = Harness::new(
        FakeFetcher::with_delay(FetchMode::Ok, Duration::from_millis(150)),
        FakeTranscoder::new(TranscodeMode::Ok(1000)),
    )
    .await;
    let track = id("dQw4w9WgXcQ");

    let results = join_all((0..8).map(|_| {
        let cache = h.cache.clone();
        let track = track.clone();
        async move { cache.resolve(&track).await }
    }))
    .await;

    for result in &results {
        let resolved = result.as_ref().unwrap();
        assert_eq!(resolved.path, h.audio_dir().join("dQw4w9WgXcQ.mp3"));
    }
    assert_eq!(h.fetcher.calls(), 1);
    assert_eq!(h.transcoder.calls(), 1);
    assert_eq!(h.cache.storage().usage(), 1000);
}

#[tokio::test]
async fn test_abandoned_request_still_completes() {
    let h = Harness::new(
        FakeFetcher::with_delay(FetchMode::Ok, Duration::from_millis(100)),
        FakeTranscoder::new(TranscodeMode::Ok(500)),
    )
    .await;
    let track = id("dQw4w9WgXcQ");

    let abandoned = tokio::time::timeout(Duration::from_millis(10), h.cache.resolve(&track)).await;
    assert!(abandoned.is_err());
    assert!(h.cache.is_in_flight(&track));

    for _ in 0..100 {
        if !h.cache.is_in_flight(&track) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(h.audio_dir().join("dQw4w9WgXcQ.mp3").exists());
    let again = h.cache.resolve(&track).await.unwrap();
    assert_eq!(again.source, Source::Cached);
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_fetch_failure_cleans_staging() {
    let h = Harness::new(
        FakeFetcher::new(FetchMode::Fail),
        FakeTranscoder::new(TranscodeMode::Ok(1000)),
    )
    .await;
    let track = id("dQw4w9WgXcQ");

    let err = h.cache.resolve(&track).await.unwrap_err();
    assert!(matches!(err, Error::FetchFailed(_)));
    assert_eq!(err.status_code(), 500);

    assert!(Harness::list(&h.staging_dir()).is_empty());
    assert!(Harness::list(&h.audio_dir()).is_empty());
    assert_eq!(h.transcoder.calls(), 0);
    assert!(h.db.find_by_entry_id(&track).unwrap().is_none());
    assert!(!h.cache.is_in_flight(&track));
}

#[tokio::test]
async fn test_missing_artifact_is_a_fetch_failure() {
    let h = Harness::new(
        FakeFetcher::new(FetchMode::NoArtifact),
        FakeTranscoder::new(TranscodeMode::Ok(1000)),
    )
    .await;

    let err = h.cache.resolve(&id("dQw4w9WgXcQ")).await.unwrap_err();
    assert!(matches!(err, Error::FetchArtifactMissing(_)));
    assert_eq!(err.code(), "FETCH_FAILED");
    assert_eq!(h.transcoder.calls(), 0);
}

#[tokio::test]
async fn test_transcode_failure_removes_partial_and_staging() {
    let h = Harness::new(
        FakeFetcher::new(FetchMode::Ok),
        FakeTranscoder::new(TranscodeMode::Fail),
    )
    .await;
    let track = id("dQw4w9WgXcQ");

    let err = h.cache.resolve(&track).await.unwrap_err();
    assert_eq!(err.code(), "TRANSCODE_FAILED");

    assert!(Harness::list(&h.staging_dir()).is_empty());
    assert!(Harness::list(&h.audio_dir()).is_empty());
    assert_eq!(h.cache.storage().usage(), 0);

    // Nouvelle tentative : pas de mémoire de l'échec
    let _ = h.cache.resolve(&track).await;
    assert_eq!(h.fetcher.calls(), 2);
}

#[tokio::test]
async fn test_empty_output_is_a_transcode_failure() {
    let h = Harness::new(
        FakeFetcher::new(FetchMode::Ok),
        FakeTranscoder::new(TranscodeMode::Empty),
    )
    .await;

    let err = h.cache.resolve(&id("dQw4w9WgXcQ")).await.unwrap_err();
    assert!(matches!(err, Error::TranscodeFailed(_)));
    assert!(Harness::list(&h.audio_dir()).is_empty());
}

#[tokio::test]
async fn test_missing_file_is_refetched() {
    let h = Harness::new(
        FakeFetcher::new(FetchMode::Ok),
        FakeTranscoder::new(TranscodeMode::Ok(1000)),
    )
    .await;
    let track = id("dQw4w9WgXcQ");

    h.cache.resolve(&track).await.unwrap();
    std::fs::remove_file(h.audio_dir().join("dQw4w9WgXcQ.mp3")).unwrap();

    // lookup corrige l'entrée sans retélécharger
    assert!(h.cache.lookup(&track).await.unwrap().is_none());
    assert!(!h.db.find_by_entry_id(&track).unwrap().unwrap().is_downloaded);

    let again = h.cache.resolve(&track).await.unwrap();
    assert_eq!(again.source, Source::Fetched);
    assert_eq!(h.fetcher.calls(), 2);
}

#[tokio::test]
async fn test_file_on_disk_without_record_is_served() {
    let h = Harness::new(
        FakeFetcher::new(FetchMode::Ok),
        FakeTranscoder::new(TranscodeMode::Ok(1000)),
    )
    .await;
    let track = id("abc_DEF-123");
    std::fs::write(h.audio_dir().join("abc_DEF-123.mp3"), vec![1u8; 64]).unwrap();

    let resolved = h.cache.resolve(&track).await.unwrap();
    assert_eq!(resolved.source, Source::Cached);
    assert_eq!(resolved.size_bytes, 64);
    assert_eq!(h.fetcher.calls(), 0);
    assert!(h.db.find_by_entry_id(&track).unwrap().unwrap().is_downloaded);
}

#[tokio::test]
async fn test_delete() {
    let h = Harness::new(
        FakeFetcher::new(FetchMode::Ok),
        FakeTranscoder::new(TranscodeMode::Ok(1000)),
    )
    .await;
    let kept = id("aaaaaaaaaaa");
    let gone = id("bbbbbbbbbbb");

    h.cache.resolve(&kept).await.unwrap();
    h.cache.resolve(&gone).await.unwrap();
    h.db.record_play(&gone).unwrap();
    assert_eq!(h.cache.storage().usage(), 2000);

    h.cache.delete(&gone).await.unwrap();
    assert_eq!(h.cache.storage().usage(), 1000);
    assert!(!h.audio_dir().join("bbbbbbbbbbb.mp3").exists());

    let entry = h.db.find_by_entry_id(&gone).unwrap().unwrap();
    assert!(!entry.is_downloaded);
    assert_eq!(entry.play_count, 1);

    // Supprimer une piste absente : 404 et occupation inchangée
    let err = h.cache.delete(&gone).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    let err = h.cache.delete(&id("nevercached")).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_eq!(h.cache.storage().usage(), 1000);
}

#[tokio::test]
async fn test_record_play_detached() {
    let h = Harness::new(
        FakeFetcher::new(FetchMode::Ok),
        FakeTranscoder::new(TranscodeMode::Ok(10)),
    )
    .await;
    let track = id("dQw4w9WgXcQ");
    h.cache.resolve(&track).await.unwrap();

    h.cache.record_play_detached(&track).await.unwrap();
    h.cache.record_play_detached(&track).await.unwrap();

    assert_eq!(h.db.find_by_entry_id(&track).unwrap().unwrap().play_count, 2);
    assert_eq!(h.db.play_history_count(&track).unwrap(), 2);
}

#[tokio::test]
async fn test_consolidate_repairs_state() {
    let h = Harness::new(
        FakeFetcher::new(FetchMode::Ok),
        FakeTranscoder::new(TranscodeMode::Ok(300)),
    )
    .await;
    let vanished = id("aaaaaaaaaaa");
    let orphan = id("bbbbbbbbbbb");

    h.cache.resolve(&vanished).await.unwrap();
    std::fs::remove_file(h.audio_dir().join("aaaaaaaaaaa.mp3")).unwrap();
    std::fs::write(h.audio_dir().join("bbbbbbbbbbb.mp3"), vec![0u8; 200]).unwrap();
    std::fs::write(h.audio_dir().join("ccccccccccc.mp3.part"), b"partial").unwrap();
    std::fs::write(h.staging_dir().join("ccccccccccc_raw.webm"), b"raw").unwrap();

    let report = h.cache.consolidate().await.unwrap();
    assert_eq!(report.partials_removed, 1);
    assert_eq!(report.staging_removed, 1);
    assert_eq!(report.entries_reset, 1);
    assert_eq!(report.entries_repaired, 1);
    assert_eq!(report.usage_bytes, 200);

    assert!(!h.db.find_by_entry_id(&vanished).unwrap().unwrap().is_downloaded);
    assert!(h.db.find_by_entry_id(&orphan).unwrap().unwrap().is_downloaded);
    assert_eq!(h.cache.storage_stats().total_files, 1);
    assert_eq!(Harness::list(&h.audio_dir()), vec!["bbbbbbbbbbb.mp3"]);
}

#[tokio::test]
async fn test_background_eviction_keeps_budget() {
    // Budget nul : chaque placement déclenche une passe d'éviction
    let h = Harness::with_budget(
        FakeFetcher::new(FetchMode::Ok),
        FakeTranscoder::new(TranscodeMode::Ok(100)),
        0,
    )
    .await;

    h.cache.resolve(&id("aaaaaaaaaaa")).await.unwrap();

    for _ in 0..100 {
        if h.cache.storage().file_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.cache.storage().file_count(), 0);
    assert!(Harness::list(&h.audio_dir()).is_empty());

    let report = h.cache.cleanup().await.unwrap();
    assert_eq!(report.removed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_budget_check_sees_placed_track_on_worker_threads() {
    let h = Harness::with_budget(
        FakeFetcher::new(FetchMode::Ok),
        FakeTranscoder::new(TranscodeMode::Ok(100)),
        0,
    )
    .await;

    for raw in ["aaaaaaaaaaa", "bbbbbbbbbbb", "ccccccccccc"] {
        let track = id(raw);
        let resolved = h.cache.resolve(&track).await.unwrap();
        assert_eq!(resolved.source, Source::Fetched);
        assert!(!h.cache.is_in_flight(&track));

        // Seul fichier au-dessus du budget : la passe doit le retirer
        for _ in 0..200 {
            if h.cache.storage().file_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.cache.storage().file_count(), 0, "{raw}");
        assert!(Harness::list(&h.audio_dir()).is_empty(), "{raw}");
        assert!(!h.db.find_by_entry_id(&track).unwrap().unwrap().is_downloaded);
    }
}
