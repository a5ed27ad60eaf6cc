use futures::future::join_all;
use pmotrackcache::{Error, FlightGroup, TrackId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn id(raw: &str) -> TrackId {
    TrackId::parse(raw).unwrap()
}

async fn wait_until_empty(group: &FlightGroup<u32>) {
    for _ in 0..100 {
        if group.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("flight registry never emptied");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_execution() {
    let group = Arc::new(FlightGroup::<u32>::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let track = id("dQw4w9WgXcQ");

    let callers = (0..16).map(|_| {
        let group = group.clone();
        let runs = runs.clone();
        let track = track.clone();
        async move {
            group
                .run(&track, move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(42)
                })
                .await
        }
    });

    let results = join_all(callers).await;
    assert!(results.iter().all(|r| matches!(r, Ok(42))));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    wait_until_empty(&group).await;
}

#[tokio::test]
async fn test_error_is_shared_and_entry_removed() {
    let group = FlightGroup::<u32>::new();
    let track = id("dQw4w9WgXcQ");

    let err = group
        .run(&track, || async { Err(Error::FetchFailed("nope".into())) })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FETCH_FAILED");

    wait_until_empty(&group).await;

    // Une nouvelle tentative repart de zéro
    let ok = group.run(&track, || async { Ok(7) }).await.unwrap();
    assert_eq!(ok, 7);
}

#[tokio::test]
async fn test_distinct_ids_run_independently() {
    let group = Arc::new(FlightGroup::<u32>::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let (first, second) = (id("aaaaaaaaaaa"), id("bbbbbbbbbbb"));

    let a = {
        let runs = runs.clone();
        group.run(&first, move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
    };
    let b = {
        let runs = runs.clone();
        group.run(&second, move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(2)
        })
    };

    let (a, b) = tokio::join!(a, b);
    assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_abandoned_caller_does_not_cancel_work() {
    let group = FlightGroup::<u32>::new();
    let finished = Arc::new(AtomicUsize::new(0));
    let track = id("dQw4w9WgXcQ");

    let work = {
        let finished = finished.clone();
        move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }
    };

    let abandoned = tokio::time::timeout(Duration::from_millis(5), group.run(&track, work)).await;
    assert!(abandoned.is_err());
    assert!(group.contains(&track));

    wait_until_empty(&group).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panicking_work_releases_entry() {
    let group = FlightGroup::<u32>::new();
    let track = id("dQw4w9WgXcQ");

    let err = group
        .run(&track, || async {
            let explode = true;
            if explode {
                panic!("boom");
            }
            Ok(0)
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "STORAGE_ERROR");

    wait_until_empty(&group).await;
}
