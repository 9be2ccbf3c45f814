mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{wait_for, ScriptedStore};
use pipewatch_client::aggregator::SCORE_FETCH_CONCURRENCY;
use pipewatch_client::{BatchAggregator, JobStore};
use pipewatch_core::{JobId, JobStatus};
use tokio::time::Instant;

const REFRESH: Duration = Duration::from_millis(5000);

fn aggregator(store: &Arc<ScriptedStore>) -> BatchAggregator {
    let store: Arc<dyn JobStore> = store.clone();
    BatchAggregator::new("b-9", store, REFRESH)
}

fn mixed_batch(store: &ScriptedStore) {
    store.set_batch(&[
        (1, JobStatus::Completed),
        (2, JobStatus::Completed),
        (3, JobStatus::Failed),
        (4, JobStatus::Processing),
        (5, JobStatus::Processing),
    ]);
    store.set_score(1, 80.0);
    store.set_score(2, 90.0);
}

#[tokio::test(start_paused = true)]
async fn active_batch_is_refreshed_until_settled() {
    let store = ScriptedStore::new();
    mixed_batch(&store);
    let started = Instant::now();
    let watch = aggregator(&store).spawn();
    let mut rx = watch.subscribe();

    let view = wait_for(&mut rx, "first refresh", Option::is_some)
        .await
        .expect("view");
    assert_eq!(view.batch_id, "b-9");
    assert_eq!(view.total_count, 5);
    assert_eq!(view.completed_count, 2);
    assert_eq!(view.failed_count, 1);
    assert_eq!(view.processing_count, 2);
    assert_eq!(view.queued_count, 0);
    assert!(view.has_active);
    assert_eq!(view.progress_pct, 60);
    assert_eq!(view.average_score(), Some(85.0));
    assert_eq!(store.page_calls(), 1);
    assert_eq!(store.result_calls(), 2);

    store.set_batch(&[
        (1, JobStatus::Completed),
        (2, JobStatus::Completed),
        (3, JobStatus::Failed),
        (4, JobStatus::Completed),
        (5, JobStatus::Failed),
    ]);
    let view = wait_for(&mut rx, "settled batch", |v| {
        v.as_ref().map(|v| !v.has_active).unwrap_or(false)
    })
    .await
    .expect("view");
    assert!(started.elapsed() >= REFRESH);
    assert_eq!(view.finished_count(), 5);
    assert_eq!(view.progress_pct, 100);
    assert_eq!(store.page_calls(), 2);

    tokio::time::sleep(REFRESH * 10).await;
    assert_eq!(store.page_calls(), 2);
    watch.stop();
    watch.join().await;
}

#[tokio::test(start_paused = true)]
async fn finished_batch_is_not_rearmed() {
    let store = ScriptedStore::new();
    store.set_batch(&[(1, JobStatus::Completed), (2, JobStatus::Failed)]);
    let watch = aggregator(&store).spawn();
    let mut rx = watch.subscribe();

    let view = wait_for(&mut rx, "first refresh", Option::is_some)
        .await
        .expect("view");
    assert!(!view.has_active);

    tokio::time::sleep(REFRESH * 4).await;
    assert_eq!(store.page_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_refresh_runs_after_settling() {
    let store = ScriptedStore::new();
    store.set_batch(&[(1, JobStatus::Completed)]);
    let watch = aggregator(&store).spawn();
    let mut rx = watch.subscribe();
    wait_for(&mut rx, "first refresh", Option::is_some).await;

    watch.refresh();
    rx.changed().await.expect("second refresh");
    assert_eq!(store.page_calls(), 2);
}

#[tokio::test]
async fn score_failure_only_blanks_that_job() {
    let store = ScriptedStore::new();
    mixed_batch(&store);
    store.fail_results(2);

    let view = aggregator(&store).refresh().await.expect("refresh");
    let score = |id: u64| {
        view.jobs
            .iter()
            .find(|job| job.job_id == JobId::from(id))
            .and_then(|job| job.score)
    };
    assert_eq!(score(1), Some(80.0));
    assert_eq!(score(2), None);
    assert_eq!(score(3), None);
    assert_eq!(view.completed_count, 2);
    assert_eq!(store.result_calls(), 2);
}

#[tokio::test]
async fn score_lookups_are_bounded_and_keep_order() {
    let store = ScriptedStore::new();
    let jobs: Vec<(u64, JobStatus)> = (1..=40).map(|id| (id, JobStatus::Completed)).collect();
    store.set_batch(&jobs);
    for id in 1..=40 {
        store.set_score(id, id as f64);
    }

    let view = aggregator(&store).refresh().await.expect("refresh");
    assert_eq!(store.result_calls(), 40);
    assert!(store.max_results_in_flight() <= SCORE_FETCH_CONCURRENCY);
    assert!(store.max_results_in_flight() > 1);
    let scores: Vec<_> = view.jobs.iter().map(|job| job.score).collect();
    let expected: Vec<_> = (1..=40).map(|id| Some(id as f64)).collect();
    assert_eq!(scores, expected);
}

#[tokio::test]
async fn listing_walks_every_page() {
    let store = ScriptedStore::new();
    mixed_batch(&store);

    let view = aggregator(&store)
        .with_page_size(2)
        .refresh()
        .await
        .expect("refresh");
    assert_eq!(view.total_count, 5);
    assert_eq!(store.page_calls(), 3);
    let ids: Vec<_> = view.jobs.iter().map(|job| job.job_id.to_string()).collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn empty_batch_has_nothing_active() {
    let store = ScriptedStore::new();
    let view = aggregator(&store).refresh().await.expect("refresh");
    assert_eq!(view.total_count, 0);
    assert!(!view.has_active);
    assert_eq!(view.progress_pct, 0);
    assert_eq!(store.page_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn listing_error_is_retried_on_schedule() {
    let store = ScriptedStore::new();
    store.set_batch(&[(1, JobStatus::Processing)]);
    store.fail_listing(true);
    let started = Instant::now();
    let watch = aggregator(&store).spawn();
    let mut rx = watch.subscribe();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.page_calls(), 1);
    assert!(watch.view().is_none());

    store.fail_listing(false);
    let view = wait_for(&mut rx, "recovered refresh", Option::is_some)
        .await
        .expect("view");
    assert!(started.elapsed() >= REFRESH);
    assert_eq!(view.processing_count, 1);
    assert_eq!(store.page_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_ends_the_loop() {
    let store = ScriptedStore::new();
    store.set_batch(&[(1, JobStatus::Queued)]);
    let watch = aggregator(&store).spawn();
    let mut rx = watch.subscribe();
    wait_for(&mut rx, "first refresh", Option::is_some).await;

    watch.stop();
    watch.join().await;
    tokio::time::sleep(REFRESH * 3).await;
    assert_eq!(store.page_calls(), 1);
}
