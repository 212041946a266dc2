use std::sync::Arc;

use campaign_insights::store::RangeFilter;
use campaign_insights::types::Platform;
use campaign_insights::validation::validate;
use campaign_insights::ReaggregationStatus;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

mod common;
use common::{assert_close, day, stats_event, Pipeline};

#[tokio::test]
async fn test_two_events_roll_up_into_one_daily_row() {
    let pipeline = Pipeline::new();
    let c1 = Uuid::new_v4();
    pipeline.source.push_json(&stats_event(
        c1,
        Platform::Meta,
        "2024-01-01T09:00:00Z",
        "meta:c1:a",
        1000,
        50,
        50.0,
        100.0,
    ));
    pipeline.source.push_json(&stats_event(
        c1,
        Platform::Meta,
        "2024-01-01T17:30:00Z",
        "meta:c1:b",
        500,
        25,
        25.0,
        50.0,
    ));

    let stats = pipeline.drain(2).await;
    assert_eq!(stats.persisted, 2);
    assert_eq!(pipeline.source.committed_offsets(), vec![0, 1]);

    let rows = pipeline.insights(c1, day(2024, 1, 1)).await;
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.platform, Platform::Meta);
    assert_eq!(row.region, "all");
    assert_eq!(row.impressions, 1500);
    assert_eq!(row.clicks, 75);
    assert_close(row.spend, 75.0);
    assert_close(row.revenue, 150.0);
    assert_close(row.ctr, 0.05);
    assert_close(row.cpc, 1.0);
    assert_close(row.roas, 2.0);
}

#[tokio::test]
async fn test_redelivered_event_is_persisted_once() {
    let pipeline = Pipeline::new();
    let campaign = Uuid::new_v4();
    let event = stats_event(
        campaign,
        Platform::Google,
        "2024-03-10T00:00:00Z",
        "google:991:2024-03-10",
        200,
        10,
        5.0,
        0.0,
    );
    pipeline.source.push_json(&event);
    pipeline.source.push_json(&event);
    pipeline.source.push_json(&event);

    let stats = pipeline.drain(3).await;
    assert_eq!(stats.persisted, 1);
    assert_eq!(stats.duplicates, 2);
    // Duplicates are acknowledged too
    assert_eq!(pipeline.source.committed_offsets(), vec![0, 1, 2]);

    let events = pipeline
        .store
        .events
        .query_range(&RangeFilter::campaign(campaign, day(2024, 3, 10), day(2024, 3, 10)))
        .unwrap();
    assert_eq!(events.len(), 1);

    let rows = pipeline.insights(campaign, day(2024, 3, 10)).await;
    assert_eq!(rows[0].impressions, 200);
}

#[tokio::test]
async fn test_negative_metrics_are_stored_as_zero() {
    let pipeline = Pipeline::new();
    let campaign = Uuid::new_v4();
    pipeline.source.push_json(&stats_event(
        campaign,
        Platform::Tiktok,
        "2024-02-02T08:00:00Z",
        "tiktok:1:2024-02-02",
        100,
        -5,
        -1.0,
        3.0,
    ));

    pipeline.drain(1).await;

    let events = pipeline
        .store
        .events
        .query_range(&RangeFilter::campaign(campaign, day(2024, 2, 2), day(2024, 2, 2)))
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].clicks, 0);
    assert_eq!(events[0].spend, 0.0);
    assert!(events[0].processed_at.is_some());

    let rows = pipeline.insights(campaign, day(2024, 2, 2)).await;
    assert_eq!(rows[0].clicks, 0);
    assert_eq!(rows[0].ctr, 0.0);
    assert_eq!(rows[0].roas, 0.0);
}

#[tokio::test]
async fn test_event_without_campaign_never_reaches_the_log() {
    let pipeline = Pipeline::new();
    pipeline.source.push_json(&json!({
        "platform": "meta",
        "event_time": "2024-01-01T00:00:00Z",
        "deduplication_key": "meta:orphan:2024-01-01",
        "impressions": 10,
    }));
    let campaign = Uuid::new_v4();
    pipeline.source.push_json(&stats_event(
        campaign,
        Platform::Meta,
        "2024-01-01T00:00:00Z",
        "meta:ok:2024-01-01",
        10,
        1,
        1.0,
        1.0,
    ));

    let stats = pipeline.drain(1).await;
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.persisted, 1);
    // The rejected message is skipped without its own commit
    assert_eq!(pipeline.source.committed_offsets(), vec![1]);

    let all_events = pipeline
        .store
        .events
        .query_range(&RangeFilter {
            campaign_id: None,
            start_date: day(2024, 1, 1),
            end_date: day(2024, 1, 1),
            platform: None,
            region: None,
        })
        .unwrap();
    assert_eq!(all_events.len(), 1);
    assert_eq!(all_events[0].campaign_id, campaign);
}

#[tokio::test]
async fn test_rejected_messages_go_to_dead_letter_and_are_committed() {
    let pipeline = Pipeline::with_dead_letter();
    pipeline.source.push_payload(None, Some(b"{not json".to_vec()));
    pipeline.source.push_json(&json!({"campaign_id": Uuid::new_v4(), "platform": "meta"}));

    let stats = pipeline.drain(2).await;
    assert_eq!(stats.dead_lettered, 2);
    assert_eq!(pipeline.source.committed_offsets(), vec![0, 1]);

    let sent = pipeline.dead_letter.as_ref().unwrap().sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0.position.offset, 0);
    assert_eq!(sent[1].0.position.offset, 1);
}

#[tokio::test]
async fn test_reaggregation_matches_incremental_rows() {
    let pipeline = Pipeline::new();
    let campaign = Uuid::new_v4();
    for (i, (time, platform)) in [
        ("2024-01-01T01:00:00Z", Platform::Meta),
        ("2024-01-01T23:00:00Z", Platform::Meta),
        ("2024-01-01T12:00:00Z", Platform::Google),
        ("2024-01-02T12:00:00Z", Platform::Meta),
    ]
    .into_iter()
    .enumerate()
    {
        pipeline.source.push_json(&stats_event(
            campaign,
            platform,
            time,
            &format!("k{i}"),
            100,
            4,
            2.0,
            6.0,
        ));
    }
    pipeline.drain(4).await;

    let filter = RangeFilter::campaign(campaign, day(2024, 1, 1), day(2024, 1, 2));
    let incremental = pipeline.store.aggregates.query(&filter).unwrap();
    assert_eq!(incremental.len(), 3);

    let summary = pipeline
        .engine
        .reaggregate(campaign, day(2024, 1, 1), day(2024, 1, 2), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.status, ReaggregationStatus::Completed);
    assert_eq!(summary.rows_written, 3);

    let recomputed = pipeline.store.aggregates.query(&filter).unwrap();
    assert_eq!(recomputed.len(), incremental.len());
    for (before, after) in incremental.iter().zip(&recomputed) {
        assert_eq!(before.bucket(), after.bucket());
        assert_eq!(before.impressions, after.impressions);
        assert_eq!(before.clicks, after.clicks);
        assert_close(before.spend, after.spend);
        assert_close(before.ctr, after.ctr);
        assert!(after.updated_at >= before.updated_at);
    }
}

#[tokio::test]
async fn test_concurrent_bucket_refreshes_converge() {
    let pipeline = Pipeline::new();
    let campaign = Uuid::new_v4();
    for i in 0..8 {
        pipeline.source.push_json(&stats_event(
            campaign,
            Platform::Linkedin,
            "2024-05-05T10:00:00Z",
            &format!("li:{i}"),
            10,
            1,
            1.0,
            2.0,
        ));
    }
    pipeline.drain(8).await;

    let events = pipeline
        .store
        .events
        .query_range(&RangeFilter::campaign(campaign, day(2024, 5, 5), day(2024, 5, 5)))
        .unwrap();
    let bucket = events[0].bucket();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = Arc::clone(&pipeline.engine);
        let bucket = bucket.clone();
        handles.push(tokio::task::spawn_blocking(move || engine.refresh_bucket(&bucket)));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let row = pipeline.store.aggregates.get(&bucket).unwrap().unwrap();
    assert_eq!(row.impressions, 80);
    assert_eq!(row.clicks, 8);
    assert_close(row.roas, 2.0);
}

#[tokio::test]
async fn test_reaggregation_replaces_cached_insights() {
    let pipeline = Pipeline::new();
    let c1 = Uuid::new_v4();
    pipeline.source.push_json(&stats_event(
        c1,
        Platform::Meta,
        "2024-01-01T09:00:00Z",
        "meta:c1:a",
        1000,
        50,
        50.0,
        100.0,
    ));
    pipeline.drain(1).await;

    let first = pipeline.insights(c1, day(2024, 1, 1)).await;
    assert_eq!(first[0].impressions, 1000);

    // Written straight to the log, so nothing invalidates the cached query
    let mut late = validate(
        serde_json::from_value(stats_event(
            c1,
            Platform::Meta,
            "2024-01-01T20:00:00Z",
            "meta:c1:late",
            500,
            25,
            25.0,
            50.0,
        ))
        .unwrap(),
    )
    .unwrap();
    late.processed_at = Some(chrono::Utc::now());
    pipeline.store.events.append(&late).unwrap();

    let cached = pipeline.insights(c1, day(2024, 1, 1)).await;
    assert_eq!(cached[0].impressions, 1000);

    pipeline
        .engine
        .reaggregate(c1, day(2024, 1, 1), day(2024, 1, 1), &CancellationToken::new())
        .await
        .unwrap();

    let fresh = pipeline.insights(c1, day(2024, 1, 1)).await;
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].impressions, 1500);
    assert_eq!(fresh[0].clicks, 75);
    assert_close(fresh[0].ctr, 0.05);
}

#[tokio::test]
async fn test_cancelled_reaggregation_writes_nothing_new() {
    let pipeline = Pipeline::new();
    let campaign = Uuid::new_v4();
    pipeline.source.push_json(&stats_event(
        campaign,
        Platform::Meta,
        "2024-01-01T00:00:00Z",
        "k",
        1,
        1,
        1.0,
        1.0,
    ));
    pipeline.drain(1).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = pipeline
        .engine
        .reaggregate(campaign, day(2024, 1, 1), day(2024, 1, 1), &cancel)
        .await
        .unwrap();
    assert_eq!(summary.status, ReaggregationStatus::Cancelled);
    assert_eq!(summary.rows_written, 0);
}
