//! Usage aggregation and quota evaluation.

use chrono::{NaiveDate, TimeZone, Utc};
use mimir::UsageAggregator;
use mimir::usage::Quota;

#[tokio::test]
async fn k_events_accumulate_in_one_bucket() {
    let usage = UsageAggregator::in_memory();
    let ts = Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap();
    let (k, t) = (7u64, 150u64);
    for i in 0..k {
        usage
            .record("u1", t, 0.01, ts + chrono::TimeDelta::minutes(i as i64))
            .await
            .unwrap();
    }

    let day = usage
        .daily("u1", NaiveDate::from_ymd_opt(2025, 6, 10).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(day.request_count, k);
    assert_eq!(day.tokens, k * t);
    assert_eq!(day.cost, 0.07);

    let month = usage.monthly("u1", 2025, 6).await.unwrap().unwrap();
    assert_eq!(month.request_count, k);
    assert_eq!(month.tokens, k * t);
}

#[tokio::test]
async fn different_days_never_merge() {
    let usage = UsageAggregator::in_memory();
    let day1 = Utc.with_ymd_and_hms(2025, 6, 10, 23, 59, 59).unwrap();
    let day2 = Utc.with_ymd_and_hms(2025, 6, 11, 0, 0, 0).unwrap();
    usage.record("u1", 100, 0.0, day1).await.unwrap();
    usage.record("u1", 200, 0.0, day2).await.unwrap();

    let d1 = usage
        .daily("u1", day1.date_naive())
        .await
        .unwrap()
        .unwrap();
    let d2 = usage
        .daily("u1", day2.date_naive())
        .await
        .unwrap()
        .unwrap();
    assert_eq!((d1.request_count, d1.tokens), (1, 100));
    assert_eq!((d2.request_count, d2.tokens), (1, 200));

    // same month bucket
    let month = usage.monthly("u1", 2025, 6).await.unwrap().unwrap();
    assert_eq!(month.tokens, 300);
}

#[tokio::test]
async fn months_are_separate_buckets() {
    let usage = UsageAggregator::in_memory();
    usage
        .record("u1", 10, 0.0, Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap())
        .await
        .unwrap();
    usage
        .record("u1", 20, 0.0, Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap())
        .await
        .unwrap();
    assert_eq!(usage.monthly("u1", 2025, 1).await.unwrap().unwrap().tokens, 10);
    assert_eq!(usage.monthly("u1", 2025, 2).await.unwrap().unwrap().tokens, 20);
}

#[tokio::test]
async fn identities_are_isolated() {
    let usage = UsageAggregator::in_memory();
    let ts = Utc::now();
    usage.record("a", 5, 0.0, ts).await.unwrap();
    assert!(usage.daily("b", ts.date_naive()).await.unwrap().is_none());
}

#[tokio::test]
async fn quota_compares_monthly_tokens_against_limit() {
    let usage = UsageAggregator::in_memory();
    let now = Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap();

    let empty = usage.quota("u1", 1000, now).await.unwrap();
    assert_eq!(
        empty,
        Quota {
            used: 0,
            limit: 1000,
            remaining: 1000,
            exceeded: false
        }
    );

    usage.record("u1", 600, 0.0, now).await.unwrap();
    let partial = usage.quota("u1", 1000, now).await.unwrap();
    assert_eq!(partial.remaining, 400);
    assert!(!partial.exceeded);

    usage.record("u1", 400, 0.0, now).await.unwrap();
    let full = usage.quota("u1", 1000, now).await.unwrap();
    assert_eq!(full.remaining, 0);
    assert!(full.exceeded);
}

#[tokio::test]
async fn quota_only_counts_the_current_month() {
    let usage = UsageAggregator::in_memory();
    let may = Utc.with_ymd_and_hms(2025, 5, 20, 0, 0, 0).unwrap();
    let june = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
    usage.record("u1", 5000, 0.0, may).await.unwrap();
    assert_eq!(usage.quota("u1", 1000, june).await.unwrap().used, 0);
}
