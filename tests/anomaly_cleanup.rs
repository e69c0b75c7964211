//! Coverage for the post-ingest cleanup pass (§4.4.3, spec §8 scenario 4):
//! zero-price rows and price-deviation anomalies are deleted; everything
//! else survives.

mod common;

use ingest_data::store::table_names;
use ingest_data::types::MinuteBucket;

/// Each minute here is a fresh `minute_start` (no conflicting row already
/// present), so the seeded `avg_price_scaled` value is what lands in the
/// column untouched — `total_base_volume`/`total_quote_volume` don't need
/// to be consistent with it for this test's purposes.
fn bucket(minute_start: i64, price_scaled: u128) -> MinuteBucket {
    MinuteBucket {
        minute_start,
        open_price_scaled: price_scaled,
        open_ts: minute_start,
        close_price_scaled: price_scaled,
        close_ts: minute_start,
        high_price_scaled: price_scaled,
        low_price_scaled: price_scaled,
        swap_count: 1,
        total_base_volume: 1,
        total_quote_volume: price_scaled,
        avg_price_scaled: price_scaled,
        price_scale: 8,
    }
}

/// Scenario 4: minute M has `avg_price = 0`; minute M+1 deviates from
/// M-1 by more than the threshold; both M and M+1 are deleted while
/// M-1 and M+2 survive.
#[tokio::test]
async fn cleanup_deletes_zero_price_and_deviation_anomalies_only() {
    let mut store = common::test_store();
    let (klines, raw) = table_names("arbitrum", "uniswap_v3", "arb", "usdc").unwrap();
    store.ensure_pool_tables(&klines, &raw).unwrap();

    const MINUTE: i64 = 60;
    let buckets = vec![
        bucket(0, 100_000_000),           // M-1: normal, $1.00 scaled by 1e8
        bucket(MINUTE, 0),                // M: zero avg_price, anomaly
        bucket(MINUTE * 2, 300_000_000),  // M+1: 3x jump vs M-1, anomaly
        bucket(MINUTE * 3, 101_000_000),  // M+2: back to normal, survives
    ];
    store.upsert_minute_buckets(&klines, &buckets).unwrap();

    let deleted = store.cleanup_anomalies(&klines, 5.0, None).await.unwrap();
    assert_eq!(deleted, 2);

    let remaining = store.read_minute_series(&klines).unwrap();
    let remaining_minutes: Vec<i64> = remaining.iter().map(|(m, ..)| *m).collect();
    assert_eq!(remaining_minutes, vec![0, MINUTE * 3]);
}

/// A price series that never deviates beyond the threshold is left
/// untouched by cleanup.
#[tokio::test]
async fn cleanup_is_a_no_op_for_stable_prices() {
    let mut store = common::test_store();
    let (klines, raw) = table_names("base", "uniswap_v2", "weth", "usdc").unwrap();
    store.ensure_pool_tables(&klines, &raw).unwrap();

    let buckets = vec![
        bucket(0, 100_000_000),
        bucket(60, 100_500_000),
        bucket(120, 99_800_000),
    ];
    store.upsert_minute_buckets(&klines, &buckets).unwrap();

    let deleted = store.cleanup_anomalies(&klines, 5.0, None).await.unwrap();
    assert_eq!(deleted, 0);
    assert_eq!(store.read_minute_series(&klines).unwrap().len(), 3);
}
