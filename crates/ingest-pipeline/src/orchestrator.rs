//! Per-pool pipeline driver (C5, §4.5.2): the unit of work a scheduler
//! (or the `run-pool` CLI subcommand) drives to completion for one pool.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::{bail, Context, Result};
use ingest_data::block_index::{compute_gaps, walk_block_ranges, BlockTimestampResolver};
use ingest_data::store::{split_pair, table_names};
use ingest_data::types::{Chain, Dex, MinuteBucket, Pool, SwapRecord};
use ingest_data::{ChainClient, Store};
use ingest_decode::{clean_symbol, lookup};

use crate::aggregator::{quote_vol_usd, SwapAggregator, TradeSizeAggregator};
use crate::config::Tunables;
use crate::derived::compute_derived;
use crate::enrichment::{self, RouterMap, SharedRateLimiter};

fn now_secs_i64() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_secs() as i64
}

/// Resolved per-pool context needed to drive decoding: which side is base
/// vs quote, and each side's decimals (§4.5.2 steps 1-2).
struct PoolOrientation {
    base_is_token0: bool,
    base_decimals: u8,
    quote_decimals: u8,
    quote_symbol: String,
}

async fn derive_orientation(
    client: &ChainClient,
    token_cache: &crate::metadata::TokenMetadataCache,
    pool: &Pool,
) -> Result<PoolOrientation> {
    let (token0, token1) = token_cache.pool_tokens(client, &pool.address).await?;
    let meta0 = token_cache.resolve(client, &token0).await?;
    let meta1 = token_cache.resolve(client, &token1).await?;

    let (base, _quote) = split_pair(&pool.pair)?;
    let symbol0 = clean_symbol(&meta0.symbol);
    let symbol1 = clean_symbol(&meta1.symbol);

    let base_is_token0 = if symbol0 == base {
        true
    } else if symbol1 == base {
        false
    } else {
        bail!(
            "pair '{}' base symbol '{base}' matches neither token0 ('{symbol0}') nor token1 ('{symbol1}')",
            pool.pair
        );
    };

    let (base_decimals, quote_decimals, quote_symbol) = if base_is_token0 {
        (meta0.decimals, meta1.decimals, symbol1)
    } else {
        (meta1.decimals, meta0.decimals, symbol0)
    };

    Ok(PoolOrientation { base_is_token0, base_decimals, quote_decimals, quote_symbol })
}

/// Splits `n` logs into `min(cap, max(1, ceil(n / target)))` evenly-sized
/// groups, preserving order (§4.5.2 step 5d).
fn split_into_subchunks<T>(items: Vec<T>, cap: usize, target: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let n = items.len();
    let wanted = n.div_ceil(target.max(1));
    let num_chunks = wanted.clamp(1, cap.max(1));
    let chunk_size = n.div_ceil(num_chunks);

    let mut out = Vec::with_capacity(num_chunks);
    let mut iter = items.into_iter();
    loop {
        let chunk: Vec<T> = iter.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        out.push(chunk);
    }
    out
}

/// Fans decode work for one chunk's logs out across a bounded `JoinSet`,
/// then joins (the barrier) before returning the concatenated, decode
/// order-independent, set of swap records (§4.5.2 step 5e).
async fn decode_fanout(
    logs: Vec<ingest_data::types::RawLog>,
    timestamps: &std::collections::HashMap<u64, u64>,
    descriptor: ingest_decode::registry::PipelineDescriptor,
    base_decimals: u8,
    quote_decimals: u8,
    base_is_token0: bool,
    cap: usize,
    target: usize,
) -> Vec<SwapRecord> {
    let subchunks = split_into_subchunks(logs, cap, target);
    let mut join_set = tokio::task::JoinSet::new();

    for subchunk in subchunks {
        let timestamps = timestamps.clone();
        join_set.spawn(async move {
            let mut decoded = Vec::with_capacity(subchunk.len());
            for log in &subchunk {
                let Some(&ts) = timestamps.get(&log.block_number) else {
                    tracing::debug!(block = log.block_number, "no resolved timestamp, skipping log");
                    continue;
                };
                match (descriptor.decode)(log, ts, base_decimals, quote_decimals, base_is_token0) {
                    Ok(swap) => decoded.push(swap),
                    Err(err) => {
                        tracing::debug!(error = %err, "decode failed for one log, skipping");
                    }
                }
            }
            decoded
        });
    }

    let mut all = Vec::new();
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(decoded) => all.extend(decoded),
            Err(err) => tracing::error!(error = %err, "decode subtask panicked"),
        }
    }
    all
}

/// Drives one full pool pipeline run to completion: gap computation,
/// chunked fetch/decode/aggregate/upsert, cleanup, and derived metrics
/// (§4.5.2). Does not acquire the per-pool lock itself — callers (the
/// scheduler, the CLI) are responsible for that (§4.5.1 "resolved Open
/// Question").
#[tracing::instrument(skip(client, store, token_cache, resolver, tunables, router_map, limiter), fields(pool = %pool.address))]
#[allow(clippy::too_many_arguments)]
pub async fn run_pool_pipeline(
    client: &ChainClient,
    store: &Arc<Mutex<Store>>,
    token_cache: &crate::metadata::TokenMetadataCache,
    resolver: &mut BlockTimestampResolver,
    tunables: &Tunables,
    pool: &Pool,
    days_back: i64,
    enrich: bool,
    router_map: &RouterMap,
    limiter: &SharedRateLimiter,
) -> Result<()> {
    let chain = Chain::parse(&pool.chain)?;
    let dex = Dex::parse(&pool.dex)?;
    let descriptor = lookup(chain, dex);

    let orientation = derive_orientation(client, token_cache, pool)
        .await
        .wrap_err_with(|| format!("failed to derive token orientation for pool {}", pool.address))?;

    let (base, quote) = split_pair(&pool.pair)?;
    let (klines_table, raw_table) = table_names(chain.as_str(), dex.as_str(), &base, &quote)?;

    {
        let store = store.lock().expect("store mutex poisoned");
        store.ensure_pool_tables(&klines_table, &raw_table)?;
    }

    let have = {
        let store = store.lock().expect("store mutex poisoned");
        store.minute_ts_range(&klines_table)?
    };
    let now_ts = now_secs_i64();
    let gaps = compute_gaps(client, have, days_back, now_ts).await?;
    if gaps.is_empty() {
        tracing::info!(pool = %pool.address, "no gaps, nothing to ingest");
        return Ok(());
    }

    let mut total_logs = 0u64;
    let run_start = now_ts;
    let (mut min_block, mut max_block) = (u64::MAX, 0u64);

    for gap in &gaps {
        for (from, to) in walk_block_ranges(gap.from_block, gap.to_block, descriptor.chunk_size) {
            min_block = min_block.min(from);
            max_block = max_block.max(to);

            let logs = client.get_logs(&pool.address, &[descriptor.topic0], from, to).await;
            if logs.is_empty() {
                continue;
            }
            total_logs += logs.len() as u64;

            let timestamps = resolver.assign_timestamps(client, &logs).await?;

            let mut swaps = decode_fanout(
                logs,
                &timestamps,
                descriptor,
                orientation.base_decimals,
                orientation.quote_decimals,
                orientation.base_is_token0,
                tunables.decode_subchunk_cap,
                tunables.decode_subchunk_target_logs,
            )
            .await;

            if enrich {
                enrichment::enrich(client, &mut swaps, router_map, limiter).await?;
            }

            let mut swap_agg = SwapAggregator::new();
            let mut size_agg = TradeSizeAggregator::new();
            swap_agg.fold_all(&swaps);
            for swap in &swaps {
                let usd_price = {
                    let store = store.lock().expect("store mutex poisoned");
                    store.read_usd_price(&orientation.quote_symbol, swap.timestamp as i64)?
                };
                if let Some(usd) = quote_vol_usd(&orientation.quote_symbol, swap.quote_vol, usd_price) {
                    size_agg.fold(usd);
                }
            }

            let buckets: Vec<MinuteBucket> = swap_agg.into_buckets();
            {
                let mut store = store.lock().expect("store mutex poisoned");
                store.upsert_minute_buckets(&klines_table, &buckets)?;
                store.insert_raw_swaps(&raw_table, &swaps)?;
                let pool_slug = format!("{}_{}_{}{}", chain.as_str(), dex.as_str(), base, quote);
                store.upsert_trade_size_histogram(&pool_slug, &size_agg.into_histogram())?;
            }
        }
    }

    // A short settle delay so a retried cleanup doesn't race the very
    // write it's meant to clean (§4.4.3).
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;

    {
        let store = store.lock().expect("store mutex poisoned");
        store
            .cleanup_anomalies(&klines_table, tunables.deviation_threshold_pct, tunables.volume_floor)
            .await?;
    }

    {
        let mut store = store.lock().expect("store mutex poisoned");
        let series = store.read_minute_series(&klines_table)?;
        let derived = compute_derived(&series, tunables.derived_metrics_window);
        store.write_derived_metrics(&klines_table, &derived)?;
    }

    let duration = (now_secs_i64() - run_start) as f64;
    let pool_slug = format!("{}_{}_{}{}", chain.as_str(), dex.as_str(), base, quote);
    if max_block >= min_block {
        let store = store.lock().expect("store mutex poisoned");
        store.insert_extraction_metric(run_start as f64, (min_block, max_block), total_logs, duration, &pool_slug)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_into_subchunks_caps_at_eight() {
        let items: Vec<u32> = (0..10_000).collect();
        let chunks = split_into_subchunks(items, 8, 200);
        assert_eq!(chunks.len(), 8);
        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), 10_000);
    }

    #[test]
    fn split_into_subchunks_small_batch_is_single_chunk() {
        let items: Vec<u32> = (0..50).collect();
        let chunks = split_into_subchunks(items, 8, 200);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn split_into_subchunks_empty_yields_no_chunks() {
        let items: Vec<u32> = Vec::new();
        assert!(split_into_subchunks(items, 8, 200).is_empty());
    }

    #[test]
    fn split_into_subchunks_respects_target_density() {
        // 600 items at target 200 -> 3 chunks, well under the cap of 8.
        let items: Vec<u32> = (0..600).collect();
        let chunks = split_into_subchunks(items, 8, 200);
        assert_eq!(chunks.len(), 3);
    }
}
