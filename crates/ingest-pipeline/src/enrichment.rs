//! Enrichment stage (§4.5.3): batch-resolves each swap's true EOA caller
//! via `getTransactionByHash` and tags it with a router label, rate
//! limited so a pipeline run never floods the RPC endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use eyre::Result;
use governor::{Quota, RateLimiter};
use ingest_data::{ChainClient, SwapRecord};
use std::num::NonZeroU32;

pub type SharedRateLimiter =
    Arc<RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>>;

/// Builds a rate limiter capped at `per_sec` requests per second
/// (default ~900, §6 Tunables).
pub fn rate_limiter(per_sec: u32) -> SharedRateLimiter {
    let quota = Quota::per_second(NonZeroU32::new(per_sec.max(1)).expect("per_sec clamped to >= 1"));
    Arc::new(RateLimiter::direct(quota))
}

/// A known router/aggregator contract address mapped to a human label.
/// Populated by the caller (e.g. from a static table); empty by default.
pub type RouterMap = HashMap<String, String>;

/// Tags one swap's `caller`/`router_tag` in place, given the true EOA
/// sender of the transaction that produced it (§4.5.3 tag rule).
fn tag_swap(swap: &mut SwapRecord, eoa: &str, router_map: &RouterMap) {
    swap.caller = Some(eoa.to_string());
    swap.router_tag = Some(if let Some(label) = router_map.get(&swap.sender) {
        label.clone()
    } else if eoa == swap.sender {
        "EOA".to_string()
    } else {
        "router/agg".to_string()
    });
}

/// Enriches `swaps` in place: batch-resolves each unique `tx_hash`'s
/// sender (up to 100 per request, via [`ChainClient::batch_transaction_senders`]),
/// rate limited to `rate_limiter`'s quota, then tags each record.
///
/// Swaps whose transaction sender could not be resolved are left
/// untagged (`caller`/`router_tag` stay `None`) rather than failing the
/// whole batch.
#[tracing::instrument(skip(client, swaps, router_map, limiter))]
pub async fn enrich(
    client: &ChainClient,
    swaps: &mut [SwapRecord],
    router_map: &RouterMap,
    limiter: &SharedRateLimiter,
) -> Result<()> {
    if swaps.is_empty() {
        return Ok(());
    }

    let mut unique_hashes: Vec<String> = swaps.iter().map(|s| s.tx_hash.clone()).collect();
    unique_hashes.sort_unstable();
    unique_hashes.dedup();

    let mut senders: HashMap<String, String> = HashMap::with_capacity(unique_hashes.len());
    for chunk in unique_hashes.chunks(100) {
        limiter.until_ready().await;
        match client.batch_transaction_senders(chunk).await {
            Ok(resolved) => senders.extend(resolved),
            Err(err) => {
                tracing::warn!(error = %err, "enrichment batch lookup failed, leaving chunk untagged");
            }
        }
    }

    for swap in swaps.iter_mut() {
        if let Some(eoa) = senders.get(&swap.tx_hash) {
            tag_swap(swap, eoa, router_map);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_swap(sender: &str, tx_hash: &str) -> SwapRecord {
        SwapRecord {
            block_number: 1,
            tx_hash: tx_hash.to_string(),
            log_index: 0,
            timestamp: 0,
            sender: sender.to_string(),
            recipient: "0xrecipient".to_string(),
            caller: None,
            router_tag: None,
            base_delta: 0,
            quote_delta: 0,
            base_vol: 0,
            quote_vol: 0,
            price_scaled: 0,
            price_scale: 8,
            is_buy: true,
            liquidity: None,
            tick: None,
        }
    }

    #[test]
    fn tag_swap_marks_eoa_when_caller_matches_sender() {
        let mut swap = sample_swap("0xabc", "0x1");
        tag_swap(&mut swap, "0xabc", &RouterMap::new());
        assert_eq!(swap.router_tag.as_deref(), Some("EOA"));
        assert_eq!(swap.caller.as_deref(), Some("0xabc"));
    }

    #[test]
    fn tag_swap_marks_router_agg_when_caller_differs() {
        let mut swap = sample_swap("0xrouter", "0x1");
        tag_swap(&mut swap, "0xdifferent_eoa", &RouterMap::new());
        assert_eq!(swap.router_tag.as_deref(), Some("router/agg"));
    }

    #[test]
    fn tag_swap_uses_known_router_label() {
        let mut router_map = RouterMap::new();
        router_map.insert("0xrouter".to_string(), "1inch".to_string());
        let mut swap = sample_swap("0xrouter", "0x1");
        tag_swap(&mut swap, "0xdifferent_eoa", &router_map);
        assert_eq!(swap.router_tag.as_deref(), Some("1inch"));
    }
}
