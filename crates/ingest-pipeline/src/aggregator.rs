//! In-memory aggregation (C4, §4.4.1): folds a stream of decoded swap
//! records into per-minute OHLCV buckets and a trade-size histogram,
//! before either is handed to the durable upsert layer.

use std::collections::BTreeMap;

use ingest_data::types::{MinuteBucket, SwapRecord, TradeSizeHistogram};
use ingest_decode::scale::VOLUME_SCALE;

const SECS_PER_MINUTE: i64 = 60;

/// Folds swap records into `minute_start -> MinuteBucket`, in iteration
/// order — the merge rules in `fold` are commutative/associative so
/// ingestion order never affects the final bucket (P1, P2).
#[derive(Default)]
pub struct SwapAggregator {
    buckets: BTreeMap<i64, MinuteBucket>,
}

impl SwapAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one swap into its minute bucket.
    pub fn fold(&mut self, swap: &SwapRecord) {
        let minute_start = (swap.timestamp as i64 / SECS_PER_MINUTE) * SECS_PER_MINUTE;
        let ts = swap.timestamp as i64;

        let bucket = self.buckets.entry(minute_start).or_insert_with(|| MinuteBucket {
            minute_start,
            price_scale: swap.price_scale,
            ..Default::default()
        });

        if bucket.swap_count == 0 || ts < bucket.open_ts {
            bucket.open_price_scaled = swap.price_scaled;
            bucket.open_ts = ts;
        }
        if bucket.swap_count == 0 || ts > bucket.close_ts {
            bucket.close_price_scaled = swap.price_scaled;
            bucket.close_ts = ts;
        }
        if bucket.swap_count == 0 || swap.price_scaled > bucket.high_price_scaled {
            bucket.high_price_scaled = swap.price_scaled;
        }
        if bucket.swap_count == 0 || swap.price_scaled < bucket.low_price_scaled {
            bucket.low_price_scaled = swap.price_scaled;
        }
        bucket.total_base_volume += swap.base_vol;
        bucket.total_quote_volume += swap.quote_vol;
        bucket.swap_count += 1;
    }

    pub fn fold_all<'a>(&mut self, swaps: impl IntoIterator<Item = &'a SwapRecord>) {
        for swap in swaps {
            self.fold(swap);
        }
    }

    /// Drains the accumulated buckets in `minute_start` order, ready for
    /// upsert. `avg_price_scaled` (VWAP) is computed here, the same way
    /// the original `SwapAggregator.aggregate()` computes it before the
    /// INSERT (`swap_aggregator.py`); the upsert's `ON CONFLICT` clause
    /// recomputes the identical ratio server-side from the merged totals
    /// on re-ingestion (§4.4.2).
    pub fn into_buckets(mut self) -> Vec<MinuteBucket> {
        for bucket in self.buckets.values_mut() {
            bucket.avg_price_scaled =
                vwap_scaled(bucket.total_quote_volume, bucket.total_base_volume, bucket.price_scale);
        }
        self.buckets.into_values().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// `Σquote_vol / Σbase_vol` scaled by `10^price_scale`, matching the
/// OHLC columns' fixed-point domain; `0` when there's no base volume to
/// divide by (§4.4.1 "else null", represented here as `0` since the
/// column is non-nullable in storage).
fn vwap_scaled(total_quote_volume: u128, total_base_volume: u128, price_scale: u8) -> u128 {
    if total_base_volume == 0 {
        return 0;
    }
    let scale = 10u128.pow(price_scale as u32);
    total_quote_volume
        .checked_mul(scale)
        .map(|scaled| scaled / total_base_volume)
        .unwrap_or(u128::MAX)
}

/// A small set of quote tokens this engine can price in USD directly,
/// without consulting `price_8h_usd` (§3 "SUPPORTED_CONVERSIONS").
const USD_EQUIVALENTS: &[&str] = &["usdc", "usdt", "dai", "usd"];

fn is_usd_equivalent(symbol: &str) -> bool {
    USD_EQUIVALENTS.contains(&symbol)
}

/// Resolves a swap's `quote_vol` to a USD-denominated `f64`, either because
/// the quote token is already a USD-equivalent (1:1) or by consulting a
/// caller-supplied `eth`/`btc` 8h bucket price. Returns `None` when neither
/// applies (§3: "skipped, not estimated").
///
/// `quote_vol` is already decimal-adjusted to [`VOLUME_SCALE`] by the
/// decoder (C3), not expressed in the token's native on-chain decimals, so
/// it's converted back to a human-unit `f64` using that fixed scale rather
/// than the token's own decimals.
pub fn quote_vol_usd(quote_symbol: &str, quote_vol: u128, usd_price: Option<f64>) -> Option<f64> {
    let scaled = quote_vol as f64 / 10f64.powi(VOLUME_SCALE as i32);
    if is_usd_equivalent(quote_symbol) {
        return Some(scaled);
    }
    usd_price.map(|price| scaled * price)
}

/// Folds `quote_vol_usd` values into a 9-bucket histogram keyed by
/// `floor(log10(quote_vol_usd))` clamped to `[-2, 6]`. Values whose
/// exponent falls outside that range (including non-positive volumes) are
/// discarded, not clamped (§4.4.1).
#[derive(Default)]
pub struct TradeSizeAggregator {
    hist: TradeSizeHistogram,
}

impl TradeSizeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fold(&mut self, quote_vol_usd: f64) {
        if quote_vol_usd <= 0.0 {
            return;
        }
        let exponent = quote_vol_usd.log10().floor() as i32;
        if let Some(idx) = TradeSizeHistogram::index_for_exponent(exponent) {
            self.hist.buckets[idx] += 1;
        }
    }

    pub fn into_histogram(self) -> TradeSizeHistogram {
        self.hist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swap(ts: u64, price_scaled: u128, base_vol: u128, quote_vol: u128) -> SwapRecord {
        SwapRecord {
            block_number: 1,
            tx_hash: format!("0x{ts}"),
            log_index: 0,
            timestamp: ts,
            sender: "0xsender".into(),
            recipient: "0xrecipient".into(),
            caller: None,
            router_tag: None,
            base_delta: -(base_vol as i128),
            quote_delta: quote_vol as i128,
            base_vol,
            quote_vol,
            price_scaled,
            price_scale: 8,
            is_buy: true,
            liquidity: None,
            tick: None,
        }
    }

    #[test]
    fn scenario_1_ohlc_from_three_swaps_same_minute() {
        let t = 1_700_000_000u64 - (1_700_000_000u64 % 60);
        let mut agg = SwapAggregator::new();
        agg.fold(&swap(t, 100, 10, 1000));
        agg.fold(&swap(t + 10, 105, 10, 1050));
        agg.fold(&swap(t + 30, 102, 10, 1020));

        let buckets = agg.into_buckets();
        assert_eq!(buckets.len(), 1);
        let b = &buckets[0];
        assert_eq!(b.open_price_scaled, 100);
        assert_eq!(b.close_price_scaled, 102);
        assert_eq!(b.high_price_scaled, 105);
        assert_eq!(b.low_price_scaled, 100);
        assert_eq!(b.swap_count, 3);
        assert_eq!(b.total_base_volume, 30);
        assert_eq!(b.total_quote_volume, 3070);
        // VWAP = 3070/30 scaled by 10^8 (spec §8 scenario 1).
        assert_eq!(b.avg_price_scaled, 10_233_333_333);
    }

    #[test]
    fn vwap_scaled_is_zero_without_base_volume() {
        assert_eq!(vwap_scaled(1_000, 0, 8), 0);
    }

    #[test]
    fn scenario_3_out_of_order_delivery_matches_in_order() {
        let t = 1_700_000_000u64 - (1_700_000_000u64 % 60);
        let mut in_order = SwapAggregator::new();
        in_order.fold(&swap(t, 100, 10, 1000));
        in_order.fold(&swap(t + 10, 105, 10, 1050));
        in_order.fold(&swap(t + 30, 102, 10, 1020));

        let mut shuffled = SwapAggregator::new();
        shuffled.fold(&swap(t + 10, 105, 10, 1050));
        shuffled.fold(&swap(t, 100, 10, 1000));
        shuffled.fold(&swap(t + 30, 102, 10, 1020));

        assert_eq!(in_order.into_buckets(), shuffled.into_buckets());
    }

    #[test]
    fn trade_size_discards_out_of_range_exponents() {
        let mut hist = TradeSizeAggregator::new();
        hist.fold(0.0); // degenerate, discarded
        hist.fold(-5.0); // negative, discarded
        hist.fold(1e10); // exponent 10 > 6, discarded
        hist.fold(1.0); // exponent 0, kept
        let h = hist.into_histogram();
        assert_eq!(h.buckets.iter().sum::<u64>(), 1);
        assert_eq!(h.buckets[TradeSizeHistogram::index_for_exponent(0).unwrap()], 1);
    }

    #[test]
    fn quote_vol_usd_uses_direct_equivalence() {
        // 5.0 USDC decimal-adjusted to VOLUME_SCALE=8 -> 500_000_000.
        let v = quote_vol_usd("usdc", 500_000_000, None);
        assert_eq!(v, Some(5.0));
    }

    #[test]
    fn quote_vol_usd_falls_back_to_price_bucket() {
        // 1.0 ETH decimal-adjusted to VOLUME_SCALE=8 -> 100_000_000.
        let v = quote_vol_usd("eth", 100_000_000, Some(3000.0));
        assert_eq!(v, Some(3000.0));
    }

    #[test]
    fn quote_vol_usd_none_without_price_or_equivalence() {
        assert_eq!(quote_vol_usd("arb", 1_000_000, None), None);
    }
}
