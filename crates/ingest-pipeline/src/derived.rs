//! Derived metrics post-pass (C4, §4.4.4): `trade_imbalance`,
//! `price_volatility` (rolling stdev), `price_momentum` (rolling pct
//! change), computed over a pool's full ordered minute series and written
//! back in batches.

const EPSILON: f64 = 1e-9;

/// One row of the minute series read back from storage, in ascending
/// `minute_start` order: `(minute_start, total_base_volume,
/// total_quote_volume, avg_price_scaled, price_scale)`.
pub type MinuteRow = (i64, u128, u128, u128, u8);

/// A computed row ready to be joined back: `(minute_start, trade_imbalance,
/// price_volatility, price_momentum)`.
pub type DerivedRow = (i64, f64, Option<f64>, Option<f64>);

/// Computes derived metrics for every row in `series`, using a trailing
/// window of `window` minutes (default 60, §6 Tunables) with
/// `min_periods=1` — the first row in the series gets `volatility=None`
/// naturally (a single-sample stdev), momentum `None` (no prior sample).
pub fn compute_derived(series: &[MinuteRow], window: usize) -> Vec<DerivedRow> {
    let prices: Vec<f64> = series
        .iter()
        .map(|(_, _, _, avg, scale)| *avg as f64 / 10f64.powi(*scale as i32))
        .collect();

    let mut out = Vec::with_capacity(series.len());
    for (i, (minute_start, base, quote, _, _)) in series.iter().enumerate() {
        let imbalance = {
            let base = *base as f64;
            let quote = *quote as f64;
            (base - quote) / (base + quote + EPSILON)
        };

        let start = i.saturating_sub(window.saturating_sub(1));
        let trailing = &prices[start..=i];
        let volatility = rolling_stdev(trailing);

        // Matches pandas' `pct_change(periods=window)`: undefined until
        // `window` prior samples exist, not clamped against index 0.
        let momentum = if i < window { None } else { pct_change(prices[i - window], prices[i]) };

        out.push((*minute_start, imbalance, volatility, momentum));
    }
    out
}

/// Sample standard deviation of `values`; `None` when fewer than 2 samples
/// (mirrors pandas' `min_periods=1` behavior of returning NaN for n=1,
/// represented here as `None` since the destination column is nullable).
fn rolling_stdev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt())
}

/// Percent change from `prior` to `current`; `None` when `prior` is zero
/// (undefined, rather than `inf`).
fn pct_change(prior: f64, current: f64) -> Option<f64> {
    if prior == 0.0 {
        None
    } else {
        Some((current - prior) / prior)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_imbalance_matches_volume_skew() {
        let series: Vec<MinuteRow> = vec![(0, 100, 50, 100_000_000, 8)];
        let out = compute_derived(&series, 60);
        assert_eq!(out.len(), 1);
        let (_, imbalance, volatility, momentum) = out[0];
        assert!((imbalance - (100.0 - 50.0) / 150.0).abs() < 1e-6);
        assert_eq!(volatility, None);
        assert_eq!(momentum, None);
    }

    #[test]
    fn volatility_requires_at_least_two_samples() {
        let series: Vec<MinuteRow> = vec![
            (0, 10, 10, 100_000_000, 8),
            (60, 10, 10, 110_000_000, 8),
        ];
        let out = compute_derived(&series, 60);
        assert!(out[0].2.is_none());
        assert!(out[1].2.is_some());
    }

    #[test]
    fn momentum_is_positive_pct_change() {
        let series: Vec<MinuteRow> = vec![
            (0, 10, 10, 100_000_000, 8),
            (60, 10, 10, 110_000_000, 8),
        ];
        let out = compute_derived(&series, 1);
        let momentum = out[1].3.expect("should compute momentum for second row");
        assert!((momentum - 0.1).abs() < 1e-6);
    }

    #[test]
    fn momentum_is_none_before_window_samples_accumulate() {
        let series: Vec<MinuteRow> = vec![
            (0, 10, 10, 100_000_000, 8),
            (60, 10, 10, 110_000_000, 8),
        ];
        let out = compute_derived(&series, 60);
        assert_eq!(out[0].3, None);
        assert_eq!(out[1].3, None);
    }
}
