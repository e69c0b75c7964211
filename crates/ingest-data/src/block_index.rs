//! Timestamp↔block resolution and gap computation (C2, §4.2).
//!
//! Two cooperating pieces: a binary-search timestamp→block resolver used
//! only to convert a `days_back` window into a starting block, and a
//! piecewise-linear block→timestamp resolver that amortizes one batched
//! RPC call over an entire log batch instead of paying for one lookup
//! per log.

use std::collections::HashMap;

use eyre::{bail, eyre, Result};

use crate::chain::ChainClient;
use crate::types::RawLog;

/// Number of evenly spaced checkpoint blocks sampled per batch (§4.2.2 step 3).
const NUM_CHECKPOINTS: u64 = 5;

/// Upper bound on the cached segment list (§4.2.2 "Segment cap", §9 resolved
/// Open Question). Oldest segments (by `start` block) are evicted first.
const SEGMENT_CAP: usize = 1024;

/// Binary search `[0, latest]` for the first block with `timestamp >=
/// target`. Used only to turn a `days_back` window into a block number; the
/// result tolerates coarse outcomes (§4.2.1).
pub async fn find_block_by_timestamp(client: &ChainClient, target_ts: u64) -> Result<u64> {
    let mut start = 0u64;
    let mut end = client.latest_block().await?;

    while start <= end {
        let mid = start + (end - start) / 2;
        let mid_ts = client.block_timestamp(mid).await?;

        if mid_ts < target_ts {
            start = mid + 1;
        } else if mid_ts > target_ts {
            if mid == 0 {
                break;
            }
            end = mid - 1;
        } else {
            return Ok(mid);
        }
    }
    Ok(start)
}

/// One consecutive linear segment `(start, end, t0, slope)`: for `block` in
/// `[start, end]`, `timestamp ≈ t0 + (block - start) * slope`.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Segment {
    start: u64,
    end: u64,
    t0: i64,
    slope: f64,
}

impl Segment {
    fn covers(&self, start: u64, end: u64) -> bool {
        self.start <= start && end <= self.end
    }

    fn contains(&self, block: u64) -> bool {
        self.start <= block && block <= self.end
    }

    fn estimate(&self, block: u64) -> i64 {
        self.t0 + ((block - self.start) as f64 * self.slope).round() as i64
    }
}

/// Piecewise-linear block→timestamp resolver (§4.2.2). Reused across an
/// entire pool pipeline run so repeated batches amortize their RPC cost;
/// segments accumulate and are never removed except by the bounded-eviction
/// policy.
#[derive(Default)]
pub struct BlockTimestampResolver {
    segments: Vec<Segment>,
}

impl BlockTimestampResolver {
    pub fn new() -> Self {
        Self { segments: Vec::new() }
    }

    fn covering_segment(&self, start: u64, end: u64) -> bool {
        self.segments.iter().any(|s| s.covers(start, end))
    }

    /// Builds (or reuses) the segments needed to resolve `[min_block,
    /// max_block]`. Fatal if fewer than two checkpoints resolve (§4.2.2
    /// steps 5-6, §7 "Timestamp-resolution fatal").
    #[tracing::instrument(skip(self, client))]
    pub async fn build_from_blocks(&mut self, client: &ChainClient, blocks: &[u64]) -> Result<()> {
        if blocks.is_empty() {
            return Ok(());
        }
        let start_block = *blocks.iter().min().unwrap();
        let end_block = *blocks.iter().max().unwrap();

        if self.covering_segment(start_block, end_block) {
            return Ok(());
        }

        let step = ((end_block - start_block) / NUM_CHECKPOINTS).max(1);
        let mut checkpoints: Vec<u64> = Vec::new();
        let mut b = start_block;
        while b < end_block {
            checkpoints.push(b);
            b += step;
        }
        checkpoints.push(end_block);

        // Probe ±1 around each checkpoint so at least one usable anchor
        // exists per edge even if the exact block is unavailable.
        let mut probes: Vec<u64> = Vec::new();
        for &cp in &checkpoints {
            probes.push(cp);
            if cp > 0 {
                probes.push(cp - 1);
            }
            probes.push(cp + 1);
        }
        probes.sort_unstable();
        probes.dedup();

        let headers = client.batch_block_timestamps(&probes).await?;
        let mut resolved: HashMap<u64, i64> = headers
            .into_iter()
            .map(|h| (h.number, h.timestamp as i64))
            .collect();

        // If an edge didn't come back from the batch, fall back to a
        // single-block call for exactly that edge (§4.2.2 step 5).
        for edge in [start_block, end_block] {
            if !resolved.contains_key(&edge) {
                if let Ok(ts) = client.block_timestamp(edge).await {
                    resolved.insert(edge, ts as i64);
                }
            }
        }

        let mut avail: Vec<u64> = checkpoints
            .iter()
            .copied()
            .filter(|b| resolved.contains_key(b))
            .collect();
        avail.sort_unstable();
        avail.dedup();

        if avail.len() < 2 {
            bail!(
                "only {} checkpoint(s) resolved for blocks {}..={} — cannot interpolate timestamps",
                avail.len(),
                start_block,
                end_block
            );
        }

        for pair in avail.windows(2) {
            let (b0, b1) = (pair[0], pair[1]);
            let t0 = resolved[&b0];
            let t1 = resolved[&b1];
            let slope = if b1 == b0 { 0.0 } else { (t1 - t0) as f64 / (b1 - b0) as f64 };
            self.push_segment(Segment { start: b0, end: b1, t0, slope });
        }

        Ok(())
    }

    fn push_segment(&mut self, segment: Segment) {
        self.segments.push(segment);
        if self.segments.len() > SEGMENT_CAP {
            // Evict the oldest segment by start block first.
            let evict_idx = self
                .segments
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| s.start)
                .map(|(i, _)| i)
                .expect("segments is non-empty");
            self.segments.remove(evict_idx);
        }
    }

    /// Looks up the estimated timestamp for `block`. Fails if no cached
    /// segment covers it (§4.2.2 "Lookup").
    pub fn estimate_timestamp(&self, block: u64) -> Result<i64> {
        self.segments
            .iter()
            .find(|s| s.contains(block))
            .map(|s| s.estimate(block))
            .ok_or_else(|| eyre!("block {block} not in any cached range"))
    }

    /// Builds segments covering `logs`' block range (if not already cached)
    /// and returns a `block_number -> timestamp` map for every log.
    pub async fn assign_timestamps(
        &mut self,
        client: &ChainClient,
        logs: &[RawLog],
    ) -> Result<HashMap<u64, u64>> {
        let blocks: Vec<u64> = logs.iter().map(|l| l.block_number).collect();
        self.build_from_blocks(client, &blocks).await?;

        let mut out = HashMap::with_capacity(blocks.len());
        for block in blocks {
            let ts = self.estimate_timestamp(block)?;
            out.insert(block, ts.max(0) as u64);
        }
        Ok(out)
    }
}

/// One `[from_block, to_block]` range not yet reflected in the destination
/// table (§3 Glossary "Gap").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gap {
    pub from_block: u64,
    pub to_block: u64,
}

/// The upper bound of a gap: either a resolved timestamp, or "whatever the
/// chain's current head is" (resolved separately via `latest_block()`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GapEnd {
    Timestamp(i64),
    Latest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct GapSpec {
    from_ts: i64,
    to: GapEnd,
}

/// Safety overlap absorbed by idempotent upsert (§4.2.3).
const OVERLAP_SECS: i64 = 60;

/// Pure timestamp-domain half of gap computation (§4.2.3), split out from
/// block resolution so it is unit-testable without RPC access.
///
/// `have` is `(min_ts, max_ts)` of existing `minute_start` values, or
/// `None` if the destination table is empty.
fn gap_specs(have: Option<(i64, i64)>, want_start_ts: i64, now_ts: i64) -> Vec<GapSpec> {
    let Some((have_min, have_max)) = have else {
        return vec![GapSpec { from_ts: want_start_ts, to: GapEnd::Latest }];
    };

    let mut specs = Vec::new();
    if want_start_ts < have_min {
        specs.push(GapSpec {
            from_ts: want_start_ts,
            to: GapEnd::Timestamp(have_min - OVERLAP_SECS),
        });
    }
    if have_max < now_ts - OVERLAP_SECS {
        specs.push(GapSpec {
            from_ts: have_max + OVERLAP_SECS,
            to: GapEnd::Latest,
        });
    }
    specs
}

/// Computes block-range gaps against an existing `(min_ts, max_ts)` reading
/// from the destination table, resolving each timestamp edge to a block
/// number via binary search (§4.2.3). `days_back` is in whole days.
#[tracing::instrument(skip(client))]
pub async fn compute_gaps(
    client: &ChainClient,
    have: Option<(i64, i64)>,
    days_back: i64,
    now_ts: i64,
) -> Result<Vec<Gap>> {
    let want_start_ts = now_ts - days_back * 86_400;
    let specs = gap_specs(have, want_start_ts, now_ts);

    let mut gaps = Vec::with_capacity(specs.len());
    for spec in specs {
        let from_block = find_block_by_timestamp(client, spec.from_ts.max(0) as u64).await?;
        let to_block = match spec.to {
            GapEnd::Timestamp(ts) => find_block_by_timestamp(client, ts.max(0) as u64).await?,
            GapEnd::Latest => client.latest_block().await?,
        };
        if from_block <= to_block {
            gaps.push(Gap { from_block, to_block });
        }
    }
    Ok(gaps)
}

/// Walks `[start, end]` in fixed-size `chunk_size` windows, inclusive on
/// both ends (§4.5.2 step 5).
pub fn walk_block_ranges(start: u64, end: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    let mut from = start;
    while from <= end {
        let to = (from + chunk_size - 1).min(end);
        ranges.push((from, to));
        if to == u64::MAX {
            break;
        }
        from = to + 1;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_specs_empty_table_yields_single_gap_to_latest() {
        let specs = gap_specs(None, 1_000, 2_000);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].from_ts, 1_000);
        assert_eq!(specs[0].to, GapEnd::Latest);
    }

    #[test]
    fn gap_specs_splits_early_and_late_gaps() {
        // Scenario 5: table covers [T+1h, T+2h]; days_back window wants
        // [T-23h, now]. Expect two gaps.
        let t = 1_700_000_000i64;
        let have_min = t + 3_600;
        let have_max = t + 7_200;
        let now = t + 100_000; // far enough that have_max < now - 60
        let want_start = t - 23 * 3_600;

        let specs = gap_specs(Some((have_min, have_max)), want_start, now);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].from_ts, want_start);
        assert_eq!(specs[0].to, GapEnd::Timestamp(have_min - 60));
        assert_eq!(specs[1].from_ts, have_max + 60);
        assert_eq!(specs[1].to, GapEnd::Latest);
    }

    #[test]
    fn gap_specs_no_gap_when_fully_covered_and_fresh() {
        let now = 1_700_100_000i64;
        let specs = gap_specs(Some((now - 1_000, now)), now - 10_000, now);
        assert!(specs.is_empty());
    }

    #[test]
    fn walk_block_ranges_chunks_inclusive() {
        let ranges = walk_block_ranges(100, 250, 100);
        assert_eq!(ranges, vec![(100, 199), (200, 250)]);
    }

    #[test]
    fn segment_estimate_interpolates_linearly() {
        // Scenario 6: anchors b=100 -> t=1000, b=110 -> t=1100.
        let segment = Segment { start: 100, end: 110, t0: 1000, slope: 10.0 };
        assert_eq!(segment.estimate(105), 1050);
        assert_eq!(segment.estimate(100), 1000);
        assert_eq!(segment.estimate(110), 1100);
    }

    #[test]
    fn resolver_lookup_fails_out_of_range() {
        let resolver = BlockTimestampResolver::new();
        assert!(resolver.estimate_timestamp(42).is_err());
    }

    #[test]
    fn resolver_evicts_oldest_segment_over_cap() {
        let mut resolver = BlockTimestampResolver::new();
        for i in 0..(SEGMENT_CAP + 5) {
            resolver.push_segment(Segment {
                start: i as u64,
                end: i as u64 + 1,
                t0: i as i64,
                slope: 1.0,
            });
        }
        assert_eq!(resolver.segments.len(), SEGMENT_CAP);
        // The oldest (start=0) segment should have been evicted.
        assert!(resolver.estimate_timestamp(0).is_err());
    }
}
