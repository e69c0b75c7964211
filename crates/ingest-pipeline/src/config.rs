//! Environment-driven configuration (§6 Environment / Tunables).
//!
//! Every tunable has a hard-coded default; an environment variable of the
//! same name overrides it when set and parses cleanly, following the
//! teacher's settings-module pattern of fail-fast-on-malformed-override.

use std::env;
use std::time::Duration;

use eyre::{Context, Result};

/// Runtime tunables, loaded once at start-up and passed down by reference.
#[derive(Clone, Debug)]
pub struct Tunables {
    pub stagger_secs: u64,
    pub scheduler_interval_secs: u64,
    pub global_lock_ttl_secs: f64,
    pub worker_recycle_limit: u32,
    pub deviation_threshold_pct: f64,
    pub volume_floor: Option<u128>,
    pub derived_metrics_window: usize,
    pub decode_subchunk_cap: usize,
    pub decode_subchunk_target_logs: usize,
    pub per_pool_lock_ttl_secs: f64,
    pub enrichment_rate_limit_per_sec: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            stagger_secs: 180,
            scheduler_interval_secs: 300,
            global_lock_ttl_secs: 300.0,
            worker_recycle_limit: 20,
            deviation_threshold_pct: 5.0,
            volume_floor: None,
            derived_metrics_window: 60,
            decode_subchunk_cap: 8,
            decode_subchunk_target_logs: 200,
            // A conservative multiple of expected pipeline duration (§6).
            per_pool_lock_ttl_secs: 1800.0,
            enrichment_rate_limit_per_sec: 900,
        }
    }
}

impl Tunables {
    /// Builds from defaults, applying any matching environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut t = Self::default();
        if let Some(v) = parse_env("STAGGER_SECS")? {
            t.stagger_secs = v;
        }
        if let Some(v) = parse_env("SCHEDULER_INTERVAL_SECS")? {
            t.scheduler_interval_secs = v;
        }
        if let Some(v) = parse_env("GLOBAL_LOCK_TTL_SECS")? {
            t.global_lock_ttl_secs = v;
        }
        if let Some(v) = parse_env("WORKER_RECYCLE_LIMIT")? {
            t.worker_recycle_limit = v;
        }
        Ok(t)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_secs(self.stagger_secs)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }
}

/// Required-environment-variable accessor: fails fast with a clear error
/// when absent (§1.1 "typed accessors").
pub fn required_env(name: &str) -> Result<String> {
    env::var(name).wrap_err_with(|| format!("required environment variable {name} is not set"))
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| eyre::eyre!("invalid value for {name}='{raw}': {e}")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).wrap_err_with(|| format!("failed to read {name}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let t = Tunables::default();
        assert_eq!(t.stagger_secs, 180);
        assert_eq!(t.scheduler_interval_secs, 300);
        assert_eq!(t.worker_recycle_limit, 20);
        assert_eq!(t.decode_subchunk_cap, 8);
    }
}
