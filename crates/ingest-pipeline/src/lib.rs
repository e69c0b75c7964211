//! In-memory aggregation, enrichment, orchestration, and scheduling for
//! the DEX swap ingestion engine (C4's in-memory half, and C5 in full).

pub mod aggregator;
pub mod config;
pub mod derived;
pub mod enrichment;
pub mod metadata;
pub mod orchestrator;
pub mod scheduler;

pub use aggregator::{SwapAggregator, TradeSizeAggregator};
pub use config::Tunables;
pub use orchestrator::run_pool_pipeline;
pub use scheduler::{per_pool_lock_name, LockGuard, SchedulerLock, SqliteSchedulerLock, GLOBAL_LOCK_NAME};
