//! Chain access, persistence, and shared types for the DEX swap ingestion engine.

pub mod block_index;
pub mod chain;
pub mod store;
pub mod types;

pub use block_index::{compute_gaps, find_block_by_timestamp, walk_block_ranges, BlockTimestampResolver, Gap};
pub use chain::ChainClient;
pub use store::Store;
pub use types::{
    BlockHeader, Chain, Dex, MinuteBucket, Pool, RawLog, SwapRecord, TradeSizeHistogram,
};
