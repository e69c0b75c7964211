//! Decoder registry (C3, §4.3, §9): a static table keyed by `(Chain,
//! Dex)` mapping to a [`PipelineDescriptor`] — topic hash, chunk size,
//! and decode function pointer. New DEXes are added by constructing a new
//! descriptor, never by modifying the orchestrator.

use eyre::Result;
use ingest_data::types::{Chain, Dex, RawLog, SwapRecord};

/// `(log, resolved_timestamp, base_decimals, quote_decimals, base_is_token0) -> SwapRecord`.
pub type DecodeFn = fn(&RawLog, u64, u8, u8, bool) -> Result<SwapRecord>;

#[derive(Clone, Copy)]
pub struct PipelineDescriptor {
    pub chain: Chain,
    pub dex: Dex,
    pub topic0: &'static str,
    pub chunk_size: u64,
    pub decode: DecodeFn,
}

/// Looks up the decoder for a `(chain, dex)` pair. Camelot and PancakeSwap
/// are V3-family forks that reuse the V3 decoder verbatim (§4.3).
pub fn lookup(chain: Chain, dex: Dex) -> PipelineDescriptor {
    let (topic0, decode): (&'static str, DecodeFn) = match dex {
        Dex::UniswapV3 | Dex::Camelot | Dex::PancakeSwap => (crate::v3::TOPIC0, crate::v3::decode_swap),
        Dex::UniswapV2 => (crate::v2::TOPIC0, crate::v2::decode_swap),
    };
    PipelineDescriptor {
        chain,
        dex,
        topic0,
        chunk_size: chain.default_chunk_size(),
        decode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camelot_and_pancakeswap_reuse_v3_decoder() {
        let camelot = lookup(Chain::Arbitrum, Dex::Camelot);
        let pancake = lookup(Chain::Base, Dex::PancakeSwap);
        let v3 = lookup(Chain::Arbitrum, Dex::UniswapV3);
        assert_eq!(camelot.topic0, v3.topic0);
        assert_eq!(pancake.topic0, v3.topic0);
    }

    #[test]
    fn chunk_size_follows_chain_default() {
        let arb = lookup(Chain::Arbitrum, Dex::UniswapV3);
        let base = lookup(Chain::Base, Dex::UniswapV3);
        assert_eq!(arb.chunk_size, 10_000);
        assert_eq!(base.chunk_size, 1_500);
    }
}
