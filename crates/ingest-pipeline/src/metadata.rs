//! Token metadata resolution (§4.5.2 step 1): `token0()`/`token1()`/
//! `decimals()`/`symbol()` view calls, cached process-local and keyed by
//! token address (§5 "Shared resources" — unbounded map, no invalidation
//! needed since token metadata is immutable).

use dashmap::DashMap;
use eyre::{eyre, Result};
use ingest_data::ChainClient;

const SELECTOR_TOKEN0: &str = "0x0dfe1681";
const SELECTOR_TOKEN1: &str = "0xd21220a7";
const SELECTOR_DECIMALS: &str = "0x313ce567";
const SELECTOR_SYMBOL: &str = "0x95d89b41";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenMeta {
    pub decimals: u8,
    pub symbol: String,
}

/// Process-local cache of resolved token metadata, shared across pool
/// pipelines running concurrently against the same RPC client.
#[derive(Default)]
pub struct TokenMetadataCache {
    inner: DashMap<String, TokenMeta>,
}

impl TokenMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(token0_address, token1_address)` for `pool`.
    pub async fn pool_tokens(&self, client: &ChainClient, pool: &str) -> Result<(String, String)> {
        let token0 = call_address(client, pool, SELECTOR_TOKEN0).await?;
        let token1 = call_address(client, pool, SELECTOR_TOKEN1).await?;
        Ok((token0, token1))
    }

    /// Returns cached (or freshly resolved) `decimals`/`symbol` for `token`.
    pub async fn resolve(&self, client: &ChainClient, token: &str) -> Result<TokenMeta> {
        if let Some(cached) = self.inner.get(token) {
            return Ok(cached.clone());
        }
        let decimals = call_u8(client, token, SELECTOR_DECIMALS).await?;
        let symbol = call_symbol(client, token, SELECTOR_SYMBOL).await?;
        let meta = TokenMeta { decimals, symbol };
        self.inner.insert(token.to_string(), meta.clone());
        Ok(meta)
    }
}

async fn call_address(client: &ChainClient, to: &str, selector: &str) -> Result<String> {
    let result = client.call(to, selector, None).await?;
    let hex = result.trim_start_matches("0x");
    if hex.len() < 64 {
        return Err(eyre!("address call to {to} returned short response"));
    }
    Ok(format!("0x{}", &hex[hex.len() - 40..]).to_lowercase())
}

async fn call_u8(client: &ChainClient, to: &str, selector: &str) -> Result<u8> {
    let result = client.call(to, selector, None).await?;
    let hex = result.trim_start_matches("0x");
    if hex.is_empty() {
        return Err(eyre!("decimals() call to {to} returned empty response"));
    }
    let trimmed = hex.trim_start_matches('0');
    let value = if trimmed.is_empty() { 0 } else { u64::from_str_radix(trimmed, 16)? };
    u8::try_from(value).map_err(|_| eyre!("decimals() value {value} out of u8 range for {to}"))
}

/// Decodes a `symbol()` return value, which is ABI-encoded as either a
/// dynamic `string` (offset/length/data) or, for a handful of
/// non-compliant tokens, a right-padded `bytes32`.
async fn call_symbol(client: &ChainClient, to: &str, selector: &str) -> Result<String> {
    let result = client.call(to, selector, None).await?;
    let hex = result.trim_start_matches("0x");
    decode_symbol_hex(hex).ok_or_else(|| eyre!("could not decode symbol() response for {to}"))
}

fn decode_symbol_hex(hex: &str) -> Option<String> {
    const WORD: usize = 64;
    if hex.len() >= WORD * 2 {
        // Dynamic string: word0 = offset (ignored, always 0x20), word1 = byte length.
        let len_hex = &hex[WORD..WORD * 2];
        let len = usize::from_str_radix(len_hex.trim_start_matches('0'), 16).ok().unwrap_or(0);
        let data_start = WORD * 2;
        let data_hex = hex.get(data_start..data_start + len * 2)?;
        let bytes = hex_decode(data_hex)?;
        if let Ok(s) = String::from_utf8(bytes) {
            if !s.is_empty() {
                return Some(s);
            }
        }
    }
    // Fallback: right-padded bytes32, trim trailing NULs.
    let bytes = hex_decode(hex)?;
    let trimmed: Vec<u8> = bytes.into_iter().take_while(|b| *b != 0).collect();
    String::from_utf8(trimmed).ok().filter(|s| !s.is_empty())
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_symbol_dynamic_string() {
        // offset word (0x20), length word (3), "ARB" padded to 32 bytes.
        let offset = format!("{:064x}", 0x20);
        let len = format!("{:064x}", 3);
        let data = format!("{:0<64}", hex_str("ARB"));
        let hex = format!("{offset}{len}{data}");
        assert_eq!(decode_symbol_hex(&hex), Some("ARB".to_string()));
    }

    #[test]
    fn decode_symbol_bytes32_fallback() {
        let data = format!("{:0<64}", hex_str("ARB"));
        assert_eq!(decode_symbol_hex(&data), Some("ARB".to_string()));
    }

    fn hex_str(s: &str) -> String {
        s.bytes().map(|b| format!("{b:02x}")).collect()
    }
}
