//! Thin façade over an EVM JSON-RPC endpoint (C1, spec §4.1).
//!
//! Provides latest-block height, single/batched block-header lookups,
//! `eth_getLogs` with retry, transaction-sender lookups for enrichment,
//! and a generic `eth_call` for token metadata / `slot0()` reads.
//!
//! One [`ChainClient`] is constructed per RPC URL and reused for the
//! process lifetime (§4.1 "Singleton policy"); callers are expected to
//! hold it behind an `Arc` and clone that, not build a new client per call.

use std::time::Duration;

use eyre::{eyre, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::types::{BlockHeader, RawLog};

/// Per-request timeout (§4.1: "a 10-second per-request timeout is mandatory").
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin façade over a single EVM JSON-RPC endpoint.
#[derive(Clone)]
pub struct ChainClient {
    rpc_url: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    id: Value,
    result: Option<Value>,
    error: Option<RpcError>,
}

impl ChainClient {
    /// Builds a client for `rpc_url` and verifies connectivity with one
    /// `eth_blockNumber` call, retried like any other transient RPC failure.
    ///
    /// # Errors
    /// Returns an error if the initial connectivity check never succeeds.
    #[tracing::instrument(skip_all, fields(rpc_url = %rpc_url))]
    pub async fn connect(rpc_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .wrap_err("failed to build HTTP client")?;
        let client = Self {
            rpc_url: rpc_url.to_string(),
            http,
        };
        let latest = client
            .latest_block()
            .await
            .wrap_err("initial RPC connectivity check failed")?;
        tracing::info!(rpc_url = %rpc_url, latest_block = latest, "chain client connected");
        Ok(client)
    }

    async fn call_once(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let resp = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .wrap_err_with(|| format!("{method} request failed"))?;

        if !resp.status().is_success() {
            return Err(eyre!("{method} HTTP status {}", resp.status()));
        }

        let envelope: RpcEnvelope = resp
            .json()
            .await
            .wrap_err_with(|| format!("failed to decode {method} response"))?;

        if let Some(error) = envelope.error {
            return Err(eyre!("{method} RPC error {}: {}", error.code, error.message));
        }
        envelope
            .result
            .ok_or_else(|| eyre!("{method} response missing result"))
    }

    /// Calls `method` with exponential backoff: initial 1s, factor 2, up to
    /// `max_attempts` attempts, no jitter (§4.1 contract for `latest_block`).
    async fn call_with_backoff(&self, method: &str, params: Value, max_attempts: u32) -> Result<Value> {
        let mut attempt = 0;
        let mut backoff = Duration::from_secs(1);
        loop {
            match self.call_once(method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < max_attempts => {
                    tracing::debug!(method, attempt, error = %err, "retrying RPC call after backoff");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// `eth_blockNumber`. Retried up to 5 attempts (§4.1).
    #[tracing::instrument(skip(self))]
    pub async fn latest_block(&self) -> Result<u64> {
        let result = self
            .call_with_backoff("eth_blockNumber", json!([]), 5)
            .await
            .wrap_err("latest_block failed after retries")?;
        parse_hex_u64(&result, "eth_blockNumber")
    }

    /// Single-block timestamp lookup via `eth_getBlockByNumber`.
    #[tracing::instrument(skip(self))]
    pub async fn block_timestamp(&self, block: u64) -> Result<u64> {
        let params = json!([format!("0x{block:x}"), false]);
        let result = self
            .call_with_backoff("eth_getBlockByNumber", params, 5)
            .await
            .wrap_err_with(|| format!("block_timestamp({block}) failed"))?;
        if result.is_null() {
            return Err(eyre!("block {block} not found"));
        }
        let ts_hex = result
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or_else(|| eyre!("block {block} response missing timestamp"))?;
        u64::from_str_radix(ts_hex.trim_start_matches("0x"), 16)
            .wrap_err_with(|| format!("invalid timestamp hex for block {block}"))
    }

    /// Batched `getBlockByNumber`: one network round-trip containing N
    /// sub-requests. Unresolved (null) sub-replies are dropped; the caller
    /// is responsible for handling any missing entries (§4.1).
    #[tracing::instrument(skip(self, blocks), fields(count = blocks.len()))]
    pub async fn batch_block_timestamps(&self, blocks: &[u64]) -> Result<Vec<BlockHeader>> {
        if blocks.is_empty() {
            return Ok(Vec::new());
        }

        let batch: Vec<Value> = blocks
            .iter()
            .enumerate()
            .map(|(i, b)| {
                json!({
                    "jsonrpc": "2.0",
                    "id": i,
                    "method": "eth_getBlockByNumber",
                    "params": [format!("0x{b:x}"), false],
                })
            })
            .collect();

        let resp = self
            .http
            .post(&self.rpc_url)
            .json(&batch)
            .send()
            .await
            .wrap_err("batched eth_getBlockByNumber request failed")?;

        if !resp.status().is_success() {
            return Err(eyre!("batched eth_getBlockByNumber HTTP status {}", resp.status()));
        }

        let envelopes: Vec<RpcEnvelope> = resp
            .json()
            .await
            .wrap_err("failed to decode batched eth_getBlockByNumber response")?;

        let mut headers = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let Some(idx) = envelope.id.as_u64().map(|i| i as usize) else {
                continue;
            };
            let Some(block_number) = blocks.get(idx).copied() else {
                continue;
            };
            if envelope.error.is_some() {
                continue;
            }
            let Some(result) = envelope.result else { continue };
            if result.is_null() {
                continue;
            }
            let Some(ts_hex) = result.get("timestamp").and_then(Value::as_str) else {
                continue;
            };
            let Ok(timestamp) = u64::from_str_radix(ts_hex.trim_start_matches("0x"), 16) else {
                continue;
            };
            headers.push(BlockHeader { number: block_number, timestamp });
        }
        Ok(headers)
    }

    /// `eth_getLogs` filtered by `(address, topics, fromBlock, toBlock)`.
    /// Retried up to 3 times; on persistent failure returns an empty
    /// vector and logs the error rather than raising (§4.1).
    #[tracing::instrument(skip(self, topics), fields(address = %address, from, to))]
    pub async fn get_logs(
        &self,
        address: &str,
        topics: &[&str],
        from: u64,
        to: u64,
    ) -> Vec<RawLog> {
        let params = json!([{
            "address": address,
            "topics": topics,
            "fromBlock": format!("0x{from:x}"),
            "toBlock": format!("0x{to:x}"),
        }]);

        match self.call_with_backoff("eth_getLogs", params, 3).await {
            Ok(result) => parse_logs(&result).unwrap_or_else(|err| {
                tracing::error!(error = %err, from, to, "failed to parse eth_getLogs response");
                Vec::new()
            }),
            Err(err) => {
                tracing::error!(error = %err, from, to, address, "eth_getLogs failed after retries");
                Vec::new()
            }
        }
    }

    /// Returns the `from` address of a transaction, via `eth_getTransactionByHash`.
    #[tracing::instrument(skip(self))]
    pub async fn get_transaction_sender(&self, tx_hash: &str) -> Result<Option<String>> {
        let result = self
            .call_with_backoff("eth_getTransactionByHash", json!([tx_hash]), 3)
            .await
            .wrap_err_with(|| format!("eth_getTransactionByHash({tx_hash}) failed"))?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(result
            .get("from")
            .and_then(Value::as_str)
            .map(|s| s.to_lowercase()))
    }

    /// Batched sender lookup, up to 100 hashes per request (§4.5.3).
    /// Chunks are fired concurrently rather than awaited one at a time.
    #[tracing::instrument(skip(self, tx_hashes), fields(count = tx_hashes.len()))]
    pub async fn batch_transaction_senders(
        &self,
        tx_hashes: &[String],
    ) -> Result<std::collections::HashMap<String, String>> {
        let chunk_results = futures::future::try_join_all(tx_hashes.chunks(100).map(|chunk| {
            let http = self.http.clone();
            let rpc_url = self.rpc_url.clone();
            async move { fetch_sender_chunk(&http, &rpc_url, chunk).await }
        }))
        .await?;

        let mut out = std::collections::HashMap::new();
        for chunk in chunk_results {
            out.extend(chunk);
        }
        Ok(out)
    }

    /// Generic `eth_call`, used to read `token0()`/`token1()`/`decimals()`/
    /// `symbol()`/`slot0()` view functions.
    #[tracing::instrument(skip(self, calldata))]
    pub async fn call(&self, to: &str, calldata: &str, block: Option<u64>) -> Result<String> {
        let tag = block
            .map(|b| format!("0x{b:x}"))
            .unwrap_or_else(|| "latest".to_string());
        let params = json!([{ "to": to, "data": calldata }, tag]);
        let result = self
            .call_with_backoff("eth_call", params, 3)
            .await
            .wrap_err_with(|| format!("eth_call to {to} failed"))?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| eyre!("eth_call to {to} returned non-string result"))
    }
}

fn parse_hex_u64(value: &Value, context: &str) -> Result<u64> {
    let hex = value
        .as_str()
        .ok_or_else(|| eyre!("{context} returned non-string result"))?;
    u64::from_str_radix(hex.trim_start_matches("0x"), 16)
        .wrap_err_with(|| format!("{context} returned invalid hex: {hex}"))
}

fn parse_logs(result: &Value) -> Result<Vec<RawLog>> {
    let array = result
        .as_array()
        .ok_or_else(|| eyre!("eth_getLogs result is not an array"))?;

    let mut logs = Vec::with_capacity(array.len());
    for entry in array {
        let address = entry
            .get("address")
            .and_then(Value::as_str)
            .ok_or_else(|| eyre!("log missing address"))?
            .to_lowercase();
        let topics = entry
            .get("topics")
            .and_then(Value::as_array)
            .ok_or_else(|| eyre!("log missing topics"))?
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        let data = entry
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or("0x")
            .to_string();
        let block_number = entry
            .get("blockNumber")
            .and_then(Value::as_str)
            .and_then(|h| u64::from_str_radix(h.trim_start_matches("0x"), 16).ok())
            .ok_or_else(|| eyre!("log missing/invalid blockNumber"))?;
        let tx_hash = entry
            .get("transactionHash")
            .and_then(Value::as_str)
            .ok_or_else(|| eyre!("log missing transactionHash"))?
            .to_lowercase();
        let log_index = entry
            .get("logIndex")
            .and_then(Value::as_str)
            .and_then(|h| u64::from_str_radix(h.trim_start_matches("0x"), 16).ok())
            .ok_or_else(|| eyre!("log missing/invalid logIndex"))?;

        logs.push(RawLog {
            address,
            topics,
            data,
            block_number,
            tx_hash,
            log_index,
        });
    }
    Ok(logs)
}

async fn fetch_sender_chunk(
    http: &Client,
    rpc_url: &str,
    chunk: &[String],
) -> Result<std::collections::HashMap<String, String>> {
    let batch: Vec<Value> = chunk
        .iter()
        .enumerate()
        .map(|(i, h)| {
            json!({
                "jsonrpc": "2.0",
                "id": i,
                "method": "eth_getTransactionByHash",
                "params": [h],
            })
        })
        .collect();

    let resp = http
        .post(rpc_url)
        .json(&batch)
        .send()
        .await
        .wrap_err("batched eth_getTransactionByHash request failed")?;
    let envelopes: Vec<RpcEnvelope> = resp
        .json()
        .await
        .wrap_err("failed to decode batched eth_getTransactionByHash response")?;

    let mut out = std::collections::HashMap::new();
    for envelope in envelopes {
        let Some(idx) = envelope.id.as_u64().map(|i| i as usize) else { continue };
        let Some(hash) = chunk.get(idx) else { continue };
        if envelope.error.is_some() {
            continue;
        }
        let Some(result) = envelope.result else { continue };
        if result.is_null() {
            continue;
        }
        if let Some(from) = result.get("from").and_then(Value::as_str) {
            out.insert(hash.clone(), from.to_lowercase());
        }
    }
    Ok(out)
}
