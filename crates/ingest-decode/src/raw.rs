//! Converts a [`RawLog`] (hex-string fields, as returned by `eth_getLogs`)
//! into the `alloy_primitives::Log` shape `SolEvent::decode_log` expects.

use alloy::primitives::{Address, Bytes, Log, LogData, B256};
use eyre::{Context, Result};
use ingest_data::types::RawLog;

pub fn to_alloy_log(log: &RawLog) -> Result<Log> {
    let address: Address = log
        .address
        .parse()
        .wrap_err_with(|| format!("invalid log address '{}'", log.address))?;

    let topics = log
        .topics
        .iter()
        .map(|t| {
            t.parse::<B256>()
                .wrap_err_with(|| format!("invalid topic '{t}'"))
        })
        .collect::<Result<Vec<_>>>()?;

    let data: Bytes = log
        .data
        .parse()
        .wrap_err_with(|| format!("invalid log data '{}'", log.data))?;

    Ok(Log {
        address,
        data: LogData::new_unchecked(topics, data),
    })
}
