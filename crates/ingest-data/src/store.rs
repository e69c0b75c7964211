//! SQLite storage layer for the per-pool ingestion engine (§3, §4.4.2, §6).
//!
//! Pool-scoped destination tables are created lazily with deterministic,
//! validated names. All merge logic for idempotent re-ingestion (I1, I2)
//! lives in the `ON CONFLICT DO UPDATE` clause itself, referencing
//! `excluded.*`, so no read-modify-write race exists between concurrent
//! pool tasks (§4.4.2, §9 "implicit global ORM session to explicit
//! unit-of-work").
//!
//! ## Why SQLite?
//! Rapid local iteration and testability without a running database
//! server, while the upsert SQL remains portable to a server-backed
//! engine (SPEC_FULL.md §1.1).

use std::time::Duration;

use eyre::{bail, eyre, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::types::{MinuteBucket, Pool, SwapRecord, TradeSizeHistogram};

pub struct Store {
    conn: Connection,
}

/// Validates a table/lock-name fragment against `[A-Za-z0-9_]+` to
/// prevent SQL injection through externally-derived identifiers
/// (chain/dex/pair strings), per §4.2.3 and §9.
pub fn validate_identifier(name: &str) -> Result<()> {
    if !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        Err(eyre!("invalid identifier '{name}': must match [A-Za-z0-9_]+"))
    }
}

/// Deterministic per-pool table names: `{chain}_{dex}_{base}{quote}_1m_klines`
/// and `{chain}_{dex}_{base}{quote}_raw_swaps`, lower-cased (§3).
pub fn table_names(chain: &str, dex: &str, base: &str, quote: &str) -> Result<(String, String)> {
    let stem = format!("{chain}_{dex}_{base}{quote}").to_lowercase();
    validate_identifier(&stem)?;
    Ok((format!("{stem}_1m_klines"), format!("{stem}_raw_swaps")))
}

impl Store {
    /// Creates or opens a SQLite database with WAL mode enabled.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrations fail.
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path).wrap_err("failed to open SQLite database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .wrap_err("failed to set SQLite pragmas")?;
        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS pools (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chain TEXT NOT NULL,
                dex TEXT NOT NULL,
                pair TEXT NOT NULL,
                address TEXT NOT NULL UNIQUE,
                active INTEGER NOT NULL DEFAULT 1,
                last_started REAL
            );

            CREATE TABLE IF NOT EXISTS extraction_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp REAL NOT NULL,
                block_range TEXT NOT NULL,
                log_count INTEGER NOT NULL,
                duration_seconds REAL NOT NULL,
                pool_slug TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS price_8h_usd (
                bucket_start INTEGER PRIMARY KEY,
                eth REAL,
                btc REAL,
                created_at REAL
            );

            CREATE TABLE IF NOT EXISTS distributed_locks (
                name TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                acquired_at REAL NOT NULL,
                ttl_secs REAL NOT NULL
            );
            ",
            )
            .wrap_err("failed to run base migrations")?;
        Ok(())
    }

    // ---- pools (read-only to this engine, §3/§6) ----

    /// Active pools ordered by `last_started ASC` (nulls first), per §4.5.1.
    pub fn active_pools_by_last_started(&self) -> Result<Vec<Pool>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, chain, dex, pair, address, active, last_started
             FROM pools WHERE active = 1
             ORDER BY last_started IS NOT NULL, last_started ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Pool {
                    id: row.get(0)?,
                    chain: row.get(1)?,
                    dex: row.get(2)?,
                    pair: row.get(3)?,
                    address: row.get(4)?,
                    active: row.get::<_, i64>(5)? != 0,
                    last_started: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Looks up a single pool by its unique on-chain address, for CLI
    /// inspection commands (§6 "Diagnose").
    pub fn find_pool_by_address(&self, address: &str) -> Result<Option<Pool>> {
        self.conn
            .query_row(
                "SELECT id, chain, dex, pair, address, active, last_started
                 FROM pools WHERE address = ?1",
                params![address],
                |row| {
                    Ok(Pool {
                        id: row.get(0)?,
                        chain: row.get(1)?,
                        dex: row.get(2)?,
                        pair: row.get(3)?,
                        address: row.get(4)?,
                        active: row.get::<_, i64>(5)? != 0,
                        last_started: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Whether a table with the given name exists, for CLI diagnostics
    /// that probe pool-scoped tables before they've been created.
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn update_pool_last_started(&self, pool_id: i64, now: f64) -> Result<()> {
        self.conn.execute(
            "UPDATE pools SET last_started = ?1 WHERE id = ?2",
            params![now, pool_id],
        )?;
        Ok(())
    }

    /// Test/seed helper: inserts a pool row directly (the engine otherwise
    /// only reads this table; an out-of-band process populates it in
    /// production, per §3 "Lifecycles").
    pub fn insert_pool(&self, chain: &str, dex: &str, pair: &str, address: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO pools (chain, dex, pair, address, active, last_started)
             VALUES (?1, ?2, ?3, ?4, 1, NULL)",
            params![chain, dex, pair, address],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    // ---- distributed locks (§4.5.1, §9 "resolved Open Question") ----

    /// Acquires a named lock with a TTL, best-effort. Returns `true` if the
    /// lock was acquired (either newly, or because the prior holder's TTL
    /// has expired), `false` otherwise.
    pub fn try_acquire_lock(&self, name: &str, holder: &str, ttl_secs: f64, now: f64) -> Result<bool> {
        let existing: Option<(f64, f64)> = self
            .conn
            .query_row(
                "SELECT acquired_at, ttl_secs FROM distributed_locks WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO distributed_locks (name, holder, acquired_at, ttl_secs)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![name, holder, now, ttl_secs],
                )?;
                Ok(true)
            }
            Some((acquired_at, prev_ttl)) if now - acquired_at > prev_ttl => {
                self.conn.execute(
                    "UPDATE distributed_locks SET holder = ?2, acquired_at = ?3, ttl_secs = ?4
                     WHERE name = ?1",
                    params![name, holder, now, ttl_secs],
                )?;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    /// Releases a named lock unconditionally. Called on any iteration exit,
    /// normal or exceptional (§4.5.1 item 5), via an RAII guard in the
    /// pipeline layer.
    pub fn release_lock(&self, name: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM distributed_locks WHERE name = ?1", params![name])?;
        Ok(())
    }

    // ---- destination tables (§3, §4.5.2 step 3) ----

    /// Creates the minute-bucket and raw-swap tables for a pool if absent.
    /// Table names must already be validated by [`table_names`].
    pub fn ensure_pool_tables(&self, klines_table: &str, raw_table: &str) -> Result<()> {
        validate_identifier(klines_table)?;
        validate_identifier(raw_table)?;

        self.conn.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS {klines_table} (
                minute_start INTEGER PRIMARY KEY,
                open_price_scaled TEXT NOT NULL,
                open_ts INTEGER NOT NULL,
                close_price_scaled TEXT NOT NULL,
                close_ts INTEGER NOT NULL,
                high_price_scaled TEXT NOT NULL,
                low_price_scaled TEXT NOT NULL,
                avg_price_scaled TEXT NOT NULL,
                price_scale INTEGER NOT NULL,
                swap_count INTEGER NOT NULL,
                total_base_volume TEXT NOT NULL,
                total_quote_volume TEXT NOT NULL,
                trade_imbalance REAL,
                price_volatility REAL,
                price_momentum REAL
            );

            CREATE TABLE IF NOT EXISTS {raw_table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                block_number INTEGER NOT NULL,
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                caller TEXT,
                router_tag TEXT,
                base_delta TEXT NOT NULL,
                quote_delta TEXT NOT NULL,
                price_scaled TEXT NOT NULL,
                price_scale INTEGER NOT NULL,
                is_buy INTEGER NOT NULL,
                liquidity TEXT,
                tick INTEGER,
                UNIQUE(block_number, tx_hash, log_index)
            );
            "
        ))?;
        Ok(())
    }

    /// Row count of an already-validated table name, for CLI diagnostics.
    pub fn row_count(&self, table: &str) -> Result<i64> {
        validate_identifier(table)?;
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .map_err(Into::into)
    }

    /// Reads `(min(minute_start), max(minute_start))` of an existing
    /// klines table, or `None` if the table has no rows (§4.2.3).
    pub fn minute_ts_range(&self, klines_table: &str) -> Result<Option<(i64, i64)>> {
        validate_identifier(klines_table)?;
        let row: Option<(Option<i64>, Option<i64>)> = self
            .conn
            .query_row(
                &format!("SELECT MIN(minute_start), MAX(minute_start) FROM {klines_table}"),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(match row {
            Some((Some(min), Some(max))) => Some((min, max)),
            _ => None,
        })
    }

    /// Upserts a batch of minute buckets, applying the §4.4.2 merge
    /// discipline server-side inside the `ON CONFLICT` clause so the
    /// result is independent of upsert order (I1, I2).
    pub fn upsert_minute_buckets(&mut self, klines_table: &str, buckets: &[MinuteBucket]) -> Result<()> {
        validate_identifier(klines_table)?;
        if buckets.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        {
            // `?13` is `10^price_scale`, bound per row rather than baked into
            // the template: the merged avg must land in the same fixed-point
            // domain as the OHLC columns, not the raw quote/base ratio,
            // which divides out to a human-unit price (finding: avg_price
            // was truncating to zero whenever base/quote decimals differ).
            let sql = format!(
                "INSERT INTO {klines_table}
                    (minute_start, open_price_scaled, open_ts, close_price_scaled, close_ts,
                     high_price_scaled, low_price_scaled, avg_price_scaled, price_scale,
                     swap_count, total_base_volume, total_quote_volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(minute_start) DO UPDATE SET
                    open_price_scaled = CASE WHEN excluded.open_ts < {klines_table}.open_ts
                        THEN excluded.open_price_scaled ELSE {klines_table}.open_price_scaled END,
                    open_ts = MIN({klines_table}.open_ts, excluded.open_ts),
                    close_price_scaled = CASE WHEN excluded.close_ts > {klines_table}.close_ts
                        THEN excluded.close_price_scaled ELSE {klines_table}.close_price_scaled END,
                    close_ts = MAX({klines_table}.close_ts, excluded.close_ts),
                    high_price_scaled = CASE WHEN CAST(excluded.high_price_scaled AS INTEGER) >
                        CAST({klines_table}.high_price_scaled AS INTEGER)
                        THEN excluded.high_price_scaled ELSE {klines_table}.high_price_scaled END,
                    low_price_scaled = CASE WHEN CAST(excluded.low_price_scaled AS INTEGER) <
                        CAST({klines_table}.low_price_scaled AS INTEGER)
                        THEN excluded.low_price_scaled ELSE {klines_table}.low_price_scaled END,
                    swap_count = {klines_table}.swap_count + excluded.swap_count,
                    total_base_volume = CAST(CAST({klines_table}.total_base_volume AS INTEGER) +
                        CAST(excluded.total_base_volume AS INTEGER) AS TEXT),
                    total_quote_volume = CAST(CAST({klines_table}.total_quote_volume AS INTEGER) +
                        CAST(excluded.total_quote_volume AS INTEGER) AS TEXT),
                    avg_price_scaled = CASE
                        WHEN CAST({klines_table}.total_base_volume AS INTEGER) +
                             CAST(excluded.total_base_volume AS INTEGER) = 0
                        THEN '0'
                        ELSE CAST(
                            ((CAST({klines_table}.total_quote_volume AS INTEGER) +
                              CAST(excluded.total_quote_volume AS INTEGER)) * ?13) /
                            (CAST({klines_table}.total_base_volume AS INTEGER) +
                             CAST(excluded.total_base_volume AS INTEGER)) AS TEXT)
                        END"
            );
            let mut stmt = tx.prepare(&sql)?;
            for bucket in buckets {
                let scale_pow = 10i64.pow(bucket.price_scale as u32);
                stmt.execute(params![
                    bucket.minute_start,
                    bucket.open_price_scaled.to_string(),
                    bucket.open_ts,
                    bucket.close_price_scaled.to_string(),
                    bucket.close_ts,
                    bucket.high_price_scaled.to_string(),
                    bucket.low_price_scaled.to_string(),
                    bucket.avg_price_scaled.to_string(), // seed the real VWAP on first insert
                    bucket.price_scale,
                    bucket.swap_count,
                    bucket.total_base_volume.to_string(),
                    bucket.total_quote_volume.to_string(),
                    scale_pow,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Bulk insert with conflict-do-nothing on `(block_number, tx_hash,
    /// log_index)` (I4). Returns the number of rows actually inserted.
    pub fn insert_raw_swaps(&mut self, raw_table: &str, swaps: &[SwapRecord]) -> Result<usize> {
        validate_identifier(raw_table)?;
        if swaps.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let mut inserted = 0usize;
        {
            let sql = format!(
                "INSERT OR IGNORE INTO {raw_table}
                    (block_number, tx_hash, log_index, timestamp, sender, recipient, caller,
                     router_tag, base_delta, quote_delta, price_scaled, price_scale, is_buy,
                     liquidity, tick)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            );
            let mut stmt = tx.prepare(&sql)?;
            for swap in swaps {
                let changed = stmt.execute(params![
                    swap.block_number,
                    swap.tx_hash,
                    swap.log_index,
                    swap.timestamp,
                    swap.sender,
                    swap.recipient,
                    swap.caller,
                    swap.router_tag,
                    swap.base_delta.to_string(),
                    swap.quote_delta.to_string(),
                    swap.price_scaled.to_string(),
                    swap.price_scale,
                    swap.is_buy as i64,
                    swap.liquidity.map(|v| v.to_string()),
                    swap.tick,
                ])?;
                inserted += changed;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Upserts the trade-size histogram row for a pool; each bucket column
    /// is added to its existing value on conflict.
    pub fn upsert_trade_size_histogram(&self, pool_name: &str, hist: &TradeSizeHistogram) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trade_size_distribution (
                pool_name TEXT PRIMARY KEY,
                bucket_neg2 INTEGER NOT NULL DEFAULT 0,
                bucket_neg1 INTEGER NOT NULL DEFAULT 0,
                bucket_0 INTEGER NOT NULL DEFAULT 0,
                bucket_1 INTEGER NOT NULL DEFAULT 0,
                bucket_2 INTEGER NOT NULL DEFAULT 0,
                bucket_3 INTEGER NOT NULL DEFAULT 0,
                bucket_4 INTEGER NOT NULL DEFAULT 0,
                bucket_5 INTEGER NOT NULL DEFAULT 0,
                bucket_6 INTEGER NOT NULL DEFAULT 0
            );",
        )?;

        self.conn.execute(
            "INSERT INTO trade_size_distribution
                (pool_name, bucket_neg2, bucket_neg1, bucket_0, bucket_1, bucket_2, bucket_3,
                 bucket_4, bucket_5, bucket_6)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(pool_name) DO UPDATE SET
                bucket_neg2 = bucket_neg2 + excluded.bucket_neg2,
                bucket_neg1 = bucket_neg1 + excluded.bucket_neg1,
                bucket_0 = bucket_0 + excluded.bucket_0,
                bucket_1 = bucket_1 + excluded.bucket_1,
                bucket_2 = bucket_2 + excluded.bucket_2,
                bucket_3 = bucket_3 + excluded.bucket_3,
                bucket_4 = bucket_4 + excluded.bucket_4,
                bucket_5 = bucket_5 + excluded.bucket_5,
                bucket_6 = bucket_6 + excluded.bucket_6",
            params![
                pool_name,
                hist.buckets[0],
                hist.buckets[1],
                hist.buckets[2],
                hist.buckets[3],
                hist.buckets[4],
                hist.buckets[5],
                hist.buckets[6],
                hist.buckets[7],
                hist.buckets[8],
            ],
        )?;
        Ok(())
    }

    /// Reads back a pool's trade-size histogram, for diagnostics and
    /// tests; `None` if the pool has no rows yet.
    pub fn read_trade_size_histogram(&self, pool_name: &str) -> Result<Option<TradeSizeHistogram>> {
        self.conn
            .query_row(
                "SELECT bucket_neg2, bucket_neg1, bucket_0, bucket_1, bucket_2, bucket_3,
                        bucket_4, bucket_5, bucket_6
                 FROM trade_size_distribution WHERE pool_name = ?1",
                params![pool_name],
                |row| {
                    let mut buckets = [0u64; 9];
                    for (i, bucket) in buckets.iter_mut().enumerate() {
                        *bucket = row.get(i)?;
                    }
                    Ok(TradeSizeHistogram { buckets })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Reads back one minute bucket's OHLC columns, for diagnostics and
    /// tests; `None` if the minute has no row.
    pub fn read_minute_ohlc(
        &self,
        klines_table: &str,
        minute_start: i64,
    ) -> Result<Option<(u128, i64, u128, i64, u128, u128)>> {
        validate_identifier(klines_table)?;
        self.conn
            .query_row(
                &format!(
                    "SELECT open_price_scaled, open_ts, close_price_scaled, close_ts,
                            high_price_scaled, low_price_scaled
                     FROM {klines_table} WHERE minute_start = ?1"
                ),
                params![minute_start],
                |row| {
                    let open: String = row.get(0)?;
                    let close: String = row.get(2)?;
                    let high: String = row.get(4)?;
                    let low: String = row.get(5)?;
                    Ok((
                        open.parse::<u128>().unwrap_or(0),
                        row.get(1)?,
                        close.parse::<u128>().unwrap_or(0),
                        row.get(3)?,
                        high.parse::<u128>().unwrap_or(0),
                        low.parse::<u128>().unwrap_or(0),
                    ))
                },
            )
            .optional()
            .map_err(Into::into)
    }

    // ---- post-ingest cleanup (§4.4.3) ----

    /// Deletes zero-price rows and price-deviation anomalies. Retries up
    /// to 3 times on transient connection errors with a 2-second sleep
    /// (§4.4.3, §7 "SQL transient").
    pub async fn cleanup_anomalies(
        &self,
        klines_table: &str,
        deviation_threshold_pct: f64,
        volume_floor: Option<u128>,
    ) -> Result<usize> {
        validate_identifier(klines_table)?;
        let mut attempt = 0;
        loop {
            match self.cleanup_anomalies_once(klines_table, deviation_threshold_pct, volume_floor) {
                Ok(deleted) => return Ok(deleted),
                Err(err) if attempt < 2 && is_transient_sqlite_error(&err) => {
                    tracing::warn!(error = %err, attempt, "cleanup retry after transient SQL error");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn cleanup_anomalies_once(
        &self,
        klines_table: &str,
        deviation_threshold_pct: f64,
        volume_floor: Option<u128>,
    ) -> Result<usize> {
        let zero_deleted = self.conn.execute(
            &format!("DELETE FROM {klines_table} WHERE CAST(avg_price_scaled AS INTEGER) = 0"),
            [],
        )?;

        let volume_clause = match volume_floor {
            Some(floor) => format!("AND CAST(total_quote_volume AS INTEGER) < {floor}"),
            None => String::new(),
        };

        let anomaly_sql = format!(
            "WITH ranked AS (
                SELECT minute_start, avg_price_scaled,
                       LAG(avg_price_scaled) OVER (ORDER BY minute_start) AS prev_avg
                FROM {klines_table}
             )
             DELETE FROM {klines_table}
             WHERE minute_start IN (
                SELECT minute_start FROM ranked
                WHERE prev_avg IS NOT NULL
                  AND CAST(prev_avg AS INTEGER) > 0
                  AND ABS(CAST(avg_price_scaled AS REAL) - CAST(prev_avg AS REAL))
                      > CAST(prev_avg AS REAL) * {deviation_pct}
                  {volume_clause}
             )",
            deviation_pct = deviation_threshold_pct / 100.0,
        );
        let anomaly_deleted = self.conn.execute(&anomaly_sql, [])?;

        Ok(zero_deleted + anomaly_deleted)
    }

    // ---- derived metrics (§4.4.4) ----

    /// Reads the full ordered minute series needed to compute derived
    /// metrics: `(minute_start, total_base_volume, total_quote_volume,
    /// avg_price_scaled, price_scale)`.
    pub fn read_minute_series(
        &self,
        klines_table: &str,
    ) -> Result<Vec<(i64, u128, u128, u128, u8)>> {
        validate_identifier(klines_table)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT minute_start, total_base_volume, total_quote_volume, avg_price_scaled, price_scale
             FROM {klines_table} ORDER BY minute_start ASC"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                let base: String = row.get(1)?;
                let quote: String = row.get(2)?;
                let avg: String = row.get(3)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    base.parse::<u128>().unwrap_or(0),
                    quote.parse::<u128>().unwrap_or(0),
                    avg.parse::<u128>().unwrap_or(0),
                    row.get::<_, u8>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Join-updates `trade_imbalance`, `price_volatility`, `price_momentum`
    /// for the given minutes, in batches of at most 5000 rows (§4.4.4).
    pub fn write_derived_metrics(
        &mut self,
        klines_table: &str,
        rows: &[(i64, f64, Option<f64>, Option<f64>)],
    ) -> Result<()> {
        validate_identifier(klines_table)?;
        for chunk in rows.chunks(5000) {
            let tx = self.conn.transaction()?;
            {
                let sql = format!(
                    "UPDATE {klines_table}
                     SET trade_imbalance = ?2, price_volatility = ?3, price_momentum = ?4
                     WHERE minute_start = ?1"
                );
                let mut stmt = tx.prepare(&sql)?;
                for (minute_start, imbalance, volatility, momentum) in chunk {
                    stmt.execute(params![minute_start, imbalance, volatility, momentum])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    // ---- extraction metrics (§3, §6) ----

    pub fn insert_extraction_metric(
        &self,
        timestamp: f64,
        block_range: (u64, u64),
        log_count: u64,
        duration_seconds: f64,
        pool_slug: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO extraction_metrics (timestamp, block_range, log_count, duration_seconds, pool_slug)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                timestamp,
                format!("{}-{}", block_range.0, block_range.1),
                log_count,
                duration_seconds,
                pool_slug,
            ],
        )?;
        Ok(())
    }

    // ---- price_8h_usd (consulted only, §3/§6) ----

    /// Reads a USD price for `token` at the 8-hour bucket containing `ts`,
    /// if the out-of-band pricing process has populated one. Absence means
    /// the trade-size histogram update for that minute is skipped, not
    /// estimated (§3).
    pub fn read_usd_price(&self, token: &str, ts: i64) -> Result<Option<f64>> {
        if !matches!(token.to_lowercase().as_str(), "eth" | "btc") {
            return Ok(None);
        }
        const BUCKET_SECS: i64 = 8 * 3600;
        let bucket_start = (ts / BUCKET_SECS) * BUCKET_SECS;
        let column = token.to_lowercase();
        let sql = format!("SELECT {column} FROM price_8h_usd WHERE bucket_start = ?1");
        self.conn
            .query_row(&sql, params![bucket_start], |row| row.get(0))
            .optional()
            .map_err(Into::into)
    }
}

fn is_transient_sqlite_error(err: &eyre::Report) -> bool {
    let text = err.to_string().to_lowercase();
    text.contains("locked") || text.contains("busy") || text.contains("connection")
}

/// Returns an error if `pair` doesn't contain a `/` separator, otherwise
/// splits it into `(base, quote)`.
pub fn split_pair(pair: &str) -> Result<(String, String)> {
    let (base, quote) = pair
        .split_once('/')
        .ok_or_else(|| eyre!("pair '{pair}' is not in BASE/QUOTE form"))?;
    if base.is_empty() || quote.is_empty() {
        bail!("pair '{pair}' has an empty base or quote");
    }
    Ok((base.to_lowercase(), quote.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_create_tables() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        let mut stmt = store
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("query should prepare");
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .expect("query_map should succeed")
            .collect::<rusqlite::Result<Vec<_>>>()
            .expect("all rows should parse");

        assert!(tables.contains(&"pools".to_string()));
        assert!(tables.contains(&"extraction_metrics".to_string()));
        assert!(tables.contains(&"price_8h_usd".to_string()));
        assert!(tables.contains(&"distributed_locks".to_string()));
    }

    #[test]
    fn validate_identifier_rejects_injection() {
        assert!(validate_identifier("arbitrum_uniswap_v3_arbusdc").is_ok());
        assert!(validate_identifier("arb; DROP TABLE pools;--").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn table_names_are_deterministic_and_lowercased() {
        let (klines, raw) = table_names("Arbitrum", "UniswapV3", "ARB", "USDC").unwrap();
        assert_eq!(klines, "arbitrum_uniswapv3_arbusdc_1m_klines");
        assert_eq!(raw, "arbitrum_uniswapv3_arbusdc_raw_swaps");
    }

    #[test]
    fn lock_acquire_release_roundtrip() {
        let store = Store::new(":memory:").unwrap();
        assert!(store.try_acquire_lock("global_ingest_lock", "worker-1", 300.0, 1000.0).unwrap());
        assert!(!store.try_acquire_lock("global_ingest_lock", "worker-2", 300.0, 1001.0).unwrap());
        store.release_lock("global_ingest_lock").unwrap();
        assert!(store.try_acquire_lock("global_ingest_lock", "worker-2", 300.0, 1002.0).unwrap());
    }

    #[test]
    fn lock_expires_after_ttl() {
        let store = Store::new(":memory:").unwrap();
        assert!(store.try_acquire_lock("global_ingest_lock", "worker-1", 300.0, 1000.0).unwrap());
        assert!(!store.try_acquire_lock("global_ingest_lock", "worker-2", 300.0, 1100.0).unwrap());
        assert!(store.try_acquire_lock("global_ingest_lock", "worker-2", 300.0, 1301.0).unwrap());
    }

    #[test]
    fn raw_swap_insert_is_idempotent() {
        let mut store = Store::new(":memory:").unwrap();
        let (klines, raw) = table_names("arb", "uniswap_v3", "arb", "usdc").unwrap();
        store.ensure_pool_tables(&klines, &raw).unwrap();

        let swap = sample_swap();
        let inserted_first = store.insert_raw_swaps(&raw, &[swap.clone()]).unwrap();
        let inserted_second = store.insert_raw_swaps(&raw, &[swap]).unwrap();
        assert_eq!(inserted_first, 1);
        assert_eq!(inserted_second, 0);
    }

    #[test]
    fn split_pair_extracts_base_and_quote() {
        let (base, quote) = split_pair("ARB/USDC").unwrap();
        assert_eq!(base, "arb");
        assert_eq!(quote, "usdc");
        assert!(split_pair("ARBUSDC").is_err());
    }

    fn sample_swap() -> SwapRecord {
        SwapRecord {
            block_number: 1,
            tx_hash: "0xabc".to_string(),
            log_index: 0,
            timestamp: 1_700_000_000,
            sender: "0xsender".to_string(),
            recipient: "0xrecipient".to_string(),
            caller: None,
            router_tag: None,
            base_delta: -100,
            quote_delta: 100,
            base_vol: 100,
            quote_vol: 100,
            price_scaled: 100_000_000,
            price_scale: 8,
            is_buy: true,
            liquidity: None,
            tick: None,
        }
    }
}
