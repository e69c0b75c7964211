use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use indicatif::{ProgressBar, ProgressStyle};
use ingest_data::store::table_names;
use ingest_data::types::{Chain, Dex, Pool};
use ingest_data::{block_index, ChainClient, Store};
use ingest_pipeline::scheduler::{per_pool_lock_name, SchedulerLock, SqliteSchedulerLock, GLOBAL_LOCK_NAME};
use ingest_pipeline::{run_pool_pipeline, Tunables};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct AppContext {
    db_path: String,
    arbitrum_rpc_url: Option<String>,
    base_rpc_url: Option<String>,
}

impl AppContext {
    fn rpc_url_for(&self, chain: Chain) -> Result<&str> {
        match chain {
            Chain::Arbitrum => self
                .arbitrum_rpc_url
                .as_deref()
                .ok_or_else(|| eyre!("ARBITRUM_RPC_URL is required for arbitrum pools")),
            Chain::Base => self
                .base_rpc_url
                .as_deref()
                .ok_or_else(|| eyre!("BASE_RPC_URL is required for base pools")),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ingest-cli")]
#[command(about = "DEX swap ingestion engine: run a single pool, run the scheduler, or inspect state")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[arg(long, global = true, default_value = "data/ingest.sqlite")]
    db_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one pool's ingestion pipeline on demand (§6 "run-pool").
    RunPool(RunPoolArgs),
    /// Run the periodic scheduler loop (§4.5.1).
    Schedule(ScheduleArgs),
    /// Show registered pools and per-pool table row counts.
    Status(StatusArgs),
    /// Inspect coverage and gaps for a single pool.
    Diagnose(DiagnoseArgs),
}

#[derive(Args, Debug)]
struct RunPoolArgs {
    #[arg(long)]
    chain: String,

    #[arg(long)]
    dex: String,

    /// Oriented base/quote label, e.g. "ARB/USDC".
    #[arg(long)]
    pair: String,

    #[arg(long)]
    address: String,

    #[arg(long, default_value_t = 1)]
    days_back: i64,

    /// Run the optional enrichment stage (§4.5.3).
    #[arg(long)]
    enrich: bool,
}

#[derive(Args, Debug)]
struct ScheduleArgs {
    #[arg(long, default_value_t = 1)]
    days_back: i64,

    #[arg(long)]
    enrich: bool,

    /// Stop after this many dispatch iterations; omit to run forever.
    #[arg(long)]
    iterations: Option<u64>,
}

#[derive(Args, Debug)]
struct StatusArgs {}

#[derive(Args, Debug)]
struct DiagnoseArgs {
    #[arg(long)]
    chain: String,

    #[arg(long)]
    dex: String,

    #[arg(long)]
    pair: String,

    #[arg(long, default_value_t = 1)]
    days_back: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    let ctx = AppContext {
        db_path: cli.db_path,
        arbitrum_rpc_url: std::env::var("ARBITRUM_RPC_URL").ok(),
        base_rpc_url: std::env::var("BASE_RPC_URL").ok(),
    };

    match cli.command {
        Commands::RunPool(args) => handle_run_pool(&ctx, args).await,
        Commands::Schedule(args) => handle_schedule(&ctx, args).await,
        Commands::Status(args) => handle_status(&ctx, args).await,
        Commands::Diagnose(args) => handle_diagnose(&ctx, args).await,
    }
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn format_epoch_secs(ts: f64) -> String {
    DateTime::<Utc>::from_timestamp(ts as i64, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| format!("{ts:.0}"))
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_secs_f64()
}

async fn handle_run_pool(ctx: &AppContext, args: RunPoolArgs) -> Result<()> {
    let chain = Chain::parse(&args.chain)?;
    let dex = Dex::parse(&args.dex)?;

    let rpc_url = ctx.rpc_url_for(chain)?;
    let client = ChainClient::connect(rpc_url).await.wrap_err("failed to connect to RPC endpoint")?;
    let store = Arc::new(Mutex::new(Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?));
    let tunables = Tunables::from_env()?;

    let lock = SqliteSchedulerLock::new(store.clone());
    let lock_name = per_pool_lock_name(&args.address);
    if !lock.try_acquire(&lock_name, "ingest-cli run-pool", tunables.per_pool_lock_ttl_secs).await? {
        return Err(eyre!("pool {} is already being ingested (per-pool lock held)", args.address));
    }

    let pool = Pool {
        id: 0,
        chain: chain.as_str().to_string(),
        dex: dex.as_str().to_string(),
        pair: args.pair.clone(),
        address: args.address.clone(),
        active: true,
        last_started: None,
    };

    let token_cache = ingest_pipeline::metadata::TokenMetadataCache::new();
    let mut resolver = block_index::BlockTimestampResolver::new();
    let router_map = ingest_pipeline::enrichment::RouterMap::new();
    let limiter = ingest_pipeline::enrichment::rate_limiter(tunables.enrichment_rate_limit_per_sec);

    let result = run_pool_pipeline(
        &client,
        &store,
        &token_cache,
        &mut resolver,
        &tunables,
        &pool,
        args.days_back,
        args.enrich,
        &router_map,
        &limiter,
    )
    .await;

    lock.release(&lock_name).await?;
    result.wrap_err_with(|| format!("pipeline run failed for pool {}", args.address))?;

    info!(address = %args.address, "run-pool completed");
    Ok(())
}

async fn handle_schedule(ctx: &AppContext, args: ScheduleArgs) -> Result<()> {
    let store = Arc::new(Mutex::new(Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?));
    let tunables = Tunables::from_env()?;
    let lock = Arc::new(SqliteSchedulerLock::new(store.clone()));
    let router_map = ingest_pipeline::enrichment::RouterMap::new();
    let limiter = ingest_pipeline::enrichment::rate_limiter(tunables.enrichment_rate_limit_per_sec);

    let mut token_caches: std::collections::HashMap<Chain, ingest_pipeline::metadata::TokenMetadataCache> =
        std::collections::HashMap::new();
    let mut clients: std::collections::HashMap<Chain, ChainClient> = std::collections::HashMap::new();
    let mut resolvers: std::collections::HashMap<Chain, block_index::BlockTimestampResolver> =
        std::collections::HashMap::new();
    let mut tasks_since_recycle = 0u32;

    let mut iteration = 0u64;
    loop {
        if let Some(limit) = args.iterations {
            if iteration >= limit {
                break;
            }
        }
        iteration += 1;

        let holder = format!("ingest-cli-schedule-{}", std::process::id());
        if !lock.try_acquire(GLOBAL_LOCK_NAME, &holder, tunables.global_lock_ttl_secs).await? {
            info!("global scheduler lock held elsewhere, skipping this firing");
            tokio::time::sleep(tunables.scheduler_interval()).await;
            continue;
        }

        let pools = {
            let store = store.lock().expect("store mutex poisoned");
            store.active_pools_by_last_started()?
        };

        for pool in &pools {
            let chain = match Chain::parse(&pool.chain) {
                Ok(c) => c,
                Err(err) => {
                    tracing::warn!(error = %err, pool = %pool.address, "skipping pool with unparseable chain");
                    continue;
                }
            };

            if tasks_since_recycle >= tunables.worker_recycle_limit {
                tracing::info!("worker recycle limit reached, rebuilding RPC clients and token caches");
                clients.clear();
                token_caches.clear();
                tasks_since_recycle = 0;
            }

            let rpc_url = match ctx.rpc_url_for(chain) {
                Ok(url) => url.to_string(),
                Err(err) => {
                    tracing::warn!(error = %err, pool = %pool.address, "skipping pool, no RPC URL configured");
                    continue;
                }
            };

            if !clients.contains_key(&chain) {
                match ChainClient::connect(&rpc_url).await {
                    Ok(client) => {
                        clients.insert(chain, client);
                    }
                    Err(err) => {
                        tracing::error!(error = %err, chain = chain.as_str(), "failed to connect RPC client");
                        continue;
                    }
                }
            }
            let client = clients.get(&chain).expect("just inserted");
            let token_cache = token_caches.entry(chain).or_default();
            let resolver = resolvers.entry(chain).or_default();

            let pool_lock_name = per_pool_lock_name(&pool.address);
            if !lock.try_acquire(&pool_lock_name, &holder, tunables.per_pool_lock_ttl_secs).await? {
                tracing::info!(pool = %pool.address, "pool already has an in-flight pipeline, skipping");
                continue;
            }

            let result = run_pool_pipeline(
                client,
                &store,
                token_cache,
                resolver,
                &tunables,
                pool,
                args.days_back,
                args.enrich,
                &router_map,
                &limiter,
            )
            .await;

            lock.release(&pool_lock_name).await?;
            tasks_since_recycle += 1;

            if let Err(err) = result {
                tracing::error!(error = %err, pool = %pool.address, "pipeline run failed, continuing with next pool");
            }

            {
                let store = store.lock().expect("store mutex poisoned");
                store.update_pool_last_started(pool.id, now_secs())?;
            }

            tokio::time::sleep(tunables.stagger()).await;
        }

        lock.release(GLOBAL_LOCK_NAME).await?;
        tokio::time::sleep(tunables.scheduler_interval()).await;
    }

    Ok(())
}

async fn handle_status(ctx: &AppContext, _args: StatusArgs) -> Result<()> {
    let store = Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?;
    let pools = store.active_pools_by_last_started()?;

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Chain", "Dex", "Pair", "Address", "Last Started"]);

    for pool in &pools {
        let last_started = pool
            .last_started
            .map(format_epoch_secs)
            .unwrap_or_else(|| "never".to_string());
        table.add_row(vec![
            pool.chain.as_str(),
            pool.dex.as_str(),
            pool.pair.as_str(),
            pool.address.as_str(),
            last_started.as_str(),
        ]);
    }

    println!("{table}");
    info!(pool_count = pools.len(), "status command finished");
    Ok(())
}

async fn handle_diagnose(ctx: &AppContext, args: DiagnoseArgs) -> Result<()> {
    let chain = Chain::parse(&args.chain)?;
    let dex = Dex::parse(&args.dex)?;
    let (base, quote) = ingest_data::store::split_pair(&args.pair)?;
    let (klines_table, raw_table) = table_names(chain.as_str(), dex.as_str(), &base, &quote)?;

    let store = Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?;

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec!["Klines table", klines_table.as_str()]);
    table.add_row(vec!["Raw swaps table", raw_table.as_str()]);

    if !store.table_exists(&klines_table)? {
        table.add_row(vec!["Status", "not yet created (no ingest has run)"]);
        println!("{table}");
        return Ok(());
    }

    let minute_range = store.minute_ts_range(&klines_table)?;
    match minute_range {
        Some((min, max)) => {
            table.add_row(vec![
                "Minute range",
                &format!("{} .. {}", format_epoch_secs(min as f64), format_epoch_secs(max as f64)),
            ]);
        }
        None => {
            table.add_row(vec!["Minute range", "empty"]);
        }
    }
    table.add_row(vec!["Kline rows", &store.row_count(&klines_table)?.to_string()]);
    table.add_row(vec!["Raw swap rows", &store.row_count(&raw_table)?.to_string()]);

    let rpc_url = ctx.rpc_url_for(chain)?;
    let client = ChainClient::connect(rpc_url).await.wrap_err("failed to connect to RPC endpoint")?;
    let now_ts = now_secs() as i64;
    let gaps = block_index::compute_gaps(&client, minute_range, args.days_back, now_ts).await?;
    table.add_row(vec!["Pending gaps", &gaps.len().to_string()]);
    for (i, gap) in gaps.iter().enumerate() {
        table.add_row(vec![
            &format!("  gap {i}"),
            &format!("[{}, {}]", gap.from_block, gap.to_block),
        ]);
    }

    println!("{table}");
    Ok(())
}
