// src/main.rs
use clap::Parser;
use monerominer::job::{EpochPreparer, JobRegistry};
use monerominer::stats::format_hashrate;
use monerominer::{
    init_logging, Cli, Config, MinerError, MinerStats, PoolClient, RxContext, StatsReporter,
    WorkerPool,
};
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Interval between periodic stats lines.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

/// Starts mining and blocks until shutdown.
///
/// # Flow
/// 1. Merge `config.json`, CLI flags and defaults; validate.
/// 2. Connect and log in to the pool; the login response's job builds
///    the first dataset before any worker starts.
/// 3. Spawn the job listener, the workers and the stats reporter.
/// 4. On shutdown (signal or fatal error) join everything in order:
///    workers, listener, reporter, socket, then the RandomX resources.
fn run(cli: Cli) -> Result<(), MinerError> {
    let mut config = Config::load(Path::new("config.json"))?;
    config.apply_cli(&cli);
    config.validate()?;

    init_logging(
        config.debug,
        config
            .logfile
            .then_some(Path::new(monerominer::config::DEFAULT_LOG_FILE)),
    );
    log::info!("MoneroMiner {} starting", env!("CARGO_PKG_VERSION"));
    config.log_summary();

    let stop = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(MinerStats::new(config.threads));
    let context = Arc::new(RxContext::new());
    let registry = Arc::new(JobRegistry::new());
    let pool = Arc::new(PoolClient::new(
        config.pool_config()?,
        Arc::clone(&registry),
        Arc::clone(&context) as Arc<dyn EpochPreparer>,
        Arc::clone(&stop),
    ));

    // The initial connect+login is unrecoverable: without a first job
    // there is nothing to mine. Reconnection logic takes over once the
    // listener runs.
    pool.connect_and_login()?;

    {
        let stop = Arc::clone(&stop);
        let registry = Arc::clone(&registry);
        ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            stop.store(true, Ordering::SeqCst);
            registry.shutdown();
        })
        .map_err(|e| MinerError::Config(format!("cannot install signal handler: {}", e)))?;
    }

    let listener = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.run())
    };

    let workers = WorkerPool::spawn(
        config.threads,
        Arc::clone(&context),
        Arc::clone(&registry),
        Arc::clone(&pool),
        Arc::clone(&stats),
        Arc::clone(&stop),
    );
    log::info!("started {} mining threads", config.threads);

    let reporter = StatsReporter::start(Arc::clone(&stats), STATS_INTERVAL);

    workers.join();

    // Workers are gone; release everything else in order.
    stop.store(true, Ordering::SeqCst);
    registry.shutdown();
    let _ = listener.join();
    reporter.stop();
    pool.close();

    let runtime = stats.runtime();
    log::info!(
        "shutting down after {}s: {} hashes ({}), shares {}/{} accepted/rejected",
        runtime.as_secs(),
        stats.total_hashes(),
        format_hashrate(stats.average_hashrate()),
        stats.accepted(),
        stats.rejected()
    );

    if pool.is_fatal() {
        return Err(MinerError::Init(
            "mining aborted by an unrecoverable error".into(),
        ));
    }
    Ok(())
}
