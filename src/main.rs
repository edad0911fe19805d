//! Reference executable: recovery, maintenance, and a simulated order flow
//! against one symbol's book.
//!
//! Exit codes: 0 on clean shutdown, 1 on startup or fatal error.
//! SIGINT/SIGTERM initiate graceful shutdown: the flow driver stops, the
//! maintenance scheduler joins, journals are flushed and unmapped.

use clap::{Parser, ValueEnum};
use matchbook::prelude::*;
use matchbook::BookUpdate;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Drive the book with internally generated order flow.
    Simulation,
    /// Trade against a live venue (requires an exchange connector).
    Live,
}

#[derive(Debug, Parser)]
#[command(name = "matchbook", version, about = "Limit order book engine")]
struct Cli {
    /// Trading symbol.
    #[arg(long, default_value = "BTC-USD")]
    symbol: String,

    /// Trading mode.
    #[arg(long, value_enum, default_value = "simulation")]
    mode: Mode,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Debug-level logging.
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match &cli.logfile {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    init_logging(&cli)?;

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    if cli.mode == Mode::Live {
        return Err("live mode requires an exchange connector; none is configured".into());
    }

    let manager = Arc::new(PersistenceManager::new(config.clone())?);

    // Human-readable startup summary on stderr, before the log stream.
    let status = manager.recover_state();
    let recovered = manager.books().len();
    eprintln!("recovery: {status:?} ({recovered} symbols recovered)");
    if status == RecoveryStatus::Failed {
        warn!("recovery reported failures; unaffected symbols continue");
    }

    let book = manager.open_book(&cli.symbol)?;
    info!(symbol = %cli.symbol, "book ready");

    // Fan updates out through a bounded queue: a slow stats consumer must
    // never block the matching thread.
    let updates: Arc<BoundedQueue<BookUpdate>> = Arc::new(BoundedQueue::new(4096));
    {
        let queue = Arc::clone(&updates);
        book.subscribe_updates(Arc::new(move |update: &BookUpdate| {
            queue.push_or_drop(update.clone());
        }));
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })?;
    }

    let scheduler = MaintenanceScheduler::start(
        Arc::clone(&manager),
        Duration::from_millis(config.maintenance_period_ms),
    );

    let driver = spawn_flow_driver(Arc::clone(&book), Arc::clone(&running));

    // Main loop: drain the update queue and print stats every five seconds.
    let mut last_stats = Instant::now();
    let mut last_sequence = 0u64;
    let mut drained = 0u64;
    while running.load(Ordering::SeqCst) {
        while let Some(update) = updates.pop() {
            drained += 1;
            last_sequence = last_sequence.max(update.sequence);
        }

        if last_stats.elapsed() >= Duration::from_secs(5) {
            info!(
                best_bid = book.best_bid_price(),
                best_ask = book.best_ask_price(),
                spread = book.spread(),
                mid = book.mid_price(),
                orders = book.order_count(),
                sequence = last_sequence,
                updates = drained,
                dropped = updates.dropped(),
                imbalance = book.book_imbalance(5),
                "book stats"
            );
            last_stats = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(25));
    }

    info!("shutting down");
    if let Err(e) = driver.join() {
        warn!("flow driver panicked: {e:?}");
    }
    scheduler.stop();
    manager.shutdown();
    Ok(())
}

/// Internal order flow for simulation mode: a random walk around a mid,
/// mixing passive adds, cancels, and small market sweeps.
fn spawn_flow_driver(book: Arc<OrderBook>, running: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        use rand::Rng;
        let mut rng = rand::rng();
        let symbol = book.symbol().to_string();
        let mut mid = 30_000.0f64;
        let mut resting: Vec<String> = Vec::new();

        // Seed a two-sided book.
        for i in 0..10 {
            let offset = (i + 1) as f64 * 0.5;
            for (side, price) in [(Side::Buy, mid - offset), (Side::Sell, mid + offset)] {
                let id = Uuid::new_v4().to_string();
                let order = Order::limit(
                    &id,
                    &symbol,
                    side,
                    price,
                    rng.random_range(0.1..2.0),
                    book.clock().now_nanos(),
                );
                if book.add_order(order) {
                    resting.push(id);
                }
            }
        }

        while running.load(Ordering::SeqCst) {
            mid += rng.random_range(-0.5..0.5);
            let roll: f64 = rng.random();

            if roll < 0.6 {
                let side = if rng.random_bool(0.5) {
                    Side::Buy
                } else {
                    Side::Sell
                };
                let offset = rng.random_range(0.1..5.0);
                let price = match side {
                    Side::Buy => mid - offset,
                    Side::Sell => mid + offset,
                };
                let id = Uuid::new_v4().to_string();
                let order = Order::limit(
                    &id,
                    &symbol,
                    side,
                    price,
                    rng.random_range(0.1..2.0),
                    book.clock().now_nanos(),
                );
                if book.add_order(order) {
                    resting.push(id);
                }
            } else if roll < 0.85 && !resting.is_empty() {
                let idx = rng.random_range(0..resting.len());
                let id = resting.swap_remove(idx);
                book.cancel_order(&id);
            } else {
                let side = if rng.random_bool(0.5) {
                    Side::Buy
                } else {
                    Side::Sell
                };
                book.execute_market_order(side, rng.random_range(0.1..1.0));
            }

            // Keep the cancel pool bounded.
            if resting.len() > 5_000 {
                resting.drain(..2_500);
            }

            std::thread::sleep(Duration::from_millis(rng.random_range(1..10)));
        }
    })
}
