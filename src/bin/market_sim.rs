//! Command-line front end for the simulator.
//!
//! Runs the event generator by default; `--read` switches to dump mode,
//! which lists the symbols stored in a key-value log and prints the first
//! N events of each.

use anyhow::{Context, Result};
use clap::Parser;

use market_sim::{KvReader, SimConfig, Simulator};

#[derive(Parser, Debug)]
#[command(name = "market-sim", about = "Synthetic limit-order-book market simulator")]
struct Cli {
    /// Total events to generate
    #[arg(long, default_value_t = 100_000)]
    events: u64,

    /// Comma-separated symbol list (default AAPL,MSFT,GOOG)
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,

    /// RNG seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Arena budget per worker thread, in bytes
    #[arg(long = "arena-bytes", default_value_t = 1 << 20)]
    arena_bytes: usize,

    /// Gaussian sigma as a fraction of the mid
    #[arg(long, default_value_t = 0.001)]
    sigma: f64,

    /// Volatility drift amplitude (0 = off)
    #[arg(long = "drift-ampl", default_value_t = 0.0)]
    drift_ampl: f64,

    /// Drift period in events
    #[arg(long = "drift-period", default_value_t = 10_000)]
    drift_period: u64,

    /// Event log path (.mdb selects the key-value store)
    #[arg(long, default_value = "")]
    log: String,

    /// Print per-thread arena usage after the run
    #[arg(long = "print-arena")]
    print_arena: bool,

    /// Events to print per symbol in dump mode
    #[arg(long, default_value_t = 10)]
    dump: usize,

    /// Dump a key-value store instead of simulating
    #[arg(long)]
    read: Option<String>,

    /// Worker threads (0 = one per symbol, capped by the machine)
    #[arg(long, default_value_t = 1)]
    threads: u32,

    /// Disable the event log even when --log is given
    #[arg(long = "no-log")]
    no_log: bool,

    /// Use monotonic-clock timestamps instead of deterministic ones
    #[arg(long = "realtime-ts")]
    realtime_ts: bool,

    /// Stream events to host:port in batches
    #[arg(long, default_value = "")]
    stream: String,
}

fn dump_store(path: &str, per_symbol: usize) -> Result<()> {
    let reader = KvReader::open(path).with_context(|| format!("open store {path}"))?;
    let symbols = reader.list_symbols().context("list symbols")?;

    println!("Store {path}: {} symbol(s)", symbols.len());
    for sym in &symbols {
        let events = reader.read_all(sym).with_context(|| format!("read {sym}"))?;
        println!("{sym}: {} event(s)", events.len());
        for e in events.iter().take(per_symbol) {
            println!("  {e}");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(path) = &cli.read {
        return dump_store(path, cli.dump);
    }

    let cfg = SimConfig {
        total_events: cli.events,
        seed: cli.seed,
        symbols: cli.symbols,
        arena_bytes: cli.arena_bytes,
        sigma: cli.sigma,
        drift_ampl: cli.drift_ampl,
        drift_period: cli.drift_period,
        log_path: if cli.no_log { String::new() } else { cli.log },
        print_arena: cli.print_arena,
        num_threads: cli.threads,
        realtime_ts: cli.realtime_ts,
        stream_target: cli.stream,
    };

    let mut sim = Simulator::new(cfg).context("simulator initialization failed")?;
    sim.run();
    Ok(())
}
