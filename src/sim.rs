//! Simulation driver: partitions symbols across worker threads and runs
//! the per-event loop against each thread's private order books.
//!
//! Workers share nothing but the event sink. Each owns its arena, books,
//! generator and sampler, so a run is reproducible from (seed, thread
//! count, symbol partition) alone when synthetic timestamps are used.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::arena::Arena;
use crate::book::{Order, OrderBook};
use crate::event::{Event, EventType, Side};
use crate::normal::NormalBoxMuller;
use crate::rng::Xoroshiro128Plus;
use crate::sink::{make_sink, NullSink, Sink, SinkError};
use crate::stream::StreamPublisher;

/// Tick grid used for every simulated book.
pub const DEFAULT_TICK_SIZE: f64 = 0.01;

/// Run configuration; the CLI is a thin projection of this.
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub total_events: u64,
    pub seed: u64,
    /// Empty means the default set (AAPL, MSFT, GOOG).
    pub symbols: Vec<String>,
    /// Arena budget per worker thread.
    pub arena_bytes: usize,
    /// Base price standard deviation as a fraction of the mid.
    pub sigma: f64,
    /// Sinusoidal volatility drift; 0.0 turns it off.
    pub drift_ampl: f64,
    pub drift_period: u64,
    /// Empty means the null sink.
    pub log_path: String,
    pub print_arena: bool,
    /// 0 means auto (symbol count capped by the machine).
    pub num_threads: u32,
    /// Monotonic-clock timestamps instead of synthetic deterministic ones.
    pub realtime_ts: bool,
    /// Empty means no stream publisher.
    pub stream_target: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            total_events: 100_000,
            seed: 42,
            symbols: Vec::new(),
            arena_bytes: 1 << 20,
            sigma: 0.001,
            drift_ampl: 0.0,
            drift_period: 10_000,
            log_path: String::new(),
            print_arena: false,
            num_threads: 1,
            realtime_ts: false,
            stream_target: String::new(),
        }
    }
}

pub fn default_symbols() -> Vec<String> {
    vec!["AAPL".to_string(), "MSFT".to_string(), "GOOG".to_string()]
}

/// Per-worker counters, aggregated on join.
#[derive(Clone, Debug, Default)]
pub struct ThreadStats {
    pub symbols: usize,
    pub adds: u64,
    pub cancels: u64,
    pub trades: u64,
    pub elapsed_ms: f64,
    pub arena_reserved_bytes: usize,
    pub arena_peak_bytes: usize,
}

/// Whole-run summary returned by [`Simulator::run`].
#[derive(Clone, Debug, Default)]
pub struct RunStats {
    pub threads: usize,
    pub total_events: u64,
    pub adds: u64,
    pub cancels: u64,
    pub trades: u64,
    pub elapsed_ms: f64,
    pub per_thread: Vec<ThreadStats>,
}

pub struct Simulator {
    cfg: SimConfig,
    sink: Arc<dyn Sink>,
    stream: Option<StreamPublisher>,
}

impl Simulator {
    /// Open the configured sink and stream target.
    pub fn new(cfg: SimConfig) -> Result<Self, SinkError> {
        let sink: Arc<dyn Sink> = Arc::from(make_sink(&cfg.log_path)?);
        let stream = if cfg.stream_target.is_empty() {
            None
        } else {
            Some(StreamPublisher::connect(&cfg.stream_target).map_err(SinkError::Io)?)
        };
        Ok(Self { cfg, sink, stream })
    }

    /// Run the configured number of events to completion and print the
    /// report. Consumes the stream publisher; a simulator runs once.
    pub fn run(&mut self) -> RunStats {
        let cfg = self.cfg.clone();
        let symbols = if cfg.symbols.is_empty() {
            default_symbols()
        } else {
            cfg.symbols.clone()
        };

        let hw = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let requested = if cfg.num_threads == 0 {
            symbols.len().min(hw)
        } else {
            cfg.num_threads as usize
        };
        let n_threads = requested.min(symbols.len()).min(hw).max(1);

        // Sinks that serialize internally may be shared; the rest must not
        // see concurrent writers.
        if n_threads > 1 && !self.sink.thread_safe() {
            warn!(
                threads = n_threads,
                "sink is single-threaded; event log disabled for this run"
            );
            self.sink = Arc::new(NullSink);
        }
        if n_threads > 1 && self.stream.is_some() {
            warn!("stream publisher is single-producer; disabled for multi-threaded run");
            if let Some(mut sp) = self.stream.take() {
                sp.close();
            }
        }

        let per_thread_syms = symbols.len().div_ceil(n_threads);
        let epoch = Instant::now();
        let t0 = Instant::now();

        let mut per_stats: Vec<ThreadStats> = Vec::with_capacity(n_threads);
        let mut stream = self.stream.take();
        let sink = Arc::clone(&self.sink);

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(n_threads);
            let mut start = 0usize;

            for t in 0..n_threads {
                let end = (start + per_thread_syms).min(symbols.len());
                let my_symbols: Vec<String> = symbols[start..end].to_vec();
                start = end;

                let base = cfg.total_events / n_threads as u64;
                let rem = cfg.total_events % n_threads as u64;
                let iters = base + if t == n_threads - 1 { rem } else { 0 };

                let cfg = cfg.clone();
                let sink = Arc::clone(&sink);
                let my_stream = if t == 0 { stream.take() } else { None };

                handles.push(scope.spawn(move || {
                    run_worker(t, my_symbols, iters, cfg, epoch, sink, my_stream)
                }));
            }

            for h in handles {
                per_stats.push(h.join().expect("simulator worker panicked"));
            }
        });

        self.sink.flush();

        let elapsed_ms = t0.elapsed().as_secs_f64() * 1e3;
        let stats = RunStats {
            threads: n_threads,
            total_events: cfg.total_events,
            adds: per_stats.iter().map(|s| s.adds).sum(),
            cancels: per_stats.iter().map(|s| s.cancels).sum(),
            trades: per_stats.iter().map(|s| s.trades).sum(),
            elapsed_ms,
            per_thread: per_stats,
        };

        self.print_report(&stats);
        stats
    }

    fn print_report(&self, stats: &RunStats) {
        println!("\nPer-Thread Summary");
        println!("-------------------------------");
        for (t, s) in stats.per_thread.iter().enumerate() {
            println!(
                "[Thread {t}] Symbols={} Adds={} Cancels={} Trades={} Time={:.3} ms",
                s.symbols, s.adds, s.cancels, s.trades, s.elapsed_ms
            );
        }

        let max_ms = stats
            .per_thread
            .iter()
            .map(|s| s.elapsed_ms)
            .fold(0.0f64, f64::max);
        let evps = if stats.elapsed_ms > 0.0 {
            stats.total_events as f64 * 1000.0 / stats.elapsed_ms
        } else {
            0.0
        };

        println!("-------------------------------");
        println!("Threads:       {}", stats.threads);
        println!("Total events:  {}", stats.total_events);
        println!("Adds:          {}", stats.adds);
        println!("Cancels:       {}", stats.cancels);
        println!("Trades:        {}", stats.trades);
        println!("Elapsed (max): {max_ms:.3} ms");
        println!("Throughput:    {} ev/s", evps as u64);

        if self.cfg.print_arena {
            println!("Arena usage (peak / reserved bytes):");
            for (t, s) in stats.per_thread.iter().enumerate() {
                println!(
                    "  thread {t}: {} / {}",
                    s.arena_peak_bytes, s.arena_reserved_bytes
                );
            }
        }
        println!("-------------------------------");
    }
}

fn bind_to_core(index: usize) {
    match core_affinity::get_core_ids() {
        Some(ids) if !ids.is_empty() => {
            let core = ids[index % ids.len()];
            if core_affinity::set_for_current(core) {
                info!(core = core.id, thread = index, "worker pinned");
            } else {
                warn!(thread = index, "thread pinning failed; continuing unpinned");
            }
        }
        _ => warn!(thread = index, "no core ids available; running unpinned"),
    }
}

#[inline]
fn make_ts(realtime: bool, epoch: Instant, t: usize, i: u64) -> u64 {
    if realtime {
        epoch.elapsed().as_nanos() as u64
    } else {
        // Deterministic and unique across threads.
        ((t as u64) << 48) | i
    }
}

#[inline]
fn effective_sigma(cfg: &SimConfig, i: u64) -> f64 {
    let mut sigma = cfg.sigma;
    if cfg.drift_ampl > 0.0 && cfg.drift_period > 0 {
        let phase = (i % cfg.drift_period) as f64 / cfg.drift_period as f64;
        sigma *= 1.0 + cfg.drift_ampl * (phase * std::f64::consts::TAU).sin();
    }
    sigma
}

fn run_worker(
    t: usize,
    symbols: Vec<String>,
    iters: u64,
    cfg: SimConfig,
    epoch: Instant,
    sink: Arc<dyn Sink>,
    mut stream: Option<StreamPublisher>,
) -> ThreadStats {
    let mut stats = ThreadStats {
        symbols: symbols.len(),
        ..ThreadStats::default()
    };
    if symbols.is_empty() {
        return stats;
    }

    bind_to_core(t);

    // Allocate after pinning so the pool faults in NUMA-local.
    let mut arena = Arena::with_bytes(cfg.arena_bytes);
    arena.warm_up();

    let mut books: Vec<OrderBook> = symbols
        .iter()
        .map(|s| OrderBook::new(s.clone(), DEFAULT_TICK_SIZE))
        .collect();
    let mut mid = vec![100.0f64; symbols.len()];
    // Live resting ids per symbol; may hold stale ids that are dropped
    // lazily when a cancel misses.
    let mut live: Vec<Vec<u64>> = vec![Vec::new(); symbols.len()];

    let mut rng = Xoroshiro128Plus::new(cfg.seed + t as u64);
    let mut normal = NormalBoxMuller::new();
    let mut local_id: u64 = 1;

    let t0 = Instant::now();

    for i in 0..iters {
        let si = rng.rand_index(symbols.len());
        let do_add = rng.rand_bool(0.5);

        if do_add || live[si].is_empty() {
            let side = if rng.rand_bool(0.5) {
                Side::Buy
            } else {
                Side::Sell
            };
            let sigma = effective_sigma(&cfg, i);
            let price = normal.sample(&mut rng, mid[si], mid[si] * sigma);
            let qty = rng.rand_int(1, 100);

            let id = ((t as u64) << 56) | local_id;
            local_id += 1;
            let ts = make_ts(cfg.realtime_ts, epoch, t, i);

            let o = Order {
                id,
                price,
                qty,
                side,
                ts_ns: ts,
            };
            let fill = books[si].add_order(&mut arena, &o);

            let e = if fill.qty > 0 {
                stats.trades += 1;
                Event {
                    ts_ns: ts,
                    kind: EventType::Trade,
                    symbol: symbols[si].clone(),
                    price: fill.price,
                    qty: fill.qty,
                    side,
                }
            } else {
                stats.adds += 1;
                Event {
                    ts_ns: ts,
                    kind: EventType::OrderAdd,
                    symbol: symbols[si].clone(),
                    price: o.price,
                    qty: o.qty,
                    side,
                }
            };
            emit(&sink, stream.as_mut(), &e);

            // Anything not fully filled rests and may be canceled later.
            if fill.qty < qty {
                live[si].push(id);
            }
        } else {
            let li = rng.rand_index(live[si].len());
            let victim = live[si].swap_remove(li);

            if books[si].cancel_order(&mut arena, victim) {
                stats.cancels += 1;
                let e = Event {
                    ts_ns: make_ts(cfg.realtime_ts, epoch, t, i),
                    kind: EventType::OrderCancel,
                    symbol: symbols[si].clone(),
                    price: 0.0,
                    qty: 0,
                    side: Side::Buy,
                };
                emit(&sink, stream.as_mut(), &e);
            }
        }

        // Re-center the next draw on the fresh quotes.
        let bb = books[si].best_bid();
        let ba = books[si].best_ask();
        mid[si] = match (bb, ba) {
            (Some(b), Some(a)) => (b + a) * 0.5,
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => mid[si],
        };
    }

    stats.elapsed_ms = t0.elapsed().as_secs_f64() * 1e3;
    stats.arena_reserved_bytes = arena.reserved_bytes();
    stats.arena_peak_bytes = arena.peak_bytes();

    if let Some(mut sp) = stream.take() {
        sp.close();
    }

    stats
}

#[inline]
fn emit(sink: &Arc<dyn Sink>, stream: Option<&mut StreamPublisher>, e: &Event) {
    sink.write(e);
    if let Some(sp) = stream {
        let _ = sp.write_event(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = SimConfig::default();
        assert_eq!(cfg.total_events, 100_000);
        assert_eq!(cfg.seed, 42);
        assert!(cfg.symbols.is_empty());
        assert_eq!(cfg.num_threads, 1);
        assert!(!cfg.realtime_ts);
    }

    #[test]
    fn test_single_thread_run_counts() {
        let cfg = SimConfig {
            total_events: 5_000,
            symbols: vec!["AAPL".to_string()],
            ..SimConfig::default()
        };
        let stats = Simulator::new(cfg).unwrap().run();

        assert_eq!(stats.threads, 1);
        assert_eq!(stats.per_thread.len(), 1);
        // Every event is an add, a trade, or a cancel attempt; failed
        // cancels are the only silent outcome.
        assert!(stats.adds + stats.trades + stats.cancels <= 5_000);
        assert!(stats.adds > 0);
        assert!(stats.trades > 0);
    }

    #[test]
    fn test_run_stats_reproducible() {
        let cfg = SimConfig {
            total_events: 3_000,
            symbols: vec!["AAPL".to_string(), "MSFT".to_string()],
            ..SimConfig::default()
        };
        let a = Simulator::new(cfg.clone()).unwrap().run();
        let b = Simulator::new(cfg).unwrap().run();

        assert_eq!(a.adds, b.adds);
        assert_eq!(a.cancels, b.cancels);
        assert_eq!(a.trades, b.trades);
    }

    #[test]
    fn test_threads_clamped_to_symbols() {
        let cfg = SimConfig {
            total_events: 1_000,
            symbols: vec!["AAPL".to_string()],
            num_threads: 8,
            ..SimConfig::default()
        };
        let stats = Simulator::new(cfg).unwrap().run();
        assert_eq!(stats.threads, 1);
    }

    #[test]
    fn test_multi_thread_event_split() {
        let cfg = SimConfig {
            total_events: 10_001,
            symbols: vec![
                "A".to_string(),
                "B".to_string(),
                "C".to_string(),
                "D".to_string(),
            ],
            num_threads: 2,
            ..SimConfig::default()
        };
        let stats = Simulator::new(cfg).unwrap().run();

        if stats.threads == 2 {
            // The remainder lands on the last thread.
            let emitted: u64 = stats.adds + stats.cancels + stats.trades;
            assert!(emitted <= 10_001);
            assert_eq!(stats.per_thread[0].symbols, 2);
            assert_eq!(stats.per_thread[1].symbols, 2);
        }
    }

    #[test]
    fn test_effective_sigma_drift() {
        let cfg = SimConfig {
            sigma: 0.01,
            drift_ampl: 0.5,
            drift_period: 100,
            ..SimConfig::default()
        };
        // Peak of the sine is at a quarter period.
        let peak = effective_sigma(&cfg, 25);
        assert!((peak - 0.015).abs() < 1e-12);
        // Drift off means flat sigma.
        let flat_cfg = SimConfig {
            drift_ampl: 0.0,
            ..cfg
        };
        assert_eq!(effective_sigma(&flat_cfg, 25), 0.01);
    }

    #[test]
    fn test_synthetic_timestamps() {
        let epoch = Instant::now();
        assert_eq!(make_ts(false, epoch, 0, 7), 7);
        assert_eq!(make_ts(false, epoch, 3, 7), (3u64 << 48) | 7);
    }
}
