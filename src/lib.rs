//! # market-sim
//!
//! A deterministic, multi-threaded synthetic equity-market simulator.
//!
//! ## Design Principles
//!
//! - **Partition by symbol**: each order book is owned by exactly one
//!   thread for its whole lifetime (no locks in the matching path)
//! - **Arena discipline**: resting orders live in a fixed 64-byte-node
//!   pool addressed by 32-bit handles; levels are recycled, never freed
//! - **Reproducibility**: a named generator (SplitMix64 seeding
//!   Xoroshiro128+) makes runs bit-identical for a given seed, thread
//!   count and symbol set
//!
//! ## Architecture
//!
//! ```text
//! [Worker Thread (pinned)] --> OrderBook --> Event --> Sink
//!          |                                   |
//!          +--> [SPSC Ring] --> [Publisher Thread] --> transport
//! ```

pub mod arena;
pub mod book;
pub mod event;
pub mod flat_hash;
pub mod kv;
pub mod normal;
pub mod rng;
pub mod sim;
pub mod sink;
pub mod spsc;
pub mod stream;

// Re-exports for convenience
pub use arena::{Arena, NodeIndex, OrderNode, NULL_INDEX};
pub use book::{Fill, Order, OrderBook, OrderRef, INDEX_CAP, LEVEL_CAP};
pub use event::{Event, EventType, Side};
pub use flat_hash::{FixedKey, FlatHashMap};
pub use kv::{KvReader, KvSink};
pub use normal::NormalBoxMuller;
pub use rng::{SplitMix64, Xoroshiro128Plus};
pub use sim::{default_symbols, RunStats, SimConfig, Simulator, ThreadStats};
pub use sink::{make_sink, BinaryLogSink, NullSink, Sink, SinkError};
pub use spsc::{channel, Consumer, Producer};
pub use stream::{StreamPublisher, StreamTransport, TcpTransport};
