//! LMDB-backed event store: one named sub-database per symbol.
//!
//! Keys are the 8 native-endian bytes of `ts_ns`, values are the wire
//! encoding of the event. Writes are buffered and committed in
//! transactions of 10 000; a failed commit abandons that batch and the
//! sink keeps going. The store is not safe for concurrent writers, which
//! the driver enforces by refusing it on multi-threaded runs.

use std::sync::Mutex;

use heed::types::{Bytes, DecodeIgnore, Str};
use heed::{Database, Env, EnvOpenOptions};
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::event::Event;
use crate::sink::{Sink, SinkError};

/// Writes per transaction.
const TXN_BATCH: usize = 10_000;
/// LMDB map size: 1 GiB.
const MAP_SIZE: usize = 1 << 30;
/// Named sub-databases, one per symbol.
const MAX_DBS: u32 = 64;

fn open_env(path: &str) -> Result<Env, SinkError> {
    std::fs::create_dir_all(path)?;
    // Safety: nothing else in this process maps the same environment with
    // conflicting options.
    let env = unsafe {
        EnvOpenOptions::new()
            .map_size(MAP_SIZE)
            .max_dbs(MAX_DBS)
            .open(path)?
    };
    Ok(env)
}

struct KvState {
    dbs: FxHashMap<String, Database<Bytes, Bytes>>,
    pending: Vec<Event>,
}

/// Event sink over an LMDB environment.
pub struct KvSink {
    env: Env,
    state: Mutex<KvState>,
}

impl KvSink {
    pub fn open(path: &str) -> Result<Self, SinkError> {
        Ok(Self {
            env: open_env(path)?,
            state: Mutex::new(KvState {
                dbs: FxHashMap::default(),
                pending: Vec::with_capacity(TXN_BATCH),
            }),
        })
    }

    fn commit_pending(&self, st: &mut KvState) {
        if st.pending.is_empty() {
            return;
        }
        if let Err(err) = self.try_commit(st) {
            warn!(%err, dropped = st.pending.len(), "KV transaction failed; batch abandoned");
            st.pending.clear();
        }
    }

    fn try_commit(&self, st: &mut KvState) -> Result<(), heed::Error> {
        let KvState { dbs, pending } = st;

        let mut wtxn = self.env.write_txn()?;
        for e in pending.iter() {
            let db = match dbs.get(&e.symbol) {
                Some(db) => *db,
                None => {
                    let db = self
                        .env
                        .create_database::<Bytes, Bytes>(&mut wtxn, Some(&e.symbol))?;
                    dbs.insert(e.symbol.clone(), db);
                    db
                }
            };
            db.put(&mut wtxn, &e.ts_ns.to_ne_bytes(), &e.serialize())?;
        }
        wtxn.commit()?;

        pending.clear();
        Ok(())
    }
}

impl Sink for KvSink {
    fn write(&self, e: &Event) {
        let mut st = self.state.lock().unwrap();
        st.pending.push(e.clone());
        if st.pending.len() >= TXN_BATCH {
            self.commit_pending(&mut st);
        }
    }

    fn flush(&self) {
        self.commit_pending(&mut self.state.lock().unwrap());
    }
}

/// Read side of the store, used by dump mode.
pub struct KvReader {
    env: Env,
}

impl KvReader {
    pub fn open(path: &str) -> Result<Self, SinkError> {
        Ok(Self {
            env: open_env(path)?,
        })
    }

    /// Names of the per-symbol sub-databases, read from the unnamed
    /// main database.
    pub fn list_symbols(&self) -> Result<Vec<String>, SinkError> {
        let rtxn = self.env.read_txn()?;
        let main: Option<Database<Str, DecodeIgnore>> = self.env.open_database(&rtxn, None)?;

        let mut names = Vec::new();
        if let Some(main) = main {
            for item in main.iter(&rtxn)? {
                let (name, ()) = item?;
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// All events stored for `symbol`, in key order. Records that fail to
    /// decode are skipped.
    pub fn read_all(&self, symbol: &str) -> Result<Vec<Event>, SinkError> {
        let rtxn = self.env.read_txn()?;
        let db: Option<Database<Bytes, Bytes>> = self.env.open_database(&rtxn, Some(symbol))?;

        let mut out = Vec::new();
        if let Some(db) = db {
            for item in db.iter(&rtxn)? {
                let (_key, value) = item?;
                if let Some((e, _)) = Event::deserialize(value) {
                    out.push(e);
                }
            }
        }
        Ok(out)
    }
}
