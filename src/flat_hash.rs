//! Fixed-capacity open-addressing hash map for integral keys.
//!
//! Linear probing with tombstones. The table never grows: the book sizes
//! its maps once and a rehash-in-place pass compacts tombstones when churn
//! would otherwise degrade probing. Exceeding the fixed capacity is a
//! configuration bug and fails loudly.

use std::fmt;

/// Keys usable in [`FlatHashMap`]. The mix must avalanche small integers;
/// identity hashing produces pathological probe chains on dense ids.
pub trait FixedKey: Copy + Eq + Default {
    fn mix(self) -> u64;
}

impl FixedKey for u64 {
    #[inline]
    fn mix(self) -> u64 {
        // Murmur3 finalizer.
        let mut x = self;
        x ^= x >> 33;
        x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
        x ^= x >> 33;
        x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        x ^= x >> 33;
        x
    }
}

impl FixedKey for u32 {
    #[inline]
    fn mix(self) -> u64 {
        let mut x = self;
        x ^= x >> 16;
        x = x.wrapping_mul(0x7feb_352d);
        x ^= x >> 15;
        x = x.wrapping_mul(0x846c_a68b);
        x ^= x >> 16;
        x as u64
    }
}

impl FixedKey for i32 {
    #[inline]
    fn mix(self) -> u64 {
        (self as u32).mix()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
enum State {
    #[default]
    Empty = 0,
    Filled = 1,
    Tomb = 2,
}

#[derive(Clone, Default)]
struct Entry<K, V> {
    key: K,
    value: V,
    state: State,
}

/// Open-addressing map with a capacity fixed at construction.
///
/// Capacity is rounded up to a power of two (minimum 8). Erase leaves a
/// tombstone so probe chains stay intact; inserts reuse the earliest
/// tombstone on their probe path.
pub struct FlatHashMap<K, V> {
    table: Vec<Entry<K, V>>,
    scratch: Vec<Entry<K, V>>,
    mask: usize,
    size: usize,
    tombs: usize,
}

impl<K: FixedKey, V: Clone + Default> FlatHashMap<K, V> {
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = capacity.max(8).next_power_of_two();
        Self {
            table: vec![Entry::default(); cap],
            scratch: vec![Entry::default(); cap],
            mask: cap - 1,
            size: 0,
            tombs: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn tombs(&self) -> usize {
        self.tombs
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    fn find_index(&self, key: K) -> Option<usize> {
        let mut idx = (key.mix() as usize) & self.mask;
        loop {
            let e = &self.table[idx];
            match e.state {
                State::Empty => return None,
                State::Filled if e.key == key => return Some(idx),
                _ => idx = (idx + 1) & self.mask,
            }
        }
    }

    #[inline]
    pub fn contains(&self, key: K) -> bool {
        self.find_index(key).is_some()
    }

    #[inline]
    pub fn get(&self, key: K) -> Option<&V> {
        self.find_index(key).map(|i| &self.table[i].value)
    }

    #[inline]
    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        match self.find_index(key) {
            Some(i) => Some(&mut self.table[i].value),
            None => None,
        }
    }

    /// Insert a new key. Returns `false` without mutating when the key is
    /// already present.
    ///
    /// # Panics
    /// Panics when the fixed capacity is exhausted (live + tombstone load
    /// at or above 80% after compaction).
    pub fn insert(&mut self, key: K, value: V) -> bool {
        self.maybe_compact_for_tombs();
        if (self.size + self.tombs) * 10 >= self.capacity() * 8 {
            self.die_capacity();
        }

        let mut idx = (key.mix() as usize) & self.mask;
        let mut first_tomb: Option<usize> = None;

        loop {
            match self.table[idx].state {
                State::Empty => {
                    let ins = first_tomb.unwrap_or(idx);
                    let dst = &mut self.table[ins];
                    dst.key = key;
                    dst.value = value;
                    dst.state = State::Filled;
                    self.size += 1;
                    if first_tomb.is_some() {
                        self.tombs -= 1;
                    }
                    return true;
                }
                State::Tomb => {
                    if first_tomb.is_none() {
                        first_tomb = Some(idx);
                    }
                }
                State::Filled => {
                    if self.table[idx].key == key {
                        return false;
                    }
                }
            }
            idx = (idx + 1) & self.mask;
        }
    }

    /// Remove a key, leaving a tombstone. Returns `false` on a miss.
    pub fn erase(&mut self, key: K) -> bool {
        match self.find_index(key) {
            Some(idx) => {
                self.table[idx].state = State::Tomb;
                self.size -= 1;
                self.tombs += 1;
                true
            }
            None => false,
        }
    }

    /// Rehash at the same capacity when tombstones pile up. Triggers are
    /// count-based only, so behavior is deterministic.
    fn maybe_compact_for_tombs(&mut self) {
        if self.tombs == 0 {
            return;
        }
        let cap = self.capacity();
        if self.tombs > cap / 4 || (self.size + self.tombs) * 10 >= cap * 7 {
            self.rehash_same_capacity();
        }
    }

    fn rehash_same_capacity(&mut self) {
        for e in &mut self.scratch {
            e.state = State::Empty;
        }

        let mut new_size = 0;
        for i in 0..self.table.len() {
            if self.table[i].state != State::Filled {
                continue;
            }
            let key = self.table[i].key;
            let value = std::mem::take(&mut self.table[i].value);

            // Same capacity and no tombstones in scratch: an Empty slot
            // always exists.
            let mut idx = (key.mix() as usize) & self.mask;
            loop {
                if self.scratch[idx].state == State::Empty {
                    self.scratch[idx] = Entry {
                        key,
                        value,
                        state: State::Filled,
                    };
                    new_size += 1;
                    break;
                }
                idx = (idx + 1) & self.mask;
            }
        }

        std::mem::swap(&mut self.table, &mut self.scratch);
        self.size = new_size;
        self.tombs = 0;
    }

    #[cold]
    fn die_capacity(&self) -> ! {
        panic!(
            "FlatHashMap capacity exceeded (fixed-size): size={} tombs={} cap={} \
             (threshold 80%). Increase the capacity this map was built with.",
            self.size,
            self.tombs,
            self.capacity()
        );
    }
}

impl<K: FixedKey + fmt::Debug, V> fmt::Debug for FlatHashMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatHashMap")
            .field("size", &self.size)
            .field("tombs", &self.tombs)
            .field("capacity", &(self.mask + 1))
            .finish()
    }
}
