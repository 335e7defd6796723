//! Limit order book with price-time priority matching.
//!
//! Prices are quantized onto a tick grid; each side keeps a fixed-capacity
//! tick-to-level map plus an unordered list of active ticks for best-quote
//! recovery. Levels are FIFO queues of arena nodes linked through the
//! nodes themselves, and emptied levels are recycled through a free list
//! rather than released.
//!
//! A book is owned by exactly one thread for its whole lifetime and
//! carries no synchronization.

use crate::arena::{Arena, NodeIndex, NULL_INDEX};
use crate::event::Side;
use crate::flat_hash::FlatHashMap;

/// Maximum distinct active ticks per side.
pub const LEVEL_CAP: usize = 2048;
/// Maximum live resting orders per book.
pub const INDEX_CAP: usize = 16384;

/// An incoming order, before quantization.
#[derive(Clone, Copy, Debug)]
pub struct Order {
    pub id: u64,
    pub price: f64,
    pub qty: i32,
    pub side: Side,
    pub ts_ns: u64,
}

/// Where a resting order lives; the cancel index maps id to this.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrderRef {
    pub side: Side,
    pub tick: i32,
}

/// Outcome of [`OrderBook::add_order`]: total quantity matched and the
/// price of the final fill (meaningful only when `qty > 0`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fill {
    pub qty: i32,
    pub price: f64,
}

/// One price point on one side: a FIFO queue of arena nodes.
#[derive(Clone, Copy, Debug)]
struct Level {
    tick: i32,
    head: NodeIndex,
    tail: NodeIndex,
    len: u32,
}

impl Level {
    const fn new(tick: i32) -> Self {
        Self {
            tick,
            head: NULL_INDEX,
            tail: NULL_INDEX,
            len: 0,
        }
    }

    /// Reused from the free list: same allocation, fresh identity.
    fn reset(&mut self, tick: i32) {
        debug_assert!(self.len == 0);
        self.tick = tick;
        self.head = NULL_INDEX;
        self.tail = NULL_INDEX;
    }
}

/// Two-sided tick-quantized limit order book for a single symbol.
pub struct OrderBook {
    bid_levels: FlatHashMap<i32, u32>,
    ask_levels: FlatHashMap<i32, u32>,
    index: FlatHashMap<u64, OrderRef>,

    bid_ticks: Vec<i32>,
    ask_ticks: Vec<i32>,

    levels: Vec<Level>,
    free_levels: Vec<u32>,

    best_bid_tick: Option<i32>,
    best_ask_tick: Option<i32>,

    symbol: String,
    tick_size: f64,
    inv_tick: f64,
}

impl OrderBook {
    /// # Panics
    /// Panics when `tick_size` is not strictly positive.
    pub fn new(symbol: impl Into<String>, tick_size: f64) -> Self {
        assert!(tick_size > 0.0, "tick_size must be positive");
        Self {
            bid_levels: FlatHashMap::with_capacity(LEVEL_CAP),
            ask_levels: FlatHashMap::with_capacity(LEVEL_CAP),
            index: FlatHashMap::with_capacity(INDEX_CAP),
            bid_ticks: Vec::with_capacity(512),
            ask_ticks: Vec::with_capacity(512),
            levels: Vec::with_capacity(256),
            free_levels: Vec::with_capacity(256),
            best_bid_tick: None,
            best_ask_tick: None,
            symbol: symbol.into(),
            tick_size,
            inv_tick: 1.0 / tick_size,
        }
    }

    #[inline]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[inline]
    pub fn tick_size(&self) -> f64 {
        self.tick_size
    }

    /// Number of live resting orders. Test and diagnostic hook.
    #[inline]
    pub fn index_size(&self) -> usize {
        self.index.len()
    }

    // Prices here are always positive; round to nearest with ties away
    // from zero, matching llround.
    #[inline]
    fn price_to_tick(&self, px: f64) -> i32 {
        (px * self.inv_tick).round() as i32
    }

    #[inline]
    fn tick_to_price(&self, tick: i32) -> f64 {
        tick as f64 * self.tick_size
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.best_bid_tick.map(|t| self.tick_to_price(t))
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.best_ask_tick.map(|t| self.tick_to_price(t))
    }

    #[inline]
    fn best_tick(&self, side: Side) -> Option<i32> {
        match side {
            Side::Buy => self.best_bid_tick,
            Side::Sell => self.best_ask_tick,
        }
    }

    #[inline]
    fn level_slot(&self, side: Side, tick: i32) -> Option<u32> {
        match side {
            Side::Buy => self.bid_levels.get(tick).copied(),
            Side::Sell => self.ask_levels.get(tick).copied(),
        }
    }

    fn add_active_tick(&mut self, side: Side, tick: i32) {
        match side {
            Side::Buy => {
                self.bid_ticks.push(tick);
                if self.best_bid_tick.map_or(true, |b| tick > b) {
                    self.best_bid_tick = Some(tick);
                }
            }
            Side::Sell => {
                self.ask_ticks.push(tick);
                if self.best_ask_tick.map_or(true, |b| tick < b) {
                    self.best_ask_tick = Some(tick);
                }
            }
        }
    }

    fn remove_active_tick(&mut self, side: Side, tick: i32) {
        let v = match side {
            Side::Buy => &mut self.bid_ticks,
            Side::Sell => &mut self.ask_ticks,
        };
        if let Some(pos) = v.iter().position(|&t| t == tick) {
            v.swap_remove(pos);
        }
    }

    /// Linear scan of the active ticks; O(distinct live ticks), which
    /// stays small under this workload.
    fn recompute_best(&mut self, side: Side) {
        match side {
            Side::Buy => self.best_bid_tick = self.bid_ticks.iter().copied().max(),
            Side::Sell => self.best_ask_tick = self.ask_ticks.iter().copied().min(),
        }
    }

    fn get_or_create_level(&mut self, side: Side, tick: i32) -> u32 {
        if let Some(slot) = self.level_slot(side, tick) {
            return slot;
        }

        let slot = match self.free_levels.pop() {
            Some(slot) => {
                self.levels[slot as usize].reset(tick);
                slot
            }
            None => {
                self.levels.push(Level::new(tick));
                (self.levels.len() - 1) as u32
            }
        };

        let inserted = match side {
            Side::Buy => self.bid_levels.insert(tick, slot),
            Side::Sell => self.ask_levels.insert(tick, slot),
        };
        assert!(inserted, "level map out of sync for tick {tick}");

        self.add_active_tick(side, tick);
        slot
    }

    fn remove_level_if_empty(&mut self, side: Side, tick: i32, slot: u32) {
        if self.levels[slot as usize].len != 0 {
            return;
        }

        match side {
            Side::Buy => {
                self.bid_levels.erase(tick);
            }
            Side::Sell => {
                self.ask_levels.erase(tick);
            }
        }

        self.remove_active_tick(side, tick);

        if self.best_tick(side) == Some(tick) {
            self.recompute_best(side);
        }

        // Keep the level for reuse.
        self.free_levels.push(slot);
    }

    fn push_back(&mut self, arena: &mut Arena, slot: u32, idx: NodeIndex) {
        let lvl = &mut self.levels[slot as usize];
        if lvl.tail == NULL_INDEX {
            debug_assert!(lvl.head == NULL_INDEX);
            lvl.head = idx;
            lvl.tail = idx;
            let node = arena.get_mut(idx);
            node.prev = NULL_INDEX;
            node.next = NULL_INDEX;
        } else {
            let tail = lvl.tail;
            arena.get_mut(tail).next = idx;
            let node = arena.get_mut(idx);
            node.prev = tail;
            node.next = NULL_INDEX;
            lvl.tail = idx;
        }
        lvl.len += 1;
    }

    /// Unlink and free the head node of a level.
    fn pop_front(&mut self, arena: &mut Arena, slot: u32) {
        let lvl = &mut self.levels[slot as usize];
        let head = lvl.head;
        debug_assert!(head != NULL_INDEX);

        let next = arena.get(head).next;
        if next == NULL_INDEX {
            lvl.head = NULL_INDEX;
            lvl.tail = NULL_INDEX;
        } else {
            lvl.head = next;
            arena.get_mut(next).prev = NULL_INDEX;
        }
        lvl.len -= 1;
        arena.free(head);
    }

    /// Unlink and free a node from anywhere in a level's queue.
    fn unlink(&mut self, arena: &mut Arena, slot: u32, idx: NodeIndex) {
        let (prev, next) = {
            let node = arena.get(idx);
            (node.prev, node.next)
        };
        let lvl = &mut self.levels[slot as usize];

        if prev == NULL_INDEX {
            debug_assert!(lvl.head == idx);
            lvl.head = next;
        } else {
            arena.get_mut(prev).next = next;
        }
        if next == NULL_INDEX {
            debug_assert!(lvl.tail == idx);
            lvl.tail = prev;
        } else {
            arena.get_mut(next).prev = prev;
        }

        lvl.len -= 1;
        arena.free(idx);
    }

    /// Submit an order: cross against the opposite side while the price
    /// allows, then rest any remainder at the order's tick.
    ///
    /// Returns the total matched quantity and the last fill price. The
    /// resting copy carries the snapped price `tick * tick_size`.
    ///
    /// # Panics
    /// Panics on precondition violations: non-positive quantity, an id
    /// already resting in this book, or an exhausted arena.
    pub fn add_order(&mut self, arena: &mut Arena, o: &Order) -> Fill {
        assert!(o.qty > 0, "order qty must be positive (id {})", o.id);

        let tick = self.price_to_tick(o.price);
        let snapped_px = self.tick_to_price(tick);
        let opp = o.side.opposite();

        let mut remaining = o.qty;
        let mut trade_price = 0.0;

        while remaining > 0 {
            let best = match self.best_tick(opp) {
                Some(t) => t,
                None => break,
            };
            let crosses = match o.side {
                Side::Buy => best <= tick,
                Side::Sell => best >= tick,
            };
            if !crosses {
                break;
            }

            let slot = match self.level_slot(opp, best) {
                Some(s) => s,
                None => {
                    // Best tick without a level would mean a stale cache;
                    // recompute and retry.
                    self.recompute_best(opp);
                    continue;
                }
            };

            // Consume the front of the FIFO queue at the best level.
            while remaining > 0 {
                let head = self.levels[slot as usize].head;
                if head == NULL_INDEX {
                    break;
                }
                let top = arena.get_mut(head);
                let traded = remaining.min(top.qty);
                remaining -= traded;
                top.qty -= traded;
                trade_price = top.price;

                if top.qty == 0 {
                    let top_id = top.id;
                    self.index.erase(top_id);
                    self.pop_front(arena, slot);
                }
            }

            self.remove_level_if_empty(opp, best, slot);
        }

        if remaining > 0 {
            let slot = self.get_or_create_level(o.side, tick);
            let idx = match arena.alloc() {
                Some(idx) => idx,
                None => panic!(
                    "arena exhausted at {} nodes while resting order {}; \
                     raise --arena-bytes above {}",
                    arena.capacity(),
                    o.id,
                    arena.reserved_bytes()
                ),
            };

            let node = arena.get_mut(idx);
            node.id = o.id;
            node.price = snapped_px;
            node.qty = remaining;
            node.side = o.side;
            node.ts_ns = o.ts_ns;

            self.push_back(arena, slot, idx);

            let fresh = self.index.insert(
                o.id,
                OrderRef {
                    side: o.side,
                    tick,
                },
            );
            assert!(fresh, "duplicate order id {} in book {}", o.id, self.symbol);
        }

        Fill {
            qty: o.qty - remaining,
            price: trade_price,
        }
    }

    /// Cancel a resting order by id.
    ///
    /// Unknown ids return `false`. A stale index entry (level gone, or id
    /// not found in the recorded level) is scrubbed and also reported as
    /// `false`.
    pub fn cancel_order(&mut self, arena: &mut Arena, order_id: u64) -> bool {
        let OrderRef { side, tick } = match self.index.get(order_id) {
            Some(r) => *r,
            None => return false,
        };

        let slot = match self.level_slot(side, tick) {
            Some(s) => s,
            None => {
                self.index.erase(order_id);
                return false;
            }
        };

        let mut cur = self.levels[slot as usize].head;
        while cur != NULL_INDEX {
            if arena.get(cur).id == order_id {
                self.unlink(arena, slot, cur);
                self.index.erase(order_id);
                self.remove_level_if_empty(side, tick, slot);
                return true;
            }
            cur = arena.get(cur).next;
        }

        self.index.erase(order_id);
        false
    }

    /// Total quantity and order count resting at `price` on `side`.
    /// Walks the queue; diagnostic and test use only.
    pub fn depth_at(&self, arena: &Arena, side: Side, price: f64) -> (i64, u32) {
        let tick = self.price_to_tick(price);
        let slot = match self.level_slot(side, tick) {
            Some(s) => s,
            None => return (0, 0),
        };
        let lvl = &self.levels[slot as usize];

        let mut qty = 0i64;
        let mut cur = lvl.head;
        while cur != NULL_INDEX {
            qty += arena.get(cur).qty as i64;
            cur = arena.get(cur).next;
        }
        (qty, lvl.len)
    }
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBook")
            .field("symbol", &self.symbol)
            .field("best_bid_tick", &self.best_bid_tick)
            .field("best_ask_tick", &self.best_ask_tick)
            .field("bid_levels", &self.bid_levels.len())
            .field("ask_levels", &self.ask_levels.len())
            .field("resting", &self.index.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: u64, price: f64, qty: i32, side: Side) -> Order {
        Order {
            id,
            price,
            qty,
            side,
            ts_ns: 0,
        }
    }

    fn setup() -> (Arena, OrderBook) {
        (Arena::new(1024), OrderBook::new("X", 1.0))
    }

    #[test]
    fn test_empty_book() {
        let (_, book) = setup();
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.index_size(), 0);
    }

    #[test]
    fn test_resting_add_updates_best() {
        let (mut arena, mut book) = setup();

        let fill = book.add_order(&mut arena, &order(1, 100.0, 10, Side::Buy));
        assert_eq!(fill.qty, 0);
        assert_eq!(book.best_bid(), Some(100.0));
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.index_size(), 1);

        book.add_order(&mut arena, &order(2, 101.0, 10, Side::Buy));
        assert_eq!(book.best_bid(), Some(101.0));

        book.add_order(&mut arena, &order(3, 105.0, 5, Side::Sell));
        book.add_order(&mut arena, &order(4, 104.0, 5, Side::Sell));
        assert_eq!(book.best_ask(), Some(104.0));
    }

    #[test]
    fn test_basic_match_and_cancel() {
        let (mut arena, mut book) = setup();

        // Resting ask id=1 price=101 qty=10.
        let f0 = book.add_order(&mut arena, &order(1, 101.0, 10, Side::Sell));
        assert_eq!(f0.qty, 0);
        assert_eq!(book.best_ask(), Some(101.0));

        // Incoming buy id=2 price=102 qty=6 trades at 101.
        let f1 = book.add_order(&mut arena, &order(2, 102.0, 6, Side::Buy));
        assert_eq!(f1.qty, 6);
        assert_eq!(f1.price, 101.0);

        // Ask remains with qty 4.
        assert_eq!(book.best_ask(), Some(101.0));
        assert_eq!(book.depth_at(&arena, Side::Sell, 101.0), (4, 1));

        // The fully filled buy never rested.
        assert!(!book.cancel_order(&mut arena, 2));
        assert!(book.cancel_order(&mut arena, 1));
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.index_size(), 0);
    }

    #[test]
    fn test_price_time_priority_same_level() {
        let (mut arena, mut book) = setup();

        book.add_order(&mut arena, &order(1, 100.0, 5, Side::Sell));
        book.add_order(&mut arena, &order(2, 100.0, 5, Side::Sell));
        assert_eq!(book.index_size(), 2);

        // Buy 6 at 100: fills id=1 fully, id=2 partially.
        let fill = book.add_order(&mut arena, &order(3, 100.0, 6, Side::Buy));
        assert_eq!(fill.qty, 6);
        assert_eq!(fill.price, 100.0);

        assert_eq!(book.index_size(), 1);
        assert!(!book.cancel_order(&mut arena, 1));
        assert!(book.cancel_order(&mut arena, 2));
        assert_eq!(book.index_size(), 0);
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn test_match_walks_price_levels() {
        let (mut arena, mut book) = setup();

        book.add_order(&mut arena, &order(1, 100.0, 5, Side::Sell));
        book.add_order(&mut arena, &order(2, 101.0, 5, Side::Sell));
        book.add_order(&mut arena, &order(3, 102.0, 5, Side::Sell));

        // Sweeps 100 and 101, then takes 2 from 102.
        let fill = book.add_order(&mut arena, &order(4, 102.0, 12, Side::Buy));
        assert_eq!(fill.qty, 12);
        assert_eq!(fill.price, 102.0);
        assert_eq!(book.best_ask(), Some(102.0));
        assert_eq!(book.depth_at(&arena, Side::Sell, 102.0), (3, 1));
        assert_eq!(book.best_bid(), None);
    }

    #[test]
    fn test_partial_fill_rests_remainder() {
        let (mut arena, mut book) = setup();

        book.add_order(&mut arena, &order(1, 100.0, 4, Side::Sell));
        let fill = book.add_order(&mut arena, &order(2, 100.0, 10, Side::Buy));
        assert_eq!(fill.qty, 4);

        // The taker's remainder rests on the bid side.
        assert_eq!(book.best_bid(), Some(100.0));
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.depth_at(&arena, Side::Buy, 100.0), (6, 1));
        assert!(book.cancel_order(&mut arena, 2));
    }

    #[test]
    fn test_never_crossed_after_match() {
        let (mut arena, mut book) = setup();

        book.add_order(&mut arena, &order(1, 100.0, 5, Side::Buy));
        book.add_order(&mut arena, &order(2, 103.0, 5, Side::Sell));
        book.add_order(&mut arena, &order(3, 101.0, 3, Side::Buy));
        book.add_order(&mut arena, &order(4, 102.0, 3, Side::Sell));

        if let (Some(bb), Some(ba)) = (book.best_bid(), book.best_ask()) {
            assert!(bb < ba, "crossed book: {bb} >= {ba}");
        }
    }

    #[test]
    fn test_price_snapping() {
        let mut arena = Arena::new(64);
        let mut book = OrderBook::new("X", 0.5);

        book.add_order(&mut arena, &order(1, 100.2, 1, Side::Buy));
        assert_eq!(book.best_bid(), Some(100.0));

        book.add_order(&mut arena, &order(2, 100.3, 1, Side::Buy));
        assert_eq!(book.best_bid(), Some(100.5));
    }

    #[test]
    fn test_best_recovery_after_cancel() {
        let (mut arena, mut book) = setup();

        book.add_order(&mut arena, &order(1, 102.0, 1, Side::Buy));
        book.add_order(&mut arena, &order(2, 100.0, 1, Side::Buy));
        book.add_order(&mut arena, &order(3, 101.0, 1, Side::Buy));

        assert_eq!(book.best_bid(), Some(102.0));
        assert!(book.cancel_order(&mut arena, 1));
        assert_eq!(book.best_bid(), Some(101.0));
        assert!(book.cancel_order(&mut arena, 3));
        assert_eq!(book.best_bid(), Some(100.0));
        assert!(book.cancel_order(&mut arena, 2));
        assert_eq!(book.best_bid(), None);
    }

    #[test]
    fn test_cancel_middle_of_queue() {
        let (mut arena, mut book) = setup();

        book.add_order(&mut arena, &order(1, 100.0, 1, Side::Sell));
        book.add_order(&mut arena, &order(2, 100.0, 2, Side::Sell));
        book.add_order(&mut arena, &order(3, 100.0, 4, Side::Sell));

        assert!(book.cancel_order(&mut arena, 2));
        assert_eq!(book.depth_at(&arena, Side::Sell, 100.0), (5, 2));

        // FIFO order of the survivors is preserved.
        let fill = book.add_order(&mut arena, &order(4, 100.0, 1, Side::Buy));
        assert_eq!(fill.qty, 1);
        assert_eq!(book.depth_at(&arena, Side::Sell, 100.0), (4, 1));
        assert!(book.cancel_order(&mut arena, 3));
        assert!(!book.cancel_order(&mut arena, 1));
    }

    #[test]
    fn test_cancel_unknown_id() {
        let (mut arena, mut book) = setup();
        assert!(!book.cancel_order(&mut arena, 999));
    }

    #[test]
    fn test_level_recycling() {
        let (mut arena, mut book) = setup();

        for round in 0..50u64 {
            let id = round + 1;
            book.add_order(&mut arena, &order(id, 100.0, 1, Side::Buy));
            assert!(book.cancel_order(&mut arena, id));
        }
        // Only one level allocation should ever have been needed.
        assert_eq!(book.levels.len(), 1);
        assert_eq!(book.free_levels.len(), 1);
        assert_eq!(arena.allocated(), 0);
    }

    #[test]
    fn test_arena_nodes_released_on_fill() {
        let (mut arena, mut book) = setup();

        book.add_order(&mut arena, &order(1, 100.0, 5, Side::Sell));
        assert_eq!(arena.allocated(), 1);
        book.add_order(&mut arena, &order(2, 100.0, 5, Side::Buy));
        assert_eq!(arena.allocated(), 0);
    }

    #[test]
    #[should_panic(expected = "qty must be positive")]
    fn test_zero_qty_is_fatal() {
        let (mut arena, mut book) = setup();
        book.add_order(&mut arena, &order(1, 100.0, 0, Side::Buy));
    }

    #[test]
    #[should_panic(expected = "duplicate order id")]
    fn test_duplicate_resting_id_is_fatal() {
        let (mut arena, mut book) = setup();
        book.add_order(&mut arena, &order(1, 100.0, 1, Side::Buy));
        book.add_order(&mut arena, &order(1, 99.0, 1, Side::Buy));
    }

    #[test]
    #[should_panic(expected = "tick_size must be positive")]
    fn test_zero_tick_size_is_fatal() {
        let _ = OrderBook::new("X", 0.0);
    }
}
