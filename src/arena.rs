//! Arena - preallocated order-node pool with O(1) alloc and free.
//!
//! Every resting order lives in a node drawn from a per-thread arena that
//! is sized once at startup. Nodes are addressed by 32-bit handles instead
//! of pointers, and a free list threaded through the `next` field recycles
//! slots without touching the system allocator.

use std::fmt;

use crate::event::Side;

/// Sentinel handle representing no node.
pub const NULL_INDEX: u32 = u32::MAX;

/// Arena handle type, a "compressed pointer" into the node pool.
pub type NodeIndex = u32;

/// A resting order - exactly 64 bytes (one cache line).
///
/// Carries the FIFO linkage for its price level: `next` points toward the
/// tail (younger orders), `prev` toward the head.
#[repr(C)]
#[repr(align(64))]
#[derive(Clone, Copy)]
pub struct OrderNode {
    /// Resting price, snapped to the book's tick grid.
    pub price: f64,
    /// Order id, unique among live resting orders.
    pub id: u64,
    /// Timestamp assigned at submission.
    pub ts_ns: u64,
    /// Remaining quantity, always > 0 while resting.
    pub qty: i32,
    /// Next order at the same price level (toward the tail).
    pub next: NodeIndex,
    /// Previous order at the same price level (toward the head).
    pub prev: NodeIndex,
    pub side: Side,
    pub _reserved: [u8; 27],
}

const _: () = assert!(
    std::mem::size_of::<OrderNode>() == 64,
    "OrderNode must be exactly 64 bytes (one cache line)"
);

const _: () = assert!(
    std::mem::align_of::<OrderNode>() == 64,
    "OrderNode must be 64-byte aligned"
);

impl OrderNode {
    #[inline]
    pub const fn empty() -> Self {
        Self {
            price: 0.0,
            id: 0,
            ts_ns: 0,
            qty: 0,
            next: NULL_INDEX,
            prev: NULL_INDEX,
            side: Side::Buy,
            _reserved: [0u8; 27],
        }
    }

    /// Reset the node for reuse when it returns to the free list.
    #[inline]
    pub fn reset(&mut self) {
        self.price = 0.0;
        self.id = 0;
        self.ts_ns = 0;
        self.qty = 0;
        self.next = NULL_INDEX;
        self.prev = NULL_INDEX;
        self.side = Side::Buy;
    }
}

impl fmt::Debug for OrderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderNode")
            .field("id", &self.id)
            .field("price", &self.price)
            .field("qty", &self.qty)
            .field("side", &self.side)
            .field("ts_ns", &self.ts_ns)
            .field("prev", &self.prev)
            .field("next", &self.next)
            .finish()
    }
}

/// Node pool with O(1) allocation and deallocation.
///
/// The free list is threaded through the `next` field of unused nodes.
/// No system calls or locks after construction. Single-threaded; each
/// simulation thread owns exactly one arena shared by its books.
pub struct Arena {
    nodes: Vec<OrderNode>,
    free_head: NodeIndex,
    allocated_count: u32,
    peak_count: u32,
    capacity: u32,
}

impl Arena {
    /// Create an arena holding `capacity` nodes.
    ///
    /// # Panics
    /// Panics if capacity reaches `NULL_INDEX` (reserved sentinel).
    pub fn new(capacity: u32) -> Self {
        assert!(capacity < NULL_INDEX, "capacity must be below NULL_INDEX");

        let mut nodes = vec![OrderNode::empty(); capacity as usize];

        // Thread the free list through all nodes.
        for i in 0..capacity.saturating_sub(1) {
            nodes[i as usize].next = i + 1;
        }
        if capacity > 0 {
            nodes[(capacity - 1) as usize].next = NULL_INDEX;
        }

        Self {
            nodes,
            free_head: if capacity > 0 { 0 } else { NULL_INDEX },
            allocated_count: 0,
            peak_count: 0,
            capacity,
        }
    }

    /// Size the arena from a byte budget (the `--arena-bytes` knob).
    /// At least 64 nodes are always provisioned.
    pub fn with_bytes(bytes: usize) -> Self {
        let nodes = (bytes / std::mem::size_of::<OrderNode>()).max(64);
        Self::new(nodes.min((NULL_INDEX - 1) as usize) as u32)
    }

    /// Allocate a node. Returns `None` when the arena is exhausted.
    #[inline]
    pub fn alloc(&mut self) -> Option<NodeIndex> {
        if self.free_head == NULL_INDEX {
            return None;
        }

        let index = self.free_head;
        self.free_head = self.nodes[index as usize].next;
        self.allocated_count += 1;
        self.peak_count = self.peak_count.max(self.allocated_count);

        self.nodes[index as usize].next = NULL_INDEX;
        self.nodes[index as usize].prev = NULL_INDEX;

        Some(index)
    }

    /// Return a node to the free list.
    ///
    /// The index must have been allocated and not yet freed; there is no
    /// double-free protection beyond debug assertions.
    #[inline]
    pub fn free(&mut self, index: NodeIndex) {
        debug_assert!(index < self.capacity, "index out of bounds");
        debug_assert!(self.allocated_count > 0, "double free detected");

        self.nodes[index as usize].reset();
        self.nodes[index as usize].next = self.free_head;
        self.free_head = index;
        self.allocated_count -= 1;
    }

    #[inline]
    pub fn get(&self, index: NodeIndex) -> &OrderNode {
        debug_assert!(index < self.capacity, "index out of bounds");
        &self.nodes[index as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, index: NodeIndex) -> &mut OrderNode {
        debug_assert!(index < self.capacity, "index out of bounds");
        &mut self.nodes[index as usize]
    }

    #[inline]
    pub fn allocated(&self) -> u32 {
        self.allocated_count
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_head == NULL_INDEX
    }

    /// Bytes reserved for the pool at construction.
    #[inline]
    pub fn reserved_bytes(&self) -> usize {
        self.capacity as usize * std::mem::size_of::<OrderNode>()
    }

    /// High-water mark of bytes ever simultaneously allocated. Diagnostic
    /// only; surfaced by `--print-arena`.
    #[inline]
    pub fn peak_bytes(&self) -> usize {
        self.peak_count as usize * std::mem::size_of::<OrderNode>()
    }

    /// Pre-fault all pages backing the pool.
    ///
    /// Run after the owning thread is pinned so pages land on the local
    /// NUMA node and the hot path never takes a fault.
    pub fn warm_up(&mut self) {
        for node in &mut self.nodes {
            unsafe {
                std::ptr::write_volatile(&mut node._reserved[0], 0);
            }
        }
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity)
            .field("allocated", &self.allocated_count)
            .field("peak", &self.peak_count)
            .field("free_head", &self.free_head)
            .finish()
    }
}
