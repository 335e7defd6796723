//! Bounded lock-free single-producer/single-consumer ring.
//!
//! Capacity is a compile-time power of two; cursors increase forever and
//! the slot is the cursor masked by capacity minus one. Publication uses
//! release stores of the owner's cursor paired with acquire loads on the
//! other side; no sequentially consistent fences are needed.
//!
//! ```text
//! producer: read tail (acquire), write slot, store head+1 (release)
//! consumer: read head (acquire), take slot,  store tail+1 (release)
//! ```
//!
//! The ring is split into a [`Producer`] and a [`Consumer`] handle so the
//! one-thread-per-side discipline is enforced by ownership.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

struct RingBuf<T, const N: usize> {
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// The handles hand each slot to exactly one thread at a time; the cursor
// protocol is what makes that sound.
unsafe impl<T: Send, const N: usize> Send for RingBuf<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for RingBuf<T, N> {}

impl<T, const N: usize> RingBuf<T, N> {
    const MASK: usize = N - 1;

    #[inline]
    fn slot(&self, cursor: usize) -> *mut MaybeUninit<T> {
        self.slots[cursor & Self::MASK].get()
    }
}

impl<T, const N: usize> Drop for RingBuf<T, N> {
    fn drop(&mut self) {
        // Both handles are gone; drop whatever was pushed but never popped.
        let mut tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        while tail != head {
            unsafe { (*self.slot(tail)).assume_init_drop() };
            tail = tail.wrapping_add(1);
        }
    }
}

/// Create a ring of capacity `N` (power of two, at least 2) and return
/// its two endpoints.
pub fn channel<T: Send, const N: usize>() -> (Producer<T, N>, Consumer<T, N>) {
    const {
        assert!(N >= 2, "capacity must be at least 2");
        assert!(N.is_power_of_two(), "capacity must be a power of two");
    }

    let slots = (0..N)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let buf = Arc::new(RingBuf::<T, N> {
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
        slots,
    });

    (
        Producer {
            buf: Arc::clone(&buf),
        },
        Consumer { buf },
    )
}

/// Writing endpoint. One per ring; not clonable.
pub struct Producer<T, const N: usize> {
    buf: Arc<RingBuf<T, N>>,
}

/// Reading endpoint. One per ring; not clonable.
pub struct Consumer<T, const N: usize> {
    buf: Arc<RingBuf<T, N>>,
}

impl<T: Send, const N: usize> Producer<T, N> {
    /// Push a value, or hand it back when the ring is full.
    #[inline]
    pub fn try_push(&mut self, v: T) -> Result<(), T> {
        let head = self.buf.head.load(Ordering::Relaxed);
        let tail = self.buf.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) == N {
            return Err(v);
        }

        unsafe { (*self.buf.slot(head)).write(v) };
        self.buf.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Advisory: correct only while the consumer is quiescent.
    #[inline]
    pub fn is_full(&self) -> bool {
        let head = self.buf.head.load(Ordering::Relaxed);
        let tail = self.buf.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) == N
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T: Send, const N: usize> Consumer<T, N> {
    /// Pop the oldest value, or `None` when the ring is empty.
    #[inline]
    pub fn try_pop(&mut self) -> Option<T> {
        let tail = self.buf.tail.load(Ordering::Relaxed);
        let head = self.buf.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }

        let v = unsafe { (*self.buf.slot(tail)).assume_init_read() };
        self.buf.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(v)
    }

    /// Advisory: correct only while the producer is quiescent.
    #[inline]
    pub fn is_empty(&self) -> bool {
        let tail = self.buf.tail.load(Ordering::Relaxed);
        let head = self.buf.head.load(Ordering::Acquire);
        tail == head
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}
