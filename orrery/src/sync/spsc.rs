//! Bounded lock-free SPSC queue for worker → control-thread traffic.
//!
//! The job worker owns the [`Producer`]; the control thread owns the
//! [`Consumer`] and drains it from its own loop. Neither side ever blocks:
//! a full queue hands the item back to the producer, an empty queue yields
//! `None`.
//!
//! ```
//! use orrery::sync::spsc;
//!
//! let (tx, rx) = spsc::channel::<u32, 4>();
//! tx.push(7).unwrap();
//! assert_eq!(rx.pop(), Some(7));
//! assert_eq!(rx.pop(), None);
//! ```

use std::cell::{Cell, UnsafeCell};
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Index padded to its own cache line so head and tail never false-share.
#[repr(align(64))]
struct PaddedIndex(AtomicUsize);

/// Shared ring state.
///
/// `head` is written only by the producer, `tail` only by the consumer. A slot
/// at `i % N` is owned by the producer while `head - tail < N` says it is free,
/// and by the consumer once `head` has been published past it.
struct Ring<T, const N: usize> {
    head: PaddedIndex,
    tail: PaddedIndex,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

impl<T, const N: usize> Ring<T, N> {
    fn new() -> Self {
        Self {
            head: PaddedIndex(AtomicUsize::new(0)),
            tail: PaddedIndex(AtomicUsize::new(0)),
            slots: (0..N)
                .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
                .collect(),
        }
    }
}

impl<T, const N: usize> Drop for Ring<T, N> {
    fn drop(&mut self) {
        let head = *self.head.0.get_mut();
        let mut tail = *self.tail.0.get_mut();
        while tail != head {
            // SAFETY: every slot in [tail, head) was written by the producer and
            // not yet read by the consumer; we have exclusive access in drop.
            unsafe { self.slots[tail % N].get_mut().assume_init_drop() };
            tail = tail.wrapping_add(1);
        }
    }
}

// SAFETY: slot access is partitioned between the two roles by the head/tail
// protocol above, with Release stores paired with Acquire loads.
unsafe impl<T: Send, const N: usize> Send for Ring<T, N> {}
// SAFETY: see above.
unsafe impl<T: Send, const N: usize> Sync for Ring<T, N> {}

/// Write end. `Send` but not `Sync`: exactly one thread pushes.
pub struct Producer<T: Send, const N: usize> {
    ring: Arc<Ring<T, N>>,
    cached_tail: Cell<usize>,
}

/// Read end. `Send` but not `Sync`: exactly one thread pops.
pub struct Consumer<T: Send, const N: usize> {
    ring: Arc<Ring<T, N>>,
    cached_head: Cell<usize>,
}

struct CapacityCheck<const N: usize>;

impl<const N: usize> CapacityCheck<N> {
    const OK: () = assert!(N > 0, "queue capacity must be greater than 0");
}

/// Creates a queue holding at most `N` items.
///
/// Fails to compile if `N == 0`.
#[must_use]
pub fn channel<T: Send, const N: usize>() -> (Producer<T, N>, Consumer<T, N>) {
    let () = CapacityCheck::<N>::OK;

    let ring = Arc::new(Ring::new());
    (
        Producer {
            ring: Arc::clone(&ring),
            cached_tail: Cell::new(0),
        },
        Consumer {
            ring,
            cached_head: Cell::new(0),
        },
    )
}

impl<T: Send, const N: usize> Producer<T, N> {
    /// Pushes without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        let head = self.ring.head.0.load(Ordering::Relaxed);

        if head.wrapping_sub(self.cached_tail.get()) >= N {
            self.cached_tail
                .set(self.ring.tail.0.load(Ordering::Acquire));
            if head.wrapping_sub(self.cached_tail.get()) >= N {
                return Err(item);
            }
        }

        // SAFETY: head - tail < N, so the consumer is not reading this slot and
        // will not until the Release store below publishes it.
        unsafe { (*self.ring.slots[head % N].get()).write(item) };

        self.ring
            .head
            .0
            .store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }
}

impl<T: Send, const N: usize> Consumer<T, N> {
    /// Pops without waiting. `None` when empty.
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        let tail = self.ring.tail.0.load(Ordering::Relaxed);

        if self.cached_head.get() == tail {
            self.cached_head
                .set(self.ring.head.0.load(Ordering::Acquire));
            if self.cached_head.get() == tail {
                return None;
            }
        }

        // SAFETY: tail != head, so the producer has published this slot and
        // will not touch it again until the Release store below frees it.
        let item = unsafe { (*self.ring.slots[tail % N].get()).assume_init_read() };

        self.ring
            .tail
            .0
            .store(tail.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Iterator that pops until the queue is empty.
    pub fn drain(&self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(|| self.pop())
    }
}
