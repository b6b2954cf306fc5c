//! Lock-free single-producer/single-consumer message queue
//!
//! Carries fixed-size messages from the control context into the audio
//! callback. The queue is split into a `Producer` and a `Consumer` half;
//! neither half is `Clone`, so there is exactly one writer and one reader.
//!
//! Capacity must be a power of two so wraparound is a mask. One slot is kept
//! free to tell "full" from "empty": a queue of capacity N holds N - 1 items.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::QueueError;

struct Shared<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Advanced only by the producer
    write: AtomicUsize,
    /// Advanced only by the consumer
    read: AtomicUsize,
}

// Safety: a slot is written by the producer strictly before the release store
// of `write` that publishes it, and read by the consumer strictly after the
// acquire load that observes it. The consumer's release store of `read` hands
// the slot back the same way. With one producer and one consumer no slot is
// ever accessed from both sides at once.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    fn len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write.wrapping_sub(read) & self.mask
    }
}

/// Write half of the queue (control context)
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

/// Read half of the queue (audio callback)
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

/// Create a queue with `capacity` slots and split it into its two halves.
///
/// All allocation happens here; `push` and `pop` never allocate.
pub fn message_queue<T: Copy + Send>(
    capacity: usize,
) -> Result<(Producer<T>, Consumer<T>), QueueError> {
    if capacity < 2 || !capacity.is_power_of_two() {
        return Err(QueueError::InvalidCapacity(capacity));
    }

    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let shared = Arc::new(Shared {
        slots,
        mask: capacity - 1,
        write: AtomicUsize::new(0),
        read: AtomicUsize::new(0),
    });

    Ok((
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    ))
}

impl<T: Copy + Send> Producer<T> {
    /// Enqueue an item. Returns the item back if the queue is full.
    #[inline]
    pub fn push(&mut self, item: T) -> Result<(), T> {
        let shared = &*self.shared;
        let write = shared.write.load(Ordering::Relaxed);
        let read = shared.read.load(Ordering::Acquire);

        if (write.wrapping_add(1) & shared.mask) == (read & shared.mask) {
            return Err(item);
        }

        // Safety: the slot at `write` is not visible to the consumer until the
        // release store below.
        unsafe {
            (*shared.slots[write & shared.mask].get()).write(item);
        }
        shared.write.store(write.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Number of items currently queued
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slot count (one less than this can be queued at once)
    pub fn capacity(&self) -> usize {
        self.shared.mask + 1
    }
}

impl<T: Copy + Send> Consumer<T> {
    /// Dequeue the oldest item, or `None` if the queue is empty.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let read = shared.read.load(Ordering::Relaxed);
        let write = shared.write.load(Ordering::Acquire);

        if (read & shared.mask) == (write & shared.mask) {
            return None;
        }

        // Safety: the acquire load of `write` above made the producer's write
        // to this slot visible, and the producer will not reuse it until the
        // release store below.
        let item = unsafe { (*shared.slots[read & shared.mask].get()).assume_init_read() };
        shared.read.store(read.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Number of items currently queued
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct ParamMsg {
        id: u8,
        value: i32,
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        assert!(message_queue::<u32>(0).is_err());
        assert!(message_queue::<u32>(1).is_err());
        assert!(message_queue::<u32>(48).is_err());
        assert!(message_queue::<u32>(64).is_ok());
    }

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = message_queue::<ParamMsg>(16).unwrap();

        for i in 0..10u8 {
            assert!(tx.push(ParamMsg { id: i, value: i as i32 * -3 }).is_ok());
        }
        assert_eq!(rx.len(), 10);

        for i in 0..10u8 {
            assert_eq!(rx.pop(), Some(ParamMsg { id: i, value: i as i32 * -3 }));
        }
        assert_eq!(rx.pop(), None);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_full_queue_keeps_existing_entries() {
        let (mut tx, mut rx) = message_queue::<u32>(8).unwrap();

        for i in 0..7 {
            assert!(tx.push(i).is_ok());
        }
        // capacity - 1 items queued: the next push must fail
        assert_eq!(tx.push(99), Err(99));
        assert_eq!(tx.len(), 7);

        let drained: Vec<u32> = std::iter::from_fn(|| rx.pop()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_wraparound() {
        let (mut tx, mut rx) = message_queue::<u32>(4).unwrap();

        // Push/pop well past the slot count so the cursors wrap the mask many times
        for round in 0..100u32 {
            assert!(tx.push(round * 2).is_ok());
            assert!(tx.push(round * 2 + 1).is_ok());
            assert_eq!(rx.pop(), Some(round * 2));
            assert_eq!(rx.pop(), Some(round * 2 + 1));
            assert!(rx.pop().is_none());
        }
    }

    #[test]
    fn test_cross_thread_order() {
        let (mut tx, mut rx) = message_queue::<u32>(64).unwrap();
        const COUNT: u32 = 10_000;

        let writer = std::thread::spawn(move || {
            let mut next = 0;
            while next < COUNT {
                if tx.push(next).is_ok() {
                    next += 1;
                } else {
                    std::thread::yield_now();
                }
            }
        });

        let mut expected = 0;
        while expected < COUNT {
            if let Some(value) = rx.pop() {
                assert_eq!(value, expected);
                expected += 1;
            } else {
                std::thread::yield_now();
            }
        }

        writer.join().unwrap();
    }
}
