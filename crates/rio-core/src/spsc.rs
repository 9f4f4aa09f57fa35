//! Fixed-capacity SPSC ring used as a worker's ready-queue.
//!
//! Capacity is a power of two; the head/tail cursors are plain `u64`s that
//! never wrap back to zero (only the index derived via `& (capacity - 1)`
//! does), so `wrapping_sub` between them is always the true occupancy even
//! after billions of operations.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU64, Ordering};

/// Single-producer/single-consumer ring buffer of `T: Copy`.
///
/// One thread (the owning worker) is the only consumer; pushes can come
/// either from that same thread (self-spawn) or, during completion
/// handling, from the worker itself reacting to a peer's delivery — this
/// type does not by itself arbitrate multiple concurrent producers. It is
/// safe to share a `&Spsc` across threads (all operations are atomic), but
/// the SPSC *ordering* guarantee only holds with one producer at a time.
pub struct Spsc<T> {
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: u64,
    head: AtomicU64,
    tail: AtomicU64,
}

unsafe impl<T: Send> Send for Spsc<T> {}
unsafe impl<T: Send> Sync for Spsc<T> {}

impl<T: Copy> Spsc<T> {
    /// `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "Spsc capacity must be a power of two");
        let buf = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Spsc {
            buf,
            mask: capacity as u64 - 1,
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        (self.mask + 1) as usize
    }

    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Push a value, returning it back if the ring is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) as usize >= self.capacity() {
            return Err(value);
        }
        let idx = (tail & self.mask) as usize;
        unsafe {
            (*self.buf[idx].get()).write(value);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pop the oldest value, if any.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let idx = (head & self.mask) as usize;
        let value = unsafe { (*self.buf[idx].get()).assume_init() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_single_thread() {
        let q: Spsc<u32> = Spsc::new(4);
        assert!(q.is_empty());
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn ring_full() {
        let q: Spsc<u32> = Spsc::new(2);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.push(3), Err(3));
    }

    #[test]
    fn wrap_around() {
        let q: Spsc<u32> = Spsc::new(2);
        for round in 0..10u32 {
            q.push(round).unwrap();
            assert_eq!(q.pop(), Some(round));
        }
    }

    #[test]
    fn cross_thread_single_producer_single_consumer() {
        use std::sync::Arc;
        use std::thread;

        let q = Arc::new(Spsc::<u32>::new(1024));
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..10_000u32 {
                    while q.push(i).is_err() {
                        std::hint::spin_loop();
                    }
                }
            })
        };
        let mut received = Vec::with_capacity(10_000);
        while received.len() < 10_000 {
            if let Some(v) = q.pop() {
                received.push(v);
            }
        }
        producer.join().unwrap();
        assert_eq!(received, (0..10_000).collect::<Vec<_>>());
    }
}
