//! Counting semaphore for coroutines.
//!
//! The counter can go negative: a negative value's magnitude is exactly the
//! number of acquires that have registered as waiters and not yet been
//! granted a unit.

use super::lifo::{reverse_into_fifo, wake_node, WaiterNode};
use crate::spinlock::SpinLock;
use core::future::Future;
use core::pin::Pin;
use core::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};
use core::task::{Context, Poll};
use std::collections::VecDeque;

type Node = WaiterNode<()>;

pub struct Semaphore {
    counter: AtomicIsize,
    waiting: AtomicPtr<Node>,
    to_resume: SpinLock<VecDeque<Box<Node>>>,
}

impl Semaphore {
    pub fn new(permits: isize) -> Self {
        Semaphore {
            counter: AtomicIsize::new(permits),
            waiting: AtomicPtr::new(core::ptr::null_mut()),
            to_resume: SpinLock::new(VecDeque::new()),
        }
    }

    pub fn available_permits(&self) -> isize {
        self.counter.load(Ordering::Acquire).max(0)
    }

    pub fn try_acquire(&self) -> bool {
        loop {
            let cur = self.counter.load(Ordering::Acquire);
            if cur <= 0 {
                return false;
            }
            if self
                .counter
                .compare_exchange(cur, cur - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn acquire(&self) -> AcquireFuture<'_> {
        AcquireFuture {
            sem: self,
            node: core::ptr::null_mut(),
            registered: false,
        }
    }

    /// Release `n` permits, waking up to `n` waiters.
    pub fn release(&self, n: isize) {
        debug_assert!(n > 0);
        let prior = self.counter.fetch_add(n, Ordering::AcqRel);
        if prior >= 0 {
            return;
        }
        let to_wake = n.min(-prior) as usize;
        for _ in 0..to_wake {
            let node = {
                let mut to_resume = self.to_resume.lock();
                if let Some(node) = to_resume.pop_front() {
                    Some(node)
                } else {
                    drop(to_resume);
                    let head = self.waiting.swap(core::ptr::null_mut(), Ordering::AcqRel);
                    let mut fifo = unsafe { reverse_into_fifo(head) };
                    let first = fifo.pop_front();
                    self.to_resume.lock().extend(fifo);
                    first
                }
            };
            match node {
                Some(node) => wake_node(node),
                None => break,
            }
        }
    }
}

pub struct AcquireFuture<'a> {
    sem: &'a Semaphore,
    node: *mut Node,
    registered: bool,
}

impl<'a> Future for AcquireFuture<'a> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        if this.registered {
            let ready = unsafe { (*this.node).ready.load(Ordering::Acquire) };
            if ready {
                unsafe { drop(Box::from_raw(this.node)) };
                return Poll::Ready(());
            }
            *unsafe { &mut *this.node }.waker.lock() = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let prior = this.sem.counter.fetch_sub(1, Ordering::AcqRel);
        if prior > 0 {
            return Poll::Ready(());
        }

        let node = Node::new((), cx.waker().clone());
        let node_ptr = Box::into_raw(node);
        loop {
            let head = this.sem.waiting.load(Ordering::Acquire);
            unsafe { (*node_ptr).next = head };
            if this
                .sem
                .waiting
                .compare_exchange(head, node_ptr, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
        this.node = node_ptr;
        this.registered = true;
        Poll::Pending
    }
}

impl<'a> Drop for AcquireFuture<'a> {
    fn drop(&mut self) {
        if self.registered {
            let ready = unsafe { (*self.node).ready.load(Ordering::Acquire) };
            if ready {
                // We were granted a permit but never observed it: hand it
                // back rather than leaking it forever.
                unsafe { drop(Box::from_raw(self.node)) };
                self.sem.release(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::task::{RawWaker, RawWakerVTable, Waker};

    fn noop_waker() -> Waker {
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(core::ptr::null(), &VTABLE)
        }
        fn no(_: *const ()) {}
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no, no, no);
        unsafe { Waker::from_raw(RawWaker::new(core::ptr::null(), &VTABLE)) }
    }

    #[test]
    fn try_acquire_respects_count() {
        let sem = Semaphore::new(2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release(1);
        assert!(sem.try_acquire());
    }

    #[test]
    fn acquire_future_blocks_then_wakes() {
        let sem = Arc::new(Semaphore::new(0));
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = Box::pin(sem.acquire());
        assert!(matches!(fut.as_mut().poll(&mut cx), Poll::Pending));
        sem.release(1);
        assert!(matches!(fut.as_mut().poll(&mut cx), Poll::Ready(())));
    }

    #[test]
    fn release_wakes_at_most_n() {
        let sem = Arc::new(Semaphore::new(0));
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut f1 = Box::pin(sem.acquire());
        let mut f2 = Box::pin(sem.acquire());
        let mut f3 = Box::pin(sem.acquire());
        assert!(matches!(f1.as_mut().poll(&mut cx), Poll::Pending));
        assert!(matches!(f2.as_mut().poll(&mut cx), Poll::Pending));
        assert!(matches!(f3.as_mut().poll(&mut cx), Poll::Pending));

        sem.release(2);
        let ready = [f1.as_mut().poll(&mut cx), f2.as_mut().poll(&mut cx), f3.as_mut().poll(&mut cx)]
            .iter()
            .filter(|p| matches!(p, Poll::Ready(())))
            .count();
        assert_eq!(ready, 2);
    }
}
