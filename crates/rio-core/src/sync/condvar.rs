//! Condition variable, paired with this crate's own `Mutex`.

use super::lifo::{reverse_into_fifo, wake_node, WaiterNode};
use super::mutex::{LockFuture, Mutex, MutexGuard};
use crate::spinlock::SpinLock;
use core::future::Future;
use core::pin::Pin;
use core::sync::atomic::{AtomicPtr, Ordering};
use core::task::{Context, Poll};
use std::collections::VecDeque;

type Node = WaiterNode<()>;

pub struct CondVar {
    waiting: AtomicPtr<Node>,
    to_resume: SpinLock<VecDeque<Box<Node>>>,
}

impl CondVar {
    pub fn new() -> Self {
        CondVar {
            waiting: AtomicPtr::new(core::ptr::null_mut()),
            to_resume: SpinLock::new(VecDeque::new()),
        }
    }

    pub fn wait<'a, T>(&'a self, guard: MutexGuard<'a, T>) -> WaitFuture<'a, T> {
        let mutex = guard.mutex();
        WaitFuture {
            cv: self,
            mutex,
            guard: Some(guard),
            node: core::ptr::null_mut(),
            relock: None,
        }
    }

    fn pop_one(&self) -> Option<Box<Node>> {
        let mut to_resume = self.to_resume.lock();
        if let Some(node) = to_resume.pop_front() {
            return Some(node);
        }
        drop(to_resume);
        let head = self.waiting.swap(core::ptr::null_mut(), Ordering::AcqRel);
        let mut fifo = unsafe { reverse_into_fifo(head) };
        let first = fifo.pop_front();
        self.to_resume.lock().extend(fifo);
        first
    }

    pub fn notify_one(&self) {
        if let Some(node) = self.pop_one() {
            wake_node(node);
        }
    }

    pub fn notify_all(&self) {
        while let Some(node) = self.pop_one() {
            wake_node(node);
        }
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WaitFuture<'a, T> {
    cv: &'a CondVar,
    mutex: &'a Mutex<T>,
    guard: Option<MutexGuard<'a, T>>,
    node: *mut Node,
    relock: Option<LockFuture<'a, T>>,
}

impl<'a, T> Future for WaitFuture<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(relock) = &mut this.relock {
            return unsafe { Pin::new_unchecked(relock) }.poll(cx);
        }

        if this.node.is_null() {
            let node = Node::new((), cx.waker().clone());
            let node_ptr = Box::into_raw(node);
            loop {
                let head = this.cv.waiting.load(Ordering::Acquire);
                unsafe { (*node_ptr).next = head };
                if this
                    .cv
                    .waiting
                    .compare_exchange(head, node_ptr, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            }
            this.node = node_ptr;
            // Registered on the waiter list before releasing the mutex: a
            // concurrent notify can now observe us, closing the missed-wakeup
            // window.
            this.guard.take();
            return Poll::Pending;
        }

        let ready = unsafe { (*this.node).ready.load(Ordering::Acquire) };
        if !ready {
            *unsafe { &mut *this.node }.waker.lock() = Some(cx.waker().clone());
            return Poll::Pending;
        }
        unsafe { drop(Box::from_raw(this.node)) };
        this.node = core::ptr::null_mut();
        let mut relock = this.mutex.lock();
        match unsafe { Pin::new_unchecked(&mut relock) }.poll(cx) {
            Poll::Ready(guard) => Poll::Ready(guard),
            Poll::Pending => {
                this.relock = Some(relock);
                Poll::Pending
            }
        }
    }
}

/// `while !predicate() { guard = cv.wait(guard).await; }`, returning the
/// re-acquired guard once `predicate` holds — the idiomatic replacement for
/// a `wait(mutex, predicate)` overload.
pub async fn wait_while<'a, T>(
    cv: &'a CondVar,
    mut guard: MutexGuard<'a, T>,
    mut predicate: impl FnMut(&mut T) -> bool,
) -> MutexGuard<'a, T> {
    while predicate(&mut guard) {
        guard = cv.wait(guard).await;
    }
    guard
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
    fn notify_one_wakes_a_waiter() {
        let mutex = Arc::new(Mutex::new(0));
        let cv = Arc::new(CondVar::new());
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        let guard = mutex.try_lock().unwrap();
        let mut fut = Box::pin(cv.wait(guard));
        assert!(matches!(fut.as_mut().poll(&mut cx), Poll::Pending));
        assert!(mutex.try_lock().is_some_and(|g| {
            drop(g);
            true
        }));

        // Re-lock to simulate another task mutating protected state, then notify.
        let g2 = mutex.try_lock().unwrap();
        cv.notify_one();
        drop(g2);

        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(mut g) => *g += 1,
            Poll::Pending => panic!("expected wait to resolve after notify"),
        }
        assert_eq!(*mutex.try_lock().unwrap(), 1);
    }
}
