//! Intrusive waiter node shared by `Mutex`, `Semaphore`, and `CondVar`.
//!
//! Each primitive keeps its own atomic head word (so it can fold in its own
//! sentinel values, e.g. a mutex's "locked, nobody waiting" state) and only
//! borrows the node layout and the swap-and-reverse walk from here.

use crate::spinlock::SpinLock;
use core::sync::atomic::AtomicBool;
use core::task::Waker;
use std::collections::VecDeque;

pub struct WaiterNode<T> {
    pub next: *mut WaiterNode<T>,
    pub waker: SpinLock<Option<Waker>>,
    pub ready: AtomicBool,
    pub payload: T,
}

unsafe impl<T: Send> Send for WaiterNode<T> {}
unsafe impl<T: Send> Sync for WaiterNode<T> {}

impl<T> WaiterNode<T> {
    pub fn new(payload: T, waker: Waker) -> Box<Self> {
        Box::new(WaiterNode {
            next: core::ptr::null_mut(),
            waker: SpinLock::new(Some(waker)),
            ready: AtomicBool::new(false),
            payload,
        })
    }
}

/// Reverses a raw chain produced by repeated LIFO pushes (head = most
/// recently pushed) into oldest-first order, reclaiming each node as a
/// `Box` as it walks.
///
/// # Safety
/// `head` must be either null or a valid chain of `WaiterNode<T>` pointers
/// each uniquely owned (no other code may read through them concurrently
/// once this is called — the caller must have already removed `head` from
/// the shared atomic slot it came from).
pub unsafe fn reverse_into_fifo<T>(mut head: *mut WaiterNode<T>) -> VecDeque<Box<WaiterNode<T>>> {
    let mut out = VecDeque::new();
    while !head.is_null() {
        let node = Box::from_raw(head);
        head = node.next;
        out.push_front(node);
    }
    out
}

/// Marks a popped node ready and wakes it, handing ownership of its
/// allocation back to whichever `Future` is still holding the raw pointer
/// it pushed (that future's next `poll` reclaims the `Box`).
pub fn wake_node<T>(node: Box<WaiterNode<T>>) {
    let waker = node.waker.lock().take();
    node.ready.store(true, core::sync::atomic::Ordering::Release);
    Box::into_raw(node);
    if let Some(w) = waker {
        w.wake();
    }
}
