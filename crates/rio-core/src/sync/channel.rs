//! `Channel<T, N>`: a bounded MPMC channel for coroutines.
//!
//! `N` selects the behavior via one const generic rather than three separate
//! types: `N >= 1` is a ring buffer of that capacity; `N == 0` reuses the
//! same single-slot ring but additionally makes `send` wait for the slot to
//! drain before returning, so the producer and consumer rendezvous on every
//! transfer instead of merely handing a value into a buffer.

use super::condvar::CondVar;
use super::mutex::Mutex;
use crate::error::{TryRecvError, TrySendError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    not_full: CondVar,
    not_empty: CondVar,
    capacity: usize,
    rendezvous: bool,
    senders: AtomicUsize,
    closed: AtomicBool,
}

pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

/// `N == 0` is a rendezvous channel, `N == 1` an optional single slot,
/// `N >= 2` a ring buffer — see module docs.
pub fn channel<T, const N: usize>() -> (Sender<T>, Receiver<T>) {
    let capacity = N.max(1);
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        not_full: CondVar::new(),
        not_empty: CondVar::new(),
        capacity,
        rendezvous: N == 0,
        senders: AtomicUsize::new(1),
        closed: AtomicBool::new(false),
    });
    (
        Sender {
            shared: Arc::clone(&shared),
        },
        Receiver { shared },
    )
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::AcqRel);
        Sender {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.closed.store(true, Ordering::Release);
            self.shared.not_empty.notify_all();
        }
    }
}

impl<T> Sender<T> {
    pub async fn send(&self, value: T) -> Result<(), TrySendError<T>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TrySendError::Closed(value));
        }
        let mut guard = self.shared.queue.lock().await;
        while guard.len() >= self.shared.capacity {
            guard = self.shared.not_full.wait(guard).await;
        }
        guard.push_back(value);
        drop(guard);
        self.shared.not_empty.notify_one();

        if self.shared.rendezvous {
            let mut guard = self.shared.queue.lock().await;
            while !guard.is_empty() {
                guard = self.shared.not_full.wait(guard).await;
            }
        }
        Ok(())
    }

    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TrySendError::Closed(value));
        }
        match self.shared.queue.try_lock() {
            Some(mut guard) if guard.len() < self.shared.capacity => {
                guard.push_back(value);
                drop(guard);
                self.shared.not_empty.notify_one();
                Ok(())
            }
            _ => Err(TrySendError::Full(value)),
        }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Receiver {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Receiver<T> {
    /// `None` once every `Sender` has been dropped and the buffer is empty.
    pub async fn recv(&self) -> Option<T> {
        let mut guard = self.shared.queue.lock().await;
        loop {
            if let Some(v) = guard.pop_front() {
                drop(guard);
                self.shared.not_full.notify_one();
                return Some(v);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            guard = self.shared.not_empty.wait(guard).await;
        }
    }

    /// Receive and discard one value; `false` if the channel is closed and drained.
    pub async fn drop_one(&self) -> bool {
        self.recv().await.is_some()
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        match self.shared.queue.try_lock() {
            Some(mut guard) => match guard.pop_front() {
                Some(v) => {
                    drop(guard);
                    self.shared.not_full.notify_one();
                    Ok(v)
                }
                None if self.shared.closed.load(Ordering::Acquire) => Err(TryRecvError::Closed),
                None => Err(TryRecvError::Empty),
            },
            None => Err(TryRecvError::Empty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::future::Future;
    use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
    use std::pin::Pin;

    fn noop_waker() -> Waker {
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(core::ptr::null(), &VTABLE)
        }
        fn no(_: *const ()) {}
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no, no, no);
        unsafe { Waker::from_raw(RawWaker::new(core::ptr::null(), &VTABLE)) }
    }

    fn poll_now<F: Future>(fut: &mut Pin<Box<F>>) -> Poll<F::Output> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        fut.as_mut().poll(&mut cx)
    }

    #[test]
    fn buffered_channel_fifo() {
        let (tx, rx) = channel::<u32, 4>();
        let mut send = Box::pin(tx.send(1));
        assert!(matches!(poll_now(&mut send), Poll::Ready(Ok(()))));
        let mut send2 = Box::pin(tx.send(2));
        assert!(matches!(poll_now(&mut send2), Poll::Ready(Ok(()))));

        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(rx.try_recv(), Ok(2));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn try_send_respects_capacity() {
        let (tx, _rx) = channel::<u32, 1>();
        assert!(tx.try_send(1).is_ok());
        assert!(matches!(tx.try_send(2), Err(TrySendError::Full(2))));
    }

    #[test]
    fn closes_when_all_senders_dropped() {
        let (tx, rx) = channel::<u32, 2>();
        drop(tx);
        let mut recv = Box::pin(rx.recv());
        assert!(matches!(poll_now(&mut recv), Poll::Ready(None)));
    }
}
