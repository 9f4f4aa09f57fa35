//! Composes two lazy-I/O awaiters with `IOSQE_IO_LINK`: the first op's
//! awaiter is asked for `.link(second)`, which flags its own SQE and
//! returns a `Link<First, Second>` that polls both exactly once before
//! either one's SQE reaches the submission queue, so the kernel sees them
//! adjacent and honors the link.
//!
//! Both operand futures must be `Unpin` — every awaiter in [`crate::ops`]
//! is (they hold no self-referential state, only a boxed completion slot
//! and plain fields), so this never needs unsafe pin projection.

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

enum State<A, B> {
    BothPending(A, B),
    FirstDone(i32, B),
    SecondDone(A, i32),
    Taken,
}

/// A linked pair. Resolves to `(first_result, second_result)` once both
/// complete. Per SPEC_FULL's default, a non-zero/negative result on the
/// first op does not stop `Link` from also reporting the second op's
/// result — the kernel itself decides whether to short-circuit a linked
/// chain (`-ECANCELED` on the dependent op) and that shows up as the
/// second tuple element, not as an early return here.
pub struct Link<A, B> {
    state: State<A, B>,
}

impl<A, B> Link<A, B>
where
    A: Future<Output = i32> + Unpin,
    B: Future<Output = i32> + Unpin,
{
    pub fn new(first: A, second: B) -> Self {
        Link {
            state: State::BothPending(first, second),
        }
    }
}

impl<A, B> Future for Link<A, B>
where
    A: Future<Output = i32> + Unpin,
    B: Future<Output = i32> + Unpin,
{
    type Output = (i32, i32);

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<(i32, i32)> {
        let this = &mut *self;
        match core::mem::replace(&mut this.state, State::Taken) {
            State::BothPending(mut a, mut b) => {
                // Both must be polled once here, in order, so their SQEs
                // land adjacent in the ring before the worker's next submit.
                let pa = Pin::new(&mut a).poll(cx);
                let pb = Pin::new(&mut b).poll(cx);
                match (pa, pb) {
                    (Poll::Ready(ra), Poll::Ready(rb)) => Poll::Ready((ra, rb)),
                    (Poll::Ready(ra), Poll::Pending) => {
                        this.state = State::FirstDone(ra, b);
                        Poll::Pending
                    }
                    (Poll::Pending, Poll::Ready(rb)) => {
                        this.state = State::SecondDone(a, rb);
                        Poll::Pending
                    }
                    (Poll::Pending, Poll::Pending) => {
                        this.state = State::BothPending(a, b);
                        Poll::Pending
                    }
                }
            }
            State::FirstDone(ra, mut b) => match Pin::new(&mut b).poll(cx) {
                Poll::Ready(rb) => Poll::Ready((ra, rb)),
                Poll::Pending => {
                    this.state = State::FirstDone(ra, b);
                    Poll::Pending
                }
            },
            State::SecondDone(mut a, rb) => match Pin::new(&mut a).poll(cx) {
                Poll::Ready(ra) => Poll::Ready((ra, rb)),
                Poll::Pending => {
                    this.state = State::SecondDone(a, rb);
                    Poll::Pending
                }
            },
            State::Taken => panic!("Link polled after completion"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicBool, Ordering};
    use core::task::{RawWaker, RawWakerVTable, Waker};

    struct Immediate(i32);
    impl Future for Immediate {
        type Output = i32;
        fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<i32> {
            Poll::Ready(self.0)
        }
    }

    fn noop_waker() -> Waker {
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(core::ptr::null(), vtable())
        }
        fn noop(_: *const ()) {}
        fn vtable() -> &'static RawWakerVTable {
            static V: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
            &V
        }
        unsafe { Waker::from_raw(RawWaker::new(core::ptr::null(), vtable())) }
    }

    #[test]
    fn both_ready_immediately() {
        let mut link = Link::new(Immediate(1), Immediate(2));
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(Pin::new(&mut link).poll(&mut cx), Poll::Ready((1, 2)));
    }

    struct OnceReadyOnSecondPoll {
        polled: AtomicBool,
        value: i32,
    }
    impl Future for OnceReadyOnSecondPoll {
        type Output = i32;
        fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<i32> {
            if self.polled.swap(true, Ordering::SeqCst) {
                Poll::Ready(self.value)
            } else {
                Poll::Pending
            }
        }
    }

    #[test]
    fn resolves_once_both_sides_finish() {
        let mut link = Link::new(
            OnceReadyOnSecondPoll { polled: AtomicBool::new(false), value: 10 },
            Immediate(20),
        );
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(Pin::new(&mut link).poll(&mut cx), Poll::Pending);
        match Pin::new(&mut link).poll(&mut cx) {
            Poll::Ready((10, 20)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
