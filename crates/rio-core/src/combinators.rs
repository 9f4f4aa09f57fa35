//! `all`/`any`/`some` — wait on a set of futures, each run as its own
//! detached task rather than polled inline from the combinator's own poll.
//! That's the difference that matters for the "losers keep running" rule: if
//! every child were just a `Pin<Box<F>>` living inside this combinator, the
//! combinator being dropped the moment it resolves (the usual `.await`
//! expression's temporary) would drop every still-pending child future right
//! along with it. For a lazy I/O future whose `Drop` issues
//! `IORING_OP_ASYNC_CANCEL`, that would actively cancel the loser instead of
//! letting it finish — the opposite of the guarantee below. Spawning each
//! child first means the combinator only ever holds a cheap join-style
//! handle to an independently-scheduled task; dropping that handle does not
//! touch the task itself.
//!
//! Spawning requires somewhere to spawn *to*, which this crate has no notion
//! of (no worker, no ring). [`DetachedSpawn`] is the seam: `rio-runtime`
//! implements it for `WorkerHandle`, and every function here is generic over
//! it rather than hard-coding a worker type.

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

/// Lets a combinator fan a sub-future out as an independently-scheduled
/// task instead of polling it inline. Implemented for `rio-runtime`'s
/// `WorkerHandle`; `rio-core` itself has no scheduler to spawn onto.
pub trait DetachedSpawn {
    fn spawn_detached<F>(&self, future: F) -> Pin<Box<dyn Future<Output = F::Output> + Send>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;
}

type Handle<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Waits for every future in `futs` to complete, returning their results in
/// the same order. Each future is spawned as its own task up front; this
/// combinator's own poll just checks in on whichever handles haven't
/// resolved yet.
pub struct All<T> {
    handles: Vec<Option<Handle<T>>>,
    results: Vec<Option<T>>,
}

pub fn all<S, F>(spawner: &S, futs: Vec<F>) -> All<F::Output>
where
    S: DetachedSpawn,
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let results = futs.iter().map(|_| None).collect();
    let handles = futs.into_iter().map(|f| Some(spawner.spawn_detached(f))).collect();
    All { handles, results }
}

impl<T> Future for All<T> {
    type Output = Vec<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut all_ready = true;
        for (slot, result) in this.handles.iter_mut().zip(this.results.iter_mut()) {
            if result.is_some() {
                continue;
            }
            match slot.as_mut() {
                Some(fut) => match fut.as_mut().poll(cx) {
                    Poll::Ready(v) => {
                        *result = Some(v);
                        *slot = None;
                    }
                    Poll::Pending => all_ready = false,
                },
                None => unreachable!("result missing but handle already taken"),
            }
        }
        if all_ready {
            let results = this.results.iter_mut().map(|r| r.take().unwrap()).collect();
            Poll::Ready(results)
        } else {
            Poll::Pending
        }
    }
}

/// The outcome of `any`/`some`: which future finished first (by original
/// index), and its value. Losing futures are never cancelled — each one was
/// spawned as its own task and keeps running to completion whether or not
/// this combinator is still being polled, or even still alive.
pub struct AnyOutput<T> {
    pub index: usize,
    pub value: T,
}

pub struct Any<T> {
    handles: Vec<Handle<T>>,
}

pub fn any<S, F>(spawner: &S, futs: Vec<F>) -> Any<F::Output>
where
    S: DetachedSpawn,
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Any {
        handles: futs.into_iter().map(|f| spawner.spawn_detached(f)).collect(),
    }
}

impl<T> Future for Any<T> {
    type Output = AnyOutput<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        for (index, fut) in this.handles.iter_mut().enumerate() {
            if let Poll::Ready(value) = fut.as_mut().poll(cx) {
                return Poll::Ready(AnyOutput { index, value });
            }
        }
        Poll::Pending
    }
}

/// Collects the first `min_complete` results (in completion order, tagged
/// with their original index). The rest were spawned the same way as in
/// `any`/`all` and keep running to completion after this combinator stops
/// waiting on them.
pub struct Some_<T> {
    handles: Vec<Option<Handle<T>>>,
    min_complete: usize,
    collected: Vec<AnyOutput<T>>,
}

pub fn some<S, F>(spawner: &S, min_complete: usize, futs: Vec<F>) -> Some_<F::Output>
where
    S: DetachedSpawn,
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    assert!(min_complete <= futs.len(), "min_complete exceeds the number of futures");
    Some_ {
        handles: futs.into_iter().map(|f| Some(spawner.spawn_detached(f))).collect(),
        min_complete,
        collected: Vec::with_capacity(min_complete),
    }
}

impl<T> Future for Some_<T> {
    type Output = Vec<AnyOutput<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        for (index, slot) in this.handles.iter_mut().enumerate() {
            if this.collected.len() >= this.min_complete {
                break;
            }
            if let Some(fut) = slot.as_mut() {
                if let Poll::Ready(value) = fut.as_mut().poll(cx) {
                    this.collected.push(AnyOutput { index, value });
                    *slot = None;
                }
            }
        }
        if this.collected.len() >= this.min_complete {
            Poll::Ready(core::mem::take(&mut this.collected))
        } else {
            Poll::Pending
        }
    }
}

/// Concrete two- and three-way `all!` joins for heterogeneous future types.
/// For a homogeneous set of arbitrary size use [`all`] directly.
macro_rules! join_n {
    ($name:ident, $($f:ident, $o:ident : $t:ident),+) => {
        pub struct $name<$($t: Send + 'static),+> {
            $($f: Option<Handle<$t>>,)+
            $($o: Option<$t>,)+
        }

        impl<$($t: Send + 'static),+> Future for $name<$($t),+> {
            type Output = ($($t,)+);

            fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
                let this = self.get_mut();
                $(
                    if this.$o.is_none() {
                        if let Some(fut) = this.$f.as_mut() {
                            if let Poll::Ready(v) = fut.as_mut().poll(cx) {
                                this.$o = Some(v);
                                this.$f = None;
                            }
                        }
                    }
                )+
                if $(this.$o.is_some())&&+ {
                    Poll::Ready(($(this.$o.take().unwrap(),)+))
                } else {
                    Poll::Pending
                }
            }
        }
    };
}

join_n!(Join2, fa, oa: A, fb, ob: B);
join_n!(Join3, fa, oa: A, fb, ob: B, fc, oc: C);

pub fn join2<S, A, B>(spawner: &S, a: A, b: B) -> Join2<A, B>
where
    S: DetachedSpawn,
    A: Future + Send + 'static,
    B: Future + Send + 'static,
{
    Join2 {
        fa: Some(spawner.spawn_detached(a)),
        fb: Some(spawner.spawn_detached(b)),
        oa: None,
        ob: None,
    }
}

pub fn join3<S, A, B, C>(spawner: &S, a: A, b: B, c: C) -> Join3<A, B, C>
where
    S: DetachedSpawn,
    A: Future + Send + 'static,
    B: Future + Send + 'static,
    C: Future + Send + 'static,
{
    Join3 {
        fa: Some(spawner.spawn_detached(a)),
        fb: Some(spawner.spawn_detached(b)),
        fc: Some(spawner.spawn_detached(c)),
        oa: None,
        ob: None,
        oc: None,
    }
}

/// Two- and three-way `any!` races for heterogeneous future types, returning
/// an enum tagging which branch won. For a homogeneous set of arbitrary size
/// use [`any`] directly.
macro_rules! any_n {
    ($name:ident, $either:ident, $($f:ident : $t:ident),+) => {
        pub enum $either<$($t: Send + 'static),+> {
            $($t($t),)+
        }

        pub struct $name<$($t: Send + 'static),+> {
            $($f: Option<Handle<$t>>,)+
        }

        impl<$($t: Send + 'static),+> Future for $name<$($t),+> {
            type Output = $either<$($t),+>;

            fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
                let this = self.get_mut();
                $(
                    if let Some(fut) = this.$f.as_mut() {
                        if let Poll::Ready(v) = fut.as_mut().poll(cx) {
                            this.$f = None;
                            return Poll::Ready($either::$t(v));
                        }
                    }
                )+
                Poll::Pending
            }
        }
    };
}

any_n!(AnyOf2, Either2, fa: A, fb: B);
any_n!(AnyOf3, Either3, fa: A, fb: B, fc: C);

pub fn any_of2<S, A, B>(spawner: &S, a: A, b: B) -> AnyOf2<A, B>
where
    S: DetachedSpawn,
    A: Future + Send + 'static,
    B: Future + Send + 'static,
{
    AnyOf2 {
        fa: Some(spawner.spawn_detached(a)),
        fb: Some(spawner.spawn_detached(b)),
    }
}

pub fn any_of3<S, A, B, C>(spawner: &S, a: A, b: B, c: C) -> AnyOf3<A, B, C>
where
    S: DetachedSpawn,
    A: Future + Send + 'static,
    B: Future + Send + 'static,
    C: Future + Send + 'static,
{
    AnyOf3 {
        fa: Some(spawner.spawn_detached(a)),
        fb: Some(spawner.spawn_detached(b)),
        fc: Some(spawner.spawn_detached(c)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::task::{RawWaker, RawWakerVTable, Waker};

    fn noop_waker() -> Waker {
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(core::ptr::null(), &VTABLE)
        }
        fn no(_: *const ()) {}
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no, no, no);
        unsafe { Waker::from_raw(RawWaker::new(core::ptr::null(), &VTABLE)) }
    }

    struct Ready1<T>(Option<T>);
    impl<T: Unpin> Future for Ready1<T> {
        type Output = T;
        fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<T> {
            Poll::Ready(self.0.take().expect("polled after ready"))
        }
    }

    /// A spawner with no worker behind it at all: it runs each child
    /// future to completion inline the moment it's handed one, simulating
    /// "already scheduled elsewhere" for futures that complete on first
    /// poll (every one of these tests uses exactly that kind). Whether a
    /// still-pending child genuinely survives its combinator being dropped
    /// depends on `rio-runtime`'s real task scheduling, not on this
    /// trait — see `rio-runtime`'s own test for that guarantee.
    struct InlineSpawner;

    impl DetachedSpawn for InlineSpawner {
        fn spawn_detached<F>(&self, future: F) -> Pin<Box<dyn Future<Output = F::Output> + Send>>
        where
            F: Future + Send + 'static,
            F::Output: Send + 'static,
        {
            let mut future = Box::pin(future);
            let waker = noop_waker();
            let mut cx = Context::from_waker(&waker);
            match future.as_mut().poll(&mut cx) {
                Poll::Ready(v) => Box::pin(async move { v }),
                Poll::Pending => Box::pin(future),
            }
        }
    }

    #[test]
    fn all_waits_for_every_future() {
        let futs = vec![Ready1(Some(1)), Ready1(Some(2)), Ready1(Some(3))];
        let mut fut = Box::pin(all(&InlineSpawner, futs));
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(v) => assert_eq!(v, vec![1, 2, 3]),
            Poll::Pending => panic!("expected immediate completion"),
        }
    }

    #[test]
    fn any_returns_first_ready() {
        let futs = vec![Ready1(Some(10)), Ready1(Some(20))];
        let mut fut = Box::pin(any(&InlineSpawner, futs));
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(out) => assert_eq!(out.index, 0),
            Poll::Pending => panic!("expected immediate completion"),
        }
    }

    #[test]
    fn join2_waits_for_both() {
        let mut fut = Box::pin(join2(&InlineSpawner, Ready1(Some(1)), Ready1(Some("x"))));
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready((a, b)) => {
                assert_eq!(a, 1);
                assert_eq!(b, "x");
            }
            Poll::Pending => panic!("expected immediate completion"),
        }
    }

    #[test]
    fn any_of2_tags_the_winner() {
        let mut fut = Box::pin(any_of2(&InlineSpawner, Ready1(Some(1u32)), Ready1(Some("x"))));
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(Either2::A(v)) => assert_eq!(v, 1),
            Poll::Ready(Either2::B(_)) => panic!("expected the first branch to win"),
            Poll::Pending => panic!("expected immediate completion"),
        }
    }

    #[test]
    fn some_collects_minimum() {
        let futs = vec![Ready1(Some(1)), Ready1(Some(2)), Ready1(Some(3))];
        let mut fut = Box::pin(some(&InlineSpawner, 2, futs));
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(v) => assert_eq!(v.len(), 2),
            Poll::Pending => panic!("expected immediate completion"),
        }
    }
}
