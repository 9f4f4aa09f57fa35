//! Coroutine task types: `spawn`'s eager, single-awaiter `JoinHandle<T>`
//! and the reference-counted, multi-awaiter `SharedTask<T>`.
//!
//! Both are driven the same way: a boxed future lives behind a
//! `SpinLock<Option<_>>` that is empty exactly while a `run()` call has it
//! out for polling (so a `wake()` that fires during that poll just gets
//! rescheduled rather than re-entering the lock), and the task itself is
//! its own `std::task::Wake`.

use crate::worker::{schedule, Runnable, WorkerHandle};
use rio_core::spinlock::SpinLock;
use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

pub use crate::error::JoinError;

fn run_poll<T>(
    fut: &mut Pin<Box<dyn Future<Output = T> + Send>>,
    cx: &mut Context<'_>,
) -> Result<Poll<T>, Box<dyn Any + Send>> {
    catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(cx)))
}

enum Slot<T> {
    Pending,
    Done(Result<T, JoinError>),
    Taken,
}

struct TaskState<T> {
    future: SpinLock<Option<Pin<Box<dyn Future<Output = T> + Send>>>>,
    slot: SpinLock<Slot<T>>,
    join_waker: SpinLock<Option<Waker>>,
    worker: SpinLock<WorkerHandle>,
    scheduled: AtomicBool,
}

impl<T: Send + 'static> TaskState<T> {
    fn self_handle(self: &Arc<Self>) -> Arc<dyn Runnable + Send + Sync> {
        Arc::clone(self) as Arc<dyn Runnable + Send + Sync>
    }
}

impl<T: Send + 'static> Wake for TaskState<T> {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let worker = self.worker.lock().clone();
        schedule(&worker, self.self_handle());
    }
}

impl<T: Send + 'static> Runnable for TaskState<T> {
    fn run(self: Arc<Self>) {
        self.scheduled.store(false, Ordering::Release);
        let mut fut = match self.future.lock().take() {
            Some(fut) => fut,
            None => return,
        };
        let waker = Waker::from(Arc::clone(&self));
        let mut cx = Context::from_waker(&waker);
        match run_poll(&mut fut, &mut cx) {
            Ok(Poll::Ready(value)) => {
                *self.slot.lock() = Slot::Done(Ok(value));
                self.wake_joiner();
            }
            Ok(Poll::Pending) => {
                *self.future.lock() = Some(fut);
            }
            Err(payload) => {
                *self.slot.lock() = Slot::Done(Err(JoinError::Panicked(payload)));
                self.wake_joiner();
            }
        }
    }

    /// Used by `rio::io::resume_on`: moves this task's home worker and, since
    /// it is necessarily mid-poll (only the currently-running task can be
    /// retargeted), reschedules it on `target` the moment the poll returns
    /// `Pending`, the same way an external wake would.
    fn reassign_worker(self: Arc<Self>, target: &WorkerHandle) {
        *self.worker.lock() = target.clone();
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            let handle = self.self_handle();
            schedule(target, handle);
        }
    }
}

impl<T> TaskState<T> {
    fn wake_joiner(&self) {
        if let Some(w) = self.join_waker.lock().take() {
            w.wake();
        }
    }
}

/// Handle to a detached, eagerly-running task. Awaiting it once yields the
/// task's output (or the reason it didn't produce one); awaiting it again
/// panics, matching `std`'s `JoinHandle` discipline.
pub struct JoinHandle<T> {
    state: Arc<TaskState<T>>,
}

impl<T: Send + 'static> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T, JoinError>> {
        let mut slot = self.state.slot.lock();
        match &*slot {
            Slot::Done(_) => match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Done(result) => Poll::Ready(result),
                _ => unreachable!(),
            },
            Slot::Pending => {
                *self.state.join_waker.lock() = Some(cx.waker().clone());
                Poll::Pending
            }
            Slot::Taken => panic!("JoinHandle polled after completion"),
        }
    }
}

/// Spawns `future` onto `worker`, running it to completion even if the
/// returned `JoinHandle` is dropped (eager, detachable — matching `std`'s
/// `spawn`, not a structured-concurrency `scope`).
///
/// Takes a [`WorkerHandle`] rather than `&Worker` so this can be called
/// from any thread, not just the one the target worker runs on: the
/// initial schedule goes through the same same-thread-fast-path-or-co-spawn
/// logic as a task waking itself up.
pub fn spawn<F>(worker: &WorkerHandle, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let state = Arc::new(TaskState {
        future: SpinLock::new(Some(Box::pin(future))),
        slot: SpinLock::new(Slot::Pending),
        join_waker: SpinLock::new(None),
        worker: SpinLock::new(worker.clone()),
        scheduled: AtomicBool::new(true),
    });
    schedule(worker, Arc::clone(&state) as Arc<dyn Runnable + Send + Sync>);
    JoinHandle { state }
}

/// Lets `rio-core`'s combinators (`all`/`any`/`some`) fan a sub-future out
/// as its own detached task instead of polling it inline, so a losing
/// branch keeps running to completion even after the combinator that
/// raced it is dropped. Implemented here, not in `rio-core`, since only
/// this crate knows how to schedule onto a worker.
impl rio_core::combinators::DetachedSpawn for WorkerHandle {
    fn spawn_detached<F>(&self, future: F) -> Pin<Box<dyn Future<Output = F::Output> + Send>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = spawn(self, future);
        Box::pin(async move {
            match handle.await {
                Ok(value) => value,
                Err(e) => panic!("rio: detached combinator child task failed: {e}"),
            }
        })
    }
}

struct SharedTaskState<T> {
    future: SpinLock<Option<Pin<Box<dyn Future<Output = T> + Send>>>>,
    result: SpinLock<Option<Result<T, JoinError>>>,
    waiters: SpinLock<Vec<Waker>>,
    worker: SpinLock<WorkerHandle>,
    /// `false` until the first clone is polled; `spawn_shared` itself never
    /// schedules the inner future, matching the documented
    /// not-started-until-awaited `SharedTask` contract.
    started: AtomicBool,
    scheduled: AtomicBool,
}

impl<T: Clone + Send + 'static> SharedTaskState<T> {
    fn start_if_needed(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scheduled.store(true, Ordering::Release);
        let worker = self.worker.lock().clone();
        schedule(&worker, Arc::clone(self) as Arc<dyn Runnable + Send + Sync>);
    }
}

impl<T: Clone + Send + 'static> Wake for SharedTaskState<T> {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let worker = self.worker.lock().clone();
        schedule(&worker, Arc::clone(self) as Arc<dyn Runnable + Send + Sync>);
    }
}

impl<T: Clone + Send + 'static> Runnable for SharedTaskState<T> {
    fn run(self: Arc<Self>) {
        self.scheduled.store(false, Ordering::Release);
        let mut fut = match self.future.lock().take() {
            Some(fut) => fut,
            None => return,
        };
        let waker = Waker::from(Arc::clone(&self));
        let mut cx = Context::from_waker(&waker);
        let outcome = match run_poll(&mut fut, &mut cx) {
            Ok(Poll::Ready(value)) => Some(Ok(value)),
            Ok(Poll::Pending) => {
                *self.future.lock() = Some(fut);
                None
            }
            Err(payload) => Some(Err(JoinError::Panicked(payload))),
        };
        if let Some(result) = outcome {
            *self.result.lock() = Some(result);
            for w in self.waiters.lock().drain(..) {
                w.wake();
            }
        }
    }

    fn reassign_worker(self: Arc<Self>, target: &WorkerHandle) {
        *self.worker.lock() = target.clone();
        if self.started.load(Ordering::Acquire) && !self.scheduled.swap(true, Ordering::AcqRel) {
            let handle = Arc::clone(&self) as Arc<dyn Runnable + Send + Sync>;
            schedule(target, handle);
        }
    }
}

/// Cheaply-cloneable handle to a task whose output every clone can observe.
/// Grounded on the single-producer/multi-consumer shape of a future shared
/// across several awaiters; `T` must be `Clone` since each awaiter gets its
/// own copy rather than taking ownership.
pub struct SharedTask<T> {
    state: Arc<SharedTaskState<T>>,
}

impl<T> Clone for SharedTask<T> {
    fn clone(&self) -> Self {
        SharedTask { state: Arc::clone(&self.state) }
    }
}

impl<T: Clone + Send + 'static> Future for SharedTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T, JoinError>> {
        self.state.start_if_needed();
        let result = self.state.result.lock();
        if let Some(r) = &*result {
            return Poll::Ready(r.clone());
        }
        drop(result);
        self.state.waiters.lock().push(cx.waker().clone());
        // Re-check: the task may have completed between the first read and
        // registering the waker.
        if let Some(r) = &*self.state.result.lock() {
            return Poll::Ready(r.clone());
        }
        Poll::Pending
    }
}

pub fn spawn_shared<F>(worker: &WorkerHandle, future: F) -> SharedTask<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Clone + Send + 'static,
{
    let state = Arc::new(SharedTaskState {
        future: SpinLock::new(Some(Box::pin(future))),
        result: SpinLock::new(None),
        waiters: SpinLock::new(Vec::new()),
        worker: SpinLock::new(worker.clone()),
        started: AtomicBool::new(false),
        scheduled: AtomicBool::new(false),
    });
    SharedTask { state }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use crate::inbox::Inbox;
    use crate::worker::{published_ring_fd_slot, Worker};
    use rio_core::combinators::DetachedSpawn;
    use rio_core::stop::StopSource;
    use std::sync::Arc as StdArc;

    fn test_worker() -> Worker {
        let config = ContextConfig::new().sq_entries(32).ready_queue_capacity(32);
        let inbox = StdArc::new(Inbox::new(config.inbox_mode).unwrap());
        Worker::new(0, config, StopSource::new(), inbox, published_ring_fd_slot()).unwrap()
    }

    #[test]
    fn spawn_runs_and_joins() {
        let worker = test_worker();
        let mut handle = spawn(&worker.handle(), async { 1 + 1 });
        // The initial schedule lands on the ready-queue; drive it directly
        // rather than running the full blocking submit/reap loop.
        worker.run_ready_queue_once_for_test();
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        match Pin::new(&mut handle).poll(&mut cx) {
            Poll::Ready(Ok(v)) => assert_eq!(v, 2),
            other => panic!("expected Ready(Ok(2)), got pending: {}", matches!(other, Poll::Pending)),
        }
    }

    /// A future that self-wakes once, then completes on its second poll —
    /// standing in for a child task that's still busy when its caller stops
    /// watching it.
    struct TwoPoll {
        completed: StdArc<AtomicBool>,
        polled_once: bool,
    }

    impl Future for TwoPoll {
        type Output = ();
        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if !self.polled_once {
                self.polled_once = true;
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            self.completed.store(true, Ordering::SeqCst);
            Poll::Ready(())
        }
    }

    /// The guarantee `rio-core`'s combinators depend on: dropping the handle
    /// `DetachedSpawn::spawn_detached` returns must not stop the real task
    /// it was backed by — the task keeps progressing (and completing) on
    /// its worker regardless of whether anything is still awaiting it.
    #[test]
    fn detached_spawn_keeps_running_after_its_handle_is_dropped() {
        let worker = test_worker();
        let completed = StdArc::new(AtomicBool::new(false));

        let handle = worker.handle().spawn_detached(TwoPoll {
            completed: StdArc::clone(&completed),
            polled_once: false,
        });
        drop(handle);

        // First drain runs the task's first (self-waking) poll; the second
        // drain picks up the reschedule from that self-wake and completes it.
        worker.run_ready_queue_once_for_test();
        worker.run_ready_queue_once_for_test();

        assert!(
            completed.load(Ordering::SeqCst),
            "a detached task must keep running after its handle is dropped"
        );
    }

    fn noop_waker() -> Waker {
        use std::task::{RawWaker, RawWakerVTable};
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
}
