//! Scheduling primitives that aren't an io_uring opcode: yielding to the
//! ready-queue, identifying the worker a task is currently running on, and
//! moving a task to a different one. Kept separate from [`crate::ops`]'s
//! opcode catalog since none of these ever touch the ring.

use crate::worker::{self, WorkerHandle};
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

/// Identifies a worker/`Context` — what `who_am_i` returns and what
/// `resume_on` compares its target against to skip a no-op migration.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct ContextId(pub usize);

/// The id of the worker the calling task is currently running on.
///
/// # Panics
/// If called from a thread with no running worker.
pub fn who_am_i() -> ContextId {
    ContextId(worker::with_current_worker(|w| w.id))
}

/// Yields once to the ready-queue: the first poll always returns `Pending`
/// after re-arming its own wake-up, so whatever else is ready on this
/// worker gets a turn before this task is polled again.
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

enum ResumeState {
    NotMoved,
    Moved,
}

/// Moves the calling task onto `target`'s ready-queue, so every subsequent
/// `.await` point in the same task runs on `target` instead of wherever it
/// started. A no-op if the task is already running there.
///
/// Only meaningful from inside a task driven by this runtime's worker loop
/// (i.e. something `spawn`/`spawn_shared` or a `Context` is driving) — from
/// any other context (e.g. a hand-rolled `block_on`) it resolves immediately
/// without moving anything, since there is no current task to retarget.
pub struct ResumeOn {
    target: WorkerHandle,
    state: ResumeState,
}

impl Future for ResumeOn {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if matches!(self.state, ResumeState::Moved) {
            return Poll::Ready(());
        }
        let already_there = worker::with_current_worker_opt(|w| w.id == self.target.id).unwrap_or(false);
        if already_there {
            self.state = ResumeState::Moved;
            return Poll::Ready(());
        }
        match worker::current_task() {
            Some(task) => {
                self.state = ResumeState::Moved;
                task.reassign_worker(&self.target);
                Poll::Pending
            }
            None => {
                // No task context to migrate (e.g. a top-level `block_on`):
                // nothing to do but let the caller proceed on this thread.
                self.state = ResumeState::Moved;
                Poll::Ready(())
            }
        }
    }
}

pub fn resume_on(target: &WorkerHandle) -> ResumeOn {
    ResumeOn { target: target.clone(), state: ResumeState::NotMoved }
}
