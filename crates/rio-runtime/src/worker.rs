//! Per-worker main loop: one io_uring ring, one SPSC ready-queue, no
//! work-stealing between workers. A runnable task hops to another worker
//! only through that worker's [`crate::inbox::Inbox`].

use crate::config::{rio_log, ContextConfig, InboxMode, LogLevel};
use crate::error::WorkerError;
use crate::inbox::Inbox;
use crate::ring::Ring;
use io_uring::{opcode, squeue, types};
use rio_core::spsc::Spsc;
use rio_core::stop::StopSource;
use rio_core::tag::{Tag, UserData};
use std::cell::{Cell, RefCell};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Anything the ready-queue can resume. `spawn`'s task type (`rio-runtime::task`)
/// is the only real implementor.
pub trait Runnable: Send + Sync {
    fn run(self: Arc<Self>);

    /// Retargets future wake-ups onto `target`, and, if this task is
    /// currently pending, reschedules it there immediately. Only
    /// `rio-runtime::task`'s task types override this; everything else
    /// keeps running on whichever worker first scheduled it.
    fn reassign_worker(self: Arc<Self>, target: &WorkerHandle) {
        let _ = target;
    }
}

/// Erases `Arc<dyn Runnable>` down to a thin pointer so it fits in a
/// `user_data`/SPSC slot. The classic double-box: `Box<Arc<dyn Trait>>` is a
/// single heap word wide even though `Arc<dyn Trait>` itself is not.
pub fn into_thin_runnable(task: Arc<dyn Runnable + Send + Sync>) -> *const () {
    let boxed: Box<Arc<dyn Runnable + Send + Sync>> = Box::new(task);
    Box::into_raw(boxed) as *const ()
}

/// # Safety
/// `ptr` must have come from [`into_thin_runnable`] and not yet been consumed.
pub unsafe fn from_thin_runnable(ptr: *const ()) -> Arc<dyn Runnable + Send + Sync> {
    let boxed = Box::from_raw(ptr as *mut Arc<dyn Runnable + Send + Sync>);
    *boxed
}

/// Cheap, `Clone`-able reference to a worker, handed out so peers can
/// co-spawn onto it without touching the worker's thread-owned state.
#[derive(Clone)]
pub struct WorkerHandle {
    pub id: usize,
    inbox: Arc<Inbox>,
    ring_fd: Arc<AtomicI32>,
    stop: StopSource,
}

impl WorkerHandle {
    /// Hands `task` to the owning worker. Picks the eventfd or
    /// `IORING_OP_MSG_RING` delivery path per the inbox's configured mode;
    /// falls back to the eventfd path if the ring fd hasn't been published
    /// yet (a brief window right after worker startup).
    pub fn co_spawn(&self, task: Arc<dyn Runnable + Send + Sync>) {
        let thin = into_thin_runnable(task);
        match self.inbox.mode() {
            InboxMode::EventFd => self.inbox.push_and_ring_eventfd(thin),
            InboxMode::MsgRing => {
                let fd = self.ring_fd.load(Ordering::Acquire);
                if fd < 0 {
                    self.inbox.push_and_ring_eventfd(thin);
                    return;
                }
                self.inbox.push_silent(thin);
                with_current_worker_opt(|owner| {
                    owner.nudge_via_msg_ring(fd);
                });
            }
        }
    }

    /// The cancellation source backing this worker's `Context`. Cloning it
    /// out onto a handle lets `ContextHandle::request_stop` signal a stop
    /// from any thread, not just the one running the worker loop.
    pub fn stop_source(&self) -> &StopSource {
        &self.stop
    }
}

thread_local! {
    static CURRENT_WORKER: RefCell<Option<*const Worker>> = RefCell::new(None);
    static CURRENT_TASK: RefCell<Option<Arc<dyn Runnable + Send + Sync>>> = RefCell::new(None);
}

/// Runs `f` against the worker bound to this thread.
///
/// # Panics
/// If called from a thread with no running worker (i.e. outside of a
/// polled future spawned by this runtime).
pub fn with_current_worker<R>(f: impl FnOnce(&Worker) -> R) -> R {
    with_current_worker_opt(f).expect("rio: no worker running on this thread")
}

pub(crate) fn with_current_worker_opt<R>(f: impl FnOnce(&Worker) -> R) -> Option<R> {
    CURRENT_WORKER.with(|cell| cell.borrow().map(|ptr| f(unsafe { &*ptr })))
}

/// The task presently executing on this thread's worker, if any. Lets a
/// future polled from inside that task (e.g. `resume_on`) retarget its own
/// scheduling without the worker loop threading a handle through every poll.
pub(crate) fn current_task() -> Option<Arc<dyn Runnable + Send + Sync>> {
    CURRENT_TASK.with(|cell| cell.borrow().clone())
}

fn run_with_task_context(task: Arc<dyn Runnable + Send + Sync>) {
    CURRENT_TASK.with(|cell| *cell.borrow_mut() = Some(Arc::clone(&task)));
    task.run();
    CURRENT_TASK.with(|cell| *cell.borrow_mut() = None);
}

pub struct Worker {
    pub id: usize,
    ring: RefCell<Ring>,
    ready: Spsc<*const ()>,
    inbox: Arc<Inbox>,
    stop: StopSource,
    config: ContextConfig,
    outstanding: Cell<u64>,
    ring_fd_slot: Arc<AtomicI32>,
    wake_poll_armed: Cell<bool>,
}

impl Worker {
    pub fn new(
        id: usize,
        config: ContextConfig,
        stop: StopSource,
        inbox: Arc<Inbox>,
        ring_fd_slot: Arc<AtomicI32>,
    ) -> Result<Self, WorkerError> {
        let ring = Ring::new(config.sq_entries, config.ring_flags)?;
        ring_fd_slot.store(ring.as_raw_fd(), Ordering::Release);
        Ok(Worker {
            id,
            ring: RefCell::new(ring),
            ready: Spsc::new(config.ready_queue_capacity),
            inbox,
            stop,
            config,
            outstanding: Cell::new(0),
            ring_fd_slot,
            wake_poll_armed: Cell::new(false),
        })
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            id: self.id,
            inbox: Arc::clone(&self.inbox),
            ring_fd: Arc::clone(&self.ring_fd_slot),
            stop: self.stop.clone(),
        }
    }

    pub fn stop_source(&self) -> &StopSource {
        &self.stop
    }

    /// Schedules an already-owned task on this worker's own ready-queue.
    pub fn schedule_local(&self, task: Arc<dyn Runnable + Send + Sync>) {
        let thin = into_thin_runnable(task);
        if self.ready.push(thin).is_err() {
            // Ready queue is full: run it inline rather than drop it.
            let task = unsafe { from_thin_runnable(thin) };
            run_with_task_context(task);
        }
    }

    /// Binds this worker to the current OS thread and runs until stopped
    /// with an empty ready-queue, empty inbox, and no outstanding SQEs.
    pub fn run(&self) {
        CURRENT_WORKER.with(|cell| *cell.borrow_mut() = Some(self as *const Worker));
        self.arm_wake_poll();
        loop {
            let did_local_work = self.drain_ready_queue();
            let did_inbox_work = self.drain_inbox();

            if self.stop.is_stop_requested()
                && !did_local_work
                && !did_inbox_work
                && self.ready.is_empty()
                && self.outstanding.get() == 0
            {
                break;
            }

            if let Err(e) = self.ring.borrow().submit() {
                rio_log!(self.config, LogLevel::Error, "submit failed: {e}");
            }

            let want = if did_local_work || did_inbox_work { 0 } else { 1 };
            match self.ring.borrow().submit_and_wait(want) {
                Ok(_) => {}
                Err(e) => rio_log!(self.config, LogLevel::Error, "submit_and_wait failed: {e}"),
            }
            self.reap_completions();
        }
        CURRENT_WORKER.with(|cell| *cell.borrow_mut() = None);
    }

    /// Drains and runs whatever is on the ready-queue right now, without
    /// entering the blocking submit/reap loop. Exposed for task-type unit
    /// tests that want to drive a task to completion synchronously.
    #[doc(hidden)]
    pub fn run_ready_queue_once_for_test(&self) -> bool {
        CURRENT_WORKER.with(|cell| *cell.borrow_mut() = Some(self as *const Worker));
        let did_work = self.drain_ready_queue();
        CURRENT_WORKER.with(|cell| *cell.borrow_mut() = None);
        did_work
    }

    fn drain_ready_queue(&self) -> bool {
        let mut did_work = false;
        while let Some(thin) = self.ready.pop() {
            did_work = true;
            let task = unsafe { from_thin_runnable(thin) };
            run_with_task_context(task);
        }
        did_work
    }

    fn drain_inbox(&self) -> bool {
        let drained = self.inbox.drain();
        let did_work = !drained.is_empty();
        for thin in drained {
            if self.ready.push(thin).is_err() {
                let task = unsafe { from_thin_runnable(thin) };
                run_with_task_context(task);
            }
        }
        did_work
    }

    /// # Safety
    /// `entry`'s `user_data` must already be tagged; the memory it
    /// references must outlive the completion.
    pub unsafe fn submit_prepared(&self, entry: &squeue::Entry) {
        self.outstanding.set(self.outstanding.get() + 1);
        loop {
            match self.ring.borrow_mut().push(entry) {
                Ok(()) => break,
                Err(_) => {
                    let _ = self.ring.borrow().submit();
                    self.reap_completions();
                }
            }
        }
    }

    /// Issues `IORING_OP_ASYNC_CANCEL` against `target` (a previously
    /// submitted `user_data`).
    pub unsafe fn submit_cancel(&self, target: u64) {
        let entry = opcode::AsyncCancel::new(target)
            .build()
            .user_data(UserData::sentinel(Tag::Ignored).raw());
        self.submit_prepared(&entry);
    }

    /// One non-blocking submit + completion drain, used by a lazy-I/O
    /// future's `Drop` while it spin-waits on its own cancel.
    pub fn poll_submission_and_completion(&self) {
        let _ = self.ring.borrow().submit();
        self.reap_completions();
    }

    fn reap_completions(&self) {
        let count = self.ring.borrow_mut().for_each_cqe(|cqe| {
            let ud = UserData::from_raw(cqe.user_data());
            match ud.tag() {
                Tag::TaskInfoPtr | Tag::TaskInfoPtrLinkSqe => {
                    let info = unsafe { &*ud.payload_ptr::<crate::ops::TaskInfo>() };
                    info.complete(cqe.result());
                }
                Tag::TaskHandle | Tag::MsgRing => {
                    let thin = unsafe { ud.payload_ptr::<()>() };
                    let task = unsafe { from_thin_runnable(thin) };
                    self.schedule_local(task);
                }
                Tag::EventfdWake => {
                    self.inbox.drain_eventfd_counter();
                    self.wake_poll_armed.set(false);
                }
                Tag::Ignored => {}
            }
        });
        for _ in 0..count {
            self.outstanding.set(self.outstanding.get().saturating_sub(1));
        }
        if !self.wake_poll_armed.get() {
            self.arm_wake_poll();
        }
    }

    fn arm_wake_poll(&self) {
        if self.wake_poll_armed.get() {
            return;
        }
        let fd = self.inbox.as_raw_fd();
        let entry = opcode::PollAdd::new(types::Fd(fd), libc::POLLIN as u32)
            .build()
            .user_data(UserData::sentinel(Tag::EventfdWake).raw());
        unsafe { self.submit_prepared(&entry) };
        self.wake_poll_armed.set(true);
    }

    /// Pokes `target_ring_fd` via `IORING_OP_MSG_RING` so the peer observes
    /// a CQE without needing to separately poll its eventfd.
    fn nudge_via_msg_ring(&self, target_ring_fd: RawFd) {
        let entry = opcode::MsgRingData::new(
            types::Fd(target_ring_fd),
            0,
            UserData::sentinel(Tag::EventfdWake).raw(),
            None,
        )
        .build()
        .user_data(UserData::sentinel(Tag::Ignored).raw());
        unsafe { self.submit_prepared(&entry) };
    }
}

/// Schedules `task` on the worker `handle` refers to, taking the cheap
/// same-thread path (straight onto the local ready-queue) when the calling
/// thread already owns that worker, and the inbox/co-spawn path otherwise.
/// Used by a task's `Wake` impl, which doesn't know which thread woke it.
pub fn schedule(handle: &WorkerHandle, task: Arc<dyn Runnable + Send + Sync>) {
    let on_current = with_current_worker_opt(|w| w.id == handle.id).unwrap_or(false);
    if on_current {
        with_current_worker(|w| w.schedule_local(task));
    } else {
        handle.co_spawn(task);
    }
}

pub fn published_ring_fd_slot() -> Arc<AtomicI32> {
    Arc::new(AtomicI32::new(-1))
}

/// Process-wide counter handing out a unique id to each `Context` built,
/// since every context owns exactly one worker and contexts are otherwise
/// independent of one another (no shared pool to index into).
static NEXT_CONTEXT_ID: AtomicUsize = AtomicUsize::new(0);

pub fn next_context_id() -> usize {
    NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)
}
