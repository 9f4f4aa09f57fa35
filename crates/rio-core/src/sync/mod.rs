//! Coroutine-facing synchronization primitives.
//!
//! These do not block an OS thread: contending on any of them suspends the
//! calling `Future` and resumes it via `core::task::Waker` once the
//! primitive can make progress, so they compose with any executor, not just
//! this workspace's `rio-runtime` worker.

mod lifo;

pub mod channel;
pub mod condvar;
pub mod mutex;
pub mod semaphore;

pub use channel::{channel, Receiver, Sender};
pub use condvar::{wait_while, CondVar};
pub use mutex::{LockFuture, Mutex, MutexGuard};
pub use semaphore::{AcquireFuture, Semaphore};
