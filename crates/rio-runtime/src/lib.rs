//! io_uring binding and single-threaded-per-worker executor.
//!
//! This crate owns everything that actually talks to the kernel: the ring
//! wrapper, the worker main loop, cross-worker task handoff, linked-SQE
//! composition, and the two coroutine task types. The platform-agnostic
//! data structures (`user_data` tagging, the ready-queue's SPSC ring, the
//! sync primitives, cancellation) live in `rio-core` and are re-exported
//! here for convenience.

pub mod config;
pub mod error;
pub mod inbox;
pub mod kernel_version;
pub mod link;
pub mod ops;
pub mod ring;
pub mod sched_ops;
pub mod task;
pub mod worker;

pub use config::{ContextConfig, InboxMode, LogLevel, RingFlags};
pub use error::{ContextError, JoinError, RingError, WorkerError};
pub use kernel_version::KernelVersion;
pub use link::Link;
pub use ring::Ring;
pub use sched_ops::{resume_on, who_am_i, yield_now, ContextId, ResumeOn, YieldNow};
pub use task::{spawn, spawn_shared, JoinHandle, SharedTask};
pub use worker::{next_context_id, published_ring_fd_slot, Runnable, Worker, WorkerHandle};

pub use rio_core::{CoreError, CoreResult, Tag, UserData};
