//! Platform-agnostic core types for the rio runtime.
//!
//! Nothing in this crate touches io_uring directly — that lives in `rio-runtime`.
//! This crate owns the pieces that are pure data structures and algorithms: the
//! `user_data` tagging scheme, the worker's SPSC ready-queue cursor, the
//! coroutine-facing synchronization primitives, the `all`/`any`/`some`
//! combinators, cooperative cancellation, and the hand-rolled error types each
//! of those areas returns.

pub mod combinators;
pub mod error;
pub mod spinlock;
pub mod spsc;
pub mod stop;
pub mod sync;
pub mod tag;

pub use error::{CoreError, CoreResult};
pub use spinlock::SpinLock;
pub use tag::{Tag, UserData};
