//! Typed, panic-free wrapper over `io_uring::IoUring`.
//!
//! Keeps the worker's own submitted/outstanding bookkeeping separate from
//! the kernel ring itself; every `prep_*` helper lives in [`crate::ops`].

use crate::config::RingFlags;
use crate::error::RingError;
use io_uring::{cqueue, squeue, IoUring};
use std::os::unix::io::{AsRawFd, RawFd};

pub struct Ring {
    io_uring: IoUring,
}

impl Ring {
    pub fn new(entries: u32, flags: RingFlags) -> Result<Self, RingError> {
        let mut builder = IoUring::builder();
        if flags.sqpoll {
            builder.setup_sqpoll(1000);
        }
        if flags.iopoll {
            builder.setup_iopoll();
        }
        if flags.coop_taskrun {
            builder.setup_coop_taskrun();
        }
        if flags.single_issuer {
            builder.setup_single_issuer();
        }
        if flags.defer_taskrun {
            builder.setup_defer_taskrun();
        }
        let io_uring = builder.build(entries).map_err(RingError::Setup)?;
        Ok(Ring { io_uring })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.io_uring.as_raw_fd()
    }

    pub fn capacity(&self) -> usize {
        self.io_uring.params().sq_entries() as usize
    }

    /// Publish a prepared SQE. Callers are expected to have sized the ring
    /// so this never observes `RingError::Full` in steady state; it is kept
    /// fallible for the `try_*` testing entry points.
    ///
    /// # Safety
    /// `sqe` must reference memory (buffers, iovecs, paths, sockaddrs) that
    /// stays valid and unmoved until the kernel completes the operation.
    pub unsafe fn push(&mut self, sqe: &squeue::Entry) -> Result<(), RingError> {
        self.io_uring.submission().push(sqe).map_err(|_| RingError::Full)
    }

    pub fn submit(&self) -> Result<usize, RingError> {
        self.io_uring.submit().map_err(RingError::Submit)
    }

    pub fn submit_and_wait(&self, want: usize) -> Result<usize, RingError> {
        self.io_uring.submit_and_wait(want).map_err(RingError::Submit)
    }

    pub fn for_each_cqe(&mut self, mut f: impl FnMut(cqueue::Entry)) -> usize {
        let mut count = 0;
        let mut cq = self.io_uring.completion();
        cq.sync();
        for cqe in &mut cq {
            f(cqe);
            count += 1;
        }
        count
    }

    /// Best-effort: registers the ring fd with the kernel so each
    /// `io_uring_enter` avoids an `fdget`/`fdput` pair. Not every kernel
    /// supports this; failure here is not fatal to the ring.
    pub fn register_ring_fd(&mut self) -> Result<(), RingError> {
        self.io_uring
            .submitter()
            .register_ring_fd()
            .map_err(RingError::Setup)?;
        Ok(())
    }

    pub fn inner_mut(&mut self) -> &mut IoUring {
        &mut self.io_uring
    }
}
