//! Cross-worker task handoff.
//!
//! Every worker owns one `Inbox`. A peer hands a runnable task to a worker
//! by pushing onto the guarded FIFO and then nudging the owner: with
//! [`InboxMode::EventFd`] that's a `write(2)` to an eventfd the owner keeps
//! armed via a re-submitted `IORING_OP_POLL_ADD`; with
//! [`InboxMode::MsgRing`] it's an `IORING_OP_MSG_RING` aimed at the owner's
//! ring fd, which lands a CQE there directly without the owner's loop
//! touching the eventfd at all.

use crate::config::InboxMode;
use rio_core::spinlock::SpinLock;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;

pub struct Inbox {
    queue: SpinLock<VecDeque<*const ()>>,
    eventfd: RawFd,
    mode: InboxMode,
}

unsafe impl Send for Inbox {}
unsafe impl Sync for Inbox {}

impl Inbox {
    pub fn new(mode: InboxMode) -> std::io::Result<Self> {
        let eventfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if eventfd < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Inbox {
            queue: SpinLock::new(VecDeque::new()),
            eventfd,
            mode,
        })
    }

    pub fn mode(&self) -> InboxMode {
        self.mode
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.eventfd
    }

    /// Hands a thin task pointer (see [`crate::worker::into_thin_runnable`])
    /// to this inbox's owner and wakes its eventfd. Safe to call from any
    /// thread; the owner is the sole consumer of the FIFO.
    pub fn push_and_ring_eventfd(&self, task: *const ()) {
        self.queue.lock().push_back(task);
        let one: u64 = 1;
        unsafe {
            libc::write(self.eventfd, &one as *const u64 as *const libc::c_void, 8);
        }
    }

    /// Same handoff without touching the eventfd — used when the caller
    /// will separately deliver an `IORING_OP_MSG_RING` doorbell.
    pub fn push_silent(&self, task: *const ()) {
        self.queue.lock().push_back(task);
    }

    pub fn drain(&self) -> Vec<*const ()> {
        let mut q = self.queue.lock();
        q.drain(..).collect()
    }

    /// Drains and discards the eventfd counter so the next `IORING_OP_POLL_ADD` re-arms cleanly.
    pub fn drain_eventfd_counter(&self) {
        let mut buf = [0u8; 8];
        unsafe {
            libc::read(self.eventfd, buf.as_mut_ptr() as *mut libc::c_void, 8);
        }
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.eventfd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_drain_roundtrip() {
        let inbox = Inbox::new(InboxMode::EventFd).unwrap();
        let a = 1usize as *const ();
        let b = 2usize as *const ();
        inbox.push_and_ring_eventfd(a);
        inbox.push_silent(b);
        let drained = inbox.drain();
        assert_eq!(drained, vec![a, b]);
        assert!(inbox.drain().is_empty());
    }
}
