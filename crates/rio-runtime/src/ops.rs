//! Lazy I/O awaiters: one `Future` per opcode, generated from a small table
//! via [`define_io_op!`] rather than hand-copied — the catalog here covers
//! the opcodes `rio::io` exposes directly; adding another opcode is one more
//! macro invocation, not a new hand-written `Future` impl.

use crate::worker::with_current_worker;
use core::future::Future;
use core::pin::Pin;
use core::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use core::task::{Context, Poll, Waker};
use io_uring::{opcode, squeue, types};
use rio_core::spinlock::SpinLock;
use rio_core::tag::{Tag, UserData};

/// Completion slot an in-flight SQE's `user_data` points at. Heap-allocated
/// once at construction so its address is stable for as long as the kernel
/// might hold a pointer to it, regardless of whether the owning `Future` is
/// later moved.
pub struct TaskInfo {
    pub waker: SpinLock<Option<Waker>>,
    pub result: AtomicI64,
    pub ready: AtomicBool,
}

impl TaskInfo {
    fn new() -> Box<Self> {
        Box::new(TaskInfo {
            waker: SpinLock::new(None),
            result: AtomicI64::new(0),
            ready: AtomicBool::new(false),
        })
    }

    /// Called by the worker on the matching CQE.
    pub fn complete(&self, result: i32) {
        self.result.store(result as i64, Ordering::Release);
        self.ready.store(true, Ordering::Release);
        if let Some(w) = self.waker.lock().take() {
            w.wake();
        }
    }
}

/// Shared poll/submit bookkeeping every per-opcode awaiter delegates to.
pub struct IoState {
    task_info: Box<TaskInfo>,
    submitted: bool,
    pub(crate) link: bool,
    pub(crate) async_flag: bool,
    /// Set by the `_direct`-suffixed constructors below: `IOSQE_FIXED_FILE`,
    /// so `close_direct`'s `fd` field is read as a registered-file-table
    /// index rather than a raw fd.
    pub(crate) fixed_file: bool,
}

impl IoState {
    fn new() -> Self {
        IoState {
            task_info: TaskInfo::new(),
            submitted: false,
            link: false,
            async_flag: false,
            fixed_file: false,
        }
    }

    pub fn user_data_ptr(&self) -> *const TaskInfo {
        &*self.task_info
    }

    fn poll_with(&mut self, cx: &mut Context<'_>, build: impl FnOnce() -> squeue::Entry) -> Poll<i32> {
        if !self.submitted {
            let mut entry = build();
            let mut flags = squeue::Flags::empty();
            if self.link {
                flags |= squeue::Flags::IO_LINK;
            }
            if self.async_flag {
                flags |= squeue::Flags::ASYNC;
            }
            if self.fixed_file {
                flags |= squeue::Flags::FIXED_FILE;
            }
            entry = entry.flags(flags);
            let tag = if self.link { Tag::TaskInfoPtrLinkSqe } else { Tag::TaskInfoPtr };
            entry = entry.user_data(UserData::pack_ptr(self.user_data_ptr(), tag).raw());
            *self.task_info.waker.lock() = Some(cx.waker().clone());
            with_current_worker(|w| unsafe { w.submit_prepared(&entry) });
            self.submitted = true;
            return Poll::Pending;
        }
        if self.task_info.ready.load(Ordering::Acquire) {
            return Poll::Ready(self.task_info.result.load(Ordering::Acquire) as i32);
        }
        *self.task_info.waker.lock() = Some(cx.waker().clone());
        Poll::Pending
    }

    /// Issues `IORING_OP_ASYNC_CANCEL` against this op's own `user_data` and
    /// spin-waits (bounded) for the kernel's acknowledgement. Called from a
    /// lazy-I/O future's `Drop` when it is abandoned mid-flight, so the
    /// kernel never writes through a pointer into memory that is about to
    /// be freed.
    fn cancel_and_wait_if_inflight(&mut self) {
        if !self.submitted || self.task_info.ready.load(Ordering::Acquire) {
            return;
        }
        let target = UserData::pack_ptr(self.user_data_ptr(), Tag::TaskInfoPtr).raw();
        with_current_worker(|w| unsafe { w.submit_cancel(target) });
        let mut spins: u32 = 0;
        while !self.task_info.ready.load(Ordering::Acquire) {
            with_current_worker(|w| w.poll_submission_and_completion());
            spins += 1;
            if spins > 1_000_000 {
                eprintln!("rio: giving up waiting for cancel acknowledgement, leaking task_info");
                break;
            }
            core::hint::spin_loop();
        }
    }
}

macro_rules! define_io_op {
    (
        $(#[$meta:meta])*
        pub struct $name:ident<$lt:lifetime> { $($field:ident : $ty:ty),* $(,)? }
        build(&$self_:ident) -> squeue::Entry $body:block
    ) => {
        $(#[$meta])*
        pub struct $name<$lt> {
            state: IoState,
            $($field: $ty,)*
            _marker: core::marker::PhantomData<&$lt ()>,
        }

        impl<$lt> $name<$lt> {
            /// Marks the SQE `IOSQE_ASYNC`: always hand this op to an io-wq
            /// worker instead of attempting non-blocking inline completion first.
            pub fn set_async(mut self) -> Self {
                self.state.async_flag = true;
                self
            }
        }

        impl<$lt> Future for $name<$lt> {
            type Output = i32;
            fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<i32> {
                let $self_ = unsafe { self.get_unchecked_mut() };
                $self_.state.poll_with(cx, || $body)
            }
        }

        impl<$lt> Drop for $name<$lt> {
            fn drop(&mut self) {
                self.state.cancel_and_wait_if_inflight();
            }
        }
    };
}

define_io_op! {
    pub struct Read<'a> { fd: i32, buf: *mut u8, len: u32, offset: u64 }
    build(&self) -> squeue::Entry {
        opcode::Read::new(types::Fd(self.fd), self.buf, self.len).offset(self.offset).build()
    }
}

pub fn read<'a>(fd: i32, buf: &'a mut [u8], offset: u64) -> Read<'a> {
    Read {
        state: IoState::new(),
        fd,
        buf: buf.as_mut_ptr(),
        len: buf.len() as u32,
        offset,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Write<'a> { fd: i32, buf: *const u8, len: u32, offset: u64 }
    build(&self) -> squeue::Entry {
        opcode::Write::new(types::Fd(self.fd), self.buf, self.len).offset(self.offset).build()
    }
}

pub fn write<'a>(fd: i32, buf: &'a [u8], offset: u64) -> Write<'a> {
    Write {
        state: IoState::new(),
        fd,
        buf: buf.as_ptr(),
        len: buf.len() as u32,
        offset,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Accept<'a> { fd: i32, addr: *mut libc::sockaddr, addrlen: *mut libc::socklen_t, flags: i32 }
    build(&self) -> squeue::Entry {
        opcode::Accept::new(types::Fd(self.fd), self.addr, self.addrlen).flags(self.flags).build()
    }
}

pub fn accept<'a>(fd: i32, flags: i32) -> Accept<'a> {
    Accept {
        state: IoState::new(),
        fd,
        addr: core::ptr::null_mut(),
        addrlen: core::ptr::null_mut(),
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Connect<'a> { fd: i32, addr: *const libc::sockaddr, addrlen: libc::socklen_t }
    build(&self) -> squeue::Entry {
        opcode::Connect::new(types::Fd(self.fd), self.addr, self.addrlen).build()
    }
}

pub fn connect<'a>(fd: i32, addr: &'a libc::sockaddr, addrlen: libc::socklen_t) -> Connect<'a> {
    Connect {
        state: IoState::new(),
        fd,
        addr: addr as *const _,
        addrlen,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Send<'a> { fd: i32, buf: *const u8, len: u32, flags: i32 }
    build(&self) -> squeue::Entry {
        opcode::Send::new(types::Fd(self.fd), self.buf, self.len).flags(self.flags).build()
    }
}

pub fn send<'a>(fd: i32, buf: &'a [u8], flags: i32) -> Send<'a> {
    Send {
        state: IoState::new(),
        fd,
        buf: buf.as_ptr(),
        len: buf.len() as u32,
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Recv<'a> { fd: i32, buf: *mut u8, len: u32, flags: i32 }
    build(&self) -> squeue::Entry {
        opcode::Recv::new(types::Fd(self.fd), self.buf, self.len).flags(self.flags).build()
    }
}

pub fn recv<'a>(fd: i32, buf: &'a mut [u8], flags: i32) -> Recv<'a> {
    Recv {
        state: IoState::new(),
        fd,
        buf: buf.as_mut_ptr(),
        len: buf.len() as u32,
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Close<'a> { fd: i32 }
    build(&self) -> squeue::Entry {
        opcode::Close::new(types::Fd(self.fd)).build()
    }
}

pub fn close<'a>(fd: i32) -> Close<'a> {
    Close {
        state: IoState::new(),
        fd,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Shutdown<'a> { fd: i32, how: i32 }
    build(&self) -> squeue::Entry {
        opcode::Shutdown::new(types::Fd(self.fd), self.how).build()
    }
}

pub fn shutdown<'a>(fd: i32, how: i32) -> Shutdown<'a> {
    Shutdown {
        state: IoState::new(),
        fd,
        how,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Fsync<'a> { fd: i32, datasync: bool }
    build(&self) -> squeue::Entry {
        let mut op = opcode::Fsync::new(types::Fd(self.fd));
        if self.datasync {
            op = op.flags(types::FsyncFlags::DATASYNC);
        }
        op.build()
    }
}

pub fn fsync<'a>(fd: i32, datasync: bool) -> Fsync<'a> {
    Fsync {
        state: IoState::new(),
        fd,
        datasync,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Statx<'a> { dirfd: i32, path: *const libc::c_char, flags: i32, mask: u32, buf: *mut types::statx }
    build(&self) -> squeue::Entry {
        opcode::Statx::new(types::Fd(self.dirfd), self.path, self.buf).flags(self.flags).mask(self.mask).build()
    }
}

pub fn statx<'a>(
    dirfd: i32,
    path: &'a std::ffi::CStr,
    flags: i32,
    mask: u32,
    buf: &'a mut types::statx,
) -> Statx<'a> {
    Statx {
        state: IoState::new(),
        dirfd,
        path: path.as_ptr(),
        flags,
        mask,
        buf: buf as *mut _,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct OpenAt<'a> { dirfd: i32, path: *const libc::c_char, flags: i32, mode: u32 }
    build(&self) -> squeue::Entry {
        opcode::OpenAt::new(types::Fd(self.dirfd), self.path).flags(self.flags).mode(self.mode).build()
    }
}

pub fn openat<'a>(dirfd: i32, path: &'a std::ffi::CStr, flags: i32, mode: u32) -> OpenAt<'a> {
    OpenAt {
        state: IoState::new(),
        dirfd,
        path: path.as_ptr(),
        flags,
        mode,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Splice<'a> { fd_in: i32, off_in: i64, fd_out: i32, off_out: i64, len: u32, flags: u32 }
    build(&self) -> squeue::Entry {
        opcode::Splice::new(types::Fd(self.fd_in), self.off_in, types::Fd(self.fd_out), self.off_out, self.len)
            .flags(self.flags)
            .build()
    }
}

pub fn splice<'a>(fd_in: i32, off_in: i64, fd_out: i32, off_out: i64, len: u32, flags: u32) -> Splice<'a> {
    Splice {
        state: IoState::new(),
        fd_in,
        off_in,
        fd_out,
        off_out,
        len,
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Nop<'a> {}
    build(&self) -> squeue::Entry {
        opcode::Nop::new().build()
    }
}

pub fn nop<'a>() -> Nop<'a> {
    Nop {
        state: IoState::new(),
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Readv<'a> { fd: i32, iov: *const libc::iovec, iovcnt: u32, offset: u64 }
    build(&self) -> squeue::Entry {
        opcode::Readv::new(types::Fd(self.fd), self.iov, self.iovcnt).offset(self.offset).build()
    }
}

/// Scatter-read into `iov` starting at `offset` (or the file's current
/// position when `offset == u64::MAX`), mirroring `preadv2`.
pub fn readv<'a>(fd: i32, iov: &'a [libc::iovec], offset: u64) -> Readv<'a> {
    Readv {
        state: IoState::new(),
        fd,
        iov: iov.as_ptr(),
        iovcnt: iov.len() as u32,
        offset,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Writev<'a> { fd: i32, iov: *const libc::iovec, iovcnt: u32, offset: u64 }
    build(&self) -> squeue::Entry {
        opcode::Writev::new(types::Fd(self.fd), self.iov, self.iovcnt).offset(self.offset).build()
    }
}

pub fn writev<'a>(fd: i32, iov: &'a [libc::iovec], offset: u64) -> Writev<'a> {
    Writev {
        state: IoState::new(),
        fd,
        iov: iov.as_ptr(),
        iovcnt: iov.len() as u32,
        offset,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct ReadFixed<'a> { fd: i32, buf: *mut u8, len: u32, offset: u64, buf_index: u16 }
    build(&self) -> squeue::Entry {
        opcode::ReadFixed::new(types::Fd(self.fd), self.buf, self.len, self.buf_index)
            .offset(self.offset)
            .build()
    }
}

/// Reads into a kernel-registered buffer (`buf_index` into the table passed
/// to `Ring::register_buffers`), skipping the usual copy into a pinned
/// userspace region the kernel has to fault in fresh each time.
pub fn read_fixed<'a>(fd: i32, buf: &'a mut [u8], offset: u64, buf_index: u16) -> ReadFixed<'a> {
    ReadFixed {
        state: IoState::new(),
        fd,
        buf: buf.as_mut_ptr(),
        len: buf.len() as u32,
        offset,
        buf_index,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct WriteFixed<'a> { fd: i32, buf: *const u8, len: u32, offset: u64, buf_index: u16 }
    build(&self) -> squeue::Entry {
        opcode::WriteFixed::new(types::Fd(self.fd), self.buf, self.len, self.buf_index)
            .offset(self.offset)
            .build()
    }
}

pub fn write_fixed<'a>(fd: i32, buf: &'a [u8], offset: u64, buf_index: u16) -> WriteFixed<'a> {
    WriteFixed {
        state: IoState::new(),
        fd,
        buf: buf.as_ptr(),
        len: buf.len() as u32,
        offset,
        buf_index,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct SendMsg<'a> { fd: i32, msg: *const libc::msghdr, flags: u32 }
    build(&self) -> squeue::Entry {
        opcode::SendMsg::new(types::Fd(self.fd), self.msg).flags(self.flags).build()
    }
}

pub fn sendmsg<'a>(fd: i32, msg: &'a libc::msghdr, flags: u32) -> SendMsg<'a> {
    SendMsg {
        state: IoState::new(),
        fd,
        msg: msg as *const _,
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct RecvMsg<'a> { fd: i32, msg: *mut libc::msghdr, flags: u32 }
    build(&self) -> squeue::Entry {
        opcode::RecvMsg::new(types::Fd(self.fd), self.msg).flags(self.flags).build()
    }
}

pub fn recvmsg<'a>(fd: i32, msg: &'a mut libc::msghdr, flags: u32) -> RecvMsg<'a> {
    RecvMsg {
        state: IoState::new(),
        fd,
        msg: msg as *mut _,
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct SendZc<'a> { fd: i32, buf: *const u8, len: u32, flags: i32, zc_flags: u16 }
    build(&self) -> squeue::Entry {
        opcode::SendZc::new(types::Fd(self.fd), self.buf, self.len)
            .flags(self.flags)
            .ioprio(self.zc_flags)
            .build()
    }
}

/// Zero-copy send (kernel pins `buf` directly instead of bouncing through an
/// internal copy); the caller must keep `buf` alive and unmodified until the
/// future resolves, which this signature enforces via the borrow.
pub fn send_zc<'a>(fd: i32, buf: &'a [u8], flags: i32) -> SendZc<'a> {
    SendZc {
        state: IoState::new(),
        fd,
        buf: buf.as_ptr(),
        len: buf.len() as u32,
        flags,
        zc_flags: 0,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct SendMsgZc<'a> { fd: i32, msg: *const libc::msghdr, flags: u32 }
    build(&self) -> squeue::Entry {
        opcode::SendMsgZc::new(types::Fd(self.fd), self.msg).flags(self.flags).build()
    }
}

pub fn sendmsg_zc<'a>(fd: i32, msg: &'a libc::msghdr, flags: u32) -> SendMsgZc<'a> {
    SendMsgZc {
        state: IoState::new(),
        fd,
        msg: msg as *const _,
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct OpenAt2<'a> { dirfd: i32, path: *const libc::c_char, how: *const types::OpenHow }
    build(&self) -> squeue::Entry {
        opcode::OpenAt2::new(types::Fd(self.dirfd), self.path, self.how).build()
    }
}

pub fn openat2<'a>(dirfd: i32, path: &'a std::ffi::CStr, how: &'a types::OpenHow) -> OpenAt2<'a> {
    OpenAt2 {
        state: IoState::new(),
        dirfd,
        path: path.as_ptr(),
        how: how as *const _,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Fallocate<'a> { fd: i32, mode: i32, offset: u64, len: u64 }
    build(&self) -> squeue::Entry {
        opcode::Fallocate::new(types::Fd(self.fd), self.len).offset(self.offset).mode(self.mode).build()
    }
}

pub fn fallocate<'a>(fd: i32, mode: i32, offset: u64, len: u64) -> Fallocate<'a> {
    Fallocate {
        state: IoState::new(),
        fd,
        mode,
        offset,
        len,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Fadvise<'a> { fd: i32, offset: u64, len: u32, advice: i32 }
    build(&self) -> squeue::Entry {
        opcode::Fadvise::new(types::Fd(self.fd), self.len as u64, self.advice).offset(self.offset).build()
    }
}

pub fn fadvise<'a>(fd: i32, offset: u64, len: u32, advice: i32) -> Fadvise<'a> {
    Fadvise {
        state: IoState::new(),
        fd,
        offset,
        len,
        advice,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Madvise<'a> { addr: *mut u8, len: u32, advice: i32 }
    build(&self) -> squeue::Entry {
        opcode::Madvise::new(self.addr, self.len as _, self.advice).build()
    }
}

pub fn madvise<'a>(addr: &'a mut [u8], advice: i32) -> Madvise<'a> {
    Madvise {
        state: IoState::new(),
        addr: addr.as_mut_ptr(),
        len: addr.len() as u32,
        advice,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct PollAdd<'a> { fd: i32, mask: u32 }
    build(&self) -> squeue::Entry {
        opcode::PollAdd::new(types::Fd(self.fd), self.mask).build()
    }
}

pub fn poll_add<'a>(fd: i32, mask: u32) -> PollAdd<'a> {
    PollAdd {
        state: IoState::new(),
        fd,
        mask,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct PollRemove<'a> { target_user_data: u64 }
    build(&self) -> squeue::Entry {
        opcode::PollRemove::new(self.target_user_data).build()
    }
}

/// Cancels a previously submitted `poll_add` identified by the raw
/// `user_data` its future packed (`UserData::raw()` on its `TaskInfo`
/// pointer) — obtainable via [`IoState::user_data_ptr`] through the
/// `who_am_i`-style accessor each awaiter would expose in a fuller binding.
pub fn poll_remove<'a>(target_user_data: u64) -> PollRemove<'a> {
    PollRemove {
        state: IoState::new(),
        target_user_data,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct PollUpdate<'a> { old_user_data: u64, new_user_data: u64, flags: u32 }
    build(&self) -> squeue::Entry {
        opcode::PollAddMulti::new(self.old_user_data, self.new_user_data, self.new_user_data as u32)
            .flags(self.flags)
            .build()
    }
}

pub fn poll_update<'a>(old_user_data: u64, new_mask: u32, flags: u32) -> PollUpdate<'a> {
    PollUpdate {
        state: IoState::new(),
        old_user_data,
        new_user_data: new_mask as u64,
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Timeout<'a> { ts: *const types::Timespec, flags: u32 }
    build(&self) -> squeue::Entry {
        opcode::Timeout::new(self.ts).flags(types::TimeoutFlags::from_bits_truncate(self.flags)).build()
    }
}

/// A standalone timer. `flags` carries `IORING_TIMEOUT_BOOTTIME`/`_ABS`/
/// `_REALTIME`/`_ETIME_SUCCESS` per §4.5's numeric-semantics rules; the
/// `rio::io::timeout`/`timeout_at` wrapper functions compute `ts`/`flags`
/// from a `Duration`/`Instant`/`SystemTime` and call this directly.
pub fn timeout<'a>(ts: &'a types::Timespec, flags: u32) -> Timeout<'a> {
    Timeout {
        state: IoState::new(),
        ts: ts as *const _,
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct TimeoutRemove<'a> { target_user_data: u64 }
    build(&self) -> squeue::Entry {
        opcode::TimeoutRemove::new(self.target_user_data).build()
    }
}

pub fn timeout_remove<'a>(target_user_data: u64) -> TimeoutRemove<'a> {
    TimeoutRemove {
        state: IoState::new(),
        target_user_data,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct TimeoutUpdate<'a> { target_user_data: u64, ts: *const types::Timespec, flags: u32 }
    build(&self) -> squeue::Entry {
        opcode::TimeoutUpdate::new(self.target_user_data)
            .ts(self.ts)
            .flags(types::TimeoutFlags::from_bits_truncate(self.flags))
            .build()
    }
}

pub fn timeout_update<'a>(target_user_data: u64, ts: &'a types::Timespec, flags: u32) -> TimeoutUpdate<'a> {
    TimeoutUpdate {
        state: IoState::new(),
        target_user_data,
        ts: ts as *const _,
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct LinkTimeout<'a> { ts: *const types::Timespec, flags: u32 }
    build(&self) -> squeue::Entry {
        opcode::LinkTimeout::new(self.ts).flags(types::TimeoutFlags::from_bits_truncate(self.flags)).build()
    }
}

/// Never awaited directly: `crate::link` appends this after the wrapped op's
/// SQE when a linked-timeout chain is built, per §4.6.
pub fn link_timeout<'a>(ts: &'a types::Timespec, flags: u32) -> LinkTimeout<'a> {
    LinkTimeout {
        state: IoState::new(),
        ts: ts as *const _,
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct FilesUpdate<'a> { fds: *const i32, len: u32, offset: i32 }
    build(&self) -> squeue::Entry {
        opcode::FilesUpdate::new(self.fds, self.len, self.offset).build()
    }
}

pub fn files_update<'a>(fds: &'a [i32], offset: i32) -> FilesUpdate<'a> {
    FilesUpdate {
        state: IoState::new(),
        fds: fds.as_ptr(),
        len: fds.len() as u32,
        offset,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct EpollCtl<'a> { epfd: i32, fd: i32, op: i32, ev: *const types::epoll_event }
    build(&self) -> squeue::Entry {
        opcode::EpollCtl::new(types::Fd(self.epfd), types::Fd(self.fd), self.op, self.ev).build()
    }
}

pub fn epoll_ctl<'a>(epfd: i32, fd: i32, op: i32, ev: &'a types::epoll_event) -> EpollCtl<'a> {
    EpollCtl {
        state: IoState::new(),
        epfd,
        fd,
        op,
        ev: ev as *const _,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct ProvideBuffers<'a> { addr: *mut u8, len: i32, nbufs: u16, bgid: u16, bid: u16 }
    build(&self) -> squeue::Entry {
        opcode::ProvideBuffers::new(self.addr, self.len, self.nbufs, self.bgid, self.bid).build()
    }
}

/// Registers a contiguous region as `nbufs` kernel-managed buffers in group
/// `bgid`, for use with `recv`/`read` variants that pick a buffer
/// automatically (`IOSQE_BUFFER_SELECT`).
pub fn provide_buffers<'a>(region: &'a mut [u8], nbufs: u16, bgid: u16, bid: u16) -> ProvideBuffers<'a> {
    ProvideBuffers {
        state: IoState::new(),
        addr: region.as_mut_ptr(),
        len: (region.len() / nbufs.max(1) as usize) as i32,
        nbufs,
        bgid,
        bid,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct RemoveBuffers<'a> { nbufs: u16, bgid: u16 }
    build(&self) -> squeue::Entry {
        opcode::RemoveBuffers::new(self.nbufs, self.bgid).build()
    }
}

pub fn remove_buffers<'a>(nbufs: u16, bgid: u16) -> RemoveBuffers<'a> {
    RemoveBuffers {
        state: IoState::new(),
        nbufs,
        bgid,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct UnlinkAt<'a> { dirfd: i32, path: *const libc::c_char, flags: i32 }
    build(&self) -> squeue::Entry {
        opcode::UnlinkAt::new(types::Fd(self.dirfd), self.path).flags(self.flags).build()
    }
}

pub fn unlinkat<'a>(dirfd: i32, path: &'a std::ffi::CStr, flags: i32) -> UnlinkAt<'a> {
    UnlinkAt {
        state: IoState::new(),
        dirfd,
        path: path.as_ptr(),
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct RenameAt<'a> {
        olddirfd: i32, oldpath: *const libc::c_char,
        newdirfd: i32, newpath: *const libc::c_char,
        flags: u32
    }
    build(&self) -> squeue::Entry {
        opcode::RenameAt::new(
            types::Fd(self.olddirfd), self.oldpath,
            types::Fd(self.newdirfd), self.newpath,
        ).flags(self.flags).build()
    }
}

pub fn renameat<'a>(
    olddirfd: i32,
    oldpath: &'a std::ffi::CStr,
    newdirfd: i32,
    newpath: &'a std::ffi::CStr,
    flags: u32,
) -> RenameAt<'a> {
    RenameAt {
        state: IoState::new(),
        olddirfd,
        oldpath: oldpath.as_ptr(),
        newdirfd,
        newpath: newpath.as_ptr(),
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct MkDirAt<'a> { dirfd: i32, path: *const libc::c_char, mode: u32 }
    build(&self) -> squeue::Entry {
        opcode::MkDirAt::new(types::Fd(self.dirfd), self.path).mode(self.mode).build()
    }
}

pub fn mkdirat<'a>(dirfd: i32, path: &'a std::ffi::CStr, mode: u32) -> MkDirAt<'a> {
    MkDirAt {
        state: IoState::new(),
        dirfd,
        path: path.as_ptr(),
        mode,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct SymlinkAt<'a> { target: *const libc::c_char, newdirfd: i32, linkpath: *const libc::c_char }
    build(&self) -> squeue::Entry {
        opcode::SymlinkAt::new(self.target, types::Fd(self.newdirfd), self.linkpath).build()
    }
}

pub fn symlinkat<'a>(target: &'a std::ffi::CStr, newdirfd: i32, linkpath: &'a std::ffi::CStr) -> SymlinkAt<'a> {
    SymlinkAt {
        state: IoState::new(),
        target: target.as_ptr(),
        newdirfd,
        linkpath: linkpath.as_ptr(),
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct LinkAt<'a> {
        olddirfd: i32, oldpath: *const libc::c_char,
        newdirfd: i32, newpath: *const libc::c_char,
        flags: i32
    }
    build(&self) -> squeue::Entry {
        opcode::LinkAt::new(
            types::Fd(self.olddirfd), self.oldpath,
            types::Fd(self.newdirfd), self.newpath,
        ).flags(self.flags).build()
    }
}

pub fn linkat<'a>(
    olddirfd: i32,
    oldpath: &'a std::ffi::CStr,
    newdirfd: i32,
    newpath: &'a std::ffi::CStr,
    flags: i32,
) -> LinkAt<'a> {
    LinkAt {
        state: IoState::new(),
        olddirfd,
        oldpath: oldpath.as_ptr(),
        newdirfd,
        newpath: newpath.as_ptr(),
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct SyncFileRange<'a> { fd: i32, len: u32, offset: u64, flags: i32 }
    build(&self) -> squeue::Entry {
        opcode::SyncFileRange::new(types::Fd(self.fd), self.len).offset(self.offset).flags(self.flags as u32).build()
    }
}

pub fn sync_file_range<'a>(fd: i32, offset: u64, len: u32, flags: i32) -> SyncFileRange<'a> {
    SyncFileRange {
        state: IoState::new(),
        fd,
        len,
        offset,
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Tee<'a> { fd_in: i32, fd_out: i32, len: u32, flags: u32 }
    build(&self) -> squeue::Entry {
        opcode::Tee::new(types::Fd(self.fd_in), types::Fd(self.fd_out), self.len).flags(self.flags).build()
    }
}

pub fn tee<'a>(fd_in: i32, fd_out: i32, len: u32, flags: u32) -> Tee<'a> {
    Tee {
        state: IoState::new(),
        fd_in,
        fd_out,
        len,
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Socket<'a> { domain: i32, ty: i32, protocol: i32, flags: u32 }
    build(&self) -> squeue::Entry {
        opcode::Socket::new(self.domain, self.ty, self.protocol).flags(self.flags).build()
    }
}

pub fn socket<'a>(domain: i32, ty: i32, protocol: i32) -> Socket<'a> {
    Socket {
        state: IoState::new(),
        domain,
        ty,
        protocol,
        flags: 0,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct GetXattr<'a> {
        name: *const libc::c_char, value: *mut u8, len: u32, path: *const libc::c_char
    }
    build(&self) -> squeue::Entry {
        opcode::GetXattr::new(self.name, self.value, self.len, self.path).build()
    }
}

pub fn getxattr<'a>(path: &'a std::ffi::CStr, name: &'a std::ffi::CStr, value: &'a mut [u8]) -> GetXattr<'a> {
    GetXattr {
        state: IoState::new(),
        name: name.as_ptr(),
        value: value.as_mut_ptr(),
        len: value.len() as u32,
        path: path.as_ptr(),
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct SetXattr<'a> {
        name: *const libc::c_char, value: *const u8, len: u32, path: *const libc::c_char, flags: i32
    }
    build(&self) -> squeue::Entry {
        opcode::SetXattr::new(self.name, self.value, self.len, self.path).flags(self.flags).build()
    }
}

pub fn setxattr<'a>(
    path: &'a std::ffi::CStr,
    name: &'a std::ffi::CStr,
    value: &'a [u8],
    flags: i32,
) -> SetXattr<'a> {
    SetXattr {
        state: IoState::new(),
        name: name.as_ptr(),
        value: value.as_ptr(),
        len: value.len() as u32,
        path: path.as_ptr(),
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct FGetXattr<'a> { fd: i32, name: *const libc::c_char, value: *mut u8, len: u32 }
    build(&self) -> squeue::Entry {
        opcode::FGetXattr::new(types::Fd(self.fd), self.name, self.value, self.len).build()
    }
}

pub fn fgetxattr<'a>(fd: i32, name: &'a std::ffi::CStr, value: &'a mut [u8]) -> FGetXattr<'a> {
    FGetXattr {
        state: IoState::new(),
        fd,
        name: name.as_ptr(),
        value: value.as_mut_ptr(),
        len: value.len() as u32,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct FSetXattr<'a> { fd: i32, name: *const libc::c_char, value: *const u8, len: u32, flags: i32 }
    build(&self) -> squeue::Entry {
        opcode::FSetXattr::new(types::Fd(self.fd), self.name, self.value, self.len).flags(self.flags).build()
    }
}

pub fn fsetxattr<'a>(fd: i32, name: &'a std::ffi::CStr, value: &'a [u8], flags: i32) -> FSetXattr<'a> {
    FSetXattr {
        state: IoState::new(),
        fd,
        name: name.as_ptr(),
        value: value.as_ptr(),
        len: value.len() as u32,
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct Cancel<'a> { target_user_data: u64, flags: i32 }
    build(&self) -> squeue::Entry {
        opcode::AsyncCancel::new(self.target_user_data).flags(self.flags).build()
    }
}

/// Cancels the in-flight op whose SQE carries `target_user_data` (read off
/// an awaiter's `TaskInfo` address via its internal tagging, surfaced to
/// callers through `rio::io::who_am_i` on the future being cancelled).
pub fn cancel<'a>(target_user_data: u64) -> Cancel<'a> {
    Cancel {
        state: IoState::new(),
        target_user_data,
        flags: 0,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct CancelFd<'a> { fd: i32, flags: i32 }
    build(&self) -> squeue::Entry {
        opcode::AsyncCancel::new(0)
            .fd(types::Fd(self.fd))
            .flags(self.flags | libc::IORING_ASYNC_CANCEL_FD)
            .build()
    }
}

/// Cancels every in-flight op on `fd` (`IORING_ASYNC_CANCEL_FD`).
pub fn cancel_fd<'a>(fd: i32, flags: i32) -> CancelFd<'a> {
    CancelFd {
        state: IoState::new(),
        fd,
        flags,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct MsgRingOp<'a> { target_fd: i32, msg: u64, tag: u64 }
    build(&self) -> squeue::Entry {
        opcode::MsgRingData::new(types::Fd(self.target_fd), self.msg as i32, self.tag, None).build()
    }
}

/// Posts a `user_data`-only CQE (`self.tag`) onto another ring without
/// submitting any I/O — the public surface for §4.3's peer-to-peer wakeup
/// mechanism, usable directly by application code (not just the runtime's
/// own co-spawn inbox).
pub fn msg_ring<'a>(target_fd: i32, msg: u64, tag: u64) -> MsgRingOp<'a> {
    MsgRingOp {
        state: IoState::new(),
        target_fd,
        msg,
        tag,
        _marker: core::marker::PhantomData,
    }
}

/// `.link(other)`: ties two lazy-I/O futures together with `IOSQE_IO_LINK`,
/// see [`crate::link`] for the composition type this returns.
impl<'a> Read<'a> {
    pub fn link<Other>(mut self, other: Other) -> crate::link::Link<Self, Other> {
        self.state.link = true;
        crate::link::Link::new(self, other)
    }
}

/// Generalizes `.link(other)` to every opcode in this module rather than
/// hand-writing the same `impl` block once per type, per the opcode-catalog
/// design note (§9): one macro invocation lists every awaiter type that gets
/// a `.link()` method, instead of copying the block above 40 times.
macro_rules! impl_link_for {
    ($($ty:ident),* $(,)?) => {
        $(
            impl<'a> $ty<'a> {
                pub fn link<Other>(mut self, other: Other) -> crate::link::Link<Self, Other> {
                    self.state.link = true;
                    crate::link::Link::new(self, other)
                }
            }
        )*
    };
}

impl_link_for!(
    Write, Readv, Writev, ReadFixed, WriteFixed, Send, Recv, SendMsg, RecvMsg, SendZc, SendMsgZc,
    Accept, Connect, Close, Shutdown, OpenAt, OpenAt2, Statx, Fsync, Fallocate, Fadvise, Madvise,
    Splice, Tee, Socket, UnlinkAt, RenameAt, MkDirAt, SymlinkAt, LinkAt, SyncFileRange,
    GetXattr, SetXattr, FGetXattr, FSetXattr, Nop, AcceptDirect, OpenAtDirect, SocketDirect,
    CloseDirect,
);

// --- Direct-descriptor (registered file table) variants ---
//
// `accept`/`openat`/`socket` normally hand back a process-table fd. Passing
// `.file_index(Some(slot))` on the same SQE instead installs the new file
// straight into the ring's registered-file table and the completion's
// `res` is the table index, not an fd — skips one `fcntl`-class syscall
// later for every op addressed against it via `IOSQE_FIXED_FILE`.
// `close_direct` is the inverse: an ordinary `Close` SQE with
// `IOSQE_FIXED_FILE` set so its `fd` field is read as that table index.

define_io_op! {
    pub struct AcceptDirect<'a> { fd: i32, flags: i32, slot: types::DestinationSlot }
    build(&self) -> squeue::Entry {
        opcode::Accept::new(types::Fd(self.fd), core::ptr::null_mut(), core::ptr::null_mut())
            .flags(self.flags)
            .file_index(Some(self.slot))
            .build()
    }
}

/// Accepts a connection directly into the registered-file table at an
/// auto-allocated slot; the completion's result is that slot's index.
pub fn accept_direct<'a>(fd: i32, flags: i32) -> AcceptDirect<'a> {
    AcceptDirect {
        state: IoState::new(),
        fd,
        flags,
        slot: types::DestinationSlot::auto_target(),
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct CloseDirect<'a> { index: u32 }
    build(&self) -> squeue::Entry {
        opcode::Close::new(types::Fd(self.index as i32)).build()
    }
}

/// Closes a previously-installed direct descriptor (a registered-file-table
/// index, not a process fd).
pub fn close_direct<'a>(index: u32) -> CloseDirect<'a> {
    let mut state = IoState::new();
    state.fixed_file = true;
    CloseDirect {
        state,
        index,
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct OpenAtDirect<'a> { dirfd: i32, path: *const libc::c_char, flags: i32, mode: u32, slot: types::DestinationSlot }
    build(&self) -> squeue::Entry {
        opcode::OpenAt::new(types::Fd(self.dirfd), self.path)
            .flags(self.flags)
            .mode(self.mode)
            .file_index(Some(self.slot))
            .build()
    }
}

/// Opens `path` directly into the registered-file table at an
/// auto-allocated slot.
pub fn openat_direct<'a>(dirfd: i32, path: &'a std::ffi::CStr, flags: i32, mode: u32) -> OpenAtDirect<'a> {
    OpenAtDirect {
        state: IoState::new(),
        dirfd,
        path: path.as_ptr(),
        flags,
        mode,
        slot: types::DestinationSlot::auto_target(),
        _marker: core::marker::PhantomData,
    }
}

define_io_op! {
    pub struct SocketDirect<'a> { domain: i32, ty: i32, protocol: i32, slot: types::DestinationSlot }
    build(&self) -> squeue::Entry {
        opcode::Socket::new(self.domain, self.ty, self.protocol)
            .file_index(Some(self.slot))
            .build()
    }
}

/// Creates a socket directly at registered-file-table slot `index`.
pub fn socket_direct<'a>(domain: i32, ty: i32, protocol: i32, index: u32) -> SocketDirect<'a> {
    SocketDirect {
        state: IoState::new(),
        domain,
        ty,
        protocol,
        slot: types::DestinationSlot::try_from_slot_target(index)
            .expect("socket_direct: index must address a valid registered-file slot"),
        _marker: core::marker::PhantomData,
    }
}

/// Creates a socket directly into an auto-allocated registered-file-table
/// slot; the completion's result is that slot's index.
pub fn socket_direct_alloc<'a>(domain: i32, ty: i32, protocol: i32) -> SocketDirect<'a> {
    SocketDirect {
        state: IoState::new(),
        domain,
        ty,
        protocol,
        slot: types::DestinationSlot::auto_target(),
        _marker: core::marker::PhantomData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_info_complete_marks_ready_and_wakes() {
        use core::task::{RawWaker, RawWakerVTable};
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        fn vtable() -> &'static RawWakerVTable {
            fn clone(p: *const ()) -> RawWaker {
                RawWaker::new(p, vtable())
            }
            unsafe fn wake(p: *const ()) {
                (*(p as *const AtomicBool)).store(true, Ordering::SeqCst);
            }
            unsafe fn wake_by_ref(p: *const ()) {
                (*(p as *const AtomicBool)).store(true, Ordering::SeqCst);
            }
            fn drop_fn(_: *const ()) {}
            static VTABLE: RawWakerVTable = RawWakerVTable::new(
                clone,
                |p| unsafe { wake(p) },
                |p| unsafe { wake_by_ref(p) },
                drop_fn,
            );
            &VTABLE
        }

        let flag = Arc::new(AtomicBool::new(false));
        let raw = RawWaker::new(Arc::into_raw(Arc::clone(&flag)) as *const (), vtable());
        let waker = unsafe { Waker::from_raw(raw) };

        let info = TaskInfo::new();
        *info.waker.lock() = Some(waker);
        info.complete(42);
        assert!(info.ready.load(Ordering::Acquire));
        assert_eq!(info.result.load(Ordering::Acquire), 42);
        assert!(flag.load(Ordering::SeqCst));
        unsafe { drop(Arc::from_raw(Arc::as_ptr(&flag))) };
    }
}
