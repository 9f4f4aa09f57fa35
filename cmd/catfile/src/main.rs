//! Minimal `cat`: opens every path given on the command line via io_uring's
//! `openat`, reads it to EOF in fixed-size chunks via `read`, and writes the
//! chunks straight to stdout with a synchronous `write(2)` (stdout itself is
//! not run through the ring here — only the file side is).

use std::ffi::CString;
use std::io::Write;

async fn cat_one(path: &str) -> i32 {
    let cpath = match CString::new(path) {
        Ok(c) => c,
        Err(_) => {
            eprintln!("catfile: {path}: path contains a NUL byte");
            return 1;
        }
    };

    let fd = rio::io::openat(libc::AT_FDCWD, &cpath, libc::O_RDONLY, 0).await;
    if fd < 0 {
        eprintln!("catfile: {path}: open failed (errno {})", -fd);
        return 1;
    }

    let mut buf = [0u8; 64 * 1024];
    let mut offset = 0u64;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    loop {
        let n = rio::io::read(fd, &mut buf, offset).await;
        if n < 0 {
            eprintln!("catfile: {path}: read failed (errno {})", -n);
            rio::io::close(fd).await;
            return 1;
        }
        if n == 0 {
            break;
        }
        if out.write_all(&buf[..n as usize]).is_err() {
            rio::io::close(fd).await;
            return 1;
        }
        offset += n as u64;
    }
    rio::io::close(fd).await;
    0
}

fn main() {
    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: catfile FILE...");
        std::process::exit(2);
    }

    let ctx = rio::Context::builder().build().expect("failed to build context");
    let handle = ctx.spawn(async move {
        let mut status = 0;
        for path in &paths {
            let rc = cat_one(path).await;
            if rc != 0 {
                status = rc;
            }
        }
        status
    });
    let ctx_handle = ctx.start();

    let status = block_on(handle);
    ctx_handle.request_stop();
    ctx_handle.join();
    std::process::exit(status.unwrap_or(1));
}

/// Minimal single-future executor for driving the top-level task from
/// `main`, which has no coroutine context of its own to suspend into.
fn block_on<F: std::future::Future>(mut fut: F) -> F::Output {
    use std::pin::Pin;
    use std::sync::{Arc, Condvar, Mutex};
    use std::task::{Context, Poll, Wake, Waker};

    struct ThreadWaker {
        pair: Arc<(Mutex<bool>, Condvar)>,
    }
    impl Wake for ThreadWaker {
        fn wake(self: Arc<Self>) {
            self.wake_by_ref();
        }
        fn wake_by_ref(self: &Arc<Self>) {
            let (lock, cvar) = &*self.pair;
            *lock.lock().unwrap() = true;
            cvar.notify_one();
        }
    }

    let pair = Arc::new((Mutex::new(false), Condvar::new()));
    let waker = Waker::from(Arc::new(ThreadWaker { pair: Arc::clone(&pair) }));
    let mut cx = Context::from_waker(&waker);
    let mut fut = unsafe { Pin::new_unchecked(&mut fut) };
    loop {
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(v) => return v,
            Poll::Pending => {
                let (lock, cvar) = &*pair;
                let mut ready = lock.lock().unwrap();
                while !*ready {
                    ready = cvar.wait(ready).unwrap();
                }
                *ready = false;
            }
        }
    }
}
