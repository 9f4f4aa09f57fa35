//! Cooperative cancellation: `StopSource` / `StopToken` / `StopCallback`.
//!
//! A task holding a `StopToken` decides for itself where to check
//! `is_stop_requested()`; nothing here forcibly unwinds or cancels a future.
//! `StopCallback` additionally lets a caller register a closure that runs
//! synchronously, on whichever thread calls `StopSource::request_stop`, the
//! moment a stop is requested (or immediately, if one already was).

use crate::spinlock::SpinLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct Inner {
    stopped: AtomicBool,
    callbacks: SpinLock<Vec<Box<dyn FnOnce() + Send>>>,
}

/// Owns the cancellation flag. Dropping every clone of the `StopSource`
/// without calling `request_stop` leaves any derived tokens permanently
/// un-cancellable (they report `false` forever, same as a token with no
/// source at all).
#[derive(Clone)]
pub struct StopSource {
    inner: Arc<Inner>,
}

impl StopSource {
    pub fn new() -> Self {
        StopSource {
            inner: Arc::new(Inner {
                stopped: AtomicBool::new(false),
                callbacks: SpinLock::new(Vec::new()),
            }),
        }
    }

    pub fn token(&self) -> StopToken {
        StopToken {
            inner: Some(Arc::clone(&self.inner)),
        }
    }

    /// Idempotent. Runs every registered callback on the calling thread
    /// before returning.
    pub fn request_stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock());
        for cb in callbacks {
            cb();
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }
}

impl Default for StopSource {
    fn default() -> Self {
        Self::new()
    }
}

/// A cheaply-cloneable handle a task can poll or hand to a primitive that
/// wants to abandon a wait early.
#[derive(Clone)]
pub struct StopToken {
    /// `None` means "never stoppable" — the default for code that does not
    /// care about cancellation, avoiding an `Option<StopToken>` everywhere.
    inner: Option<Arc<Inner>>,
}

impl StopToken {
    pub fn never() -> Self {
        StopToken { inner: None }
    }

    pub fn is_stop_requested(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.stopped.load(Ordering::Acquire),
            None => false,
        }
    }

    pub fn can_be_stopped(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::never()
    }
}

/// Registers a closure to run the moment the associated `StopSource` stops
/// (or immediately, inline, if it already has). Dropping the `StopCallback`
/// does not deregister it — once added, a callback always runs exactly
/// once if a stop is ever requested.
pub struct StopCallback;

impl StopCallback {
    pub fn new(token: &StopToken, callback: impl FnOnce() + Send + 'static) -> Self {
        match &token.inner {
            None => {}
            Some(inner) => {
                if inner.stopped.load(Ordering::Acquire) {
                    callback();
                } else {
                    let mut callbacks = inner.callbacks.lock();
                    if inner.stopped.load(Ordering::Acquire) {
                        drop(callbacks);
                        callback();
                    } else {
                        callbacks.push(Box::new(callback));
                    }
                }
            }
        }
        StopCallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn token_sees_request() {
        let src = StopSource::new();
        let tok = src.token();
        assert!(!tok.is_stop_requested());
        src.request_stop();
        assert!(tok.is_stop_requested());
    }

    #[test]
    fn never_token_never_stops() {
        let tok = StopToken::never();
        assert!(!tok.can_be_stopped());
        assert!(!tok.is_stop_requested());
    }

    #[test]
    fn callback_fires_once_on_request() {
        let src = StopSource::new();
        let tok = src.token();
        let count = Arc::new(AtomicU32::new(0));
        let count2 = Arc::clone(&count);
        let _cb = StopCallback::new(&tok, move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
        src.request_stop();
        src.request_stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_fires_immediately_if_already_stopped() {
        let src = StopSource::new();
        src.request_stop();
        let tok = src.token();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        let _cb = StopCallback::new(&tok, move || fired2.store(true, Ordering::SeqCst));
        assert!(fired.load(Ordering::SeqCst));
    }
}
