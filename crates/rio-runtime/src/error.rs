use core::fmt;

#[derive(Debug)]
pub enum RingError {
    /// `io_uring_setup` (via the `io-uring` crate's builder) was rejected by the kernel.
    Setup(std::io::Error),
    /// The submission queue had no free slot. Unreachable on the worker's own
    /// steady-state path — it tracks outstanding SQEs and sizes the ring to
    /// never hit this; only reachable through the `try_*` testing entry points.
    Full,
    /// `io_uring_enter` (submit/submit_and_wait) returned an error.
    Submit(std::io::Error),
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingError::Setup(e) => write!(f, "io_uring setup failed: {e}"),
            RingError::Full => write!(f, "submission queue full"),
            RingError::Submit(e) => write!(f, "io_uring_enter failed: {e}"),
        }
    }
}

impl std::error::Error for RingError {}

#[derive(Debug)]
pub enum WorkerError {
    RingSetup(RingError),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::RingSetup(e) => write!(f, "worker ring setup failed: {e}"),
        }
    }
}

impl std::error::Error for WorkerError {}

impl From<RingError> for WorkerError {
    fn from(e: RingError) -> Self {
        WorkerError::RingSetup(e)
    }
}

#[derive(Debug)]
pub enum ContextError {
    Worker(WorkerError),
    /// The per-worker config (queue sizes, ring flags, ...) failed validation.
    InvalidConfig,
    /// Creating the worker's wake-up inbox (eventfd, or the pipe fallback)
    /// failed.
    Inbox(std::io::Error),
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::Worker(e) => write!(f, "{e}"),
            ContextError::InvalidConfig => write!(f, "context config failed validation"),
            ContextError::Inbox(e) => write!(f, "failed to create worker inbox: {e}"),
        }
    }
}

impl std::error::Error for ContextError {}

impl From<WorkerError> for ContextError {
    fn from(e: WorkerError) -> Self {
        ContextError::Worker(e)
    }
}

/// Why a spawned task's `JoinHandle` resolved to an error instead of a value.
#[derive(Debug)]
pub enum JoinError {
    /// The spawned future panicked during a poll; the payload is whatever
    /// was passed to `panic!`/`std::panic::panic_any`.
    Panicked(Box<dyn std::any::Any + Send>),
    /// The task's context shut down before the task finished.
    Cancelled,
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::Panicked(_) => write!(f, "spawned task panicked"),
            JoinError::Cancelled => write!(f, "spawned task was cancelled"),
        }
    }
}

impl std::error::Error for JoinError {}
