//! Runtime configuration, following the same from-env-with-builder-overrides
//! shape used elsewhere in this workspace.
//!
//! # Environment variables (all optional)
//! - `RIO_SQ_ENTRIES` — submission queue capacity (power of two)
//! - `RIO_READY_QUEUE_CAPACITY` — per-worker ready-queue capacity (power of two)
//! - `RIO_LOG` — log level: `off`, `error`, `warn`, `info`, `debug`
//! - `RIO_INBOX_MODE` — `eventfd` or `msg-ring`

use std::env;
use std::time::Duration;

/// io_uring setup flags the builder can request. Kept as a small bitset
/// rather than exposing `io_uring::Builder` directly so construction stays
/// infallible until `Context::build()`. Few enough fields that a plain
/// struct reads better here than pulling in the `bitflags` crate for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RingFlags {
    pub sqpoll: bool,
    pub iopoll: bool,
    pub coop_taskrun: bool,
    pub single_issuer: bool,
    pub defer_taskrun: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxMode {
    /// Portable: an eventfd plus a mutex-guarded FIFO.
    EventFd,
    /// Kernel >= 5.18: `IORING_OP_MSG_RING` delivers directly into the
    /// target ring's completion queue.
    MsgRing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    fn from_env_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Some(LogLevel::Off),
            "error" => Some(LogLevel::Error),
            "warn" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub sq_entries: u32,
    pub ready_queue_capacity: usize,
    pub ring_flags: RingFlags,
    pub inbox_mode: InboxMode,
    pub log_level: LogLevel,
    pub cpu_pin: Option<usize>,
    pub submission_threshold: Option<u32>,
    pub park_wait_timeout: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ContextConfig {
    pub fn new() -> Self {
        ContextConfig {
            sq_entries: 256,
            ready_queue_capacity: 1024,
            ring_flags: RingFlags::default(),
            inbox_mode: InboxMode::EventFd,
            log_level: LogLevel::Warn,
            cpu_pin: None,
            submission_threshold: None,
            park_wait_timeout: Duration::from_millis(500),
        }
    }

    pub fn from_env() -> Self {
        let mut cfg = Self::new();
        if let Ok(v) = env::var("RIO_SQ_ENTRIES") {
            if let Ok(n) = v.parse() {
                cfg.sq_entries = n;
            }
        }
        if let Ok(v) = env::var("RIO_READY_QUEUE_CAPACITY") {
            if let Ok(n) = v.parse() {
                cfg.ready_queue_capacity = n;
            }
        }
        if let Ok(v) = env::var("RIO_LOG") {
            if let Some(level) = LogLevel::from_env_str(&v) {
                cfg.log_level = level;
            }
        }
        if let Ok(v) = env::var("RIO_INBOX_MODE") {
            cfg.inbox_mode = match v.as_str() {
                "msg-ring" => InboxMode::MsgRing,
                _ => InboxMode::EventFd,
            };
        }
        cfg
    }

    pub fn sq_entries(mut self, n: u32) -> Self {
        self.sq_entries = n;
        self
    }

    pub fn ready_queue_capacity(mut self, n: usize) -> Self {
        self.ready_queue_capacity = n;
        self
    }

    pub fn ring_flags(mut self, flags: RingFlags) -> Self {
        self.ring_flags = flags;
        self
    }

    pub fn inbox_mode(mut self, mode: InboxMode) -> Self {
        self.inbox_mode = mode;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn cpu_pin(mut self, cpu: usize) -> Self {
        self.cpu_pin = Some(cpu);
        self
    }

    pub fn submission_threshold(mut self, n: u32) -> Self {
        self.submission_threshold = Some(n);
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.sq_entries.is_power_of_two() {
            return Err("sq_entries must be a power of two");
        }
        if !self.ready_queue_capacity.is_power_of_two() {
            return Err("ready_queue_capacity must be a power of two");
        }
        Ok(())
    }
}

/// Logs a diagnostic line if `level` is enabled by `cfg.log_level`, matching
/// the `eprintln!`-based diagnostics used elsewhere in this workspace rather
/// than pulling in an external logging facade.
macro_rules! rio_log {
    ($cfg:expr, $level:expr, $($arg:tt)+) => {
        if $cfg.log_level >= $level {
            eprintln!("[rio:{:?}] {}", $level, format_args!($($arg)+));
        }
    };
}
pub(crate) use rio_log;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ContextConfig::new();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two() {
        let cfg = ContextConfig::new().sq_entries(300);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn log_level_ordering() {
        assert!(LogLevel::Debug > LogLevel::Info);
        assert!(LogLevel::Off < LogLevel::Error);
    }
}
