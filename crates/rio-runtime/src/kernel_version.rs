//! One-time kernel version probe, used to gate `.detach()`'s CQE-skip path
//! and the newer timeout/accept/socket opcode flags.

use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KernelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl KernelVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        KernelVersion { major, minor, patch }
    }

    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }

    fn probe() -> Self {
        let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
        if unsafe { libc::uname(&mut uts) } != 0 {
            return KernelVersion::new(5, 1, 0);
        }
        let release = unsafe {
            std::ffi::CStr::from_ptr(uts.release.as_ptr())
                .to_string_lossy()
                .into_owned()
        };
        parse_release(&release).unwrap_or(KernelVersion::new(5, 1, 0))
    }
}

fn parse_release(release: &str) -> Option<KernelVersion> {
    let core = release.split(|c: char| c == '-' || c == '+').next()?;
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some(KernelVersion::new(major, minor, patch))
}

static DETECTED: OnceLock<KernelVersion> = OnceLock::new();

pub fn current() -> KernelVersion {
    *DETECTED.get_or_init(KernelVersion::probe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typical_release_strings() {
        assert_eq!(parse_release("6.8.0-40-generic"), Some(KernelVersion::new(6, 8, 0)));
        assert_eq!(parse_release("5.15.0"), Some(KernelVersion::new(5, 15, 0)));
        assert_eq!(parse_release("5.10"), Some(KernelVersion::new(5, 10, 0)));
    }

    #[test]
    fn at_least_compares_major_minor() {
        let v = KernelVersion::new(5, 18, 3);
        assert!(v.at_least(5, 18));
        assert!(v.at_least(5, 17));
        assert!(!v.at_least(5, 19));
        assert!(!v.at_least(6, 0));
    }
}
