//! I/O readiness backend reporting.
//!
//! The runtime's reactor picks the platform backend at build time; this
//! module names it so the server can log what it runs on.

use std::fmt;

/// Readiness notification mechanism used by the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoBackend {
    Epoll,
    Kqueue,
    Poll,
}

impl IoBackend {
    /// Backend of the current process.
    #[must_use]
    pub fn detect() -> Self {
        Self::for_os(std::env::consts::OS)
    }

    /// Backend used on the given `std::env::consts::OS` value.
    #[must_use]
    pub fn for_os(os: &str) -> Self {
        match os {
            "linux" | "android" => IoBackend::Epoll,
            "macos" | "ios" | "freebsd" | "netbsd" | "openbsd" | "dragonfly" => IoBackend::Kqueue,
            _ => IoBackend::Poll,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IoBackend::Epoll => "epoll",
            IoBackend::Kqueue => "kqueue",
            IoBackend::Poll => "poll",
        }
    }
}

impl fmt::Display for IoBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
