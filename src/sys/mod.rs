//! Raw OS plumbing. Everything that talks to the platform directly lives
//! here; the reactor backends are built on top of these wrappers.

#[cfg(unix)]
macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* )) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

#[cfg(target_os = "linux")]
mod fd;

#[cfg(target_os = "linux")]
pub mod epoll;
#[cfg(target_os = "linux")]
pub mod timerfd;

#[cfg(all(unix, not(target_os = "linux")))]
pub mod poll;

#[cfg(windows)]
pub mod iocp;

/// The OS handle a pollable wraps: a file descriptor on Unix, a `HANDLE` on
/// Windows.
#[cfg(unix)]
pub type Handle = std::os::unix::io::RawFd;
#[cfg(windows)]
pub type Handle = windows_sys::Win32::Foundation::HANDLE;

/// Readiness reported by the OS for one handle.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hup: bool,
}

#[cfg(unix)]
impl Ready {
    /// Error and hang-up conditions fan out to both directions so listener
    /// machines get a chance to observe them and terminate.
    pub fn deliver_read(&self) -> bool {
        self.readable || self.error || self.hup
    }

    pub fn deliver_write(&self) -> bool {
        self.writable || self.error || self.hup
    }
}
