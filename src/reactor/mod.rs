//! Platform multiplexers behind a single crate-internal face: epoll plus a
//! timerfd on Linux, poll(2) elsewhere on Unix, an I/O completion port on
//! Windows.

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(target_os = "linux")]
pub(crate) use epoll::Reactor;

#[cfg(all(unix, not(target_os = "linux")))]
mod poll;
#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) use poll::Reactor;

#[cfg(windows)]
mod iocp;
#[cfg(windows)]
pub(crate) use iocp::Reactor;
