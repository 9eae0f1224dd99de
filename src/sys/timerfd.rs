use std::io::{self, Read};
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use super::fd::FileDesc;

#[derive(Clone, Copy)]
#[repr(i32)]
pub enum Clock {
    Monotonic = libc::CLOCK_MONOTONIC,
}

#[derive(Debug)]
pub struct TimerFd {
    inner: FileDesc,
}

impl TimerFd {
    /// Creates a non-blocking timerfd on the given clock.
    /// view: `<http://man7.org/linux/man-pages/man2/timerfd_create.2.html>`
    pub fn create(clock: Clock) -> io::Result<TimerFd> {
        let flags = libc::TFD_CLOEXEC | libc::TFD_NONBLOCK;
        let timerfd = syscall!(timerfd_create(clock as i32, flags))?;
        Ok(TimerFd {
            inner: unsafe { FileDesc::new(timerfd) },
        })
    }

    /// Arms the timer to expire once after `value`. A zero duration would
    /// disarm instead, so it is rounded up to one nanosecond.
    pub fn settime(&self, value: Duration) -> io::Result<()> {
        let value = if value.is_zero() {
            Duration::from_nanos(1)
        } else {
            value
        };

        let new_value = libc::itimerspec {
            it_interval: duration_to_timespec(Duration::ZERO),
            it_value: duration_to_timespec(value),
        };

        let mut old_value: libc::itimerspec = unsafe { mem::zeroed() };

        syscall!(timerfd_settime(
            self.inner.as_raw_fd(),
            0,
            &new_value,
            &mut old_value
        ))?;

        Ok(())
    }

    /// Disarms the timer and clears any queued expiration.
    pub fn disarm(&self) -> io::Result<()> {
        let new_value: libc::itimerspec = unsafe { mem::zeroed() };
        let mut old_value: libc::itimerspec = unsafe { mem::zeroed() };

        syscall!(timerfd_settime(
            self.inner.as_raw_fd(),
            0,
            &new_value,
            &mut old_value
        ))?;

        Ok(())
    }

    /// read(2) returns the number of expirations since the last settime or
    /// read, as a native-endian u64.
    pub fn read(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        (&self.inner).read_exact(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }
}

fn duration_to_timespec(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    }
}

impl AsRawFd for TimerFd {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{Clock, TimerFd};

    #[test]
    fn arm_and_expire() {
        let timerfd = TimerFd::create(Clock::Monotonic).unwrap();
        timerfd.settime(Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(timerfd.read().unwrap(), 1);
    }

    #[test]
    fn read_unexpired_would_block() {
        let timerfd = TimerFd::create(Clock::Monotonic).unwrap();
        timerfd.settime(Duration::from_secs(100)).unwrap();
        assert!(timerfd.read().is_err());
    }
}
