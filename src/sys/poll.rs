use std::io;
use std::os::unix::io::RawFd;

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, POLLPRI};

use crate::pollable::Interest;

use super::Ready;

pub fn pollfd(fd: RawFd, interest: Interest) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: interest_to_events(interest),
        revents: 0,
    }
}

/// Waits on the whole set. `timeout` is in milliseconds, `-1` blocks.
pub fn poll(fds: &mut [libc::pollfd], timeout: i32) -> io::Result<usize> {
    let cnt = syscall!(poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout))?;
    Ok(cnt as usize)
}

fn interest_to_events(interest: Interest) -> libc::c_short {
    let mut events = 0;

    if interest.is_read() {
        events |= POLLIN;
    }

    if interest.is_write() {
        events |= POLLOUT;
    }

    events
}

/// True when the entry carries anything worth dispatching, including the
/// error conditions poll(2) reports regardless of the requested events.
pub fn interesting(pfd: &libc::pollfd) -> bool {
    pfd.revents & (pfd.events | POLLHUP | POLLERR | POLLNVAL) != 0
}

pub fn decode(revents: libc::c_short) -> Ready {
    Ready {
        readable: revents & (POLLIN | POLLPRI) != 0,
        writable: revents & POLLOUT != 0,
        error: revents & (POLLERR | POLLNVAL) != 0,
        hup: revents & POLLHUP != 0,
    }
}
