use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use libc::{EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLPRI, EPOLLRDHUP};

use crate::pollable::Interest;

use super::Ready;

pub struct Epoll {
    epfd: RawFd,
}

impl Epoll {
    pub fn new() -> io::Result<Epoll> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;

        Ok(Epoll { epfd })
    }

    /// Waits for events. `timeout` is in milliseconds, `-1` blocks until a
    /// registered handle becomes ready.
    pub fn wait(&self, evts: &mut Events, timeout: i32) -> io::Result<usize> {
        let cnt = syscall!(epoll_wait(
            self.epfd,
            evts.events.as_mut_ptr(),
            evts.events.capacity() as i32,
            timeout
        ))?;

        unsafe { evts.events.set_len(cnt as usize) };

        Ok(cnt as usize)
    }

    pub fn add(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: key,
        };

        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut info))?;

        Ok(())
    }

    pub fn modify(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: key,
        };

        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut info))?;

        Ok(())
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let mut info = libc::epoll_event { events: 0, u64: 0 };

        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut info))?;

        Ok(())
    }
}

fn interest_to_epoll(interest: Interest) -> u32 {
    let mut kind = EPOLLET;

    if interest.is_read() {
        kind |= EPOLLIN;
    }

    if interest.is_write() {
        kind |= EPOLLOUT;
    }

    kind as u32
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.epfd);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub key: u64,
    pub ready: Ready,
}

pub struct Events {
    events: Vec<libc::epoll_event>,
}

impl Events {
    pub fn with_capacity(u: usize) -> Events {
        Events {
            events: Vec::with_capacity(u),
        }
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<Event> {
        self.events.get(idx).map(|event| {
            let epoll = event.events as libc::c_int;

            let ready = Ready {
                readable: (epoll & EPOLLIN) != 0 || (epoll & EPOLLPRI) != 0,
                writable: (epoll & EPOLLOUT) != 0,
                error: (epoll & EPOLLERR) != 0,
                hup: (epoll & EPOLLHUP) != 0 || (epoll & EPOLLRDHUP) != 0,
            };

            Event {
                key: event.u64,
                ready,
            }
        })
    }
}
