//! Linux readiness backend: one epoll instance per loop, pollables
//! registered with their aggregate interest, and a timerfd carrying the next
//! timer deadline so the epoll wait itself never needs a timeout.

use std::io;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use log::debug;

use crate::evloop::{unlisten_op, Config, Core};
use crate::pollable::{Interest, IoEvent, ListenerId, PollableId, Status};
use crate::sys::epoll::{Epoll, Events};
use crate::sys::timerfd::{Clock, TimerFd};
use crate::sys::Ready;
use crate::timer::Timestamp;

/// Key reserved for the loop's timerfd; pollables use their slot index.
const TIMER_KEY: u64 = u64::MAX;

pub(crate) struct Reactor {
    epoll: Epoll,
    timer: TimerFd,
    timer_armed: bool,
    events: Events,
}

impl Reactor {
    pub fn new(config: &Config) -> io::Result<Reactor> {
        let epoll = Epoll::new()?;
        let timer = TimerFd::create(Clock::Monotonic)?;
        epoll.add(timer.as_raw_fd(), TIMER_KEY, Interest::read())?;

        Ok(Reactor {
            epoll,
            timer,
            timer_armed: false,
            events: Events::with_capacity(config.events_capacity),
        })
    }

    pub fn register<V>(
        &mut self,
        core: &mut Core<V>,
        lid: ListenerId,
        is_first: bool,
    ) -> io::Result<()> {
        let p = core.listeners[lid.0].pollable;
        let pollable = &core.pollables[p.0];
        let handle = pollable.handle;
        let mask = pollable.mask;

        loop {
            let res = if is_first {
                self.epoll.add(handle, p.0 as u64, mask)
            } else {
                self.epoll.modify(handle, p.0 as u64, mask)
            };
            match res {
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                res => return res,
            }
        }
    }

    pub fn deregister<V>(&mut self, core: &mut Core<V>, lid: ListenerId) {
        let p = core.listeners[lid.0].pollable;
        let pollable = &core.pollables[p.0];
        let handle = pollable.handle;

        // Aggregate interest of the survivors decides between modify and
        // removal.
        let mut remaining = Interest::empty();
        let mut is_last = true;
        let mut cur = pollable.head;
        while let Some(c) = cur {
            let listener = &core.listeners[c.0];
            if c != lid {
                is_last = false;
                remaining.insert(listener.mask);
            }
            cur = listener.next;
        }

        let res = loop {
            let res = if is_last {
                self.epoll.delete(handle)
            } else {
                self.epoll.modify(handle, p.0 as u64, remaining)
            };
            match res {
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                res => break res,
            }
        };
        if let Err(err) = res {
            debug!("failed to unschedule {:?}: {}", lid, err);
        }
    }

    pub fn wait<V>(&mut self, core: &mut Core<V>, deadline: Option<Timestamp>) -> io::Result<()> {
        let mut timeout = -1;
        match deadline {
            Some(when) => {
                let rel = when - core.clock.now();
                if rel <= 0 {
                    // Already due; poll without blocking instead of arming.
                    timeout = 0;
                } else {
                    self.timer.settime(Duration::from_millis(rel as u64))?;
                    self.timer_armed = true;
                }
            }
            None => {
                if self.timer_armed {
                    self.timer.disarm()?;
                    self.timer_armed = false;
                }
            }
        }

        let n = loop {
            match self.epoll.wait(&mut self.events, timeout) {
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                res => break res?,
            }
        };

        for i in 0..n {
            let event = match self.events.get(i) {
                Some(event) => event,
                None => break,
            };
            if event.key == TIMER_KEY {
                let _ = self.timer.read();
                continue;
            }
            dispatch(core, self, PollableId(event.key as usize), event.ready);
        }
        Ok(())
    }
}

/// Walks the pollable's listener list, delivering write then read. `next` is
/// snapshotted first because a `Done` unlistens the current entry.
fn dispatch<V>(core: &mut Core<V>, reactor: &mut Reactor, p: PollableId, ready: Ready) {
    let mut cur = match core.pollables.get(p.0) {
        Some(pollable) => pollable.head,
        None => return,
    };
    while let Some(lid) = cur {
        let next = match core.listeners.get(lid.0) {
            Some(listener) => listener.next,
            None => break,
        };
        let mut done = false;
        if ready.deliver_write() {
            done |= core.drive(lid, IoEvent::Write) == Status::Done;
        }
        if ready.deliver_read() {
            done |= core.drive(lid, IoEvent::Read) == Status::Done;
        }
        if done {
            unlisten_op(core, reactor, lid);
        }
        cur = next;
    }
}
