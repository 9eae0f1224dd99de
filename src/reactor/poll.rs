//! Portable Unix readiness backend: a flat pollfd array with a parallel
//! listener map, one entry per listener carrying its pollable's aggregate
//! interest. The next timer deadline rides on poll(2)'s own timeout.

use std::io;

use crate::evloop::{unlisten_op, Config, Core};
use crate::pollable::{IoEvent, ListenerId, Status};
use crate::sys::poll;
use crate::timer::Timestamp;

pub(crate) struct Reactor {
    fds: Vec<libc::pollfd>,
    map: Vec<ListenerId>,
}

impl Reactor {
    pub fn new(_config: &Config) -> io::Result<Reactor> {
        Ok(Reactor {
            fds: Vec::new(),
            map: Vec::new(),
        })
    }

    pub fn register<V>(
        &mut self,
        core: &mut Core<V>,
        lid: ListenerId,
        _is_first: bool,
    ) -> io::Result<()> {
        let (handle, mask) = {
            let p = core.listeners[lid.0].pollable;
            let pollable = &core.pollables[p.0];
            (pollable.handle, pollable.mask)
        };
        core.listeners[lid.0].index = self.fds.len();
        self.fds.push(poll::pollfd(handle, mask));
        self.map.push(lid);
        Ok(())
    }

    /// Swap-removes the listener's entry and patches the index of whichever
    /// listener the tail slot belonged to.
    pub fn deregister<V>(&mut self, core: &mut Core<V>, lid: ListenerId) {
        let index = core.listeners[lid.0].index;
        self.fds.swap_remove(index);
        self.map.swap_remove(index);
        if index < self.map.len() {
            let moved = self.map[index];
            core.listeners[moved.0].index = index;
        }
    }

    pub fn wait<V>(&mut self, core: &mut Core<V>, deadline: Option<Timestamp>) -> io::Result<()> {
        loop {
            let timeout = match deadline {
                Some(when) => {
                    let rel = when - core.clock.now();
                    if rel <= 0 {
                        0
                    } else {
                        rel.min(i32::MAX as i64) as i32
                    }
                }
                None => -1,
            };
            match poll::poll(&mut self.fds, timeout) {
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
                Ok(_) => break,
            }
        }

        // An unlisten swaps the tail entry into the current slot; that entry
        // is picked up on the next wait, as poll is level-triggered.
        let mut i = 0;
        while i < self.fds.len() {
            let pfd = self.fds[i];
            let lid = self.map[i];
            i += 1;
            if !poll::interesting(&pfd) {
                continue;
            }
            let ready = poll::decode(pfd.revents);
            let mut done = false;
            if ready.deliver_write() {
                done |= core.drive(lid, IoEvent::Write) == Status::Done;
            }
            if ready.deliver_read() {
                done |= core.drive(lid, IoEvent::Read) == Status::Done;
            }
            if done {
                unlisten_op(core, self, lid);
            }
        }
        Ok(())
    }
}
