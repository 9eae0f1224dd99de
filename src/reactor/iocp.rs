//! Windows completion backend: handles are associated with one completion
//! port per loop; a completion is routed to the listener whose tag matches
//! the overlapped pointer. The next timer deadline rides on the wait's
//! timeout argument.

use std::io;

use crate::evloop::{unlisten_op, Config, Core};
use crate::pollable::{IoEvent, ListenerId, PollableId, Status};
use crate::sys::iocp::CompletionPort;
use crate::timer::Timestamp;

pub(crate) struct Reactor {
    port: CompletionPort,
}

impl Reactor {
    pub fn new(_config: &Config) -> io::Result<Reactor> {
        Ok(Reactor {
            port: CompletionPort::new()?,
        })
    }

    /// Handles are associated with the port once, on their first listen, and
    /// stay associated until closed.
    pub fn register<V>(
        &mut self,
        core: &mut Core<V>,
        lid: ListenerId,
        _is_first: bool,
    ) -> io::Result<()> {
        let p = core.listeners[lid.0].pollable;
        let (handle, registered) = {
            let pollable = &core.pollables[p.0];
            (pollable.handle, pollable.registered)
        };
        if !registered {
            self.port.associate(handle, p.0)?;
            core.pollables[p.0].registered = true;
        }
        Ok(())
    }

    pub fn deregister<V>(&mut self, _core: &mut Core<V>, _lid: ListenerId) {
        // No per-listener registration to undo on a completion port.
    }

    pub fn wait<V>(&mut self, core: &mut Core<V>, deadline: Option<Timestamp>) -> io::Result<()> {
        let timeout = deadline.map(|when| {
            let rel = when - core.clock.now();
            rel.clamp(0, u32::MAX as i64 - 1) as u32
        });

        let completion = match self.port.wait(timeout)? {
            Some(completion) => completion,
            None => return Ok(()),
        };

        let p = PollableId(completion.key);
        let mut cur = match core.pollables.get(p.0) {
            Some(pollable) => pollable.head,
            None => return Ok(()),
        };
        while let Some(lid) = cur {
            let (next, tag) = {
                let listener = &core.listeners[lid.0];
                (listener.next, listener.tag)
            };
            if tag == completion.overlapped as *mut std::ffi::c_void {
                let status = core.drive(lid, IoEvent::Complete(completion.bytes as usize));
                if status == Status::Done {
                    unlisten_op(core, self, lid);
                }
                break;
            }
            cur = next;
        }
        Ok(())
    }
}
