//! Event subscription: a pollable wraps an OS handle and owns a list of
//! listener state machines driven by the reactor.

use std::fmt;
use std::ops;

use crate::evloop::EventCx;
use crate::fiber::FiberId;
use crate::sys::Handle;

/// Handle to a pollable registered with a [`Loop`](crate::Loop).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PollableId(pub(crate) usize);

/// Handle to a live listener.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ListenerId(pub(crate) usize);

const READ: usize = 0b001;
const WRITE: usize = 0b010;
const SPAWNER: usize = 0b100;

/// The set of events a listener subscribes to.
///
/// At most one listener per pollable may carry each of the `read` and
/// `write` bits. `spawner` marks a listener not tied to any fiber, such as
/// an accept loop that starts a fresh fiber per connection.
///
/// ```
/// use fibrio::Interest;
///
/// let interest = Interest::read() | Interest::spawner();
/// assert!(interest.is_read());
/// assert!(!interest.is_write());
/// ```
#[derive(Copy, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct Interest(usize);

impl Interest {
    pub fn empty() -> Interest {
        Interest(0)
    }

    #[inline]
    pub fn read() -> Interest {
        Interest(READ)
    }

    #[inline]
    pub fn write() -> Interest {
        Interest(WRITE)
    }

    #[inline]
    pub fn spawner() -> Interest {
        Interest(SPAWNER)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_read(&self) -> bool {
        self.contains(Interest::read())
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        self.contains(Interest::write())
    }

    #[inline]
    pub fn is_spawner(&self) -> bool {
        self.contains(Interest::spawner())
    }

    #[inline]
    pub fn contains(&self, other: Interest) -> bool {
        (*self & other) == other
    }

    #[inline]
    pub fn intersects(&self, other: Interest) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: Interest) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Interest) {
        self.0 &= !other.0;
    }
}

impl ops::BitOr for Interest {
    type Output = Interest;

    #[inline]
    fn bitor(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }
}

impl ops::BitAnd for Interest {
    type Output = Interest;

    #[inline]
    fn bitand(self, other: Interest) -> Interest {
        Interest(self.0 & other.0)
    }
}

impl ops::Sub for Interest {
    type Output = Interest;

    #[inline]
    fn sub(self, other: Interest) -> Interest {
        Interest(self.0 & !other.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut one = false;
        let flags = [
            (Interest::read(), "Read"),
            (Interest::write(), "Write"),
            (Interest::spawner(), "Spawner"),
        ];

        write!(fmt, "Interest {{")?;

        for (flag, msg) in flags {
            if self.contains(flag) {
                if one {
                    write!(fmt, " | ")?;
                }
                write!(fmt, "{}", msg)?;

                one = true
            }
        }

        write!(fmt, "}}")?;

        Ok(())
    }
}

/// Result of driving a listener machine.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    NotDone,
    /// The machine finished; the loop unlistens and frees it.
    Done,
}

/// Events delivered to a listener machine.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IoEvent {
    /// Delivered once at the end of a successful listen.
    Init,
    /// The handle is readable (readiness reactors).
    Read,
    /// The handle is writable (readiness reactors).
    Write,
    /// An overlapped operation finished with this many bytes (completion
    /// reactor).
    Complete(usize),
    /// The pollable is being torn down; an unlisten follows.
    Close,
    /// Final event before the listener is freed.
    Deinit,
}

/// A resumable I/O state machine attached to a pollable.
///
/// The return value only matters for `Read`, `Write` and `Complete`:
/// [`Status::Done`] makes the loop unlisten the machine.
pub trait Machine<V> {
    fn drive(&mut self, cx: &mut EventCx<'_, V>, event: IoEvent) -> Status;

    /// GC hook: report any values held in machine-private state.
    fn mark(&self, _visit: &mut dyn FnMut(&V)) {}
}

pub(crate) struct Pollable {
    pub handle: Handle,
    pub closed: bool,
    #[cfg(windows)]
    pub registered: bool,
    pub head: Option<ListenerId>,
    /// Union of the listener masks below `head`.
    pub mask: Interest,
}

impl Pollable {
    pub fn new(handle: Handle) -> Pollable {
        Pollable {
            handle,
            closed: false,
            #[cfg(windows)]
            registered: false,
            head: None,
            mask: Interest::empty(),
        }
    }
}

pub(crate) struct Listener<V> {
    /// Taken out while the machine is being driven.
    pub machine: Option<Box<dyn Machine<V>>>,
    pub pollable: PollableId,
    pub fiber: Option<FiberId>,
    pub mask: Interest,
    pub next: Option<ListenerId>,
    /// Position in the reactor's flat pollfd array.
    #[cfg(all(unix, not(target_os = "linux")))]
    pub index: usize,
    /// Overlapped pointer identifying this listener's completions.
    #[cfg(windows)]
    pub tag: *mut std::ffi::c_void,
}

#[cfg(test)]
mod test {
    use super::Interest;

    #[test]
    fn bit_ops() {
        let mut interest = Interest::read() | Interest::write();
        assert!(interest.is_read());
        assert!(interest.is_write());
        assert!(!interest.is_spawner());
        assert!(interest.intersects(Interest::read()));

        interest.remove(Interest::read());
        assert!(!interest.is_read());
        assert_eq!(interest, Interest::write());

        interest.insert(Interest::spawner());
        assert!(interest.contains(Interest::write() | Interest::spawner()));
        assert_eq!(interest - Interest::write(), Interest::spawner());
    }
}
