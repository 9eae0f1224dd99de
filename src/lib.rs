//! A cooperative fiber event loop for embedding in language runtimes:
//! a task scheduler resuming stackful coroutines, millisecond timers with
//! cancellation, channels with buffered/unbuffered rendezvous and select,
//! and an OS reactor multiplexing I/O readiness with timed wakeups.
//!
//! A [`Loop`] is single-threaded and self-contained. The embedding supplies
//! fibers as [`Coroutine`] implementations; a fiber suspends by returning
//! [`Step::Yield`] after registering with one of the blocking primitives on
//! [`Ctl`], and the loop resumes it with a [`Wake`] value once the
//! operation completes.
//!
//! # Example
//!
//! Two fibers meeting on an unbuffered channel:
//!
//! ```
//! use fibrio::{coroutine, Loop, Step, Wake};
//!
//! let mut lp: Loop<i64> = Loop::new().unwrap();
//! let ch = lp.channel(0);
//!
//! // A taker parks on the empty channel.
//! lp.call(coroutine(move |ctl, wake, _sig| match wake {
//!     Wake::Nil => {
//!         ctl.take(ch);
//!         Step::Yield
//!     }
//!     Wake::Value(v) => {
//!         assert_eq!(v, 42);
//!         Step::Complete
//!     }
//!     _ => Step::Fail(None),
//! }));
//!
//! // A giver hands it a value; the channel reports "not blocked" because
//! // the taker was already waiting.
//! lp.call(coroutine(move |ctl, wake, _sig| match wake {
//!     Wake::Nil => {
//!         if ctl.give(ch, 42) {
//!             Step::Yield
//!         } else {
//!             Step::Complete
//!         }
//!     }
//!     Wake::Channel(_) => Step::Complete,
//!     _ => Step::Fail(None),
//! }));
//!
//! lp.run().unwrap();
//! assert_eq!(lp.count(ch), 0);
//! ```
//!
//! I/O is layered on top through [`Machine`] state machines listening on a
//! [`PollableId`]; the loop's reactor (epoll on Linux, poll(2) elsewhere on
//! Unix, a completion port on Windows) drives them as handles become ready.

mod channel;
mod fiber;
mod pollable;
mod queue;
mod reactor;
mod sys;
mod timer;

mod evloop;

pub use channel::ChannelId;

pub use evloop::{Clause, Config, Ctl, EventCx, Loop, Reachable};

pub use fiber::{coroutine, Coroutine, FiberId, Signal, Step, Wake};

pub use pollable::{Interest, IoEvent, ListenerId, Machine, PollableId, Status};

pub use sys::Handle;
