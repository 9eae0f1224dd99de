//! The narrow contract between the loop and the embedding's fiber VM.
//!
//! The loop never looks inside a fiber. It owns a slot per fiber holding the
//! scheduling epoch, the `SCHEDULED` guard and the back-reference to a
//! listener the fiber is waiting on, plus the embedding-supplied
//! continuation it resumes fibers through.

use crate::channel::ChannelId;
use crate::evloop::Ctl;
use crate::pollable::ListenerId;

/// Handle to a fiber registered with a [`Loop`](crate::Loop).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FiberId(pub(crate) usize);

/// Signal accompanying a resumption.
///
/// `Ok` carries a normal value, `Error` a cancellation or timeout. `Event`
/// never reaches a coroutine; it is the loop-internal face of
/// [`Step::Yield`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Signal {
    Ok,
    Event,
    Error,
}

/// Value a fiber is resumed with.
#[derive(Debug)]
pub enum Wake<V> {
    /// The unit value: fresh starts, completed sleeps.
    Nil,
    /// A channel item, or a cancellation payload under [`Signal::Error`].
    Value(V),
    /// A blocked give completed; the channel is handed back.
    Channel(ChannelId),
    /// A select write clause fired.
    Give(ChannelId),
    /// A select read clause fired, yielding the item.
    Take(ChannelId, V),
    /// An error timeout installed by [`Ctl::addtimeout`] expired.
    Timeout,
}

/// Outcome of one continuation step.
#[derive(Debug)]
pub enum Step<V> {
    /// The fiber ran to completion.
    Complete,
    /// The fiber suspended on a loop primitive and will be resumed later.
    Yield,
    /// The fiber failed; the payload goes to the diagnostic hook.
    Fail(Option<V>),
}

/// A suspended computation the embedding resumes fibers through.
///
/// `resume` runs the fiber until it completes, fails, or suspends on one of
/// the [`Ctl`] primitives, in which case it returns [`Step::Yield`] and the
/// loop resumes it later with the wake value the primitive produces.
pub trait Coroutine<V> {
    fn resume(&mut self, ctl: &mut Ctl<'_, V>, wake: Wake<V>, sig: Signal) -> Step<V>;
}

impl<V, F> Coroutine<V> for F
where
    F: FnMut(&mut Ctl<'_, V>, Wake<V>, Signal) -> Step<V>,
{
    fn resume(&mut self, ctl: &mut Ctl<'_, V>, wake: Wake<V>, sig: Signal) -> Step<V> {
        (self)(ctl, wake, sig)
    }
}

/// Boxes a closure as a coroutine.
pub fn coroutine<V, F>(f: F) -> Box<dyn Coroutine<V>>
where
    F: FnMut(&mut Ctl<'_, V>, Wake<V>, Signal) -> Step<V> + 'static,
{
    Box::new(f)
}

pub(crate) struct FiberState<V> {
    pub co: Option<Box<dyn Coroutine<V>>>,
    pub sched_id: u32,
    pub scheduled: bool,
    pub waiting: Option<ListenerId>,
}

impl<V> FiberState<V> {
    pub fn new(co: Box<dyn Coroutine<V>>) -> FiberState<V> {
        FiberState {
            co: Some(co),
            sched_id: 0,
            scheduled: false,
            waiting: None,
        }
    }
}

/// A queued resumption, owned by the run queue until dispatched.
pub(crate) struct Task<V> {
    pub fiber: FiberId,
    pub value: Wake<V>,
    pub sig: Signal,
}
