//! The event loop: scheduler, timers, channels and the reactor driver.
//!
//! A [`Loop`] owns every runtime structure: run queue, timer heap, fiber
//! table, channels, pollables, listeners, RNG and the OS reactor. Loops are
//! single-threaded and self-contained; several may coexist on distinct
//! threads but never share fibers, channels or pollables.
//!
//! Fibers interact with the loop through [`Ctl`], the context handed to
//! every [`Coroutine::resume`] call. Blocking operations register state and
//! the coroutine then returns [`Step::Yield`]; the loop resumes it later
//! with the wake value the operation produced.

use std::io;

use log::{error, trace};
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use slab::Slab;

use crate::channel::{Channel, ChannelId, Pending, PendingMode, MAX_CHANNEL_CAPACITY};
use crate::fiber::{Coroutine, FiberId, FiberState, Signal, Step, Task, Wake};
use crate::pollable::{
    Interest, IoEvent, Listener, ListenerId, Machine, Pollable, PollableId, Status,
};
use crate::queue::RingQueue;
use crate::reactor::Reactor;
use crate::sys::Handle;
use crate::timer::{Clock, TimerHeap, Timeout};

/// Loop construction knobs.
pub struct Config {
    /// Size of the reactor's event buffer per wait.
    pub events_capacity: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            events_capacity: 1024,
        }
    }
}

/// One clause of a [`Ctl::select`]: read from a channel, or write a value to
/// one.
pub enum Clause<V> {
    Take(ChannelId),
    Give(ChannelId, V),
}

/// A reference the GC must keep alive, reported by [`Loop::mark`].
pub enum Reachable<'a, V> {
    Fiber(FiberId),
    Value(&'a V),
}

pub(crate) struct Core<V> {
    pub(crate) spawn: RingQueue<Task<V>>,
    pub(crate) timers: TimerHeap,
    pub(crate) clock: Clock,
    pub(crate) fibers: Slab<FiberState<V>>,
    pub(crate) channels: Slab<Channel<V>>,
    pub(crate) pollables: Slab<Pollable>,
    pub(crate) listeners: Slab<Listener<V>>,
    pub(crate) active_listeners: usize,
    rng: SmallRng,
    on_error: Option<Box<dyn FnMut(FiberId, Option<&V>)>>,
}

impl<V> Core<V> {
    fn new() -> Core<V> {
        Core {
            spawn: RingQueue::new(),
            timers: TimerHeap::new(),
            clock: Clock::new(),
            fibers: Slab::new(),
            channels: Slab::new(),
            pollables: Slab::new(),
            listeners: Slab::new(),
            active_listeners: 0,
            rng: SmallRng::seed_from_u64(0),
            on_error: None,
        }
    }

    pub(crate) fn sched_id(&self, fiber: FiberId) -> Option<u32> {
        self.fibers.get(fiber.0).map(|st| st.sched_id)
    }

    fn live(&self, pending: Pending) -> bool {
        self.sched_id(pending.fiber) == Some(pending.sched_id)
    }

    /// Queues a resumption unless the fiber is already queued. Bumping the
    /// epoch here is what invalidates every waiter the fiber left behind.
    pub(crate) fn schedule_signal(&mut self, fiber: FiberId, value: Wake<V>, sig: Signal) {
        let st = match self.fibers.get_mut(fiber.0) {
            Some(st) => st,
            None => return,
        };
        if st.scheduled {
            return;
        }
        st.scheduled = true;
        st.sched_id = st.sched_id.wrapping_add(1);
        if self.spawn.push(Task { fiber, value, sig }).is_err() {
            panic!("run queue overflow");
        }
    }

    pub(crate) fn schedule(&mut self, fiber: FiberId, value: Wake<V>) {
        self.schedule_signal(fiber, value, Signal::Ok);
    }

    pub(crate) fn cancel(&mut self, fiber: FiberId, value: Wake<V>) {
        self.schedule_signal(fiber, value, Signal::Error);
    }

    fn spawn_fiber(&mut self, co: Box<dyn Coroutine<V>>) -> FiberId {
        FiberId(self.fibers.insert(FiberState::new(co)))
    }

    fn call(&mut self, co: Box<dyn Coroutine<V>>) -> FiberId {
        let fiber = self.spawn_fiber(co);
        self.schedule(fiber, Wake::Nil);
        fiber
    }

    fn make_channel(&mut self, capacity: usize) -> ChannelId {
        if capacity > MAX_CHANNEL_CAPACITY as usize {
            panic!("channel capacity too large");
        }
        ChannelId(self.channels.insert(Channel::new(capacity as i32)))
    }

    /// Pushes `value`, waking a pending reader if one is still live. Returns
    /// true when the writer must block: the value is parked in `items` and a
    /// write pending is registered for `current`.
    pub(crate) fn channel_push(
        &mut self,
        current: FiberId,
        ch: ChannelId,
        value: V,
        choice: bool,
    ) -> bool {
        let reader = loop {
            match self.channels[ch.0].read_pending.pop() {
                None => break None,
                Some(p) if self.live(p) => break Some(p),
                Some(_) => {}
            }
        };

        match reader {
            Some(reader) => {
                if reader.mode == PendingMode::ChoiceRead {
                    self.schedule(reader.fiber, Wake::Take(ch, value));
                } else {
                    self.schedule(reader.fiber, Wake::Value(value));
                }
                false
            }
            None => {
                let sched_id = self.fibers[current.0].sched_id;
                let chan = &mut self.channels[ch.0];
                if chan.items.push(value).is_err() {
                    panic!("channel overflow");
                }
                if chan.items.count() > chan.limit {
                    let mode = if choice {
                        PendingMode::ChoiceWrite
                    } else {
                        PendingMode::Item
                    };
                    let pending = Pending {
                        fiber: current,
                        sched_id,
                        mode,
                    };
                    if chan.write_pending.push(pending).is_err() {
                        panic!("channel overflow");
                    }
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Pops an item if one is queued, waking a live pending writer in turn.
    /// Returns `None` after registering a read pending for `current`.
    pub(crate) fn channel_pop(
        &mut self,
        current: FiberId,
        ch: ChannelId,
        choice: bool,
    ) -> Option<V> {
        match self.channels[ch.0].items.pop() {
            None => {
                let sched_id = self.fibers[current.0].sched_id;
                let mode = if choice {
                    PendingMode::ChoiceRead
                } else {
                    PendingMode::Item
                };
                let pending = Pending {
                    fiber: current,
                    sched_id,
                    mode,
                };
                if self.channels[ch.0].read_pending.push(pending).is_err() {
                    panic!("channel overflow");
                }
                None
            }
            Some(item) => {
                let writer = loop {
                    match self.channels[ch.0].write_pending.pop() {
                        None => break None,
                        Some(p) if self.live(p) => break Some(p),
                        Some(_) => {}
                    }
                };
                if let Some(writer) = writer {
                    if writer.mode == PendingMode::ChoiceWrite {
                        self.schedule(writer.fiber, Wake::Give(ch));
                    } else {
                        self.schedule(writer.fiber, Wake::Channel(ch));
                    }
                }
                Some(item)
            }
        }
    }

    fn register_pollable(&mut self, handle: Handle) -> PollableId {
        PollableId(self.pollables.insert(Pollable::new(handle)))
    }

    /// Wires a listener into the pollable's list and emits `Init`. Panics on
    /// the programming errors the contract rules out: a second listener for
    /// an event bit already subscribed, a non-spawner listen with no fiber
    /// or with a fiber that is already waiting, a closed pollable.
    fn listen_impl(
        &mut self,
        p: PollableId,
        machine: Box<dyn Machine<V>>,
        mask: Interest,
        current: Option<FiberId>,
    ) -> ListenerId {
        let pollable = &self.pollables[p.0];
        if pollable.closed {
            panic!("cannot listen on closed pollable");
        }
        if pollable
            .mask
            .intersects(mask & (Interest::read() | Interest::write()))
        {
            panic!("cannot listen for duplicate event on pollable");
        }

        let fiber = if mask.is_spawner() {
            None
        } else {
            match current {
                Some(fiber) => {
                    if self.fibers[fiber.0].waiting.is_some() {
                        panic!("current fiber is already waiting for event");
                    }
                    Some(fiber)
                }
                None => panic!("listener without a fiber must use the spawner mask"),
            }
        };

        let head = self.pollables[p.0].head;
        let lid = ListenerId(self.listeners.insert(Listener {
            machine: Some(machine),
            pollable: p,
            fiber,
            mask,
            next: head,
            #[cfg(all(unix, not(target_os = "linux")))]
            index: 0,
            #[cfg(windows)]
            tag: std::ptr::null_mut(),
        }));

        let pollable = &mut self.pollables[p.0];
        pollable.head = Some(lid);
        pollable.mask.insert(mask);

        if let Some(fiber) = fiber {
            self.fibers[fiber.0].waiting = Some(lid);
        }
        self.active_listeners += 1;

        trace!("listen {:?} on {:?} for {:?}", lid, p, mask);
        self.drive(lid, IoEvent::Init);
        lid
    }

    /// Emits `Deinit`, unlinks the listener, restores the aggregate mask to
    /// the disjunction of the survivors and frees the slot.
    pub(crate) fn unlisten_impl(&mut self, lid: ListenerId) {
        self.drive(lid, IoEvent::Deinit);

        let (p, fiber, next) = {
            let listener = &self.listeners[lid.0];
            (listener.pollable, listener.fiber, listener.next)
        };

        if self.pollables[p.0].head == Some(lid) {
            self.pollables[p.0].head = next;
        } else {
            let mut cur = self.pollables[p.0].head;
            while let Some(c) = cur {
                if self.listeners[c.0].next == Some(lid) {
                    self.listeners[c.0].next = next;
                    break;
                }
                cur = self.listeners[c.0].next;
            }
        }

        let mut mask = Interest::empty();
        let mut cur = self.pollables[p.0].head;
        while let Some(c) = cur {
            mask.insert(self.listeners[c.0].mask);
            cur = self.listeners[c.0].next;
        }
        self.pollables[p.0].mask = mask;

        if let Some(fiber) = fiber {
            if let Some(st) = self.fibers.get_mut(fiber.0) {
                if st.waiting == Some(lid) {
                    st.waiting = None;
                }
            }
        }

        self.active_listeners -= 1;
        self.listeners.remove(lid.0);
        trace!("unlisten {:?} from {:?}", lid, p);
    }

    /// Delivers one event to a listener machine. The machine is taken out of
    /// its slot for the duration so it can reach back into the loop.
    pub(crate) fn drive(&mut self, lid: ListenerId, event: IoEvent) -> Status {
        let mut machine = match self.listeners.get_mut(lid.0).and_then(|l| l.machine.take()) {
            Some(machine) => machine,
            None => return Status::NotDone,
        };
        let status = machine.drive(
            &mut EventCx {
                core: &mut *self,
                lid,
            },
            event,
        );
        if let Some(listener) = self.listeners.get_mut(lid.0) {
            listener.machine = Some(machine);
        }
        status
    }
}

/// Registers a listener with the OS after wiring it into the pollable. A
/// reactor failure tears the half-built listener down again and surfaces the
/// OS error.
pub(crate) fn listen_op<V>(
    core: &mut Core<V>,
    reactor: &mut Reactor,
    p: PollableId,
    machine: Box<dyn Machine<V>>,
    mask: Interest,
    current: Option<FiberId>,
) -> io::Result<ListenerId> {
    let is_first = core.pollables[p.0].head.is_none();
    let lid = core.listen_impl(p, machine, mask, current);
    if let Err(err) = reactor.register(core, lid, is_first) {
        core.unlisten_impl(lid);
        return Err(err);
    }
    Ok(lid)
}

pub(crate) fn unlisten_op<V>(core: &mut Core<V>, reactor: &mut Reactor, lid: ListenerId) {
    reactor.deregister(core, lid);
    core.unlisten_impl(lid);
}

/// Tears down every listener of a pollable: `Close` to each machine, then a
/// full unlisten. Does not close the OS handle; callers close it afterwards.
pub(crate) fn deinit_op<V>(core: &mut Core<V>, reactor: &mut Reactor, p: PollableId) {
    core.pollables[p.0].closed = true;
    let mut cur = core.pollables[p.0].head;
    while let Some(lid) = cur {
        let next = core.listeners[lid.0].next;
        core.drive(lid, IoEvent::Close);
        unlisten_op(core, reactor, lid);
        cur = next;
    }
}

/// Dispatches one queued task: clears the guard flag, drops the listener the
/// fiber stopped waiting on, and runs the continuation.
fn run_one<V>(core: &mut Core<V>, reactor: &mut Reactor, task: Task<V>) {
    let Task { fiber, value, sig } = task;

    let waiting = match core.fibers.get_mut(fiber.0) {
        Some(st) => {
            st.scheduled = false;
            st.waiting
        }
        None => return,
    };
    if let Some(lid) = waiting {
        unlisten_op(core, reactor, lid);
    }

    let mut co = match core.fibers.get_mut(fiber.0).and_then(|st| st.co.take()) {
        Some(co) => co,
        None => return,
    };
    let step = co.resume(
        &mut Ctl {
            core: &mut *core,
            reactor: &mut *reactor,
            fiber,
        },
        value,
        sig,
    );
    if let Some(st) = core.fibers.get_mut(fiber.0) {
        st.co = Some(co);
    }

    if let Step::Fail(err) = step {
        match core.on_error.as_mut() {
            Some(hook) => hook(fiber, err.as_ref()),
            None => error!("fiber {:?} crashed with no diagnostic hook installed", fiber),
        }
    }
}

/// A single-threaded cooperative event loop.
pub struct Loop<V> {
    core: Core<V>,
    reactor: Reactor,
}

impl<V> Loop<V> {
    pub fn new() -> io::Result<Loop<V>> {
        Loop::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> io::Result<Loop<V>> {
        Ok(Loop {
            core: Core::new(),
            reactor: Reactor::new(&config)?,
        })
    }

    /// Registers a coroutine as a fresh fiber and schedules it with the unit
    /// value. Returns the fiber.
    pub fn call(&mut self, co: Box<dyn Coroutine<V>>) -> FiberId {
        self.core.call(co)
    }

    /// Registers a coroutine without scheduling it; pair with [`Loop::go`].
    pub fn spawn(&mut self, co: Box<dyn Coroutine<V>>) -> FiberId {
        self.core.spawn_fiber(co)
    }

    /// Schedules an existing fiber, resuming it with `value` or the unit
    /// value.
    pub fn go(&mut self, fiber: FiberId, value: Option<V>) {
        let wake = match value {
            Some(v) => Wake::Value(v),
            None => Wake::Nil,
        };
        self.core.schedule(fiber, wake);
    }

    /// Schedules the fiber with an error signal carrying `value`. Delivery
    /// is at-most-once: the resume invalidates every waiter the fiber still
    /// has registered.
    pub fn cancel(&mut self, fiber: FiberId, value: V) {
        self.core.cancel(fiber, Wake::Value(value));
    }

    /// Drops a fiber slot. Meant for the embedding's collector once the
    /// fiber object is unreachable; any queued or parked references to it
    /// simply go stale.
    pub fn release(&mut self, fiber: FiberId) {
        if self.core.fibers.contains(fiber.0) {
            self.core.fibers.remove(fiber.0);
        }
    }

    /// Creates a channel. Capacity 0 (the default elsewhere) means
    /// unbuffered rendezvous.
    pub fn channel(&mut self, capacity: usize) -> ChannelId {
        self.core.make_channel(capacity)
    }

    pub fn count(&self, ch: ChannelId) -> i32 {
        self.core.channels[ch.0].count()
    }

    pub fn capacity(&self, ch: ChannelId) -> i32 {
        self.core.channels[ch.0].limit
    }

    pub fn is_full(&self, ch: ChannelId) -> bool {
        self.core.channels[ch.0].is_full()
    }

    /// Wraps an OS handle for event subscription.
    pub fn register(&mut self, handle: Handle) -> PollableId {
        self.core.register_pollable(handle)
    }

    /// Installs a listener not tied to any fiber; the mask must include
    /// [`Interest::spawner`]. Fiber-bound listens go through [`Ctl::listen`].
    pub fn listen(
        &mut self,
        p: PollableId,
        machine: Box<dyn Machine<V>>,
        mask: Interest,
    ) -> io::Result<ListenerId> {
        listen_op(&mut self.core, &mut self.reactor, p, machine, mask, None)
    }

    /// Tears down a single listener early, emitting `Deinit` to its machine
    /// and restoring the pollable's aggregate interest.
    pub fn unlisten(&mut self, lid: ListenerId) {
        unlisten_op(&mut self.core, &mut self.reactor, lid);
    }

    /// Tears down a pollable's listeners. The OS handle stays open; close it
    /// after this returns.
    pub fn deinit(&mut self, p: PollableId) {
        deinit_op(&mut self.core, &mut self.reactor, p);
    }

    /// [`Loop::deinit`] plus dropping the pollable slot.
    pub fn unregister(&mut self, p: PollableId) {
        self.deinit(p);
        self.core.pollables.remove(p.0);
    }

    /// Aggregate interest over a pollable's listeners.
    pub fn interest(&self, p: PollableId) -> Interest {
        self.core.pollables[p.0].mask
    }

    pub fn active_listeners(&self) -> usize {
        self.core.active_listeners
    }

    /// Installs the diagnostic hook receiving fibers whose continuation
    /// failed.
    pub fn on_error<F>(&mut self, hook: F)
    where
        F: FnMut(FiberId, Option<&V>) + 'static,
    {
        self.core.on_error = Some(Box::new(hook));
    }

    /// GC traversal: reports every fiber and value reachable from the run
    /// queue, the timer heap, channel contents and pendings, and listeners.
    pub fn mark(&self, visit: &mut dyn FnMut(Reachable<'_, V>)) {
        for task in self.core.spawn.iter() {
            visit(Reachable::Fiber(task.fiber));
            match &task.value {
                Wake::Value(v) | Wake::Take(_, v) => visit(Reachable::Value(v)),
                _ => {}
            }
        }
        for to in self.core.timers.iter() {
            visit(Reachable::Fiber(to.fiber));
        }
        for (_, chan) in self.core.channels.iter() {
            for v in chan.items.iter() {
                visit(Reachable::Value(v));
            }
            for p in chan.read_pending.iter() {
                visit(Reachable::Fiber(p.fiber));
            }
            for p in chan.write_pending.iter() {
                visit(Reachable::Fiber(p.fiber));
            }
        }
        for (_, listener) in self.core.listeners.iter() {
            if let Some(fiber) = listener.fiber {
                visit(Reachable::Fiber(fiber));
            }
            if let Some(machine) = &listener.machine {
                machine.mark(&mut |v| visit(Reachable::Value(v)));
            }
        }
    }

    /// True when nothing can wake the loop again: no queued task, no live
    /// listener, no timer. Fibers parked on channels do not keep a loop
    /// alive.
    pub fn is_idle(&self) -> bool {
        self.core.active_listeners == 0
            && self.core.spawn.is_empty()
            && self.core.timers.is_empty()
    }

    /// One loop iteration: fire due timers, drain the run queue, then wait
    /// on the reactor until the next deadline.
    pub fn step(&mut self) -> io::Result<()> {
        let now = self.core.clock.now();
        while let Some(head) = self.core.timers.peek().copied() {
            if head.when > now {
                break;
            }
            self.core.timers.pop(0);
            if self.core.sched_id(head.fiber) == Some(head.sched_id) {
                if head.is_error {
                    self.core.cancel(head.fiber, Wake::Timeout);
                } else {
                    self.core.schedule(head.fiber, Wake::Nil);
                }
            }
        }

        while let Some(task) = self.core.spawn.pop() {
            run_one(&mut self.core, &mut self.reactor, task);
        }

        if self.core.active_listeners > 0 || !self.core.timers.is_empty() {
            // Drop timeouts whose fibers have moved on.
            let deadline = loop {
                match self.core.timers.peek().copied() {
                    None => break None,
                    Some(head) => {
                        if self.core.sched_id(head.fiber) == Some(head.sched_id) {
                            break Some(head.when);
                        }
                        self.core.timers.pop(0);
                    }
                }
            };
            if self.core.active_listeners == 0 && deadline.is_none() {
                return Ok(());
            }
            trace!("reactor wait, deadline {:?}", deadline);
            self.reactor.wait(&mut self.core, deadline)?;
        }
        Ok(())
    }

    /// Drives [`Loop::step`] until the loop is idle.
    pub fn run(&mut self) -> io::Result<()> {
        while !self.is_idle() {
            self.step()?;
        }
        Ok(())
    }
}

/// Per-resume context: the running fiber's handle on its loop.
pub struct Ctl<'a, V> {
    core: &'a mut Core<V>,
    reactor: &'a mut Reactor,
    fiber: FiberId,
}

impl<'a, V> Ctl<'a, V> {
    /// The fiber being resumed.
    pub fn fiber(&self) -> FiberId {
        self.fiber
    }

    pub fn call(&mut self, co: Box<dyn Coroutine<V>>) -> FiberId {
        self.core.call(co)
    }

    pub fn spawn(&mut self, co: Box<dyn Coroutine<V>>) -> FiberId {
        self.core.spawn_fiber(co)
    }

    pub fn go(&mut self, fiber: FiberId, value: Option<V>) {
        let wake = match value {
            Some(v) => Wake::Value(v),
            None => Wake::Nil,
        };
        self.core.schedule(fiber, wake);
    }

    pub fn cancel(&mut self, fiber: FiberId, value: V) {
        self.core.cancel(fiber, Wake::Value(value));
    }

    /// Installs a non-error timer for the current fiber. Return
    /// [`Step::Yield`] afterwards; the fiber resumes with the unit value
    /// once `sec` seconds have passed.
    pub fn sleep(&mut self, sec: f64) {
        self.add_timer(sec, false);
    }

    /// Installs an error timeout for the current fiber. Purely advisory: the
    /// fiber must suspend for it to matter, and any earlier resume stales
    /// it.
    pub fn addtimeout(&mut self, sec: f64) {
        self.add_timer(sec, true);
    }

    fn add_timer(&mut self, sec: f64, is_error: bool) {
        let sched_id = self.core.fibers[self.fiber.0].sched_id;
        self.core.timers.add(Timeout {
            when: self.core.clock.deadline(sec),
            fiber: self.fiber,
            sched_id,
            is_error,
        });
    }

    pub fn channel(&mut self, capacity: usize) -> ChannelId {
        self.core.make_channel(capacity)
    }

    pub fn count(&self, ch: ChannelId) -> i32 {
        self.core.channels[ch.0].count()
    }

    pub fn capacity(&self, ch: ChannelId) -> i32 {
        self.core.channels[ch.0].limit
    }

    pub fn is_full(&self, ch: ChannelId) -> bool {
        self.core.channels[ch.0].is_full()
    }

    /// Writes a value to a channel. Returns true when the channel was full
    /// and the fiber must yield; it resumes with [`Wake::Channel`] once a
    /// reader drains the parked item.
    pub fn give(&mut self, ch: ChannelId, value: V) -> bool {
        self.core.channel_push(self.fiber, ch, value, false)
    }

    /// Reads from a channel. Always yield afterwards: the item arrives as
    /// [`Wake::Value`] on the next resume whether it was immediately
    /// available or produced by a later give, preserving FIFO fairness.
    pub fn take(&mut self, ch: ChannelId) {
        if let Some(item) = self.core.channel_pop(self.fiber, ch, false) {
            let fiber = self.fiber;
            self.core.schedule(fiber, Wake::Value(item));
        }
    }

    /// Tries the clauses in order. `Some` carries the clause that fired
    /// ([`Wake::Give`] or [`Wake::Take`]) and the fiber keeps running.
    /// `None` means every clause was parked as a pending operation: yield,
    /// and the first clause to fire resumes the fiber with its result.
    pub fn select(&mut self, mut clauses: Vec<Clause<V>>) -> Option<Wake<V>> {
        let mut ready_at = None;
        for (i, clause) in clauses.iter().enumerate() {
            let hit = match clause {
                Clause::Give(ch, _) => {
                    let chan = &self.core.channels[ch.0];
                    chan.count() < chan.limit
                }
                Clause::Take(ch) => self.core.channels[ch.0].count() > 0,
            };
            if hit {
                ready_at = Some(i);
                break;
            }
        }

        if let Some(i) = ready_at {
            match clauses.swap_remove(i) {
                Clause::Give(ch, value) => {
                    self.core.channel_push(self.fiber, ch, value, true);
                    return Some(Wake::Give(ch));
                }
                Clause::Take(ch) => {
                    if let Some(item) = self.core.channel_pop(self.fiber, ch, true) {
                        return Some(Wake::Take(ch, item));
                    }
                    return None;
                }
            }
        }

        // Nothing ready: park a choice operation on every clause. Exactly
        // one fires; the epoch bump on resume stales the rest. An item a
        // write clause parks here can be drained by a later read clause of
        // the same call and is then dropped.
        for clause in clauses {
            match clause {
                Clause::Give(ch, value) => {
                    self.core.channel_push(self.fiber, ch, value, true);
                }
                Clause::Take(ch) => {
                    let _ = self.core.channel_pop(self.fiber, ch, true);
                }
            }
        }
        None
    }

    /// [`Ctl::select`] after a Fisher-Yates shuffle of the clauses, giving
    /// fairness across equally-ready channels.
    pub fn rselect(&mut self, mut clauses: Vec<Clause<V>>) -> Option<Wake<V>> {
        let mut i = clauses.len();
        while i > 1 {
            let swap_index = (self.core.rng.next_u32() % i as u32) as usize;
            clauses.swap(swap_index, i - 1);
            i -= 1;
        }
        self.select(clauses)
    }

    pub fn register(&mut self, handle: Handle) -> PollableId {
        self.core.register_pollable(handle)
    }

    /// Installs a listener for the current fiber and marks it waiting.
    /// Yield afterwards; the machine decides what the fiber resumes with.
    pub fn listen(
        &mut self,
        p: PollableId,
        machine: Box<dyn Machine<V>>,
        mask: Interest,
    ) -> io::Result<ListenerId> {
        listen_op(
            &mut *self.core,
            &mut *self.reactor,
            p,
            machine,
            mask,
            Some(self.fiber),
        )
    }

    pub fn deinit(&mut self, p: PollableId) {
        deinit_op(&mut *self.core, &mut *self.reactor, p);
    }
}

/// Context handed to a listener machine for one event.
pub struct EventCx<'a, V> {
    core: &'a mut Core<V>,
    lid: ListenerId,
}

impl<'a, V> EventCx<'a, V> {
    /// The fiber this listener belongs to; `None` for spawner listeners.
    pub fn fiber(&self) -> Option<FiberId> {
        self.core.listeners[self.lid.0].fiber
    }

    pub fn pollable(&self) -> PollableId {
        self.core.listeners[self.lid.0].pollable
    }

    pub fn handle(&self) -> Handle {
        let p = self.pollable();
        self.core.pollables[p.0].handle
    }

    /// True once the pollable entered teardown.
    pub fn closed(&self) -> bool {
        let p = self.pollable();
        self.core.pollables[p.0].closed
    }

    pub fn schedule(&mut self, fiber: FiberId, value: Wake<V>) {
        self.core.schedule(fiber, value);
    }

    pub fn cancel(&mut self, fiber: FiberId, value: V) {
        self.core.cancel(fiber, Wake::Value(value));
    }

    /// Starts a fresh fiber; spawner machines use this to hand accepted work
    /// off.
    pub fn call(&mut self, co: Box<dyn Coroutine<V>>) -> FiberId {
        self.core.call(co)
    }

    /// Tags this listener with the overlapped pointer its completions will
    /// carry.
    #[cfg(windows)]
    pub fn set_tag(&mut self, tag: *mut std::ffi::c_void) {
        self.core.listeners[self.lid.0].tag = tag;
    }
}
