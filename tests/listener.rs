//! Reactor-facing tests: listener machines on real pipes.

#![cfg(unix)]

use std::cell::Cell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use fibrio::{
    coroutine, EventCx, Interest, IoEvent, Loop, Machine, Status, Step, Wake,
};

fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    (fds[0], fds[1])
}

fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

fn write_byte(fd: RawFd) {
    let buf = [1u8];
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, 1) };
    assert_eq!(n, 1);
}

/// Resumes its fiber as soon as the handle reads ready.
struct WakeOnRead;

impl Machine<i64> for WakeOnRead {
    fn drive(&mut self, cx: &mut EventCx<'_, i64>, event: IoEvent) -> Status {
        match event {
            IoEvent::Read => {
                if let Some(fiber) = cx.fiber() {
                    cx.schedule(fiber, Wake::Value(1));
                }
                Status::Done
            }
            _ => Status::NotDone,
        }
    }
}

/// Never completes; placeholder for mask bookkeeping tests.
struct Quiet;

impl Machine<i64> for Quiet {
    fn drive(&mut self, _cx: &mut EventCx<'_, i64>, _event: IoEvent) -> Status {
        Status::NotDone
    }
}

/// Starts a fresh fiber per readable edge, the accept-loop shape.
struct SpawnOnRead {
    flag: Rc<Cell<bool>>,
}

impl Machine<i64> for SpawnOnRead {
    fn drive(&mut self, cx: &mut EventCx<'_, i64>, event: IoEvent) -> Status {
        match event {
            IoEvent::Read => {
                let flag = self.flag.clone();
                cx.call(coroutine(move |_ctl, _wake, _sig| {
                    flag.set(true);
                    Step::Complete
                }));
                Status::Done
            }
            _ => Status::NotDone,
        }
    }
}

#[test]
fn readable_pipe_wakes_listener_fiber() {
    let mut lp: Loop<i64> = Loop::new().unwrap();
    let (r, w) = pipe();
    let p = lp.register(r);
    let woken = Rc::new(Cell::new(false));

    let flag = woken.clone();
    lp.call(coroutine(move |ctl, wake, _sig| match wake {
        Wake::Nil => {
            ctl.listen(p, Box::new(WakeOnRead), Interest::read()).unwrap();
            Step::Yield
        }
        Wake::Value(_) => {
            flag.set(true);
            Step::Complete
        }
        _ => Step::Fail(None),
    }));

    lp.call(coroutine(move |_ctl, wake, _sig| match wake {
        Wake::Nil => {
            write_byte(w);
            Step::Complete
        }
        _ => Step::Fail(None),
    }));

    lp.run().unwrap();
    assert!(woken.get());
    assert_eq!(lp.active_listeners(), 0);

    lp.unregister(p);
    close(r);
    close(w);
}

#[test]
fn spawner_listener_starts_fiber_per_event() {
    let mut lp: Loop<i64> = Loop::new().unwrap();
    let (r, w) = pipe();
    let p = lp.register(r);
    let accepted = Rc::new(Cell::new(false));

    lp.listen(
        p,
        Box::new(SpawnOnRead {
            flag: accepted.clone(),
        }),
        Interest::read() | Interest::spawner(),
    )
    .unwrap();
    assert_eq!(lp.active_listeners(), 1);

    lp.call(coroutine(move |_ctl, wake, _sig| match wake {
        Wake::Nil => {
            write_byte(w);
            Step::Complete
        }
        _ => Step::Fail(None),
    }));

    lp.run().unwrap();
    assert!(accepted.get());
    assert_eq!(lp.active_listeners(), 0);

    lp.unregister(p);
    close(r);
    close(w);
}

#[test]
fn unlisten_restores_aggregate_interest() {
    let mut lp: Loop<i64> = Loop::new().unwrap();
    let (r, w) = pipe();
    let p = lp.register(r);

    let l1 = lp
        .listen(p, Box::new(Quiet), Interest::read() | Interest::spawner())
        .unwrap();
    lp.listen(p, Box::new(Quiet), Interest::write() | Interest::spawner())
        .unwrap();
    assert!(lp.interest(p).is_read());
    assert!(lp.interest(p).is_write());
    assert_eq!(lp.active_listeners(), 2);

    lp.unlisten(l1);
    assert!(!lp.interest(p).is_read());
    assert!(lp.interest(p).is_write());
    assert_eq!(lp.active_listeners(), 1);

    lp.deinit(p);
    assert!(lp.interest(p).is_empty());
    assert_eq!(lp.active_listeners(), 0);

    lp.unregister(p);
    close(r);
    close(w);
}

#[test]
#[should_panic(expected = "duplicate event")]
fn duplicate_listen_panics() {
    let mut lp: Loop<i64> = Loop::new().unwrap();
    let (r, _w) = pipe();
    let p = lp.register(r);

    lp.listen(p, Box::new(Quiet), Interest::read() | Interest::spawner())
        .unwrap();
    let _ = lp.listen(p, Box::new(Quiet), Interest::read() | Interest::spawner());
}

#[test]
#[should_panic(expected = "already waiting")]
fn second_listen_while_waiting_panics() {
    let mut lp: Loop<i64> = Loop::new().unwrap();
    let (r, w) = pipe();
    let p1 = lp.register(r);
    let p2 = lp.register(w);

    lp.call(coroutine(move |ctl, wake, _sig| match wake {
        Wake::Nil => {
            ctl.listen(p1, Box::new(WakeOnRead), Interest::read()).unwrap();
            let _ = ctl.listen(p2, Box::new(WakeOnRead), Interest::read());
            Step::Yield
        }
        _ => Step::Fail(None),
    }));
    let _ = lp.run();
}
