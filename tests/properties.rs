//! Invariant checks over the channel and cancellation machinery.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use fibrio::{coroutine, Clause, Loop, Signal, Step, Wake};

// A single writer may overshoot the capacity by exactly one parked item;
// that slot is what carries the unbuffered hand-off.
#[test]
fn single_writer_overshoots_by_at_most_one() {
    let mut lp: Loop<i64> = Loop::new().unwrap();
    let ch = lp.channel(1);
    let got = Rc::new(RefCell::new(Vec::new()));

    let mut next = 1;
    lp.call(coroutine(move |ctl, wake, _sig| match wake {
        Wake::Nil | Wake::Channel(_) => {
            assert!(ctl.count(ch) <= 2);
            while next <= 4 {
                let v = next;
                next += 1;
                if ctl.give(ch, v) {
                    return Step::Yield;
                }
            }
            Step::Complete
        }
        _ => Step::Fail(None),
    }));

    let log = got.clone();
    lp.call(coroutine(move |ctl, wake, _sig| match wake {
        Wake::Nil => {
            assert!(ctl.count(ch) <= 2);
            ctl.take(ch);
            Step::Yield
        }
        Wake::Value(v) => {
            assert!(ctl.count(ch) <= 2);
            log.borrow_mut().push(v);
            if log.borrow().len() < 4 {
                ctl.take(ch);
                Step::Yield
            } else {
                Step::Complete
            }
        }
        _ => Step::Fail(None),
    }));

    lp.run().unwrap();
    assert_eq!(*got.borrow(), vec![1, 2, 3, 4]);
    assert_eq!(lp.count(ch), 0);
}

// A select that parks write clauses on several channels is woken by exactly
// one of them; the pendings left on the other channels are stale and must
// not re-schedule the fiber when their parked items are drained later.
#[test]
fn select_writer_goes_stale_on_other_channels() {
    let mut lp: Loop<i64> = Loop::new().unwrap();
    let c1 = lp.channel(0);
    let c2 = lp.channel(0);
    let events: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    let log = events.clone();
    lp.call(coroutine(move |ctl, wake, _sig| match wake {
        Wake::Nil => {
            let res = ctl.select(vec![Clause::Give(c1, 10), Clause::Give(c2, 20)]);
            assert!(res.is_none());
            Step::Yield
        }
        Wake::Give(ch) => {
            log.borrow_mut().push(format!("selected c{}", if ch == c1 { 1 } else { 2 }));
            Step::Complete
        }
        _ => Step::Fail(None),
    }));

    // The first reader drains c1, waking the selector there.
    let log = events.clone();
    lp.call(coroutine(move |ctl, wake, _sig| match wake {
        Wake::Nil => {
            ctl.take(c1);
            Step::Yield
        }
        Wake::Value(v) => {
            log.borrow_mut().push(format!("r1 {}", v));
            Step::Complete
        }
        _ => Step::Fail(None),
    }));
    lp.run().unwrap();

    // The second reader finds the value parked on c2 but must not wake the
    // selector again.
    let log = events.clone();
    lp.call(coroutine(move |ctl, wake, _sig| match wake {
        Wake::Nil => {
            ctl.take(c2);
            Step::Yield
        }
        Wake::Value(v) => {
            log.borrow_mut().push(format!("r2 {}", v));
            Step::Complete
        }
        _ => Step::Fail(None),
    }));
    lp.run().unwrap();

    let events_ref = events.borrow();
    let got: Vec<&str> = events_ref.iter().map(|s| s.as_str()).collect();
    assert_eq!(got, vec!["r1 10", "selected c1", "r2 20"]);
}

// Cancellation wins over a long sleep: the fiber resumes once with the
// error signal and its timer entry is dropped instead of holding the loop.
#[test]
fn cancel_preempts_sleep() {
    let mut lp: Loop<&'static str> = Loop::new().unwrap();
    let resumes = Rc::new(RefCell::new(Vec::new()));

    let log = resumes.clone();
    let mut started = false;
    let sleeper = lp.call(coroutine(move |ctl, wake, sig| {
        if !started {
            started = true;
            ctl.sleep(10.0);
            return Step::Yield;
        }
        match wake {
            Wake::Value(v) => {
                log.borrow_mut().push((v, sig == Signal::Error));
                Step::Complete
            }
            _ => Step::Fail(None),
        }
    }));

    let mut started = false;
    lp.call(coroutine(move |ctl, wake, _sig| {
        if !started {
            started = true;
            ctl.sleep(0.01);
            return Step::Yield;
        }
        match wake {
            Wake::Nil => {
                ctl.cancel(sleeper, "stop");
                Step::Complete
            }
            _ => Step::Fail(None),
        }
    }));

    let t0 = Instant::now();
    lp.run().unwrap();
    assert!(t0.elapsed() < Duration::from_secs(5));
    assert_eq!(*resumes.borrow(), vec![("stop", true)]);
}

// select returns immediately when a clause is already ready, in caller
// order for the plain variant.
#[test]
fn select_prefers_earlier_ready_clause() {
    let mut lp: Loop<i64> = Loop::new().unwrap();
    let c1 = lp.channel(1);
    let c2 = lp.channel(1);

    lp.call(coroutine(move |ctl, wake, _sig| match wake {
        Wake::Nil => {
            assert!(!ctl.give(c1, 1));
            assert!(!ctl.give(c2, 2));
            Step::Complete
        }
        _ => Step::Fail(None),
    }));
    lp.run().unwrap();

    let picked = Rc::new(RefCell::new(Vec::new()));
    let log = picked.clone();
    lp.call(coroutine(move |ctl, wake, _sig| match wake {
        Wake::Nil => {
            match ctl.select(vec![Clause::Take(c2), Clause::Take(c1)]) {
                Some(Wake::Take(ch, v)) => {
                    log.borrow_mut().push((ch == c2, v));
                    Step::Complete
                }
                _ => Step::Fail(None),
            }
        }
        _ => Step::Fail(None),
    }));
    lp.run().unwrap();

    assert_eq!(*picked.borrow(), vec![(true, 2)]);
    assert_eq!(lp.count(c1), 1);
    assert_eq!(lp.count(c2), 0);
}

// A write clause fires immediately when its buffered channel has room.
#[test]
fn select_write_clause_fires_with_room() {
    let mut lp: Loop<i64> = Loop::new().unwrap();
    let c1 = lp.channel(0);
    let c2 = lp.channel(1);

    let done = Rc::new(RefCell::new(Vec::new()));
    let log = done.clone();
    lp.call(coroutine(move |ctl, wake, _sig| match wake {
        Wake::Nil => {
            match ctl.select(vec![Clause::Give(c1, 5), Clause::Give(c2, 6)]) {
                Some(Wake::Give(ch)) => {
                    log.borrow_mut().push(ch == c2);
                    Step::Complete
                }
                _ => Step::Fail(None),
            }
        }
        _ => Step::Fail(None),
    }));
    lp.run().unwrap();

    // c1 is unbuffered with no reader, so only c2 can fire.
    assert_eq!(*done.borrow(), vec![true]);
    assert_eq!(lp.count(c1), 0);
    assert_eq!(lp.count(c2), 1);
}
