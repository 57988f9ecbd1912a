//! The event loop driving an interpreter: tasks, timers, and handle
//! scopes shared with the engine heap.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use perch::{
    DiagnosticKind, EventLoop, Interp, LoopError, ManualClock, NullSink, ObjKind, Priority, Task,
    Value,
};

use super::{interp_lock, ready_interp};

#[test]
fn test_tasks_run_in_priority_bands_then_fifo() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let lp = interp.make_loop();
    let order = Rc::new(RefCell::new(Vec::new()));

    for (priority, tag) in [
        (Priority::Default, "d1"),
        (Priority::Low, "l1"),
        (Priority::High, "h1"),
        (Priority::Default, "d2"),
        (Priority::High, "h2"),
    ] {
        let order = order.clone();
        lp.post(Task::with_priority(priority, move |_: &mut Interp, _| {
            order.borrow_mut().push(tag);
        }));
    }

    assert!(lp.iterate(&mut interp, false).unwrap());
    assert_eq!(*order.borrow(), vec!["h1", "h2", "d1", "d2", "l1"]);
}

#[test]
fn test_tasks_reach_interpreter_state() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let lp = interp.make_loop();
    lp.post(Task::new(|cx: &mut Interp, _| {
        let _ = cx.run_snippet("set pumped true");
    }));
    assert!(lp.iterate(&mut interp, false).unwrap());
    assert_eq!(interp.engine().global("pumped"), Some(Value::Bool(true)));
}

#[test]
fn test_posts_during_dispatch_wait_for_the_next_iteration() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let lp = Rc::new(interp.make_loop());
    let order = Rc::new(RefCell::new(Vec::new()));

    let reposter = lp.clone();
    let first = order.clone();
    lp.post(Task::new(move |_: &mut Interp, _| {
        first.borrow_mut().push("first");
        let second = first.clone();
        reposter.post(Task::new(move |_: &mut Interp, _| {
            second.borrow_mut().push("second");
        }));
    }));

    assert!(lp.iterate(&mut interp, false).unwrap());
    assert_eq!(*order.borrow(), vec!["first"]);
    assert!(lp.iterate(&mut interp, false).unwrap());
    assert_eq!(*order.borrow(), vec!["first", "second"]);
    assert!(!lp.iterate(&mut interp, false).unwrap());
}

struct CountedPayload {
    drops: Rc<Cell<usize>>,
}

impl Drop for CountedPayload {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[test]
fn test_task_payload_dropped_exactly_once_dispatched_or_not() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let lp = interp.make_loop();
    let drops = Rc::new(Cell::new(0));
    let ran = Rc::new(Cell::new(0));

    for _ in 0..2 {
        let payload = CountedPayload {
            drops: drops.clone(),
        };
        let ran = ran.clone();
        lp.post(Task::with_payload(
            Priority::Default,
            payload,
            move |_: &mut Interp, _, _payload| {
                ran.set(ran.get() + 1);
            },
        ));
    }
    assert!(lp.iterate(&mut interp, false).unwrap());
    assert_eq!(ran.get(), 2);
    assert_eq!(drops.get(), 2);

    // A task the loop never dispatches still releases its payload on
    // teardown.
    lp.post(Task::with_payload(
        Priority::Default,
        CountedPayload {
            drops: drops.clone(),
        },
        |_: &mut Interp, _, _| {},
    ));
    drop(lp);
    assert_eq!(drops.get(), 3);
    assert_eq!(ran.get(), 2);
}

#[test]
fn test_timer_fires_through_interpreter_context() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let clock = Rc::new(ManualClock::new());
    let lp = EventLoop::with_parts(
        interp.engine().heap().clone(),
        clock.clone(),
        Rc::new(NullSink),
    );

    lp.add_timer(10, |cx: &mut Interp, _| {
        cx.engine_mut().set_global("fired", Value::Bool(true));
    });
    let stale = lp.add_timer(5, |cx: &mut Interp, _| {
        cx.engine_mut().set_global("stale", Value::Bool(true));
    });
    lp.cancel_timer(stale);

    assert!(!lp.iterate(&mut interp, false).unwrap());
    assert_eq!(interp.engine().global("fired"), None);

    clock.advance(10);
    assert!(lp.iterate(&mut interp, false).unwrap());
    assert_eq!(interp.engine().global("fired"), Some(Value::Bool(true)));
    assert_eq!(interp.engine().global("stale"), None);
}

#[test]
fn test_quit_finishes_the_current_snapshot() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let lp = Rc::new(interp.make_loop());
    let order = Rc::new(RefCell::new(Vec::new()));

    let quitter = lp.clone();
    let first = order.clone();
    lp.post(Task::new(move |_: &mut Interp, _| {
        first.borrow_mut().push("first");
        quitter.quit();
    }));
    let second = order.clone();
    lp.post(Task::new(move |_: &mut Interp, _| {
        second.borrow_mut().push("second");
    }));

    lp.run(&mut interp).unwrap();
    assert_eq!(*order.borrow(), vec!["first", "second"]);
    assert!(!lp.is_running());
}

#[test]
fn test_nested_run_is_rejected_and_reported() {
    let _guard = interp_lock();
    let (mut interp, sink, _dir) = ready_interp();
    let lp = Rc::new(interp.make_loop());
    let outcome = Rc::new(RefCell::new(Vec::new()));

    let nested = lp.clone();
    let seen = outcome.clone();
    lp.post(Task::new(move |cx: &mut Interp, _| {
        match nested.run(cx) {
            Err(LoopError::AlreadyRunning) => seen.borrow_mut().push("rejected"),
            Ok(()) => seen.borrow_mut().push("ran"),
        }
        nested.quit();
    }));

    lp.run(&mut interp).unwrap();
    assert_eq!(*outcome.borrow(), vec!["rejected"]);
    assert_eq!(sink.count(DiagnosticKind::LoopMisuse), 1);
    assert!(!lp.is_running());
}

#[test]
fn test_iteration_scope_shares_the_engine_heap() {
    let _guard = interp_lock();
    let (mut interp, _sink, _dir) = ready_interp();
    let lp = interp.make_loop();
    let baseline = interp.engine().heap().live();
    let inside = Rc::new(Cell::new(0));

    let seen = inside.clone();
    lp.post(Task::new(move |cx: &mut Interp, scope| {
        let heap = cx.engine().heap().clone();
        let _tmp = heap.alloc_in(scope, ObjKind::List(vec![Value::Int(1)]));
        seen.set(heap.live());
    }));

    assert!(lp.iterate(&mut interp, false).unwrap());
    assert_eq!(inside.get(), baseline + 1);
    assert_eq!(interp.engine().heap().live(), baseline);
}
