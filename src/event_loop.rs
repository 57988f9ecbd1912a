//! A cooperative, single-active event loop over three source kinds:
//! posted tasks, one-shot timers, and wake-driven watches.
//!
//! Ordering rules:
//!
//! * tasks dispatch by priority, FIFO within a priority;
//! * a task posted while the loop is dispatching runs on the *next*
//!   iteration, never the current one (each iteration dispatches a
//!   snapshot of the ready queue);
//! * timers fire in deadline order, FIFO among equal deadlines.
//!
//! Each iteration opens one handle [`Scope`]; values a callback allocates
//! mortal in it die when the iteration ends. [`EventLoop::quit`] is
//! cooperative: the current iteration finishes its snapshot, then the loop
//! returns. Entering a loop that is already running is refused with
//! [`LoopError::AlreadyRunning`] and one `LoopMisuse` diagnostic; the
//! running loop is not disturbed.
//!
//! A blocked loop sleeps until the earliest timer deadline or until a
//! [`Waker`] fires. The waker is the only piece that may cross threads;
//! everything else stays on the embedding thread.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::error::LoopError;
use crate::heap::{Heap, Scope};
use crate::platform::{DiagnosticKind, DiagnosticSink, TracingSink};
use crate::prelude::*;

// ============================================================================
// Clocks
// ============================================================================

/// Time source for timer deadlines, in milliseconds from an arbitrary
/// origin.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Monotonic wall clock.
#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Hand-cranked clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock { now: Cell::new(0) }
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Dispatch priority. Within one priority, tasks run in post order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    High,
    #[default]
    Default,
    Low,
}

impl Priority {
    fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Default => 1,
            Priority::Low => 2,
        }
    }
}

/// A unit of deferred work.
///
/// The work closure runs at most once. Anything the task owns (its
/// captures, or the payload given to [`Task::with_payload`]) is dropped
/// exactly once: when the closure runs, or on loop teardown if it never
/// does.
pub struct Task<C> {
    priority: Priority,
    work: Box<dyn FnOnce(&mut C, &Scope)>,
}

impl<C> Task<C> {
    pub fn new(work: impl FnOnce(&mut C, &Scope) + 'static) -> Self {
        Self::with_priority(Priority::Default, work)
    }

    pub fn with_priority(priority: Priority, work: impl FnOnce(&mut C, &Scope) + 'static) -> Self {
        Task {
            priority,
            work: Box::new(work),
        }
    }

    /// Attach owned state with a `Drop` the embedder relies on. The
    /// payload is passed to the work closure by reference and dropped
    /// with it.
    pub fn with_payload<P, F>(priority: Priority, payload: P, work: F) -> Self
    where
        P: 'static,
        F: FnOnce(&mut C, &Scope, &P) + 'static,
    {
        Task {
            priority,
            work: Box::new(move |cx, scope| work(cx, scope, &payload)),
        }
    }
}

impl<C> fmt::Debug for Task<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

struct QueuedTask<C> {
    rank: u8,
    seq: u64,
    task: Task<C>,
}

impl<C> PartialEq for QueuedTask<C> {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl<C> Eq for QueuedTask<C> {}

impl<C> PartialOrd for QueuedTask<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for QueuedTask<C> {
    // Max-heap: the greatest entry is the lowest rank, then the lowest seq.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// ============================================================================
// Timers and watches
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

struct TimerEntry<C> {
    deadline_ms: u64,
    seq: u64,
    id: TimerId,
    work: Box<dyn FnOnce(&mut C, &Scope)>,
}

impl<C> PartialEq for TimerEntry<C> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ms == other.deadline_ms && self.seq == other.seq
    }
}

impl<C> Eq for TimerEntry<C> {}

impl<C> PartialOrd for TimerEntry<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for TimerEntry<C> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline_ms
            .cmp(&other.deadline_ms)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

struct WatchEntry<C> {
    id: WatchId,
    callback: Box<dyn FnMut(&mut C, &Scope)>,
}

// ============================================================================
// Waker
// ============================================================================

/// Thread-safe wakeup handle.
///
/// Waking a blocked loop makes it poll its watches on the next iteration.
/// Waking an idle or busy loop is harmless.
#[derive(Debug, Clone)]
pub struct Waker {
    tx: Sender<()>,
}

impl Waker {
    pub fn wake(&self) {
        // A dead receiver means the loop is gone; nothing to wake.
        let _ = self.tx.send(());
    }
}

// ============================================================================
// The loop
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Running,
}

/// The event loop, generic over the embedder context handed to callbacks.
pub struct EventLoop<C> {
    heap: Heap,
    clock: Rc<dyn Clock>,
    sink: Rc<dyn DiagnosticSink>,
    state: Cell<LoopState>,
    active: Cell<bool>,
    tx: Sender<()>,
    rx: Receiver<()>,
    wake_pending: Cell<bool>,
    ready: RefCell<BinaryHeap<QueuedTask<C>>>,
    timers: RefCell<BinaryHeap<Reverse<TimerEntry<C>>>>,
    cancelled_timers: RefCell<FxHashSet<TimerId>>,
    watches: RefCell<Vec<WatchEntry<C>>>,
    removed_watches: RefCell<FxHashSet<WatchId>>,
    next_seq: Cell<u64>,
    next_timer_id: Cell<u64>,
    next_watch_id: Cell<u64>,
}

fn bump(counter: &Cell<u64>) -> u64 {
    let v = counter.get();
    counter.set(v + 1);
    v
}

impl<C> EventLoop<C> {
    pub fn new() -> Self {
        Self::with_parts(
            Heap::new(),
            Rc::new(SystemClock::new()),
            Rc::new(TracingSink),
        )
    }

    /// Build a loop over an existing heap, clock, and sink. Embedders that
    /// share a heap with a script engine pass a clone of it here so
    /// iteration scopes and engine scopes account against the same space.
    pub fn with_parts(heap: Heap, clock: Rc<dyn Clock>, sink: Rc<dyn DiagnosticSink>) -> Self {
        let (tx, rx) = channel();
        EventLoop {
            heap,
            clock,
            sink,
            state: Cell::new(LoopState::Idle),
            active: Cell::new(false),
            tx,
            rx,
            wake_pending: Cell::new(false),
            ready: RefCell::new(BinaryHeap::new()),
            timers: RefCell::new(BinaryHeap::new()),
            cancelled_timers: RefCell::new(FxHashSet::default()),
            watches: RefCell::new(Vec::new()),
            removed_watches: RefCell::new(FxHashSet::default()),
            next_seq: Cell::new(0),
            next_timer_id: Cell::new(0),
            next_watch_id: Cell::new(0),
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn is_running(&self) -> bool {
        self.state.get() == LoopState::Running
    }

    /// Queue a task for the next iteration.
    pub fn post(&self, task: Task<C>) {
        let seq = bump(&self.next_seq);
        self.ready.borrow_mut().push(QueuedTask {
            rank: task.priority.rank(),
            seq,
            task,
        });
    }

    pub fn waker(&self) -> Waker {
        Waker {
            tx: self.tx.clone(),
        }
    }

    /// Arm a one-shot timer `delay_ms` from now.
    pub fn add_timer<F>(&self, delay_ms: u64, work: F) -> TimerId
    where
        F: FnOnce(&mut C, &Scope) + 'static,
    {
        let id = TimerId(bump(&self.next_timer_id));
        let seq = bump(&self.next_seq);
        let deadline_ms = self.clock.now_ms().saturating_add(delay_ms);
        self.timers.borrow_mut().push(Reverse(TimerEntry {
            deadline_ms,
            seq,
            id,
            work: Box::new(work),
        }));
        id
    }

    /// Cancel a pending timer. Cancelling an already-fired or unknown
    /// timer does nothing.
    pub fn cancel_timer(&self, id: TimerId) {
        self.cancelled_timers.borrow_mut().insert(id);
    }

    /// Install a watch: a callback polled on every iteration that follows
    /// a wakeup.
    pub fn add_watch<F>(&self, callback: F) -> WatchId
    where
        F: FnMut(&mut C, &Scope) + 'static,
    {
        let id = WatchId(bump(&self.next_watch_id));
        self.watches.borrow_mut().push(WatchEntry {
            id,
            callback: Box::new(callback),
        });
        id
    }

    pub fn remove_watch(&self, id: WatchId) {
        self.watches.borrow_mut().retain(|w| w.id != id);
        // The entry may be in flight in a dispatch snapshot; record the id
        // so the merge-back drops it.
        self.removed_watches.borrow_mut().insert(id);
    }

    /// Ask the loop to stop. The current iteration, if one is in
    /// progress, finishes dispatching first.
    pub fn quit(&self) {
        self.active.set(false);
        let _ = self.tx.send(());
    }

    /// Run until [`quit`](EventLoop::quit). Fails without side effects if
    /// the loop is already running.
    pub fn run(&self, cx: &mut C) -> Result<(), LoopError> {
        self.begin()?;
        tracing::trace!(target: "perch", "event loop entered");
        self.active.set(true);
        while self.active.get() {
            self.turn(cx, true);
        }
        self.state.set(LoopState::Idle);
        tracing::trace!(target: "perch", "event loop finished");
        Ok(())
    }

    /// Run a single iteration. With `may_block` the iteration sleeps
    /// until something is runnable; without it the iteration dispatches
    /// whatever is due and returns. `Ok(true)` means at least one
    /// callback ran.
    pub fn iterate(&self, cx: &mut C, may_block: bool) -> Result<bool, LoopError> {
        self.begin()?;
        let did_work = self.turn(cx, may_block);
        self.state.set(LoopState::Idle);
        Ok(did_work)
    }

    fn begin(&self) -> Result<(), LoopError> {
        if self.state.get() == LoopState::Running {
            self.sink.report(
                DiagnosticKind::LoopMisuse,
                "event loop entered while already running",
            );
            return Err(LoopError::AlreadyRunning);
        }
        self.state.set(LoopState::Running);
        Ok(())
    }

    fn turn(&self, cx: &mut C, may_block: bool) -> bool {
        self.drain_wakes();
        if may_block && !self.has_immediate_work() {
            self.wait_for_event();
        }

        let scope = self.heap.open_scope();
        let mut did_work = self.dispatch_timers(cx, &scope);
        did_work |= self.dispatch_watches(cx, &scope);
        did_work |= self.dispatch_tasks(cx, &scope);
        did_work
    }

    fn drain_wakes(&self) {
        while self.rx.try_recv().is_ok() {
            self.wake_pending.set(true);
        }
    }

    fn has_immediate_work(&self) -> bool {
        if self.wake_pending.get() || !self.ready.borrow().is_empty() {
            return true;
        }
        match self.next_deadline() {
            Some(deadline) => deadline <= self.clock.now_ms(),
            None => false,
        }
    }

    /// Earliest live timer deadline, discarding cancelled entries found on
    /// the way.
    fn next_deadline(&self) -> Option<u64> {
        let mut timers = self.timers.borrow_mut();
        let mut cancelled = self.cancelled_timers.borrow_mut();
        loop {
            let (deadline, is_cancelled) = match timers.peek() {
                None => return None,
                Some(Reverse(entry)) => (entry.deadline_ms, cancelled.contains(&entry.id)),
            };
            if is_cancelled {
                if let Some(Reverse(entry)) = timers.pop() {
                    cancelled.remove(&entry.id);
                }
                continue;
            }
            return Some(deadline);
        }
    }

    fn wait_for_event(&self) {
        let woke = match self.next_deadline() {
            Some(deadline) => {
                let now = self.clock.now_ms();
                let wait = Duration::from_millis(deadline.saturating_sub(now));
                match self.rx.recv_timeout(wait) {
                    Ok(()) => true,
                    Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
                }
            }
            // No timers: sleep until a waker fires. The loop holds its own
            // sender, so the channel cannot disconnect under us.
            None => self.rx.recv().is_ok(),
        };
        if woke {
            self.wake_pending.set(true);
        }
        self.drain_wakes();
    }

    fn dispatch_timers(&self, cx: &mut C, scope: &Scope) -> bool {
        let now = self.clock.now_ms();
        let mut due = Vec::new();
        {
            let mut timers = self.timers.borrow_mut();
            let mut cancelled = self.cancelled_timers.borrow_mut();
            loop {
                let fire = match timers.peek() {
                    Some(Reverse(entry)) => {
                        entry.deadline_ms <= now || cancelled.contains(&entry.id)
                    }
                    None => break,
                };
                if !fire {
                    break;
                }
                if let Some(Reverse(entry)) = timers.pop() {
                    if !cancelled.remove(&entry.id) {
                        due.push(entry);
                    }
                }
            }
        }
        let fired = !due.is_empty();
        for entry in due {
            (entry.work)(cx, scope);
        }
        fired
    }

    fn dispatch_watches(&self, cx: &mut C, scope: &Scope) -> bool {
        if !self.wake_pending.replace(false) {
            return false;
        }
        // Take the table so callbacks may add or remove watches freely.
        let mut current = self.watches.take();
        let mut ran = false;
        for entry in &mut current {
            if self.removed_watches.borrow().contains(&entry.id) {
                continue;
            }
            ran = true;
            (entry.callback)(cx, scope);
        }
        let added = self.watches.take();
        current.extend(added);
        let mut removed = self.removed_watches.borrow_mut();
        current.retain(|w| !removed.contains(&w.id));
        removed.clear();
        *self.watches.borrow_mut() = current;
        ran
    }

    /// Dispatch a snapshot of the ready queue. Tasks posted by the
    /// snapshot itself land in the (now empty) queue for the next
    /// iteration.
    fn dispatch_tasks(&self, cx: &mut C, scope: &Scope) -> bool {
        let mut batch = self.ready.take();
        if batch.is_empty() {
            return false;
        }
        while let Some(queued) = batch.pop() {
            (queued.task.work)(cx, scope);
        }
        true
    }
}

impl<C> Default for EventLoop<C> {
    fn default() -> Self {
        Self::new()
    }
}
