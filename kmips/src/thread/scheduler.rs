//! Thread scheduler

use super::{CURRENT, Context, Thread, ThreadState};
use crate::Kernel;
use crossbeam_queue::SegQueue;
use machine::{HaltReason, MachineHalted, interrupt::InterruptState, spinlock::held_locks};
use std::{
    panic::{AssertUnwindSafe, catch_unwind, resume_unwind},
    sync::Arc,
};

/// A trait for a thread scheduler.
///
/// The [`Scheduler`] trait defines the common functionality expected from a
/// thread scheduler. The kernel pushes every thread that becomes ready with
/// [`push_to_queue`] and consults [`next_to_run`] whenever the running thread
/// gives up the CPU.
///
/// [`push_to_queue`]: Scheduler::push_to_queue
/// [`next_to_run`]: Scheduler::next_to_run
pub trait Scheduler {
    /// Pops the next thread to run, or `None` if no thread is ready.
    fn next_to_run(&self) -> Option<Arc<Thread>>;

    /// Push a thread `th` into scheduling queue.
    fn push_to_queue(&self, th: Arc<Thread>);

    /// Number of ready threads.
    fn len(&self) -> usize;

    /// Returns true if no thread is ready.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A First-in-first-out scheduler.
#[derive(Default)]
pub struct Fifo {
    runqueue: SegQueue<Arc<Thread>>,
}

impl Scheduler for Fifo {
    fn next_to_run(&self) -> Option<Arc<Thread>> {
        self.runqueue.pop()
    }

    fn push_to_queue(&self, th: Arc<Thread>) {
        self.runqueue.push(th);
    }

    fn len(&self) -> usize {
        self.runqueue.len()
    }
}

fn pick_next(kernel: &Kernel) -> Arc<Thread> {
    match kernel.scheduler().next_to_run() {
        Some(th) => th,
        None => match kernel.idle_thread() {
            Some(idle) => idle.clone(),
            None => panic!("No thread to run and no idle thread."),
        },
    }
}

/// Gives the CPU from `current` to the next thread.
///
/// The caller already moved `current` out of the `Running` state. Returns
/// once `current` is scheduled again.
pub(crate) fn run_next(kernel: &Arc<Kernel>, current: &Arc<Thread>) {
    assert_eq!(
        held_locks(),
        0,
        "Try to reschedule a thread while holding a lock."
    );
    assert_eq!(
        kernel.machine().interrupt().state(),
        InterruptState::Off,
        "Try to reschedule a thread with interrupts enabled."
    );

    let next = pick_next(kernel);
    if Arc::ptr_eq(&next, current) {
        current.set_state(ThreadState::Running);
        return;
    }
    current.save_state(kernel);
    if next.state() != ThreadState::Idle {
        next.set_state(ThreadState::Running);
    }
    debug!('t', "switching from {} to {}", current.name, next.name);
    if kernel.machine().cpu().switch(current.tid, next.tid).is_err() {
        // Already unwinding (e.g. from `Current::exit`): let that unwind finish.
        if std::thread::panicking() {
            return;
        }
        resume_unwind(Box::new(MachineHalted));
    }
    current.restore_state(kernel);
}

/// Gives the CPU away for good. Used by finishing threads.
pub(crate) fn hand_off(kernel: &Arc<Kernel>) {
    let next = pick_next(kernel);
    if next.state() != ThreadState::Idle {
        next.set_state(ThreadState::Running);
    }
    kernel.machine().cpu().handoff(next.tid);
}

/// Creates the idle thread of `kernel`.
///
/// The idle thread runs whenever the ready queue is empty. It lets simulated
/// time jump to the next interrupt, and halts the machine when nothing can
/// ever become ready again.
pub(crate) fn spawn_idle(kernel: &Arc<Kernel>) -> Arc<Thread> {
    let idle = Thread::new("idle".into(), None);
    idle.set_state(ThreadState::Idle);
    let (k, th) = (kernel.clone(), idle.clone());
    kernel
        .machine()
        .cpu()
        .spawn(idle.tid, "idle", move || {
            CURRENT.set(Some(Context {
                kernel: k.clone(),
                thread: th.clone(),
            }));
            let outcome = catch_unwind(AssertUnwindSafe(|| idle_loop(&k, &th)));
            if let Err(payload) = outcome
                && !payload.is::<MachineHalted>()
            {
                k.machine()
                    .terminate(HaltReason::Panic("idle thread panicked".into()));
            }
            CURRENT.set(None);
        })
        .unwrap_or_else(|e| panic!("Failed to create the idle thread: {}", e));
    idle
}

fn idle_loop(kernel: &Arc<Kernel>, idle: &Arc<Thread>) {
    let machine = kernel.machine();
    machine.interrupt().disable();
    loop {
        if let Some(next) = kernel.scheduler().next_to_run() {
            next.set_state(ThreadState::Running);
            if machine.cpu().switch(idle.tid, next.tid).is_err() {
                return;
            }
            continue;
        }
        if kernel.alarm().is_empty() {
            info!("Kernel: no thread can ever run again.");
            machine.halt(HaltReason::Idle);
        }
        if !machine.interrupt().idle() {
            machine.halt(HaltReason::Idle);
        }
    }
}
