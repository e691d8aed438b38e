//! Thread abstration, an abstraction of a cpu core.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each with their
//! own stack and local state. A thread moves through
//! `New -> Ready -> Running -> (Blocked <-> Ready) -> Finished`, and exactly
//! one thread is `Running` at any time. The running thread is never on the
//! ready queue.
//!
//! Threads are created with [`ThreadBuilder`]. [`ThreadBuilder::create`]
//! makes a thread in the `New` state, and [`NewThread::fork`] makes it ready;
//! [`ThreadBuilder::spawn`] does both.
pub mod scheduler;

use crate::{Kernel, task::Task};
use crossbeam_utils::atomic::AtomicCell;
use machine::{
    HaltReason, MachineHalted,
    interrupt::{InterruptGuard, InterruptState},
    spinlock::SpinLock,
};
use std::{
    any::Any,
    cell::RefCell,
    collections::VecDeque,
    panic::{AssertUnwindSafe, catch_unwind, resume_unwind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ThreadState {
    /// Created, but never made ready.
    New,
    /// Thread is runnable.
    Ready,
    /// Thread is running.
    Running,
    /// Thread is parked.
    Blocked,
    /// Thread is exited with exitcode.
    Finished(i32),
    /// The idle thread.
    Idle,
}

/// An thread abstraction.
pub struct Thread {
    /// Thread id
    pub tid: u64,
    /// Thread name
    pub name: String,
    state: AtomicCell<ThreadState>,
    joiners: SpinLock<VecDeque<ParkHandle>>,
    pub(crate) task: SpinLock<Option<Box<dyn Task>>>,
}

impl Thread {
    pub(crate) fn new(name: String, task: Option<Box<dyn Task>>) -> Arc<Self> {
        static TID: AtomicU64 = AtomicU64::new(1);
        Arc::new(Self {
            tid: TID.fetch_add(1, Ordering::SeqCst),
            name,
            state: AtomicCell::new(ThreadState::New),
            joiners: SpinLock::new(VecDeque::new()),
            task: SpinLock::new(task),
        })
    }

    /// Current state of the thread.
    pub fn state(&self) -> ThreadState {
        self.state.load()
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state);
    }

    pub(crate) fn save_state(&self, kernel: &Kernel) {
        let mut task = self.task.lock();
        if let Some(task) = task.as_mut() {
            task.save_state(kernel.machine());
        }
        task.unlock();
    }

    pub(crate) fn restore_state(&self, kernel: &Kernel) {
        let mut task = self.task.lock();
        if let Some(task) = task.as_mut() {
            task.restore_state(kernel.machine());
        }
        task.unlock();
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

struct Context {
    kernel: Arc<Kernel>,
    thread: Arc<Thread>,
}

thread_local! {
    static CURRENT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

fn current() -> (Arc<Kernel>, Arc<Thread>) {
    CURRENT
        .with_borrow(|c| c.as_ref().map(|c| (c.kernel.clone(), c.thread.clone())))
        .unwrap_or_else(|| panic!("Not running on a kernel thread."))
}

/// Run a function `f` with current thread as an argument.
pub fn with_current<R>(f: impl FnOnce(&Arc<Thread>) -> R) -> R {
    let (_, th) = current();
    f(&th)
}

/// Unwinding payload of [`Current::exit`].
struct ThreadExit(i32);

/// The opaque structure indicating the running thread on the cpu.
pub struct Current {
    _p: (),
}

impl Current {
    /// The kernel the current thread belongs to.
    pub fn kernel() -> Arc<Kernel> {
        current().0
    }

    /// Get the current thread's id.
    pub fn get_tid() -> u64 {
        with_current(|th| th.tid)
    }

    /// Moves the current thread to the tail of the ready queue and runs the
    /// head. Returns immediately if no other thread is ready.
    pub fn yield_now() {
        let (kernel, th) = current();
        if th.state() == ThreadState::Idle {
            return;
        }
        let _guard = InterruptGuard::new(kernel.machine().interrupt());
        debug!('t', "yielding {}", th.name);
        th.set_state(ThreadState::Ready);
        kernel.scheduler().push_to_queue(th.clone());
        scheduler::run_next(&kernel, &th);
    }

    /// Run a function `f` with [`ParkHandle`] for current thread, and then
    /// park the current thread.
    ///
    /// `f` typically stores the handle in a wait queue. Interrupts stay
    /// disabled from the call of `f` until the thread is switched out, so no
    /// wake-up can be lost in between.
    pub fn park_with(f: impl FnOnce(ParkHandle)) {
        let (kernel, th) = current();
        assert_ne!(th.state(), ThreadState::Idle, "The idle thread must not park.");
        let _guard = InterruptGuard::new(kernel.machine().interrupt());
        th.set_state(ThreadState::Blocked);
        f(ParkHandle {
            kernel: kernel.clone(),
            th: th.clone(),
        });
        scheduler::run_next(&kernel, &th);
    }

    /// Exit the current thread with `exit_code`.
    ///
    /// The stack of the current thread is unwound, and the thread finishes
    /// once it reaches the bottom.
    pub fn exit(exit_code: i32) -> ! {
        resume_unwind(Box::new(ThreadExit(exit_code)))
    }
}

/// A handle that represent the parked thread.
pub struct ParkHandle {
    kernel: Arc<Kernel>,
    th: Arc<Thread>,
}

impl ParkHandle {
    /// Id of the parked thread.
    pub fn tid(&self) -> u64 {
        self.th.tid
    }

    /// Consume the handle and unpark the underlying thread.
    pub fn unpark(self) {
        let _guard = InterruptGuard::new(self.kernel.machine().interrupt());
        if self.th.state() == ThreadState::Blocked {
            debug!('t', "unparking {}", self.th.name);
            self.th.set_state(ThreadState::Ready);
            self.kernel.scheduler().push_to_queue(self.th.clone());
        }
    }
}

/// A handle to join thread.
#[derive(Clone)]
pub struct JoinHandle {
    /// Thread id of this handle.
    pub tid: u64,
    th: Arc<Thread>,
}

impl JoinHandle {
    /// Join this handle and returns exit code.
    ///
    /// Joining a thread that already finished returns immediately.
    pub fn join(&self) -> i32 {
        let kernel = Current::kernel();
        let _guard = InterruptGuard::new(kernel.machine().interrupt());
        loop {
            if let ThreadState::Finished(code) = self.th.state() {
                return code;
            }
            Current::park_with(|handle| {
                let mut joiners = self.th.joiners.lock();
                joiners.push_back(handle);
                joiners.unlock();
            });
        }
    }

    /// Returns true once the thread finished.
    pub fn is_finished(&self) -> bool {
        matches!(self.th.state(), ThreadState::Finished(_))
    }
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    name: String,
    task: Option<Box<dyn Task>>,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task: None,
        }
    }

    /// Attach a task to the thread.
    pub fn attach_task(mut self, task: Box<dyn Task>) -> Self {
        self.task = Some(task);
        self
    }

    /// Creates the thread in the `New` state. It does not run until
    /// [`NewThread::fork`] is called.
    pub fn create<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> NewThread {
        self.create_in(&Current::kernel(), thread_fn)
    }

    /// Spawn the thread.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> JoinHandle {
        self.create(thread_fn).fork()
    }

    pub(crate) fn create_in<F: FnOnce() + Send + 'static>(
        self,
        kernel: &Arc<Kernel>,
        thread_fn: F,
    ) -> NewThread {
        let th = Thread::new(self.name, self.task);
        let (k, t) = (kernel.clone(), th.clone());
        kernel
            .machine()
            .cpu()
            .spawn(th.tid, &th.name, move || thread_start(k, t, thread_fn))
            .unwrap_or_else(|e| panic!("Failed to back thread {} with a host thread: {}", th.name, e));
        debug!('t', "created thread {} ({})", th.name, th.tid);
        NewThread {
            kernel: kernel.clone(),
            th,
        }
    }
}

/// A thread that was created but not made ready yet.
pub struct NewThread {
    kernel: Arc<Kernel>,
    th: Arc<Thread>,
}

impl NewThread {
    /// Get the thread id of this thread.
    pub fn tid(&self) -> u64 {
        self.th.tid
    }

    /// Makes the thread ready to run.
    pub fn fork(self) -> JoinHandle {
        let _guard = InterruptGuard::new(self.kernel.machine().interrupt());
        self.th.set_state(ThreadState::Ready);
        self.kernel.scheduler().push_to_queue(self.th.clone());
        JoinHandle {
            tid: self.th.tid,
            th: self.th.clone(),
        }
    }

    /// Gives the idle CPU to this thread. Used once, at boot.
    pub(crate) fn start(self) {
        self.th.set_state(ThreadState::Running);
        self.kernel.machine().cpu().start(self.th.tid);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

/// The very beginning of the thread.
fn thread_start<F: FnOnce() + Send + 'static>(kernel: Arc<Kernel>, th: Arc<Thread>, thread_fn: F) {
    CURRENT.set(Some(Context {
        kernel: kernel.clone(),
        thread: th.clone(),
    }));
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        th.restore_state(&kernel);
        kernel.machine().interrupt().enable();
        thread_fn();
        0
    }));
    let code = match outcome {
        Ok(code) => Some(code),
        Err(payload) => match payload.downcast::<ThreadExit>() {
            Ok(exit) => Some(exit.0),
            Err(payload) if payload.is::<MachineHalted>() => None,
            Err(payload) => {
                kernel
                    .machine()
                    .terminate(HaltReason::Panic(panic_message(payload.as_ref())));
                None
            }
        },
    };
    if let Some(code) = code {
        finish(&kernel, &th, code);
    }
    CURRENT.set(None);
}

/// Marks the current thread finished, readies its joiners and hands the CPU
/// over for good.
fn finish(kernel: &Arc<Kernel>, th: &Arc<Thread>, code: i32) {
    let interrupt = kernel.machine().interrupt();
    interrupt.disable();
    debug!('t', "finishing {} with {}", th.name, code);
    th.set_state(ThreadState::Finished(code));

    let mut joiners = th.joiners.lock();
    let waiting: Vec<ParkHandle> = joiners.drain(..).collect();
    joiners.unlock();
    for handle in waiting {
        handle.unpark();
    }
    debug_assert_eq!(interrupt.state(), InterruptState::Off);
    scheduler::hand_off(kernel);
}
