//! # KMIPS: the thread layer of a MIPS teaching kernel
//!
//! This crate is the kernel that runs on top of the simulated [`machine`]. It
//! provides kernel threads, a cooperative scheduler, blocking
//! synchronization primitives and the alarm clock. The user-process layer is
//! built on top of it in the `kmips-userprog` crate.
//!
//! ## The threading model
//!
//! There is exactly one simulated CPU. Every kernel thread is backed by a
//! host thread, and the CPU baton makes sure only one of them runs at any
//! time. A thread gives the CPU away only at well defined points:
//!
//! - [`Current::yield_now`] puts the current thread at the tail of the ready
//!   queue and runs the head.
//! - [`Current::park_with`] blocks the current thread. Someone must later
//!   call [`ParkHandle::unpark`] to make it ready again.
//! - When a thread finishes, every thread that [joined] it becomes ready.
//! - The periodic timer interrupt wakes due [`Alarm`] sleepers and then
//!   forces the running thread to yield.
//!
//! Timer interrupts are only delivered when simulated time advances, which
//! happens when the kernel re-enables interrupts or when a user instruction
//! retires. Disabling interrupts with [`interrupt::disable`] is therefore
//! enough to make a sequence of kernel operations atomic.
//!
//! ## Getting started
//!
//! ```no_run
//! use kmips::{SystemConfigurationBuilder, thread::ThreadBuilder};
//! use machine::{Machine, MachineConfig};
//!
//! let machine = Machine::new(MachineConfig::default());
//! let kernel = SystemConfigurationBuilder::new(machine).build();
//! let reason = kernel.run(|| {
//!     let child = ThreadBuilder::new("child").spawn(|| kmips::info!("hello"));
//!     child.join();
//! });
//! ```
//!
//! [joined]: thread::JoinHandle::join
//! [`Current::yield_now`]: thread::Current::yield_now
//! [`Current::park_with`]: thread::Current::park_with
//! [`ParkHandle::unpark`]: thread::ParkHandle::unpark
//! [`Alarm`]: alarm::Alarm

#[macro_use]
extern crate machine;

pub mod alarm;
pub mod interrupt;
pub mod sync;
pub mod task;
pub mod teletype;
pub mod thread;

pub use machine::{
    HaltReason, Machine, MachineConfig, PAGE_SIZE, debug, info, print, println, warning,
};

use alarm::Alarm;
use std::{
    any::Any,
    sync::{Arc, OnceLock, Weak},
};
use teletype::SynchConsole;
use thread::{
    Thread,
    scheduler::{Fifo, Scheduler},
};

/// Enum representing errors that can occur during a kernel operation.
///
/// Each variant corresponds to a specific type of error that might occur
/// during the handling of a system call. User programs only ever see `-1`;
/// the variant is kept for the kernel's own logs.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum KernelError {
    /// Operation is not permitted. (EPERM)
    OperationNotPermitted,
    /// No such file or directory. (ENOENT)
    NoSuchEntry,
    /// IO Error. (EIO)
    IOError,
    /// Exec format error. (ENOEXEC)
    NoExec,
    /// BAD file descriptor. (EBADF)
    BadFileDescriptor,
    /// No child process. (ECHILD)
    NoSuchChild,
    /// Out of memory. (ENOMEM)
    NoMemory,
    /// Bad address. (EFAULT)
    BadAddress,
    /// Device or resource busy. (EBUSY)
    Busy,
    /// Invalid arguement. (EINVAL)
    InvalidArgument,
    /// Too many open files. (EMFILE)
    TooManyOpenFile,
    /// File name too long. (ENAMETOOLONG)
    NameTooLong,
    /// Invalid system call number. (ENOSYS)
    NoSuchSyscall,
}

impl KernelError {
    /// The errno value of the error.
    pub fn errno(self) -> i32 {
        match self {
            KernelError::OperationNotPermitted => 1,
            KernelError::NoSuchEntry => 2,
            KernelError::IOError => 5,
            KernelError::NoExec => 8,
            KernelError::BadFileDescriptor => 9,
            KernelError::NoSuchChild => 10,
            KernelError::NoMemory => 12,
            KernelError::BadAddress => 14,
            KernelError::Busy => 16,
            KernelError::InvalidArgument => 22,
            KernelError::TooManyOpenFile => 24,
            KernelError::NameTooLong => 36,
            KernelError::NoSuchSyscall => 38,
        }
    }
}

/// The kernel context.
///
/// Everything that would be a global in a bare-metal kernel lives here: the
/// machine, the scheduler, the alarm, the idle thread and the synchronous
/// console. Threads reach it with [`Current::kernel`].
///
/// [`Current::kernel`]: thread::Current::kernel
pub struct Kernel {
    machine: Arc<Machine>,
    scheduler: Box<dyn Scheduler + Send + Sync>,
    alarm: Alarm,
    console: SynchConsole,
    idle: OnceLock<Arc<Thread>>,
    extension: OnceLock<Weak<dyn Any + Send + Sync>>,
}

impl Kernel {
    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    pub fn scheduler(&self) -> &(dyn Scheduler + Send + Sync) {
        self.scheduler.as_ref()
    }

    pub fn alarm(&self) -> &Alarm {
        &self.alarm
    }

    pub fn console(&self) -> &SynchConsole {
        &self.console
    }

    pub(crate) fn idle_thread(&self) -> Option<&Arc<Thread>> {
        self.idle.get()
    }

    /// Attaches the context of a layer built on top of this kernel, such as
    /// the user-process layer. Returns false if a context is already
    /// attached.
    ///
    /// The kernel only keeps a weak reference; the caller owns the context.
    pub fn attach<T: Any + Send + Sync>(&self, ext: &Arc<T>) -> bool {
        let ext: Arc<dyn Any + Send + Sync> = ext.clone();
        let weak: Weak<dyn Any + Send + Sync> = Arc::downgrade(&ext);
        self.extension.set(weak).is_ok()
    }

    /// The context attached with [`attach`](Self::attach), if it is still
    /// alive and of type `T`.
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.extension.get()?.upgrade()?.downcast::<T>().ok()
    }

    /// Boots the kernel and runs `main` in the first kernel thread.
    ///
    /// The machine halts with [`HaltReason::Requested`] when `main` returns.
    /// This blocks the host until the machine halts for whatever reason, and
    /// returns that reason.
    pub fn run<F>(self: &Arc<Self>, main: F) -> HaltReason
    where
        F: FnOnce() + Send + 'static,
    {
        info!("Kernel: booting with {} physical pages.", self.machine.memory().num_pages());
        let idle = thread::scheduler::spawn_idle(self);
        if self.idle.set(idle).is_err() {
            panic!("Kernel::run called twice.");
        }

        let main = thread::ThreadBuilder::new("main").create_in(self, move || {
            main();
            thread::Current::kernel().machine().halt(HaltReason::Requested);
        });
        self.machine.start_timer();
        main.start();
        self.machine.wait()
    }
}

/// A builder for system configuration settings.
///
/// The builder owns the machine until [`build`](Self::build) creates the
/// [`Kernel`] context around it.
pub struct SystemConfigurationBuilder {
    machine: Arc<Machine>,
    scheduler: Option<Box<dyn Scheduler + Send + Sync>>,
}

impl SystemConfigurationBuilder {
    pub fn new(machine: Arc<Machine>) -> Self {
        Self {
            machine,
            scheduler: None,
        }
    }

    /// Sets the system-wide scheduler. The default is [`Fifo`].
    pub fn set_scheduler(mut self, scheduler: impl Scheduler + Send + Sync + 'static) -> Self {
        self.scheduler = Some(Box::new(scheduler));
        self
    }

    /// Creates the kernel context and hooks the timer interrupt up to the
    /// alarm.
    pub fn build(self) -> Arc<Kernel> {
        let kernel = Arc::new(Kernel {
            scheduler: self.scheduler.unwrap_or_else(|| Box::new(Fifo::default())),
            alarm: Alarm::new(),
            console: SynchConsole::new(),
            idle: OnceLock::new(),
            extension: OnceLock::new(),
            machine: self.machine,
        });
        let weak: Weak<Kernel> = Arc::downgrade(&kernel);
        kernel.machine.timer().set_handler(Arc::new(move || {
            if let Some(kernel) = weak.upgrade() {
                kernel.alarm.timer_interrupt(&kernel);
            }
        }));
        kernel
    }
}
