//! # KMIPS user processes
//!
//! This crate runs user programs on top of the [`kmips`] thread layer. A
//! process is a kernel thread that interprets a MIPS program loaded from a
//! COFF executable, in its own paged address space, and talks to the kernel
//! through ten system calls:
//!
//! | No. | Call                         | Handler                           |
//! |-----|------------------------------|-----------------------------------|
//! | 0   | `halt()`                     | [`Process`]                       |
//! | 1   | `exit(status)`               | [`Process`]                       |
//! | 2   | `exec(name, argc, argv)`     | [`Process`]                       |
//! | 3   | `join(pid, status)`          | [`Process`]                       |
//! | 4   | `create(name)`               | [`FileStruct::create`]            |
//! | 5   | `open(name)`                 | [`FileStruct::open`]              |
//! | 6   | `read(fd, buf, size)`        | [`FileStruct::read`]              |
//! | 7   | `write(fd, buf, size)`       | [`FileStruct::write`]             |
//! | 8   | `close(fd)`                  | [`FileStruct::close`]             |
//! | 9   | `unlink(name)`               | [`FileStruct::unlink`]            |
//!
//! The state shared by every process (frames, the file registry and the
//! process table) lives in the [`UserKernel`] context.
//!
//! [`FileStruct::create`]: file_struct::FileStruct::create
//! [`FileStruct::open`]: file_struct::FileStruct::open
//! [`FileStruct::read`]: file_struct::FileStruct::read
//! [`FileStruct::write`]: file_struct::FileStruct::write
//! [`FileStruct::close`]: file_struct::FileStruct::close
//! [`FileStruct::unlink`]: file_struct::FileStruct::unlink

#![deny(rustdoc::broken_intra_doc_links)]

#[macro_use]
extern crate machine;

pub mod file_struct;
pub mod file_table;
pub mod frame;
pub mod loader;
pub mod mm_struct;
pub mod page_table;
pub mod process;
pub mod syscall;
pub mod uaccess;

use file_table::FileRegistry;
use frame::FrameAllocator;
use kmips::{
    HaltReason, Kernel, KernelError, Machine, MachineConfig, SystemConfigurationBuilder,
    sync::SpinLock,
    thread::{Current, ThreadBuilder},
};
use loader::LoadContext;
use machine::fs::StubFileSystem;
use num_enum::TryFromPrimitive;
use process::{ExitStatus, Pid, ProcessTable, UserContext};
use std::sync::Arc;

pub use process::Process;

/// Represents system call numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(i32)]
pub enum SyscallNumber {
    /// Halts the machine.
    Halt = 0,
    /// Terminates the calling process.
    Exit = 1,
    /// Starts a child process.
    Exec = 2,
    /// Waits for a child process.
    Join = 3,
    /// Creates (or truncates) and opens a file.
    Create = 4,
    /// Opens an existing file.
    Open = 5,
    /// Reads from a file descriptor.
    Read = 6,
    /// Writes to a file descriptor.
    Write = 7,
    /// Closes a file descriptor.
    Close = 8,
    /// Removes a file.
    Unlink = 9,
}

/// The user-process layer of a kernel.
pub struct UserKernel {
    kernel: Arc<Kernel>,
    frames: FrameAllocator,
    registry: FileRegistry,
    processes: ProcessTable,
    root_status: SpinLock<Option<ExitStatus>>,
}

impl UserKernel {
    /// Builds the user-process layer over `kernel` and attaches it, so that
    /// [`UserKernel::current`] finds it.
    pub fn new(kernel: Arc<Kernel>) -> Arc<Self> {
        let frames = FrameAllocator::new(kernel.machine().memory().num_pages());
        let this = Arc::new(Self {
            kernel,
            frames,
            registry: FileRegistry::new(),
            processes: ProcessTable::new(),
            root_status: SpinLock::new(None),
        });
        if !this.kernel.attach(&this) {
            warning!("The kernel already has a context attached.");
        }
        this
    }

    /// Powers on a machine described by `config` and builds a kernel with
    /// the user-process layer on top of it.
    pub fn boot(config: MachineConfig) -> Arc<Self> {
        let kernel = SystemConfigurationBuilder::new(Machine::new(config)).build();
        Self::new(kernel)
    }

    /// The user-process layer of the current thread's kernel.
    pub fn current() -> Option<Arc<Self>> {
        Current::kernel().extension::<Self>()
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn file_system(&self) -> &StubFileSystem {
        self.kernel.machine().file_system()
    }

    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// How the root process ended, once it has.
    pub fn root_status(&self) -> Option<ExitStatus> {
        let status = self.root_status.lock();
        let s = *status;
        status.unlock();
        s
    }

    pub(crate) fn set_root_status(&self, s: ExitStatus) {
        let mut status = self.root_status.lock();
        *status = Some(s);
        status.unlock();
    }

    /// Loads `name` and starts it as a child of `parent`. The first process
    /// started gets [`ROOT_PID`](process::ROOT_PID).
    ///
    /// Returns the pid of the new process. Nothing is allocated if loading
    /// fails.
    pub fn exec(
        self: &Arc<Self>,
        parent: Option<Pid>,
        name: &str,
        args: &[String],
    ) -> Result<Pid, KernelError> {
        let image = LoadContext::new(self.kernel.machine(), &self.frames).load(name, args)?;
        let pid = self.processes.register(parent);
        let context = UserContext::new(image.registers, image.mm.page_table().shared());
        let process = Process::new(self.clone(), pid, image);
        let thread = ThreadBuilder::new(name)
            .attach_task(Box::new(context))
            .spawn(move || process.run());
        self.processes.set_thread(pid, thread);
        debug!('a', "process {} runs {} (parent {:?})", pid, name, parent);
        Ok(pid)
    }

    /// Runs the configured shell program as the root process until the
    /// machine halts, and returns why it halted.
    ///
    /// The boot thread finishes once the shell started; the machine halts
    /// when the last process exits or the root process calls `halt`.
    pub fn run(self: &Arc<Self>) -> HaltReason {
        let config = self.kernel.machine().config();
        let (shell, args) = (config.shell_program.clone(), config.shell_args.clone());
        let this = self.clone();
        self.kernel.run(move || {
            if let Err(e) = this.exec(None, &shell, &args) {
                panic!("Could not start {}: {:?}", shell, e);
            }
            Current::exit(0)
        })
    }
}
