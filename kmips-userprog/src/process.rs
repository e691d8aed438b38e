//! # User processes
//!
//! A process is a kernel thread running a user program. The thread carries a
//! [`UserContext`] task, so its registers and page table follow it across
//! context switches, and its body is [`Process::run`]: the processor
//! interprets the program until an exception brings control back to the
//! kernel.
//!
//! Processes know each other only by [`Pid`]. The shared [`ProcessTable`]
//! maps a pid to its thread and, once it exited, to its [`ExitStatus`], which
//! waits there until the parent joins it. When a parent exits first, its
//! children become orphans and their statuses are dropped as they exit.
use crate::{
    SyscallNumber, UserKernel,
    file_struct::FileStruct,
    loader::LoadedImage,
    mm_struct::MmStruct,
    syscall::SyscallAbi,
    uaccess::{UserCString, UserPtrRO, UserPtrWO},
};
use arrayvec::ArrayVec;
use kmips::{
    HaltReason, KernelError, Machine,
    sync::Mutex,
    task::Task,
    thread::{Current, JoinHandle},
};
use machine::{
    coff::Coff,
    processor::{ExceptionCause, NUM_TOTAL_REGS, SharedPageTable},
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// Process identifier.
pub type Pid = u32;

/// The pid of the first process. Only it may halt the machine.
pub const ROOT_PID: Pid = 0;

/// Most arguments `exec` accepts.
pub const MAX_ARGC: usize = 128;

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The process called `exit` with this status.
    Normal(i32),
    /// The process raised an exception the kernel does not handle.
    Abnormal(ExceptionCause),
}

impl ExitStatus {
    /// The exit code of the process's kernel thread.
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Normal(code) => code,
            ExitStatus::Abnormal(_) => -1,
        }
    }
}

/// The user-mode state of a process's thread.
pub struct UserContext {
    registers: [i32; NUM_TOTAL_REGS],
    page_table: SharedPageTable,
}

impl UserContext {
    pub fn new(registers: [i32; NUM_TOTAL_REGS], page_table: SharedPageTable) -> Self {
        Self {
            registers,
            page_table,
        }
    }
}

impl Task for UserContext {
    fn save_state(&mut self, machine: &Machine) {
        self.registers = machine.processor().registers();
    }

    fn restore_state(&mut self, machine: &Machine) {
        let processor = machine.processor();
        processor.set_registers(&self.registers);
        processor.set_page_table(Some(self.page_table.clone()));
    }
}

struct ProcessEntry {
    parent: Option<Pid>,
    thread: Option<JoinHandle>,
    status: Option<ExitStatus>,
}

#[derive(Default)]
struct Processes {
    next_pid: Pid,
    live: usize,
    entries: BTreeMap<Pid, ProcessEntry>,
}

/// The table of every process that has not been joined yet.
#[derive(Default)]
pub struct ProcessTable {
    inner: Mutex<Processes>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a pid for a new child of `parent` and counts it live.
    pub fn register(&self, parent: Option<Pid>) -> Pid {
        let mut inner = self.inner.lock();
        let pid = inner.next_pid;
        inner.next_pid += 1;
        inner.live += 1;
        inner.entries.insert(
            pid,
            ProcessEntry {
                parent,
                thread: None,
                status: None,
            },
        );
        inner.unlock();
        pid
    }

    /// Remembers the thread running `pid`.
    pub fn set_thread(&self, pid: Pid, thread: JoinHandle) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&pid) {
            entry.thread = Some(thread);
        }
        inner.unlock();
    }

    /// The thread running `pid`, if `pid` was not joined yet.
    pub fn thread(&self, pid: Pid) -> Option<JoinHandle> {
        let inner = self.inner.lock();
        let thread = inner.entries.get(&pid).and_then(|e| e.thread.clone());
        inner.unlock();
        thread
    }

    /// Records that `pid` exited with `status` and detaches its
    /// `children`.
    ///
    /// Returns true if `pid` was the last live process.
    pub fn exit(&self, pid: Pid, status: ExitStatus, children: &BTreeSet<Pid>) -> bool {
        let mut inner = self.inner.lock();
        for child in children {
            let exited = match inner.entries.get_mut(child) {
                Some(entry) => {
                    entry.parent = None;
                    entry.status.is_some()
                }
                None => false,
            };
            if exited {
                inner.entries.remove(child);
            }
        }
        let orphan = match inner.entries.get_mut(&pid) {
            Some(entry) if entry.parent.is_some() => {
                entry.status = Some(status);
                false
            }
            _ => true,
        };
        if orphan {
            inner.entries.remove(&pid);
        }
        inner.live -= 1;
        let last = inner.live == 0;
        inner.unlock();
        last
    }

    /// Takes the exit status of `pid` and forgets the process.
    ///
    /// Returns `None` if `pid` has not exited.
    pub fn take_status(&self, pid: Pid) -> Option<ExitStatus> {
        let mut inner = self.inner.lock();
        let status = inner.entries.get(&pid).and_then(|e| e.status);
        if status.is_some() {
            inner.entries.remove(&pid);
        }
        inner.unlock();
        status
    }

    /// Number of processes that have not exited yet.
    pub fn live(&self) -> usize {
        let inner = self.inner.lock();
        let live = inner.live;
        inner.unlock();
        live
    }

    /// Number of processes not joined yet, exited or not.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        let len = inner.entries.len();
        inner.unlock();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A user process.
pub struct Process {
    pid: Pid,
    ctx: Arc<UserKernel>,
    mm: MmStruct,
    coff: Option<Coff>,
    file_struct: FileStruct,
    children: BTreeSet<Pid>,
}

impl Process {
    /// Wraps a freshly loaded image. The process starts with only the
    /// console open.
    pub fn new(ctx: Arc<UserKernel>, pid: Pid, image: LoadedImage) -> Self {
        Self {
            pid,
            ctx,
            mm: image.mm,
            coff: Some(image.coff),
            file_struct: FileStruct::new(),
            children: BTreeSet::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The address space of the process.
    pub fn mm(&self) -> &MmStruct {
        &self.mm
    }

    /// Runs the user program. Never returns: the process leaves through
    /// [`exit`](Self::exit), or the machine halts.
    pub fn run(mut self) -> ! {
        let kernel = self.ctx.kernel().clone();
        debug!('a', "process {} starts", self.pid);
        kernel
            .machine()
            .processor()
            .run(&mut |cause| self.handle_exception(cause))
    }

    /// Handles an exception raised by the user program.
    ///
    /// System calls are dispatched and the program resumes after the
    /// `syscall` instruction. Every other exception kills the process.
    pub fn handle_exception(&mut self, cause: ExceptionCause) {
        match cause {
            ExceptionCause::Syscall => {
                let machine = self.ctx.kernel().machine().clone();
                let processor = machine.processor();
                let abi = SyscallAbi::from_processor(processor);
                let return_val = self.syscall(&abi);
                abi.set_return_value(processor, return_val);
                processor.advance_pc();
            }
            cause => {
                debug!('a', "process {} killed by {:?}", self.pid, cause);
                self.exit(ExitStatus::Abnormal(cause))
            }
        }
    }

    /// Dispatches the system call described by `abi`.
    pub fn syscall(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let Ok(sysno) = SyscallNumber::try_from(abi.sysno) else {
            debug!('a', "process {}: unknown syscall {}", self.pid, abi.sysno);
            return Err(KernelError::NoSuchSyscall);
        };
        let ctx = self.ctx.clone();
        match sysno {
            SyscallNumber::Halt => self.halt(),
            SyscallNumber::Exit => self.exit(ExitStatus::Normal(abi.arg1)),
            SyscallNumber::Exec => self.exec(abi),
            SyscallNumber::Join => self.join(abi),
            SyscallNumber::Create => self.file_struct.create(&ctx, &self.mm, abi),
            SyscallNumber::Open => self.file_struct.open(&ctx, &self.mm, abi),
            SyscallNumber::Read => self.file_struct.read(&ctx, &self.mm, abi),
            SyscallNumber::Write => self.file_struct.write(&ctx, &self.mm, abi),
            SyscallNumber::Close => self.file_struct.close(&ctx, abi),
            SyscallNumber::Unlink => self.file_struct.unlink(&ctx, &self.mm, abi),
        }
    }

    /// `halt()`: stops the machine. Only the root process may do this.
    fn halt(&mut self) -> Result<usize, KernelError> {
        if self.pid != ROOT_PID {
            return Err(KernelError::OperationNotPermitted);
        }
        info!("Machine halt requested by the root process.");
        self.ctx.kernel().machine().halt(HaltReason::Requested)
    }

    /// `exec(name, argc, argv)`: starts a child process.
    ///
    /// Returns the pid of the child.
    fn exec(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let (name, argc, argv) = (abi.arg1, abi.arg2, abi.arg3);
        let name = UserCString::new(name).read(&self.mm)?;
        if !name.ends_with(".coff") {
            return Err(KernelError::NoExec);
        }
        let argc = usize::try_from(argc)
            .ok()
            .filter(|argc| *argc <= MAX_ARGC)
            .ok_or(KernelError::InvalidArgument)?;

        let mut args = ArrayVec::<String, MAX_ARGC>::new();
        for i in 0..argc {
            let ptr_addr = argv
                .checked_add(4 * i as i32)
                .ok_or(KernelError::BadAddress)?;
            let arg = UserPtrRO::<u32>::new(ptr_addr).get(&self.mm)?;
            let arg = i32::try_from(arg).map_err(|_| KernelError::BadAddress)?;
            args.push(UserCString::new(arg).read(&self.mm)?);
        }

        let child = self.ctx.exec(Some(self.pid), &name, &args)?;
        self.children.insert(child);
        Ok(child as usize)
    }

    /// `join(pid, status)`: waits for the child `pid` to exit.
    ///
    /// Returns 1 if the child exited normally, in which case its status is
    /// stored at `status` unless that is null, and 0 if it was killed.
    fn join(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let (pid, status_ptr) = (abi.arg1, abi.arg2);
        if status_ptr < 0 {
            return Err(KernelError::BadAddress);
        }
        let pid = Pid::try_from(pid).map_err(|_| KernelError::NoSuchChild)?;
        if !self.children.contains(&pid) {
            return Err(KernelError::NoSuchChild);
        }
        // The child stays joinable if the status word cannot be written.
        let status_out = (status_ptr != 0).then(|| UserPtrWO::<i32>::new(status_ptr));
        if let Some(out) = &status_out {
            out.check(&self.mm)?;
        }
        self.children.remove(&pid);
        let processes = self.ctx.processes();
        let thread = processes.thread(pid).ok_or(KernelError::NoSuchChild)?;
        thread.join();

        match processes.take_status(pid).ok_or(KernelError::NoSuchChild)? {
            ExitStatus::Normal(code) => {
                if let Some(out) = status_out {
                    out.put(&self.mm, code)?;
                }
                Ok(1)
            }
            ExitStatus::Abnormal(_) => Ok(0),
        }
    }

    /// Releases everything the process holds and finishes its thread.
    ///
    /// The last process to exit halts the machine.
    fn exit(&mut self, status: ExitStatus) -> ! {
        debug!('a', "process {} exits with {:?}", self.pid, status);
        let ctx = self.ctx.clone();
        self.file_struct.close_all(&ctx);
        self.mm.release(ctx.frames());
        if let Some(coff) = self.coff.take() {
            coff.close();
        }
        if self.pid == ROOT_PID {
            ctx.set_root_status(status);
        }

        let children = core::mem::take(&mut self.children);
        if ctx.processes().exit(self.pid, status, &children) {
            info!("Last process exited, halting.");
            ctx.kernel().machine().halt(HaltReason::Requested);
        }
        Current::exit(status.code())
    }
}
