//! The simulated machine underneath the kernel.
//!
//! This crate contains everything the kernel treats as hardware: the
//! interrupt controller and its clock, a periodic timer, a MIPS processor
//! that runs user programs, physical memory, a console, a flat file system
//! and the COFF executable format.
//!
//! The machine is single-CPU. Kernel threads are backed by host threads, but
//! the [`cpu::Cpu`] baton lets exactly one of them run at a time, so the
//! simulation is deterministic: simulated time only advances when the kernel
//! re-enables interrupts, when a user instruction retires, or when the CPU
//! idles.
//!
//! You are **not** required to understand every line of this crate to work on
//! the kernel. The parts the kernel touches directly are [`Machine`],
//! [`interrupt::Interrupt`], [`processor::Processor`] and the file system.
//!
//! A machine stops with [`Machine::halt`]. Halting records a [`HaltReason`],
//! stops the clock and unwinds every host thread still parked on the CPU;
//! [`Machine::wait`] collects them and returns the reason.
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[doc(hidden)]
#[macro_use]
pub mod kprint;
pub mod coff;
pub mod config;
pub mod console;
pub mod cpu;
pub mod fs;
pub mod interrupt;
pub mod memory;
pub mod processor;
pub mod spinlock;
pub mod timer;
pub mod translation;

pub use config::MachineConfig;
pub use cpu::MachineHalted;

use console::Console;
use cpu::Cpu;
use fs::StubFileSystem;
use interrupt::Interrupt;
use memory::PhysicalMemory;
use processor::Processor;
use spinlock::SpinLock;
use timer::Timer;

/// Size of a page in bytes.
pub const PAGE_SIZE: usize = 0x400;

#[doc(hidden)]
pub static QUIET: AtomicBool = AtomicBool::new(false);

/// Why the machine stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// The kernel asked for it.
    Requested,
    /// Nothing can ever run again.
    Idle,
    /// A kernel thread panicked.
    Panic(String),
}

/// The machine.
pub struct Machine {
    config: MachineConfig,
    interrupt: Arc<Interrupt>,
    timer: Arc<Timer>,
    processor: Processor,
    memory: Arc<PhysicalMemory>,
    console: Console,
    file_system: StubFileSystem,
    cpu: Arc<Cpu>,
    halt_reason: SpinLock<Option<HaltReason>>,
}

impl Machine {
    /// Powers on a machine described by `config`.
    ///
    /// The timer is not armed until [`start_timer`](Self::start_timer).
    pub fn new(config: MachineConfig) -> Arc<Self> {
        QUIET.store(config.quiet, Ordering::SeqCst);
        if !config.debug_flags.is_empty() {
            kprint::set_debug_flags(&config.debug_flags);
        }
        let interrupt = Arc::new(Interrupt::new());
        let memory = Arc::new(PhysicalMemory::new(config.num_phys_pages));
        debug!(
            'm',
            "machine with {} pages, timer period {}",
            config.num_phys_pages,
            config.timer_period
        );
        Arc::new(Self {
            timer: Timer::new(&interrupt, config.timer_period),
            processor: Processor::new(memory.clone(), interrupt.clone()),
            console: Console::new(config.echo_console),
            file_system: StubFileSystem::new(),
            cpu: Arc::new(Cpu::new()),
            halt_reason: SpinLock::new(None),
            interrupt,
            memory,
            config,
        })
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn interrupt(&self) -> &Arc<Interrupt> {
        &self.interrupt
    }

    pub fn timer(&self) -> &Arc<Timer> {
        &self.timer
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    pub fn memory(&self) -> &Arc<PhysicalMemory> {
        &self.memory
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn file_system(&self) -> &StubFileSystem {
        &self.file_system
    }

    pub fn cpu(&self) -> &Arc<Cpu> {
        &self.cpu
    }

    /// Arms the periodic timer.
    pub fn start_timer(&self) {
        self.timer.start();
    }

    /// Stops the machine and unwinds the calling kernel thread.
    pub fn halt(&self, reason: HaltReason) -> ! {
        self.terminate(reason);
        std::panic::resume_unwind(Box::new(MachineHalted))
    }

    /// Stops the machine. Only the first reason is kept.
    pub fn terminate(&self, reason: HaltReason) {
        let mut slot = self.halt_reason.lock();
        let first = slot.is_none();
        if first {
            *slot = Some(reason.clone());
        }
        slot.unlock();
        if !first {
            return;
        }

        self.interrupt.halt();
        let stats = self.interrupt.stats();
        info!("Machine halting: {:?}", reason);
        info!(
            "Ticks: total {}, idle {}, system {}, user {}",
            stats.total_ticks, stats.idle_ticks, stats.kernel_ticks, stats.user_ticks
        );
        self.cpu.halt();
    }

    /// The reason recorded by the first halt, if any.
    pub fn halt_reason(&self) -> Option<HaltReason> {
        let slot = self.halt_reason.lock();
        let reason = slot.clone();
        slot.unlock();
        reason
    }

    /// Blocks the host until the machine halts and every host thread
    /// finished unwinding.
    pub fn wait(&self) -> HaltReason {
        self.cpu.wait_halt();
        self.cpu.join_all();
        self.halt_reason().unwrap_or(HaltReason::Idle)
    }
}
