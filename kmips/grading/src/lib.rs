//! Test harness for kernels running on the simulated machine.
//!
//! A [`TestDriver`] powers on a fresh machine per test, boots a kernel on it,
//! runs the test body as the first kernel thread and reports how the
//! machine ended up in an [`Outcome`]. Test programs for user processes are
//! written with the [`asm`] assembler and packed into executables with
//! [`program::ProgramBuilder`].
//!
//! The attribute macros re-exported from `grading_derive` wrap a test body:
//!
//! ```ignore
//! #[kernel_test]
//! #[stdin(b"ping")]
//! #[assert_output(b"pong")]
//! fn echo() {
//!     // runs inside a kernel thread
//! }
//! ```
extern crate grading_derive;

pub mod asm;
pub mod program;

pub use grading_derive::*;

use kmips::{HaltReason, Kernel, Machine, MachineConfig, SystemConfigurationBuilder, println, print};
use machine::interrupt::Stats;
use std::{any::Any, sync::Arc};

/// Environment variable holding debug flags for test machines.
pub const DEBUG_ENV: &str = "KMIPS_DEBUG";

/// A test that runs in its own kernel thread.
pub trait TestCase
where
    Self: Sync + Send,
{
    fn name(&'static self) -> &'static str;
    fn run(&'static self) -> bool;
}

impl<T> TestCase for T
where
    T: Fn() + Send + Sync + 'static,
{
    fn name(&'static self) -> &'static str {
        core::any::type_name::<T>()
    }

    fn run(&'static self) -> bool {
        print!("test {} ... ", self.name());
        if kmips::thread::ThreadBuilder::new(self.name())
            .spawn(self)
            .join()
            == 0
        {
            println!("ok");
            true
        } else {
            println!("FAILED");
            false
        }
    }
}

type Extension = fn(&Arc<Kernel>) -> Arc<dyn Any + Send + Sync>;

/// A driver for running tests on a fresh machine.
pub struct TestDriver {
    config: MachineConfig,
    stdin: Vec<u8>,
    files: Vec<(String, Vec<u8>)>,
    extension: Option<Extension>,
}

impl Default for TestDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDriver {
    /// A quiet machine with the default configuration. Debug flags are taken
    /// from the `KMIPS_DEBUG` environment variable.
    pub fn new() -> Self {
        Self {
            config: MachineConfig {
                quiet: true,
                debug_flags: std::env::var(DEBUG_ENV).unwrap_or_default(),
                ..Default::default()
            },
            stdin: Vec::new(),
            files: Vec::new(),
            extension: None,
        }
    }

    /// Adjusts the machine configuration.
    pub fn config(mut self, f: impl FnOnce(&mut MachineConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Queues `bytes` as console input.
    pub fn stdin(mut self, bytes: &[u8]) -> Self {
        self.stdin.extend_from_slice(bytes);
        self
    }

    /// Puts a file into the stub file system before boot.
    pub fn file(mut self, name: &str, contents: &[u8]) -> Self {
        self.files.push((name.to_string(), contents.to_vec()));
        self
    }

    /// Builds a layer on top of the kernel before it runs, such as the
    /// user-process layer. The driver keeps it alive for the run.
    pub fn extend(mut self, extension: Extension) -> Self {
        self.extension = Some(extension);
        self
    }

    /// Powers on the machine and builds the kernel, without running it.
    pub fn build(self) -> Arc<Kernel> {
        let machine = Machine::new(self.config);
        machine.console().push_input(&self.stdin);
        for (name, contents) in &self.files {
            if !machine.file_system().insert(name, contents) {
                panic!("Invalid file name {:?}.", name);
            }
        }
        SystemConfigurationBuilder::new(machine).build()
    }

    /// Boots the kernel with `main` as the first thread and waits for the
    /// machine to halt.
    pub fn run<F: FnOnce() + Send + 'static>(mut self, main: F) -> Outcome {
        let extension = self.extension.take();
        let kernel = self.build();
        let _ext = extension.map(|f| f(&kernel));
        let halt = kernel.run(main);
        Outcome::new(kernel, halt)
    }

    /// Runs `tests` one after another, each in its own thread, and prints a
    /// summary.
    pub fn start<const TC: usize>(self, tests: [&'static dyn TestCase; TC]) -> Outcome {
        self.run(move || {
            let (total, mut succ) = (tests.len(), 0);
            println!("Running {} test{}", total, if total == 1 { "" } else { "s" });
            for test in tests {
                if test.run() {
                    succ += 1;
                }
            }
            println!(
                "test result: {}. {} passed; {} failed",
                if total == succ { "ok" } else { "FAILED" },
                succ,
                total - succ
            );
            if succ != total {
                panic!("{} of {} tests failed.", total - succ, total);
            }
        })
    }
}

/// What a halted machine left behind.
pub struct Outcome {
    pub halt: HaltReason,
    pub stats: Stats,
    pub output: Vec<u8>,
    pub kernel: Arc<Kernel>,
}

impl Outcome {
    /// Collects the outcome of `kernel` after it halted for `halt`.
    pub fn new(kernel: Arc<Kernel>, halt: HaltReason) -> Self {
        let machine = kernel.machine();
        Self {
            stats: machine.interrupt().stats(),
            output: machine.console().output(),
            halt,
            kernel,
        }
    }

    /// Console output as text.
    pub fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Panics unless the machine halted on request.
    pub fn assert_halted(&self) {
        if let HaltReason::Panic(msg) = &self.halt {
            panic!("Kernel panicked: {}", msg);
        }
        assert_eq!(self.halt, HaltReason::Requested, "Machine halted for {:?}.", self.halt);
    }
}
