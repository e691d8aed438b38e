//! Shared pieces of the user-process tests: a test driver with the
//! user-process layer attached, a way to boot a whole system from a set of
//! programs, and assembler helpers for issuing system calls.
use grading::{
    Outcome, TestDriver,
    asm::{Assembler, reg::*},
    program::ProgramBuilder,
};
use kmips::Kernel;
use kmips_userprog::{SyscallNumber, UserKernel};
use std::{any::Any, sync::Arc};

fn attach_user_layer(kernel: &Arc<Kernel>) -> Arc<dyn Any + Send + Sync> {
    UserKernel::new(kernel.clone())
}

/// A driver whose kernel has the user-process layer attached, for
/// `#[kernel_test(kmips_grader::user_driver)]`.
pub fn user_driver() -> TestDriver {
    TestDriver::new().extend(attach_user_layer)
}

/// A system that ran until the machine halted.
pub struct Session {
    pub outcome: Outcome,
    pub user: Arc<UserKernel>,
}

impl Session {
    /// Installs `programs`, boots with `shell` as the root process and
    /// waits for the machine to halt.
    pub fn run(
        driver: TestDriver,
        shell: &str,
        args: &[&str],
        programs: &[(&str, &ProgramBuilder)],
    ) -> Self {
        let mut driver = driver.config(|c| {
            c.shell_program = shell.to_string();
            c.shell_args = args.iter().map(|a| a.to_string()).collect();
        });
        for (name, program) in programs {
            driver = driver.file(name, &program.build());
        }
        let kernel = driver.build();
        let user = UserKernel::new(kernel.clone());
        let halt = user.run();
        Session {
            outcome: Outcome::new(kernel, halt),
            user,
        }
    }

    /// Console output of the whole run.
    pub fn output(&self) -> String {
        self.outcome.output_str()
    }

    /// Panics if any physical frame is still allocated.
    pub fn assert_no_leak(&self) {
        let frames = self.user.frames();
        assert_eq!(frames.free_count(), frames.total(), "physical frames leaked");
    }
}

/// System call helpers for test programs.
///
/// Arguments go in A0-A3 and the result comes back in V0, like the user
/// library of a real program would do.
pub trait Syscalls {
    /// `syscall` with `no` in V0. Arguments must already be in place.
    fn sys(&mut self, no: SyscallNumber) -> &mut Self;
    /// `exit(code)`.
    fn exit_with(&mut self, code: i32) -> &mut Self;
    /// `exit(reg)`.
    fn exit_reg(&mut self, reg: machine::processor::isa::Reg) -> &mut Self;
    /// `write(fd, label, len)`.
    fn write_label(&mut self, fd: i32, label: &str, len: i32) -> &mut Self;
    /// Writes the NUL-less `text` stored at `label` to standard output.
    fn print(&mut self, label: &str, text: &str) -> &mut Self;
}

impl Syscalls for Assembler {
    fn sys(&mut self, no: SyscallNumber) -> &mut Self {
        self.li(V0, no as i32).syscall()
    }

    fn exit_with(&mut self, code: i32) -> &mut Self {
        self.li(A0, code).sys(SyscallNumber::Exit)
    }

    fn exit_reg(&mut self, reg: machine::processor::isa::Reg) -> &mut Self {
        self.move_(A0, reg).sys(SyscallNumber::Exit)
    }

    fn write_label(&mut self, fd: i32, label: &str, len: i32) -> &mut Self {
        self.li(A0, fd)
            .la(A1, label)
            .li(A2, len)
            .sys(SyscallNumber::Write)
    }

    fn print(&mut self, label: &str, text: &str) -> &mut Self {
        self.write_label(1, label, text.len() as i32)
    }
}

/// A program that prints `message` and exits with `code`.
pub fn message_program(message: &str, code: i32) -> ProgramBuilder {
    let mut p = ProgramBuilder::new();
    p.string("msg", message);
    p.text().print("msg", message).exit_with(code);
    p
}

/// A program that exits with `code`.
pub fn exit_program(code: i32) -> ProgramBuilder {
    let mut p = ProgramBuilder::new();
    p.text().exit_with(code);
    p
}

/// A program that loads a word from an address nothing maps.
pub fn faulting_program() -> ProgramBuilder {
    let mut p = ProgramBuilder::new();
    p.text().li(T0, 0x7fff_0000).lw(T1, 0, T0).exit_with(0);
    p
}
