//! Whole systems: a root process and its children run until the machine
//! halts, then the outcome is inspected from the host.
use grading::{TestDriver, asm::reg::*, program::ProgramBuilder};
use kmips::HaltReason;
use kmips_grader::{Session, Syscalls, exit_program, faulting_program, message_program};
use kmips_userprog::{SyscallNumber, process::ExitStatus};

fn run(root: &ProgramBuilder, programs: &[(&str, &ProgramBuilder)]) -> Session {
    let mut all = vec![("root.coff", root)];
    all.extend_from_slice(programs);
    Session::run(TestDriver::new(), "root.coff", &["root.coff"], &all)
}

/// `exec(label, 0, 0)`; the pid ends up in S0.
fn exec_child(p: &mut ProgramBuilder, label: &str) {
    p.text()
        .la(A0, label)
        .li(A1, 0)
        .li(A2, 0)
        .sys(SyscallNumber::Exec)
        .move_(S0, V0);
}

/// `join(S0, &status)`; the result ends up in S1 and the status in S2.
fn join_child(p: &mut ProgramBuilder) {
    p.text()
        .move_(A0, S0)
        .la(A1, "status")
        .sys(SyscallNumber::Join)
        .move_(S1, V0)
        .la(T0, "status")
        .lw(S2, 0, T0);
}

fn with_status(p: &mut ProgramBuilder) {
    p.word("status", 0xdead_beef);
}

#[test]
fn root_halt_stops_the_machine() {
    let mut root = ProgramBuilder::new();
    root.text().sys(SyscallNumber::Halt).exit_with(1);
    let session = run(&root, &[]);
    assert_eq!(session.outcome.halt, HaltReason::Requested);
    // The root never exited.
    assert_eq!(session.user.root_status(), None);
}

#[test]
fn child_halt_is_refused() {
    let mut child = ProgramBuilder::new();
    child.text().sys(SyscallNumber::Halt).exit_reg(V0);

    let mut root = ProgramBuilder::new();
    root.string("child", "child.coff").string("ok", "parent runs");
    with_status(&mut root);
    exec_child(&mut root, "child");
    join_child(&mut root);
    root.text()
        .li(T1, -1)
        .bne(S2, T1, "bad")
        .print("ok", "parent runs")
        .exit_with(0)
        .label("bad")
        .exit_with(1);

    let session = run(&root, &[("child.coff", &child)]);
    session.outcome.assert_halted();
    assert_eq!(session.output(), "parent runs");
    assert_eq!(session.user.root_status(), Some(ExitStatus::Normal(0)));
    session.assert_no_leak();
}

#[test]
fn file_round_trip() {
    let mut root = ProgramBuilder::new();
    root.string("a", "a").string("hello", "hello").buffer("buf", 16);
    root.text()
        .la(A0, "a")
        .sys(SyscallNumber::Create)
        .move_(S0, V0)
        .move_(A0, S0)
        .la(A1, "hello")
        .li(A2, 5)
        .sys(SyscallNumber::Write)
        .move_(A0, S0)
        .sys(SyscallNumber::Close)
        .la(A0, "a")
        .sys(SyscallNumber::Open)
        .move_(S1, V0)
        .move_(A0, S1)
        .la(A1, "buf")
        .li(A2, 5)
        .sys(SyscallNumber::Read)
        .move_(S2, V0)
        .li(A0, 1)
        .la(A1, "buf")
        .move_(A2, S2)
        .sys(SyscallNumber::Write)
        .exit_reg(S2);

    let session = run(&root, &[]);
    session.outcome.assert_halted();
    assert_eq!(session.output(), "hello");
    assert_eq!(session.user.root_status(), Some(ExitStatus::Normal(5)));
    assert_eq!(
        session.outcome.kernel.machine().file_system().contents("a").as_deref(),
        Some(&b"hello"[..])
    );
    session.assert_no_leak();
}

#[test]
fn unlink_is_deferred_until_the_last_close() {
    let mut unlinker = ProgramBuilder::new();
    unlinker.string("x", "x");
    unlinker.text().la(A0, "x").sys(SyscallNumber::Unlink).exit_reg(V0);

    let mut root = ProgramBuilder::new();
    root.string("x", "x")
        .string("data", "data")
        .string("child", "unlinker.coff")
        .string("gone", " gone")
        .buffer("buf", 16);
    with_status(&mut root);
    root.text()
        .la(A0, "x")
        .sys(SyscallNumber::Create)
        .move_(A0, V0)
        .la(A1, "data")
        .li(A2, 4)
        .sys(SyscallNumber::Write)
        .sys(SyscallNumber::Close)
        .la(A0, "x")
        .sys(SyscallNumber::Open)
        .move_(S3, V0);
    exec_child(&mut root, "child");
    join_child(&mut root);
    root.text()
        .bne(S2, ZERO, "bad")
        .move_(A0, S3)
        .la(A1, "buf")
        .li(A2, 4)
        .sys(SyscallNumber::Read)
        .li(A0, 1)
        .la(A1, "buf")
        .move_(A2, V0)
        .sys(SyscallNumber::Write)
        .move_(A0, S3)
        .sys(SyscallNumber::Close)
        .la(A0, "x")
        .sys(SyscallNumber::Open)
        .bgez(V0, "bad")
        .print("gone", " gone")
        .exit_with(0)
        .label("bad")
        .exit_with(1);

    let session = run(&root, &[("unlinker.coff", &unlinker)]);
    session.outcome.assert_halted();
    assert_eq!(session.output(), "data gone");
    assert_eq!(session.user.root_status(), Some(ExitStatus::Normal(0)));
    assert!(!session.outcome.kernel.machine().file_system().exists("x"));
    session.assert_no_leak();
}

#[test]
fn join_returns_the_child_status() {
    let mut root = ProgramBuilder::new();
    root.string("child", "child.coff");
    with_status(&mut root);
    exec_child(&mut root, "child");
    join_child(&mut root);
    root.text()
        .li(T0, 1)
        .bne(S1, T0, "bad")
        .exit_reg(S2)
        .label("bad")
        .exit_with(-2);

    let session = run(&root, &[("child.coff", &exit_program(42))]);
    session.outcome.assert_halted();
    assert_eq!(session.user.root_status(), Some(ExitStatus::Normal(42)));
    session.assert_no_leak();
}

#[test]
fn join_with_an_unwritable_status_keeps_the_child() {
    let mut root = ProgramBuilder::new();
    root.string("child", "child.coff");
    exec_child(&mut root, "child");
    root.text()
        .move_(A0, S0)
        .li(A1, 0x7fff_0000)
        .sys(SyscallNumber::Join)
        .move_(S1, V0)
        .move_(A0, S0)
        .li(A1, 0)
        .sys(SyscallNumber::Join)
        .move_(S2, V0)
        .li(T0, -1)
        .bne(S1, T0, "bad")
        .li(T0, 1)
        .bne(S2, T0, "bad")
        .exit_with(0)
        .label("bad")
        .exit_with(1);

    let session = run(&root, &[("child.coff", &exit_program(42))]);
    session.outcome.assert_halted();
    assert_eq!(session.user.root_status(), Some(ExitStatus::Normal(0)));
    session.assert_no_leak();
}

#[test]
fn killed_child_joins_as_abnormal() {
    let mut root = ProgramBuilder::new();
    root.string("child", "child.coff").string("killed", "killed");
    with_status(&mut root);
    exec_child(&mut root, "child");
    join_child(&mut root);
    root.text()
        .bne(S1, ZERO, "bad")
        // The status word is left alone.
        .li(T1, 0xdead_beefu32 as i32)
        .bne(S2, T1, "bad")
        .print("killed", "killed")
        .exit_with(0)
        .label("bad")
        .exit_with(1);

    let session = run(&root, &[("child.coff", &faulting_program())]);
    session.outcome.assert_halted();
    assert_eq!(session.output(), "killed");
    assert_eq!(session.user.root_status(), Some(ExitStatus::Normal(0)));
    session.assert_no_leak();
}

#[test]
fn exec_without_memory_fails() {
    let mut big = ProgramBuilder::new();
    big.buffer("heap", 8 * 1024);
    big.text().exit_with(0);

    let mut root = ProgramBuilder::new();
    root.string("child", "big.coff");
    exec_child(&mut root, "child");
    root.text().exit_reg(S0);

    let driver = TestDriver::new().config(|c| c.num_phys_pages = 20);
    let session = Session::run(
        driver,
        "root.coff",
        &[],
        &[("root.coff", &root), ("big.coff", &big)],
    );
    session.outcome.assert_halted();
    assert_eq!(session.user.root_status(), Some(ExitStatus::Normal(-1)));
    session.assert_no_leak();
}

#[test]
fn unknown_syscall_returns_minus_one() {
    let mut root = ProgramBuilder::new();
    root.text().li(V0, 42).syscall().exit_reg(V0);
    let session = run(&root, &[]);
    assert_eq!(session.user.root_status(), Some(ExitStatus::Normal(-1)));
}

#[test]
fn root_receives_its_arguments() {
    let mut root = ProgramBuilder::new();
    root.text()
        .move_(S0, A0)
        .lw(A1, 4, A1)
        .li(A0, 1)
        .li(A2, 3)
        .sys(SyscallNumber::Write)
        .exit_reg(S0);

    let session = Session::run(
        TestDriver::new(),
        "echo.coff",
        &["echo", "abc"],
        &[("echo.coff", &root)],
    );
    assert_eq!(session.output(), "abc");
    assert_eq!(session.user.root_status(), Some(ExitStatus::Normal(2)));
}

#[test]
fn exec_copies_arguments() {
    let mut child = ProgramBuilder::new();
    child.text()
        .move_(S0, A0)
        .lw(A1, 4, A1)
        .li(A0, 1)
        .li(A2, 5)
        .sys(SyscallNumber::Write)
        .exit_reg(S0);

    let mut root = ProgramBuilder::new();
    root.string("child", "child.coff")
        .string("arg1", "first")
        .string("arg2", "second")
        .pointers("argv", &["child", "arg1", "arg2"]);
    with_status(&mut root);
    root.text()
        .la(A0, "child")
        .li(A1, 3)
        .la(A2, "argv")
        .sys(SyscallNumber::Exec)
        .move_(S0, V0);
    join_child(&mut root);
    root.text().exit_reg(S2);

    let session = run(&root, &[("child.coff", &child)]);
    assert_eq!(session.output(), "first");
    assert_eq!(session.user.root_status(), Some(ExitStatus::Normal(3)));
    session.assert_no_leak();
}

#[test]
fn frames_are_conserved_across_many_processes() {
    let mut root = ProgramBuilder::new();
    root.string("child", "child.coff");
    with_status(&mut root);
    root.text().li(S4, 6).label("again");
    exec_child(&mut root, "child");
    join_child(&mut root);
    root.text()
        .addiu(S4, S4, -1)
        .bgtz(S4, "again")
        .exit_with(0);

    let session = run(&root, &[("child.coff", &message_program(".", 0))]);
    assert_eq!(session.output(), "......");
    assert_eq!(session.user.root_status(), Some(ExitStatus::Normal(0)));
    session.assert_no_leak();
}

#[test]
fn orphans_finish_after_their_parent() {
    let grandchild = message_program("late", 3);

    let mut child = ProgramBuilder::new();
    child.string("gc", "grandchild.coff");
    exec_child(&mut child, "gc");
    child.text().exit_with(7);

    let mut root = ProgramBuilder::new();
    root.string("child", "child.coff");
    with_status(&mut root);
    exec_child(&mut root, "child");
    join_child(&mut root);
    root.text().exit_reg(S2);

    let session = run(
        &root,
        &[("child.coff", &child), ("grandchild.coff", &grandchild)],
    );
    session.outcome.assert_halted();
    assert_eq!(session.output(), "late");
    assert_eq!(session.user.root_status(), Some(ExitStatus::Normal(7)));
    session.assert_no_leak();
}

#[test]
fn join_only_works_once() {
    let mut root = ProgramBuilder::new();
    root.string("child", "child.coff");
    with_status(&mut root);
    exec_child(&mut root, "child");
    join_child(&mut root);
    join_child(&mut root);
    root.text().exit_reg(S1);

    let session = run(&root, &[("child.coff", &exit_program(0))]);
    assert_eq!(session.user.root_status(), Some(ExitStatus::Normal(-1)));
}

/// A child that prints `letter` three times, busy between prints.
fn chatty(letter: &str) -> ProgramBuilder {
    let mut p = ProgramBuilder::new();
    p.string("letter", letter);
    p.text()
        .li(S0, 3)
        .label("print")
        .print("letter", letter)
        .li(T0, 1000)
        .label("spin")
        .addiu(T0, T0, -1)
        .bgtz(T0, "spin")
        .addiu(S0, S0, -1)
        .bgtz(S0, "print")
        .exit_with(0);
    p
}

#[test]
fn user_processes_are_preempted() {
    let mut root = ProgramBuilder::new();
    root.string("a", "a.coff").string("b", "b.coff");
    with_status(&mut root);
    exec_child(&mut root, "a");
    root.text().move_(S5, S0);
    exec_child(&mut root, "b");
    join_child(&mut root);
    root.text().move_(S0, S5);
    join_child(&mut root);
    root.text().exit_with(0);

    let session = run(&root, &[("a.coff", &chatty("a")), ("b.coff", &chatty("b"))]);
    let output = session.output();
    assert_eq!(output.matches('a').count(), 3);
    assert_eq!(output.matches('b').count(), 3);
    assert_ne!(output, "aaabbb");
    assert!(session.outcome.stats.user_ticks > 6000);
    session.assert_no_leak();
}
