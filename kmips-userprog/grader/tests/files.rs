//! File system calls and the global file registry.
//!
//! These tests drive [`Process::syscall`] directly from a kernel thread, the
//! way the exception handler would, so that no process ever runs or exits.
use grading::{TestDriver, asm::reg::*, assert_output, kernel_test, program::ProgramBuilder, stdin};
use kmips::{KernelError, PAGE_SIZE};
use kmips_grader::user_driver;
use kmips_userprog::{
    Process, SyscallNumber, UserKernel, file_struct::MAX_OPEN_FILES, loader::LoadContext,
    process::Pid, syscall::SyscallAbi,
};
use std::sync::Arc;

fn user() -> Arc<UserKernel> {
    UserKernel::current().expect("user-process layer")
}

/// The data every test process carries.
fn program() -> ProgramBuilder {
    let mut p = ProgramBuilder::new();
    p.string("a", "a")
        .string("x", "x")
        .string("missing", "missing")
        .string("hello", "hello")
        .string("prog", "prog.coff")
        .string("noext", "prog")
        .buffer("buf", 3 * 1024);
    p.text().li(V0, 0).syscall();
    p
}

fn addr(label: &str) -> i32 {
    program().address_of(label) as i32
}

/// A process with pid `pid` that never runs.
fn process(pid: Pid) -> Process {
    let user = user();
    if !user.file_system().exists("prog.coff") {
        program().install(user.file_system(), "prog.coff");
    }
    let image = LoadContext::new(user.kernel().machine(), user.frames())
        .load("prog.coff", &[])
        .unwrap();
    Process::new(user, pid, image)
}

fn call(p: &mut Process, sysno: SyscallNumber, args: &[i32]) -> Result<usize, KernelError> {
    let arg = |i: usize| args.get(i).copied().unwrap_or(0);
    p.syscall(&SyscallAbi {
        sysno: sysno as i32,
        arg1: arg(0),
        arg2: arg(1),
        arg3: arg(2),
        arg4: arg(3),
    })
}

fn read_back(p: &Process, label: &str, len: usize) -> Vec<u8> {
    let mut buf = vec![0; len];
    let n = p.mm().read_virtual_memory(addr(label) as u32, &mut buf);
    buf.truncate(n);
    buf
}

fn refs(name: &str) -> usize {
    user().registry().get(name).map_or(0, |r| r.refs)
}

#[kernel_test(user_driver)]
fn create_write_close_open_read() {
    let mut p = process(1);
    let fd1 = call(&mut p, SyscallNumber::Create, &[addr("a")]).unwrap();
    assert_eq!(fd1, 2);
    assert_eq!(call(&mut p, SyscallNumber::Write, &[fd1 as i32, addr("hello"), 5]), Ok(5));
    assert_eq!(call(&mut p, SyscallNumber::Close, &[fd1 as i32]), Ok(0));

    let fd2 = call(&mut p, SyscallNumber::Open, &[addr("a")]).unwrap();
    assert_eq!(call(&mut p, SyscallNumber::Read, &[fd2 as i32, addr("buf"), 5]), Ok(5));
    assert_eq!(read_back(&p, "buf", 5), b"hello");
    // At the end of the file.
    assert_eq!(call(&mut p, SyscallNumber::Read, &[fd2 as i32, addr("buf"), 5]), Ok(0));
    assert_eq!(user().file_system().contents("a").as_deref(), Some(&b"hello"[..]));
    call(&mut p, SyscallNumber::Close, &[fd2 as i32]).unwrap();
}

#[kernel_test(user_driver)]
fn create_truncates() {
    user().file_system().insert("a", b"old contents");
    let mut p = process(1);
    let fd = call(&mut p, SyscallNumber::Create, &[addr("a")]).unwrap();
    assert_eq!(user().file_system().contents("a").as_deref(), Some(&b""[..]));
    call(&mut p, SyscallNumber::Close, &[fd as i32]).unwrap();
}

#[kernel_test(user_driver)]
fn large_transfers_cross_pages() {
    let mut p = process(1);
    let pattern: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(p.mm().write_virtual_memory(addr("buf") as u32, &pattern), 3000);

    let fd = call(&mut p, SyscallNumber::Create, &[addr("a")]).unwrap() as i32;
    assert_eq!(call(&mut p, SyscallNumber::Write, &[fd, addr("buf"), 3000]), Ok(3000));
    call(&mut p, SyscallNumber::Close, &[fd]).unwrap();
    assert_eq!(user().file_system().contents("a"), Some(pattern.clone()));

    p.mm().write_virtual_memory(addr("buf") as u32, &[0; 3000]);
    let fd = call(&mut p, SyscallNumber::Open, &[addr("a")]).unwrap() as i32;
    assert_eq!(call(&mut p, SyscallNumber::Read, &[fd, addr("buf"), 3000]), Ok(3000));
    assert_eq!(read_back(&p, "buf", 3000), pattern);
    call(&mut p, SyscallNumber::Close, &[fd]).unwrap();
}

#[kernel_test(user_driver)]
fn transfers_stop_at_unmapped_memory() {
    let mut p = process(1);
    let end = (p.mm().num_pages() * PAGE_SIZE) as i32;
    user().file_system().insert("a", &[7; 100]);
    let fd = call(&mut p, SyscallNumber::Open, &[addr("a")]).unwrap() as i32;
    assert_eq!(call(&mut p, SyscallNumber::Read, &[fd, end - 40, 100]), Ok(40));
    assert_eq!(call(&mut p, SyscallNumber::Write, &[fd, end - 16, 100]), Ok(16));
    assert_eq!(call(&mut p, SyscallNumber::Write, &[fd, end, 100]), Ok(0));
    call(&mut p, SyscallNumber::Close, &[fd]).unwrap();
}

#[kernel_test(user_driver)]
fn bad_arguments_fail() {
    let mut p = process(1);
    assert_eq!(call(&mut p, SyscallNumber::Open, &[addr("missing")]), Err(KernelError::NoSuchEntry));
    assert_eq!(call(&mut p, SyscallNumber::Open, &[-4]), Err(KernelError::BadAddress));
    assert_eq!(call(&mut p, SyscallNumber::Open, &[0x7fff_0000]), Err(KernelError::BadAddress));
    assert_eq!(call(&mut p, SyscallNumber::Read, &[5, addr("buf"), 1]), Err(KernelError::BadFileDescriptor));
    assert_eq!(call(&mut p, SyscallNumber::Read, &[-1, addr("buf"), 1]), Err(KernelError::BadFileDescriptor));
    assert_eq!(call(&mut p, SyscallNumber::Write, &[99, addr("buf"), 1]), Err(KernelError::BadFileDescriptor));
    assert_eq!(call(&mut p, SyscallNumber::Read, &[1, addr("buf"), 1]), Err(KernelError::BadFileDescriptor));
    assert_eq!(call(&mut p, SyscallNumber::Write, &[0, addr("hello"), 1]), Err(KernelError::BadFileDescriptor));
    assert_eq!(call(&mut p, SyscallNumber::Write, &[1, -8, 1]), Err(KernelError::BadAddress));
    assert_eq!(call(&mut p, SyscallNumber::Write, &[1, addr("hello"), -1]), Err(KernelError::InvalidArgument));
    assert_eq!(call(&mut p, SyscallNumber::Close, &[7]), Err(KernelError::BadFileDescriptor));
    assert_eq!(call(&mut p, SyscallNumber::Unlink, &[addr("missing")]), Err(KernelError::NoSuchEntry));
}

#[kernel_test(user_driver)]
fn descriptor_table_fills_up() {
    let mut p = process(1);
    let fds: Vec<_> = (2..MAX_OPEN_FILES)
        .map(|_| call(&mut p, SyscallNumber::Create, &[addr("x")]).unwrap())
        .collect();
    assert_eq!(fds, (2..MAX_OPEN_FILES).collect::<Vec<_>>());
    assert_eq!(call(&mut p, SyscallNumber::Create, &[addr("x")]), Err(KernelError::TooManyOpenFile));
    assert_eq!(refs("x"), MAX_OPEN_FILES - 2);

    // The lowest free slot is reused.
    call(&mut p, SyscallNumber::Close, &[5]).unwrap();
    assert_eq!(call(&mut p, SyscallNumber::Open, &[addr("x")]), Ok(5));
    for fd in fds {
        call(&mut p, SyscallNumber::Close, &[fd as i32]).unwrap();
    }
    assert_eq!(refs("x"), 0);
    assert!(user().registry().get("x").is_none());
}

#[kernel_test(user_driver)]
fn refcount_follows_descriptors_across_processes() {
    let (mut a, mut b) = (process(1), process(2));
    let fa = call(&mut a, SyscallNumber::Create, &[addr("x")]).unwrap() as i32;
    let fb1 = call(&mut b, SyscallNumber::Open, &[addr("x")]).unwrap() as i32;
    let fb2 = call(&mut b, SyscallNumber::Open, &[addr("x")]).unwrap() as i32;
    assert_eq!(refs("x"), 3);
    call(&mut b, SyscallNumber::Close, &[fb1]).unwrap();
    assert_eq!(refs("x"), 2);
    // Closing twice fails and changes nothing.
    assert!(call(&mut b, SyscallNumber::Close, &[fb1]).is_err());
    assert_eq!(refs("x"), 2);
    call(&mut b, SyscallNumber::Close, &[fb2]).unwrap();
    call(&mut a, SyscallNumber::Close, &[fa]).unwrap();
    assert_eq!(refs("x"), 0);
    assert!(user().file_system().exists("x"));
}

#[kernel_test(user_driver)]
fn unlink_waits_for_the_last_close() {
    let (mut a, mut b) = (process(1), process(2));
    user().file_system().insert("x", b"hello");
    let fa = call(&mut a, SyscallNumber::Open, &[addr("x")]).unwrap() as i32;

    assert_eq!(call(&mut b, SyscallNumber::Unlink, &[addr("x")]), Ok(0));
    assert!(user().registry().get("x").unwrap().unlink_pending);
    assert!(user().file_system().exists("x"));
    // No new opens while the removal is pending.
    assert_eq!(call(&mut b, SyscallNumber::Open, &[addr("x")]), Err(KernelError::NoSuchEntry));

    assert_eq!(call(&mut a, SyscallNumber::Read, &[fa, addr("buf"), 5]), Ok(5));
    assert_eq!(read_back(&a, "buf", 5), b"hello");
    call(&mut a, SyscallNumber::Close, &[fa]).unwrap();

    assert!(!user().file_system().exists("x"));
    assert!(user().registry().get("x").is_none());
    assert!(call(&mut a, SyscallNumber::Open, &[addr("x")]).is_err());
    assert!(call(&mut b, SyscallNumber::Unlink, &[addr("x")]).is_err());

    // Re-created, the name works again.
    let fd = call(&mut b, SyscallNumber::Create, &[addr("x")]).unwrap() as i32;
    call(&mut b, SyscallNumber::Close, &[fd]).unwrap();
    assert!(user().file_system().exists("x"));
}

#[kernel_test(user_driver)]
fn unlink_closes_the_callers_descriptors() {
    let mut p = process(1);
    let fd = call(&mut p, SyscallNumber::Create, &[addr("x")]).unwrap() as i32;
    assert_eq!(call(&mut p, SyscallNumber::Unlink, &[addr("x")]), Ok(0));
    assert!(!user().file_system().exists("x"));
    assert_eq!(call(&mut p, SyscallNumber::Read, &[fd, addr("buf"), 1]), Err(KernelError::BadFileDescriptor));
}

#[kernel_test(user_driver)]
#[stdin(b"ping")]
#[assert_output(b"hello")]
fn console_descriptors() {
    let mut p = process(1);
    assert_eq!(call(&mut p, SyscallNumber::Read, &[0, addr("buf"), 10]), Ok(4));
    assert_eq!(read_back(&p, "buf", 4), b"ping");
    assert_eq!(call(&mut p, SyscallNumber::Read, &[0, addr("buf"), 10]), Ok(0));
    assert_eq!(call(&mut p, SyscallNumber::Write, &[1, addr("hello"), 5]), Ok(5));
    assert_eq!(call(&mut p, SyscallNumber::Write, &[1, addr("hello"), 0]), Ok(0));

    // The console can be closed like any other descriptor.
    assert_eq!(call(&mut p, SyscallNumber::Close, &[1]), Ok(0));
    assert_eq!(call(&mut p, SyscallNumber::Write, &[1, addr("hello"), 5]), Err(KernelError::BadFileDescriptor));
}

#[kernel_test(user_driver)]
fn process_calls_check_the_caller() {
    let mut p = process(1);
    assert_eq!(call(&mut p, SyscallNumber::Halt, &[]), Err(KernelError::OperationNotPermitted));
    assert_eq!(call(&mut p, SyscallNumber::Join, &[0, 0]), Err(KernelError::NoSuchChild));
    assert_eq!(call(&mut p, SyscallNumber::Join, &[0, -4]), Err(KernelError::BadAddress));
    assert_eq!(call(&mut p, SyscallNumber::Exec, &[addr("noext"), 0, 0]), Err(KernelError::NoExec));
    assert_eq!(call(&mut p, SyscallNumber::Exec, &[addr("prog"), 1000, 0]), Err(KernelError::InvalidArgument));
    assert_eq!(call(&mut p, SyscallNumber::Exec, &[addr("prog"), 1, -4]), Err(KernelError::BadAddress));
    assert_eq!(
        p.syscall(&SyscallAbi { sysno: 42, arg1: 0, arg2: 0, arg3: 0, arg4: 0 }),
        Err(KernelError::NoSuchSyscall)
    );
}

/// One process worth of frames and a few to spare.
fn fourteen_pages() -> TestDriver {
    user_driver().config(|c| c.num_phys_pages = 14)
}

#[kernel_test(fourteen_pages)]
fn exec_without_memory_takes_nothing() {
    let mut p = process(1);
    let free = user().frames().free_count();
    assert!(free < p.mm().num_pages());
    assert_eq!(
        call(&mut p, SyscallNumber::Exec, &[addr("prog"), 0, 0]),
        Err(KernelError::NoMemory)
    );
    assert_eq!(user().frames().free_count(), free);
    assert!(user().registry().get("prog.coff").is_none());
    assert_eq!(user().processes().len(), 0);
}
