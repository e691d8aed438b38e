//! # File state of a process.
//!
//! Processes interact with files through **file descriptors**: small
//! integers indexing the process's table of open files. The table has
//! [`MAX_OPEN_FILES`] slots. Slot 0 reads the console and slot 1 writes it;
//! every file opened later lands in the lowest free slot from 2 upward.
//!
//! Regular files are opened through the kernel's [`FileRegistry`], so that
//! an unlinked file survives until its last descriptor, in any process, is
//! closed.
//!
//! Kernel **MUST NOT** believe the user input. Every handler validates its
//! arguments and reaches user memory only through the [`uaccess`] types; a
//! bad argument makes the system call fail, never the kernel.
//!
//! [`FileRegistry`]: crate::file_table::FileRegistry
//! [`uaccess`]: crate::uaccess
use crate::{
    UserKernel,
    mm_struct::MmStruct,
    syscall::SyscallAbi,
    uaccess::{UserCString, UserU8SliceRO, UserU8SliceWO},
};
use kmips::{KernelError, PAGE_SIZE, teletype::Teletype};
use machine::fs::OpenFile;

/// Number of descriptor slots of a process.
pub const MAX_OPEN_FILES: usize = 16;

/// What a descriptor refers to.
pub enum FileKind {
    /// The console, read side.
    Stdin,
    /// The console, write side.
    Stdout,
    /// A file of the stub file system, with its own position.
    RegularFile(OpenFile),
}

/// Represents an index into a process's file descriptor table.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct FileDescriptor(pub i32);

/// The [`FileStruct`] represents the filesystem state for a specific
/// process.
pub struct FileStruct {
    files: [Option<FileKind>; MAX_OPEN_FILES],
}

impl Default for FileStruct {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStruct {
    /// A table with only the console descriptors open.
    pub fn new() -> Self {
        let mut files: [Option<FileKind>; MAX_OPEN_FILES] = core::array::from_fn(|_| None);
        files[0] = Some(FileKind::Stdin);
        files[1] = Some(FileKind::Stdout);
        Self { files }
    }

    fn free_slot(&self) -> Option<usize> {
        (2..MAX_OPEN_FILES).find(|fd| self.files[*fd].is_none())
    }

    /// Installs `file` in the lowest free slot from 2 upward.
    ///
    /// # Errors
    /// [`KernelError::TooManyOpenFile`] if every slot is taken.
    pub fn install_file(&mut self, file: FileKind) -> Result<FileDescriptor, KernelError> {
        let fd = self.free_slot().ok_or(KernelError::TooManyOpenFile)?;
        self.files[fd] = Some(file);
        Ok(FileDescriptor(fd as i32))
    }

    fn get_mut(&mut self, fd: i32) -> Result<&mut FileKind, KernelError> {
        usize::try_from(fd)
            .ok()
            .and_then(|fd| self.files.get_mut(fd))
            .and_then(Option::as_mut)
            .ok_or(KernelError::BadFileDescriptor)
    }

    fn open_common(
        &mut self,
        ctx: &UserKernel,
        mm: &MmStruct,
        abi: &SyscallAbi,
        create: bool,
    ) -> Result<usize, KernelError> {
        let name = UserCString::new(abi.arg1).read(mm)?;
        // Check for a slot first: creating truncates.
        if self.free_slot().is_none() {
            return Err(KernelError::TooManyOpenFile);
        }
        let file = ctx.registry().open(ctx.file_system(), &name, create)?;
        let fd = self.install_file(FileKind::RegularFile(file))?;
        Ok(fd.0 as usize)
    }

    /// `create(name)`: opens `name`, creating it if it does not exist and
    /// truncating it if it does.
    ///
    /// Returns the new file descriptor.
    pub fn create(
        &mut self,
        ctx: &UserKernel,
        mm: &MmStruct,
        abi: &SyscallAbi,
    ) -> Result<usize, KernelError> {
        self.open_common(ctx, mm, abi, true)
    }

    /// `open(name)`: opens an existing file.
    ///
    /// Returns the new file descriptor.
    pub fn open(
        &mut self,
        ctx: &UserKernel,
        mm: &MmStruct,
        abi: &SyscallAbi,
    ) -> Result<usize, KernelError> {
        self.open_common(ctx, mm, abi, false)
    }

    /// `read(fd, buf, size)`: reads up to `size` bytes into the user buffer.
    ///
    /// Data moves one page at a time. Returns the number of bytes that
    /// reached user memory, which is short at the end of the file, at the end
    /// of console input, or where the user buffer stops being writable.
    pub fn read(
        &mut self,
        ctx: &UserKernel,
        mm: &MmStruct,
        abi: &SyscallAbi,
    ) -> Result<usize, KernelError> {
        let (fd, buf, size) = (abi.arg1, abi.arg2, abi.arg3);
        let file = self.get_mut(fd)?;
        if buf < 0 {
            return Err(KernelError::BadAddress);
        }
        let size = usize::try_from(size).map_err(|_| KernelError::InvalidArgument)?;

        let mut chunk = [0u8; PAGE_SIZE];
        let mut total = 0;
        while total < size {
            let Some(va) = buf.checked_add(total as i32) else {
                break;
            };
            let want = (size - total).min(PAGE_SIZE);
            let got = match file {
                FileKind::Stdin => ctx.kernel().console().read(&mut chunk[..want])?,
                FileKind::RegularFile(f) => f.read(&mut chunk[..want]),
                FileKind::Stdout => return Err(KernelError::BadFileDescriptor),
            };
            let copied = UserU8SliceWO::new(va).put(mm, &chunk[..got])?;
            total += copied;
            if copied < got || got < want {
                break;
            }
        }
        Ok(total)
    }

    /// `write(fd, buf, size)`: writes up to `size` bytes from the user
    /// buffer.
    ///
    /// Returns the number of bytes the file accepted. Writing stops where the
    /// user buffer stops being readable.
    pub fn write(
        &mut self,
        ctx: &UserKernel,
        mm: &MmStruct,
        abi: &SyscallAbi,
    ) -> Result<usize, KernelError> {
        let (fd, buf, size) = (abi.arg1, abi.arg2, abi.arg3);
        let file = self.get_mut(fd)?;
        if buf < 0 {
            return Err(KernelError::BadAddress);
        }
        let size = usize::try_from(size).map_err(|_| KernelError::InvalidArgument)?;

        let mut total = 0;
        while total < size {
            let Some(va) = buf.checked_add(total as i32) else {
                break;
            };
            let want = (size - total).min(PAGE_SIZE);
            let data = UserU8SliceRO::new(va, want).get(mm)?;
            if data.is_empty() {
                break;
            }
            let written = match file {
                FileKind::Stdout => ctx.kernel().console().write(&data)?,
                FileKind::RegularFile(f) => f.write(&data),
                FileKind::Stdin => return Err(KernelError::BadFileDescriptor),
            };
            total += written;
            if written < data.len() || data.len() < want {
                break;
            }
        }
        Ok(total)
    }

    /// `close(fd)`: closes a descriptor. The console descriptors can be
    /// closed too.
    pub fn close(&mut self, ctx: &UserKernel, abi: &SyscallAbi) -> Result<usize, KernelError> {
        self.get_mut(abi.arg1)?;
        if let Some(FileKind::RegularFile(file)) = self.files[abi.arg1 as usize].take() {
            ctx.registry().close(ctx.file_system(), file);
        }
        Ok(0)
    }

    /// `unlink(name)`: removes `name` from the file system.
    ///
    /// The caller's own descriptors for `name` are closed first. If other
    /// processes still hold the file open, the removal happens when the last
    /// of them closes it, and until then the name can not be opened.
    pub fn unlink(
        &mut self,
        ctx: &UserKernel,
        mm: &MmStruct,
        abi: &SyscallAbi,
    ) -> Result<usize, KernelError> {
        let name = UserCString::new(abi.arg1).read(mm)?;
        for slot in self.files.iter_mut() {
            if matches!(slot, Some(FileKind::RegularFile(f)) if f.name() == name)
                && let Some(FileKind::RegularFile(file)) = slot.take()
            {
                ctx.registry().close(ctx.file_system(), file);
            }
        }
        ctx.registry().unlink(ctx.file_system(), &name)?;
        Ok(0)
    }

    /// Closes every descriptor. Used when the process exits.
    pub fn close_all(&mut self, ctx: &UserKernel) {
        for slot in self.files.iter_mut() {
            if let Some(FileKind::RegularFile(file)) = slot.take() {
                ctx.registry().close(ctx.file_system(), file);
            }
        }
    }
}
