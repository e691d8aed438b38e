//! Global file registry.
//!
//! Every process opens files through the registry, which counts, per file
//! name, how many descriptors across all processes refer to it. The count
//! drives deferred removal: [`FileRegistry::unlink`] of a file that is still
//! open only marks it, and the last [`FileRegistry::close`] removes it from
//! the file system.
//!
//! ```text
//!   open/create        close (refs > 0)
//!  ------------> (k, live) ----------->
//!                   |
//!                   | unlink
//!                   v
//!               (k, pending) --- close, refs = 0 ---> removed
//! ```
//!
//! A record whose count drops to zero without a pending unlink is dropped,
//! so a later open starts a fresh record. While an unlink is pending, the
//! name can be neither opened nor created.
use kmips::{KernelError, sync::Mutex};
use machine::fs::{OpenFile, StubFileSystem};
use std::collections::BTreeMap;

/// Bookkeeping of one file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileReference {
    /// Number of open descriptors referring to the name.
    pub refs: usize,
    /// Set once the name was unlinked while still open.
    pub unlink_pending: bool,
}

/// The name-keyed registry of open files.
#[derive(Default)]
pub struct FileRegistry {
    entries: Mutex<BTreeMap<String, FileReference>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `name` and counts the new reference. With `create`, a missing
    /// file is created and an existing one truncated.
    ///
    /// # Errors
    /// [`KernelError::NoSuchEntry`] if the file does not exist (and `create`
    /// is not set), the name is not valid, or an unlink of the name is
    /// pending.
    pub fn open(
        &self,
        fs: &StubFileSystem,
        name: &str,
        create: bool,
    ) -> Result<OpenFile, KernelError> {
        let mut entries = self.entries.lock();
        let result = if entries.get(name).is_some_and(|e| e.unlink_pending) {
            Err(KernelError::NoSuchEntry)
        } else {
            match fs.open(name, create) {
                Some(file) => {
                    entries.entry(name.to_string()).or_default().refs += 1;
                    Ok(file)
                }
                None => Err(KernelError::NoSuchEntry),
            }
        };
        entries.unlock();
        debug!('f', "open {} (create: {}): {:?}", name, create, result.as_ref().map(|_| ()));
        result
    }

    /// Closes `file` and drops its reference.
    ///
    /// Returns true if this removed the file from the file system.
    pub fn close(&self, fs: &StubFileSystem, file: OpenFile) -> bool {
        let name = file.name().to_string();
        file.close();

        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&name).map(|entry| {
            entry.refs -= 1;
            *entry
        });
        let removed = match entry {
            Some(e) if e.refs == 0 => {
                entries.remove(&name);
                e.unlink_pending && fs.remove(&name)
            }
            _ => false,
        };
        entries.unlock();

        assert!(entry.is_some(), "Closing {} which the registry does not know.", name);
        debug!('f', "close {} (removed: {})", name, removed);
        removed
    }

    /// Removes `name`, or defers the removal to the last close if some
    /// descriptor still refers to it.
    ///
    /// # Errors
    /// [`KernelError::NoSuchEntry`] if the name is not open and there is no
    /// such file.
    pub fn unlink(&self, fs: &StubFileSystem, name: &str) -> Result<(), KernelError> {
        let mut entries = self.entries.lock();
        let result = match entries.get_mut(name) {
            Some(entry) => {
                entry.unlink_pending = true;
                Ok(())
            }
            None if fs.remove(name) => Ok(()),
            None => Err(KernelError::NoSuchEntry),
        };
        entries.unlock();
        debug!('f', "unlink {}: {:?}", name, result);
        result
    }

    /// The record of `name`, if any descriptor refers to it.
    pub fn get(&self, name: &str) -> Option<FileReference> {
        let entries = self.entries.lock();
        let entry = entries.get(name).copied();
        entries.unlock();
        entry
    }
}
