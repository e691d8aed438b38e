//! Flat host-backed file system.
//!
//! Files live in a single directory keyed by name. Removing a file only
//! unlinks its name: handles opened before the removal keep working on the
//! old contents.
use crate::spinlock::SpinLock;
use std::{collections::BTreeMap, sync::Arc};

type Contents = Arc<SpinLock<Vec<u8>>>;

/// The file system of the simulated machine.
#[derive(Default)]
pub struct StubFileSystem {
    files: SpinLock<BTreeMap<String, Contents>>,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\0'])
}

impl StubFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `name`.
    ///
    /// With `create`, a missing file is created and an existing one is
    /// truncated. Without it, a missing file yields `None`.
    pub fn open(&self, name: &str, create: bool) -> Option<OpenFile> {
        if !valid_name(name) {
            return None;
        }
        let mut files = self.files.lock();
        let data = match (files.get(name), create) {
            (Some(data), false) => Some(data.clone()),
            (Some(data), true) => {
                let mut d = data.lock();
                d.clear();
                d.unlock();
                Some(data.clone())
            }
            (None, true) => {
                let data: Contents = Arc::default();
                files.insert(name.into(), data.clone());
                Some(data)
            }
            (None, false) => None,
        };
        files.unlock();
        crate::debug!('f', "open {:?} (create: {}) -> {}", name, create, data.is_some());
        data.map(|data| OpenFile {
            name: name.into(),
            data,
            pos: 0,
        })
    }

    /// Unlinks `name`. Returns false if no such file exists.
    pub fn remove(&self, name: &str) -> bool {
        let mut files = self.files.lock();
        let removed = files.remove(name).is_some();
        files.unlock();
        crate::debug!('f', "remove {:?} -> {}", name, removed);
        removed
    }

    /// Returns true if `name` exists.
    pub fn exists(&self, name: &str) -> bool {
        let files = self.files.lock();
        let found = files.contains_key(name);
        files.unlock();
        found
    }

    /// Creates or replaces `name` with `contents`.
    pub fn insert(&self, name: &str, contents: &[u8]) -> bool {
        match self.open(name, true) {
            Some(mut file) => file.write(contents) == contents.len(),
            None => false,
        }
    }

    /// Reads the whole of `name`.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        let files = self.files.lock();
        let data = files.get(name).cloned();
        files.unlock();
        data.map(|data| {
            let d = data.lock();
            let v = d.clone();
            d.unlock();
            v
        })
    }
}

/// An open file with its own position.
pub struct OpenFile {
    name: String,
    data: Contents,
    pos: usize,
}

impl OpenFile {
    /// The name the file was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads at `pos` without moving the file position.
    pub fn read_at(&self, pos: usize, buf: &mut [u8]) -> usize {
        let data = self.data.lock();
        let n = data.len().saturating_sub(pos).min(buf.len());
        if n > 0 {
            buf[..n].copy_from_slice(&data[pos..pos + n]);
        }
        data.unlock();
        n
    }

    /// Writes at `pos` without moving the file position. A gap past the end
    /// is zero-filled.
    pub fn write_at(&self, pos: usize, buf: &[u8]) -> usize {
        let mut data = self.data.lock();
        let end = pos + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[pos..end].copy_from_slice(buf);
        data.unlock();
        buf.len()
    }

    /// Reads at the file position and advances it.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.read_at(self.pos, buf);
        self.pos += n;
        n
    }

    /// Writes at the file position and advances it.
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let n = self.write_at(self.pos, buf);
        self.pos += n;
        n
    }

    pub fn length(&self) -> usize {
        let data = self.data.lock();
        let len = data.len();
        data.unlock();
        len
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Closes the file.
    pub fn close(self) {}
}
