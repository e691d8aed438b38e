//! Physical frame allocator.
//!
//! Every physical page of the machine starts out free. A process asks for
//! all of the frames it needs at once with [`FrameAllocator::allocate`], and
//! gives each of them back with [`FrameAllocator::release`] when it exits.
//!
//! Allocation is all-or-nothing: when fewer frames are free than requested,
//! nothing is taken. Frames are handed out in the order they were freed, so
//! the frames of a fresh machine come out lowest first.
//!
//! The pool sits behind a [`SpinLock`] rather than a blocking kernel lock,
//! so boot code and the host can read it outside any kernel thread.
use kmips::{KernelError, sync::SpinLock};
use std::collections::VecDeque;

struct Pool {
    free: VecDeque<usize>,
    in_use: Vec<bool>,
}

/// The system-wide pool of physical frames.
pub struct FrameAllocator {
    pool: SpinLock<Pool>,
}

impl FrameAllocator {
    /// Creates an allocator owning frames `0..num_frames`.
    pub fn new(num_frames: usize) -> Self {
        Self {
            pool: SpinLock::new(Pool {
                free: (0..num_frames).collect(),
                in_use: vec![false; num_frames],
            }),
        }
    }

    /// Takes `count` frames from the pool.
    ///
    /// # Errors
    /// [`KernelError::NoMemory`] if fewer than `count` frames are free. The
    /// pool is left untouched in that case.
    pub fn allocate(&self, count: usize) -> Result<Vec<usize>, KernelError> {
        let mut pool = self.pool.lock();
        if pool.free.len() < count {
            let free = pool.free.len();
            pool.unlock();
            debug!('a', "frame allocation of {} failed, {} free", count, free);
            return Err(KernelError::NoMemory);
        }
        let frames: Vec<usize> = pool.free.drain(..count).collect();
        for ppn in frames.iter() {
            pool.in_use[*ppn] = true;
        }
        pool.unlock();
        Ok(frames)
    }

    /// Returns frame `ppn` to the pool.
    ///
    /// # Panics
    /// Releasing a frame that is not allocated is a kernel bug.
    pub fn release(&self, ppn: usize) {
        let mut pool = self.pool.lock();
        let allocated = pool.in_use.get(ppn).copied().unwrap_or(false);
        if allocated {
            pool.in_use[ppn] = false;
            pool.free.push_back(ppn);
        }
        pool.unlock();
        assert!(allocated, "Frame {} released while not allocated.", ppn);
    }

    /// Number of frames currently free.
    pub fn free_count(&self) -> usize {
        let pool = self.pool.lock();
        let free = pool.free.len();
        pool.unlock();
        free
    }

    /// Number of frames managed by this allocator.
    pub fn total(&self) -> usize {
        let pool = self.pool.lock();
        let total = pool.in_use.len();
        pool.unlock();
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_all_or_nothing() {
        let frames = FrameAllocator::new(4);
        let first = frames.allocate(3).unwrap();
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(frames.allocate(2), Err(KernelError::NoMemory));
        assert_eq!(frames.free_count(), 1);
        assert_eq!(frames.allocate(1).unwrap(), vec![3]);
    }

    #[test]
    fn released_frames_are_reused_in_order() {
        let frames = FrameAllocator::new(3);
        let taken = frames.allocate(3).unwrap();
        frames.release(taken[1]);
        frames.release(taken[0]);
        assert_eq!(frames.allocate(2).unwrap(), vec![1, 0]);
    }

    #[test]
    #[should_panic(expected = "released while not allocated")]
    fn double_free_is_fatal() {
        let frames = FrameAllocator::new(2);
        let taken = frames.allocate(1).unwrap();
        frames.release(taken[0]);
        frames.release(taken[0]);
    }
}
