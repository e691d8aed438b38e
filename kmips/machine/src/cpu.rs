//! The single simulated CPU.
//!
//! Every kernel thread is backed by a host thread, but only the thread that
//! holds the baton may run. A context switch passes the baton to the next
//! thread and blocks the caller until the baton comes back. Halting wakes
//! every parked host thread with [`Halted`] so that it can unwind.
use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::JoinHandle,
};

/// The machine was halted while the caller waited for the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Halted;

/// Unwinding payload used to tear a kernel thread down after a halt.
#[derive(Debug)]
pub struct MachineHalted;

struct Baton {
    running: Option<u64>,
    halted: bool,
}

/// The CPU baton.
pub struct Cpu {
    baton: Mutex<Baton>,
    cond: Condvar,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            baton: Mutex::new(Baton {
                running: None,
                halted: false,
            }),
            cond: Condvar::new(),
            threads: Mutex::new(Vec::new()),
        }
    }

    fn baton(&self) -> MutexGuard<'_, Baton> {
        self.baton.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates the host thread backing context `id`.
    ///
    /// `body` starts only once the baton is handed to `id`. If the machine
    /// halts first, `body` is dropped without running.
    pub fn spawn<F>(self: &Arc<Self>, id: u64, name: &str, body: F) -> std::io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let cpu = self.clone();
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                if cpu.wait_turn(id).is_ok() {
                    body();
                }
            })?;
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(())
    }

    fn wait_turn(&self, id: u64) -> Result<(), Halted> {
        let mut baton = self.baton();
        loop {
            if baton.halted {
                return Err(Halted);
            }
            if baton.running == Some(id) {
                return Ok(());
            }
            baton = self.cond.wait(baton).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Gives the CPU to the first context.
    pub fn start(&self, first: u64) {
        self.handoff(first);
    }

    /// Gives the CPU to `to` and blocks until `from` is scheduled again.
    pub fn switch(&self, from: u64, to: u64) -> Result<(), Halted> {
        if from == to {
            return if self.is_halted() { Err(Halted) } else { Ok(()) };
        }
        self.handoff(to);
        self.wait_turn(from)
    }

    /// Gives the CPU to `to` without waiting to get it back.
    pub fn handoff(&self, to: u64) {
        let mut baton = self.baton();
        baton.running = Some(to);
        drop(baton);
        self.cond.notify_all();
    }

    /// Id of the context holding the CPU.
    pub fn running(&self) -> Option<u64> {
        self.baton().running
    }

    /// Stops the CPU. Every parked context wakes up with [`Halted`].
    pub fn halt(&self) {
        let mut baton = self.baton();
        baton.halted = true;
        baton.running = None;
        drop(baton);
        self.cond.notify_all();
    }

    pub fn is_halted(&self) -> bool {
        self.baton().halted
    }

    /// Blocks the calling host thread until the CPU halts.
    pub fn wait_halt(&self) {
        let mut baton = self.baton();
        while !baton.halted {
            baton = self.cond.wait(baton).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Joins every host thread created by [`spawn`](Self::spawn).
    pub fn join_all(&self) {
        loop {
            let next = self
                .threads
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop();
            match next {
                Some(handle) => {
                    let _ = handle.join();
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn baton_serializes_contexts() {
        let cpu = Arc::new(Cpu::new());
        let trace = Arc::new(Mutex::new(Vec::new()));
        let step = Arc::new(AtomicUsize::new(0));
        for id in [1u64, 2] {
            let (cpu2, trace, step) = (cpu.clone(), trace.clone(), step.clone());
            cpu.spawn(id, "ctx", move || {
                for _ in 0..3 {
                    trace.lock().unwrap().push((id, step.fetch_add(1, Ordering::SeqCst)));
                    let other = 3 - id;
                    if cpu2.switch(id, other).is_err() {
                        return;
                    }
                }
                cpu2.halt();
            })
            .unwrap();
        }
        cpu.start(1);
        cpu.wait_halt();
        cpu.join_all();
        let trace = trace.lock().unwrap();
        let ids: Vec<u64> = trace.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 1, 2, 1, 2]);
    }

    #[test]
    fn halted_context_never_runs() {
        let cpu = Arc::new(Cpu::new());
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        cpu.spawn(7, "late", move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        cpu.halt();
        cpu.join_all();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
