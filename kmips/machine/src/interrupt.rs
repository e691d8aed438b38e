//! Interrupt controller and simulated time.
//!
//! Time only moves when the simulation says so: re-enabling interrupts costs
//! [`KERNEL_TICK`], every user instruction costs [`USER_TICK`], and an idle
//! CPU jumps straight to the next pending interrupt. Whenever the clock
//! moves, interrupts that became due are delivered with interrupts disabled.
use crate::spinlock::SpinLock;
use queue::PendingInterrupt;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::{collections::BinaryHeap, marker::PhantomData, sync::Arc};

/// Ticks charged each time the kernel re-enables interrupts.
pub const KERNEL_TICK: u64 = 10;
/// Ticks charged for each user instruction.
pub const USER_TICK: u64 = 1;

/// Enumeration representing the interrupt state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InterruptState {
    /// Interrupts are enabled.
    On,
    /// Interrupts are disabled.
    Off,
}

/// A routine invoked when a scheduled interrupt becomes due.
pub type InterruptHandler = Arc<dyn Fn() + Send + Sync>;

mod queue {
    use super::InterruptHandler;
    use core::cmp::Ordering;

    pub struct PendingInterrupt {
        pub time: u64,
        pub seq: u64,
        pub kind: &'static str,
        pub handler: InterruptHandler,
    }

    impl PartialEq for PendingInterrupt {
        fn eq(&self, other: &Self) -> bool {
            (self.time, self.seq) == (other.time, other.seq)
        }
    }

    impl Eq for PendingInterrupt {}

    impl PartialOrd for PendingInterrupt {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }

    // Reversed so that `BinaryHeap` pops the earliest interrupt first.
    impl Ord for PendingInterrupt {
        fn cmp(&self, other: &Self) -> Ordering {
            (other.time, other.seq).cmp(&(self.time, self.seq))
        }
    }
}

/// Tick accounting of the machine.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Stats {
    /// Ticks since the machine was powered on.
    pub total_ticks: u64,
    /// Ticks spent in the kernel.
    pub kernel_ticks: u64,
    /// Ticks spent executing user instructions.
    pub user_ticks: u64,
    /// Ticks skipped while nothing was runnable.
    pub idle_ticks: u64,
}

/// The interrupt controller of the simulated machine.
pub struct Interrupt {
    enabled: AtomicBool,
    halted: AtomicBool,
    seq: AtomicU64,
    pending: SpinLock<BinaryHeap<PendingInterrupt>>,
    stats: SpinLock<Stats>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    /// Creates a controller with interrupts disabled and the clock at zero.
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            pending: SpinLock::new(BinaryHeap::new()),
            stats: SpinLock::new(Stats::default()),
        }
    }

    /// Reads the current interrupt state.
    pub fn state(&self) -> InterruptState {
        if self.enabled.load(Ordering::SeqCst) {
            InterruptState::On
        } else {
            InterruptState::Off
        }
    }

    /// Disables interrupts and returns the previous state.
    ///
    /// Disabling is idempotent: pass the returned state to [`restore`] to
    /// undo exactly this call.
    ///
    /// [`restore`]: Self::restore
    pub fn disable(&self) -> InterruptState {
        self.set_state(InterruptState::Off)
    }

    /// Enables interrupts.
    pub fn enable(&self) {
        self.set_state(InterruptState::On);
    }

    /// Restores the state returned by an earlier [`disable`](Self::disable).
    pub fn restore(&self, prev: InterruptState) {
        self.set_state(prev);
    }

    /// Sets the interrupt state and returns the old one.
    ///
    /// Turning interrupts back on advances the clock by [`KERNEL_TICK`] and
    /// delivers any interrupt that became due.
    pub fn set_state(&self, state: InterruptState) -> InterruptState {
        let old = self.enabled.swap(state == InterruptState::On, Ordering::SeqCst);
        if !old && state == InterruptState::On {
            self.tick(false);
        }
        if old {
            InterruptState::On
        } else {
            InterruptState::Off
        }
    }

    /// Schedules `handler` to run `delay` ticks from now.
    pub fn schedule(&self, delay: u64, kind: &'static str, handler: InterruptHandler) {
        self.schedule_at(self.time() + delay, kind, handler);
    }

    /// Schedules `handler` to run at tick `time`.
    pub fn schedule_at(&self, time: u64, kind: &'static str, handler: InterruptHandler) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.pending.lock();
        pending.push(PendingInterrupt {
            time,
            seq,
            kind,
            handler,
        });
        pending.unlock();
    }

    /// Advances the clock by one kernel or user step and delivers what is due.
    pub fn tick(&self, user_mode: bool) {
        if self.is_halted() {
            return;
        }
        let mut stats = self.stats.lock();
        if user_mode {
            stats.user_ticks += USER_TICK;
            stats.total_ticks += USER_TICK;
        } else {
            stats.kernel_ticks += KERNEL_TICK;
            stats.total_ticks += KERNEL_TICK;
        }
        stats.unlock();
        self.check_if_due();
    }

    /// Lets the clock jump to the next pending interrupt and deliver it.
    ///
    /// Called when no thread is ready to run. Returns `false` if nothing is
    /// pending, in which case nothing will ever happen again.
    pub fn idle(&self) -> bool {
        if self.is_halted() {
            return false;
        }
        let pending = self.pending.lock();
        let next = pending.peek().map(|p| p.time);
        pending.unlock();

        let Some(next) = next else {
            return false;
        };
        let mut stats = self.stats.lock();
        if next > stats.total_ticks {
            stats.idle_ticks += next - stats.total_ticks;
            stats.total_ticks = next;
        }
        stats.unlock();
        self.check_if_due();
        true
    }

    fn check_if_due(&self) -> bool {
        let now = self.time();
        let mut due = Vec::new();
        let mut pending = self.pending.lock();
        while pending.peek().is_some_and(|p| p.time <= now) {
            if let Some(p) = pending.pop() {
                due.push(p);
            }
        }
        pending.unlock();
        if due.is_empty() {
            return false;
        }

        let prev = self.enabled.swap(false, Ordering::SeqCst);
        for interrupt in due {
            crate::debug!('i', "invoking {} interrupt at {}", interrupt.kind, now);
            (interrupt.handler)();
        }
        self.enabled.store(prev, Ordering::SeqCst);
        true
    }

    /// Current simulated time in ticks.
    pub fn time(&self) -> u64 {
        let stats = self.stats.lock();
        let t = stats.total_ticks;
        stats.unlock();
        t
    }

    /// A snapshot of the tick counters.
    pub fn stats(&self) -> Stats {
        let stats = self.stats.lock();
        let s = *stats;
        stats.unlock();
        s
    }

    /// Stops the clock for good.
    pub(crate) fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    /// Returns true once the machine was halted.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

/// An RAII-based guard for managing interrupt disabling.
///
/// When an `InterruptGuard` is created, interrupts are disabled. When it is
/// dropped, the interrupt state is restored to what it was before the guard
/// was created. Guards must be dropped in reverse order of their creation.
pub struct InterruptGuard {
    interrupt: Arc<Interrupt>,
    prev: InterruptState,
    _not_send: PhantomData<*const ()>,
}

impl InterruptGuard {
    /// Creates a new `InterruptGuard`, disabling interrupts of `interrupt`.
    pub fn new(interrupt: &Arc<Interrupt>) -> Self {
        let prev = interrupt.disable();
        Self {
            interrupt: interrupt.clone(),
            prev,
            _not_send: PhantomData,
        }
    }

    /// The state that will be restored on drop.
    pub fn previous(&self) -> InterruptState {
        self.prev
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.interrupt.restore(self.prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn enabling_advances_kernel_time() {
        let intr = Interrupt::new();
        assert_eq!(intr.state(), InterruptState::Off);
        intr.enable();
        assert_eq!(intr.time(), KERNEL_TICK);
        let prev = intr.disable();
        assert_eq!(prev, InterruptState::On);
        assert_eq!(intr.disable(), InterruptState::Off);
        intr.restore(InterruptState::Off);
        assert_eq!(intr.time(), KERNEL_TICK);
        intr.restore(prev);
        assert_eq!(intr.time(), 2 * KERNEL_TICK);
    }

    #[test]
    fn idle_jumps_to_due_interrupts_in_order() {
        let intr = Arc::new(Interrupt::new());
        let fired = Arc::new(SpinLock::new(Vec::new()));
        for (delay, tag) in [(300, "b"), (100, "a"), (300, "c")] {
            let fired = fired.clone();
            let probe = Arc::downgrade(&intr);
            intr.schedule(
                delay,
                tag,
                Arc::new(move || {
                    let now = probe.upgrade().map(|i| i.time()).unwrap_or(0);
                    let mut f = fired.lock();
                    f.push((tag, now));
                    f.unlock();
                }),
            );
        }
        assert!(intr.idle());
        assert!(intr.idle());
        assert!(!intr.idle());
        let f = fired.lock();
        assert_eq!(*f, vec![("a", 100), ("b", 300), ("c", 300)]);
        f.unlock();
        assert_eq!(intr.stats().idle_ticks, 300);
    }

    #[test]
    fn handlers_run_with_interrupts_disabled() {
        let intr = Arc::new(Interrupt::new());
        let observed = Arc::new(AtomicUsize::new(0));
        let (o, probe) = (observed.clone(), Arc::downgrade(&intr));
        intr.schedule(
            5,
            "probe",
            Arc::new(move || {
                if probe.upgrade().map(|i| i.state()) == Some(InterruptState::Off) {
                    o.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        intr.enable();
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert_eq!(intr.state(), InterruptState::On);
    }
}
