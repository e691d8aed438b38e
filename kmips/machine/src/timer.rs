//! Periodic hardware timer.
//!
//! The timer raises an interrupt every `period` ticks, starting at tick
//! `period`. Firings stay on the multiples of the period even when the clock
//! overshoots a due time.
use crate::{
    interrupt::{Interrupt, InterruptHandler},
    spinlock::SpinLock,
};
use std::sync::{Arc, Weak};

/// The periodic timer device.
pub struct Timer {
    interrupt: Arc<Interrupt>,
    period: u64,
    handler: SpinLock<Option<InterruptHandler>>,
}

impl Timer {
    /// Creates a timer that is not armed yet.
    pub fn new(interrupt: &Arc<Interrupt>, period: u64) -> Arc<Self> {
        Arc::new(Self {
            interrupt: interrupt.clone(),
            period: period.max(1),
            handler: SpinLock::new(None),
        })
    }

    /// Timer period in ticks.
    pub fn period(&self) -> u64 {
        self.period
    }

    /// Installs the routine the kernel wants to run on every timer interrupt.
    pub fn set_handler(&self, handler: InterruptHandler) {
        let mut slot = self.handler.lock();
        *slot = Some(handler);
        slot.unlock();
    }

    /// Arms the timer. The first interrupt arrives at tick `period`.
    pub fn start(self: &Arc<Self>) {
        self.arm(self.period);
    }

    fn arm(self: &Arc<Self>, due: u64) {
        let me: Weak<Timer> = Arc::downgrade(self);
        self.interrupt.schedule_at(
            due,
            "timer",
            Arc::new(move || {
                if let Some(timer) = me.upgrade() {
                    timer.fire(due);
                }
            }),
        );
    }

    fn fire(self: &Arc<Self>, due: u64) {
        let now = self.interrupt.time();
        let mut next = due + self.period;
        while next <= now {
            next += self.period;
        }
        self.arm(next);

        let slot = self.handler.lock();
        let handler = slot.clone();
        slot.unlock();
        if let Some(handler) = handler {
            handler();
        }
    }
}
