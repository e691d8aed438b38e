//! Serial console of the simulated machine.
//!
//! Input is a queue that the host fills ahead of time; output is collected so
//! the host can inspect what the machine printed. Nothing ever blocks.
use crate::spinlock::SpinLock;
use std::collections::VecDeque;

/// The console device.
#[derive(Default)]
pub struct Console {
    input: SpinLock<VecDeque<u8>>,
    output: SpinLock<Vec<u8>>,
    echo: bool,
}

impl Console {
    /// Creates a console. With `echo`, output is mirrored to the host's
    /// standard output.
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            ..Default::default()
        }
    }

    /// Takes the next input byte, if one is available.
    pub fn read_byte(&self) -> Option<u8> {
        let mut input = self.input.lock();
        let b = input.pop_front();
        input.unlock();
        b
    }

    /// Emits one byte.
    pub fn write_byte(&self, b: u8) {
        let mut output = self.output.lock();
        output.push(b);
        output.unlock();
        if self.echo {
            use std::io::Write;
            let _ = std::io::stdout().write_all(&[b]);
        }
    }

    /// Queues bytes for the machine to read.
    pub fn push_input(&self, bytes: &[u8]) {
        let mut input = self.input.lock();
        input.extend(bytes);
        input.unlock();
    }

    /// A copy of everything written so far.
    pub fn output(&self) -> Vec<u8> {
        let output = self.output.lock();
        let v = output.clone();
        output.unlock();
        v
    }

    /// Drains everything written so far.
    pub fn take_output(&self) -> Vec<u8> {
        let mut output = self.output.lock();
        let v = core::mem::take(&mut *output);
        output.unlock();
        v
    }
}
