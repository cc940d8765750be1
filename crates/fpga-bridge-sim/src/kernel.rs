//! Kernel glue for running the bridge tasks as host threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fpga_bridge_hal::{IrqLine, ResetControl};

/// IRQ line fed by [`SimFpga`](crate::fpga::SimFpga) through a channel.
///
/// Notifications queued before a wake-up are merged into it: the pending
/// mask fetched afterwards covers all of them.
pub struct ChannelIrq {
    rx: Receiver<()>,
    enables: Arc<AtomicUsize>,
}

impl ChannelIrq {
    pub fn new(rx: Receiver<()>) -> Self {
        Self {
            rx,
            enables: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of `enable` calls, readable from other threads.
    pub fn enables(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.enables)
    }

    fn drain(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

impl IrqLine for ChannelIrq {
    fn wait(&mut self, timeout_ms: Option<u32>) -> bool {
        let fired = match timeout_ms {
            None => match self.rx.recv() {
                Ok(()) => true,
                Err(_) => {
                    // Far side gone; behave like a line that never fires.
                    thread::sleep(Duration::from_millis(100));
                    false
                }
            },
            Some(ms) => match self.rx.recv_timeout(Duration::from_millis(u64::from(ms))) {
                Ok(()) => true,
                Err(RecvTimeoutError::Timeout) => false,
                Err(RecvTimeoutError::Disconnected) => {
                    thread::sleep(Duration::from_millis(u64::from(ms)));
                    false
                }
            },
        };
        if fired {
            self.drain();
        }
        fired
    }

    fn enable(&mut self) {
        self.enables.fetch_add(1, Ordering::Relaxed);
    }
}

/// Reset control that records requests instead of rebooting.
#[derive(Debug, Clone, Default)]
pub struct SimReset {
    resets: Arc<AtomicUsize>,
}

impl SimReset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }
}

impl ResetControl for SimReset {
    fn force_reset(&mut self) {
        log::warn!("MCU reset requested");
        self.resets.fetch_add(1, Ordering::Relaxed);
    }
}
