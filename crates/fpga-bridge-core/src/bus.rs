//! Exclusive transactions on the shared SPI bus.
//!
//! All targets share one physical bus. A transaction holds the bus lock and
//! chip select from [`Bus::begin`] until [`Transaction::end`] (or drop), so
//! transactions from different tasks never interleave at the byte level.

use fpga_bridge_hal::{RawLock, SpiPort};

use crate::protocol::{Command, Target};
use crate::sync::{Lock, LockGuard};

/// The SPI bus shared by all targets.
pub struct Bus<R: RawLock, P: SpiPort> {
    port: Lock<R, P>,
}

impl<R: RawLock, P: SpiPort> Bus<R, P> {
    pub fn new(lock: R, port: P) -> Self {
        Self {
            port: Lock::new(lock, port),
        }
    }

    /// Take the bus, assert chip select and send the target byte.
    ///
    /// Blocks until any other transaction has ended.
    pub fn begin(&self, target: Target) -> Result<Transaction<'_, R, P>, P::Error> {
        let mut port = self.port.lock();
        port.select()?;
        let mut txn = Transaction {
            port,
            selected: true,
        };
        txn.send_recv(target as u8)?;
        Ok(txn)
    }

    /// Run one command as a single transaction.
    ///
    /// The frame is sent, then `response.len()` bytes are clocked in by
    /// sending zeros. `response` should be `cmd.response_len()` long.
    pub fn request<C: Command>(&self, cmd: &C, response: &mut [u8]) -> Result<(), P::Error> {
        debug_assert_eq!(response.len(), cmd.response_len());
        let mut txn = self.begin(cmd.target())?;
        txn.send(&cmd.encode())?;
        txn.recv(response)?;
        txn.end()
    }

    /// Run a command that returns nothing.
    pub fn send<C: Command>(&self, cmd: &C) -> Result<(), P::Error> {
        self.request(cmd, &mut [])
    }

    /// Direct access to the port, for setup before any task runs.
    pub fn port_mut(&mut self) -> &mut P {
        self.port.get_mut()
    }

    pub fn into_port(self) -> P {
        self.port.into_inner()
    }
}

/// An open transaction. Chip select is released when it ends or is dropped.
pub struct Transaction<'a, R: RawLock, P: SpiPort> {
    port: LockGuard<'a, R, P>,
    selected: bool,
}

impl<R: RawLock, P: SpiPort> Transaction<'_, R, P> {
    /// Exchange one byte.
    pub fn send_recv(&mut self, byte: u8) -> Result<u8, P::Error> {
        self.port.exchange(byte)
    }

    /// Send bytes, discarding what comes back.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), P::Error> {
        for &b in bytes {
            self.port.exchange(b)?;
        }
        Ok(())
    }

    /// Fill `buf` by clocking out zeros.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<(), P::Error> {
        for b in buf.iter_mut() {
            *b = self.port.exchange(0x00)?;
        }
        Ok(())
    }

    /// Deassert chip select and release the bus.
    pub fn end(mut self) -> Result<(), P::Error> {
        self.selected = false;
        self.port.deselect()
    }
}

impl<R: RawLock, P: SpiPort> Drop for Transaction<'_, R, P> {
    fn drop(&mut self) {
        if self.selected {
            // Error path: the caller already has an error to report.
            let _ = self.port.deselect();
        }
    }
}
