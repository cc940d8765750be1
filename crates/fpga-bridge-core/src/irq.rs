//! FPGA interrupt sources and the task that services them.

use fpga_bridge_hal::{ImageFs, IrqLine, RawLock, ResetControl, SpiPort};

use crate::bridge::{Bridge, Error};

/// The core was reconfigured behind the MCU's back.
pub const IRQ_SYS: u8 = 1 << 0;
/// Auxiliary HID input (DB9 port) changed.
pub const IRQ_HID: u8 = 1 << 1;
/// A drive requests a sector.
pub const IRQ_SDC: u8 = 1 << 3;

const IRQ_KNOWN: u8 = IRQ_SYS | IRQ_HID | IRQ_SDC;

/// Pending mask as returned by `SYS IRQ_CTRL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pending(pub u8);

impl Pending {
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn sys(self) -> bool {
        self.0 & IRQ_SYS != 0
    }

    pub fn hid(self) -> bool {
        self.0 & IRQ_HID != 0
    }

    pub fn sdc(self) -> bool {
        self.0 & IRQ_SDC != 0
    }

    /// Bits without a handler on this side.
    pub fn unknown(self) -> u8 {
        self.0 & !IRQ_KNOWN
    }
}

/// The IRQ task: waits on the line, then fetches, acknowledges and
/// dispatches the pending sources.
pub struct IrqTask<'a, R, P, F, L, Z>
where
    R: RawLock,
    P: SpiPort,
    F: ImageFs,
{
    bridge: &'a Bridge<R, P, F>,
    line: L,
    reset: Z,
}

impl<'a, R, P, F, L, Z> IrqTask<'a, R, P, F, L, Z>
where
    R: RawLock,
    P: SpiPort,
    F: ImageFs,
    L: IrqLine,
    Z: ResetControl,
{
    pub fn new(bridge: &'a Bridge<R, P, F>, line: L, reset: Z) -> Self {
        Self {
            bridge,
            line,
            reset,
        }
    }

    /// One iteration: wait, fetch and acknowledge, unmask the line, dispatch.
    ///
    /// In polling mode the pending mask is fetched whether or not the line
    /// fired.
    pub fn step(&mut self) -> Result<Pending, Error<P, F>> {
        let timeout = self.bridge.config().irq_mode.wait_timeout();
        let fired = self.line.wait(timeout);
        if !fired && timeout.is_none() {
            return Ok(Pending::default());
        }

        let pending = self.bridge.fetch_pending();
        self.line.enable();
        let pending = pending?;
        self.bridge.dispatch(pending, &mut self.reset)?;
        Ok(pending)
    }

    /// Service interrupts forever.
    pub fn run(mut self) -> ! {
        loop {
            if let Err(e) = self.step() {
                log::error!("IRQ service failed: {}", e);
            }
        }
    }

    pub fn into_parts(self) -> (L, Z) {
        (self.line, self.reset)
    }
}
