//! System control target: core detection, LEDs, buttons and interrupts.

use fpga_bridge_hal::{RawLock, SpiPort};

use crate::bus::Bus;
use crate::protocol::{SysCommand, CORE_MAGIC};

/// Response to `SYS STATUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CoreStatus {
    pub magic: [u8; 2],
    /// Identifies the machine the FPGA is running (Atari ST, C64, ...).
    pub core_id: u8,
    /// Equals `core_id` once the MCU has acknowledged the running core.
    pub coldboot: u8,
}

impl CoreStatus {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            magic: [bytes[0], bytes[1]],
            core_id: bytes[2],
            coldboot: bytes[3],
        }
    }

    /// The far side speaks this protocol.
    pub fn is_valid(&self) -> bool {
        self.magic == CORE_MAGIC
    }

    /// The core was loaded since the MCU last looked.
    pub fn cold_boot(&self) -> bool {
        self.coldboot != self.core_id
    }
}

/// Probe the core.
pub fn core_status<R: RawLock, P: SpiPort>(bus: &Bus<R, P>) -> Result<CoreStatus, P::Error> {
    let mut reply = [0u8; 4];
    bus.request(&SysCommand::Status, &mut reply)?;
    let status = CoreStatus::from_bytes(reply);
    if status.is_valid() {
        log::info!(
            "core {} detected{}",
            status.core_id,
            if status.cold_boot() { ", cold boot" } else { "" }
        );
    } else {
        log::warn!("no compatible core, status {:02x?}", reply);
    }
    Ok(status)
}

/// Acknowledge the sources in `ack` and return the pending mask read in the
/// same transaction.
pub fn irq_ctrl<R: RawLock, P: SpiPort>(bus: &Bus<R, P>, ack: u8) -> Result<u8, P::Error> {
    let mut pending = [0u8; 1];
    bus.request(&SysCommand::IrqCtrl(ack), &mut pending)?;
    Ok(pending[0])
}

pub fn set_leds<R: RawLock, P: SpiPort>(bus: &Bus<R, P>, mask: u8) -> Result<(), P::Error> {
    bus.send(&SysCommand::Leds(mask))
}

/// Set the RGB LED from a `0xRRGGBB` value.
pub fn set_rgb<R: RawLock, P: SpiPort>(bus: &Bus<R, P>, rgb: u32) -> Result<(), P::Error> {
    bus.send(&SysCommand::Rgb(rgb))
}

/// Board button state, one bit per button.
pub fn buttons<R: RawLock, P: SpiPort>(bus: &Bus<R, P>) -> Result<u8, P::Error> {
    let mut state = [0u8; 1];
    bus.request(&SysCommand::Buttons, &mut state)?;
    Ok(state[0])
}

/// Pass a named menu setting to the core.
pub fn set_val<R: RawLock, P: SpiPort>(bus: &Bus<R, P>, id: u8, value: u8) -> Result<(), P::Error> {
    log::debug!("set value '{}' = {}", char::from(id), value);
    bus.send(&SysCommand::SetVal { id, value })
}
