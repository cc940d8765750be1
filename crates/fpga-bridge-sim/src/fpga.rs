//! Model of the FPGA side of the SPI bus.
//!
//! Answers the bridge the way a core would: status registers, the pending
//! interrupt mask, SD requests and MCU sector reads from the card image.
//! Everything the bridge sends is kept for inspection.

use std::collections::VecDeque;
use std::fs::File;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use fpga_bridge_core::config::MAX_DRIVES;
use fpga_bridge_core::irq::{IRQ_HID, IRQ_SDC, IRQ_SYS};
use fpga_bridge_core::protocol::{
    HidCommand, OsdCommand, SdcCommand, SdcStatus, SysCommand, Target, CORE_MAGIC, HID_GET_DB9,
    SDC_MCU_READ, SDC_STATUS, SECTOR_SIZE, SYS_BUTTONS, SYS_IRQ_CTRL, SYS_STATUS,
};
use fpga_bridge_hal::SpiPort;

use crate::error::{Result, SimError};
use crate::fat::read_card_sector;

/// SD controller status: card present and initialised.
const CARD_READY: u8 = 0x01;

/// Ready polls answered busy before an MCU read delivers data.
const MCU_READ_BUSY_POLLS: u32 = 2;

/// Transaction header bytes of an MCU read: target, opcode, sector.
const MCU_READ_HEADER: usize = 6;

struct McuRead {
    data: Box<[u8; SECTOR_SIZE]>,
    busy: u32,
    pos: Option<usize>,
}

#[derive(Default)]
struct FpgaState {
    core_id: u8,
    coldboot: u8,
    buttons: u8,
    db9: u8,
    pending: u8,
    /// Pending mask latched by the current IRQ_CTRL transaction.
    irq_snapshot: u8,
    sd_request: u8,
    sd_sector: u32,
    txn: Option<Vec<u8>>,
    read: Option<McuRead>,
    transactions: Vec<Vec<u8>>,
    drive_sizes: [Option<u32>; MAX_DRIVES],
    answers: VecDeque<u32>,
    hid: Vec<HidCommand>,
    leds: u8,
    rgb: u32,
    osd_visible: bool,
    card: Option<File>,
    irq: Option<Sender<()>>,
}

impl FpgaState {
    fn raise(&mut self, source: u8) {
        self.pending |= source;
        if let Some(irq) = &self.irq {
            if irq.send(()).is_err() {
                log::trace!("IRQ line has no listener");
            }
        }
    }

    fn clock(&mut self, mosi: u8) -> Result<u8> {
        let txn = self
            .txn
            .as_mut()
            .ok_or(SimError::Bus("clock without chip select"))?;
        let index = txn.len();
        txn.push(mosi);
        if index < 2 {
            return Ok(0);
        }
        let mut head = [0u8; MCU_READ_HEADER];
        let n = txn.len().min(MCU_READ_HEADER);
        head[..n].copy_from_slice(&txn[..n]);

        let miso = match (Target::from_byte(head[0]), head[1]) {
            (Some(Target::Sys), SYS_STATUS) => {
                let status = [CORE_MAGIC[0], CORE_MAGIC[1], self.core_id, self.coldboot];
                index.checked_sub(3).and_then(|i| status.get(i).copied()).unwrap_or(0)
            }
            (Some(Target::Sys), SYS_IRQ_CTRL) => match index {
                2 => {
                    self.irq_snapshot = self.pending;
                    self.pending &= !mosi;
                    0
                }
                3 => self.irq_snapshot,
                _ => 0,
            },
            (Some(Target::Sys), SYS_BUTTONS) if index == 3 => self.buttons,
            (Some(Target::Hid), HID_GET_DB9) if index == 3 => self.db9,
            (Some(Target::Sdc), SDC_STATUS) => {
                let status = SdcStatus {
                    card: CARD_READY,
                    request: self.sd_request,
                    sector: self.sd_sector,
                };
                status.to_bytes().get(index - 2).copied().unwrap_or(0)
            }
            (Some(Target::Sdc), SDC_MCU_READ) => self.mcu_read(index, &head)?,
            _ => 0,
        };
        Ok(miso)
    }

    fn mcu_read(&mut self, index: usize, head: &[u8; MCU_READ_HEADER]) -> Result<u8> {
        if index + 1 == MCU_READ_HEADER {
            let sector = u32::from_be_bytes([head[2], head[3], head[4], head[5]]);
            let mut data = Box::new([0u8; SECTOR_SIZE]);
            match self.card.as_mut() {
                Some(card) => read_card_sector(card, u64::from(sector), &mut data)?,
                None => log::warn!("MCU read of sector {} without a card", sector),
            }
            self.read = Some(McuRead {
                data,
                busy: MCU_READ_BUSY_POLLS,
                pos: None,
            });
            return Ok(0);
        }
        let Some(read) = self.read.as_mut() else {
            return Ok(0);
        };
        if read.busy > 0 {
            read.busy -= 1;
            return Ok(0xFF);
        }
        Ok(match read.pos {
            None => {
                read.pos = Some(0);
                0x00
            }
            Some(pos) => {
                read.pos = Some(pos + 1);
                read.data.get(pos).copied().unwrap_or(0)
            }
        })
    }

    /// Apply the effect of a finished transaction.
    fn complete(&mut self, txn: &[u8]) {
        let (Some(&target), Some(&opcode)) = (txn.first(), txn.get(1)) else {
            return;
        };
        let payload = &txn[2..];
        match Target::from_byte(target) {
            Some(Target::Sdc) => match SdcCommand::decode(opcode, payload) {
                Some(SdcCommand::CoreRw(sector)) => {
                    log::debug!("far side: core transfers SD sector {}", sector);
                    // The lowest requesting drive is the one being served.
                    self.sd_request &= self.sd_request.wrapping_sub(1);
                    self.answers.push_back(sector);
                }
                Some(SdcCommand::Inserted { drive, size }) => {
                    log::debug!("far side: drive {} size {}", drive, size);
                    if let Some(slot) = self.drive_sizes.get_mut(usize::from(drive)) {
                        *slot = (size != 0).then_some(size);
                    }
                }
                Some(SdcCommand::McuRead(_)) => self.read = None,
                _ => {}
            },
            Some(Target::Sys) => match SysCommand::decode(opcode, payload) {
                Some(SysCommand::Leds(mask)) => self.leds = mask,
                Some(SysCommand::Rgb(rgb)) => self.rgb = rgb,
                Some(SysCommand::SetVal { id, value }) => {
                    log::debug!("far side: value '{}' = {}", char::from(id), value)
                }
                _ => {}
            },
            Some(Target::Hid) => match HidCommand::decode(opcode, payload) {
                Some(
                    cmd @ (HidCommand::Keyboard(_)
                    | HidCommand::Mouse { .. }
                    | HidCommand::Joystick { .. }),
                ) => self.hid.push(cmd),
                _ => {}
            },
            Some(Target::Osd) => {
                if let Some(OsdCommand::Enable(on)) = OsdCommand::decode(opcode, payload) {
                    self.osd_visible = on;
                }
            }
            None => log::warn!("far side: unknown target {:02x}", target),
        }
    }
}

struct Shared {
    state: Mutex<FpgaState>,
    answered: Condvar,
}

/// The simulated FPGA. Clones share the same device, so one handle can be
/// given to the bridge as its SPI port while another drives events.
#[derive(Clone)]
pub struct SimFpga {
    shared: Arc<Shared>,
}

impl SimFpga {
    pub fn new(core_id: u8) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(FpgaState {
                    core_id,
                    coldboot: core_id.wrapping_add(1),
                    ..FpgaState::default()
                }),
                answered: Condvar::new(),
            }),
        }
    }

    /// Serve MCU reads from this card image.
    pub fn with_card(self, card: File) -> Self {
        self.state().card = Some(card);
        self
    }

    /// Signal interrupts on this channel.
    pub fn with_irq(self, irq: Sender<()>) -> Self {
        self.state().irq = Some(irq);
        self
    }

    fn state(&self) -> MutexGuard<'_, FpgaState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The core asks for `sector` of the image on `drive`.
    pub fn request_sector(&self, drive: usize, sector: u32) {
        let mut state = self.state();
        state.sd_request |= 1u8 << (drive % MAX_DRIVES);
        state.sd_sector = sector;
        state.raise(IRQ_SDC);
    }

    /// Load a different core behind the MCU's back.
    pub fn reconfigure(&self, core_id: u8) {
        let mut state = self.state();
        state.core_id = core_id;
        state.coldboot = core_id.wrapping_add(1);
        state.raise(IRQ_SYS);
    }

    pub fn set_db9(&self, db9: u8) {
        let mut state = self.state();
        state.db9 = db9;
        state.raise(IRQ_HID);
    }

    pub fn set_buttons(&self, buttons: u8) {
        self.state().buttons = buttons;
    }

    /// Wait for the next sector answer, in order of arrival.
    pub fn wait_answer(&self, timeout: Duration) -> Option<u32> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        loop {
            if let Some(sector) = state.answers.pop_front() {
                return Some(sector);
            }
            let left = deadline.checked_duration_since(Instant::now())?;
            state = self
                .shared
                .answered
                .wait_timeout(state, left)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Image size the core was told for `drive`, `None` when empty.
    pub fn drive_size(&self, drive: usize) -> Option<u32> {
        self.state().drive_sizes.get(drive).copied().flatten()
    }

    pub fn hid_commands(&self) -> Vec<HidCommand> {
        self.state().hid.clone()
    }

    pub fn transactions(&self) -> Vec<Vec<u8>> {
        self.state().transactions.clone()
    }

    pub fn pending(&self) -> u8 {
        self.state().pending
    }

    pub fn sd_request(&self) -> u8 {
        self.state().sd_request
    }

    pub fn osd_visible(&self) -> bool {
        self.state().osd_visible
    }

    pub fn leds(&self) -> u8 {
        self.state().leds
    }

    pub fn rgb(&self) -> u32 {
        self.state().rgb
    }
}

impl SpiPort for SimFpga {
    type Error = SimError;

    fn select(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.txn.is_some() {
            return Err(SimError::Bus("chip select asserted twice"));
        }
        state.txn = Some(Vec::new());
        Ok(())
    }

    fn deselect(&mut self) -> Result<()> {
        let mut state = self.state();
        let txn = state
            .txn
            .take()
            .ok_or(SimError::Bus("deselect without select"))?;
        state.complete(&txn);
        state.transactions.push(txn);
        drop(state);
        self.shared.answered.notify_all();
        Ok(())
    }

    fn exchange(&mut self, byte: u8) -> Result<u8> {
        self.state().clock(byte)
    }
}
