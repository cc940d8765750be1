//! Wire commands for each SPI target.
//!
//! Every transaction starts with the target byte, then the opcode and a
//! command specific payload. Multi-byte integers are big-endian. Commands that
//! return data clock in `response_len()` further bytes after the payload.

use heapless::Vec;

/// Sector size of the SD card and of disk images.
pub const SECTOR_SIZE: usize = 512;

/// Bytes in one OSD line upload.
pub const OSD_LINE_BYTES: usize = 128;

/// Opcode plus the largest payload (an OSD line write).
pub const FRAME_CAPACITY: usize = 2 + OSD_LINE_BYTES;

/// Encoded opcode and payload of one command, without the target byte.
pub type Frame = Vec<u8, FRAME_CAPACITY>;

/// Magic returned by `SYS STATUS` from a compatible core.
pub const CORE_MAGIC: [u8; 2] = [0x5C, 0x42];

/// Break (key released) flag on `HID KEYBOARD` codes.
pub const KEY_BREAK: u8 = 0x80;

/// Logical peripheral on the far side of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Target {
    Hid = 1,
    Osd = 2,
    Sdc = 3,
    Sys = 4,
}

impl Target {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Target::Hid),
            2 => Some(Target::Osd),
            3 => Some(Target::Sdc),
            4 => Some(Target::Sys),
            _ => None,
        }
    }
}

/// A command that can be framed for one target.
pub trait Command {
    fn target(&self) -> Target;

    fn opcode(&self) -> u8;

    /// Append the payload that follows the opcode.
    fn write_payload(&self, frame: &mut Frame);

    /// Bytes clocked in after the payload.
    fn response_len(&self) -> usize {
        0
    }

    /// Opcode followed by payload.
    fn encode(&self) -> Frame {
        let mut frame = Frame::new();
        put(&mut frame, &[self.opcode()]);
        self.write_payload(&mut frame);
        frame
    }
}

// Frame capacity covers the largest command, so this cannot overflow for any
// command defined here.
fn put(frame: &mut Frame, bytes: &[u8]) {
    let fits = frame.extend_from_slice(bytes).is_ok();
    debug_assert!(fits, "frame overflow");
}

fn be32(bytes: &[u8]) -> Option<u32> {
    let b: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(b))
}

// ---------------------------------------------------------------------------
// HID
// ---------------------------------------------------------------------------

pub const HID_STATUS: u8 = 0;
pub const HID_KEYBOARD: u8 = 1;
pub const HID_MOUSE: u8 = 2;
pub const HID_JOYSTICK: u8 = 3;
pub const HID_GET_DB9: u8 = 4;

/// Commands for the HID target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidCommand {
    /// Two status bytes describing the core's input demands.
    Status,
    /// Translated key code, `KEY_BREAK` set on release.
    Keyboard(u8),
    Mouse { buttons: u8, dx: u8, dy: u8 },
    /// Digital state, optionally followed by two axis bytes and extra buttons.
    Joystick {
        index: u8,
        state: u8,
        analog: Option<[u8; 3]>,
    },
    /// Read the DB9 joystick port state.
    GetDb9,
}

impl Command for HidCommand {
    fn target(&self) -> Target {
        Target::Hid
    }

    fn opcode(&self) -> u8 {
        match self {
            HidCommand::Status => HID_STATUS,
            HidCommand::Keyboard(_) => HID_KEYBOARD,
            HidCommand::Mouse { .. } => HID_MOUSE,
            HidCommand::Joystick { .. } => HID_JOYSTICK,
            HidCommand::GetDb9 => HID_GET_DB9,
        }
    }

    fn write_payload(&self, frame: &mut Frame) {
        match *self {
            HidCommand::Status | HidCommand::GetDb9 => put(frame, &[0x00]),
            HidCommand::Keyboard(code) => put(frame, &[code]),
            HidCommand::Mouse { buttons, dx, dy } => put(frame, &[buttons, dx, dy]),
            HidCommand::Joystick {
                index,
                state,
                analog,
            } => {
                put(frame, &[index, state]);
                if let Some(analog) = analog {
                    put(frame, &analog);
                }
            }
        }
    }

    fn response_len(&self) -> usize {
        match self {
            HidCommand::Status => 2,
            HidCommand::GetDb9 => 1,
            _ => 0,
        }
    }
}

impl HidCommand {
    /// Parse an opcode and payload as sent on the wire.
    pub fn decode(opcode: u8, payload: &[u8]) -> Option<Self> {
        match (opcode, payload) {
            (HID_STATUS, _) => Some(HidCommand::Status),
            (HID_KEYBOARD, [code, ..]) => Some(HidCommand::Keyboard(*code)),
            (HID_MOUSE, [buttons, dx, dy, ..]) => Some(HidCommand::Mouse {
                buttons: *buttons,
                dx: *dx,
                dy: *dy,
            }),
            (HID_JOYSTICK, [index, state, x, y, extra, ..]) => Some(HidCommand::Joystick {
                index: *index,
                state: *state,
                analog: Some([*x, *y, *extra]),
            }),
            (HID_JOYSTICK, [index, state]) => Some(HidCommand::Joystick {
                index: *index,
                state: *state,
                analog: None,
            }),
            (HID_GET_DB9, _) => Some(HidCommand::GetDb9),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// OSD
// ---------------------------------------------------------------------------

pub const OSD_ENABLE: u8 = 1;
pub const OSD_WRITE: u8 = 2;

/// Commands for the on-screen display target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsdCommand<'a> {
    Enable(bool),
    /// One line of the OSD bitmap.
    Write { line: u8, data: &'a [u8] },
}

impl Command for OsdCommand<'_> {
    fn target(&self) -> Target {
        Target::Osd
    }

    fn opcode(&self) -> u8 {
        match self {
            OsdCommand::Enable(_) => OSD_ENABLE,
            OsdCommand::Write { .. } => OSD_WRITE,
        }
    }

    fn write_payload(&self, frame: &mut Frame) {
        match *self {
            OsdCommand::Enable(on) => put(frame, &[u8::from(on)]),
            OsdCommand::Write { line, data } => {
                put(frame, &[line]);
                put(frame, &data[..data.len().min(OSD_LINE_BYTES)]);
            }
        }
    }
}

impl<'a> OsdCommand<'a> {
    pub fn decode(opcode: u8, payload: &'a [u8]) -> Option<Self> {
        match (opcode, payload) {
            (OSD_ENABLE, [on, ..]) => Some(OsdCommand::Enable(*on != 0)),
            (OSD_WRITE, [line, data @ ..]) => Some(OsdCommand::Write { line: *line, data }),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// SDC
// ---------------------------------------------------------------------------

pub const SDC_STATUS: u8 = 1;
pub const SDC_CORE_RW: u8 = 2;
pub const SDC_MCU_READ: u8 = 3;
pub const SDC_INSERTED: u8 = 4;

/// Commands for the SD card target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SdcCommand {
    /// Card status, pending drive requests and the requested sector.
    Status,
    /// Physical sector the core should transfer itself.
    CoreRw(u32),
    /// Read a sector into the MCU. The caller clocks the data in afterwards.
    McuRead(u32),
    /// Image size for a drive, 0 when ejected.
    Inserted { drive: u8, size: u32 },
}

impl Command for SdcCommand {
    fn target(&self) -> Target {
        Target::Sdc
    }

    fn opcode(&self) -> u8 {
        match self {
            SdcCommand::Status => SDC_STATUS,
            SdcCommand::CoreRw(_) => SDC_CORE_RW,
            SdcCommand::McuRead(_) => SDC_MCU_READ,
            SdcCommand::Inserted { .. } => SDC_INSERTED,
        }
    }

    fn write_payload(&self, frame: &mut Frame) {
        match *self {
            SdcCommand::Status => {}
            SdcCommand::CoreRw(sector) | SdcCommand::McuRead(sector) => {
                put(frame, &sector.to_be_bytes())
            }
            SdcCommand::Inserted { drive, size } => {
                put(frame, &[drive]);
                put(frame, &size.to_be_bytes());
            }
        }
    }

    fn response_len(&self) -> usize {
        match self {
            SdcCommand::Status => SdcStatus::LEN,
            _ => 0,
        }
    }
}

impl SdcCommand {
    pub fn decode(opcode: u8, payload: &[u8]) -> Option<Self> {
        match opcode {
            SDC_STATUS => Some(SdcCommand::Status),
            SDC_CORE_RW => be32(payload).map(SdcCommand::CoreRw),
            SDC_MCU_READ => be32(payload).map(SdcCommand::McuRead),
            SDC_INSERTED => {
                let (&drive, rest) = payload.split_first()?;
                Some(SdcCommand::Inserted {
                    drive,
                    size: be32(rest)?,
                })
            }
            _ => None,
        }
    }
}

/// Response to `SDC STATUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SdcStatus {
    /// Card state as reported by the FPGA's SD controller.
    pub card: u8,
    /// One bit per drive with a pending sector request.
    pub request: u8,
    /// Logical sector requested, relative to the image start.
    pub sector: u32,
}

impl SdcStatus {
    pub const LEN: usize = 6;

    pub fn from_bytes(bytes: &[u8; Self::LEN]) -> Self {
        Self {
            card: bytes[0],
            request: bytes[1],
            sector: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let s = self.sector.to_be_bytes();
        [self.card, self.request, s[0], s[1], s[2], s[3]]
    }

    /// Lowest drive with a pending request.
    pub fn requesting_drive(&self) -> Option<usize> {
        let pending = self.request & 0x0F;
        (pending != 0).then(|| pending.trailing_zeros() as usize)
    }
}

// ---------------------------------------------------------------------------
// SYS
// ---------------------------------------------------------------------------

pub const SYS_STATUS: u8 = 0;
pub const SYS_LEDS: u8 = 1;
pub const SYS_RGB: u8 = 2;
pub const SYS_BUTTONS: u8 = 3;
pub const SYS_SET_VAL: u8 = 4;
pub const SYS_IRQ_CTRL: u8 = 8;

/// Commands for the system control target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SysCommand {
    /// Magic, core id and cold boot flag.
    Status,
    Leds(u8),
    /// 24 bit `0xRRGGBB`.
    Rgb(u32),
    Buttons,
    /// Named configuration value, e.g. `b'R'` for reset.
    SetVal { id: u8, value: u8 },
    /// Acknowledge the given interrupt sources and read the pending mask.
    IrqCtrl(u8),
}

impl Command for SysCommand {
    fn target(&self) -> Target {
        Target::Sys
    }

    fn opcode(&self) -> u8 {
        match self {
            SysCommand::Status => SYS_STATUS,
            SysCommand::Leds(_) => SYS_LEDS,
            SysCommand::Rgb(_) => SYS_RGB,
            SysCommand::Buttons => SYS_BUTTONS,
            SysCommand::SetVal { .. } => SYS_SET_VAL,
            SysCommand::IrqCtrl(_) => SYS_IRQ_CTRL,
        }
    }

    fn write_payload(&self, frame: &mut Frame) {
        match *self {
            SysCommand::Status | SysCommand::Buttons => put(frame, &[0x00]),
            SysCommand::Leds(mask) => put(frame, &[mask]),
            SysCommand::Rgb(rgb) => put(frame, &rgb.to_be_bytes()[1..]),
            SysCommand::SetVal { id, value } => put(frame, &[id, value]),
            SysCommand::IrqCtrl(ack) => put(frame, &[ack]),
        }
    }

    fn response_len(&self) -> usize {
        match self {
            SysCommand::Status => 4,
            SysCommand::Buttons | SysCommand::IrqCtrl(_) => 1,
            _ => 0,
        }
    }
}

impl SysCommand {
    pub fn decode(opcode: u8, payload: &[u8]) -> Option<Self> {
        match (opcode, payload) {
            (SYS_STATUS, _) => Some(SysCommand::Status),
            (SYS_LEDS, [mask, ..]) => Some(SysCommand::Leds(*mask)),
            (SYS_RGB, [r, g, b, ..]) => Some(SysCommand::Rgb(u32::from_be_bytes([0, *r, *g, *b]))),
            (SYS_BUTTONS, _) => Some(SysCommand::Buttons),
            (SYS_SET_VAL, [id, value, ..]) => Some(SysCommand::SetVal {
                id: *id,
                value: *value,
            }),
            (SYS_IRQ_CTRL, [ack, ..]) => Some(SysCommand::IrqCtrl(*ack)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_commands_are_big_endian() {
        assert_eq!(
            SdcCommand::CoreRw(0x0102_0304).encode().as_slice(),
            &[SDC_CORE_RW, 0x01, 0x02, 0x03, 0x04]
        );
        assert_eq!(
            SdcCommand::Inserted {
                drive: 1,
                size: 737_280
            }
            .encode()
            .as_slice(),
            &[SDC_INSERTED, 0x01, 0x00, 0x0B, 0x40, 0x00]
        );
    }

    #[test]
    fn irq_ctrl_frame() {
        let cmd = SysCommand::IrqCtrl(0xFF);
        assert_eq!(cmd.target(), Target::Sys);
        assert_eq!(cmd.encode().as_slice(), &[SYS_IRQ_CTRL, 0xFF]);
        assert_eq!(cmd.response_len(), 1);
    }

    #[test]
    fn status_probe_clocks_dummy_then_four_bytes() {
        let cmd = SysCommand::Status;
        assert_eq!(cmd.encode().as_slice(), &[SYS_STATUS, 0x00]);
        assert_eq!(cmd.response_len(), 4);
    }

    #[test]
    fn rgb_sends_three_bytes() {
        assert_eq!(
            SysCommand::Rgb(0x00AA_BBCC).encode().as_slice(),
            &[SYS_RGB, 0xAA, 0xBB, 0xCC]
        );
    }

    #[test]
    fn joystick_with_and_without_analog() {
        let digital = HidCommand::Joystick {
            index: 0x80,
            state: 0x11,
            analog: None,
        };
        assert_eq!(digital.encode().as_slice(), &[HID_JOYSTICK, 0x80, 0x11]);

        let analog = HidCommand::Joystick {
            index: 0,
            state: 0x01,
            analog: Some([0xFF, 0x80, 0x03]),
        };
        let frame = analog.encode();
        assert_eq!(frame.as_slice(), &[HID_JOYSTICK, 0, 0x01, 0xFF, 0x80, 0x03]);
        assert_eq!(HidCommand::decode(frame[0], &frame[1..]), Some(analog));
        assert_eq!(HidCommand::decode(HID_JOYSTICK, &[0x80, 0x11]), Some(digital));
    }

    #[test]
    fn osd_write_is_truncated_to_one_line() {
        let data = [0xAAu8; 200];
        let frame = OsdCommand::Write { line: 3, data: &data }.encode();
        assert_eq!(frame.len(), 2 + OSD_LINE_BYTES);
        assert_eq!(frame[1], 3);
    }

    #[test]
    fn sdc_status_requesting_drive() {
        let status = SdcStatus::from_bytes(&[0x20, 0b0110, 0, 0, 0x01, 0x00]);
        assert_eq!(status.sector, 256);
        assert_eq!(status.requesting_drive(), Some(1));
        assert_eq!(SdcStatus::default().requesting_drive(), None);
        assert_eq!(status.to_bytes(), [0x20, 0b0110, 0, 0, 0x01, 0x00]);
    }

    #[test]
    fn unknown_opcodes_do_not_decode() {
        assert_eq!(Target::from_byte(0), None);
        assert_eq!(SdcCommand::decode(0x7F, &[]), None);
        assert_eq!(SdcCommand::decode(SDC_CORE_RW, &[1, 2]), None);
        assert_eq!(SysCommand::decode(0x55, &[0]), None);
    }
}
