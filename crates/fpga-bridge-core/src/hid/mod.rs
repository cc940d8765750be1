//! USB HID devices: descriptor parsing, report decoding, forwarding.
//!
//! A report descriptor is parsed once per device into a [`ReportPlan`]. Each
//! interrupt report is then decoded against that plan and forwarded to the
//! core's HID target as keyboard, mouse or joystick commands.

pub mod decode;
pub mod host;
pub mod keymap;
pub mod parser;

pub use decode::{decode, DecoderState, HidEvent, InputState, KeyChange, KeyboardUpdate};
pub use host::{HidHost, MenuEvent, SlotState};
pub use keymap::{KeyMap, PassthroughKeyMap};
pub use parser::{parse, parse_bounded};

use heapless::Vec;

use crate::bits;

/// Axis fields a plan can hold: X, Y plus wheel or a second stick axis.
pub const MAX_AXES: usize = 4;

/// Button fields a plan can hold.
pub const MAX_BUTTONS: usize = 12;

/// Report length of a boot protocol keyboard.
pub const BOOT_KEYBOARD_REPORT_SIZE: u8 = 8;

/// Device class derived from the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidKind {
    #[default]
    None,
    Mouse,
    Keyboard,
    Joystick,
}

/// Location and range of one analog field in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AxisField {
    pub bit_offset: u16,
    pub bit_size: u8,
    pub logical_min: i16,
    pub logical_max: i16,
}

impl AxisField {
    /// Whether the field holds two's complement data.
    ///
    /// The limits are compared as raw unsigned 16 bit patterns, so a field is
    /// signed when `logical_min` is *greater* than `logical_max`. A negative
    /// minimum such as -127 reads as 0xFF81 and beats any positive maximum.
    /// This inverted test is the established convention for these devices;
    /// flipping it would invert axis polarity on real hardware.
    pub fn is_signed(&self) -> bool {
        (self.logical_min as u16) > (self.logical_max as u16)
    }

    /// Extract this field from a report payload.
    pub fn read(&self, report: &[u8]) -> u16 {
        bits::extract(report, self.bit_offset, self.bit_size, self.is_signed())
    }

    fn end_bit(&self) -> u32 {
        u32::from(self.bit_offset) + u32::from(self.bit_size)
    }
}

/// One button bit in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonField {
    pub byte_offset: u8,
    pub bitmask: u8,
}

impl ButtonField {
    /// Button at absolute bit position `bit` of the payload.
    pub fn at_bit(bit: u32) -> Option<Self> {
        Some(Self {
            byte_offset: u8::try_from(bit / 8).ok()?,
            bitmask: 1 << (bit % 8),
        })
    }

    pub fn is_pressed(&self, report: &[u8]) -> bool {
        report[usize::from(self.byte_offset)] & self.bitmask != 0
    }
}

/// Normalized layout of one device's input report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportPlan {
    pub kind: HidKind,
    /// Leading report id byte, when the device uses numbered reports.
    pub report_id: Option<u8>,
    /// Payload length after the report id is stripped.
    pub report_size: u8,
    pub axes: Vec<AxisField, MAX_AXES>,
    pub buttons: Vec<ButtonField, MAX_BUTTONS>,
    /// Hat switch, joysticks only.
    pub hat: Option<AxisField>,
}

impl ReportPlan {
    pub fn report_id_present(&self) -> bool {
        self.report_id.is_some()
    }

    /// Bytes the host stack must fetch per report, report id included.
    pub fn transfer_size(&self) -> usize {
        usize::from(self.report_size) + usize::from(self.report_id_present())
    }

    /// Check that every field lies inside the payload.
    pub fn fields_in_bounds(&self) -> bool {
        let bits = u32::from(self.report_size) * 8;
        self.axes.iter().chain(self.hat.iter()).all(|a| a.end_bit() <= bits)
            && self
                .buttons
                .iter()
                .all(|b| b.byte_offset < self.report_size)
    }
}
