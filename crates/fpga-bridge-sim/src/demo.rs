//! Scripted HID session: a boot keyboard and a gamepad.

use fpga_bridge_core::hid::{HidHost, MenuEvent, PassthroughKeyMap};
use fpga_bridge_core::Bus;
use fpga_bridge_hal::host::BlockingLock;

use crate::error::{Result, SimError};
use crate::fpga::SimFpga;

const KEYBOARD_SLOT: usize = 0;
const GAMEPAD_SLOT: usize = 1;

pub const BOOT_KEYBOARD: [u8; 45] = [
    0x05, 0x01, 0x09, 0x06, 0xA1, 0x01, 0x05, 0x07, 0x19, 0xE0, 0x29, 0xE7, 0x15, 0x00, 0x25, 0x01,
    0x75, 0x01, 0x95, 0x08, 0x81, 0x02, 0x95, 0x01, 0x75, 0x08, 0x81, 0x01, 0x95, 0x06, 0x75, 0x08,
    0x15, 0x00, 0x25, 0x65, 0x05, 0x07, 0x19, 0x00, 0x29, 0x65, 0x81, 0x00, 0xC0,
];

/// X, Y, Z as unsigned bytes, then 8 buttons.
pub const GAMEPAD: [u8; 40] = [
    0x05, 0x01, 0x09, 0x05, 0xA1, 0x01, 0x15, 0x00, 0x26, 0xFF, 0x00, 0x75, 0x08, 0x95, 0x03, 0x09,
    0x30, 0x09, 0x31, 0x09, 0x32, 0x81, 0x02, 0x05, 0x09, 0x19, 0x01, 0x29, 0x08, 0x15, 0x00, 0x25,
    0x01, 0x75, 0x01, 0x95, 0x08, 0x81, 0x02, 0xC0,
];

const KEY_A: u8 = 0x04;
const KEY_B: u8 = 0x05;
const KEY_F12: u8 = 0x45;
const KEY_ESC: u8 = 0x29;
const KEY_DOWN: u8 = 0x51;
const KEY_KP8: u8 = 0x60;
const LEFT_SHIFT: u8 = 0x02;

fn keys(modifiers: u8, pressed: &[u8]) -> [u8; 8] {
    let mut report = [0u8; 8];
    report[0] = modifiers;
    for (slot, &key) in report[2..].iter_mut().zip(pressed) {
        *slot = key;
    }
    report
}

/// Attach both devices and replay typing, a joystick move, the keypad
/// joystick and a trip through the menu. Returns the menu events seen.
pub fn run(bus: &Bus<BlockingLock, SimFpga>) -> Result<Vec<MenuEvent>> {
    let mut host = HidHost::new(PassthroughKeyMap {
        numpad_joystick: true,
    });
    if host.attach(KEYBOARD_SLOT, &BOOT_KEYBOARD).is_none() {
        return Err(SimError::UnsupportedDevice(KEYBOARD_SLOT));
    }
    if host.attach(GAMEPAD_SLOT, &GAMEPAD).is_none() {
        return Err(SimError::UnsupportedDevice(GAMEPAD_SLOT));
    }

    let keyboard = [
        keys(0, &[KEY_A]),
        keys(0, &[]),
        keys(LEFT_SHIFT, &[KEY_B]),
        keys(0, &[]),
        keys(0, &[KEY_KP8]),
        keys(0, &[]),
        keys(0, &[KEY_F12]),
        keys(0, &[]),
        keys(0, &[KEY_DOWN]),
        keys(0, &[]),
        keys(0, &[KEY_ESC]),
        keys(0, &[]),
    ];
    let gamepad = [
        [0xFF, 0x80, 0x80, 0x01],
        [0xFF, 0x80, 0x80, 0x01],
        [0x80, 0x80, 0x80, 0x00],
    ];

    let mut menu = Vec::new();
    for report in &keyboard[..6] {
        host.report(bus, KEYBOARD_SLOT, report, |e| menu.push(e))?;
    }
    for report in &gamepad {
        host.report(bus, GAMEPAD_SLOT, report, |e| menu.push(e))?;
    }
    for report in &keyboard[6..] {
        host.report(bus, KEYBOARD_SLOT, report, |e| menu.push(e))?;
    }

    host.detach(GAMEPAD_SLOT);
    host.detach(KEYBOARD_SLOT);
    log::info!("HID demo done, {} menu events", menu.len());
    Ok(menu)
}
