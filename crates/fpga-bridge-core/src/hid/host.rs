//! HID device table and forwarding to the core.
//!
//! The USB host stack reports attach, detach and input reports per device
//! slot. Each live slot holds the parsed plan and the decoder state; decoded
//! events are turned into `HID` target commands here.

use fpga_bridge_hal::{RawLock, SpiPort};

use super::decode::{decode, DecoderState, HidEvent, InputState, KeyChange, KeyboardUpdate};
use super::keymap::KeyMap;
use super::parser::parse;
use super::{AxisField, HidKind, ReportPlan};
use crate::bus::Bus;
use crate::config::{MAX_HID_DEVICES, MAX_JOYSTICKS};
use crate::error::BridgeError;
use crate::protocol::{HidCommand, OsdCommand, KEY_BREAK};

/// Joystick index used for the keypad joystick. USB joysticks count from 0.
pub const NUMPAD_JOYSTICK_INDEX: u8 = 0x80;

const KEY_F12: u8 = 0x45;
const KEY_ESC: u8 = 0x29;
const KEY_ENTER: u8 = 0x28;
const KEY_SPACE: u8 = 0x2C;
const KEY_PAGE_UP: u8 = 0x4B;
const KEY_PAGE_DOWN: u8 = 0x4E;
const KEY_DOWN: u8 = 0x51;
const KEY_UP: u8 = 0x52;

const JOY_RIGHT: u8 = 0x01;
const JOY_LEFT: u8 = 0x02;
const JOY_DOWN: u8 = 0x04;
const JOY_UP: u8 = 0x08;

/// Keypad keys and the joystick bit each one sets.
const NUMPAD_JOYSTICK: [(u8, u8); 8] = [
    (0x5E, JOY_RIGHT), // KP 6
    (0x5C, JOY_LEFT),  // KP 4
    (0x5A, JOY_DOWN),  // KP 2
    (0x60, JOY_UP),    // KP 8
    (0x62, 0x10),      // KP 0, fire
    (0x63, 0x20),      // KP ., second button
    (0x44, 0x40),      // F11
    (0x4B, 0x80),      // Page Up
];

/// Input for the menu while the OSD is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MenuEvent {
    Show,
    Hide,
    Up,
    Down,
    PageUp,
    PageDown,
    Select,
}

/// A device that parsed successfully.
#[derive(Debug, Clone)]
pub struct Device {
    pub plan: ReportPlan,
    decoder: DecoderState,
    /// Joystick index on the wire, joysticks only.
    pub js_index: Option<u8>,
}

/// One entry of the device table.
#[derive(Debug, Clone, Default)]
pub enum SlotState {
    #[default]
    Empty,
    /// The descriptor was not usable. Stays so until the device detaches.
    Failed,
    Running(Device),
}

/// Attached HID devices and keyboard forwarding state.
pub struct HidHost<K: KeyMap> {
    slots: [SlotState; MAX_HID_DEVICES],
    /// Bit `n` set while joystick index `n` is taken.
    js_map: u8,
    keymap: K,
    osd_visible: bool,
    numpad_state: u8,
}

impl<K: KeyMap> HidHost<K> {
    pub fn new(keymap: K) -> Self {
        Self {
            slots: Default::default(),
            js_map: 0,
            keymap,
            osd_visible: false,
            numpad_state: 0,
        }
    }

    pub fn slot(&self, slot: usize) -> Option<&SlotState> {
        self.slots.get(slot)
    }

    pub fn osd_visible(&self) -> bool {
        self.osd_visible
    }

    /// Record an OSD state change made by the menu itself.
    pub fn set_osd_visible(&mut self, visible: bool) {
        self.osd_visible = visible;
    }

    pub fn keymap(&self) -> &K {
        &self.keymap
    }

    /// Swap the key translation, e.g. once the core has been identified.
    pub fn set_keymap(&mut self, keymap: K) {
        self.keymap = keymap;
    }

    /// Install a newly attached device.
    ///
    /// Returns the plan on success. A descriptor that does not parse leaves
    /// the slot failed until [`detach`](Self::detach); it is never retried.
    pub fn attach(&mut self, slot: usize, descriptor: &[u8]) -> Option<&ReportPlan> {
        if slot >= MAX_HID_DEVICES {
            log::warn!("HID slot {} out of range", slot);
            return None;
        }
        self.detach(slot);

        let Some(plan) = parse(descriptor) else {
            log::warn!("HID slot {}: unsupported report descriptor", slot);
            self.slots[slot] = SlotState::Failed;
            return None;
        };

        let js_index = if plan.kind == HidKind::Joystick {
            let Some(index) = self.alloc_joystick() else {
                log::warn!("HID slot {}: no free joystick index", slot);
                self.slots[slot] = SlotState::Failed;
                return None;
            };
            Some(index)
        } else {
            None
        };

        log::info!(
            "HID slot {}: {:?}, report id {:?}, {} bytes, {} axes, {} buttons, joystick {:?}",
            slot,
            plan.kind,
            plan.report_id,
            plan.report_size,
            plan.axes.len(),
            plan.buttons.len(),
            js_index
        );

        self.slots[slot] = SlotState::Running(Device {
            plan,
            decoder: DecoderState::new(),
            js_index,
        });
        match &self.slots[slot] {
            SlotState::Running(device) => Some(&device.plan),
            _ => None,
        }
    }

    /// Drop a device and release its joystick index.
    pub fn detach(&mut self, slot: usize) {
        let Some(state) = self.slots.get_mut(slot) else {
            return;
        };
        if let SlotState::Running(device) = core::mem::take(state) {
            if let Some(index) = device.js_index {
                self.js_map &= !(1u8 << index);
            }
            log::info!("HID slot {}: {:?} detached", slot, device.plan.kind);
        }
    }

    fn alloc_joystick(&mut self) -> Option<u8> {
        let index = (0..MAX_JOYSTICKS as u8).find(|&i| self.js_map & (1u8 << i) == 0)?;
        self.js_map |= 1u8 << index;
        Some(index)
    }

    /// Decode one input report from `slot` and forward it.
    ///
    /// Menu navigation while the OSD is shown goes to `menu` instead of the
    /// core. Reports for empty or failed slots are dropped.
    pub fn report<R, P, S>(
        &mut self,
        bus: &Bus<R, P>,
        slot: usize,
        report: &[u8],
        mut menu: S,
    ) -> Result<(), BridgeError<P::Error>>
    where
        R: RawLock,
        P: SpiPort,
        S: FnMut(MenuEvent),
    {
        let state = self
            .slots
            .get_mut(slot)
            .ok_or(BridgeError::InvalidSlot(slot))?;
        let SlotState::Running(device) = state else {
            return Ok(());
        };

        match decode(&device.plan, &mut device.decoder, report) {
            HidEvent::Ignored | HidEvent::Unchanged => Ok(()),
            HidEvent::Keyboard(update) => self.forward_keyboard(bus, &update, &mut menu),
            HidEvent::Input(input) => {
                let cmd = match device.plan.kind {
                    HidKind::Mouse => mouse_command(&input),
                    _ => joystick_command(&device.plan, device.js_index.unwrap_or(0), &input),
                };
                log::trace!("HID slot {}: {:?}", slot, cmd);
                bus.send(&cmd)?;
                Ok(())
            }
        }
    }

    fn forward_keyboard<R: RawLock, P: SpiPort>(
        &mut self,
        bus: &Bus<R, P>,
        update: &KeyboardUpdate,
        menu: &mut dyn FnMut(MenuEvent),
    ) -> Result<(), BridgeError<P::Error>> {
        for change in &update.changes {
            match *change {
                KeyChange::Modifier { bit, pressed } => {
                    if !self.osd_visible {
                        self.send_key(bus, self.keymap.modifier(bit), pressed)?;
                    }
                }
                KeyChange::Key {
                    code,
                    pressed: false,
                } => {
                    if !self.osd_visible {
                        self.send_key(bus, self.keymap.key(code), false)?;
                    }
                }
                KeyChange::Key {
                    code,
                    pressed: true,
                } => {
                    if code == KEY_F12 || (self.osd_visible && code == KEY_ESC) {
                        // The release of the toggling key reaches the core,
                        // which has to cope with a break without a make.
                        self.osd_visible = !self.osd_visible;
                        bus.send(&OsdCommand::Enable(self.osd_visible))?;
                        menu(if self.osd_visible {
                            MenuEvent::Show
                        } else {
                            MenuEvent::Hide
                        });
                    } else if !self.osd_visible {
                        self.send_key(bus, self.keymap.key(code), true)?;
                    } else if let Some(event) = menu_event(code) {
                        menu(event);
                    }
                }
            }
        }

        if self.keymap.numpad_joystick() {
            let state = numpad_state(&update.keys);
            if state != self.numpad_state {
                self.numpad_state = state;
                log::debug!("keypad joystick: {:02x}", state);
                bus.send(&HidCommand::Joystick {
                    index: NUMPAD_JOYSTICK_INDEX,
                    state,
                    analog: None,
                })?;
            }
        }
        Ok(())
    }

    fn send_key<R: RawLock, P: SpiPort>(
        &self,
        bus: &Bus<R, P>,
        code: u8,
        pressed: bool,
    ) -> Result<(), P::Error> {
        if code == 0 {
            return Ok(());
        }
        let code = if pressed { code } else { code | KEY_BREAK };
        log::trace!("key {:02x}", code);
        bus.send(&HidCommand::Keyboard(code))
    }
}

/// Read the DB9 joystick port, serviced when the core raises the HID
/// interrupt.
pub fn poll_db9<R: RawLock, P: SpiPort>(bus: &Bus<R, P>) -> Result<u8, P::Error> {
    let mut state = [0u8; 1];
    bus.request(&HidCommand::GetDb9, &mut state)?;
    log::debug!("DB9: {:02x}", state[0]);
    Ok(state[0])
}

fn menu_event(code: u8) -> Option<MenuEvent> {
    match code {
        KEY_UP => Some(MenuEvent::Up),
        KEY_DOWN => Some(MenuEvent::Down),
        KEY_PAGE_UP => Some(MenuEvent::PageUp),
        KEY_PAGE_DOWN => Some(MenuEvent::PageDown),
        KEY_SPACE | KEY_ENTER => Some(MenuEvent::Select),
        _ => None,
    }
}

fn numpad_state(keys: &[u8]) -> u8 {
    keys.iter()
        .flat_map(|&key| NUMPAD_JOYSTICK.iter().filter(move |(k, _)| *k == key))
        .fold(0, |state, (_, bit)| state | bit)
}

fn mouse_command(input: &InputState) -> HidCommand {
    HidCommand::Mouse {
        buttons: (input.buttons & 0x07) as u8,
        dx: input.axes[0] as u8,
        dy: input.axes[1] as u8,
    }
}

fn joystick_command(plan: &ReportPlan, index: u8, input: &InputState) -> HidCommand {
    let x = plan.axes.first().map_or(0x80, |a| axis_byte(a, input.axes[0]));
    let y = plan.axes.get(1).map_or(0x80, |a| axis_byte(a, input.axes[1]));

    let mut state = 0u8;
    if x > 0xC0 {
        state |= JOY_RIGHT;
    }
    if x < 0x40 {
        state |= JOY_LEFT;
    }
    if y > 0xC0 {
        state |= JOY_DOWN;
    }
    if y < 0x40 {
        state |= JOY_UP;
    }
    if let (Some(field), Some(value)) = (plan.hat, input.hat) {
        state |= hat_directions(&field, value);
    }

    let mut extra = 0u8;
    for i in 0..plan.buttons.len() {
        if input.is_pressed(i) {
            match i {
                0..=3 => state |= 0x10 << i,
                _ => extra |= 1 << (i - 4),
            }
        }
    }

    HidCommand::Joystick {
        index,
        state,
        analog: Some([x, y, extra]),
    }
}

/// Scale an axis to one byte centred on 0x80.
fn axis_byte(field: &AxisField, value: u16) -> u8 {
    let size = u32::from(field.bit_size);
    if field.is_signed() {
        // `value` is already sign-extended to 16 bits.
        let v = value as i16;
        let v = if size > 8 {
            v >> (size - 8)
        } else {
            v << (8 - size)
        };
        (v.clamp(-128, 127) + 128) as u8
    } else if size > 8 {
        (value >> (size - 8)) as u8
    } else {
        (value << (8 - size)) as u8
    }
}

/// Directions of an eight way hat. Values outside the logical range mean
/// centred.
fn hat_directions(field: &AxisField, value: u16) -> u8 {
    const WAYS: [u8; 8] = [
        JOY_UP,
        JOY_UP | JOY_RIGHT,
        JOY_RIGHT,
        JOY_DOWN | JOY_RIGHT,
        JOY_DOWN,
        JOY_DOWN | JOY_LEFT,
        JOY_LEFT,
        JOY_UP | JOY_LEFT,
    ];
    let min = i32::from(field.logical_min);
    let max = i32::from(field.logical_max);
    let position = i32::from(value) - min;
    if position < 0 || position > max - min {
        return 0;
    }
    // A four way hat reports only the straight directions.
    let step = if max - min == 3 { 2 } else { 1 };
    WAYS.get((position * step) as usize).copied().unwrap_or(0)
}
