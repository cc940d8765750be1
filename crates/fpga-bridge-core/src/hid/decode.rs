//! Runtime decoding of HID input reports against a [`ReportPlan`].

use heapless::Vec;

use super::{HidKind, ReportPlan, BOOT_KEYBOARD_REPORT_SIZE, MAX_AXES};

/// Key slots in a boot protocol keyboard report.
pub const KEY_SLOTS: usize = 6;

/// Upper bound of changes between two keyboard reports: every modifier bit
/// plus a break and a make per key slot.
pub const MAX_KEY_CHANGES: usize = 8 + 2 * KEY_SLOTS;

/// A single make or break on a keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyChange {
    /// Modifier byte bit 0..8 (LCtrl, LShift, LAlt, LGui, RCtrl, ...).
    Modifier { bit: u8, pressed: bool },
    /// USB keyboard page usage code.
    Key { code: u8, pressed: bool },
}

/// Result of diffing two keyboard reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyboardUpdate {
    /// Changes in report order: modifiers first, then key slots.
    pub changes: Vec<KeyChange, MAX_KEY_CHANGES>,
    /// Key slots of the new report.
    pub keys: [u8; KEY_SLOTS],
}

/// Decoded state of a mouse or joystick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InputState {
    /// Axis values in plan order, sign-extended when the field is signed.
    /// Unused entries stay 0.
    pub axes: [u16; MAX_AXES],
    /// Bit `i` set when plan button `i` is pressed.
    pub buttons: u16,
    pub hat: Option<u16>,
}

impl InputState {
    pub fn is_pressed(&self, button: usize) -> bool {
        self.buttons & (1 << button) != 0
    }
}

/// Outcome of decoding one report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HidEvent {
    /// Report of another sub-report or with a bad length. Dropped silently.
    Ignored,
    /// Same state as the previous report.
    Unchanged,
    Keyboard(KeyboardUpdate),
    Input(InputState),
}

/// What the decoder remembers between reports of one device.
#[derive(Debug, Clone, Default)]
pub struct DecoderState {
    last_keys: [u8; BOOT_KEYBOARD_REPORT_SIZE as usize],
    last_input: Option<InputState>,
}

impl DecoderState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Decode a raw report as delivered by the host stack.
///
/// Mouse and joystick reports equal to the previous one are reported as
/// [`HidEvent::Unchanged`]. This applies to relative axes as well, so a mouse
/// repeating the same non-zero delta only forwards the first report.
pub fn decode(plan: &ReportPlan, state: &mut DecoderState, report: &[u8]) -> HidEvent {
    let payload = match plan.report_id {
        Some(id) => match report.split_first() {
            Some((&first, rest)) if first == id => rest,
            _ => return HidEvent::Ignored,
        },
        None => report,
    };

    if payload.len() != usize::from(plan.report_size) {
        return HidEvent::Ignored;
    }

    match plan.kind {
        HidKind::Keyboard => decode_keyboard(state, payload),
        HidKind::Mouse | HidKind::Joystick => {
            let input = read_input(plan, payload);
            if state.last_input == Some(input) {
                return HidEvent::Unchanged;
            }
            state.last_input = Some(input);
            HidEvent::Input(input)
        }
        HidKind::None => HidEvent::Ignored,
    }
}

fn read_input(plan: &ReportPlan, payload: &[u8]) -> InputState {
    let mut input = InputState::default();
    for (value, axis) in input.axes.iter_mut().zip(plan.axes.iter()) {
        *value = axis.read(payload);
    }
    for (i, button) in plan.buttons.iter().enumerate() {
        if button.is_pressed(payload) {
            input.buttons |= 1 << i;
        }
    }
    input.hat = plan.hat.map(|hat| hat.read(payload));
    input
}

fn decode_keyboard(state: &mut DecoderState, payload: &[u8]) -> HidEvent {
    let Ok(report) = <[u8; 8]>::try_from(payload) else {
        return HidEvent::Ignored;
    };
    let last = state.last_keys;
    if report == last {
        return HidEvent::Unchanged;
    }

    let mut changes = Vec::new();

    let (old_mods, new_mods) = (last[0], report[0]);
    for bit in 0..8 {
        let mask = 1 << bit;
        if (old_mods ^ new_mods) & mask != 0 {
            let _ = changes.push(KeyChange::Modifier {
                bit,
                pressed: new_mods & mask != 0,
            });
        }
    }

    // Slots are compared position by position. A key moving to another slot
    // yields a break and a make, and a break is reported even if its make was
    // never seen.
    for (&old, &new) in last[2..].iter().zip(&report[2..]) {
        if old == new {
            continue;
        }
        if old != 0 {
            let _ = changes.push(KeyChange::Key {
                code: old,
                pressed: false,
            });
        }
        if new != 0 {
            let _ = changes.push(KeyChange::Key {
                code: new,
                pressed: true,
            });
        }
    }

    state.last_keys = report;

    let mut keys = [0; KEY_SLOTS];
    keys.copy_from_slice(&report[2..]);
    HidEvent::Keyboard(KeyboardUpdate { changes, keys })
}
