//! Translation of USB key codes into the codes a core expects.

use crate::protocol::KEY_BREAK;

/// Per-core keyboard translation.
///
/// The tables themselves belong to the core integration. A result of 0 means
/// the key has no counterpart on the target machine and is not forwarded.
/// Results must leave [`KEY_BREAK`] clear.
pub trait KeyMap {
    /// Code for a USB keyboard page usage.
    fn key(&self, usb_code: u8) -> u8;

    /// Code for modifier byte bit `bit`.
    fn modifier(&self, bit: u8) -> u8;

    /// Whether the keypad doubles as a joystick on this core.
    fn numpad_joystick(&self) -> bool {
        false
    }
}

/// First code used for modifiers by [`PassthroughKeyMap`].
pub const PASSTHROUGH_MODIFIER_BASE: u8 = 0x78;

/// Forwards USB usage codes below 0x78 unchanged and drops the rest.
/// Modifier bits map to 0x78..=0x7F.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughKeyMap {
    pub numpad_joystick: bool,
}

impl KeyMap for PassthroughKeyMap {
    fn key(&self, usb_code: u8) -> u8 {
        if usb_code < PASSTHROUGH_MODIFIER_BASE {
            usb_code
        } else {
            0
        }
    }

    fn modifier(&self, bit: u8) -> u8 {
        (PASSTHROUGH_MODIFIER_BASE + (bit & 7)) & !KEY_BREAK
    }

    fn numpad_joystick(&self) -> bool {
        self.numpad_joystick
    }
}
