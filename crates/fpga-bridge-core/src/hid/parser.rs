//! HID report descriptor parser.
//!
//! Walks the short-item stream of a report descriptor and builds a
//! [`ReportPlan`] for the first application collection that looks like a
//! keyboard, mouse or joystick. Only input items of that collection's report
//! id contribute to the layout.

use heapless::Vec;

use super::{AxisField, ButtonField, HidKind, ReportPlan, BOOT_KEYBOARD_REPORT_SIZE};

const PAGE_GENERIC_DESKTOP: u16 = 0x01;
const PAGE_KEYBOARD: u16 = 0x07;
const PAGE_BUTTON: u16 = 0x09;

const USAGE_MOUSE: u16 = 0x02;
const USAGE_JOYSTICK: u16 = 0x04;
const USAGE_GAMEPAD: u16 = 0x05;
const USAGE_KEYBOARD: u16 = 0x06;
const USAGE_KEYPAD: u16 = 0x07;
const USAGE_X: u16 = 0x30;
const USAGE_WHEEL: u16 = 0x38;
const USAGE_HAT_SWITCH: u16 = 0x39;

const COLLECTION_APPLICATION: u32 = 0x01;

const INPUT_CONSTANT: u32 = 0x01;
const INPUT_VARIABLE: u32 = 0x02;

/// Usages remembered per main item. Array items beyond this reuse the last.
const MAX_USAGES: usize = 16;

/// Depth of the PUSH/POP global stack.
const MAX_GLOBAL_STACK: usize = 4;

/// Widest field a report item may declare.
const MAX_FIELD_BITS: u32 = 32;

/// Longest report payload a plan can describe.
const MAX_REPORT_BITS: u32 = u8::MAX as u32 * 8;

/// Boot keyboard layout: modifier bits in byte 0, key slots in bytes 2..8.
const BOOT_MODIFIER_BITS: (u32, u32) = (0, 8);
const BOOT_KEY_SLOT_BITS: (u32, u32) = (16, 64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemType {
    Main,
    Global,
    Local,
    Reserved,
}

#[derive(Debug, Clone, Copy)]
struct Item {
    kind: ItemType,
    tag: u8,
    size: u8,
    data: u32,
}

impl Item {
    /// Data sign-extended from its encoded width.
    fn signed(&self) -> i32 {
        match self.size {
            1 => self.data as u8 as i8 as i32,
            2 => self.data as u16 as i16 as i32,
            _ => self.data as i32,
        }
    }
}

/// Iterator over the short items of a descriptor. Long items are skipped and
/// a truncated trailing item ends the stream.
struct Items<'a> {
    buf: &'a [u8],
}

impl Iterator for Items<'_> {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        loop {
            let (&prefix, rest) = self.buf.split_first()?;

            if prefix == 0xFE {
                // Long item: size byte, tag byte, data.
                let len = usize::from(*rest.first()?);
                self.buf = rest.get(2 + len..)?;
                continue;
            }

            let size = match prefix & 0x03 {
                3 => 4,
                n => usize::from(n),
            };
            let payload = rest.get(..size)?;
            let data = payload
                .iter()
                .rev()
                .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
            self.buf = &rest[size..];

            let kind = match (prefix >> 2) & 0x03 {
                0 => ItemType::Main,
                1 => ItemType::Global,
                2 => ItemType::Local,
                _ => ItemType::Reserved,
            };

            return Some(Item {
                kind,
                tag: prefix >> 4,
                size: size as u8,
                data,
            });
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Globals {
    usage_page: u16,
    logical_min: i32,
    logical_max: i32,
    report_size: u32,
    report_count: u32,
    report_id: Option<u8>,
}

#[derive(Debug, Default)]
struct Locals {
    /// Usages as `(page, id)`.
    usages: Vec<(u16, u16), MAX_USAGES>,
    usage_min: Option<(u16, u16)>,
    usage_max: Option<(u16, u16)>,
}

impl Locals {
    /// Usage of the `index`th field of the current main item.
    fn usage(&self, index: u32) -> Option<(u16, u16)> {
        if let Some(last) = self.usages.last() {
            return Some(
                self.usages
                    .get(index as usize)
                    .copied()
                    .unwrap_or(*last),
            );
        }
        let (page, min) = self.usage_min?;
        let max = self.usage_max.map_or(min, |(_, max)| max);
        let id = u32::from(min) + index;
        Some((page, u16::try_from(id).unwrap_or(max).min(max)))
    }
}

/// Layout collected for one application collection.
#[derive(Debug, Default)]
struct Candidate {
    kind: HidKind,
    /// Report id bound by the first input item, `None` until then.
    report_id: Option<Option<u8>>,
    bit_pos: u32,
    axes: Vec<AxisField, { super::MAX_AXES }>,
    buttons: Vec<ButtonField, { super::MAX_BUTTONS }>,
    hat: Option<AxisField>,
    /// Eight one-bit modifier fields at the start of the report.
    boot_modifiers: bool,
    /// Array of 8-bit key slots covering bytes 2..8.
    boot_key_slots: bool,
}

/// The plan does not fit the fixed capacities, or a field or report is
/// larger than a plan can describe.
#[derive(Debug)]
struct Overflow;

impl Candidate {
    fn input(&mut self, globals: &Globals, locals: &Locals, flags: u32) -> Result<(), Overflow> {
        let id = *self.report_id.get_or_insert(globals.report_id);
        if id != globals.report_id {
            // A different report of the same collection.
            return Ok(());
        }

        let field_size = globals.report_size;
        if field_size > MAX_FIELD_BITS {
            return Err(Overflow);
        }
        let start = self.bit_pos;
        self.bit_pos = field_size
            .checked_mul(globals.report_count)
            .and_then(|bits| start.checked_add(bits))
            .filter(|&end| end <= MAX_REPORT_BITS)
            .ok_or(Overflow)?;

        if flags & INPUT_CONSTANT != 0 {
            return Ok(());
        }

        if locals.usage(0).is_some_and(|(page, _)| page == PAGE_KEYBOARD) {
            let span = (start, self.bit_pos);
            if flags & INPUT_VARIABLE != 0 {
                self.boot_modifiers |= field_size == 1 && span == BOOT_MODIFIER_BITS;
            } else {
                self.boot_key_slots |= field_size == 8 && span == BOOT_KEY_SLOT_BITS;
            }
            return Ok(());
        }

        for i in 0..globals.report_count {
            let Some((page, usage)) = locals.usage(i) else {
                continue;
            };
            let bit = start + i * field_size;

            match page {
                PAGE_BUTTON if flags & INPUT_VARIABLE != 0 => {
                    let Some(button) = ButtonField::at_bit(bit) else {
                        continue;
                    };
                    self.buttons.push(button).map_err(|_| Overflow)?;
                }
                PAGE_GENERIC_DESKTOP if (1..=16).contains(&field_size) => {
                    let Ok(bit_offset) = u16::try_from(bit) else {
                        continue;
                    };
                    let field = AxisField {
                        bit_offset,
                        bit_size: field_size as u8,
                        logical_min: globals.logical_min as i16,
                        logical_max: globals.logical_max as i16,
                    };
                    match usage {
                        USAGE_X..=USAGE_WHEEL => self.axes.push(field).map_err(|_| Overflow)?,
                        USAGE_HAT_SWITCH => self.hat = Some(field),
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn finish(self) -> Option<ReportPlan> {
        let report_id = self.report_id.flatten();

        let (kind, report_size) = match self.kind {
            HidKind::Keyboard => {
                let boot_shaped = self.boot_modifiers
                    && self.boot_key_slots
                    && self.bit_pos == u32::from(BOOT_KEYBOARD_REPORT_SIZE) * 8;
                if !boot_shaped {
                    return None;
                }
                (HidKind::Keyboard, BOOT_KEYBOARD_REPORT_SIZE)
            }
            HidKind::Mouse | HidKind::Joystick => {
                let has_motion = self.axes.len() >= 2 || self.hat.is_some();
                if !has_motion || self.buttons.is_empty() {
                    return None;
                }
                // A "mouse" with a hat switch is a game controller.
                let kind = if self.hat.is_some() {
                    HidKind::Joystick
                } else {
                    self.kind
                };
                (kind, u8::try_from(self.bit_pos.div_ceil(8)).ok()?)
            }
            _ => return None,
        };

        let plan = ReportPlan {
            kind,
            report_id,
            report_size,
            axes: self.axes,
            buttons: self.buttons,
            hat: self.hat,
        };

        (plan.report_size > 0 && plan.fields_in_bounds()).then_some(plan)
    }
}

fn collection_kind(usage: Option<(u16, u16)>) -> HidKind {
    match usage {
        Some((PAGE_GENERIC_DESKTOP, USAGE_MOUSE)) => HidKind::Mouse,
        Some((PAGE_GENERIC_DESKTOP, USAGE_JOYSTICK | USAGE_GAMEPAD)) => HidKind::Joystick,
        Some((PAGE_GENERIC_DESKTOP, USAGE_KEYBOARD | USAGE_KEYPAD)) => HidKind::Keyboard,
        _ => HidKind::None,
    }
}

/// Parse a complete report descriptor.
///
/// Returns `None` when no keyboard, mouse or joystick collection is found, or
/// when the usable collection declares more axes or buttons than a
/// [`ReportPlan`] holds. Fields wider than 32 bits and reports longer than
/// 255 bytes drop the device too. A keyboard must use the 8 byte boot layout.
/// The result depends only on `descriptor`.
pub fn parse(descriptor: &[u8]) -> Option<ReportPlan> {
    let mut globals = Globals::default();
    let mut stack: Vec<Globals, MAX_GLOBAL_STACK> = Vec::new();
    let mut locals = Locals::default();
    let mut depth: u32 = 0;
    let mut candidate: Option<Candidate> = None;

    for item in (Items { buf: descriptor }) {
        match item.kind {
            ItemType::Main => {
                match item.tag {
                    // Input
                    0x8 => {
                        if let Some(c) = candidate.as_mut() {
                            c.input(&globals, &locals, item.data).ok()?;
                        }
                    }
                    // Collection
                    0xA => {
                        if depth == 0 && item.data == COLLECTION_APPLICATION {
                            let kind = collection_kind(locals.usages.first().copied());
                            candidate = (kind != HidKind::None).then(|| Candidate {
                                kind,
                                ..Candidate::default()
                            });
                        }
                        depth += 1;
                    }
                    // End collection
                    0xC => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            if let Some(plan) = candidate.take().and_then(Candidate::finish) {
                                return Some(plan);
                            }
                        }
                    }
                    // Output, feature and reserved tags don't shape input reports.
                    _ => {}
                }
                locals = Locals::default();
            }
            ItemType::Global => match item.tag {
                0x0 => globals.usage_page = item.data as u16,
                0x1 => globals.logical_min = item.signed(),
                0x2 => globals.logical_max = item.signed(),
                0x7 => globals.report_size = item.data,
                0x8 => globals.report_id = Some(item.data as u8),
                0x9 => globals.report_count = item.data,
                0xA => {
                    let _ = stack.push(globals);
                }
                0xB => {
                    if let Some(saved) = stack.pop() {
                        globals = saved;
                    }
                }
                _ => {}
            },
            ItemType::Local => {
                // Four byte usages carry their own page in the high half.
                let usage = if item.size == 4 {
                    ((item.data >> 16) as u16, item.data as u16)
                } else {
                    (globals.usage_page, item.data as u16)
                };
                match item.tag {
                    0x0 => {
                        let _ = locals.usages.push(usage);
                    }
                    0x1 => locals.usage_min = Some(usage),
                    0x2 => locals.usage_max = Some(usage),
                    _ => {}
                }
            }
            ItemType::Reserved => {}
        }
    }

    None
}

/// Parse a descriptor whose true length is unknown.
///
/// Some host stacks only hand out a buffer of an upper-bound length. The
/// descriptor is taken to end at the last END_COLLECTION byte.
pub fn parse_bounded(buf: &[u8]) -> Option<ReportPlan> {
    let end = buf.iter().rposition(|&b| b == 0xC0)?;
    parse(&buf[..=end])
}
