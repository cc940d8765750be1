//! Bit-field extraction from HID reports.

/// Read `bit_size` bits starting at `bit_offset` from `buf`.
///
/// Bits are taken LSB first within each byte, bytes low to high, which is the
/// HID report layout. With `signed` set, the top bit of the field is extended
/// through the rest of the returned word.
///
/// `bit_size` must be in `1..=16` and `buf` must cover
/// `bit_offset + bit_size` bits. Descriptor offsets are checked against the
/// report size when the plan is built, so live reports always satisfy this.
pub fn extract(buf: &[u8], bit_offset: u16, bit_size: u8, signed: bool) -> u16 {
    debug_assert!((1..=16).contains(&bit_size));

    let first = usize::from(bit_offset / 8);
    let shift = u32::from(bit_offset % 8);

    // A 16 bit field at shift 7 spans at most three bytes.
    let mut acc: u32 = 0;
    for (i, &byte) in buf[first..].iter().take(3).enumerate() {
        acc |= u32::from(byte) << (8 * i);
    }

    let mask = (1u32 << bit_size) - 1;
    let mut value = (acc >> shift) & mask;

    if signed && value & (1 << (bit_size - 1)) != 0 {
        value |= !mask;
    }

    value as u16
}
