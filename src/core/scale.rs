//! Conversions between the 7/14-bit integers on the MIDI wire and the normalized floats the
//! engine works in.

/// Combines an MSB/LSB controller pair into a 14-bit value.
pub fn calc_msb_lsb(msb: u8, lsb: u8) -> u16 {
    debug_assert!(msb & 0x80 == 0);
    debug_assert!(lsb & 0x80 == 0);
    (u16::from(msb) << 7) + u16::from(lsb)
}

/// Scales a 14-bit integer value to a float from 0.0 to 1.0.
pub fn scale_14bit(value: u16) -> f64 {
    f64::from(value) / f64::from(0x3fffu16)
}

/// Scales a 14-bit integer value to a float from -1.0 to 1.0, with 0x2000 at the center. The two
/// halves have different widths (0x2000 below center, 0x1fff above), so they are scaled
/// separately.
pub fn balance_14bit(value: u16) -> f64 {
    let value = i32::from(value) - 0x2000;
    f64::from(value) / f64::from(if value >= 0 { 0x1fff } else { 0x2000 })
}

/// The exact inverse of [`balance_14bit`], mapping -1.0..1.0 back onto 0..0x3fff.
pub fn balance_14bit_inverse(amount: f64) -> u16 {
    let half = f64::from(if amount >= 0.0 { 0x1fff } else { 0x2000 });
    let value = (amount * half).round() as i32 + 0x2000;
    value.max(0).min(0x3fff) as u16
}
