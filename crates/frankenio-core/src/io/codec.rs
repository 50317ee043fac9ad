//! Big-endian primitive codec.
//!
//! Packs and unpacks fixed-width primitives at an offset in a byte buffer,
//! most significant byte first. Floats and doubles travel as their raw bit
//! patterns, so NaN payloads survive a round trip unchanged.
//!
//! Callers guarantee bounds: an out-of-range offset is a programming error
//! and panics like any slice index.

/// Widths accepted by [`pack`] and [`unpack`].
pub const WIDTHS: [usize; 4] = [1, 2, 4, 8];

#[inline]
#[must_use]
pub fn get_boolean(b: &[u8], off: usize) -> bool {
    b[off] != 0
}

#[inline]
#[must_use]
pub fn get_byte(b: &[u8], off: usize) -> i8 {
    b[off] as i8
}

/// UTF-16 code unit.
#[inline]
#[must_use]
pub fn get_char(b: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([b[off], b[off + 1]])
}

#[inline]
#[must_use]
pub fn get_short(b: &[u8], off: usize) -> i16 {
    i16::from_be_bytes([b[off], b[off + 1]])
}

#[inline]
#[must_use]
pub fn get_unsigned_short(b: &[u8], off: usize) -> u16 {
    get_char(b, off)
}

#[inline]
#[must_use]
pub fn get_int(b: &[u8], off: usize) -> i32 {
    i32::from_be_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

#[inline]
#[must_use]
pub fn get_float(b: &[u8], off: usize) -> f32 {
    f32::from_bits(get_int(b, off) as u32)
}

#[inline]
#[must_use]
pub fn get_long(b: &[u8], off: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[off..off + 8]);
    i64::from_be_bytes(raw)
}

#[inline]
#[must_use]
pub fn get_double(b: &[u8], off: usize) -> f64 {
    f64::from_bits(get_long(b, off) as u64)
}

#[inline]
pub fn put_boolean(b: &mut [u8], off: usize, v: bool) {
    b[off] = u8::from(v);
}

#[inline]
pub fn put_byte(b: &mut [u8], off: usize, v: i8) {
    b[off] = v as u8;
}

#[inline]
pub fn put_char(b: &mut [u8], off: usize, v: u16) {
    b[off..off + 2].copy_from_slice(&v.to_be_bytes());
}

#[inline]
pub fn put_short(b: &mut [u8], off: usize, v: i16) {
    b[off..off + 2].copy_from_slice(&v.to_be_bytes());
}

#[inline]
pub fn put_int(b: &mut [u8], off: usize, v: i32) {
    b[off..off + 4].copy_from_slice(&v.to_be_bytes());
}

#[inline]
pub fn put_float(b: &mut [u8], off: usize, v: f32) {
    put_int(b, off, v.to_bits() as i32);
}

#[inline]
pub fn put_long(b: &mut [u8], off: usize, v: i64) {
    b[off..off + 8].copy_from_slice(&v.to_be_bytes());
}

#[inline]
pub fn put_double(b: &mut [u8], off: usize, v: f64) {
    put_long(b, off, v.to_bits() as i64);
}

/// Write the low `width` bytes of `value` (1, 2, 4 or 8) into `out[..width]`.
pub fn pack(value: i64, width: usize, out: &mut [u8]) {
    debug_assert!(WIDTHS.contains(&width));
    let be = value.to_be_bytes();
    out[..width].copy_from_slice(&be[8 - width..]);
}

/// Read a `width`-byte big-endian integer, sign-extended to `i64`.
#[must_use]
pub fn unpack(bytes: &[u8], width: usize) -> i64 {
    debug_assert!(WIDTHS.contains(&width));
    let fill = if bytes[0] & 0x80 != 0 { 0xFF } else { 0x00 };
    let mut be = [fill; 8];
    be[8 - width..].copy_from_slice(&bytes[..width]);
    i64::from_be_bytes(be)
}
