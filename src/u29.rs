//! Variable-length 29-bit integers.
//!
//! AMF3 prefixes every string, container and reference index with a U29:
//! one to four bytes, big-endian, where each of the first three bytes holds
//! seven significant bits plus a continuation flag in its high bit and the
//! fourth byte, when reached, contributes all eight of its bits.
//!
//! | value range              | bytes |
//! |--------------------------|-------|
//! | `0x0000_0000..=0x0000_007F` | 1 |
//! | `0x0000_0080..=0x0000_3FFF` | 2 |
//! | `0x0000_4000..=0x001F_FFFF` | 3 |
//! | `0x0020_0000..=0x1FFF_FFFF` | 4 |

use std::io::Write;

use crate::{Amf3Error, Result};

/// Largest value a U29 can carry.
pub const U29_MAX: u32 = 0x1FFF_FFFF;

/// Smallest `Int` that fits the 29-bit signed wire form.
pub const INT_MIN: i32 = -(1 << 28);

/// Largest `Int` that fits the 29-bit signed wire form.
pub const INT_MAX: i32 = (1 << 28) - 1;

/// Decode one U29 from the start of `bytes`.
///
/// Returns the value and the number of bytes consumed (1 to 4).
pub fn read_u29(bytes: &[u8]) -> Result<(u32, usize)> {
    read_u29_at(bytes, 0)
}

/// Decode one U29 starting at `start`; error offsets are absolute.
pub(crate) fn read_u29_at(bytes: &[u8], start: usize) -> Result<(u32, usize)> {
    let byte_at = |i: usize| -> Result<u8> {
        bytes
            .get(start + i)
            .copied()
            .ok_or(Amf3Error::TruncatedInput {
                offset: start + i,
                need: 1,
                remaining: 0,
            })
    };

    let mut value: u32 = 0;
    for i in 0..3 {
        let b = byte_at(i)?;
        if b & 0x80 == 0 {
            return Ok(((value << 7) | u32::from(b), i + 1));
        }
        value = (value << 7) | u32::from(b & 0x7f);
    }
    let b = byte_at(3)?;
    Ok(((value << 8) | u32::from(b), 4))
}

/// Number of bytes `write_u29` emits for `value`.
pub fn encoded_len(value: u32) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        _ => 4,
    }
}

/// Encode `value` as a U29.
///
/// Values above [`U29_MAX`] have no wire form and are rejected.
pub fn write_u29<W: Write + ?Sized>(writer: &mut W, value: u32) -> Result<()> {
    match value {
        0..=0x7f => writer.write_all(&[value as u8])?,
        0x80..=0x3fff => writer.write_all(&[((value >> 7) as u8) | 0x80, (value & 0x7f) as u8])?,
        0x4000..=0x1f_ffff => writer.write_all(&[
            ((value >> 14) as u8) | 0x80,
            (((value >> 7) & 0x7f) as u8) | 0x80,
            (value & 0x7f) as u8,
        ])?,
        0x20_0000..=U29_MAX => writer.write_all(&[
            ((value >> 22) as u8) | 0x80,
            (((value >> 15) & 0x7f) as u8) | 0x80,
            (((value >> 8) & 0x7f) as u8) | 0x80,
            (value & 0xff) as u8,
        ])?,
        _ => {
            return Err(Amf3Error::UnsupportedValue(format!(
                "{} exceeds the U29 maximum {}",
                value, U29_MAX
            )));
        }
    }
    Ok(())
}

/// Interpret a raw U29 as a signed 29-bit integer.
pub fn sign_extend(raw: u32) -> i32 {
    if raw > 0x0fff_ffff {
        (raw | 0xe000_0000) as i32
    } else {
        raw as i32
    }
}

/// Raw U29 bits for a signed integer, or `None` when it does not fit in 29 bits.
pub fn to_u29_bits(value: i32) -> Option<u32> {
    (INT_MIN..=INT_MAX)
        .contains(&value)
        .then_some((value as u32) & U29_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        write_u29(&mut buf, value).unwrap();
        buf
    }

    #[test]
    fn test_boundaries_round_trip_with_expected_widths() {
        let cases = [
            (0u32, 1usize),
            (127, 1),
            (128, 2),
            (16383, 2),
            (16384, 3),
            (2097151, 3),
            (2097152, 4),
            (268435455, 4),
            (U29_MAX, 4),
        ];
        for (value, width) in cases {
            let buf = encode(value);
            assert_eq!(buf.len(), width, "width of {}", value);
            assert_eq!(encoded_len(value), width);
            assert_eq!(read_u29(&buf).unwrap(), (value, width), "value {}", value);
        }
    }

    #[test]
    fn test_known_byte_patterns() {
        assert_eq!(encode(0x7f), [0x7f]);
        assert_eq!(encode(0x80), [0x81, 0x00]);
        assert_eq!(encode(0x3fff), [0xff, 0x7f]);
        assert_eq!(encode(0x4000), [0x81, 0x80, 0x00]);
        assert_eq!(encode(U29_MAX), [0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_fourth_byte_uses_all_eight_bits() {
        // high bit of the last byte is data, not a continuation flag
        let (value, used) = read_u29(&[0x80, 0x80, 0x80, 0xff, 0x01]).unwrap();
        assert_eq!(value, 0xff);
        assert_eq!(used, 4);
    }

    #[test]
    fn test_value_too_large_is_rejected() {
        let mut buf = Vec::new();
        assert!(matches!(
            write_u29(&mut buf, U29_MAX + 1),
            Err(Amf3Error::UnsupportedValue(_))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_truncated_sequence() {
        for bytes in [&[][..], &[0x81][..], &[0x81, 0x80][..], &[0xff, 0xff, 0xff][..]] {
            match read_u29(bytes) {
                Err(Amf3Error::TruncatedInput { offset, .. }) => assert_eq!(offset, bytes.len()),
                other => panic!("expected truncation for {:?}, got {:?}", bytes, other),
            }
        }
    }

    #[test]
    fn test_sign_extension() {
        assert_eq!(sign_extend(0x1fff_ffff), -1);
        assert_eq!(sign_extend(0x1000_0000), INT_MIN);
        assert_eq!(sign_extend(0x0fff_ffff), INT_MAX);
        assert_eq!(sign_extend(5), 5);

        assert_eq!(to_u29_bits(-1), Some(0x1fff_ffff));
        assert_eq!(to_u29_bits(INT_MAX), Some(0x0fff_ffff));
        assert_eq!(to_u29_bits(INT_MAX + 1), None);
        assert_eq!(to_u29_bits(INT_MIN - 1), None);
    }
}
