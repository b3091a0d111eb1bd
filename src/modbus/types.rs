// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register tuple interpretation
//!
//! A measurement source declares how many 16-bit registers it spans and how to
//! interpret them: signedness, width and word ordering. `decode_registers`
//! turns a register tuple into an `i128` wide enough for every kind (unsigned
//! 64-bit values stay non-negative); `encode_registers` is the inverse.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Scalar interpretation of a contiguous register tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    #[serde(rename = "INT16")]
    I16,
    #[serde(rename = "UINT16")]
    U16,
    #[serde(rename = "INT32")]
    I32,
    #[serde(rename = "UINT32")]
    U32,
    #[serde(rename = "INT64")]
    I64,
    #[serde(rename = "UINT64")]
    U64,
}

impl ValueKind {
    /// Whether the kind is interpreted in the signed domain.
    pub fn is_signed(self) -> bool {
        matches!(self, ValueKind::I16 | ValueKind::I32 | ValueKind::I64)
    }

    /// Number of 16-bit registers the kind spans: 1, 2 or 4.
    pub fn word_count(self) -> usize {
        match self {
            ValueKind::I16 | ValueKind::U16 => 1,
            ValueKind::I32 | ValueKind::U32 => 2,
            ValueKind::I64 | ValueKind::U64 => 4,
        }
    }

    /// Smallest representable value of the kind.
    pub fn min_value(self) -> i128 {
        match self {
            ValueKind::I16 => i16::MIN as i128,
            ValueKind::I32 => i32::MIN as i128,
            ValueKind::I64 => i64::MIN as i128,
            ValueKind::U16 | ValueKind::U32 | ValueKind::U64 => 0,
        }
    }

    /// Largest representable value of the kind.
    pub fn max_value(self) -> i128 {
        match self {
            ValueKind::I16 => i16::MAX as i128,
            ValueKind::U16 => u16::MAX as i128,
            ValueKind::I32 => i32::MAX as i128,
            ValueKind::U32 => u32::MAX as i128,
            ValueKind::I64 => i64::MAX as i128,
            ValueKind::U64 => u64::MAX as i128,
        }
    }

    /// Whether `value` is representable in the kind.
    pub fn contains(self, value: i128) -> bool {
        value >= self.min_value() && value <= self.max_value()
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::I16 => "INT16",
            ValueKind::U16 => "UINT16",
            ValueKind::I32 => "INT32",
            ValueKind::U32 => "UINT32",
            ValueKind::I64 => "INT64",
            ValueKind::U64 => "UINT64",
        };
        write!(f, "{}", name)
    }
}

/// Word ordering inside a multi-word value.
///
/// Byte order within each word is fixed big-endian by the bus specification;
/// this flag only selects whether the first register on the wire carries the
/// least or the most significant word. Irrelevant for 1-word kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WordEndianness {
    #[serde(rename = "little")]
    LittleWord,
    #[serde(rename = "big")]
    BigWord,
}

impl fmt::Display for WordEndianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WordEndianness::LittleWord => write!(f, "little"),
            WordEndianness::BigWord => write!(f, "big"),
        }
    }
}

/// Register space to read from; selects the read function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterKind {
    /// Read with function code 0x03
    #[serde(rename = "holding")]
    Holding,
    /// Read with function code 0x04
    #[serde(rename = "input")]
    Input,
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterKind::Holding => write!(f, "holding"),
            RegisterKind::Input => write!(f, "input"),
        }
    }
}

/// Decode a register tuple into the scalar it represents.
///
/// Signed kinds are sign-extended from their declared width, unsigned kinds
/// are zero-extended, so the result is exact in the `i128` domain. The tuple
/// length must match `kind.word_count()` exactly.
pub fn decode_registers(
    words: &[u16],
    kind: ValueKind,
    endianness: WordEndianness,
) -> Result<i128> {
    let count = kind.word_count();
    if words.len() != count {
        return Err(Error::KindMismatch(format!(
            "{} expects {} registers, got {}",
            kind,
            count,
            words.len()
        )));
    }

    // Normalize to most-significant word first
    let mut msf = [0u16; 4];
    for (i, w) in words.iter().enumerate() {
        match endianness {
            WordEndianness::BigWord => msf[i] = *w,
            WordEndianness::LittleWord => msf[count - 1 - i] = *w,
        }
    }

    let raw: u64 = msf[..count]
        .iter()
        .fold(0u64, |acc, w| (acc << 16) | *w as u64);

    let value = match kind {
        ValueKind::I16 => raw as u16 as i16 as i128,
        ValueKind::I32 => raw as u32 as i32 as i128,
        ValueKind::I64 => raw as i64 as i128,
        ValueKind::U16 | ValueKind::U32 | ValueKind::U64 => raw as i128,
    };

    Ok(value)
}

/// Encode a scalar into the register tuple that represents it.
///
/// Inverse of [`decode_registers`]; fails with a range error when `value` is
/// not representable in `kind`.
pub fn encode_registers(
    value: i128,
    kind: ValueKind,
    endianness: WordEndianness,
) -> Result<Vec<u16>> {
    if !kind.contains(value) {
        return Err(Error::Range(format!(
            "value {} not representable as {}",
            value, kind
        )));
    }

    let count = kind.word_count();
    let raw = value as u64; // two's complement truncation for negative values

    let mut words = Vec::with_capacity(count);
    for i in 0..count {
        // Most-significant word first, then reorder below
        let shift = 16 * (count - 1 - i);
        words.push((raw >> shift) as u16);
    }

    if endianness == WordEndianness::LittleWord {
        words.reverse();
    }

    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_extension_one_word() {
        // 0xFFFE is -2 as INT16 and 65534 as UINT16
        let words = [0xFFFEu16];
        let signed =
            decode_registers(&words, ValueKind::I16, WordEndianness::BigWord).unwrap();
        let unsigned =
            decode_registers(&words, ValueKind::U16, WordEndianness::BigWord).unwrap();
        assert_eq!(signed, -2);
        assert_eq!(unsigned, 65534);

        // One-word decodes ignore word order
        let little =
            decode_registers(&words, ValueKind::I16, WordEndianness::LittleWord).unwrap();
        assert_eq!(little, signed);
    }

    #[test]
    fn little_word_int32() {
        // LSW first: [0xFFFE, 0xFFFF] is 0xFFFFFFFE = -2 as INT32
        let words = [0xFFFEu16, 0xFFFF];
        let value =
            decode_registers(&words, ValueKind::I32, WordEndianness::LittleWord).unwrap();
        assert_eq!(value, -2);

        let big = decode_registers(&words, ValueKind::I32, WordEndianness::BigWord).unwrap();
        assert_eq!(big, 0xFFFE_FFFFu32 as i32 as i128);
    }

    #[test]
    fn unsigned_64_stays_positive() {
        let words = [0xFFFFu16, 0xFFFF, 0xFFFF, 0xFFFF];
        let value = decode_registers(&words, ValueKind::U64, WordEndianness::BigWord).unwrap();
        assert_eq!(value, u64::MAX as i128);
    }

    #[test]
    fn width_mismatch_rejected() {
        let words = [0u16, 0, 0];
        for kind in [
            ValueKind::I16,
            ValueKind::U16,
            ValueKind::I32,
            ValueKind::U32,
            ValueKind::I64,
            ValueKind::U64,
        ] {
            assert!(matches!(
                decode_registers(&words, kind, WordEndianness::BigWord),
                Err(Error::KindMismatch(_))
            ));
        }
    }

    #[test]
    fn round_trip_all_kinds() {
        let cases: &[(ValueKind, &[i128])] = &[
            (ValueKind::I16, &[i16::MIN as i128, -1, 0, 1, i16::MAX as i128]),
            (ValueKind::U16, &[0, 1, 0x8000, u16::MAX as i128]),
            (ValueKind::I32, &[i32::MIN as i128, -2, 0, i32::MAX as i128]),
            (ValueKind::U32, &[0, 0xDEAD_BEEF, u32::MAX as i128]),
            (ValueKind::I64, &[i64::MIN as i128, -1, 0, i64::MAX as i128]),
            (ValueKind::U64, &[0, 0x0123_4567_89AB_CDEF, u64::MAX as i128]),
        ];

        for &(kind, values) in cases {
            for &value in values {
                for endianness in [WordEndianness::LittleWord, WordEndianness::BigWord] {
                    let words = encode_registers(value, kind, endianness).unwrap();
                    assert_eq!(words.len(), kind.word_count());
                    let back = decode_registers(&words, kind, endianness).unwrap();
                    assert_eq!(back, value, "{} {} {}", kind, endianness, value);
                }
            }
        }
    }

    #[test]
    fn encode_rejects_unrepresentable() {
        assert!(encode_registers(-1, ValueKind::U16, WordEndianness::BigWord).is_err());
        assert!(encode_registers(65536, ValueKind::U16, WordEndianness::BigWord).is_err());
        assert!(
            encode_registers(i128::from(i64::MAX) + 1, ValueKind::I64, WordEndianness::BigWord)
                .is_err()
        );
    }
}
