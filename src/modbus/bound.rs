// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Acceptance thresholds
//!
//! A `RangeBound` holds one threshold value that must be representable in its
//! declared value kind. The stored value lives in the signed or unsigned
//! domain implied by the kind; the accessor for the other domain fails fast
//! instead of silently reinterpreting.

use crate::error::{Error, Result};
use crate::modbus::types::ValueKind;

/// One acceptance threshold, tagged by the value kind it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeBound {
    kind: ValueKind,
    value: BoundValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundValue {
    Signed(i64),
    Unsigned(u64),
}

impl RangeBound {
    /// The smallest value of `kind`.
    pub fn min_of(kind: ValueKind) -> Self {
        let value = if kind.is_signed() {
            BoundValue::Signed(kind.min_value() as i64)
        } else {
            BoundValue::Unsigned(0)
        };
        RangeBound { kind, value }
    }

    /// The largest value of `kind`.
    pub fn max_of(kind: ValueKind) -> Self {
        let value = if kind.is_signed() {
            BoundValue::Signed(kind.max_value() as i64)
        } else {
            BoundValue::Unsigned(kind.max_value() as u64)
        };
        RangeBound { kind, value }
    }

    /// Parse a threshold from its textual form.
    ///
    /// Accepts decimal, hex with a `0x` prefix and octal with a leading `0`
    /// (the classic `strtol` base-0 behavior). Negative literals are rejected
    /// for unsigned kinds; any literal outside the kind's range is rejected.
    pub fn parse(text: &str, kind: ValueKind) -> Result<Self> {
        let value = parse_int_literal(text)?;

        if value < 0 && !kind.is_signed() {
            return Err(Error::Range(format!(
                "negative threshold '{}' for unsigned kind {}",
                text, kind
            )));
        }
        if !kind.contains(value) {
            return Err(Error::Range(format!(
                "threshold '{}' out of range for {}",
                text, kind
            )));
        }

        let value = if kind.is_signed() {
            BoundValue::Signed(value as i64)
        } else {
            BoundValue::Unsigned(value as u64)
        };
        Ok(RangeBound { kind, value })
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// The threshold in the signed domain; fails for unsigned kinds.
    pub fn as_signed(&self) -> Result<i64> {
        match self.value {
            BoundValue::Signed(v) => Ok(v),
            BoundValue::Unsigned(_) => Err(Error::KindMismatch(format!(
                "as_signed() on an unsigned {} bound",
                self.kind
            ))),
        }
    }

    /// The threshold in the unsigned domain; fails for signed kinds.
    pub fn as_unsigned(&self) -> Result<u64> {
        match self.value {
            BoundValue::Unsigned(v) => Ok(v),
            BoundValue::Signed(_) => Err(Error::KindMismatch(format!(
                "as_unsigned() on a signed {} bound",
                self.kind
            ))),
        }
    }
}

/// Parse an integer literal with `strtol`-style base detection: `0x` prefix
/// for hex, leading `0` for octal, decimal otherwise. Shared by the threshold
/// parser and the CLI operand parsing.
pub fn parse_int_literal(text: &str) -> Result<i128> {
    let trimmed = text.trim();
    let bad = || Error::Range(format!("invalid integer literal '{}'", text));

    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    if digits.is_empty() {
        return Err(bad());
    }

    let (radix, digits) = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };

    let magnitude = u128::from_str_radix(digits, radix).map_err(|_| bad())?;
    if magnitude > u64::MAX as u128 {
        return Err(Error::Range(format!("integer literal '{}' too large", text)));
    }

    let value = magnitude as i128;
    Ok(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_bases() {
        assert_eq!(parse_int_literal("100").unwrap(), 100);
        assert_eq!(parse_int_literal("-100").unwrap(), -100);
        assert_eq!(parse_int_literal("0x1F").unwrap(), 31);
        assert_eq!(parse_int_literal("0X1f").unwrap(), 31);
        assert_eq!(parse_int_literal("017").unwrap(), 15);
        assert_eq!(parse_int_literal("0").unwrap(), 0);
        assert!(parse_int_literal("").is_err());
        assert!(parse_int_literal("12abc").is_err());
    }

    #[test]
    fn unsigned_rejects_negative() {
        assert!(matches!(
            RangeBound::parse("-1", ValueKind::U16),
            Err(Error::Range(_))
        ));
        assert!(RangeBound::parse("-1", ValueKind::I16).is_ok());
    }

    #[test]
    fn out_of_range_rejected() {
        assert!(RangeBound::parse("65536", ValueKind::U16).is_err());
        assert!(RangeBound::parse("32768", ValueKind::I16).is_err());
        assert!(RangeBound::parse("65535", ValueKind::U16).is_ok());
        assert!(RangeBound::parse("-32768", ValueKind::I16).is_ok());
    }

    #[test]
    fn accessors_check_domain() {
        let signed = RangeBound::parse("-5", ValueKind::I32).unwrap();
        assert_eq!(signed.as_signed().unwrap(), -5);
        assert!(matches!(signed.as_unsigned(), Err(Error::KindMismatch(_))));

        let unsigned = RangeBound::parse("5", ValueKind::U32).unwrap();
        assert_eq!(unsigned.as_unsigned().unwrap(), 5);
        assert!(matches!(unsigned.as_signed(), Err(Error::KindMismatch(_))));
    }

    #[test]
    fn kind_limits() {
        assert_eq!(RangeBound::min_of(ValueKind::I16).as_signed().unwrap(), -32768);
        assert_eq!(RangeBound::max_of(ValueKind::I16).as_signed().unwrap(), 32767);
        assert_eq!(RangeBound::min_of(ValueKind::U64).as_unsigned().unwrap(), 0);
        assert_eq!(
            RangeBound::max_of(ValueKind::U64).as_unsigned().unwrap(),
            u64::MAX
        );
    }
}
