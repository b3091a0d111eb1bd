// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! One-shot bus operations backing the `-R`, `-W` and `-F` CLI modes.

use std::path::Path;

use log::info;

use crate::error::{Error, Result};
use crate::modbus::bound::parse_int_literal;
use crate::modbus::firmware::registers_from_file;
use crate::modbus::slave::Slave;
use crate::modbus::types::{decode_registers, RegisterKind, ValueKind, WordEndianness};

/// Parsed form of the `<regspec>` CLI operand.
///
/// `{1|2|4}{l|b}` selects a typed read (word count and word endianness, the
/// value decoded sign-extended); `<N>r` selects a raw dump of N registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegSpec {
    Typed {
        kind: ValueKind,
        endianness: WordEndianness,
    },
    Raw {
        count: u16,
    },
}

/// Parse a regspec operand.
pub fn parse_regspec(spec: &str) -> Result<RegSpec> {
    let bad = || Error::Config(format!("invalid regspec '{}'", spec));

    if spec.len() < 2 {
        return Err(bad());
    }

    let (head, last) = spec.split_at(spec.len() - 1);
    match last {
        "r" => {
            let count = parse_int_literal(head)?;
            let count = u16::try_from(count).map_err(|_| bad())?;
            if count == 0 {
                return Err(bad());
            }
            Ok(RegSpec::Raw { count })
        }
        "l" | "b" => {
            let kind = match head {
                "1" => ValueKind::I16,
                "2" => ValueKind::I32,
                "4" => ValueKind::I64,
                _ => return Err(Error::Config(format!(
                    "regspec '{}': register count must be 1, 2 or 4",
                    spec
                ))),
            };
            let endianness = if last == "l" {
                WordEndianness::LittleWord
            } else {
                WordEndianness::BigWord
            };
            Ok(RegSpec::Typed { kind, endianness })
        }
        _ => Err(bad()),
    }
}

/// Read holding registers once and log the result.
pub async fn single_read(slave: &mut Slave, address: u16, spec: RegSpec) -> Result<()> {
    match spec {
        RegSpec::Raw { count } => {
            let registers = slave.read_raw(RegisterKind::Holding, address, count).await?;
            for (i, reg) in registers.iter().enumerate() {
                info!(
                    "RAW READ: {:#08x}: {:#06x} (dec {:>10})",
                    address as usize + i * 2,
                    reg,
                    reg
                );
            }
        }
        RegSpec::Typed { kind, endianness } => {
            let words = slave
                .read_raw(RegisterKind::Holding, address, kind.word_count() as u16)
                .await?;
            let value = decode_registers(&words, kind, endianness)?;
            info!("SINGLE READ REGISTER {}: {}", address, value);
        }
    }
    Ok(())
}

/// Write one holding register.
pub async fn single_write(slave: &mut Slave, address: u16, value: u16) -> Result<()> {
    slave.write_single(address, value).await?;
    info!("SINGLE WRITE REGISTER {}: {}", address, value);
    Ok(())
}

/// Bulk-write a whole file (packed and padded as registers) at `address`.
pub async fn file_transfer(slave: &mut Slave, address: u16, path: &Path) -> Result<()> {
    let image = registers_from_file(path)?;
    slave.write_multiple(address, &image.words).await?;
    info!("FILE TRANSFER completed ({} registers)", image.words.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regspec_typed() {
        assert_eq!(
            parse_regspec("1l").unwrap(),
            RegSpec::Typed { kind: ValueKind::I16, endianness: WordEndianness::LittleWord }
        );
        assert_eq!(
            parse_regspec("2b").unwrap(),
            RegSpec::Typed { kind: ValueKind::I32, endianness: WordEndianness::BigWord }
        );
        assert_eq!(
            parse_regspec("4l").unwrap(),
            RegSpec::Typed { kind: ValueKind::I64, endianness: WordEndianness::LittleWord }
        );
    }

    #[test]
    fn regspec_raw() {
        assert_eq!(parse_regspec("8r").unwrap(), RegSpec::Raw { count: 8 });
        assert_eq!(parse_regspec("0x10r").unwrap(), RegSpec::Raw { count: 16 });
    }

    #[test]
    fn regspec_rejects_garbage() {
        for spec in ["", "l", "3l", "5b", "2x", "0r", "-1r", "1Lb"] {
            assert!(parse_regspec(spec).is_err(), "{:?} should be rejected", spec);
        }
    }
}
