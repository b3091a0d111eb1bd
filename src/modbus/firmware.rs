// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Firmware upload protocol
//!
//! The target device exposes a fixed register map through which a firmware
//! image is streamed: a command register, a 128-register staging buffer and
//! address/length/checksum registers. The image file is packed big-endian into
//! words, padded to a 4-byte multiple, and pushed in 256-byte flash lines;
//! total length and CRC-32 are written at the end so the device can verify the
//! transfer before committing.
//!
//! The whole write sequence is materialized as an [`UploadStep`] plan before
//! anything touches the bus; each step carries the protocol stage it belongs
//! to, which becomes the diagnostic when a transfer aborts mid-way.

use std::fs;
use std::path::Path;

use log::info;

use crate::error::{Error, Result};
use crate::modbus::slave::Slave;
use crate::modbus::types::{RegisterKind, ValueKind, WordEndianness};

/// Device register map for the flash update sequence.
pub mod registers {
    pub const REQUIRED_IMAGE_VERSION: u16 = 2992;
    pub const TOTAL_LEN_HIGH: u16 = 2993;
    pub const TOTAL_LEN_LOW: u16 = 2994;
    pub const CRC32_HIGH: u16 = 2995;
    pub const CRC32_LOW: u16 = 2996;
    pub const OFFSET_HIGH: u16 = 2997;
    pub const OFFSET_LOW: u16 = 2998;
    pub const CHUNK_LEN: u16 = 2999;
    pub const BUFFER: u16 = 3000;
    pub const COMMAND: u16 = 3128;
}

/// Command words accepted by the command register.
pub mod commands {
    pub const START: u16 = 0xE05D;
    pub const WRITE_SEGMENT: u16 = 0xF1A5;
    pub const DONE: u16 = 0xD01E;
}

/// One flash line as the device consumes it.
const FLASH_LINE_BYTES: usize = 256;
/// Half a flash line, the unit of one multiple-register write into the buffer.
const REGS_AT_ONCE: usize = FLASH_LINE_BYTES / 2 / 2;

/// Table-driven CRC-32 (reflected polynomial 0xEDB88320, ISO-HDLC).
pub struct Crc32 {
    table: [u32; 256],
}

impl Crc32 {
    pub fn new() -> Self {
        let polynomial: u32 = 0xEDB88320;
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut c = i as u32;
            for _ in 0..8 {
                c = if c & 1 != 0 { polynomial ^ (c >> 1) } else { c >> 1 };
            }
            *entry = c;
        }
        Crc32 { table }
    }

    /// Continue a checksum over `bytes`. Start from 0; the in/out XOR makes
    /// consecutive calls equivalent to one pass over the concatenated input.
    pub fn update(&self, initial: u32, bytes: &[u8]) -> u32 {
        let mut c = initial ^ 0xFFFF_FFFF;
        for &byte in bytes {
            c = self.table[((c ^ byte as u32) & 0xFF) as usize] ^ (c >> 8);
        }
        c ^ 0xFFFF_FFFF
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// A firmware image loaded into register form.
pub struct ImageWords {
    /// Big-endian packed words, zero-padded to a multiple of two words.
    pub words: Vec<u16>,
    /// CRC-32 over the padded byte stream.
    pub crc: u32,
}

impl ImageWords {
    /// Padded image length in bytes.
    pub fn byte_len(&self) -> usize {
        self.words.len() * 2
    }
}

/// Load a file as a register sequence: first byte becomes the high byte of
/// word 0, and the stream is zero-padded so the total is 4-byte aligned.
pub fn registers_from_file(path: &Path) -> Result<ImageWords> {
    let mut bytes = fs::read(path)
        .map_err(|e| Error::Config(format!("invalid filename {}: {}", path.display(), e)))?;

    let file_len = bytes.len();
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }

    let crc = Crc32::new().update(0, &bytes);
    let words = bytes
        .chunks_exact(2)
        .map(|pair| (pair[0] as u16) << 8 | pair[1] as u16)
        .collect::<Vec<u16>>();

    info!(
        "read {} bytes from {} into {} registers, CRC32 = {:#010x}",
        file_len,
        path.display(),
        words.len(),
        crc
    );

    Ok(ImageWords { words, crc })
}

/// One write in the upload sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Single { address: u16, value: u16 },
    Multiple { address: u16, words: Vec<u16> },
}

/// A write tagged with the protocol stage it belongs to.
#[derive(Debug, Clone)]
pub struct UploadStep {
    pub stage: String,
    pub op: WriteOp,
}

fn single(stage: impl Into<String>, address: u16, value: u16) -> UploadStep {
    UploadStep {
        stage: stage.into(),
        op: WriteOp::Single { address, value },
    }
}

fn multiple(stage: impl Into<String>, address: u16, words: &[u16]) -> UploadStep {
    UploadStep {
        stage: stage.into(),
        op: WriteOp::Multiple {
            address,
            words: words.to_vec(),
        },
    }
}

/// Lay out the full write sequence for an image.
///
/// Full 256-byte flash lines go out as two back-to-back 64-register writes
/// into the staging buffer; the 4-byte padding applied at load time guarantees
/// the tail splits cleanly into an optional 64-register sub-chunk plus a final
/// partial write.
pub fn upload_plan(image: &ImageWords) -> Vec<UploadStep> {
    use commands::*;
    use registers::*;

    let words = &image.words;
    let total_len_bytes = image.byte_len();
    let full_lines = total_len_bytes / FLASH_LINE_BYTES;

    let mut plan = Vec::new();
    plan.push(single("start command", COMMAND, START));

    let mut offset: u32 = 0;
    let mut idx = 0usize;
    for line in 0..full_lines {
        let stage = format!("flash line {} @ {:#x}", line, offset);
        plan.push(single(stage.clone(), OFFSET_HIGH, (offset >> 16) as u16));
        plan.push(single(stage.clone(), OFFSET_LOW, offset as u16));
        plan.push(multiple(stage.clone(), BUFFER, &words[idx..idx + REGS_AT_ONCE]));
        plan.push(multiple(
            stage.clone(),
            BUFFER + REGS_AT_ONCE as u16,
            &words[idx + REGS_AT_ONCE..idx + 2 * REGS_AT_ONCE],
        ));
        plan.push(single(stage.clone(), CHUNK_LEN, FLASH_LINE_BYTES as u16));
        plan.push(single(stage, COMMAND, WRITE_SEGMENT));

        idx += 2 * REGS_AT_ONCE;
        offset += FLASH_LINE_BYTES as u32;
    }

    let remaining_bytes = total_len_bytes % FLASH_LINE_BYTES;
    if remaining_bytes > 0 {
        let stage = format!("flash tail @ {:#x}", offset);
        plan.push(single(stage.clone(), OFFSET_HIGH, (offset >> 16) as u16));
        plan.push(single(stage.clone(), OFFSET_LOW, offset as u16));

        let mut buffer = BUFFER;
        let remaining_words = remaining_bytes / 2;
        if remaining_words >= REGS_AT_ONCE {
            plan.push(multiple(stage.clone(), buffer, &words[idx..idx + REGS_AT_ONCE]));
            idx += REGS_AT_ONCE;
            buffer += REGS_AT_ONCE as u16;
        }
        let final_words = remaining_words % REGS_AT_ONCE;
        if final_words > 0 {
            plan.push(multiple(stage.clone(), buffer, &words[idx..idx + final_words]));
        }

        plan.push(single(stage.clone(), CHUNK_LEN, remaining_bytes as u16));
        plan.push(single(stage, COMMAND, WRITE_SEGMENT));
    }

    plan.push(single("total length", TOTAL_LEN_HIGH, (total_len_bytes >> 16) as u16));
    plan.push(single("total length", TOTAL_LEN_LOW, total_len_bytes as u16));
    plan.push(single("checksum", CRC32_HIGH, (image.crc >> 16) as u16));
    plan.push(single("checksum", CRC32_LOW, image.crc as u16));
    plan.push(single("done command", COMMAND, DONE));

    plan
}

/// Drive a complete firmware update against `slave`.
///
/// The device names the image it wants through its version register; the file
/// `<prefix><version>.bin` is loaded, checksummed and streamed. Any transport
/// failure aborts with the stage that was in flight; there is no retry.
pub async fn flash_update(slave: &mut Slave, image_prefix: &str) -> Result<()> {
    let version = slave
        .read_typed(
            RegisterKind::Holding,
            registers::REQUIRED_IMAGE_VERSION,
            ValueKind::U16,
            WordEndianness::LittleWord,
        )
        .await
        .map_err(|e| Error::Protocol {
            stage: "read required image version".into(),
            detail: e.to_string(),
        })?;

    info!("device requires fw image {}", version);

    let filename = format!("{}{}.bin", image_prefix, version);
    let image = registers_from_file(Path::new(&filename))?;

    if image.words.len() > 3 {
        let reset_vector = (image.words[3] as u32) << 16 | image.words[2] as u32;
        info!("requested image ResetHandler @ {:#x}", reset_vector);
    }

    for step in upload_plan(&image) {
        let outcome = match &step.op {
            WriteOp::Single { address, value } => slave.write_single(*address, *value).await,
            WriteOp::Multiple { address, words } => slave.write_multiple(*address, words).await,
        };
        outcome.map_err(|e| Error::Protocol {
            stage: step.stage.clone(),
            detail: e.to_string(),
        })?;
    }

    info!("flash update completed ({} bytes)", image.byte_len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::commands::*;
    use super::registers::*;
    use super::*;
    use std::io::Write;

    #[test]
    fn crc32_reference_vector() {
        let crc = Crc32::new();
        assert_eq!(crc.update(0, b"123456789"), 0xCBF43926);
    }

    #[test]
    fn crc32_incremental_matches_one_shot() {
        let crc = Crc32::new();
        let whole = crc.update(0, b"hello world");
        let split = crc.update(crc.update(0, b"hello "), b"world");
        assert_eq!(whole, split);
    }

    #[test]
    fn image_padding_and_checksum() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x01]).unwrap();

        let image = registers_from_file(file.path()).unwrap();
        assert_eq!(image.words, vec![0x0100, 0x0000]);
        assert_eq!(image.byte_len(), 4);
        assert_eq!(image.crc, Crc32::new().update(0, &[0x01, 0x00, 0x00, 0x00]));
    }

    #[test]
    fn plan_single_full_line() {
        let words: Vec<u16> = (0..128).collect();
        let image = ImageWords { words: words.clone(), crc: 0xAABB_CCDD };
        let plan = upload_plan(&image);

        assert_eq!(plan[0].op, WriteOp::Single { address: COMMAND, value: START });
        assert_eq!(plan[1].op, WriteOp::Single { address: OFFSET_HIGH, value: 0 });
        assert_eq!(plan[2].op, WriteOp::Single { address: OFFSET_LOW, value: 0 });
        assert_eq!(
            plan[3].op,
            WriteOp::Multiple { address: BUFFER, words: words[..64].to_vec() }
        );
        assert_eq!(
            plan[4].op,
            WriteOp::Multiple { address: BUFFER + 64, words: words[64..].to_vec() }
        );
        assert_eq!(plan[5].op, WriteOp::Single { address: CHUNK_LEN, value: 256 });
        assert_eq!(plan[6].op, WriteOp::Single { address: COMMAND, value: WRITE_SEGMENT });

        // Trailer: total length, checksum, done
        let tail = &plan[7..];
        assert_eq!(tail[0].op, WriteOp::Single { address: TOTAL_LEN_HIGH, value: 0 });
        assert_eq!(tail[1].op, WriteOp::Single { address: TOTAL_LEN_LOW, value: 256 });
        assert_eq!(tail[2].op, WriteOp::Single { address: CRC32_HIGH, value: 0xAABB });
        assert_eq!(tail[3].op, WriteOp::Single { address: CRC32_LOW, value: 0xCCDD });
        assert_eq!(tail[4].op, WriteOp::Single { address: COMMAND, value: DONE });
        assert_eq!(tail.len(), 5);
    }

    #[test]
    fn plan_tail_with_subchunk() {
        // 256 + 128 + 4 bytes: one full line, then a tail of one 64-register
        // sub-chunk plus a final 2-register write
        let words: Vec<u16> = (0..194).collect();
        let image = ImageWords { words: words.clone(), crc: 0 };
        let plan = upload_plan(&image);

        let tail_offset: Vec<&UploadStep> =
            plan.iter().filter(|s| s.stage.starts_with("flash tail")).collect();
        assert_eq!(
            tail_offset[0].op,
            WriteOp::Single { address: OFFSET_HIGH, value: 0 }
        );
        assert_eq!(
            tail_offset[1].op,
            WriteOp::Single { address: OFFSET_LOW, value: 256 }
        );
        assert_eq!(
            tail_offset[2].op,
            WriteOp::Multiple { address: BUFFER, words: words[128..192].to_vec() }
        );
        assert_eq!(
            tail_offset[3].op,
            WriteOp::Multiple { address: BUFFER + 64, words: words[192..].to_vec() }
        );
        assert_eq!(
            tail_offset[4].op,
            WriteOp::Single { address: CHUNK_LEN, value: 132 }
        );
        assert_eq!(
            tail_offset[5].op,
            WriteOp::Single { address: COMMAND, value: WRITE_SEGMENT }
        );
    }

    #[test]
    fn plan_short_tail_only() {
        // 4 bytes: no full line, no sub-chunk, a single 2-register tail write
        let image = ImageWords { words: vec![0x1122, 0x3344], crc: 0 };
        let plan = upload_plan(&image);

        assert_eq!(plan[0].op, WriteOp::Single { address: COMMAND, value: START });
        assert_eq!(
            plan[3].op,
            WriteOp::Multiple { address: BUFFER, words: vec![0x1122, 0x3344] }
        );
        assert_eq!(plan[4].op, WriteOp::Single { address: CHUNK_LEN, value: 4 });
    }

    #[tokio::test]
    async fn flash_update_against_random_slave() {
        // The random backend answers the version register and swallows all
        // writes, which exercises the full sequencing path end to end.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw42.bin");
        std::fs::write(&path, (0u16..300).flat_map(|w| w.to_be_bytes()).collect::<Vec<u8>>())
            .unwrap();

        let mut slave = Slave::random(
            9,
            "RANDOM",
            [(registers::REQUIRED_IMAGE_VERSION, 42.0, 0.0)],
        )
        .unwrap();

        let prefix = dir.path().join("fw");
        flash_update(&mut slave, prefix.to_str().unwrap()).await.unwrap();
    }
}
