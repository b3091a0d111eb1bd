// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus RTU client
//!
//! `RtuClient` owns the serial session against one station and performs all
//! framed register I/O for it. Frame encoding, CRC-16 checksums and the
//! request/response pairing are handled by tokio-modbus; this layer adds the
//! answer timeout, response sanity checks, transparent chunking of large
//! multiple-register writes and link re-synchronization after an error.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tokio_serial::SerialStream;

use crate::config::{LineConfig, Parity};
use crate::error::{Error, Result};
use crate::modbus::types::{decode_registers, RegisterKind, ValueKind, WordEndianness};

/// Per-frame maximum for a multiple-register write (function 0x10).
pub const MAX_WRITE_WORDS: usize = 123;

/// Synchronous-style Modbus RTU master for a single station.
pub struct RtuClient {
    station_id: u8,
    device: String,
    line: LineConfig,
    answer_timeout: Duration,
    ctx: Option<Context>,
    resync: bool,
}

/// Run one bus call under the answer timeout and flatten the transport,
/// exception and timeout failure layers into a single transport error.
async fn bounded<T, E, X, F>(answer_timeout: Duration, what: &str, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<std::result::Result<T, X>, E>>,
    E: std::fmt::Display,
    X: std::fmt::Display,
{
    match timeout(answer_timeout, call).await {
        Err(_) => Err(Error::Transport(format!(
            "{}: no answer within {} ms",
            what,
            answer_timeout.as_millis()
        ))),
        Ok(Err(e)) => Err(Error::Transport(format!("{}: {}", what, e))),
        Ok(Ok(Err(exception))) => Err(Error::Transport(format!(
            "{}: device exception {}",
            what, exception
        ))),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

impl RtuClient {
    /// Open the serial line and attach a Modbus context for `station_id`.
    pub async fn connect(
        device: &str,
        line: &LineConfig,
        station_id: u8,
        answer_timeout: Duration,
    ) -> Result<Self> {
        let mut client = RtuClient {
            station_id,
            device: device.to_string(),
            line: line.clone(),
            answer_timeout,
            ctx: None,
            resync: false,
        };
        client.session()?;
        Ok(client)
    }

    fn open_stream(&self) -> Result<SerialStream> {
        let data_bits = match self.line.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };
        let parity = match self.line.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        };
        let stop_bits = match self.line.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let builder = tokio_serial::new(&self.device, self.line.baud)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(self.answer_timeout);

        SerialStream::open(&builder).map_err(|e| {
            Error::Transport(format!("cannot open serial device {}: {}", self.device, e))
        })
    }

    /// Return the live context, re-synchronizing the link first when the
    /// previous call ended in a protocol or transport error.
    fn session(&mut self) -> Result<&mut Context> {
        if self.resync {
            debug!(
                "station {}: re-synchronizing link on {}",
                self.station_id, self.device
            );
            self.ctx = None;
            self.resync = false;
        }
        if self.ctx.is_none() {
            let port = self.open_stream()?;
            self.ctx = Some(rtu::attach_slave(port, Slave(self.station_id)));
            debug!("station {}: serial session open on {}", self.station_id, self.device);
        }
        self.ctx
            .as_mut()
            .ok_or_else(|| Error::Transport("no bus session".into()))
    }

    fn fail(&mut self, err: Error) -> Error {
        self.resync = true;
        err
    }

    /// Read `count` registers with the function code selected by `kind`.
    pub async fn read(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        let answer_timeout = self.answer_timeout;
        let what = format!("read {} {}#{}", kind, address, count);

        let ctx = self.session()?;
        let outcome = match kind {
            RegisterKind::Holding => {
                bounded(answer_timeout, &what, ctx.read_holding_registers(address, count)).await
            }
            RegisterKind::Input => {
                bounded(answer_timeout, &what, ctx.read_input_registers(address, count)).await
            }
        };

        let words = outcome.map_err(|e| self.fail(e))?;
        if words.len() != count as usize {
            warn!("{}: short response ({} registers)", what, words.len());
            return Err(self.fail(Error::Transport(format!(
                "{}: requested {} registers, got {}",
                what,
                count,
                words.len()
            ))));
        }
        Ok(words)
    }

    /// Read and decode one typed value.
    pub async fn read_typed(
        &mut self,
        kind: RegisterKind,
        address: u16,
        value_kind: ValueKind,
        endianness: WordEndianness,
    ) -> Result<i128> {
        let words = self
            .read(kind, address, value_kind.word_count() as u16)
            .await?;
        decode_registers(&words, value_kind, endianness)
    }

    /// Write one holding register (function 0x06). The device must echo the
    /// request; a mismatched echo surfaces as a transport error.
    pub async fn write_single(&mut self, address: u16, value: u16) -> Result<()> {
        let answer_timeout = self.answer_timeout;
        let what = format!("write {}={:#06x}", address, value);

        let ctx = self.session()?;
        let outcome = bounded(answer_timeout, &what, ctx.write_single_register(address, value)).await;
        outcome.map_err(|e| self.fail(e))
    }

    /// Write a register range (function 0x10), transparently split into
    /// consecutive frames of at most [`MAX_WRITE_WORDS`] registers each.
    ///
    /// A failing frame reports its chunk index; earlier chunks stay written
    /// on the device.
    pub async fn write_multiple(&mut self, address: u16, words: &[u16]) -> Result<()> {
        if address as usize + words.len() > u16::MAX as usize + 1 {
            return Err(Error::Transport(format!(
                "write of {} registers at {} exceeds the address space",
                words.len(),
                address
            )));
        }

        let answer_timeout = self.answer_timeout;
        for (chunk_index, chunk) in words.chunks(MAX_WRITE_WORDS).enumerate() {
            let chunk_address = address + (chunk_index * MAX_WRITE_WORDS) as u16;
            let what = format!(
                "write chunk #{} ({} registers at {})",
                chunk_index,
                chunk.len(),
                chunk_address
            );

            let ctx = self.session()?;
            let outcome =
                bounded(answer_timeout, &what, ctx.write_multiple_registers(chunk_address, chunk))
                    .await;
            outcome.map_err(|e| self.fail(e))?;
        }
        Ok(())
    }

    pub fn station_id(&self) -> u8 {
        self.station_id
    }
}
