// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module provides the Modbus RTU master side of the crawler: typed
//! register access against field devices on a half-duplex serial bus, plus the
//! register-driven firmware upload protocol.
//!
//! ## Key Components
//!
//! - `ValueKind`, `WordEndianness`, `RegisterKind`: the scalar interpretation
//!   of a 1/2/4-word register tuple (`types`)
//! - `RangeBound`: sign-polymorphic acceptance thresholds (`bound`)
//! - `RtuClient`: framed read/write of register ranges against one station
//!   over tokio-modbus/tokio-serial (`client`)
//! - `Slave`: the polymorphic data source, either an RTU-backed device or a
//!   normally-distributed random source for testing (`slave`)
//! - one-shot operations for the CLI modes (`ops`) and the chunked firmware
//!   upload with CRC-32 verification (`firmware`)
//!
//! Byte order within a word on the wire is big-endian per the Modbus
//! specification and handled by the transport library; the types here only
//! deal with *word* ordering inside multi-word values.

pub mod bound;
pub mod client;
pub mod firmware;
pub mod ops;
pub mod slave;
pub mod types;

pub use bound::RangeBound;
pub use client::{RtuClient, MAX_WRITE_WORDS};
pub use slave::Slave;
pub use types::{decode_registers, encode_registers, RegisterKind, ValueKind, WordEndianness};
