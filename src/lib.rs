// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).
//! Modbus crawler library
//!
//! Field-data acquisition over Modbus RTU: periodic register sampling with
//! typed decoding and range validation, per-period statistics reports, and a
//! register-driven firmware upload protocol.

pub mod acquisition;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod modbus;

pub use error::{Error, Result};
