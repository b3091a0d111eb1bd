// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Error handling for the crawler
//!
//! One consolidated error type covers the whole pipeline so callers can branch
//! on the failure class: configuration and threshold errors abort startup,
//! transport errors are absorbed by the measurement tasks as read-failure
//! samples, protocol errors abort a firmware upload with the failing stage.

use thiserror::Error;

/// Crawler error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file errors (missing fields, bad values, duplicates)
    #[error("configuration error: {0}")]
    Config(String),

    /// Bus I/O errors (timeout, framing, CRC, short response)
    #[error("transport error: {0}")]
    Transport(String),

    /// Threshold parse or overflow errors
    #[error("range error: {0}")]
    Range(String),

    /// A value was accessed in the wrong signedness domain, or a register
    /// tuple does not match its declared value kind
    #[error("kind mismatch: {0}")]
    KindMismatch(String),

    /// A measurement was configured twice for the same server
    #[error("duplicate measure: {measure} for server {server}")]
    DuplicateMeasurement { server: String, measure: String },

    /// A sample was submitted for a measurement nobody configured
    #[error("unknown measure: {measure} for server {server}")]
    UnknownMeasurement { server: String, measure: String },

    /// A random source has no distribution bound to this address
    #[error("random source: address {0} not configured")]
    NotConfigured(u16),

    /// Firmware upload aborted; `stage` names the protocol step that failed
    #[error("firmware upload aborted at '{stage}': {detail}")]
    Protocol { stage: String, detail: String },

    /// File-system errors (report files, log files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the crawler
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Process exit code for this failure class.
    ///
    /// Usage and validation problems exit with -1 (matching the CLI usage
    /// convention); runtime failures exit with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) | Error::Range(_) | Error::KindMismatch(_) => -1,
            _ => 1,
        }
    }
}
