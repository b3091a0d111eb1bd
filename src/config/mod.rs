// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the crawler
//!
//! The measurement campaign is described by a JSON file: an array of device
//! descriptors, each carrying its serial parameters and the list of measures
//! to sample. This module deserializes that file and turns it into validated
//! internal structures.
//!
//! ## Validation rules
//!
//! - unknown enum values (register type, value type, endianness) fail parsing
//! - station ids must be unique across enabled devices and within 1..=247
//! - measure names must be unique within a device
//! - acceptance thresholds must parse and fit the declared value kind, with
//!   `min ≤ max` in the kind's signed or unsigned domain
//! - `scale_factor` must be finite
//! - a measure with no `sampling_period` (or 0) inherits its device's period
//!
//! Disabled devices are dropped entirely; disabled measures are pruned from
//! enabled devices. A device entry without `serial_device` is a random source
//! used for testing: its measures sample normal distributions instead of the
//! bus.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::modbus::bound::RangeBound;
use crate::modbus::types::{RegisterKind, ValueKind, WordEndianness};

/// Serial line parameters in `baud:bits:parity:stops` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineConfig {
    pub baud: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Default for LineConfig {
    fn default() -> Self {
        LineConfig {
            baud: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

impl FromStr for LineConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = |detail: &str| Error::Config(format!("invalid line config '{}': {}", s, detail));

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 {
            return Err(bad("expected baud:bits:parity:stops"));
        }

        let baud: u32 = parts[0].parse().map_err(|_| bad("bad baud rate"))?;
        let data_bits: u8 = parts[1].parse().map_err(|_| bad("bad data bits"))?;
        if !(5..=8).contains(&data_bits) {
            return Err(bad("data bits must be 5..8"));
        }
        let parity = match parts[2] {
            "N" | "n" => Parity::None,
            "E" | "e" => Parity::Even,
            "O" | "o" => Parity::Odd,
            _ => return Err(bad("parity must be N, E or O")),
        };
        let stop_bits: u8 = parts[3].parse().map_err(|_| bad("bad stop bits"))?;
        if !(1..=2).contains(&stop_bits) {
            return Err(bad("stop bits must be 1 or 2"));
        }

        Ok(LineConfig {
            baud,
            data_bits,
            parity,
            stop_bits,
        })
    }
}

/// Serial transport of one device.
#[derive(Debug, Clone)]
pub struct SerialTransportConfig {
    pub device: String,
    pub line: LineConfig,
    pub answer_timeout: Duration,
}

/// How a device is reached.
#[derive(Debug, Clone)]
pub enum Transport {
    Serial(SerialTransportConfig),
    /// Test transport: measures sample per-address normal distributions
    Random,
}

/// Where and how one measurement reads its raw value.
#[derive(Debug, Clone)]
pub struct SourceRegister {
    pub address: u16,
    pub reg_type: RegisterKind,
    pub endianess: WordEndianness,
    pub value_kind: ValueKind,
    pub scale: f64,
    pub min_accept: RangeBound,
    pub max_accept: RangeBound,
    /// `(mean, stdev)` of the normal distribution backing this address on a
    /// random transport
    pub random_mean_dev: Option<(f64, f64)>,
}

/// One validated measurement descriptor.
#[derive(Debug, Clone)]
pub struct MeasureConfig {
    pub name: String,
    pub period: Duration,
    pub accumulating: bool,
    pub report_raw_samples: bool,
    pub source: SourceRegister,
}

/// One validated device descriptor with its measures.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub station_id: u8,
    pub name: String,
    pub transport: Transport,
    pub default_period: Duration,
    pub measures: Vec<MeasureConfig>,
}

/// Enabled devices keyed by station id.
pub type ConfigurationMap = BTreeMap<u8, DeviceConfig>;

// Wire shape of the JSON file. Most optional fields default to non-zero
// values, hence the explicit default functions instead of bare
// #[serde(default)] everywhere.

fn default_true() -> bool {
    true
}

fn default_line_config() -> String {
    "9600:8:N:1".to_string()
}

fn default_answering_time_ms() -> u64 {
    500
}

fn default_device_period() -> u64 {
    5
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeviceEntry {
    modbus_id: u8,
    name: String,
    #[serde(default)]
    serial_device: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_device_period")]
    sampling_period: u64,
    #[serde(default = "default_line_config")]
    line_config: String,
    #[serde(default = "default_answering_time_ms")]
    answering_time_ms: u64,
    measures: Vec<MeasureEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MeasureEntry {
    name: String,
    #[serde(default)]
    sampling_period: u64,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    accumulating: bool,
    #[serde(default)]
    report_raw_samples: bool,
    source: SourceEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SourceEntry {
    address: u16,
    endianess: WordEndianness,
    reg_type: RegisterKind,
    value_type: ValueKind,
    #[serde(default = "default_scale")]
    scale_factor: f64,
    #[serde(default)]
    min_read_value: Option<String>,
    #[serde(default)]
    max_read_value: Option<String>,
    #[serde(default)]
    random_mean_dev: Option<(f64, f64)>,
}

/// Load and validate the measurement configuration file.
pub fn read_config(path: &Path) -> Result<ConfigurationMap> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("cannot open {}: {}", path.display(), e)))?;
    let entries: Vec<DeviceEntry> = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

    let mut devices = ConfigurationMap::new();
    for entry in entries {
        if !entry.enabled {
            debug!("skipping disabled device '{}'", entry.name);
            continue;
        }

        let device = validate_device(entry)?;
        let station_id = device.station_id;
        if devices.insert(station_id, device).is_some() {
            return Err(Error::Config(format!("duplicate Modbus ID {}", station_id)));
        }
    }

    Ok(devices)
}

fn validate_device(entry: DeviceEntry) -> Result<DeviceConfig> {
    let here = |field: &str, detail: String| {
        Error::Config(format!("device '{}', {}: {}", entry.name, field, detail))
    };

    if !(1..=247).contains(&entry.modbus_id) {
        return Err(here("modbus_id", format!("{} outside 1..247", entry.modbus_id)));
    }
    if entry.sampling_period == 0 {
        return Err(here("sampling_period", "must be at least 1 second".into()));
    }

    let transport = match &entry.serial_device {
        Some(device) => Transport::Serial(SerialTransportConfig {
            device: device.clone(),
            line: entry.line_config.parse()?,
            answer_timeout: Duration::from_millis(entry.answering_time_ms),
        }),
        None => Transport::Random,
    };

    let default_period = Duration::from_secs(entry.sampling_period);

    let mut names = HashSet::new();
    let mut measures = Vec::new();
    for meas in &entry.measures {
        if !meas.enabled {
            debug!(
                "skipping disabled measure '{}' on device '{}'",
                meas.name, entry.name
            );
            continue;
        }
        if !names.insert(meas.name.clone()) {
            return Err(here("measures", format!("duplicate measure '{}'", meas.name)));
        }

        let period = if meas.sampling_period == 0 {
            default_period
        } else {
            Duration::from_secs(meas.sampling_period)
        };

        measures.push(MeasureConfig {
            name: meas.name.clone(),
            period,
            accumulating: meas.accumulating,
            report_raw_samples: meas.report_raw_samples,
            source: validate_source(&entry.name, &meas.name, &meas.source)?,
        });
    }

    Ok(DeviceConfig {
        station_id: entry.modbus_id,
        name: entry.name,
        transport,
        default_period,
        measures,
    })
}

fn validate_source(device: &str, measure: &str, source: &SourceEntry) -> Result<SourceRegister> {
    let here = |field: &str, detail: String| {
        Error::Config(format!(
            "device '{}', measure '{}', {}: {}",
            device, measure, field, detail
        ))
    };

    if !source.scale_factor.is_finite() {
        return Err(here("scale_factor", format!("{} is not finite", source.scale_factor)));
    }

    let kind = source.value_type;
    let min_accept = match &source.min_read_value {
        Some(text) => RangeBound::parse(text, kind)
            .map_err(|e| here("min_read_value", e.to_string()))?,
        None => RangeBound::min_of(kind),
    };
    let max_accept = match &source.max_read_value {
        Some(text) => RangeBound::parse(text, kind)
            .map_err(|e| here("max_read_value", e.to_string()))?,
        None => RangeBound::max_of(kind),
    };

    let ordered = if kind.is_signed() {
        min_accept.as_signed()? <= max_accept.as_signed()?
    } else {
        min_accept.as_unsigned()? <= max_accept.as_unsigned()?
    };
    if !ordered {
        return Err(here("min_read_value", "greater than max_read_value".into()));
    }

    if let Some((mean, stdev)) = source.random_mean_dev {
        if !mean.is_finite() || !stdev.is_finite() || stdev < 0.0 {
            return Err(here("random_mean_dev", format!("bad parameters ({}, {})", mean, stdev)));
        }
    }

    Ok(SourceRegister {
        address: source.address,
        reg_type: source.reg_type,
        endianess: source.endianess,
        value_kind: kind,
        scale: source.scale_factor,
        min_accept,
        max_accept,
        random_mean_dev: source.random_mean_dev,
    })
}
