// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Polymorphic data source
//!
//! A `Slave` is one addressable station: either a real device behind the RTU
//! client, or a pseudo-random source used for testing a deployment without
//! field wiring. Both expose the same read/write surface; the backend is a
//! plain sum type so dispatch is static and the serial handle has exactly one
//! owner.

use std::collections::HashMap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::config::LineConfig;
use crate::error::{Error, Result};
use crate::modbus::client::RtuClient;
use crate::modbus::types::{RegisterKind, ValueKind, WordEndianness};

/// One addressable station on the bus.
pub struct Slave {
    station_id: u8,
    name: String,
    backend: Backend,
}

enum Backend {
    Rtu(RtuClient),
    Random(RandomSlave),
}

/// Test backend: every configured address is bound to a normal distribution.
pub struct RandomSlave {
    sources: HashMap<u16, Normal<f64>>,
    rng: StdRng,
}

impl RandomSlave {
    fn new(sources: impl IntoIterator<Item = (u16, f64, f64)>) -> Result<Self> {
        let mut map = HashMap::new();
        for (address, mean, stdev) in sources {
            let dist = Normal::new(mean, stdev).map_err(|e| {
                Error::Config(format!(
                    "invalid random_mean_dev ({}, {}) for address {}: {}",
                    mean, stdev, address, e
                ))
            })?;
            map.insert(address, dist);
        }
        Ok(RandomSlave {
            sources: map,
            rng: StdRng::from_entropy(),
        })
    }

    fn sample(&mut self, address: u16) -> Result<f64> {
        let dist = self
            .sources
            .get(&address)
            .ok_or(Error::NotConfigured(address))?;
        Ok(dist.sample(&mut self.rng))
    }
}

impl Slave {
    /// Open an RTU-backed slave on a serial line.
    pub async fn open_rtu(
        station_id: u8,
        name: impl Into<String>,
        device: &str,
        line: &LineConfig,
        answer_timeout: Duration,
    ) -> Result<Self> {
        let client = RtuClient::connect(device, line, station_id, answer_timeout).await?;
        Ok(Slave {
            station_id,
            name: name.into(),
            backend: Backend::Rtu(client),
        })
    }

    /// Build a random slave; `sources` binds each register address to the
    /// `(mean, stdev)` of its normal distribution.
    pub fn random(
        station_id: u8,
        name: impl Into<String>,
        sources: impl IntoIterator<Item = (u16, f64, f64)>,
    ) -> Result<Self> {
        Ok(Slave {
            station_id,
            name: name.into(),
            backend: Backend::Random(RandomSlave::new(sources)?),
        })
    }

    pub fn id(&self) -> u8 {
        self.station_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read one typed value. The random backend ignores the register kind and
    /// endianness: it samples the distribution bound to `address`, rounds, and
    /// saturates into the integer domain.
    pub async fn read_typed(
        &mut self,
        kind: RegisterKind,
        address: u16,
        value_kind: ValueKind,
        endianness: WordEndianness,
    ) -> Result<i128> {
        match &mut self.backend {
            Backend::Rtu(client) => client.read_typed(kind, address, value_kind, endianness).await,
            Backend::Random(random) => Ok(random.sample(address)?.round() as i128),
        }
    }

    /// Raw register dump. The random backend samples one value per address in
    /// the range.
    pub async fn read_raw(
        &mut self,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        match &mut self.backend {
            Backend::Rtu(client) => client.read(kind, address, count).await,
            Backend::Random(random) => (0..count)
                .map(|i| {
                    let reg = address.checked_add(i).ok_or(Error::NotConfigured(address))?;
                    Ok(random.sample(reg)?.round() as u16)
                })
                .collect(),
        }
    }

    /// Write one holding register. Accepted and ignored by the random backend.
    pub async fn write_single(&mut self, address: u16, value: u16) -> Result<()> {
        match &mut self.backend {
            Backend::Rtu(client) => client.write_single(address, value).await,
            Backend::Random(_) => Ok(()),
        }
    }

    /// Write a register range. Accepted and ignored by the random backend.
    pub async fn write_multiple(&mut self, address: u16, words: &[u16]) -> Result<()> {
        match &mut self.backend {
            Backend::Rtu(client) => client.write_multiple(address, words).await,
            Backend::Random(_) => Ok(()),
        }
    }
}
