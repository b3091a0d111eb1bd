// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Per-period aggregation and report files
//!
//! The reporter owns one bucket per (server, measure) pair. Measurement tasks
//! submit classified samples; when the reporting period closes, statistics are
//! computed over the period's regular samples, one JSON file named after the
//! UTC close time (`YYMMDDhhmm.json`) is written to the output directory, and
//! the per-period state resets. Total counters persist for the lifetime of the
//! process.
//!
//! Statistics use the sample standard deviation (Bessel's correction); a
//! single-sample period reports a deviation of 0, an empty one reports no
//! statistics block at all. Values in the statistics block are rounded to 3
//! decimals; raw samples, when requested, are emitted verbatim.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;

use crate::acquisition::SampleType;
use crate::error::{Error, Result};

/// Identity of one reporting server: display name plus station id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerKey {
    pub name: String,
    pub id: u8,
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.id)
    }
}

/// Static description of a measure, echoed into every report.
#[derive(Debug, Clone, Serialize)]
pub struct MeasureDescriptor {
    /// Sampling period in seconds
    pub period: u64,
    /// The raw value is monotonic (e.g. an energy counter)
    pub accumulating: bool,
    /// Emit the period's raw samples alongside the statistics
    pub report_raw_samples: bool,
}

#[derive(Debug, Clone, Copy)]
struct Stats {
    min: f64,
    max: f64,
    mean: f64,
    stdev: f64,
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            min: f64::NAN,
            max: f64::NAN,
            mean: f64::NAN,
            stdev: f64::NAN,
        }
    }
}

#[derive(Debug, Default)]
struct Data {
    samples: Vec<(i64, f64)>,
    total_read_failures: u64,
    period_read_failures: u64,
    total_underflows: u64,
    period_underflows: u64,
    total_overflows: u64,
    period_overflows: u64,
    statistics: Stats,
}

impl Data {
    fn reset(&mut self) {
        self.samples.clear();
        self.period_read_failures = 0;
        self.period_underflows = 0;
        self.period_overflows = 0;
        self.statistics = Stats::default();
    }
}

#[derive(Debug)]
struct MeasResult {
    descriptor: MeasureDescriptor,
    data: Data,
}

/// Per-period sample aggregator and report writer.
pub struct Reporter {
    out_dir: PathBuf,
    results: BTreeMap<ServerKey, BTreeMap<String, MeasResult>>,
    period_id: u32,
}

// Report file shape

#[derive(Serialize)]
struct Report {
    when: i64,
    period_id: u32,
    servers: Vec<ServerReport>,
}

#[derive(Serialize)]
struct ServerReport {
    name: String,
    id: u8,
    results: Vec<MeasureReport>,
}

#[derive(Serialize)]
struct MeasureReport {
    measure_name: String,
    descriptor: MeasureDescriptor,
    data: DataReport,
}

#[derive(Serialize)]
struct DataReport {
    total_read_failures: u64,
    period_read_failures: u64,
    period_underflows: u64,
    total_underflows: u64,
    period_overflows: u64,
    total_overflows: u64,
    num_samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    statistics: Option<StatsReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    samples: Option<Vec<SampleReport>>,
}

#[derive(Serialize)]
struct StatsReport {
    min: f64,
    max: f64,
    mean: f64,
    stdev: f64,
}

#[derive(Serialize)]
struct SampleReport {
    t: i64,
    v: f64,
}

/// Round half away from zero at `digits` decimals. NaN stays NaN (and
/// serializes as null).
fn fixed_digits(number: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (number * factor).round() / factor
}

/// Compact UTC timestamp used for report file names.
pub fn to_compact_string(when: i64) -> Result<String> {
    let stamp = DateTime::<Utc>::from_timestamp(when, 0)
        .ok_or_else(|| Error::Config(format!("timestamp {} out of range", when)))?;
    Ok(stamp.format("%y%m%d%H%M").to_string())
}

impl Reporter {
    /// Create a reporter writing into `out_dir` (created if missing).
    pub fn new(out_dir: impl Into<PathBuf>) -> Result<Self> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir)?;
        Ok(Reporter {
            out_dir,
            results: BTreeMap::new(),
            period_id: 0,
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Register one measure; every (server, measure) pair may appear once.
    pub fn configure_measurement(
        &mut self,
        key: &ServerKey,
        meas_name: &str,
        descriptor: MeasureDescriptor,
    ) -> Result<()> {
        let for_server = self.results.entry(key.clone()).or_default();
        if for_server.contains_key(meas_name) {
            return Err(Error::DuplicateMeasurement {
                server: key.to_string(),
                measure: meas_name.to_string(),
            });
        }
        for_server.insert(
            meas_name.to_string(),
            MeasResult {
                descriptor,
                data: Data::default(),
            },
        );
        Ok(())
    }

    /// Record one classified sample. Only regular samples carry a value;
    /// the other classes move their period and total counters.
    pub fn add_measurement(
        &mut self,
        key: &ServerKey,
        meas_name: &str,
        when: i64,
        value: f64,
        sample_type: SampleType,
    ) -> Result<()> {
        let unknown = || Error::UnknownMeasurement {
            server: key.to_string(),
            measure: meas_name.to_string(),
        };

        let data = &mut self
            .results
            .get_mut(key)
            .ok_or_else(unknown)?
            .get_mut(meas_name)
            .ok_or_else(unknown)?
            .data;

        match sample_type {
            SampleType::Regular => data.samples.push((when, value)),
            SampleType::ReadFailure => {
                data.period_read_failures += 1;
                data.total_read_failures += 1;
            }
            SampleType::Underflow => {
                data.period_underflows += 1;
                data.total_underflows += 1;
            }
            SampleType::Overflow => {
                data.period_overflows += 1;
                data.total_overflows += 1;
            }
        }
        Ok(())
    }

    /// Close the current period: compute statistics, write one report file,
    /// reset per-period state. Returns the path of the written report.
    pub fn close_period(&mut self, now: i64) -> Result<PathBuf> {
        self.period_id += 1;
        info!("{}| closing period {}", now, self.period_id);

        let mut servers = Vec::with_capacity(self.results.len());
        for (key, for_server) in &mut self.results {
            let mut results = Vec::with_capacity(for_server.len());
            for (meas_name, result) in for_server.iter_mut() {
                let data = &mut result.data;

                let statistics = if data.samples.is_empty() {
                    None
                } else {
                    data.statistics = calculate_stats(&data.samples);
                    Some(StatsReport {
                        min: fixed_digits(data.statistics.min, 3),
                        max: fixed_digits(data.statistics.max, 3),
                        mean: fixed_digits(data.statistics.mean, 3),
                        stdev: fixed_digits(data.statistics.stdev, 3),
                    })
                };

                let samples = result.descriptor.report_raw_samples.then(|| {
                    data.samples
                        .iter()
                        .map(|&(t, v)| SampleReport { t, v })
                        .collect()
                });

                results.push(MeasureReport {
                    measure_name: meas_name.clone(),
                    descriptor: result.descriptor.clone(),
                    data: DataReport {
                        total_read_failures: data.total_read_failures,
                        period_read_failures: data.period_read_failures,
                        period_underflows: data.period_underflows,
                        total_underflows: data.total_underflows,
                        period_overflows: data.period_overflows,
                        total_overflows: data.total_overflows,
                        num_samples: data.samples.len(),
                        statistics,
                        samples,
                    },
                });

                data.reset();
            }

            servers.push(ServerReport {
                name: key.name.clone(),
                id: key.id,
                results,
            });
        }

        let report = Report {
            when: now,
            period_id: self.period_id,
            servers,
        };

        let path = self.out_dir.join(format!("{}.json", to_compact_string(now)?));
        fs::write(&path, serde_json::to_string_pretty(&report).map_err(|e| {
            Error::Config(format!("cannot serialize report: {}", e))
        })?)?;

        Ok(path)
    }
}

fn calculate_stats(samples: &[(i64, f64)]) -> Stats {
    let n = samples.len();
    let mut sum = 0.0;
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    for &(_, v) in samples {
        sum += v;
        min = min.min(v);
        max = max.max(v);
    }
    let mean = sum / n as f64;

    // Mean comes from the same data, hence the n - 1 denominator
    let stdev = if n == 1 {
        0.0
    } else {
        let accum: f64 = samples.iter().map(|&(_, v)| (v - mean) * (v - mean)).sum();
        (accum / (n - 1) as f64).sqrt()
    };

    Stats { min, max, mean, stdev }
}
