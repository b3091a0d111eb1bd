// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use std::fs;
use tempfile::tempdir;

use rust_modbus_crawler::acquisition::reporter::{MeasureDescriptor, Reporter, ServerKey};
use rust_modbus_crawler::acquisition::{run_measurement, SampleType};
use rust_modbus_crawler::config::{MeasureConfig, SourceRegister};
use rust_modbus_crawler::modbus::types::{RegisterKind, ValueKind, WordEndianness};
use rust_modbus_crawler::modbus::{RangeBound, Slave};
use rust_modbus_crawler::Error;

// 2023-11-14 22:15:00 UTC, on a 300 s boundary
const PERIOD_CLOSE: i64 = 1_700_000_100;

fn key() -> ServerKey {
    ServerKey {
        name: "PowerMeter".to_string(),
        id: 1,
    }
}

fn descriptor(report_raw_samples: bool) -> MeasureDescriptor {
    MeasureDescriptor {
        period: 10,
        accumulating: false,
        report_raw_samples,
    }
}

fn read_report(path: &std::path::Path) -> Result<serde_json::Value> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

fn measure_data<'a>(report: &'a serde_json::Value, measure: &str) -> &'a serde_json::Value {
    let results = report["servers"][0]["results"].as_array().unwrap();
    &results
        .iter()
        .find(|r| r["measure_name"] == measure)
        .unwrap()["data"]
}

#[test]
fn test_statistics_and_file_naming() -> Result<()> {
    let dir = tempdir()?;
    let mut reporter = Reporter::new(dir.path())?;

    reporter.configure_measurement(&key(), "voltage", descriptor(false))?;
    for (i, v) in [1.0, 2.0, 3.0].into_iter().enumerate() {
        reporter.add_measurement(&key(), "voltage", PERIOD_CLOSE - 9 + i as i64, v, SampleType::Regular)?;
    }

    let path = reporter.close_period(PERIOD_CLOSE)?;
    assert_eq!(path.file_name().unwrap(), "2311142215.json");

    let report = read_report(&path)?;
    assert_eq!(report["when"], PERIOD_CLOSE);
    assert_eq!(report["period_id"], 1);
    assert_eq!(report["servers"][0]["name"], "PowerMeter");
    assert_eq!(report["servers"][0]["id"], 1);

    let data = measure_data(&report, "voltage");
    assert_eq!(data["num_samples"], 3);
    assert_eq!(data["statistics"]["min"], 1.0);
    assert_eq!(data["statistics"]["max"], 3.0);
    assert_eq!(data["statistics"]["mean"], 2.0);
    assert_eq!(data["statistics"]["stdev"], 1.0);

    // Raw samples were not requested
    assert!(data.get("samples").is_none());
    Ok(())
}

#[test]
fn test_read_failure_accounting_across_periods() -> Result<()> {
    let dir = tempdir()?;
    let mut reporter = Reporter::new(dir.path())?;
    reporter.configure_measurement(&key(), "current", descriptor(false))?;

    reporter.add_measurement(&key(), "current", PERIOD_CLOSE - 4, 2.0, SampleType::Regular)?;
    reporter.add_measurement(&key(), "current", PERIOD_CLOSE - 3, f64::NAN, SampleType::ReadFailure)?;
    reporter.add_measurement(&key(), "current", PERIOD_CLOSE - 2, 4.0, SampleType::Regular)?;
    reporter.add_measurement(&key(), "current", PERIOD_CLOSE - 1, f64::NAN, SampleType::ReadFailure)?;

    let first = read_report(&reporter.close_period(PERIOD_CLOSE)?)?;
    let data = measure_data(&first, "current");
    assert_eq!(data["num_samples"], 2);
    assert_eq!(data["statistics"]["mean"], 3.0);
    assert_eq!(data["period_read_failures"], 2);
    assert_eq!(data["total_read_failures"], 2);

    // Period counters reset, totals persist
    reporter.add_measurement(&key(), "current", PERIOD_CLOSE + 5, f64::NAN, SampleType::ReadFailure)?;
    let second = read_report(&reporter.close_period(PERIOD_CLOSE + 300)?)?;
    let data = measure_data(&second, "current");
    assert_eq!(second["period_id"], 2);
    assert_eq!(data["num_samples"], 0);
    assert_eq!(data["period_read_failures"], 1);
    assert_eq!(data["total_read_failures"], 3);

    // No regular samples this period: the statistics block is absent
    assert!(data.get("statistics").is_none());
    Ok(())
}

#[test]
fn test_overflow_and_underflow_counters() -> Result<()> {
    let dir = tempdir()?;
    let mut reporter = Reporter::new(dir.path())?;
    reporter.configure_measurement(&key(), "level", descriptor(false))?;

    reporter.add_measurement(&key(), "level", PERIOD_CLOSE - 3, f64::NAN, SampleType::Overflow)?;
    reporter.add_measurement(&key(), "level", PERIOD_CLOSE - 2, f64::NAN, SampleType::Underflow)?;
    reporter.add_measurement(&key(), "level", PERIOD_CLOSE - 1, f64::NAN, SampleType::Overflow)?;

    let report = read_report(&reporter.close_period(PERIOD_CLOSE)?)?;
    let data = measure_data(&report, "level");
    assert_eq!(data["period_overflows"], 2);
    assert_eq!(data["total_overflows"], 2);
    assert_eq!(data["period_underflows"], 1);
    assert_eq!(data["total_underflows"], 1);
    assert_eq!(data["num_samples"], 0);
    Ok(())
}

#[test]
fn test_raw_samples_emitted_when_requested() -> Result<()> {
    let dir = tempdir()?;
    let mut reporter = Reporter::new(dir.path())?;
    reporter.configure_measurement(&key(), "trace", descriptor(true))?;

    reporter.add_measurement(&key(), "trace", PERIOD_CLOSE - 2, 1.25, SampleType::Regular)?;
    reporter.add_measurement(&key(), "trace", PERIOD_CLOSE - 1, -0.5, SampleType::Regular)?;

    let report = read_report(&reporter.close_period(PERIOD_CLOSE)?)?;
    let samples = measure_data(&report, "trace")["samples"].as_array().unwrap().clone();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0]["t"], PERIOD_CLOSE - 2);
    assert_eq!(samples[0]["v"], 1.25);
    assert_eq!(samples[1]["v"], -0.5);
    Ok(())
}

#[test]
fn test_duplicate_and_unknown_measures() -> Result<()> {
    let dir = tempdir()?;
    let mut reporter = Reporter::new(dir.path())?;

    reporter.configure_measurement(&key(), "volt", descriptor(false))?;
    let err = reporter
        .configure_measurement(&key(), "volt", descriptor(false))
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateMeasurement { .. }));

    let err = reporter
        .add_measurement(&key(), "nosuch", PERIOD_CLOSE, 1.0, SampleType::Regular)
        .unwrap_err();
    assert!(matches!(err, Error::UnknownMeasurement { .. }));
    Ok(())
}

#[test]
fn test_report_emits_even_when_everything_failed() -> Result<()> {
    let dir = tempdir()?;
    let mut reporter = Reporter::new(dir.path())?;
    reporter.configure_measurement(&key(), "dead", descriptor(false))?;

    reporter.add_measurement(&key(), "dead", PERIOD_CLOSE - 1, f64::NAN, SampleType::ReadFailure)?;

    let path = reporter.close_period(PERIOD_CLOSE)?;
    let report = read_report(&path)?;
    let data = measure_data(&report, "dead");
    assert_eq!(data["period_read_failures"], 1);
    assert!(data.get("statistics").is_none());
    Ok(())
}

fn random_measure(name: &str, address: u16, max: &str, scale: f64) -> MeasureConfig {
    let kind = ValueKind::U16;
    MeasureConfig {
        name: name.to_string(),
        period: std::time::Duration::from_secs(1),
        accumulating: false,
        report_raw_samples: false,
        source: SourceRegister {
            address,
            reg_type: RegisterKind::Holding,
            endianess: WordEndianness::LittleWord,
            value_kind: kind,
            scale,
            min_accept: RangeBound::min_of(kind),
            max_accept: RangeBound::parse(max, kind).unwrap(),
            random_mean_dev: None,
        },
    }
}

#[tokio::test]
async fn test_measurement_pipeline_with_random_slave() -> Result<()> {
    let dir = tempdir()?;
    let mut reporter = Reporter::new(dir.path())?;
    let server = ServerKey {
        name: "RANDOM".to_string(),
        id: 66,
    };

    // Deterministic distributions: stdev 0 always samples the mean
    let mut slave = Slave::random(66, "RANDOM", [(10u16, 100.0, 0.0), (11u16, 2000.0, 0.0)])?;

    let in_range = random_measure("in_range", 10, "1000", 0.5);
    let too_high = random_measure("too_high", 11, "1000", 1.0);
    let unconfigured = random_measure("unconfigured", 12, "1000", 1.0);

    for meas in [&in_range, &too_high, &unconfigured] {
        reporter.configure_measurement(
            &server,
            &meas.name,
            MeasureDescriptor {
                period: 1,
                accumulating: false,
                report_raw_samples: false,
            },
        )?;
    }

    run_measurement(&mut slave, &server, &in_range, &mut reporter, PERIOD_CLOSE - 1).await;
    run_measurement(&mut slave, &server, &too_high, &mut reporter, PERIOD_CLOSE - 1).await;
    run_measurement(&mut slave, &server, &unconfigured, &mut reporter, PERIOD_CLOSE - 1).await;

    let report = read_report(&reporter.close_period(PERIOD_CLOSE)?)?;

    // 100 (within bounds) scaled by 0.5
    let data = measure_data(&report, "in_range");
    assert_eq!(data["num_samples"], 1);
    assert_eq!(data["statistics"]["mean"], 50.0);

    // 2000 exceeds the acceptance maximum
    let data = measure_data(&report, "too_high");
    assert_eq!(data["period_overflows"], 1);
    assert_eq!(data["num_samples"], 0);

    // Address 12 is not configured on the random slave: a read failure
    let data = measure_data(&report, "unconfigured");
    assert_eq!(data["period_read_failures"], 1);
    assert_eq!(data["num_samples"], 0);
    Ok(())
}
