// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Measurement acquisition
//!
//! One sampling is: read the source register tuple, decode it, classify the
//! value against the acceptance thresholds, scale it, and hand the sample to
//! the reporter. Each scheduled measurement task is a thin wrapper around
//! [`run_measurement`], so tests can drive a sampling directly with a random
//! slave and a reporter.
//!
//! A sampling never propagates an error into the scheduler loop: transport
//! failures become ReadFailure samples, out-of-range values become
//! Underflow/Overflow samples, and the task stays armed for its next period.

pub mod reporter;

use log::{error, info, warn};

use crate::config::{MeasureConfig, SourceRegister};
use crate::error::Result;
use crate::modbus::slave::Slave;
use reporter::{Reporter, ServerKey};

/// Outcome class of one sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    /// Successfully read, in range; the scaled value is recorded
    Regular,
    /// The bus read failed; only counters move
    ReadFailure,
    /// Below the acceptance minimum
    Underflow,
    /// Above the acceptance maximum
    Overflow,
}

/// Classify a decoded register value against the source's thresholds.
///
/// The comparison happens in the signed or unsigned domain implied by the
/// value kind; for unsigned kinds the decoded value is reinterpreted
/// bit-preservingly.
pub fn classify(reg: i128, source: &SourceRegister) -> Result<SampleType> {
    let class = if source.value_kind.is_signed() {
        let value = reg as i64;
        if value < source.min_accept.as_signed()? {
            SampleType::Underflow
        } else if value > source.max_accept.as_signed()? {
            SampleType::Overflow
        } else {
            SampleType::Regular
        }
    } else {
        let value = reg as u64;
        if value < source.min_accept.as_unsigned()? {
            SampleType::Underflow
        } else if value > source.max_accept.as_unsigned()? {
            SampleType::Overflow
        } else {
            SampleType::Regular
        }
    };
    Ok(class)
}

fn scaled(reg: i128, source: &SourceRegister) -> f64 {
    let raw = if source.value_kind.is_signed() {
        reg as i64 as f64
    } else {
        reg as u64 as f64
    };
    raw * source.scale
}

/// Perform one sampling of `meas` against `slave` and record the outcome.
pub async fn run_measurement(
    slave: &mut Slave,
    key: &ServerKey,
    meas: &MeasureConfig,
    reporter: &mut Reporter,
    now: i64,
) {
    let source = &meas.source;
    let trace = format!(
        "{}->{}|{}@{}|{}|{}#{}{}",
        now,
        meas.period.as_secs(),
        slave.name(),
        slave.id(),
        meas.name,
        source.address,
        source.value_kind.word_count(),
        if source.value_kind.is_signed() { 'I' } else { 'U' },
    );

    let mut sample_type = SampleType::ReadFailure;
    let mut measurement = f64::NAN;

    match slave
        .read_typed(source.reg_type, source.address, source.value_kind, source.endianess)
        .await
    {
        Ok(reg) => match classify(reg, source) {
            Ok(SampleType::Regular) => {
                sample_type = SampleType::Regular;
                measurement = scaled(reg, source);
                info!("{}|{}({:#x})|{}", trace, reg, reg, measurement);
            }
            Ok(SampleType::Underflow) => {
                sample_type = SampleType::Underflow;
                warn!("{}|UNDERFLOW: {}", trace, reg);
            }
            Ok(SampleType::Overflow) => {
                sample_type = SampleType::Overflow;
                warn!("{}|OVERFLOW: {}", trace, reg);
            }
            Ok(SampleType::ReadFailure) => {}
            Err(e) => {
                error!("{}|CLASSIFY FAILED: {}", trace, e);
            }
        },
        Err(e) => {
            error!("{}|FAILED: {}", trace, e);
        }
    }

    if let Err(e) = reporter.add_measurement(key, &meas.name, now, measurement, sample_type) {
        error!("{}|{}", trace, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::bound::RangeBound;
    use crate::modbus::types::{RegisterKind, ValueKind, WordEndianness};

    fn source(kind: ValueKind, min: &str, max: &str) -> SourceRegister {
        SourceRegister {
            address: 10,
            reg_type: RegisterKind::Holding,
            endianess: WordEndianness::LittleWord,
            value_kind: kind,
            scale: 1.0,
            min_accept: RangeBound::parse(min, kind).unwrap(),
            max_accept: RangeBound::parse(max, kind).unwrap(),
            random_mean_dev: None,
        }
    }

    #[test]
    fn unsigned_classification() {
        let src = source(ValueKind::U16, "0", "1000");
        assert_eq!(classify(0, &src).unwrap(), SampleType::Regular);
        assert_eq!(classify(1000, &src).unwrap(), SampleType::Regular);
        assert_eq!(classify(1001, &src).unwrap(), SampleType::Overflow);
    }

    #[test]
    fn signed_classification() {
        let src = source(ValueKind::I16, "-100", "100");
        assert_eq!(classify(-100, &src).unwrap(), SampleType::Regular);
        assert_eq!(classify(-101, &src).unwrap(), SampleType::Underflow);
        assert_eq!(classify(101, &src).unwrap(), SampleType::Overflow);
    }

    #[test]
    fn unsigned_comparison_is_bit_preserving() {
        // -1 decoded through a signed path reinterprets as u64::MAX, which is
        // above any bounded acceptance window
        let src = source(ValueKind::U64, "0", "1000");
        assert_eq!(classify(-1, &src).unwrap(), SampleType::Overflow);
    }

    #[test]
    fn scaling_applies_after_classification() {
        let src = SourceRegister { scale: 0.5, ..source(ValueKind::I32, "-10", "10") };
        assert_eq!(scaled(-2, &src), -1.0);
        assert_eq!(scaled(3, &src), 1.5);
    }
}
