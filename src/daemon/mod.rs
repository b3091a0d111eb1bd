// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Scheduler mode
//!
//! Wires a validated configuration into a running acquisition loop: one slave
//! per device, one reporter bucket and one periodic task per measure, plus the
//! report flusher aligned on multiples of the reporting period. Everything
//! runs cooperatively on the current thread; SIGINT/SIGTERM stop the loop
//! after the in-flight task completes.

pub mod scheduler;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use log::{error, info, warn};

use crate::acquisition::reporter::{MeasureDescriptor, Reporter, ServerKey};
use crate::acquisition::run_measurement;
use crate::config::{ConfigurationMap, DeviceConfig, Transport};
use crate::error::Result;
use crate::modbus::slave::Slave;
use scheduler::{PeriodicScheduler, TaskFuture, TaskMode};

/// Run the measurement campaign until a shutdown signal arrives.
///
/// Must run inside a [`tokio::task::LocalSet`]; all tasks share the reporter
/// and the per-device slaves through `Rc` since the scheduler executes bodies
/// strictly one at a time.
pub async fn run_crawler(
    config: ConfigurationMap,
    reporting_period: Duration,
    out_dir: PathBuf,
) -> Result<()> {
    let reporter = Rc::new(RefCell::new(Reporter::new(out_dir)?));

    // Configure every bucket up front so duplicate measures surface before
    // the loop starts
    for device in config.values() {
        let key = ServerKey {
            name: device.name.clone(),
            id: device.station_id,
        };
        for meas in &device.measures {
            reporter.borrow_mut().configure_measurement(
                &key,
                &meas.name,
                MeasureDescriptor {
                    period: meas.period.as_secs(),
                    accumulating: meas.accumulating,
                    report_raw_samples: meas.report_raw_samples,
                },
            )?;
        }
    }

    let scheduler = PeriodicScheduler::new();

    for (station_id, device) in config {
        let slave = build_slave(&device).await?;
        info!(
            "configured slave {}@{} with {} measures",
            device.name,
            station_id,
            device.measures.len()
        );

        let slave = Rc::new(RefCell::new(slave));
        let key = ServerKey {
            name: device.name.clone(),
            id: station_id,
        };

        for meas in device.measures {
            let task_name = format!("Server_{}/{}", station_id, meas.name);
            let period = meas.period;

            let meas = Rc::new(meas);
            let key = key.clone();
            let slave = slave.clone();
            let reporter = reporter.clone();
            scheduler.add_task(
                task_name,
                period,
                TaskMode::AtStart,
                Box::new(move |now| {
                    let meas = meas.clone();
                    let key = key.clone();
                    let slave = slave.clone();
                    let reporter = reporter.clone();
                    Box::pin(async move {
                        run_measurement(
                            &mut slave.borrow_mut(),
                            &key,
                            &meas,
                            &mut reporter.borrow_mut(),
                            now,
                        )
                        .await;
                    }) as TaskFuture
                }),
            );
        }
    }

    let reporter_task = reporter.clone();
    scheduler.add_task(
        "ReportGenerator",
        reporting_period,
        TaskMode::AtMultiplesOfPeriod,
        Box::new(move |now| {
            let reporter = reporter_task.clone();
            Box::pin(async move {
                match reporter.borrow_mut().close_period(now) {
                    Ok(path) => info!("report written to {}", path.display()),
                    Err(e) => error!("cannot write report: {}", e),
                }
            }) as TaskFuture
        }),
    );

    let handle = scheduler.handle();
    tokio::task::spawn_local(async move {
        shutdown_signal().await;
        info!("shutdown requested, stopping scheduler");
        handle.shutdown();
    });

    let fired = scheduler.run().await;
    info!("scheduler loop ended after {} task firings", fired);
    Ok(())
}

async fn build_slave(device: &DeviceConfig) -> Result<Slave> {
    match &device.transport {
        Transport::Serial(serial) => {
            Slave::open_rtu(
                device.station_id,
                device.name.clone(),
                &serial.device,
                &serial.line,
                serial.answer_timeout,
            )
            .await
        }
        Transport::Random => {
            let sources = device.measures.iter().filter_map(|meas| {
                meas.source
                    .random_mean_dev
                    .map(|(mean, stdev)| (meas.source.address, mean, stdev))
            });
            Slave::random(device.station_id, device.name.clone(), sources)
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("cannot install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
