// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the Modbus crawler

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{ArgAction, ArgGroup, Parser};
use log::error;

use rust_modbus_crawler::config::{read_config, LineConfig};
use rust_modbus_crawler::daemon;
use rust_modbus_crawler::error::{Error, Result};
use rust_modbus_crawler::logging;
use rust_modbus_crawler::modbus::bound::parse_int_literal;
use rust_modbus_crawler::modbus::firmware;
use rust_modbus_crawler::modbus::ops::{self, parse_regspec};
use rust_modbus_crawler::modbus::Slave;

/// Field-data acquisition agent for Modbus RTU equipment
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["measures_config", "single_read", "single_write", "file_transfer", "flash_update"])
))]
struct Args {
    /// Scheduler mode: periodically sample the measures described by this
    /// JSON configuration file
    #[arg(short = 'm', value_name = "CONFIG_FILE")]
    measures_config: Option<PathBuf>,

    /// Single read mode; operands: <register> <regspec = {1|2|4}{l|b} | Nr>
    #[arg(short = 'R')]
    single_read: bool,

    /// Single write mode; operands: <register> <value in [0..65535]>
    #[arg(short = 'W')]
    single_write: bool,

    /// File transfer mode; operands: <register> <filename>
    #[arg(short = 'F')]
    file_transfer: bool,

    /// Firmware update mode; operand: <filename-prefix>
    #[arg(short = 'U')]
    flash_update: bool,

    /// Reporting period in seconds (scheduler mode)
    #[arg(short = 'r', value_name = "SECONDS", default_value_t = 300)]
    reporting_period: u64,

    /// Output folder for the period reports (scheduler mode)
    #[arg(short = 'o', value_name = "DIR", default_value = "/tmp")]
    out_folder: PathBuf,

    /// Serial device of the bus
    #[arg(short = 'd', value_name = "DEVICE", default_value = "/dev/ttyCOM1")]
    device: String,

    /// Serial line configuration, baud:bits:parity:stops
    #[arg(short = 'c', value_name = "LINE_CONFIG", default_value = "9600:8:N:1")]
    line_config: String,

    /// Answer timeout in milliseconds
    #[arg(short = 'a', value_name = "MS", default_value_t = 500)]
    answering_time_ms: u64,

    /// Station id of the addressed device (one-shot modes)
    #[arg(short = 's', value_name = "STATION_ID")]
    station_id: Option<u8>,

    /// Log directory; logging stays on stderr when absent
    #[arg(short = 'l', value_name = "DIR")]
    log_path: Option<PathBuf>,

    /// Log rotation period in seconds
    #[arg(short = 't', value_name = "SECONDS", default_value_t = 3600)]
    log_rotation: u64,

    /// Increase verbosity (repeat for more)
    #[arg(short = 'v', action = ArgAction::Count)]
    verbose: u8,

    /// Operands of the selected mode
    #[arg(value_name = "OPERAND")]
    operands: Vec<String>,
}

fn parse_address(text: &str) -> Result<u16> {
    let value = parse_int_literal(text)?;
    u16::try_from(value)
        .map_err(|_| Error::Config(format!("invalid register address '{}'", text)))
}

async fn dispatch(args: Args) -> Result<()> {
    if let Some(config_file) = &args.measures_config {
        let config = read_config(config_file)?;
        if config.is_empty() {
            return Err(Error::Config("no enabled devices in configuration".into()));
        }

        let local = tokio::task::LocalSet::new();
        return local
            .run_until(daemon::run_crawler(
                config,
                Duration::from_secs(args.reporting_period),
                args.out_folder.clone(),
            ))
            .await;
    }

    // The one-shot modes address a single station over the shared serial
    // parameters
    let station_id = args
        .station_id
        .ok_or_else(|| Error::Config("missing mandatory -s <station_id>".into()))?;
    let line: LineConfig = args.line_config.parse()?;
    let answer_timeout = Duration::from_millis(args.answering_time_ms);

    let operand = |index: usize| -> Result<&str> {
        args.operands
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| Error::Config("missing mandatory operands for the selected mode".into()))
    };

    let mut slave = Slave::open_rtu(
        station_id,
        format!("Server_{}", station_id),
        &args.device,
        &line,
        answer_timeout,
    )
    .await?;

    if args.single_read {
        let address = parse_address(operand(0)?)?;
        let spec = parse_regspec(operand(1)?)?;
        ops::single_read(&mut slave, address, spec).await
    } else if args.single_write {
        let address = parse_address(operand(0)?)?;
        let text = operand(1)?;
        let value = parse_int_literal(text).ok().and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| {
                Error::Config(format!("invalid value '{}': must be in [0..65535]", text))
            })?;
        ops::single_write(&mut slave, address, value).await
    } else if args.file_transfer {
        let address = parse_address(operand(0)?)?;
        ops::file_transfer(&mut slave, address, Path::new(operand(1)?)).await
    } else if args.flash_update {
        firmware::flash_update(&mut slave, operand(0)?).await
    } else {
        // The clap group guarantees one mode is selected
        Err(Error::Config("no operation mode selected".into()))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            use clap::error::ErrorKind;
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => -1,
            };
            let _ = e.print();
            process::exit(code);
        }
    };

    if let Err(e) = logging::init(
        args.verbose,
        args.log_path.as_deref(),
        Duration::from_secs(args.log_rotation),
    ) {
        eprintln!("cannot initialize logging: {}", e);
        process::exit(-1);
    }

    if let Err(e) = dispatch(args).await {
        error!("{}", e);
        process::exit(e.exit_code());
    }
}
