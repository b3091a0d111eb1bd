// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-crawler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Logging setup
//!
//! Console logging through env_logger, with the level derived from the number
//! of `-v` flags (info, debug, trace) unless `RUST_LOG` overrides it. When a
//! log directory is given, output goes to `modbus-crawler.log` in that
//! directory through a writer that rotates the file on a time basis, keeping
//! a fixed number of generations.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::Result;

const LOG_FILE_NAME: &str = "modbus-crawler.log";
const ROTATED_GENERATIONS: usize = 5;

/// Time-based rotating log file.
///
/// Rotation is checked on write: once the rotation period has elapsed, the
/// current file is renamed into the numbered generation chain
/// (`.1` newest, `.5` oldest) and a fresh file is opened.
pub struct RotatingWriter {
    path: PathBuf,
    period: Duration,
    keep: usize,
    opened_at: Instant,
    file: File,
}

impl RotatingWriter {
    pub fn open(path: PathBuf, period: Duration, keep: usize) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(RotatingWriter {
            path,
            period,
            keep,
            opened_at: Instant::now(),
            file,
        })
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        for generation in (1..self.keep).rev() {
            let from = rotated_name(&self.path, generation);
            if from.exists() {
                fs::rename(&from, rotated_name(&self.path, generation + 1))?;
            }
        }
        fs::rename(&self.path, rotated_name(&self.path, 1))?;

        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.opened_at = Instant::now();
        Ok(())
    }
}

fn rotated_name(path: &Path, generation: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}", generation));
    PathBuf::from(name)
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.opened_at.elapsed() >= self.period {
            self.rotate()?;
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Initialize logging for the process.
///
/// `verbosity` counts the `-v` occurrences on the command line; `log_dir`
/// switches output from stderr to a rotating file.
pub fn init(verbosity: u8, log_dir: Option<&Path>, rotation: Duration) -> Result<()> {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, default_level),
    );

    if let Some(dir) = log_dir {
        fs::create_dir_all(dir)?;
        let writer = RotatingWriter::open(dir.join(LOG_FILE_NAME), rotation, ROTATED_GENERATIONS)?;
        builder.target(env_logger::Target::Pipe(Box::new(writer)));
    }

    builder.init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_shifts_generations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");

        // Zero period: every write rotates first
        let mut writer =
            RotatingWriter::open(path.clone(), Duration::from_secs(0), 3).unwrap();
        writer.write_all(b"first\n").unwrap();
        writer.write_all(b"second\n").unwrap();
        writer.flush().unwrap();

        assert!(rotated_name(&path, 1).exists());
        assert!(rotated_name(&path, 2).exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
        assert_eq!(fs::read_to_string(rotated_name(&path, 1)).unwrap(), "first\n");
    }
}
