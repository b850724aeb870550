// src/utils/logging.rs
//! Logging configuration
//!
//! `env_logger` with a compact `[ts LEVEL module:line] message` format.
//! `--debug` raises the default filter to `Debug` (an explicit `RUST_LOG`
//! still wins), and `--logfile` tees everything written to the console
//! into a log file as well.

use env_logger::{Builder, Target};
use log::LevelFilter;
use std::env;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

/// Initializes the logging subsystem.
///
/// # Arguments
/// * `debug` - Default to `Debug` level instead of `Info`
/// * `logfile` - Mirror output into this file in addition to stdout
pub fn init_logging(debug: bool, logfile: Option<&Path>) {
    let mut builder = Builder::new();

    builder.format(|buf, record| {
        let ts = buf.timestamp_seconds();
        writeln!(
            buf,
            "[{} {} {}:{}] {}",
            ts,
            record.level(),
            record.module_path().unwrap_or_default(),
            record.line().unwrap_or(0),
            record.args()
        )
    });

    if env::var("RUST_LOG").is_ok() {
        builder.parse_env("RUST_LOG");
    } else {
        builder.filter_level(if debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        });
    }

    match logfile {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(Tee { file })));
            }
            Err(e) => {
                eprintln!("failed to open log file {}: {}", path.display(), e);
                builder.target(Target::Stdout);
            }
        },
        None => {
            builder.target(Target::Stdout);
        }
    }

    builder.init();
}

/// Writes to stdout and the log file in one pass.
struct Tee {
    file: std::fs::File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        self.file.flush()
    }
}
