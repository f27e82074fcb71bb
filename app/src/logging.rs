use std::{
    fmt::Display,
    fs::{self, OpenOptions},
    io::Write as _,
    path::Path,
    time::Instant,
};

use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;

use crate::error::{AppError, Result};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Installs the global logger. `RUST_LOG` overrides the default `info` level;
/// with `log_file` the records are appended to that file instead of stderr.
pub fn init_logger(log_file: Option<&Path>) -> Result<()> {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format(TIMESTAMP_FORMAT),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info);

    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| AppError::LogFile {
                path: path.to_path_buf(),
                source,
            })?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

/// Resident set size in MB, from the `VmRSS` line of `/proc/self/status`.
pub fn memory_usage_mb() -> Option<u64> {
    fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| parse_vm_rss(&status))
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS"))?;
    let kilobytes: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kilobytes / 1024)
}

fn memory_label() -> String {
    match memory_usage_mb() {
        Some(mb) => format!("{mb} MB"),
        None => "n/a".to_string(),
    }
}

/// Progress line carrying the current memory use.
pub fn status(message: impl Display) {
    log::info!("{message} - MEM: {}", memory_label());
}

pub fn log_error_block(error: &dyn Display) {
    log::error!(
        "\n==============================================\n\
         [ERROR]: {}\n\
         MESSAGE: {error}\n\
         ==============================================",
        Local::now().format(TIMESTAMP_FORMAT)
    );
}

/// Reports the total elapsed time when dropped, so the report is written even
/// when a stage fails or panics.
struct Accounting<'a, R: FnMut(&str)> {
    name: &'a str,
    start: Instant,
    report: R,
}

impl<R: FnMut(&str)> Drop for Accounting<'_, R> {
    fn drop(&mut self) {
        let seconds = self.start.elapsed().as_secs_f64();
        let line = format!(
            "{} total time: {seconds:.2} s ({:.2} hours)",
            self.name,
            seconds / 3600.0
        );
        (self.report)(&line);
    }
}

/// Runs one command end to end: any error is logged as a framed block and
/// returned, and the elapsed time is always logged.
pub fn run_with_accounting<T>(name: &str, job: impl FnOnce() -> Result<T>) -> Result<T> {
    run_accounted(name, job, |line| status(line))
}

fn run_accounted<T>(
    name: &str,
    job: impl FnOnce() -> Result<T>,
    report: impl FnMut(&str),
) -> Result<T> {
    let _accounting = Accounting {
        name,
        start: Instant::now(),
        report,
    };
    status(format_args!("start {name}"));

    let result = job();
    if let Err(error) = &result {
        log_error_block(error);
    }
    result
}
