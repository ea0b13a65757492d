//! Where per-run diagnostics go.
//!
//! The aggregator reports anomalies and its summary through a [`Diagnostics`] sink
//! handed to it at construction, so a scan never depends on process-wide logger state.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

pub trait Diagnostics {
    fn warning(&mut self, message: &str);
    fn info(&mut self, message: &str);
}

impl<D: Diagnostics + ?Sized> Diagnostics for &mut D {
    fn warning(&mut self, message: &str) {
        (**self).warning(message)
    }

    fn info(&mut self, message: &str) {
        (**self).info(message)
    }
}

/// Forwards everything to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn warning(&mut self, message: &str) {
        warn!("{}", message);
    }

    fn info(&mut self, message: &str) {
        info!("{}", message);
    }
}

/// Keeps messages in memory.
#[derive(Debug, Default, Clone)]
pub struct CollectingDiagnostics {
    pub warnings: Vec<String>,
    pub infos: Vec<String>,
}

impl Diagnostics for CollectingDiagnostics {
    fn warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    fn info(&mut self, message: &str) {
        self.infos.push(message.to_string());
    }
}

/// Appends timestamped lines to a per-day log file and mirrors them to `log`.
#[derive(Debug)]
pub struct FileDiagnostics {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileDiagnostics {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(FileDiagnostics {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Opens `<dir>/<stem>_<YYYY-MM-DD>.log` for today's UTC date.
    pub fn open_dated<P: AsRef<Path>>(dir: P, stem: &str) -> io::Result<Self> {
        Self::open(dir.as_ref().join(dated_log_name(stem, OffsetDateTime::now_utc())))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn write_line(&mut self, level: &str, message: &str) {
        let timestamp = OffsetDateTime::now_utc()
            .format(TIMESTAMP_FORMAT)
            .unwrap_or_default();
        if let Err(e) = writeln!(self.writer, "{} {:<5} {}", timestamp, level, message) {
            error!("Failed to write to log file {}: {}", self.path.display(), e);
        }
    }
}

impl Diagnostics for FileDiagnostics {
    fn warning(&mut self, message: &str) {
        self.write_line("WARN", message);
        warn!("{}", message);
    }

    fn info(&mut self, message: &str) {
        self.write_line("INFO", message);
        info!("{}", message);
    }
}

impl Drop for FileDiagnostics {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            error!("Failed to flush log file {}: {}", self.path.display(), e);
        }
    }
}

pub fn dated_log_name(stem: &str, at: OffsetDateTime) -> String {
    let date = at.format(DATE_FORMAT).unwrap_or_default();
    format!("{}_{}.log", stem, date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use time::macros::datetime;

    #[test]
    fn log_name_carries_the_date() {
        let at = datetime!(2024-03-07 10:15:00 UTC);
        assert_eq!(dated_log_name("count_brs_ids", at), "count_brs_ids_2024-03-07.log");
    }

    #[test]
    fn file_sink_writes_levelled_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.log");
        {
            let mut sink = FileDiagnostics::open(&path).unwrap();
            sink.warning("DUPLICATE: row");
            sink.info("There are 3 bibliographic resources");
        }
        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("WARN  DUPLICATE: row"));
        assert!(lines[1].ends_with("INFO  There are 3 bibliographic resources"));
    }

    #[test]
    fn borrowed_sink_collects_through_reference() {
        fn report<D: Diagnostics>(mut sink: D) {
            sink.warning("w");
            sink.info("i");
        }

        let mut collected = CollectingDiagnostics::default();
        report(&mut collected);
        assert_eq!(collected.warnings, vec!["w"]);
        assert_eq!(collected.infos, vec!["i"]);
    }
}
