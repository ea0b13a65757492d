//! Single-pass reading of an OpenCitations Meta CSV dump.
//!
//! The dump is either a zip archive of CSV files or a directory holding `.csv` and
//! `.csv.gz` files. Rows are pushed to a callback one at a time; nothing is retained.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use csv::{ReaderBuilder, StringRecord};
use flate2::read::GzDecoder;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use zip::ZipArchive;

use crate::error::DumpError;

/// Largest accepted CSV field, in characters. Records with thousands of identifiers go
/// far beyond the usual CSV defaults.
pub const DEFAULT_FIELD_SIZE_LIMIT: usize = 131_072 * 12;

const DEFAULT_REPORT_EVERY: u64 = 500_000;

#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub field_size_limit: usize,
    pub show_progress: bool,
    /// Log the running row count every this many rows (0 disables it).
    pub report_every: u64,
}

impl Default for DumpConfig {
    fn default() -> Self {
        DumpConfig {
            field_size_limit: DEFAULT_FIELD_SIZE_LIMIT,
            show_progress: true,
            report_every: DEFAULT_REPORT_EVERY,
        }
    }
}

#[derive(Debug)]
struct Header {
    names: StringRecord,
    type_idx: usize,
    id_idx: usize,
}

impl Header {
    fn from_names(file: &str, names: StringRecord) -> Result<Self, DumpError> {
        let position = |column: &'static str| {
            names
                .iter()
                .position(|h| h == column)
                .ok_or_else(|| DumpError::MissingColumn {
                    file: file.to_string(),
                    column,
                })
        };
        let type_idx = position("type")?;
        let id_idx = position("id")?;
        Ok(Header {
            names,
            type_idx,
            id_idx,
        })
    }
}

/// One bibliographic resource row from the dump.
#[derive(Debug, Clone)]
pub struct Record {
    header: Rc<Header>,
    values: StringRecord,
}

impl Record {
    /// Builds a record holding only the `type` and `id` columns.
    pub fn new(br_type: &str, id: &str) -> Self {
        let header = Header {
            names: StringRecord::from(vec!["type", "id"]),
            type_idx: 0,
            id_idx: 1,
        };
        Record {
            header: Rc::new(header),
            values: StringRecord::from(vec![br_type, id]),
        }
    }

    /// The resource type, e.g. `journal article`. Empty when the row is short.
    pub fn br_type(&self) -> &str {
        self.values.get(self.header.type_idx).unwrap_or("")
    }

    /// Space-separated identifier tokens, e.g. `omid:br/1 doi:10.1/x`.
    pub fn id(&self) -> &str {
        self.values.get(self.header.id_idx).unwrap_or("")
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.header.names == other.header.names && self.values == other.values
    }
}

// Renders every column of the row, used when reporting anomalies.
impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.header.names.iter().zip(self.values.iter()).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{:?}: {:?}", name, value)?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpStats {
    pub files_read: u64,
    pub rows_read: u64,
}

#[derive(Debug)]
enum DumpSource {
    Zip(PathBuf),
    Directory(PathBuf),
}

/// Reader over a dump. Consumed by [`DumpReader::for_each_record`], so it can only be
/// scanned once.
#[derive(Debug)]
pub struct DumpReader {
    source: DumpSource,
    config: DumpConfig,
}

impl DumpReader {
    pub fn open<P: AsRef<Path>>(path: P, config: DumpConfig) -> Result<Self, DumpError> {
        let path = path.as_ref();
        let source = if path.is_dir() {
            DumpSource::Directory(path.to_path_buf())
        } else {
            // fail early on a missing archive rather than at scan time
            File::open(path).map_err(|source| DumpError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            DumpSource::Zip(path.to_path_buf())
        };
        Ok(DumpReader { source, config })
    }

    /// Pushes every row of every tabular file to `on_record`, in file order.
    ///
    /// Returning [`ControlFlow::Break`] from the callback stops the scan. Any read or
    /// decode failure aborts the scan with an error.
    pub fn for_each_record<F>(self, mut on_record: F) -> Result<DumpStats, DumpError>
    where
        F: FnMut(Record) -> ControlFlow<()>,
    {
        let mut stats = DumpStats::default();
        match &self.source {
            DumpSource::Zip(path) => self.scan_zip(path, &mut stats, &mut on_record)?,
            DumpSource::Directory(path) => self.scan_directory(path, &mut stats, &mut on_record)?,
        }
        info!(
            "Read {} rows from {} tabular files.",
            stats.rows_read, stats.files_read
        );
        Ok(stats)
    }

    fn scan_zip<F>(&self, path: &Path, stats: &mut DumpStats, on_record: &mut F) -> Result<(), DumpError>
    where
        F: FnMut(Record) -> ControlFlow<()>,
    {
        let archive_err = |source| DumpError::Archive {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(|source| DumpError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut archive = ZipArchive::new(BufReader::new(file)).map_err(archive_err)?;

        let mut tables = Vec::new();
        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index).map_err(archive_err)?;
            if !entry.is_dir() && is_csv_name(entry.name()) {
                tables.push((index, entry.name().to_string()));
            } else {
                debug!("Skipping non-tabular archive entry {}", entry.name());
            }
        }
        if tables.is_empty() {
            warn!("No .csv files found in archive {}", path.display());
        }

        let progress = self.progress_bar(tables.len() as u64);
        for (index, name) in tables {
            let entry = archive.by_index(index).map_err(archive_err)?;
            let flow = self.read_table(&name, entry, stats, &progress, on_record)?;
            if flow.is_break() {
                break;
            }
        }
        progress.finish_with_message("Dump scan finished.");
        Ok(())
    }

    fn scan_directory<F>(
        &self,
        directory: &Path,
        stats: &mut DumpStats,
        on_record: &mut F,
    ) -> Result<(), DumpError>
    where
        F: FnMut(Record) -> ControlFlow<()>,
    {
        let files = find_csv_files(directory)?;
        let progress = self.progress_bar(files.len() as u64);
        for path in files {
            let name = path.to_string_lossy().to_string();
            let file = File::open(&path).map_err(|source| DumpError::Open {
                path: path.clone(),
                source,
            })?;
            let reader: Box<dyn Read> = if name.ends_with(".gz") {
                Box::new(GzDecoder::new(BufReader::new(file)))
            } else {
                Box::new(BufReader::new(file))
            };
            let flow = self.read_table(&name, reader, stats, &progress, on_record)?;
            if flow.is_break() {
                break;
            }
        }
        progress.finish_with_message("Dump scan finished.");
        Ok(())
    }

    fn read_table<R, F>(
        &self,
        name: &str,
        reader: R,
        stats: &mut DumpStats,
        progress: &ProgressBar,
        on_record: &mut F,
    ) -> Result<ControlFlow<()>, DumpError>
    where
        R: Read,
        F: FnMut(Record) -> ControlFlow<()>,
    {
        debug!("Processing file {}", name);
        progress.set_message(name.to_string());

        let decode_err = |row: u64| {
            move |source| DumpError::Decode {
                file: name.to_string(),
                row,
                source,
            }
        };

        let mut csv_reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let names = csv_reader.headers().map_err(decode_err(0))?.clone();
        if names.is_empty() {
            debug!("{} is empty, skipping.", name);
            stats.files_read += 1;
            progress.inc(1);
            return Ok(ControlFlow::Continue(()));
        }
        let header = Rc::new(Header::from_names(name, names)?);

        let limit = self.config.field_size_limit;
        let mut row: u64 = 0;
        let mut values = StringRecord::new();
        while csv_reader
            .read_record(&mut values)
            .map_err(decode_err(row + 1))?
        {
            row += 1;
            stats.rows_read += 1;
            if let Some((field, len)) = values
                .iter()
                .enumerate()
                .filter(|(_, value)| value.len() > limit)
                .map(|(field, value)| (field, value.chars().count()))
                .find(|(_, len)| *len > limit)
            {
                return Err(DumpError::FieldTooLarge {
                    file: name.to_string(),
                    row,
                    field,
                    len,
                    limit,
                });
            }

            if self.config.report_every > 0 && stats.rows_read % self.config.report_every == 0 {
                debug!("Processed {} rows so far...", stats.rows_read);
            }

            let record = Record {
                header: Rc::clone(&header),
                values: std::mem::take(&mut values),
            };
            if on_record(record).is_break() {
                stats.files_read += 1;
                return Ok(ControlFlow::Break(()));
            }
        }

        stats.files_read += 1;
        progress.inc(1);
        Ok(ControlFlow::Continue(()))
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        match ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            Ok(style) => pb.set_style(style.progress_chars("=> ")),
            Err(e) => warn!("Failed to create progress bar template: {}", e),
        }
        pb
    }
}

fn is_csv_name(name: &str) -> bool {
    name.ends_with(".csv")
}

fn find_csv_files(directory: &Path) -> Result<Vec<PathBuf>, DumpError> {
    let mut paths = Vec::new();
    for suffix in ["**/*.csv", "**/*.csv.gz"] {
        let pattern = directory.join(suffix);
        let pattern_str = pattern.to_string_lossy();
        debug!("Searching for files matching pattern: {}", pattern_str);
        paths.extend(glob(&pattern_str)?.filter_map(Result::ok));
    }
    paths.sort();
    if paths.is_empty() {
        warn!("No .csv or .csv.gz files found in {}", directory.display());
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    fn collect(reader: DumpReader) -> (Vec<Record>, DumpStats) {
        let mut records = Vec::new();
        let stats = reader
            .for_each_record(|record| {
                records.push(record);
                ControlFlow::Continue(())
            })
            .unwrap();
        (records, stats)
    }

    fn quiet() -> DumpConfig {
        DumpConfig {
            show_progress: false,
            ..DumpConfig::default()
        }
    }

    #[test]
    fn reads_plain_and_gzipped_csv_from_directory() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.csv"),
            "id,title,type\n\"omid:br/1 doi:10.1/a\",First,journal article\n",
        )
        .unwrap();
        let gz = File::create(dir.path().join("b.csv.gz")).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(gz, flate2::Compression::default());
        encoder
            .write_all(b"id,type\n\"omid:br/2 isbn:1 isbn:2\",book\n")
            .unwrap();
        encoder.finish().unwrap();
        fs::write(dir.path().join("notes.txt"), "not a table").unwrap();

        let reader = DumpReader::open(dir.path(), quiet()).unwrap();
        let (records, stats) = collect(reader);
        assert_eq!(stats, DumpStats { files_read: 2, rows_read: 2 });
        assert_eq!(records[0].br_type(), "journal article");
        assert_eq!(records[0].id(), "omid:br/1 doi:10.1/a");
        assert_eq!(records[1].br_type(), "book");
    }

    #[test]
    fn oversized_field_is_fatal() {
        let dir = tempdir().unwrap();
        let long_ids = "doi:10.1/x ".repeat(20);
        fs::write(
            dir.path().join("a.csv"),
            format!("id,type\n\"{}\",journal\n", long_ids.trim()),
        )
        .unwrap();
        let config = DumpConfig {
            field_size_limit: 64,
            ..quiet()
        };
        let err = DumpReader::open(dir.path(), config)
            .unwrap()
            .for_each_record(|_| ControlFlow::Continue(()))
            .unwrap_err();
        assert!(matches!(err, DumpError::FieldTooLarge { row: 1, field: 0, limit: 64, .. }));
    }

    #[test]
    fn field_limit_counts_characters() {
        let dir = tempdir().unwrap();
        // 40 characters, 80 bytes
        let title = "é".repeat(40);
        fs::write(
            dir.path().join("a.csv"),
            format!("id,title,type
omid:br/1,{},journal
", title),
        )
        .unwrap();
        let config = DumpConfig {
            field_size_limit: 64,
            ..quiet()
        };
        let (records, _) = collect(DumpReader::open(dir.path(), config).unwrap());
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn missing_id_column_is_fatal() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.csv"), "title,type\nx,journal\n").unwrap();
        let err = DumpReader::open(dir.path(), quiet())
            .unwrap()
            .for_each_record(|_| ControlFlow::Continue(()))
            .unwrap_err();
        assert!(matches!(err, DumpError::MissingColumn { column: "id", .. }));
    }

    #[test]
    fn invalid_utf8_is_fatal() {
        let dir = tempdir().unwrap();
        let mut bytes = b"id,type\nomid:br/1,".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        fs::write(dir.path().join("a.csv"), bytes).unwrap();
        let err = DumpReader::open(dir.path(), quiet())
            .unwrap()
            .for_each_record(|_| ControlFlow::Continue(()))
            .unwrap_err();
        assert!(matches!(err, DumpError::Decode { row: 1, .. }));
    }

    #[test]
    fn missing_archive_fails_on_open() {
        let dir = tempdir().unwrap();
        let err = DumpReader::open(dir.path().join("nope.zip"), quiet()).unwrap_err();
        assert!(matches!(err, DumpError::Open { .. }));
    }

    #[test]
    fn break_stops_the_scan() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.csv"),
            "id,type\nomid:br/1,a\nomid:br/2,b\nomid:br/3,c\n",
        )
        .unwrap();
        let mut seen = 0;
        DumpReader::open(dir.path(), quiet())
            .unwrap()
            .for_each_record(|_| {
                seen += 1;
                if seen == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn records_from_csv_classify_by_header_position() {
        use crate::classify::{Classifier, Scheme};

        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.csv"),
            "title,id,pub_date,type\nT,\"omid:br/9 pmid:1 pmid:2 doi:10.1/a\",2020,journal article\n",
        )
        .unwrap();
        let (records, _) = collect(DumpReader::open(dir.path(), quiet()).unwrap());
        let classification = Classifier::default().classify(&records[0]);
        let counts = classification.scheme_counts().unwrap();
        assert_eq!(counts.get(Scheme::Pmid), Some(2));
        assert_eq!(counts.get(Scheme::Doi), None);
        assert_eq!(records[0].br_type(), "journal article");
    }

    #[test]
    fn display_renders_every_column() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.csv"), "id,title,type\nomid:br/1,T,journal\n").unwrap();
        let (records, _) = collect(DumpReader::open(dir.path(), quiet()).unwrap());
        assert_eq!(
            records[0].to_string(),
            r#"{"id": "omid:br/1", "title": "T", "type": "journal"}"#
        );
    }
}
