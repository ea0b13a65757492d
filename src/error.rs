use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal failures while reading a dump. Any of these aborts the scan.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("failed to open dump '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read zip archive '{path}': {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("failed to decode '{file}' near row {row}: {source}")]
    Decode {
        file: String,
        row: u64,
        #[source]
        source: csv::Error,
    },
    #[error("'{file}' row {row}: field {field} is {len} characters, above the limit of {limit}")]
    FieldTooLarge {
        file: String,
        row: u64,
        field: usize,
        len: usize,
        limit: usize,
    },
    #[error("'{file}' has no '{column}' column in its header")]
    MissingColumn { file: String, column: &'static str },
    #[error("invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Failures persisting or loading a nested table as JSON.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object at the top level, found {0}")]
    NotAnObject(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("record type '{0}' is not present in the distribution")]
    UnknownRecordType(String),
    #[error("identifier scheme '{scheme}' is not present for record type '{record_type}'")]
    UnknownScheme { record_type: String, scheme: String },
}

/// Failures of a full count run: reading the dump or writing the table.
#[derive(Debug, Error)]
pub enum CountError {
    #[error(transparent)]
    Dump(#[from] DumpError),
    #[error("failed to write distribution to '{path}': {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
}
