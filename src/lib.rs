//! Distribution of OpenCitations Meta bibliographic resources that hold more than one
//! value for the same identifier scheme.
//!
//! [`distribution::count_dump`] scans a Meta CSV dump and writes a
//! type → scheme → identifier count → records table as JSON.
//! [`query::query`] answers filtered questions against such a table.

pub mod classify;
pub mod diagnostics;
pub mod distribution;
pub mod dump;
pub mod error;
pub mod nested;
pub mod query;
pub mod util;

pub use classify::{Classification, Classifier, Scheme, SchemeCounts, SchemeMatching};
pub use diagnostics::{CollectingDiagnostics, Diagnostics, FileDiagnostics, LogDiagnostics};
pub use distribution::{aggregate, count_dump, Aggregator, Distribution, DistributionTable, ScanSummary};
pub use dump::{DumpConfig, DumpReader, DumpStats, Record};
pub use error::{CountError, DumpError, QueryError, StoreError};
pub use nested::{Key, NestedMap, Node};
pub use query::{load_distribution, query, EventCountCaveat, QueryOutcome, QueryResult, Selection};
