//! Folding classified records into the type → scheme → count → records table.

use std::collections::{BTreeMap, HashMap};
use std::ops::ControlFlow;
use std::path::Path;
use std::time::Instant;

use log::info;

use crate::classify::{Classification, Classifier, Scheme};
use crate::diagnostics::Diagnostics;
use crate::dump::{DumpConfig, DumpReader, DumpStats, Record};
use crate::error::{CountError, StoreError};
use crate::nested::{self, Key, NestedMap, Node};
use crate::util::format_elapsed;

type CountDistribution = BTreeMap<usize, u64>;

/// Number of records per (type, scheme, identifier count).
///
/// Only counts of two or more are ever recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionTable {
    types: HashMap<String, HashMap<Scheme, CountDistribution>>,
}

impl DistributionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one record of `br_type` holding `count` values of `scheme`.
    pub fn record(&mut self, br_type: &str, scheme: Scheme, count: usize) {
        *self
            .types
            .entry(br_type.to_string())
            .or_default()
            .entry(scheme)
            .or_default()
            .entry(count)
            .or_insert(0) += 1;
    }

    pub fn get(&self, br_type: &str, scheme: Scheme, count: usize) -> u64 {
        self.types
            .get(br_type)
            .and_then(|schemes| schemes.get(&scheme))
            .and_then(|counts| counts.get(&count))
            .copied()
            .unwrap_or(0)
    }

    pub fn record_types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Plain nested form with integer count keys, in no particular order.
    pub fn to_nested(&self) -> NestedMap {
        let mut map = NestedMap::new();
        for (br_type, schemes) in &self.types {
            let type_map = map.branch_mut(br_type.as_str());
            for (scheme, counts) in schemes {
                let scheme_map = type_map.branch_mut(scheme.name());
                for (count, records) in counts {
                    scheme_map.insert(
                        Key::Int(saturating_i64(*count)),
                        Node::Int(saturating_i64(*records)),
                    );
                }
            }
        }
        map
    }
}

// Counts beyond i64::MAX cannot be stored in a nested table; they are clamped.
fn saturating_i64<T: TryInto<i64>>(value: T) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

/// Counters for one pass over the dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub records_seen: u64,
    /// Records with two identifiers or fewer.
    pub records_skipped: u64,
    pub duplicate_records: u64,
    /// Distinct records with more than one value for at least one scheme.
    pub multi_value_records: u64,
}

pub fn summary_message(multi_value_records: u64) -> String {
    format!(
        "There are {} bibliographic resources that have at least 2 values for at least one of the supported ID schemes",
        multi_value_records
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub table: DistributionTable,
    pub summary: ScanSummary,
}

impl Distribution {
    /// The table as it is persisted: untouched branches dropped, keys sorted.
    pub fn to_sorted_nested(&self) -> NestedMap {
        nested::sort(&nested::normalize(&self.table.to_nested()))
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        nested::write_json(path, &self.to_sorted_nested())
    }
}

pub struct Aggregator<D> {
    classifier: Classifier,
    diagnostics: D,
    table: DistributionTable,
    summary: ScanSummary,
}

impl<D: Diagnostics> Aggregator<D> {
    pub fn new(classifier: Classifier, diagnostics: D) -> Self {
        Aggregator {
            classifier,
            diagnostics,
            table: DistributionTable::new(),
            summary: ScanSummary::default(),
        }
    }

    pub fn observe(&mut self, record: &Record) {
        self.summary.records_seen += 1;
        match self.classifier.classify(record) {
            Classification::Skipped => self.summary.records_skipped += 1,
            Classification::Duplicate => {
                self.summary.duplicate_records += 1;
                self.diagnostics.warning(&format!("DUPLICATE: {}", record));
            }
            Classification::Counted(counts) => {
                if counts.is_empty() {
                    return;
                }
                for (scheme, count) in counts.iter() {
                    self.table.record(record.br_type(), scheme, count);
                }
                self.summary.multi_value_records += 1;
            }
        }
    }

    /// Ends the pass and reports the summary counter at info level.
    pub fn finish(mut self) -> Distribution {
        self.diagnostics
            .info(&summary_message(self.summary.multi_value_records));
        Distribution {
            table: self.table,
            summary: self.summary,
        }
    }
}

/// Runs `records` through a fresh [`Aggregator`].
pub fn aggregate<I, D>(records: I, classifier: Classifier, diagnostics: D) -> Distribution
where
    I: IntoIterator<Item = Record>,
    D: Diagnostics,
{
    let mut aggregator = Aggregator::new(classifier, diagnostics);
    for record in records {
        aggregator.observe(&record);
    }
    aggregator.finish()
}

/// Scans the dump at `dump_path`, writes the sorted table to `out_file` and returns it.
///
/// The summary counter goes to `diagnostics` and to standard output.
pub fn count_dump<P, Q, D>(
    dump_path: P,
    out_file: Q,
    config: &DumpConfig,
    classifier: Classifier,
    diagnostics: D,
) -> Result<Distribution, CountError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    D: Diagnostics,
{
    let start = Instant::now();
    info!("Scanning dump {}", dump_path.as_ref().display());

    let reader = DumpReader::open(dump_path, config.clone())?;
    let mut aggregator = Aggregator::new(classifier, diagnostics);
    let dump_stats = reader.for_each_record(|record| {
        aggregator.observe(&record);
        ControlFlow::Continue(())
    })?;
    let distribution = aggregator.finish();

    let out_file = out_file.as_ref();
    distribution
        .write_json(out_file)
        .map_err(|source| CountError::Store {
            path: out_file.to_path_buf(),
            source,
        })?;
    println!("{}", summary_message(distribution.summary.multi_value_records));

    log_final_stats(&dump_stats, &distribution.summary);
    info!(
        "Wrote distribution to {} in {}",
        out_file.display(),
        format_elapsed(start.elapsed())
    );
    Ok(distribution)
}

fn log_final_stats(dump: &DumpStats, summary: &ScanSummary) {
    info!("--- Final Stats Summary ---");
    info!(" Tabular files read: {}", dump.files_read);
    info!(" Rows read: {}", dump.rows_read);
    info!(" Records with at most 2 identifiers: {}", summary.records_skipped);
    info!(" Records with duplicate identifiers: {}", summary.duplicate_records);
    info!(
        " Records with multiple values for a scheme: {}",
        summary.multi_value_records
    );
    info!("---------------------------");
}
