//! Ad-hoc questions over a persisted distribution table.

use std::fmt;
use std::path::Path;

use log::warn;

use crate::error::{QueryError, StoreError};
use crate::nested::{self, Key, NestedMap, Node};

/// Which part of the table to look at. Unset fields select everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub record_type: Option<String>,
    pub scheme: Option<String>,
    /// Smallest identifier count to keep.
    pub min: Option<i64>,
    /// Largest identifier count to keep.
    pub max: Option<i64>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    pub fn min(mut self, min: i64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: i64) -> Self {
        self.max = Some(max);
        self
    }

    fn is_fully_disambiguated(&self) -> bool {
        self.record_type.is_some() && self.scheme.is_some()
    }
}

/// Attached to a summed result that was not narrowed to one type and one scheme.
///
/// Such a total counts events, not records: a journal article with 3 DOIs and 4 PMIDs
/// adds 2 to the total of `record_type = "journal article"`, although it is a single
/// bibliographic resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventCountCaveat;

impl fmt::Display for EventCountCaveat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(
            "No filter was applied on record type and/or identifier scheme while asking for a total. \
             Bibliographic resources cannot be told apart in purely quantitative data, so the \
             returned number is how many times the selected event happens, not how many distinct \
             resources have at least <min> values for the same scheme. For example, a journal \
             article with 3 DOIs and 4 PMIDs contributes 2 to the total for journal articles, \
             although it is one resource.",
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Distribution(NestedMap),
    Total(i128),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub result: QueryResult,
    pub caveat: Option<EventCountCaveat>,
}

/// Answers `selection` against `table`.
///
/// With `want_distribution` the selected sub-table is returned, otherwise the sum of its
/// leaves. Count bounds are applied before either. The table is expected to have integer
/// count keys (see [`load_distribution`]); text count keys are never range-filtered.
pub fn query(
    table: &NestedMap,
    selection: &Selection,
    want_distribution: bool,
) -> Result<QueryOutcome, QueryError> {
    let mut selected = match (&selection.record_type, &selection.scheme) {
        (Some(record_type), Some(scheme)) => type_map(table, record_type)?
            .get_map(&Key::from(scheme.as_str()))
            .cloned()
            .ok_or_else(|| QueryError::UnknownScheme {
                record_type: record_type.clone(),
                scheme: scheme.clone(),
            })?,
        (Some(record_type), None) => merge_schemes(type_map(table, record_type)?),
        (None, Some(scheme)) => scheme_by_type(table, scheme),
        (None, None) => table.clone(),
    };

    if selection.min.is_some() || selection.max.is_some() {
        if nested::has_numeric_text_keys(&selected) {
            warn!(
                "Count bounds are not applied to text count keys; load the table with \
                 load_distribution or coerce_numeric_keys first"
            );
        }
        selected = nested::filter_by_key_range(&selected, selection.min, selection.max);
    }

    if want_distribution {
        return Ok(QueryOutcome {
            result: QueryResult::Distribution(selected),
            caveat: None,
        });
    }

    let caveat = (!selection.is_fully_disambiguated()).then_some(EventCountCaveat);
    if let Some(caveat) = &caveat {
        warn!("{}", caveat);
    }
    Ok(QueryOutcome {
        result: QueryResult::Total(nested::sum_leaves(&selected)),
        caveat,
    })
}

/// Reads a table written by the aggregator, with numeric keys made integers and sorted.
pub fn load_distribution<P: AsRef<Path>>(path: P) -> Result<NestedMap, StoreError> {
    let raw = nested::load_json(path)?;
    Ok(nested::sort(&nested::coerce_numeric_keys(&raw)))
}

fn type_map<'a>(table: &'a NestedMap, record_type: &str) -> Result<&'a NestedMap, QueryError> {
    table
        .get_map(&Key::from(record_type))
        .ok_or_else(|| QueryError::UnknownRecordType(record_type.to_string()))
}

// count -> records, summed over every scheme of one type
fn merge_schemes(schemes: &NestedMap) -> NestedMap {
    let mut merged = NestedMap::new();
    for (_, node) in schemes {
        if let Node::Map(counts) = node {
            for (count, records) in counts {
                if let Node::Int(n) = records {
                    merged.increment(count.clone(), *n);
                }
            }
        }
    }
    nested::sort(&merged)
}

// type -> count -> records for one scheme; types without it are left out
fn scheme_by_type(table: &NestedMap, scheme: &str) -> NestedMap {
    let scheme_key = Key::from(scheme);
    table
        .iter()
        .filter_map(|(record_type, node)| {
            node.as_map()
                .and_then(|schemes| schemes.get_map(&scheme_key))
                .map(|counts| (record_type.clone(), Node::Map(counts.clone())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> NestedMap {
        let value = json!({
            "journal article": {
                "doi": {"2": 157916, "3": 17507},
                "pmid": {"2": 12, "5": 1}
            },
            "journal": {
                "issn": {"2": 40000, "3": 5000, "4": 1090, "7": 3},
                "openalex": {"2": 10, "9": 1}
            },
            "book": {"doi": {"2": 4}}
        });
        nested::sort(&nested::coerce_numeric_keys(&nested::from_json_value(&value).unwrap()))
    }

    fn distribution(outcome: QueryOutcome) -> NestedMap {
        match outcome.result {
            QueryResult::Distribution(map) => map,
            QueryResult::Total(n) => panic!("expected a distribution, got total {}", n),
        }
    }

    #[test]
    fn type_and_scheme_total() {
        let selection = Selection::new().record_type("journal article").scheme("doi");
        let outcome = query(&table(), &selection, false).unwrap();
        assert_eq!(outcome.result, QueryResult::Total(175423));
        assert_eq!(outcome.caveat, None);
    }

    #[test]
    fn type_and_scheme_distribution_is_the_sub_table() {
        let table = table();
        let selection = Selection::new().record_type("journal article").scheme("doi");
        let map = distribution(query(&table, &selection, true).unwrap());
        let expected = table
            .get_map(&Key::from("journal article"))
            .and_then(|m| m.get_map(&Key::from("doi")))
            .unwrap();
        assert_eq!(&map, expected);
    }

    #[test]
    fn type_only_with_max_sums_events_and_warns() {
        let selection = Selection::new().record_type("journal").max(4);
        let outcome = query(&table(), &selection, false).unwrap();
        assert_eq!(outcome.result, QueryResult::Total(40000 + 5000 + 1090 + 10));
        assert_eq!(outcome.caveat, Some(EventCountCaveat));
    }

    #[test]
    fn type_only_merges_schemes_per_count() {
        let selection = Selection::new().record_type("journal article");
        let map = distribution(query(&table(), &selection, true).unwrap());
        let keys: Vec<i64> = map.keys().filter_map(Key::as_int).collect();
        assert_eq!(keys, vec![2, 3, 5]);
        assert_eq!(map.get(&Key::Int(2)), Some(&Node::Int(157916 + 12)));
    }

    #[test]
    fn scheme_only_groups_by_type() {
        let selection = Selection::new().scheme("doi").min(2).max(2);
        let map = distribution(query(&table(), &selection, true).unwrap());
        let types: Vec<String> = map.keys().map(|k| k.to_string()).collect();
        assert_eq!(types, vec!["book", "journal article"]);
        assert_eq!(nested::sum_leaves(&map), 157916 + 4);
    }

    #[test]
    fn no_selection_returns_whole_table() {
        let table = table();
        let outcome = query(&table, &Selection::new(), true).unwrap();
        assert_eq!(distribution(outcome), table);

        let total = query(&table, &Selection::new(), false).unwrap();
        assert_eq!(total.result, QueryResult::Total(nested::sum_leaves(&table)));
        assert!(total.caveat.is_some());
    }

    #[test]
    fn min_bound_drops_small_counts() {
        let selection = Selection::new().record_type("journal").scheme("issn").min(4);
        let outcome = query(&table(), &selection, false).unwrap();
        assert_eq!(outcome.result, QueryResult::Total(1093));
    }

    #[test]
    fn bounds_skip_uncoerced_count_keys() {
        let raw = nested::from_json_value(&json!({"book": {"doi": {"2": 4, "6": 1}}})).unwrap();
        let selection = Selection::new().record_type("book").scheme("doi").min(3);
        let outcome = query(&raw, &selection, false).unwrap();
        assert_eq!(outcome.result, QueryResult::Total(5));

        let coerced = nested::coerce_numeric_keys(&raw);
        let outcome = query(&coerced, &selection, false).unwrap();
        assert_eq!(outcome.result, QueryResult::Total(1));
    }

    #[test]
    fn unknown_keys_are_errors() {
        let err = query(&table(), &Selection::new().record_type("dataset"), true).unwrap_err();
        assert_eq!(err, QueryError::UnknownRecordType("dataset".to_string()));

        let err = query(
            &table(),
            &Selection::new().record_type("book").scheme("isbn"),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::UnknownScheme { .. }));
    }
}
