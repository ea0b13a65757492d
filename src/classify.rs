//! Counting identifier schemes in a record's composite `id` field.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::dump::Record;

/// Identifier schemes tracked in the distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scheme {
    Doi,
    Isbn,
    Issn,
    Omid,
    Openalex,
    Pmcid,
    Pmid,
}

impl Scheme {
    pub const ALL: [Scheme; 7] = [
        Scheme::Doi,
        Scheme::Isbn,
        Scheme::Issn,
        Scheme::Omid,
        Scheme::Openalex,
        Scheme::Pmcid,
        Scheme::Pmid,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scheme::Doi => "doi",
            Scheme::Isbn => "isbn",
            Scheme::Issn => "issn",
            Scheme::Omid => "omid",
            Scheme::Openalex => "openalex",
            Scheme::Pmcid => "pmcid",
            Scheme::Pmid => "pmid",
        }
    }

    fn matches(self, token: &str, matching: SchemeMatching) -> bool {
        let name = self.name();
        match matching {
            SchemeMatching::Prefix => token.starts_with(name),
            SchemeMatching::Delimited => token
                .strip_prefix(name)
                .is_some_and(|rest| rest.starts_with(':')),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scheme::ALL
            .into_iter()
            .find(|scheme| scheme.name() == s)
            .ok_or_else(|| format!("unsupported identifier scheme '{}'", s))
    }
}

/// How a token is attributed to a scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemeMatching {
    /// Token must start with `<scheme>:`.
    #[default]
    Delimited,
    /// Token only has to start with the scheme name, so `pmidx:1` counts as `pmid`.
    /// Kept for reproducing distributions computed with the bare prefix test.
    Prefix,
}

/// Per-scheme token counts for one record. Only counts above one are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemeCounts {
    counts: BTreeMap<Scheme, usize>,
}

impl SchemeCounts {
    pub fn get(&self, scheme: Scheme) -> Option<usize> {
        self.counts.get(&scheme).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Scheme, usize)> + '_ {
        self.counts.iter().map(|(scheme, count)| (*scheme, *count))
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Outcome of classifying one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Two tokens or fewer: the OMID plus at most one other identifier.
    Skipped,
    /// The same token appears more than once; nothing was counted.
    Duplicate,
    /// Schemes with more than one value. May be empty.
    Counted(SchemeCounts),
}

impl Classification {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Classification::Duplicate)
    }

    pub fn scheme_counts(&self) -> Option<&SchemeCounts> {
        match self {
            Classification::Counted(counts) => Some(counts),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
    matching: SchemeMatching,
}

impl Classifier {
    pub fn new(matching: SchemeMatching) -> Self {
        Self { matching }
    }

    pub fn classify(&self, record: &Record) -> Classification {
        self.classify_ids(record.id())
    }

    pub fn classify_ids(&self, ids: &str) -> Classification {
        let tokens: Vec<&str> = ids.split_whitespace().collect();
        if tokens.len() <= 2 {
            return Classification::Skipped;
        }

        let mut seen = HashSet::with_capacity(tokens.len());
        if !tokens.iter().all(|token| seen.insert(*token)) {
            return Classification::Duplicate;
        }

        let counts = Scheme::ALL
            .into_iter()
            .filter_map(|scheme| {
                let n = tokens
                    .iter()
                    .filter(|token| scheme.matches(token, self.matching))
                    .count();
                (n > 1).then_some((scheme, n))
            })
            .collect();
        Classification::Counted(SchemeCounts { counts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> Record {
        Record::new("journal article", id)
    }

    #[test]
    fn short_records_are_skipped() {
        let classifier = Classifier::default();
        for ids in ["", "omid:br/1", "omid:br/1 doi:10.1/a", "omid:br/1 omid:br/1"] {
            assert_eq!(classifier.classify(&record(ids)), Classification::Skipped);
        }
    }

    #[test]
    fn counts_multiple_dois() {
        let result =
            Classifier::default().classify(&record("omid:br/1 doi:10.1/a doi:10.1/b doi:10.1/c"));
        let counts = result.scheme_counts().unwrap();
        assert_eq!(counts.get(Scheme::Doi), Some(3));
        assert_eq!(counts.len(), 1);
    }

    #[test]
    fn single_values_are_not_kept() {
        let result = Classifier::default()
            .classify(&record("omid:br/1 doi:10.1/a pmid:123 pmcid:PMC1 issn:1234-5678"));
        assert!(result.scheme_counts().unwrap().is_empty());
    }

    #[test]
    fn duplicates_are_flagged_without_counting() {
        let result = Classifier::default().classify(&record("omid:br/2 doi:10.1/a doi:10.1/a"));
        assert!(result.is_duplicate());
        assert!(result.scheme_counts().is_none());
    }

    #[test]
    fn several_schemes_in_one_record() {
        let result = Classifier::default().classify(&record(
            "omid:br/3 doi:10.1/a doi:10.1/b pmid:1 pmid:2 pmid:3 issn:1 issn:2 wikidata:Q1",
        ));
        let counts = result.scheme_counts().unwrap();
        let collected: Vec<(Scheme, usize)> = counts.iter().collect();
        assert_eq!(
            collected,
            vec![(Scheme::Doi, 2), (Scheme::Issn, 2), (Scheme::Pmid, 3)]
        );
    }

    #[test]
    fn delimited_matching_requires_colon() {
        let ids = "omid:br/4 pmid:1 pmidx:2 pmidx:3";
        let delimited = Classifier::new(SchemeMatching::Delimited).classify(&record(ids));
        assert!(delimited.scheme_counts().unwrap().is_empty());

        let prefix = Classifier::new(SchemeMatching::Prefix).classify(&record(ids));
        assert_eq!(prefix.scheme_counts().unwrap().get(Scheme::Pmid), Some(3));
    }

    #[test]
    fn parses_scheme_names() {
        assert_eq!("openalex".parse::<Scheme>(), Ok(Scheme::Openalex));
        assert!("wikidata".parse::<Scheme>().is_err());
    }
}
