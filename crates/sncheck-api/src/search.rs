//! Serial number lookups: one exact-match query per term.

use crate::store::RecordStore;
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub serial_number: String,
    pub is_insurance: bool,
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchResult {
    pub fn found(serial_number: &str, is_insurance: bool) -> Self {
        Self {
            serial_number: serial_number.to_string(),
            is_insurance,
            found: true,
            error: None,
        }
    }

    pub fn not_found(serial_number: &str) -> Self {
        Self {
            serial_number: serial_number.to_string(),
            is_insurance: false,
            found: false,
            error: None,
        }
    }

    pub fn failed(serial_number: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::not_found(serial_number)
        }
    }

    /// Label shown in the result table; errors take precedence over everything else.
    pub fn display_status(&self) -> &'static str {
        if self.error.is_some() {
            "lookup error"
        } else if !self.found {
            "not found"
        } else if self.is_insurance {
            "subscribed"
        } else {
            "not subscribed"
        }
    }
}

/// Look up a single term. Never fails: errors are folded into the result.
pub fn lookup(store: &dyn RecordStore, term: &str) -> SearchResult {
    match store.find_exact(term) {
        Ok(Some(record)) => SearchResult::found(term, record.is_insurance),
        Ok(None) => SearchResult::not_found(term),
        Err(e) => {
            log::debug!("Lookup of {term} failed: {e}");
            SearchResult::failed(term, e.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    /// Number of lookups in flight at once; 1 means strictly sequential.
    pub concurrency: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

/// Resolve every term, in order, into exactly one result.
///
/// `on_progress` is called once per completed lookup.
pub fn search_serial_numbers<S: AsRef<str> + Sync>(
    store: &dyn RecordStore,
    terms: &[S],
    options: SearchOptions,
    on_progress: &(dyn Fn() + Sync),
) -> Result<Vec<SearchResult>> {
    let run = |term: &S| {
        let result = lookup(store, term.as_ref());
        on_progress();
        result
    };

    if options.concurrency <= 1 || terms.len() <= 1 {
        return Ok(terms.iter().map(run).collect());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.concurrency)
        .build()
        .context("Failed to start lookup workers")?;
    // Indexed collect keeps results in term order.
    Ok(pool.install(|| terms.par_iter().map(run).collect()))
}

/// Sequential search without progress reporting.
pub fn search<S: AsRef<str> + Sync>(store: &dyn RecordStore, terms: &[S]) -> Vec<SearchResult> {
    terms.iter().map(|t| lookup(store, t.as_ref())).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub total: usize,
    pub found: usize,
    pub insured: usize,
    pub not_insured: usize,
    pub not_found: usize,
}

impl SearchStats {
    pub fn from_results(results: &[SearchResult]) -> Self {
        let mut stats = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            if !result.found {
                stats.not_found += 1;
            } else {
                stats.found += 1;
                if result.is_insurance {
                    stats.insured += 1;
                } else {
                    stats.not_insured += 1;
                }
            }
        }
        stats
    }

    /// Share of found devices that are insured, in whole percent.
    pub fn insured_rate(&self) -> u32 {
        percent(self.insured, self.found)
    }

    /// Share of searched serial numbers that exist, in whole percent.
    pub fn found_rate(&self) -> u32 {
        percent(self.found, self.total)
    }
}

fn percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::SerialRecord;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory store that records the order of calls.
    #[derive(Default)]
    struct FakeStore {
        records: HashMap<String, bool>,
        broken: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeStore {
        fn with(records: &[(&str, bool)], broken: &[&str]) -> Self {
            Self {
                records: records.iter().map(|(s, i)| (s.to_string(), *i)).collect(),
                broken: broken.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl RecordStore for FakeStore {
        fn find_exact(&self, serial_number: &str) -> Result<Option<SerialRecord>, StoreError> {
            self.calls.lock().unwrap().push(serial_number.to_string());
            if self.broken.iter().any(|b| b == serial_number) {
                return Err(StoreError::Decode("boom".to_string()));
            }
            Ok(self
                .records
                .get(serial_number)
                .map(|&is_insurance| SerialRecord {
                    id: "rec".to_string(),
                    serial_number: serial_number.to_string(),
                    is_insurance,
                    created: None,
                }))
        }

        fn find_partial(&self, _: &str, _: usize) -> Result<Vec<SerialRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_results_match_terms_one_to_one() {
        let store = FakeStore::with(&[("A", true), ("B", false)], &["C"]);
        let terms = ["A", "B", "C", "D", "A"];

        let results = search(&store, &terms);

        assert_eq!(results.len(), terms.len());
        for (result, term) in results.iter().zip(terms) {
            assert_eq!(result.serial_number, term);
        }
        assert_eq!(results[0], SearchResult::found("A", true));
        assert_eq!(results[1], SearchResult::found("B", false));
        assert_eq!(results[3], SearchResult::not_found("D"));
        assert_eq!(*store.calls.lock().unwrap(), ["A", "B", "C", "D", "A"]);
    }

    #[test]
    fn test_failure_is_isolated_to_its_term() {
        let store = FakeStore::with(&[("A", true), ("C", true)], &["B"]);
        let results = search(&store, &["A", "B", "C"]);

        assert!(results[0].found);
        assert!(!results[1].found);
        assert!(!results[1].is_insurance);
        let error = results[1].error.as_deref().unwrap();
        assert!(!error.is_empty());
        assert!(results[2].found);
    }

    #[test]
    fn test_missing_term_has_no_error() {
        let store = FakeStore::default();
        let results = search(&store, &["NOPE"]);
        assert_eq!(results, [SearchResult::not_found("NOPE")]);
    }

    #[test]
    fn test_each_term_looked_up_exactly_once() {
        let store = FakeStore::with(&[], &["A", "B"]);
        search(&store, &["A", "B"]);
        assert_eq!(store.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_parallel_search_preserves_order() {
        let records: Vec<(String, bool)> =
            (0..50).map(|i| (format!("SN{i:02}"), i % 3 == 0)).collect();
        let refs: Vec<(&str, bool)> = records.iter().map(|(s, i)| (s.as_str(), *i)).collect();
        let store = FakeStore::with(&refs, &["SN07", "SN31"]);

        let terms: Vec<String> = (0..60).map(|i| format!("SN{i:02}")).collect();
        let progress = AtomicUsize::new(0);
        let results = search_serial_numbers(
            &store,
            &terms,
            SearchOptions { concurrency: 4 },
            &|| {
                progress.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        assert_eq!(progress.load(Ordering::SeqCst), terms.len());
        assert_eq!(results, search(&FakeStore::with(&refs, &["SN07", "SN31"]), &terms));
    }

    #[test]
    fn test_display_status_precedence() {
        assert_eq!(SearchResult::found("A", true).display_status(), "subscribed");
        assert_eq!(
            SearchResult::found("A", false).display_status(),
            "not subscribed"
        );
        assert_eq!(SearchResult::not_found("A").display_status(), "not found");
        assert_eq!(
            SearchResult::failed("A", "boom").display_status(),
            "lookup error"
        );
    }

    #[test]
    fn test_stats() {
        let results = vec![
            SearchResult::found("A", true),
            SearchResult::found("B", true),
            SearchResult::found("C", false),
            SearchResult::not_found("D"),
            SearchResult::failed("E", "boom"),
        ];
        let stats = SearchStats::from_results(&results);
        assert_eq!(
            stats,
            SearchStats {
                total: 5,
                found: 3,
                insured: 2,
                not_insured: 1,
                not_found: 2,
            }
        );
        assert_eq!(stats.insured_rate(), 67);
        assert_eq!(stats.found_rate(), 60);
        assert_eq!(SearchStats::default().insured_rate(), 0);
    }

    #[test]
    fn test_json_omits_absent_error() {
        let json = serde_json::to_string(&SearchResult::not_found("A")).unwrap();
        assert_eq!(
            json,
            r#"{"serial_number":"A","is_insurance":false,"found":false}"#
        );
    }
}
