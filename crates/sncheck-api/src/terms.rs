//! Turning free text and imported files into the list of serial numbers to look up.

use crate::error::ImportError;
use crate::export::EXPORT_HEADER;
use std::fs;
use std::ops::Deref;
use std::path::Path;

/// Maximum number of serial numbers looked up in one search.
pub const MAX_TERMS: usize = 100;

const BYTE_ORDER_MARK: char = '\u{feff}';

/// Ordered, trimmed, non-empty search terms, at most [`MAX_TERMS`] long.
/// Duplicates are kept; each one is looked up separately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTermList(Vec<String>);

impl QueryTermList {
    /// Trim, drop empties and keep the first [`MAX_TERMS`] terms in order.
    pub fn from_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            terms
                .into_iter()
                .map(|t| t.as_ref().trim().to_string())
                .filter(|t| !t.is_empty())
                .take(MAX_TERMS)
                .collect(),
        )
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl Deref for QueryTermList {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a QueryTermList {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Split pasted text on newlines and commas.
pub fn parse_bulk_text(text: &str) -> QueryTermList {
    QueryTermList::from_terms(text.split(['\n', ',']))
}

/// First column of each line of delimited text.
///
/// Lines are split before any quoting applies, so a stray or unbalanced quote
/// never carries over into the next line. A leading byte-order mark is ignored,
/// and so is a first line equal to the header this tool writes on export, so an
/// exported file imports cleanly.
pub fn parse_delimited(content: &str) -> Result<QueryTermList, ImportError> {
    let content = content.strip_prefix(BYTE_ORDER_MARK).unwrap_or(content);

    let mut firsts = Vec::new();
    for (index, line) in content.split('\n').enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(record) = parse_line(line)? else {
            continue;
        };
        if index == 0 && is_export_header(&record) {
            continue;
        }
        if let Some(first) = record.get(0) {
            firsts.push(first.to_string());
        }
    }

    Ok(QueryTermList::from_terms(firsts))
}

fn parse_line(line: &str) -> Result<Option<csv::StringRecord>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let record = reader.records().next().transpose()?;
    Ok(record)
}

/// Read `path` and extract its first column.
///
/// Fails without producing a partial list, so the caller's current terms stay as they were.
pub fn import_file(path: &Path) -> Result<QueryTermList, ImportError> {
    let content = fs::read_to_string(path).map_err(|source| ImportError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let terms = parse_delimited(&content)?;
    if terms.is_empty() {
        return Err(ImportError::Empty(path.to_path_buf()));
    }
    log::debug!("Imported {} serial numbers from {}", terms.len(), path.display());
    Ok(terms)
}
