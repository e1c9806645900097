//! Deduplication and cleanup of extracted collections.

use std::collections::HashSet;

use crate::extractor::{ExtractionResult, Items};
use crate::records::{Record, SENTINEL};

/// Entries longer than this (in chars) are dropped.
pub const MAX_ENTRY_LEN: usize = 2048;

/// Trim, drop empty/overlong entries, dedup keeping first-seen order.
pub fn normalize_strings(items: Vec<String>, max_len: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s.chars().count() <= max_len)
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Trim every field (blank becomes the sentinel) and dedup whole records.
pub fn normalize_records(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .map(|record| {
            let fields = record
                .into_fields()
                .into_iter()
                .map(|(k, v)| {
                    let v = v.trim();
                    let v = if v.is_empty() { SENTINEL } else { v };
                    (k, v.to_string())
                })
                .collect();
            Record::new(fields)
        })
        .filter(|r| seen.insert(r.clone()))
        .collect()
}

pub fn normalize(result: ExtractionResult) -> ExtractionResult {
    let items = match result.items {
        Items::Strings(v) => Items::Strings(normalize_strings(v, MAX_ENTRY_LEN)),
        Items::Records(v) => Items::Records(normalize_records(v)),
    };
    ExtractionResult {
        name: result.name,
        items,
    }
}

pub fn normalize_all(results: Vec<ExtractionResult>) -> Vec<ExtractionResult> {
    results.into_iter().map(normalize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dedup_preserves_first_seen_order() {
        let out = normalize_strings(strings(&["b", "a", " b ", "c", "a", ""]), MAX_ENTRY_LEN);
        assert_eq!(out, strings(&["b", "a", "c"]));
    }

    #[test]
    fn drops_overlong_entries() {
        let long = "x".repeat(11);
        let out = normalize_strings(vec![long, "short".into()], 10);
        assert_eq!(out, strings(&["short"]));
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = vec![
            strings(&[]),
            strings(&["  a", "a", "A", "b  ", "", "   ", "b", "c"]),
            strings(&["https://x.test/1", "https://x.test/1 ", "https://x.test/2"]),
            vec!["y".repeat(MAX_ENTRY_LEN + 1), "z".into()],
        ];
        for input in inputs {
            let once = normalize_strings(input, MAX_ENTRY_LEN);
            let twice = normalize_strings(once.clone(), MAX_ENTRY_LEN);
            assert_eq!(once, twice);
        }

        let records = vec![
            Record::new(vec![("firm".into(), " Acme ".into()), ("email".into(), "".into())]),
            Record::new(vec![("firm".into(), "Acme".into()), ("email".into(), "N/A".into())]),
            Record::new(vec![("firm".into(), "Beta".into()), ("email".into(), "b@beta.io".into())]),
        ];
        let once = normalize_records(records);
        assert_eq!(once.len(), 2);
        assert_eq!(normalize_records(once.clone()), once);
    }

    #[test]
    fn normalize_keeps_dataset_name() {
        let result = ExtractionResult::strings("links", strings(&["a", "a"]));
        let out = normalize(result);
        assert_eq!(out.name, "links");
        assert_eq!(out.len(), 1);
    }
}
