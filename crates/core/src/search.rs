use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

use crate::model::FileRecord;

/// Case-insensitive match score of `needle` within `hay`; higher is closer.
pub fn fuzzy_score(needle: &str, hay: &str) -> Option<i64> {
    SkimMatcherV2::default().ignore_case().fuzzy_match(hay, needle)
}

/// Records whose name fuzzily matches `needle`, best match first.
/// Equal scores keep their input order. A blank needle keeps everything.
pub fn filter_by_name(records: Vec<FileRecord>, needle: &str) -> Vec<FileRecord> {
    let needle = needle.trim();
    if needle.is_empty() {
        return records;
    }
    let mut scored: Vec<(i64, FileRecord)> = records
        .into_iter()
        .filter_map(|r| fuzzy_score(needle, &r.name).map(|s| (s, r)))
        .collect();
    // stable
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, r)| r).collect()
}
