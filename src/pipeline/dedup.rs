//! Duplicate removal against identity, canonical URL, and a normalized
//! content key, checked against both the current batch and prior runs.

use crate::observability::metrics;
use crate::pipeline::clean::canonicalize_url;
use crate::types::RawRecord;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub const REASON_DUPLICATE_ID: &str = "Duplicate id";
pub const REASON_DUPLICATE_URL: &str = "Duplicate URL";
pub const REASON_DUPLICATE_CONTENT: &str = "Duplicate title, time and location";

/// A dropped record and every collision it triggered.
#[derive(Debug, Clone)]
pub struct DuplicateRecord {
    pub record: RawRecord,
    pub reasons: Vec<String>,
}

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub unique: Vec<RawRecord>,
    pub duplicates: Vec<DuplicateRecord>,
}

impl DedupOutcome {
    pub fn reason_histogram(&self) -> HashMap<String, u64> {
        let mut histogram = HashMap::new();
        for duplicate in &self.duplicates {
            for reason in &duplicate.reasons {
                *histogram.entry(reason.clone()).or_insert(0) += 1;
            }
        }
        histogram
    }
}

/// First-seen-wins deduplicator, seeded with a read-only snapshot of the
/// persisted dataset. The snapshot is never mutated; each `dedupe` call
/// works on its own copies, which keeps the operation idempotent.
pub struct Deduplicator {
    known_ids: HashSet<String>,
    known_urls: HashSet<String>,
    known_keys: HashSet<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::with_known(HashSet::new(), HashSet::new(), HashSet::new())
    }

    pub fn with_known(
        known_ids: HashSet<String>,
        known_urls: HashSet<String>,
        known_keys: HashSet<String>,
    ) -> Self {
        Self { known_ids, known_urls, known_keys }
    }

    /// Split a batch into unique records and flagged duplicates.
    ///
    /// The three collision checks run independently; a record can carry
    /// multiple reasons. Later records lose to earlier ones.
    pub fn dedupe(&self, records: &[RawRecord]) -> DedupOutcome {
        let mut seen_ids = self.known_ids.clone();
        let mut seen_urls = self.known_urls.clone();
        let mut seen_keys = self.known_keys.clone();

        let mut outcome = DedupOutcome::default();

        for record in records {
            let mut reasons = Vec::new();

            let id = record.id.as_deref().filter(|s| !s.is_empty());
            if let Some(id) = id {
                if seen_ids.contains(id) {
                    reasons.push(REASON_DUPLICATE_ID.to_string());
                }
            }

            let url = canonical_url_key(&record.url);
            if let Some(url) = &url {
                if seen_urls.contains(url) {
                    reasons.push(REASON_DUPLICATE_URL.to_string());
                }
            }

            let key = content_key(record);
            if let Some(key) = &key {
                if seen_keys.contains(key) {
                    reasons.push(REASON_DUPLICATE_CONTENT.to_string());
                }
            }

            if reasons.is_empty() {
                if let Some(id) = id {
                    seen_ids.insert(id.to_string());
                }
                if let Some(url) = url {
                    seen_urls.insert(url);
                }
                if let Some(key) = key {
                    seen_keys.insert(key);
                }
                outcome.unique.push(record.clone());
            } else {
                debug!(id = ?record.id, ?reasons, "Dropping duplicate record");
                metrics::dedup::record_duplicate();
                outcome.duplicates.push(DuplicateRecord {
                    record: record.clone(),
                    reasons,
                });
            }
        }

        metrics::dedup::records_unique(outcome.unique.len() as u64);
        outcome
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

fn canonical_url_key(url: &str) -> Option<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(canonicalize_url(trimmed))
}

/// SHA-256 digest over the normalized `title|time|location` key.
pub fn content_key(record: &RawRecord) -> Option<String> {
    let normalized = format!(
        "{}|{}|{}",
        normalize_for_key(&record.title),
        normalize_for_key(&record.time_text),
        normalize_for_key(&record.location_text),
    );
    if normalized == "||" {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Some(hex::encode(hasher.finalize()))
}

/// Case-fold, strip punctuation, collapse whitespace.
fn normalize_for_key(text: &str) -> String {
    let stripped: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
