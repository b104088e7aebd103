//! Persistence for the known-record dataset and the published artifacts.
//!
//! The persisted dataset (one JSON array of raw records plus the content-key
//! digest list) is the system of record for "already known" identifiers. A
//! run computes its full next-state in memory and replaces the files
//! atomically, never partially.

use crate::error::{Result, ScraperError};
use crate::pipeline::dedup::content_key;
use crate::pipeline::stats::{QualityReport, Stats};
use crate::types::{City, ProcessedEvent, RawRecord};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// Read-only view of the persisted dataset, taken once per run.
#[derive(Debug, Clone, Default)]
pub struct KnownSnapshot {
    pub ids: HashSet<String>,
    pub urls: HashSet<String>,
    pub content_keys: HashSet<String>,
    pub record_count: usize,
}

/// Store of records accepted by prior runs. A single run owns its snapshot
/// exclusively; `commit` replaces the dataset as one unit.
pub trait KnownIdStore: Send + Sync {
    fn contains(&self, id: &str) -> bool;
    fn snapshot(&self) -> KnownSnapshot;
    fn commit(&mut self, new_records: &[RawRecord]) -> Result<()>;
    /// Age of the dataset, None when nothing was persisted yet.
    fn dataset_age(&self) -> Option<Duration>;
}

/// JSON-file-backed store: `known_events.json` holds the raw records,
/// `known_keys.json` the content-key digests.
pub struct JsonFileStore {
    events_path: PathBuf,
    keys_path: PathBuf,
    records: Vec<RawRecord>,
    keys: Vec<String>,
}

impl JsonFileStore {
    pub fn open<P: AsRef<Path>>(events_path: P, keys_path: P) -> Result<Self> {
        let events_path = events_path.as_ref().to_path_buf();
        let keys_path = keys_path.as_ref().to_path_buf();

        let records: Vec<RawRecord> = read_json_or_default(&events_path)?;
        let keys: Vec<String> = read_json_or_default(&keys_path)?;
        debug!(
            records = records.len(),
            path = %events_path.display(),
            "Loaded persisted dataset"
        );

        Ok(Self { events_path, keys_path, records, keys })
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

impl KnownIdStore for JsonFileStore {
    fn contains(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.id.as_deref() == Some(id))
    }

    fn snapshot(&self) -> KnownSnapshot {
        let mut snapshot = KnownSnapshot {
            record_count: self.records.len(),
            content_keys: self.keys.iter().cloned().collect(),
            ..KnownSnapshot::default()
        };
        for record in &self.records {
            if let Some(id) = &record.id {
                snapshot.ids.insert(id.clone());
            }
            if !record.url.trim().is_empty() {
                snapshot.urls.insert(crate::pipeline::clean::canonicalize_url(&record.url));
            }
        }
        snapshot
    }

    fn commit(&mut self, new_records: &[RawRecord]) -> Result<()> {
        let mut next_records = self.records.clone();
        next_records.extend(new_records.iter().cloned());

        let mut next_keys = self.keys.clone();
        let existing: HashSet<&String> = next_keys.iter().collect();
        let mut added_keys: Vec<String> = Vec::new();
        for record in new_records {
            if let Some(key) = content_key(record) {
                if !existing.contains(&key) && !added_keys.contains(&key) {
                    added_keys.push(key);
                }
            }
        }
        next_keys.extend(added_keys);

        write_json_atomic(&self.events_path, &next_records)?;
        write_json_atomic(&self.keys_path, &next_keys)?;

        info!(
            added = new_records.len(),
            total = next_records.len(),
            "Committed dataset"
        );

        self.records = next_records;
        self.keys = next_keys;
        Ok(())
    }

    fn dataset_age(&self) -> Option<Duration> {
        let modified = fs::metadata(&self.events_path).ok()?.modified().ok()?;
        SystemTime::now().duration_since(modified).ok()
    }
}

/// In-memory store for tests and fixture-driven runs.
#[derive(Default)]
pub struct InMemoryStore {
    records: Vec<RawRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(records: Vec<RawRecord>) -> Self {
        Self { records }
    }
}

impl KnownIdStore for InMemoryStore {
    fn contains(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.id.as_deref() == Some(id))
    }

    fn snapshot(&self) -> KnownSnapshot {
        let mut snapshot = KnownSnapshot {
            record_count: self.records.len(),
            ..KnownSnapshot::default()
        };
        for record in &self.records {
            if let Some(id) = &record.id {
                snapshot.ids.insert(id.clone());
            }
            if !record.url.trim().is_empty() {
                snapshot.urls.insert(crate::pipeline::clean::canonicalize_url(&record.url));
            }
            if let Some(key) = content_key(record) {
                snapshot.content_keys.insert(key);
            }
        }
        snapshot
    }

    fn commit(&mut self, new_records: &[RawRecord]) -> Result<()> {
        self.records.extend(new_records.iter().cloned());
        Ok(())
    }

    fn dataset_age(&self) -> Option<Duration> {
        None
    }
}

fn read_json_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(&content)?)
}

/// Load the city reference set. Missing or empty reference data is a setup
/// failure, the one condition that aborts a run outright.
pub fn load_cities<P: AsRef<Path>>(path: P) -> Result<Vec<City>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ScraperError::Setup(format!(
            "City reference data missing at '{}'",
            path.display()
        )));
    }
    let content = fs::read_to_string(path)?;
    let cities: Vec<City> = serde_json::from_str(&content)?;
    if cities.iter().all(|c| !c.active) {
        return Err(ScraperError::Setup(format!(
            "City reference data at '{}' has no active cities",
            path.display()
        )));
    }
    debug!(cities = cities.len(), "Loaded city reference data");
    Ok(cities)
}

/// Serialize to a sibling temp file, then rename over the target.
fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(value)?;
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Writes the four per-run JSON artifacts the rendering layer consumes.
pub struct ArtifactWriter {
    output_dir: PathBuf,
}

impl ArtifactWriter {
    /// An unwritable output location is a setup failure.
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir).map_err(|e| {
            ScraperError::Setup(format!(
                "Output directory '{}' is not writable: {}",
                output_dir.display(),
                e
            ))
        })?;
        Ok(Self { output_dir })
    }

    pub fn write_events(&self, events: &[ProcessedEvent]) -> Result<PathBuf> {
        self.write("events.json", &events)
    }

    /// City id → slugs of the events mapped to it; an event appears under
    /// every city it mapped to.
    pub fn write_city_events(&self, events: &[ProcessedEvent]) -> Result<PathBuf> {
        let mut by_city: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for event in events {
            for mapping in &event.city_mappings {
                by_city
                    .entry(mapping.city_id.clone())
                    .or_default()
                    .push(event.slug.clone());
            }
        }
        self.write("city_events.json", &by_city)
    }

    pub fn write_stats(&self, stats: &Stats) -> Result<PathBuf> {
        self.write("stats.json", stats)
    }

    pub fn write_quality_report(&self, report: &QualityReport) -> Result<PathBuf> {
        self.write("quality_report.json", report)
    }

    fn write<T: serde::Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.output_dir.join(name);
        write_json_atomic(&path, value)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn raw(id: &str) -> RawRecord {
        RawRecord {
            id: Some(id.to_string()),
            title: format!("event {}", id),
            time_text: "09/21 14:00".to_string(),
            location_text: "北京".to_string(),
            url: format!("https://example.com/e/{}", id),
            image_url: String::new(),
            view_count: Some(0),
            favorite_count: Some(0),
            discovered_at: Utc::now(),
            sort_rank: 0,
        }
    }

    #[test]
    fn test_empty_store_roundtrip() {
        let dir = tempdir().unwrap();
        let events = dir.path().join("known_events.json");
        let keys = dir.path().join("known_keys.json");

        let mut store = JsonFileStore::open(&events, &keys).unwrap();
        assert_eq!(store.record_count(), 0);
        assert!(store.dataset_age().is_none());

        store.commit(&[raw("a"), raw("b")]).unwrap();
        assert!(store.contains("a"));
        assert!(store.dataset_age().is_some());

        // reopen from disk
        let reopened = JsonFileStore::open(&events, &keys).unwrap();
        assert_eq!(reopened.record_count(), 2);
        let snapshot = reopened.snapshot();
        assert!(snapshot.ids.contains("a"));
        assert!(snapshot.ids.contains("b"));
        assert_eq!(snapshot.content_keys.len(), 2);
    }

    #[test]
    fn test_commit_appends_not_replaces() {
        let dir = tempdir().unwrap();
        let events = dir.path().join("known_events.json");
        let keys = dir.path().join("known_keys.json");

        let mut store = JsonFileStore::open(&events, &keys).unwrap();
        store.commit(&[raw("a")]).unwrap();
        store.commit(&[raw("b")]).unwrap();

        let reopened = JsonFileStore::open(&events, &keys).unwrap();
        assert_eq!(reopened.record_count(), 2);
    }

    #[test]
    fn test_no_stray_temp_files_after_commit() {
        let dir = tempdir().unwrap();
        let events = dir.path().join("known_events.json");
        let keys = dir.path().join("known_keys.json");

        let mut store = JsonFileStore::open(&events, &keys).unwrap();
        store.commit(&[raw("a")]).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".tmp")), "{:?}", names);
    }

    #[test]
    fn test_snapshot_is_read_only_copy() {
        let mut store = InMemoryStore::new();
        store.commit(&[raw("a")]).unwrap();

        let mut snapshot = store.snapshot();
        snapshot.ids.insert("phantom".to_string());

        assert!(!store.contains("phantom"));
    }

    #[test]
    fn test_missing_city_data_is_setup_failure() {
        let err = load_cities("definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ScraperError::Setup(_)));
    }

    #[test]
    fn test_city_data_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cities.json");
        fs::write(
            &path,
            r#"[{"id": "beijing", "name_zh": "北京", "name_en": "Beijing", "districts": ["朝阳"]}]"#,
        )
        .unwrap();

        let cities = load_cities(&path).unwrap();
        assert_eq!(cities.len(), 1);
        assert!(cities[0].active);
        assert_eq!(cities[0].districts, vec!["朝阳"]);
    }

    #[test]
    fn test_artifact_writer_creates_all_files() {
        let dir = tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("out")).unwrap();

        writer.write_events(&[]).unwrap();
        let stats = crate::pipeline::stats::aggregate(&[], Utc::now());
        writer.write_stats(&stats).unwrap();
        writer.write_city_events(&[]).unwrap();

        assert!(dir.path().join("out/events.json").exists());
        assert!(dir.path().join("out/stats.json").exists());
        assert!(dir.path().join("out/city_events.json").exists());
    }
}
