use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Unvalidated event data as extracted from one listing page.
///
/// Immutable once produced; later stages construct new records instead of
/// mutating these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// Site-assigned identifier. May be absent for malformed listings.
    pub id: Option<String>,
    pub title: String,
    /// Free-form date/time string as shown on the listing.
    pub time_text: String,
    /// Free-form location string as shown on the listing.
    pub location_text: String,
    pub url: String,
    pub image_url: String,
    pub view_count: Option<i64>,
    pub favorite_count: Option<i64>,
    pub discovered_at: DateTime<Utc>,
    /// Position in original listing order, assigned by the pagination walk.
    pub sort_rank: u64,
}

/// A raw record after normalization: trimmed text, canonical URLs, clamped
/// counters, and a canonical `MM/DD HH:MM` time token where recognizable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedRecord {
    pub id: Option<String>,
    pub title: String,
    pub time_text: String,
    pub location_text: String,
    pub url: String,
    pub image_url: String,
    pub view_count: Option<i64>,
    pub favorite_count: Option<i64>,
    pub discovered_at: DateTime<Utc>,
    pub sort_rank: u64,
    /// Labels of the rewrites that were applied, for the quality report.
    pub cleaning_actions: Vec<String>,
}

/// Validation classification for a cleaned record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Valid,
    Invalid,
    Warning,
}

/// Individual data-quality issues detected by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueCode {
    MissingId,
    MissingTitle,
    MissingUrl,
    TitleTooLong,
    LocationTooLong,
    CounterOutOfRange,
    MalformedUrl,
    BadTimeToken,
    MissingLocation,
    MissingImage,
    MissingCounters,
    ShortTitle,
    PlaceholderLocation,
}

impl IssueCode {
    /// Critical issues exclude the record from the published dataset.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            IssueCode::MissingId
                | IssueCode::MissingTitle
                | IssueCode::MissingUrl
                | IssueCode::TitleTooLong
                | IssueCode::LocationTooLong
                | IssueCode::CounterOutOfRange
                | IssueCode::MalformedUrl
                | IssueCode::BadTimeToken
        )
    }

    pub fn message(&self) -> &'static str {
        match self {
            IssueCode::MissingId => "Missing event id",
            IssueCode::MissingTitle => "Missing event title",
            IssueCode::MissingUrl => "Missing event URL",
            IssueCode::TitleTooLong => "Title exceeds length ceiling",
            IssueCode::LocationTooLong => "Location exceeds length ceiling",
            IssueCode::CounterOutOfRange => "Counter out of range",
            IssueCode::MalformedUrl => "Malformed event URL",
            IssueCode::BadTimeToken => "Time token does not match MM/DD HH:MM",
            IssueCode::MissingLocation => "Missing location",
            IssueCode::MissingImage => "Missing image",
            IssueCode::MissingCounters => "Missing engagement counters",
            IssueCode::ShortTitle => "Suspiciously short title",
            IssueCode::PlaceholderLocation => "Placeholder location text",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// A cleaned record plus its validation classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedRecord {
    pub record: CleanedRecord,
    pub status: RecordStatus,
    pub issues: Vec<IssueCode>,
}

/// How a city match was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Province,
    Keyword,
    Fuzzy,
}

/// One resolved city for a record's location text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingResult {
    pub city_id: String,
    /// Certainty of the match, in [0, 1].
    pub confidence: f64,
    pub match_type: MatchType,
    /// The rule pattern or city name that matched.
    pub matched_text: String,
}

/// Canonical city reference data. Loaded once per run, read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct City {
    pub id: String,
    pub name_zh: String,
    #[serde(default)]
    pub name_en: String,
    #[serde(default)]
    pub province: Option<String>,
    /// Well-known sub-district keywords for major cities.
    #[serde(default)]
    pub districts: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// A published event: validated, city-mapped, and decorated for rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub time_text: String,
    pub location_text: String,
    pub url: String,
    pub image_url: String,
    /// Relative path of the downloaded image, when the fetch succeeded.
    pub local_image: Option<String>,
    pub view_count: i64,
    pub favorite_count: i64,
    pub sort_rank: u64,
    pub status: RecordStatus,
    pub issues: Vec<IssueCode>,
    pub tags: BTreeSet<String>,
    pub is_upcoming: bool,
    pub formatted_date: String,
    /// At most 3 entries, sorted descending by confidence.
    pub city_mappings: Vec<MappingResult>,
}

/// One page of extractor output.
#[derive(Debug, Clone)]
pub struct PageBatch {
    pub records: Vec<RawRecord>,
    pub has_more: bool,
}

/// Stopping aggressiveness for a pagination walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkMode {
    /// Walk every page; only empty pages or failures stop the run.
    Full,
    /// Stop after this many consecutive pages with no new records.
    Incremental(u32),
    /// Stop after the first page with no new records.
    Quick,
}

impl WalkMode {
    /// The no-new-records stop threshold, or None when disabled.
    pub fn pages_without_new_threshold(&self) -> Option<u32> {
        match self {
            WalkMode::Full => None,
            WalkMode::Incremental(k) => Some(*k),
            WalkMode::Quick => Some(1),
        }
    }
}

impl fmt::Display for WalkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalkMode::Full => write!(f, "full"),
            WalkMode::Incremental(k) => write!(f, "incremental({})", k),
            WalkMode::Quick => write!(f, "quick"),
        }
    }
}

/// Core trait every listing page source must implement.
///
/// The markup-coupled extraction heuristics live behind this seam; the
/// pipeline only sees raw field records and a has-more flag.
#[async_trait::async_trait]
pub trait PageExtractor: Send + Sync {
    /// Unique identifier for this source.
    fn source_name(&self) -> &'static str;

    /// Go to page `page` (1-based) of the listing and extract its records.
    async fn fetch_page(&self, page: u32) -> Result<PageBatch>;
}
