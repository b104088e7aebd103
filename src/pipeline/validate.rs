//! Classification of cleaned records: hard failures, warnings, and the
//! batch quality score. Data-quality problems are classifications here,
//! never errors.

use crate::config::ValidationConfig;
use crate::observability::metrics;
use crate::types::{CleanedRecord, IssueCode, RecordStatus, ValidatedRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use url::Url;

static CANONICAL_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2})/(\d{2}) (\d{2}):(\d{2})$").unwrap());

/// Location strings that mean "no real venue yet".
const PLACEHOLDER_LOCATIONS: &[&str] = &["待定", "线上", "地点待定", "待通知", "tbd", "unknown", "其他"];

#[derive(Debug)]
pub struct ValidationOutcome {
    pub records: Vec<ValidatedRecord>,
    /// `round(100 * (valid + warning) / total)`; 100 for an empty batch.
    pub quality_score: u32,
    pub valid_count: usize,
    pub warning_count: usize,
    pub invalid_count: usize,
    pub issue_histogram: HashMap<IssueCode, u64>,
}

pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Classify one cleaned record.
    pub fn validate(&self, record: &CleanedRecord) -> ValidatedRecord {
        let mut issues = Vec::new();

        if record.id.is_none() {
            issues.push(IssueCode::MissingId);
        }
        if record.title.is_empty() {
            issues.push(IssueCode::MissingTitle);
        } else {
            if record.title.chars().count() > self.config.max_title_chars {
                issues.push(IssueCode::TitleTooLong);
            }
            if record.title.chars().count() < self.config.min_title_chars {
                issues.push(IssueCode::ShortTitle);
            }
        }

        if record.url.is_empty() {
            issues.push(IssueCode::MissingUrl);
        } else if Url::parse(&record.url).is_err() {
            issues.push(IssueCode::MalformedUrl);
        }

        if record.location_text.is_empty() {
            issues.push(IssueCode::MissingLocation);
        } else {
            if record.location_text.chars().count() > self.config.max_location_chars {
                issues.push(IssueCode::LocationTooLong);
            }
            let lower = record.location_text.to_lowercase();
            if PLACEHOLDER_LOCATIONS.iter().any(|p| lower == *p) {
                issues.push(IssueCode::PlaceholderLocation);
            }
        }

        // A missing time is tolerated; a present token must be canonical.
        if !record.time_text.is_empty() && !is_canonical_time_token(&record.time_text) {
            issues.push(IssueCode::BadTimeToken);
        }

        for counter in [record.view_count, record.favorite_count] {
            if let Some(value) = counter {
                if value < 0 || value >= self.config.counter_upper_bound as i64 {
                    issues.push(IssueCode::CounterOutOfRange);
                    break;
                }
            }
        }
        if record.view_count.is_none() && record.favorite_count.is_none() {
            issues.push(IssueCode::MissingCounters);
        }

        if record.image_url.is_empty() {
            issues.push(IssueCode::MissingImage);
        }

        let status = if issues.iter().any(IssueCode::is_critical) {
            RecordStatus::Invalid
        } else if issues.is_empty() {
            RecordStatus::Valid
        } else {
            RecordStatus::Warning
        };

        ValidatedRecord { record: record.clone(), status, issues }
    }

    /// Classify a batch and compute its quality score and issue histogram.
    pub fn validate_batch(&self, records: &[CleanedRecord]) -> ValidationOutcome {
        let validated: Vec<ValidatedRecord> = records.iter().map(|r| self.validate(r)).collect();

        let mut histogram: HashMap<IssueCode, u64> = HashMap::new();
        let (mut valid, mut warning, mut invalid) = (0usize, 0usize, 0usize);
        for record in &validated {
            for issue in &record.issues {
                *histogram.entry(*issue).or_insert(0) += 1;
            }
            match record.status {
                RecordStatus::Valid => valid += 1,
                RecordStatus::Warning => warning += 1,
                RecordStatus::Invalid => invalid += 1,
            }
        }

        metrics::validate::records_valid(valid as u64);
        metrics::validate::records_warning(warning as u64);
        metrics::validate::records_invalid(invalid as u64);

        let total = validated.len();
        let quality_score = if total == 0 {
            100
        } else {
            (((valid + warning) * 100) as f64 / total as f64).round() as u32
        };

        ValidationOutcome {
            records: validated,
            quality_score,
            valid_count: valid,
            warning_count: warning,
            invalid_count: invalid,
            issue_histogram: histogram,
        }
    }
}

/// Strict canonical `MM/DD HH:MM` with in-range fields.
fn is_canonical_time_token(time_text: &str) -> bool {
    let Some(caps) = CANONICAL_TOKEN_RE.captures(time_text) else {
        return false;
    };
    let month: u32 = caps[1].parse().unwrap_or(0);
    let day: u32 = caps[2].parse().unwrap_or(0);
    let hour: u32 = caps[3].parse().unwrap_or(99);
    let minute: u32 = caps[4].parse().unwrap_or(99);
    (1..=12).contains(&month) && (1..=31).contains(&day) && hour <= 23 && minute <= 59
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cleaned() -> CleanedRecord {
        CleanedRecord {
            id: Some("e1".to_string()),
            title: "城市读书会".to_string(),
            time_text: "09/21 14:00".to_string(),
            location_text: "北京朝阳".to_string(),
            url: "https://example.com/e/1".to_string(),
            image_url: "https://example.com/img/1.jpg".to_string(),
            view_count: Some(100),
            favorite_count: Some(5),
            discovered_at: Utc::now(),
            sort_rank: 0,
            cleaning_actions: Vec::new(),
        }
    }

    fn validator() -> Validator {
        Validator::new(ValidationConfig::default())
    }

    #[test]
    fn test_clean_record_is_valid() {
        let validated = validator().validate(&cleaned());
        assert_eq!(validated.status, RecordStatus::Valid);
        assert!(validated.issues.is_empty());
    }

    #[test]
    fn test_missing_url_is_invalid() {
        let mut record = cleaned();
        record.url = String::new();
        let validated = validator().validate(&record);
        assert_eq!(validated.status, RecordStatus::Invalid);
        assert!(validated.issues.contains(&IssueCode::MissingUrl));
        assert_eq!(IssueCode::MissingUrl.message(), "Missing event URL");
    }

    #[test]
    fn test_missing_id_is_invalid() {
        let mut record = cleaned();
        record.id = None;
        let validated = validator().validate(&record);
        assert_eq!(validated.status, RecordStatus::Invalid);
        assert!(validated.issues.contains(&IssueCode::MissingId));
    }

    #[test]
    fn test_overlong_title_is_invalid() {
        let mut record = cleaned();
        record.title = "长".repeat(121);
        let validated = validator().validate(&record);
        assert_eq!(validated.status, RecordStatus::Invalid);
        assert!(validated.issues.contains(&IssueCode::TitleTooLong));
    }

    #[test]
    fn test_unrecognized_time_is_invalid() {
        let mut record = cleaned();
        record.time_text = "每周六下午".to_string();
        let validated = validator().validate(&record);
        assert!(validated.issues.contains(&IssueCode::BadTimeToken));

        record.time_text = "13/41 99:99".to_string();
        let validated = validator().validate(&record);
        assert!(validated.issues.contains(&IssueCode::BadTimeToken));
    }

    #[test]
    fn test_missing_location_and_image_warn_only() {
        let mut record = cleaned();
        record.location_text = String::new();
        record.image_url = String::new();
        let validated = validator().validate(&record);
        assert_eq!(validated.status, RecordStatus::Warning);
        assert!(validated.issues.contains(&IssueCode::MissingLocation));
        assert!(validated.issues.contains(&IssueCode::MissingImage));
    }

    #[test]
    fn test_placeholder_location_warns() {
        let mut record = cleaned();
        record.location_text = "待定".to_string();
        let validated = validator().validate(&record);
        assert_eq!(validated.status, RecordStatus::Warning);
        assert!(validated.issues.contains(&IssueCode::PlaceholderLocation));
    }

    #[test]
    fn test_short_title_warns() {
        let mut record = cleaned();
        record.title = "会".to_string();
        let validated = validator().validate(&record);
        assert_eq!(validated.status, RecordStatus::Warning);
        assert!(validated.issues.contains(&IssueCode::ShortTitle));
    }

    #[test]
    fn test_quality_score_bounds() {
        let good = cleaned();
        let mut bad = cleaned();
        bad.url = String::new();

        let outcome = validator().validate_batch(&[good.clone(), bad]);
        assert_eq!(outcome.quality_score, 50);
        assert!(outcome.quality_score <= 100);

        let outcome = validator().validate_batch(&[good]);
        assert_eq!(outcome.quality_score, 100);

        let outcome = validator().validate_batch(&[]);
        assert_eq!(outcome.quality_score, 100);
    }

    #[test]
    fn test_score_is_100_only_without_invalids() {
        let mut warned = cleaned();
        warned.image_url = String::new();
        let outcome = validator().validate_batch(&[warned]);
        assert_eq!(outcome.invalid_count, 0);
        assert_eq!(outcome.quality_score, 100);

        let mut invalid = cleaned();
        invalid.url = String::new();
        let outcome = validator().validate_batch(&[cleaned(), cleaned(), invalid]);
        assert!(outcome.quality_score < 100);
    }

    #[test]
    fn test_issue_histogram_counts_across_batch() {
        let mut a = cleaned();
        a.image_url = String::new();
        let mut b = cleaned();
        b.image_url = String::new();
        b.url = String::new();

        let outcome = validator().validate_batch(&[a, b]);
        assert_eq!(outcome.issue_histogram[&IssueCode::MissingImage], 2);
        assert_eq!(outcome.issue_histogram[&IssueCode::MissingUrl], 1);
    }
}
