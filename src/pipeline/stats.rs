//! Aggregate statistics and the per-run quality report consumed by the
//! rendering layer.

use crate::pipeline::dedup::DedupOutcome;
use crate::pipeline::paginator::WalkOutcome;
use crate::pipeline::validate::ValidationOutcome;
use crate::types::{CleanedRecord, ProcessedEvent, WalkMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

const TOP_N: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopEvent {
    pub slug: String,
    pub title: String,
    pub count: i64,
}

/// Aggregate statistics over one run's published events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub total_events: usize,
    pub upcoming_events: usize,
    pub past_events: usize,
    pub mapped_events: usize,
    pub unmapped_events: usize,
    /// `mapped_events / total_events`, 0.0 for an empty batch.
    pub mapping_coverage: f64,
    pub city_counts: BTreeMap<String, usize>,
    pub total_views: i64,
    pub total_favorites: i64,
    pub average_views: f64,
    pub average_favorites: f64,
    pub top_by_views: Vec<TopEvent>,
    pub top_by_favorites: Vec<TopEvent>,
    /// Event counts keyed by the `MM` prefix of the canonical time token.
    pub monthly_distribution: BTreeMap<String, usize>,
    pub generated_at: DateTime<Utc>,
}

/// Compute run statistics from the processed events.
pub fn aggregate(events: &[ProcessedEvent], now: DateTime<Utc>) -> Stats {
    let total_events = events.len();
    let upcoming_events = events.iter().filter(|e| e.is_upcoming).count();
    let mapped_events = events.iter().filter(|e| !e.city_mappings.is_empty()).count();
    let unmapped_events = total_events - mapped_events;

    let mut city_counts: BTreeMap<String, usize> = BTreeMap::new();
    for event in events {
        for mapping in &event.city_mappings {
            *city_counts.entry(mapping.city_id.clone()).or_insert(0) += 1;
        }
    }

    let total_views: i64 = events.iter().map(|e| e.view_count).sum();
    let total_favorites: i64 = events.iter().map(|e| e.favorite_count).sum();
    let (average_views, average_favorites) = if total_events == 0 {
        (0.0, 0.0)
    } else {
        (
            total_views as f64 / total_events as f64,
            total_favorites as f64 / total_events as f64,
        )
    };

    let mut monthly_distribution: BTreeMap<String, usize> = BTreeMap::new();
    for event in events {
        if let Some(month) = event.time_text.get(0..2).filter(|m| m.chars().all(|c| c.is_ascii_digit())) {
            *monthly_distribution.entry(month.to_string()).or_insert(0) += 1;
        }
    }

    Stats {
        total_events,
        upcoming_events,
        past_events: total_events - upcoming_events,
        mapped_events,
        unmapped_events,
        mapping_coverage: if total_events == 0 {
            0.0
        } else {
            mapped_events as f64 / total_events as f64
        },
        city_counts,
        total_views,
        total_favorites,
        average_views,
        average_favorites,
        top_by_views: top_by(events, |e| e.view_count),
        top_by_favorites: top_by(events, |e| e.favorite_count),
        monthly_distribution,
        generated_at: now,
    }
}

fn top_by(events: &[ProcessedEvent], count: impl Fn(&ProcessedEvent) -> i64) -> Vec<TopEvent> {
    let mut ranked: Vec<&ProcessedEvent> = events.iter().collect();
    ranked.sort_by(|a, b| count(b).cmp(&count(a)).then_with(|| a.slug.cmp(&b.slug)));
    ranked
        .into_iter()
        .take(TOP_N)
        .map(|e| TopEvent {
            slug: e.slug.clone(),
            title: e.title.clone(),
            count: count(e),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationSummary {
    pub pages_visited: u32,
    pub pages_failed: Vec<u32>,
    pub records_seen: usize,
    pub stop_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSummary {
    pub input: usize,
    pub unique: usize,
    pub duplicates: usize,
    pub reasons: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningSummary {
    pub records: usize,
    pub actions: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub valid: usize,
    pub warning: usize,
    pub invalid: usize,
    pub issues: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueSummary {
    /// Instances of hard-failure issues across the batch.
    pub critical: u64,
    pub warnings: u64,
}

/// Structured account of one run: what was accepted, rejected, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub run_id: Uuid,
    pub mode: String,
    pub generated_at: DateTime<Utc>,
    pub original_count: usize,
    pub final_count: usize,
    pub quality_score: u32,
    /// True when the run fell back to the last good persisted dataset.
    pub degraded: bool,
    pub degraded_note: Option<String>,
    pub pagination: PaginationSummary,
    pub dedup: DedupSummary,
    pub cleaning: CleaningSummary,
    pub validation: ValidationSummary,
    pub issues: IssueSummary,
    pub mapping_coverage: f64,
    pub recommendations: Vec<Recommendation>,
}

/// Assemble the quality report from the per-stage outputs.
#[allow(clippy::too_many_arguments)]
pub fn build_report(
    mode: WalkMode,
    walk: &WalkOutcome,
    dedup: &DedupOutcome,
    cleaned: &[CleanedRecord],
    validation: &ValidationOutcome,
    stats: &Stats,
    final_count: usize,
    now: DateTime<Utc>,
) -> QualityReport {
    let mut cleaning_actions: HashMap<String, u64> = HashMap::new();
    for record in cleaned {
        for action in &record.cleaning_actions {
            *cleaning_actions.entry(action.clone()).or_insert(0) += 1;
        }
    }

    let mut critical = 0u64;
    let mut warnings = 0u64;
    let mut issue_counts: HashMap<String, u64> = HashMap::new();
    for (code, count) in &validation.issue_histogram {
        *issue_counts.entry(code.message().to_string()).or_insert(0) += count;
        if code.is_critical() {
            critical += count;
        } else {
            warnings += count;
        }
    }

    let original_count = walk.new_records.len();
    let recommendations = recommend(
        validation.quality_score,
        original_count,
        dedup.duplicates.len(),
        stats.mapping_coverage,
    );

    QualityReport {
        run_id: Uuid::new_v4(),
        mode: mode.to_string(),
        generated_at: now,
        original_count,
        final_count,
        quality_score: validation.quality_score,
        degraded: false,
        degraded_note: None,
        pagination: PaginationSummary {
            pages_visited: walk.pages_visited,
            pages_failed: walk.pages_failed.clone(),
            records_seen: walk.records_seen,
            stop_reason: format!("{:?}", walk.stop_reason),
        },
        dedup: DedupSummary {
            input: original_count,
            unique: dedup.unique.len(),
            duplicates: dedup.duplicates.len(),
            reasons: dedup.reason_histogram(),
        },
        cleaning: CleaningSummary {
            records: cleaned.len(),
            actions: cleaning_actions,
        },
        validation: ValidationSummary {
            valid: validation.valid_count,
            warning: validation.warning_count,
            invalid: validation.invalid_count,
            issues: issue_counts,
        },
        issues: IssueSummary { critical, warnings },
        mapping_coverage: stats.mapping_coverage,
        recommendations,
    }
}

fn recommend(
    quality_score: u32,
    original_count: usize,
    duplicate_count: usize,
    mapping_coverage: f64,
) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if quality_score < 80 {
        recommendations.push(Recommendation {
            priority: Priority::High,
            message: format!(
                "Quality score {} is below 80%, review extraction and source health",
                quality_score
            ),
        });
    }

    if original_count > 0 {
        let duplicate_share = duplicate_count as f64 / original_count as f64;
        if duplicate_share > 0.3 {
            recommendations.push(Recommendation {
                priority: Priority::Medium,
                message: format!(
                    "{:.0}% of fetched records were duplicates, check pagination overlap",
                    duplicate_share * 100.0
                ),
            });
        }
    }

    if mapping_coverage < 0.5 {
        recommendations.push(Recommendation {
            priority: Priority::Medium,
            message: format!(
                "City mapping coverage {:.0}% is below 50%, extend the city rule set",
                mapping_coverage * 100.0
            ),
        });
    }

    recommendations
}
