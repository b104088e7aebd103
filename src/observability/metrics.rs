//! Per-stage counters over the `metrics` facade.
//!
//! Names follow Prometheus conventions; installing a recorder is left to
//! the host process. Without one these calls are no-ops.

/// Metric names used across the pipeline, kept in one place so stage code
/// never carries magic strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    PaginationPagesFetched,
    PaginationPagesFailed,
    PaginationRecordsDiscovered,
    DedupRecordsUnique,
    DedupRecordsDuplicate,
    CleanRecordsProcessed,
    CleanActionsApplied,
    ValidateRecordsValid,
    ValidateRecordsWarning,
    ValidateRecordsInvalid,
    MappingEventsMapped,
    MappingEventsUnmapped,
    AssetsDownloadsSuccess,
    AssetsDownloadsFailed,
    RunsCompleted,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::PaginationPagesFetched => "huodong_pagination_pages_fetched_total",
            MetricName::PaginationPagesFailed => "huodong_pagination_pages_failed_total",
            MetricName::PaginationRecordsDiscovered => "huodong_pagination_records_discovered_total",
            MetricName::DedupRecordsUnique => "huodong_dedup_records_unique_total",
            MetricName::DedupRecordsDuplicate => "huodong_dedup_records_duplicate_total",
            MetricName::CleanRecordsProcessed => "huodong_clean_records_processed_total",
            MetricName::CleanActionsApplied => "huodong_clean_actions_applied_total",
            MetricName::ValidateRecordsValid => "huodong_validate_records_valid_total",
            MetricName::ValidateRecordsWarning => "huodong_validate_records_warning_total",
            MetricName::ValidateRecordsInvalid => "huodong_validate_records_invalid_total",
            MetricName::MappingEventsMapped => "huodong_mapping_events_mapped_total",
            MetricName::MappingEventsUnmapped => "huodong_mapping_events_unmapped_total",
            MetricName::AssetsDownloadsSuccess => "huodong_assets_downloads_success_total",
            MetricName::AssetsDownloadsFailed => "huodong_assets_downloads_failed_total",
            MetricName::RunsCompleted => "huodong_runs_completed_total",
        }
    }
}

fn increment(name: MetricName, by: u64) {
    ::metrics::counter!(name.as_str()).increment(by);
}

pub mod pagination {
    use super::{increment, MetricName};

    pub fn page_fetched() {
        increment(MetricName::PaginationPagesFetched, 1);
    }

    pub fn page_failed() {
        increment(MetricName::PaginationPagesFailed, 1);
    }

    pub fn records_discovered(count: u64) {
        increment(MetricName::PaginationRecordsDiscovered, count);
    }
}

pub mod dedup {
    use super::{increment, MetricName};

    pub fn records_unique(count: u64) {
        increment(MetricName::DedupRecordsUnique, count);
    }

    pub fn record_duplicate() {
        increment(MetricName::DedupRecordsDuplicate, 1);
    }
}

pub mod clean {
    use super::{increment, MetricName};

    pub fn record_cleaned() {
        increment(MetricName::CleanRecordsProcessed, 1);
    }

    pub fn actions_applied(count: u64) {
        increment(MetricName::CleanActionsApplied, count);
    }
}

pub mod validate {
    use super::{increment, MetricName};

    pub fn records_valid(count: u64) {
        increment(MetricName::ValidateRecordsValid, count);
    }

    pub fn records_warning(count: u64) {
        increment(MetricName::ValidateRecordsWarning, count);
    }

    pub fn records_invalid(count: u64) {
        increment(MetricName::ValidateRecordsInvalid, count);
    }
}

pub mod mapping {
    use super::{increment, MetricName};

    pub fn events_mapped(count: u64) {
        increment(MetricName::MappingEventsMapped, count);
    }

    pub fn events_unmapped(count: u64) {
        increment(MetricName::MappingEventsUnmapped, count);
    }
}

pub mod assets {
    use super::{increment, MetricName};

    pub fn download_success() {
        increment(MetricName::AssetsDownloadsSuccess, 1);
    }

    pub fn download_failed() {
        increment(MetricName::AssetsDownloadsFailed, 1);
    }
}

pub mod runs {
    use super::{increment, MetricName};

    pub fn completed() {
        increment(MetricName::RunsCompleted, 1);
    }
}
