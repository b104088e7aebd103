//! One full ingestion run: freshness check, page walk, dedup, clean,
//! validate, city-map, asset fetch, aggregate, artifact write, dataset
//! commit.
//!
//! Data-quality problems never abort a run; only setup failures (missing
//! reference data, unwritable output) propagate as errors. A run that cannot
//! commit its dataset still publishes artifacts, flagged as degraded.

use crate::apis::create_extractor;
use crate::assets::AssetFetcher;
use crate::config::Config;
use crate::error::Result;
use crate::mapping::CityMapper;
use crate::observability::metrics;
use crate::pipeline::clean::Cleaner;
use crate::pipeline::dedup::Deduplicator;
use crate::pipeline::paginator::PageWalker;
use crate::pipeline::stats::{aggregate, build_report};
use crate::pipeline::validate::Validator;
use crate::storage::{load_cities, ArtifactWriter, JsonFileStore, KnownIdStore};
use crate::types::{CleanedRecord, WalkMode};
use chrono::Utc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// What one invocation did, for the CLI summary.
#[derive(Debug)]
pub struct RunSummary {
    /// True when the dataset was younger than the configured interval and
    /// the run exited without walking.
    pub skipped_fresh: bool,
    pub new_records: usize,
    pub published_events: usize,
    pub quality_score: u32,
    pub degraded: bool,
    pub output_dir: String,
}

pub async fn run(config: &Config, mode: WalkMode, force: bool) -> Result<RunSummary> {
    let started = Instant::now();

    let cities = load_cities(&config.paths.cities_file)?;
    let mapper = CityMapper::new(&cities, config.mapping.clone());

    let mut store =
        JsonFileStore::open(&config.paths.known_events_file, &config.paths.known_keys_file)?;

    if !force {
        let min_age = Duration::from_secs(config.pagination.min_run_interval_hours * 3600);
        if let Some(age) = store.dataset_age() {
            if age < min_age {
                info!(
                    age_minutes = age.as_secs() / 60,
                    "Dataset is fresh, skipping run"
                );
                return Ok(RunSummary {
                    skipped_fresh: true,
                    new_records: 0,
                    published_events: 0,
                    quality_score: 100,
                    degraded: false,
                    output_dir: config.paths.output_dir.clone(),
                });
            }
        }
    }

    // Fail on an unwritable output location before touching the network.
    let writer = ArtifactWriter::new(&config.paths.output_dir)?;

    let extractor = create_extractor(&config.source)?;
    let snapshot = store.snapshot();
    info!(
        known_records = snapshot.record_count,
        source = extractor.source_name(),
        %mode,
        "Starting run"
    );

    let mut walker =
        PageWalker::new(extractor.as_ref(), config.pagination.clone(), snapshot.ids.clone());
    let walk = walker.run(mode).await;

    let dedup = Deduplicator::with_known(
        snapshot.ids.clone(),
        snapshot.urls.clone(),
        snapshot.content_keys.clone(),
    )
    .dedupe(&walk.new_records);

    let cleaner = Cleaner::new(config.validation.counter_upper_bound);
    let cleaned: Vec<CleanedRecord> = dedup.unique.iter().map(|r| cleaner.clean(r)).collect();

    let validation = Validator::new(config.validation.clone()).validate_batch(&cleaned);

    let now = Utc::now();
    let mut events = mapper.map_all(&validation.records, now);

    if config.assets.enabled && !events.is_empty() {
        let fetcher = AssetFetcher::new(&config.assets, &config.paths.assets_dir)?;
        fetcher.fetch_all(&mut events).await;
    }

    let stats = aggregate(&events, now);
    metrics::mapping::events_mapped(stats.mapped_events as u64);
    metrics::mapping::events_unmapped(stats.unmapped_events as u64);

    let mut report =
        build_report(mode, &walk, &dedup, &cleaned, &validation, &stats, events.len(), now);

    // The dataset commit is the run's one durable state change. Every record
    // the walk surfaced is committed, duplicates included, so an identifier
    // seen once is never treated as new again. When the commit fails, the
    // last good dataset stays in place and the report says so.
    if let Err(e) = store.commit(&walk.new_records) {
        warn!(error = %e, "Dataset commit failed, keeping last good state");
        report.degraded = true;
        report.degraded_note = Some(format!(
            "Dataset commit failed ({}); the persisted dataset still reflects the previous run",
            e
        ));
    }

    writer.write_events(&events)?;
    writer.write_city_events(&events)?;
    writer.write_stats(&stats)?;
    writer.write_quality_report(&report)?;

    metrics::runs::completed();
    info!(
        %mode,
        new_records = walk.new_records.len(),
        published = events.len(),
        quality_score = validation.quality_score,
        duration_ms = started.elapsed().as_millis() as u64,
        degraded = report.degraded,
        "Run complete"
    );

    Ok(RunSummary {
        skipped_fresh: false,
        new_records: walk.new_records.len(),
        published_events: events.len(),
        quality_score: validation.quality_score,
        degraded: report.degraded,
        output_dir: config.paths.output_dir.clone(),
    })
}
