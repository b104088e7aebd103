//! End-to-end run against a fixture extractor in a temp directory: walk,
//! dedup, clean, validate, map, aggregate, artifact write, dataset commit.

use chrono::Utc;
use huodong_scraper::config::{
    AssetsConfig, Config, PaginationConfig, PathsConfig, SourceConfig,
};
use huodong_scraper::pipeline::orchestrator;
use huodong_scraper::pipeline::stats::{QualityReport, Stats};
use huodong_scraper::types::{ProcessedEvent, RawRecord, WalkMode};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn raw(id: &str, title: &str, time: &str, location: &str, url: &str) -> RawRecord {
    RawRecord {
        id: Some(id.to_string()),
        title: title.to_string(),
        time_text: time.to_string(),
        location_text: location.to_string(),
        url: url.to_string(),
        image_url: String::new(),
        view_count: Some(10),
        favorite_count: Some(2),
        discovered_at: Utc::now(),
        sort_rank: 0,
    }
}

fn write_fixtures(dir: &Path) -> (String, String) {
    let cities_path = dir.join("cities.json");
    fs::write(
        &cities_path,
        r#"[
            {"id": "beijing", "name_zh": "北京", "name_en": "Beijing", "districts": ["朝阳"]},
            {"id": "shanghai", "name_zh": "上海", "name_en": "Shanghai", "districts": ["浦东"]}
        ]"#,
    )
    .unwrap();

    let pages = vec![
        vec![
            raw(
                "e1",
                "城市读书会",
                "2025-09-21 14:00",
                "北京朝阳",
                "https://example.com/e/1",
            ),
            // same title, time and location as e1 under a different id/url
            raw(
                "e2",
                "城市读书会",
                "2025-09-21 14:00",
                "北京朝阳",
                "https://example.com/e/2",
            ),
            // no URL: dropped by validation, still counted in the report
            raw("e3", "露天观影夜", "2025-09-22 19:00", "北京", ""),
        ],
        vec![raw(
            "e4",
            "滨江骑行工作坊",
            "2025-10-01 09:30",
            "上海浦东",
            "https://example.com/e/4",
        )],
    ];
    let fixture_path = dir.join("pages.json");
    fs::write(&fixture_path, serde_json::to_string(&pages).unwrap()).unwrap();

    (
        cities_path.display().to_string(),
        fixture_path.display().to_string(),
    )
}

fn test_config(dir: &Path) -> Config {
    let (cities_file, fixture_file) = write_fixtures(dir);
    Config {
        source: SourceConfig {
            extractor: "fixture".to_string(),
            fixture_file,
            ..SourceConfig::default()
        },
        paths: PathsConfig {
            cities_file,
            known_events_file: dir.join("known_events.json").display().to_string(),
            known_keys_file: dir.join("known_keys.json").display().to_string(),
            output_dir: dir.join("output").display().to_string(),
            assets_dir: dir.join("assets").display().to_string(),
        },
        pagination: PaginationConfig {
            page_delay_min_ms: 0,
            page_delay_max_ms: 0,
            retry_base_delay_ms: 0,
            retry_max_delay_ms: 0,
            ..PaginationConfig::default()
        },
        assets: AssetsConfig {
            enabled: false,
            ..AssetsConfig::default()
        },
        ..Config::default()
    }
}

#[tokio::test]
async fn test_full_run_publishes_artifacts() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());

    let summary = orchestrator::run(&config, WalkMode::Full, false).await.unwrap();

    assert!(!summary.skipped_fresh);
    assert_eq!(summary.new_records, 4);
    assert_eq!(summary.published_events, 2);
    assert!(!summary.degraded);

    let output = dir.path().join("output");
    let events: Vec<ProcessedEvent> =
        serde_json::from_str(&fs::read_to_string(output.join("events.json")).unwrap()).unwrap();
    assert_eq!(events.len(), 2);

    // the content duplicate and the record without a URL are gone
    let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["e1", "e4"]);

    // cleaned to the canonical token, mapped with descending confidence
    assert_eq!(events[0].time_text, "09/21 14:00");
    assert_eq!(events[0].city_mappings[0].city_id, "beijing");
    for event in &events {
        assert!(event.city_mappings.len() <= 3);
        for pair in event.city_mappings.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }

    let stats: Stats =
        serde_json::from_str(&fs::read_to_string(output.join("stats.json")).unwrap()).unwrap();
    assert_eq!(stats.total_events, 2);
    assert_eq!(stats.mapped_events + stats.unmapped_events, stats.total_events);
    assert_eq!(stats.mapped_events, 2);
    assert_eq!(stats.city_counts["beijing"], 1);
    assert_eq!(stats.city_counts["shanghai"], 1);

    let report: QualityReport =
        serde_json::from_str(&fs::read_to_string(output.join("quality_report.json")).unwrap())
            .unwrap();
    assert_eq!(report.original_count, 4);
    assert_eq!(report.final_count, 2);
    // 3 records survive dedup, one of them hard-invalid
    assert_eq!(report.quality_score, 67);
    assert_eq!(report.dedup.duplicates, 1);
    assert_eq!(
        report.dedup.reasons["Duplicate title, time and location"], 1
    );
    assert_eq!(report.validation.invalid, 1);
    assert!(report.issues.critical >= 1);
    assert!(report.validation.issues.contains_key("Missing event URL"));

    let city_events: std::collections::BTreeMap<String, Vec<String>> =
        serde_json::from_str(&fs::read_to_string(output.join("city_events.json")).unwrap())
            .unwrap();
    assert_eq!(city_events["beijing"], vec!["event-e1"]);
    assert_eq!(city_events["shanghai"], vec!["event-e4"]);
}

#[tokio::test]
async fn test_second_run_ingests_nothing_new() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());

    let first = orchestrator::run(&config, WalkMode::Full, false).await.unwrap();
    assert_eq!(first.new_records, 4);

    // same listing again: every identifier is already persisted
    let second = orchestrator::run(&config, WalkMode::Full, true).await.unwrap();
    assert_eq!(second.new_records, 0);
    assert_eq!(second.published_events, 0);

    let report: QualityReport = serde_json::from_str(
        &fs::read_to_string(dir.path().join("output/quality_report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(report.original_count, 0);
    assert_eq!(report.quality_score, 100);
}

#[tokio::test]
async fn test_fresh_dataset_skips_run_unless_forced() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());

    orchestrator::run(&config, WalkMode::Quick, false).await.unwrap();

    let skipped = orchestrator::run(&config, WalkMode::Quick, false).await.unwrap();
    assert!(skipped.skipped_fresh);

    let forced = orchestrator::run(&config, WalkMode::Quick, true).await.unwrap();
    assert!(!forced.skipped_fresh);
}

#[tokio::test]
async fn test_missing_city_data_aborts_run() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.paths.cities_file = dir.path().join("nowhere.json").display().to_string();

    let result = orchestrator::run(&config, WalkMode::Quick, false).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_incremental_walk_stops_once_caught_up() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());

    orchestrator::run(&config, WalkMode::Full, false).await.unwrap();

    // quick mode re-walk: page 1 has nothing new, so page 2 is never visited
    let summary = orchestrator::run(&config, WalkMode::Quick, true).await.unwrap();
    assert_eq!(summary.new_records, 0);
}
