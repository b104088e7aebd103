//! HTTP extractor for the listing site's JSON endpoint.
//!
//! Field extraction is deliberately lenient: an entry that cannot yield a
//! usable record is dropped from the page batch and logged, never propagated
//! as an error.

use crate::error::{Result, ScraperError};
use crate::types::{PageBatch, PageExtractor, RawRecord};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ListingApiExtractor {
    client: reqwest::Client,
    base_url: String,
}

impl ListingApiExtractor {
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl PageExtractor for ListingApiExtractor {
    fn source_name(&self) -> &'static str {
        "listing_api"
    }

    async fn fetch_page(&self, page: u32) -> Result<PageBatch> {
        debug!(page, "Fetching listing page");
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("page", page)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ScraperError::Api {
                message: format!("Listing returned HTTP {} for page {}", response.status(), page),
            });
        }

        let payload: Value = response.json().await?;
        let has_more = payload["has_more"].as_bool().unwrap_or(false);
        let entries = payload["events"].as_array().cloned().unwrap_or_default();

        let discovered_at = Utc::now();
        let mut records = Vec::with_capacity(entries.len());
        for entry in &entries {
            match parse_record(entry, discovered_at) {
                Some(record) => records.push(record),
                None => warn!(page, "Dropping listing entry without a usable title"),
            }
        }

        info!(page, records = records.len(), has_more, "Extracted listing page");
        Ok(PageBatch { records, has_more })
    }
}

/// Pluck one raw record out of a listing entry. Only the title is required;
/// everything else degrades to empty/absent and is classified downstream.
fn parse_record(entry: &Value, discovered_at: DateTime<Utc>) -> Option<RawRecord> {
    let title = entry["title"].as_str().map(str::trim).filter(|t| !t.is_empty())?;

    Some(RawRecord {
        id: field_string(entry, "id"),
        title: title.to_string(),
        time_text: field_string(entry, "time").unwrap_or_default(),
        location_text: field_string(entry, "location").unwrap_or_default(),
        url: field_string(entry, "url").unwrap_or_default(),
        image_url: field_string(entry, "image").unwrap_or_default(),
        view_count: field_count(entry, "views"),
        favorite_count: field_count(entry, "favorites"),
        discovered_at,
        sort_rank: 0,
    })
}

fn field_string(entry: &Value, key: &str) -> Option<String> {
    match &entry[key] {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Counters arrive as numbers or as strings like "1024"; anything else is
/// treated as absent.
fn field_count(entry: &Value, key: &str) -> Option<i64> {
    match &entry[key] {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
