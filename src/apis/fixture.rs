//! Page extractor serving pre-built pages from memory or a JSON file.
//! Drives tests and demo runs without touching the listing site.

use crate::error::{Result, ScraperError};
use crate::types::{PageBatch, PageExtractor, RawRecord};
use std::fs;
use std::path::Path;
use tracing::debug;

pub struct FixtureExtractor {
    pages: Vec<Vec<RawRecord>>,
}

impl FixtureExtractor {
    pub fn new(pages: Vec<Vec<RawRecord>>) -> Self {
        Self { pages }
    }

    /// Load pages from a JSON file holding an array of record arrays.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScraperError::Setup(format!(
                "Fixture file missing at '{}'",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)?;
        let pages: Vec<Vec<RawRecord>> = serde_json::from_str(&content)?;
        debug!(pages = pages.len(), path = %path.display(), "Loaded fixture pages");
        Ok(Self::new(pages))
    }
}

#[async_trait::async_trait]
impl PageExtractor for FixtureExtractor {
    fn source_name(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_page(&self, page: u32) -> Result<PageBatch> {
        let idx = page.saturating_sub(1) as usize;
        let records = self.pages.get(idx).cloned().unwrap_or_default();
        let has_more = idx + 1 < self.pages.len();
        Ok(PageBatch { records, has_more })
    }
}
