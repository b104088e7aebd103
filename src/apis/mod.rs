pub mod fixture;
pub mod listing_api;

use crate::config::SourceConfig;
use crate::error::{Result, ScraperError};
use crate::types::PageExtractor;

pub use fixture::FixtureExtractor;
pub use listing_api::ListingApiExtractor;

/// Build the configured page extractor.
pub fn create_extractor(config: &SourceConfig) -> Result<Box<dyn PageExtractor>> {
    match config.extractor.as_str() {
        "listing_api" => Ok(Box::new(ListingApiExtractor::new(
            &config.base_url,
            config.timeout_seconds,
        )?)),
        "fixture" => Ok(Box::new(FixtureExtractor::from_file(&config.fixture_file)?)),
        other => Err(ScraperError::Config(format!("Unknown extractor '{}'", other))),
    }
}
