//! Crawl configuration.
//!
//! Loaded from a TOML file in the data directory; every field has a default
//! so a missing or partial file works out of the box.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Base URL of the remote service's backend API.
    pub base_url: String,
    /// Listing page size; the service caps this at 100.
    pub page_size: u64,
    /// Conversations flattened concurrently per batch.
    pub batch_size: usize,
    /// Delay between listing page requests, in milliseconds.
    pub page_delay_ms: u64,
    /// Delay between processing batches, in milliseconds.
    pub batch_delay_ms: u64,
    /// Incremental crawls within this window of the last commit are skipped.
    pub throttle_minutes: i64,
    /// Language tag sent with every request.
    pub language: String,
    pub user_agent: String,
    pub referer: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: "https://chatgpt.com/backend-api".to_string(),
            page_size: 100,
            batch_size: 10,
            page_delay_ms: 200,
            batch_delay_ms: 200,
            throttle_minutes: 10,
            language: "en-US".to_string(),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36"
                .to_string(),
            referer: "https://chatgpt.com/".to_string(),
        }
    }
}

impl CrawlConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }
}
