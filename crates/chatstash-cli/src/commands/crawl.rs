use std::path::PathBuf;

use anyhow::{bail, Result};

use chatstash_core::{Core, CrawlError, PageState, StashPaths};

pub async fn run(full: bool, page_snapshot: Option<PathBuf>) -> Result<()> {
    let paths = StashPaths::from_env();
    let core = Core::init(&paths).await?;

    let page = match page_snapshot {
        Some(path) => PageState::load(&path)?,
        None => PageState::default(),
    };

    match core.start_crawl(&page, full).await {
        Ok(report) if report.skipped => {
            println!("Skipped: a crawl ran recently (use --full to force one).");
            Ok(())
        }
        Ok(report) => {
            println!("Indexed {} new messages.", report.processed);
            Ok(())
        }
        Err(err @ CrawlError::AuthenticationFailed { .. }) => {
            bail!("{}\nExport a fresh page snapshot and pass it with --page-snapshot.", err)
        }
        Err(err) => bail!("crawl failed: {}", err),
    }
}
