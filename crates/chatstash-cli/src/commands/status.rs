use anyhow::Result;
use chrono::{DateTime, Utc};

use chatstash_core::{Core, StashPaths};

pub async fn run(json: bool) -> Result<()> {
    let paths = StashPaths::from_env();
    let core = Core::init(&paths).await?;

    let documents = core.store().document_count().await?;
    let bookmarks = core.store().bookmark_count().await?;
    let folders = core.store().all_folders().await?.len();
    let last_sync = core.store().last_sync().await?;
    let status = core.indexing_status();

    if json {
        let payload = serde_json::json!({
            "documents": documents,
            "bookmarks": bookmarks,
            "folders": folders,
            "lastSync": last_sync,
            "isIndexing": status.is_indexing(),
            "progress": status.progress,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("Documents:  {}", documents);
    println!("Bookmarks:  {}", bookmarks);
    println!("Folders:    {}", folders);
    match last_sync {
        Some(epoch_ms) => {
            let formatted = DateTime::<Utc>::from_timestamp_millis(epoch_ms)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            println!("Last sync:  {}", formatted);
        }
        None => println!("Last sync:  never"),
    }
    if status.is_indexing() {
        println!("Indexing:   in progress ({} documents)", status.progress);
    }
    Ok(())
}
