use anyhow::Result;
use chrono::{DateTime, Utc};

use chatstash_core::{Core, StashPaths};

pub async fn run(query: &str, bookmarks: bool, limit: usize, json: bool) -> Result<()> {
    let paths = StashPaths::from_env();
    let core = Core::init(&paths).await?;

    if bookmarks {
        let hits = core.search_bookmarks(query, limit).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&hits)?);
            return Ok(());
        }
        if hits.is_empty() {
            println!("No bookmarks matched.");
            return Ok(());
        }
        for bookmark in hits {
            println!(
                "  {}  [{}]  {}",
                format_epoch_ms(bookmark.timestamp),
                bookmark.folder_id,
                bookmark.title
            );
        }
        return Ok(());
    }

    let matches = core.search_conversations(query, limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&matches)?);
        return Ok(());
    }
    if matches.is_empty() {
        println!("No conversations matched.");
        return Ok(());
    }
    for convo in matches {
        println!("{} ({} matching messages)", convo.title, convo.messages.len());
        for message in &convo.messages {
            println!("    [{}] {}", message.role.as_str(), message.snippet);
        }
    }
    Ok(())
}

fn format_epoch_ms(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
