use std::collections::HashMap;

use anyhow::Result;

use chatstash_core::{Core, StashPaths};

pub async fn run(folder: Option<&str>) -> Result<()> {
    let paths = StashPaths::from_env();
    let core = Core::init(&paths).await?;

    let folders = core.store().all_folders().await?;
    let names: HashMap<&str, &str> = folders
        .iter()
        .map(|f| (f.id.as_str(), f.name.as_str()))
        .collect();

    let bookmarks = match folder {
        Some(folder_id) => core.store().bookmarks_by_folder(folder_id).await?,
        None => core.store().all_bookmarks().await?,
    };

    if bookmarks.is_empty() {
        println!("No bookmarks yet.");
        return Ok(());
    }

    for bookmark in bookmarks {
        let folder_name = names.get(bookmark.folder_id.as_str()).unwrap_or(&"?");
        println!("  {}  [{}]  {}", bookmark.id, folder_name, bookmark.title);
    }
    Ok(())
}
