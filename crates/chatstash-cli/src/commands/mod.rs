pub mod bookmarks;
pub mod crawl;
pub mod search;
pub mod status;
