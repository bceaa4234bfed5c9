//! Local-first crawl and search for hosted chat conversations.
//!
//! [`Core`] ties the pieces together: a SQLite document store, in-memory
//! search indexes rebuilt from it at startup, and a crawl orchestrator that
//! pulls new conversations from the remote service. Credentials come from a
//! page-state snapshot exported by the browser side; nothing is stored.

pub mod config;
pub mod crawl;
pub mod diff;
pub mod error;
pub mod flatten;
pub mod index;
pub mod progress;
pub mod remote;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use tokio::sync::RwLock;
use tracing::info;

pub use chatstash_auth::{resolve_token, PageState};
pub use chatstash_store::{Bookmark, DocStore, Folder, MessageDocument, Role};

pub use config::CrawlConfig;
pub use crawl::{CrawlPhase, CrawlReport, Crawler, IndexingStatus};
pub use error::CrawlError;
pub use index::{
    group_by_conversation, ConversationMatch, Hit, MessageMatch, SearchIndex,
    DEFAULT_SEARCH_LIMIT,
};
pub use remote::{ConversationSource, ConversationSummary, RemoteClient};

/// Filesystem layout for the local stash.
#[derive(Debug, Clone)]
pub struct StashPaths {
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
}

impl StashPaths {
    /// Resolve from `CHATSTASH_DATA_DIR`, the platform data directory, or
    /// `.chatstash` in the working directory, in that order.
    pub fn from_env() -> Self {
        let base_dir = std::env::var("CHATSTASH_DATA_DIR")
            .map(PathBuf::from)
            .ok()
            .or_else(|| {
                ProjectDirs::from("", "", "chatstash").map(|dirs| dirs.data_dir().to_path_buf())
            })
            .unwrap_or_else(|| PathBuf::from(".chatstash"));
        Self::from_base(base_dir)
    }

    pub fn from_base(base_dir: PathBuf) -> Self {
        let db_path = base_dir.join("stash.db");
        let config_path = base_dir.join("config.toml");
        Self {
            base_dir,
            db_path,
            config_path,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("failed to create data dir: {}", self.base_dir.display()))?;
        Ok(())
    }
}

/// Application facade over the store, the search indexes, and the crawler.
pub struct Core {
    store: DocStore,
    config: CrawlConfig,
    bookmarks: RwLock<SearchIndex<Bookmark>>,
    messages: Arc<RwLock<SearchIndex<MessageDocument>>>,
    crawler: Crawler,
}

impl Core {
    /// Open the store and rebuild both search indexes from it.
    pub async fn init(paths: &StashPaths) -> Result<Self> {
        paths.ensure_dirs()?;
        let config = CrawlConfig::load(&paths.config_path)?;
        let store = DocStore::new(&paths.db_path).await?;

        let documents = store.all_documents().await?;
        let bookmarks = store.all_bookmarks().await?;
        info!(
            documents = documents.len(),
            bookmarks = bookmarks.len(),
            "rebuilt search indexes"
        );

        let messages = Arc::new(RwLock::new(SearchIndex::rebuild(documents)));
        let crawler = Crawler::new(store.clone(), config.clone(), messages.clone());
        Ok(Self {
            store,
            config,
            bookmarks: RwLock::new(SearchIndex::rebuild(bookmarks)),
            messages,
            crawler,
        })
    }

    pub fn store(&self) -> &DocStore {
        &self.store
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn indexing_status(&self) -> IndexingStatus {
        self.crawler.status()
    }

    /// Resolve credentials from a page-state snapshot and crawl the remote
    /// service.
    pub async fn start_crawl(
        &self,
        page: &PageState,
        full_crawl: bool,
    ) -> Result<CrawlReport, CrawlError> {
        let token = resolve_token(page);
        if token.is_none() {
            info!("no access token in page state; relying on session cookies");
        }
        let cookie_header = page.cookie_header();
        let client = RemoteClient::new(
            self.config.clone(),
            token.as_deref(),
            cookie_header.as_deref(),
        )?;
        self.crawler.run(&client, full_crawl).await
    }

    /// Crawl from an arbitrary source. Used by tests and embedders.
    pub async fn run_crawl<S: ConversationSource>(
        &self,
        source: &S,
        full_crawl: bool,
    ) -> Result<CrawlReport, CrawlError> {
        self.crawler.run(source, full_crawl).await
    }

    /// Search indexed messages, grouped by conversation. An empty query
    /// returns everything, newest conversation first.
    pub async fn search_conversations(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMatch>> {
        let query = query.trim();
        let index = self.messages.read().await;
        let hits = if query.is_empty() {
            index
                .items()
                .map(|doc| Hit {
                    item: doc.clone(),
                    score: 1,
                })
                .collect()
        } else {
            index.search(query, limit)
        };
        Ok(group_by_conversation(hits, query, limit))
    }

    /// Search bookmarks. An empty query returns all of them.
    pub async fn search_bookmarks(&self, query: &str, limit: usize) -> Result<Vec<Bookmark>> {
        let query = query.trim();
        if query.is_empty() {
            return self.store.all_bookmarks().await;
        }
        Ok(self
            .bookmarks
            .read()
            .await
            .search(query, limit)
            .into_iter()
            .map(|hit| hit.item)
            .collect())
    }

    /// Persist a bookmark and index it. The stored row is re-read because
    /// the store may assign a folder the caller left empty.
    pub async fn save_bookmark(&self, bookmark: &Bookmark) -> Result<()> {
        self.store.save_bookmark(bookmark).await?;
        if let Some(stored) = self.store.get_bookmark(&bookmark.id).await? {
            self.bookmarks.write().await.insert(stored);
        }
        Ok(())
    }

    pub async fn delete_bookmark(&self, id: &str) -> Result<()> {
        self.store.delete_bookmark(id).await?;
        self.bookmarks.write().await.remove(id);
        Ok(())
    }

    /// Save the bookmark if absent, remove it if present. Returns whether
    /// the bookmark exists afterwards.
    pub async fn toggle_bookmark(&self, bookmark: &Bookmark) -> Result<bool> {
        if self.store.get_bookmark(&bookmark.id).await?.is_some() {
            self.delete_bookmark(&bookmark.id).await?;
            Ok(false)
        } else {
            self.save_bookmark(bookmark).await?;
            Ok(true)
        }
    }

    pub async fn is_bookmarked(&self, id: &str) -> Result<bool> {
        Ok(self.store.get_bookmark(id).await?.is_some())
    }

    pub async fn move_bookmark(&self, id: &str, folder_id: &str) -> Result<Option<Bookmark>> {
        let moved = self.store.move_bookmark(id, folder_id).await?;
        if let Some(bookmark) = &moved {
            self.bookmarks.write().await.insert(bookmark.clone());
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_core(dir: &tempfile::TempDir) -> Core {
        Core::init(&StashPaths::from_base(dir.path().to_path_buf()))
            .await
            .unwrap()
    }

    fn bookmark(id: &str, title: &str, content: &str) -> Bookmark {
        Bookmark {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            timestamp: 1_700_000_000_000,
            url: format!("https://chatgpt.com/c/{}", id),
            folder_id: String::new(),
        }
    }

    #[tokio::test]
    async fn bookmark_lifecycle_keeps_index_in_sync() {
        let dir = tempfile::tempdir().unwrap();
        let core = test_core(&dir).await;

        core.save_bookmark(&bookmark("b1", "Rust notes", "ownership and borrowing"))
            .await
            .unwrap();
        assert!(core.is_bookmarked("b1").await.unwrap());

        let hits = core.search_bookmarks("ownership", 20).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b1");

        core.delete_bookmark("b1").await.unwrap();
        assert!(!core.is_bookmarked("b1").await.unwrap());
        assert!(core.search_bookmarks("ownership", 20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_bookmark_query_returns_everything() {
        let dir = tempfile::tempdir().unwrap();
        let core = test_core(&dir).await;
        core.save_bookmark(&bookmark("b1", "one", "alpha")).await.unwrap();
        core.save_bookmark(&bookmark("b2", "two", "beta")).await.unwrap();

        let all = core.search_bookmarks("  ", 20).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn toggle_flips_bookmark_presence() {
        let dir = tempfile::tempdir().unwrap();
        let core = test_core(&dir).await;
        let b = bookmark("b1", "toggle me", "content");

        assert!(core.toggle_bookmark(&b).await.unwrap());
        assert!(core.is_bookmarked("b1").await.unwrap());
        assert!(!core.toggle_bookmark(&b).await.unwrap());
        assert!(!core.is_bookmarked("b1").await.unwrap());
    }

    #[tokio::test]
    async fn indexes_are_rebuilt_from_the_store_on_init() {
        let dir = tempfile::tempdir().unwrap();
        {
            let core = test_core(&dir).await;
            core.save_bookmark(&bookmark("b1", "persisted", "survives restart"))
                .await
                .unwrap();
            core.store()
                .insert_documents(&[MessageDocument {
                    id: "m1".to_string(),
                    convo_id: "c1".to_string(),
                    role: Role::Assistant,
                    text: "durable message".to_string(),
                    title: "Title".to_string(),
                    time: 5.0,
                }])
                .await
                .unwrap();
        }

        let reopened = test_core(&dir).await;
        assert_eq!(
            reopened.search_bookmarks("survives", 20).await.unwrap().len(),
            1
        );
        let matches = reopened.search_conversations("durable", 20).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "c1");
    }

    #[tokio::test]
    async fn empty_conversation_query_returns_all_grouped() {
        let dir = tempfile::tempdir().unwrap();
        let core = test_core(&dir).await;
        core.store()
            .insert_documents(&[
                MessageDocument {
                    id: "m1".to_string(),
                    convo_id: "c1".to_string(),
                    role: Role::User,
                    text: "hello".to_string(),
                    title: "First".to_string(),
                    time: 1.0,
                },
                MessageDocument {
                    id: "m2".to_string(),
                    convo_id: "c2".to_string(),
                    role: Role::User,
                    text: "world".to_string(),
                    title: "Second".to_string(),
                    time: 2.0,
                },
            ])
            .await
            .unwrap();

        let reopened = test_core(&dir).await;
        let matches = reopened.search_conversations("", 20).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "c2"); // newest first
    }
}
