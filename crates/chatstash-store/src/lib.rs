use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions, SqlitePool};
use tracing::{info, instrument};

/// Current on-disk schema version, stamped into the meta table by `migrate`.
pub const SCHEMA_VERSION: i64 = 3;

/// Reserved folder every installation has after first run.
pub const DEFAULT_FOLDER_ID: &str = "default";

const LAST_SYNC_KEY: &str = "lastSync";
const LAST_USED_FOLDER_KEY: &str = "lastUsedFolder";
const SCHEMA_VERSION_KEY: &str = "schemaVersion";

/// Author role of a message document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
            Role::Unknown => "unknown",
        }
    }

    /// Anything outside the known set maps to `Unknown` rather than failing.
    pub fn parse(s: &str) -> Self {
        match s {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "system" => Role::System,
            "tool" => Role::Tool,
            _ => Role::Unknown,
        }
    }
}

/// A flattened, searchable message extracted from one conversation node.
///
/// Immutable once written: re-inserting an existing id is a no-op, and the
/// crawler never revisits a conversation that already has documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDocument {
    pub id: String,
    pub convo_id: String,
    pub role: Role,
    pub text: String,
    pub title: String,
    /// Unix epoch seconds; used for recency ordering.
    pub time: f64,
}

/// A pinned reference to a conversation, owned by the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    pub url: String,
    #[serde(default)]
    pub folder_id: String,
}

/// A one-level-deep grouping of bookmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

#[derive(Clone)]
pub struct DocStore {
    pool: SqlitePool,
}

impl DocStore {
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::from_str("sqlite:")?
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip_all)]
    async fn init_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (\
                id TEXT PRIMARY KEY,\
                convo_id TEXT NOT NULL,\
                role TEXT NOT NULL,\
                text TEXT NOT NULL,\
                title TEXT NOT NULL,\
                time REAL NOT NULL\
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_convo_id ON documents(convo_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_time ON documents(time)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_role ON documents(role)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS bookmarks (\
                id TEXT PRIMARY KEY,\
                title TEXT NOT NULL,\
                content TEXT NOT NULL,\
                timestamp INTEGER NOT NULL,\
                url TEXT NOT NULL,\
                folder_id TEXT NOT NULL DEFAULT ''\
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_bookmarks_timestamp ON bookmarks(timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_bookmarks_title ON bookmarks(title)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_bookmarks_folder_id ON bookmarks(folder_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS folders (\
                id TEXT PRIMARY KEY,\
                name TEXT NOT NULL,\
                parent_id TEXT,\
                created_at INTEGER NOT NULL\
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_folders_name ON folders(name)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_folders_parent_id ON folders(parent_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS meta (\
                key TEXT PRIMARY KEY,\
                value TEXT NOT NULL\
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Bring older databases up to the current schema. Idempotent.
    ///
    /// Ensures the reserved default folder exists, backfills bookmarks that
    /// predate folders, and stamps the schema version.
    pub async fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .get_meta(SCHEMA_VERSION_KEY)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if version >= SCHEMA_VERSION {
            return Ok(());
        }
        info!("migrating store from schema version {} to {}", version, SCHEMA_VERSION);

        if self.get_folder(DEFAULT_FOLDER_ID).await?.is_none() {
            self.save_folder(&Folder {
                id: DEFAULT_FOLDER_ID.to_string(),
                name: "Uncategorized".to_string(),
                parent_id: None,
                created_at: Utc::now().timestamp_millis(),
            })
            .await?;
        }

        sqlx::query("UPDATE bookmarks SET folder_id = ?1 WHERE folder_id = ''")
            .bind(DEFAULT_FOLDER_ID)
            .execute(&self.pool)
            .await?;

        self.set_meta(SCHEMA_VERSION_KEY, &SCHEMA_VERSION.to_string())
            .await?;
        Ok(())
    }

    // --- documents -------------------------------------------------------

    /// Persist a batch of documents in one transaction.
    ///
    /// Documents are immutable: an id that already exists is left untouched.
    /// Returns the number of rows handed to the insert.
    #[instrument(skip_all, fields(count = docs.len()))]
    pub async fn insert_documents(&self, docs: &[MessageDocument]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for doc in docs {
            sqlx::query(
                "INSERT INTO documents (id, convo_id, role, text, title, time) \
                VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                ON CONFLICT(id) DO NOTHING",
            )
            .bind(&doc.id)
            .bind(&doc.convo_id)
            .bind(doc.role.as_str())
            .bind(&doc.text)
            .bind(&doc.title)
            .bind(doc.time)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(docs.len())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<MessageDocument>> {
        let row = sqlx::query_as::<_, (String, String, String, String, String, f64)>(
            "SELECT id, convo_id, role, text, title, time FROM documents WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_document))
    }

    pub async fn all_documents(&self) -> Result<Vec<MessageDocument>> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String, f64)>(
            "SELECT id, convo_id, role, text, title, time FROM documents ORDER BY time",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_document).collect())
    }

    /// Distinct conversation ids that have at least one persisted document.
    ///
    /// This is the dedup baseline: a conversation present here is considered
    /// fully indexed and is never re-fetched.
    pub async fn known_convo_ids(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query_as::<_, (String,)>("SELECT DISTINCT convo_id FROM documents")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn document_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // --- bookmarks -------------------------------------------------------

    /// Upsert a bookmark. An empty `folder_id` is filled from the last-used
    /// folder (or the default), and the chosen folder is recorded as
    /// last-used for the next save.
    pub async fn save_bookmark(&self, bookmark: &Bookmark) -> Result<()> {
        let folder_id = if bookmark.folder_id.is_empty() {
            self.get_meta(LAST_USED_FOLDER_KEY)
                .await?
                .unwrap_or_else(|| DEFAULT_FOLDER_ID.to_string())
        } else {
            bookmark.folder_id.clone()
        };
        sqlx::query(
            "INSERT INTO bookmarks (id, title, content, timestamp, url, folder_id) \
            VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
            ON CONFLICT(id) DO UPDATE SET \
                title=excluded.title, \
                content=excluded.content, \
                timestamp=excluded.timestamp, \
                url=excluded.url, \
                folder_id=excluded.folder_id",
        )
        .bind(&bookmark.id)
        .bind(&bookmark.title)
        .bind(&bookmark.content)
        .bind(bookmark.timestamp)
        .bind(&bookmark.url)
        .bind(&folder_id)
        .execute(&self.pool)
        .await?;
        self.set_meta(LAST_USED_FOLDER_KEY, &folder_id).await?;
        Ok(())
    }

    pub async fn get_bookmark(&self, id: &str) -> Result<Option<Bookmark>> {
        let row = sqlx::query_as::<_, (String, String, String, i64, String, String)>(
            "SELECT id, title, content, timestamp, url, folder_id FROM bookmarks WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_bookmark))
    }

    pub async fn delete_bookmark(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM bookmarks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn all_bookmarks(&self) -> Result<Vec<Bookmark>> {
        let rows = sqlx::query_as::<_, (String, String, String, i64, String, String)>(
            "SELECT id, title, content, timestamp, url, folder_id FROM bookmarks \
            ORDER BY timestamp DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_bookmark).collect())
    }

    pub async fn bookmarks_by_folder(&self, folder_id: &str) -> Result<Vec<Bookmark>> {
        let rows = sqlx::query_as::<_, (String, String, String, i64, String, String)>(
            "SELECT id, title, content, timestamp, url, folder_id FROM bookmarks \
            WHERE folder_id = ?1 ORDER BY timestamp DESC",
        )
        .bind(folder_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_bookmark).collect())
    }

    /// Reassign a bookmark to another folder. Returns the updated bookmark,
    /// or None if the id is unknown.
    pub async fn move_bookmark(&self, id: &str, folder_id: &str) -> Result<Option<Bookmark>> {
        let Some(mut bookmark) = self.get_bookmark(id).await? else {
            return Ok(None);
        };
        bookmark.folder_id = folder_id.to_string();
        self.save_bookmark(&bookmark).await?;
        Ok(Some(bookmark))
    }

    pub async fn bookmark_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookmarks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // --- folders ---------------------------------------------------------

    pub async fn save_folder(&self, folder: &Folder) -> Result<()> {
        sqlx::query(
            "INSERT INTO folders (id, name, parent_id, created_at) \
            VALUES (?1, ?2, ?3, ?4) \
            ON CONFLICT(id) DO UPDATE SET \
                name=excluded.name, \
                parent_id=excluded.parent_id",
        )
        .bind(&folder.id)
        .bind(&folder.name)
        .bind(&folder.parent_id)
        .bind(folder.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_folder(&self, id: &str) -> Result<Option<Folder>> {
        let row = sqlx::query_as::<_, (String, String, Option<String>, i64)>(
            "SELECT id, name, parent_id, created_at FROM folders WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_folder))
    }

    pub async fn delete_folder(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM folders WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn all_folders(&self) -> Result<Vec<Folder>> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>, i64)>(
            "SELECT id, name, parent_id, created_at FROM folders ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_folder).collect())
    }

    pub async fn folders_by_parent(&self, parent_id: Option<&str>) -> Result<Vec<Folder>> {
        let rows = match parent_id {
            Some(parent) => {
                sqlx::query_as::<_, (String, String, Option<String>, i64)>(
                    "SELECT id, name, parent_id, created_at FROM folders \
                    WHERE parent_id = ?1 ORDER BY created_at",
                )
                .bind(parent)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, (String, String, Option<String>, i64)>(
                    "SELECT id, name, parent_id, created_at FROM folders \
                    WHERE parent_id IS NULL ORDER BY created_at",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(row_to_folder).collect())
    }

    /// Create a folder with a generated id and persist it.
    pub async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<Folder> {
        let folder = Folder {
            id: generate_folder_id(name, parent_id),
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
            created_at: Utc::now().timestamp_millis(),
        };
        self.save_folder(&folder).await?;
        Ok(folder)
    }

    // --- metadata --------------------------------------------------------

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query_as::<_, (String,)>("SELECT value FROM meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO meta (key, value) VALUES (?1, ?2) \
            ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Epoch milliseconds of the last successful crawl commit, if any.
    pub async fn last_sync(&self) -> Result<Option<i64>> {
        Ok(self
            .get_meta(LAST_SYNC_KEY)
            .await?
            .and_then(|v| v.parse().ok()))
    }

    pub async fn set_last_sync(&self, epoch_ms: i64) -> Result<()> {
        self.set_meta(LAST_SYNC_KEY, &epoch_ms.to_string()).await
    }
}

fn row_to_document(
    (id, convo_id, role, text, title, time): (String, String, String, String, String, f64),
) -> MessageDocument {
    MessageDocument {
        id,
        convo_id,
        role: Role::parse(&role),
        text,
        title,
        time,
    }
}

fn row_to_bookmark(
    (id, title, content, timestamp, url, folder_id): (String, String, String, i64, String, String),
) -> Bookmark {
    Bookmark {
        id,
        title,
        content,
        timestamp,
        url,
        folder_id,
    }
}

fn row_to_folder((id, name, parent_id, created_at): (String, String, Option<String>, i64)) -> Folder {
    Folder {
        id,
        name,
        parent_id,
        created_at,
    }
}

/// Generate a folder id from the name and parent: a 32-bit string hash in
/// base 36, suffixed with the creation time for uniqueness.
pub fn generate_folder_id(name: &str, parent_id: Option<&str>) -> String {
    let seed = format!("{}{}", name, parent_id.unwrap_or(""));
    let mut hash: i32 = 0;
    for ch in seed.encode_utf16() {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(ch as i32);
    }
    format!(
        "folder_{}{}",
        to_base36(hash.unsigned_abs() as u64),
        to_base36(Utc::now().timestamp_millis() as u64)
    )
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store() -> (tempfile::TempDir, DocStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DocStore::new(&dir.path().join("stash.db")).await.unwrap();
        (dir, store)
    }

    fn doc(id: &str, convo: &str, text: &str) -> MessageDocument {
        MessageDocument {
            id: id.to_string(),
            convo_id: convo.to_string(),
            role: Role::User,
            text: text.to_string(),
            title: "t".to_string(),
            time: 1.0,
        }
    }

    #[tokio::test]
    async fn migrate_creates_default_folder_and_stamps_version() {
        let (_dir, store) = open_store().await;
        let folder = store.get_folder(DEFAULT_FOLDER_ID).await.unwrap().unwrap();
        assert_eq!(folder.name, "Uncategorized");
        assert_eq!(folder.parent_id, None);
        assert_eq!(store.get_meta("schemaVersion").await.unwrap().unwrap(), "3");

        // Running again is a no-op.
        store.migrate().await.unwrap();
        assert_eq!(store.all_folders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn insert_documents_is_conflict_tolerant() {
        let (_dir, store) = open_store().await;
        let docs = vec![doc("m1", "c1", "hello"), doc("m2", "c1", "world")];
        store.insert_documents(&docs).await.unwrap();
        // Re-inserting m1 with different text leaves the original in place.
        let mut altered = doc("m1", "c1", "changed");
        altered.text = "changed".to_string();
        store.insert_documents(&[altered]).await.unwrap();

        let stored = store.get_document("m1").await.unwrap().unwrap();
        assert_eq!(stored.text, "hello");
        assert_eq!(store.document_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn known_convo_ids_are_distinct() {
        let (_dir, store) = open_store().await;
        store
            .insert_documents(&[doc("m1", "c1", "a"), doc("m2", "c1", "b"), doc("m3", "c2", "c")])
            .await
            .unwrap();
        let known = store.known_convo_ids().await.unwrap();
        assert_eq!(known.len(), 2);
        assert!(known.contains("c1"));
        assert!(known.contains("c2"));
    }

    #[tokio::test]
    async fn bookmark_without_folder_uses_last_used_then_default() {
        let (_dir, store) = open_store().await;
        let mut b = Bookmark {
            id: "b1".to_string(),
            title: "title".to_string(),
            content: "content".to_string(),
            timestamp: 100,
            url: "https://example.com/c/1".to_string(),
            folder_id: String::new(),
        };
        store.save_bookmark(&b).await.unwrap();
        let stored = store.get_bookmark("b1").await.unwrap().unwrap();
        assert_eq!(stored.folder_id, DEFAULT_FOLDER_ID);

        // An explicit folder becomes the new last-used target.
        let work = store.create_folder("Work", None).await.unwrap();
        b.id = "b2".to_string();
        b.folder_id = work.id.clone();
        store.save_bookmark(&b).await.unwrap();

        b.id = "b3".to_string();
        b.folder_id = String::new();
        store.save_bookmark(&b).await.unwrap();
        let stored = store.get_bookmark("b3").await.unwrap().unwrap();
        assert_eq!(stored.folder_id, work.id);
    }

    #[tokio::test]
    async fn move_bookmark_updates_folder() {
        let (_dir, store) = open_store().await;
        store
            .save_bookmark(&Bookmark {
                id: "b1".to_string(),
                title: "t".to_string(),
                content: "c".to_string(),
                timestamp: 1,
                url: String::new(),
                folder_id: String::new(),
            })
            .await
            .unwrap();
        let ideas = store.create_folder("Ideas", None).await.unwrap();
        let moved = store.move_bookmark("b1", &ideas.id).await.unwrap().unwrap();
        assert_eq!(moved.folder_id, ideas.id);
        assert_eq!(store.bookmarks_by_folder(&ideas.id).await.unwrap().len(), 1);
        assert!(store.move_bookmark("missing", &ideas.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn folders_by_parent_filters() {
        let (_dir, store) = open_store().await;
        let parent = store.create_folder("Projects", None).await.unwrap();
        store.create_folder("Rust", Some(&parent.id)).await.unwrap();
        let children = store.folders_by_parent(Some(&parent.id)).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "Rust");
        // Root level: default + Projects.
        assert_eq!(store.folders_by_parent(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn last_sync_round_trips() {
        let (_dir, store) = open_store().await;
        assert_eq!(store.last_sync().await.unwrap(), None);
        store.set_last_sync(1_700_000_000_000).await.unwrap();
        assert_eq!(store.last_sync().await.unwrap(), Some(1_700_000_000_000));
    }

    #[test]
    fn folder_ids_are_prefixed_and_distinct_by_name() {
        let a = generate_folder_id("Work", None);
        let b = generate_folder_id("Play", None);
        assert!(a.starts_with("folder_"));
        assert!(b.starts_with("folder_"));
        assert_ne!(a, b);
    }
}
