//! Batch crawl orchestration.
//!
//! One run walks a fixed pipeline: resolve, list, diff, process in batches,
//! commit. A `tokio::sync::Mutex` serializes runs so two triggers can never
//! interleave listing or double-commit; the loser reports itself skipped
//! instead of waiting. Incremental runs are additionally throttled against
//! the last successful commit time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use chatstash_store::{DocStore, MessageDocument};

use crate::config::CrawlConfig;
use crate::diff::diff_new;
use crate::error::CrawlError;
use crate::flatten::flatten_conversation;
use crate::index::SearchIndex;
use crate::progress::{emit_indexing_complete, emit_indexing_progress};
use crate::remote::{ConversationSource, ConversationSummary};

const PROGRESS_EVERY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlPhase {
    Idle,
    Resolving,
    Listing,
    Diffing,
    Processing { batch: usize, batches: usize },
    Committing,
    Error,
}

/// Snapshot of crawl state for status queries. `progress` is the number of
/// documents flattened so far in the current (or most recent) run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexingStatus {
    pub phase: CrawlPhase,
    pub progress: usize,
}

impl IndexingStatus {
    /// Whether a UI should show its busy indicator. `Error` counts as not
    /// indexing so a failed run can never leave the indicator stuck.
    pub fn is_indexing(&self) -> bool {
        !matches!(self.phase, CrawlPhase::Idle | CrawlPhase::Error)
    }
}

/// Shared, cheaply clonable handle onto the current crawl state.
#[derive(Clone)]
pub struct StatusHandle(Arc<Mutex<IndexingStatus>>);

impl Default for StatusHandle {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(IndexingStatus {
            phase: CrawlPhase::Idle,
            progress: 0,
        })))
    }
}

impl StatusHandle {
    pub fn snapshot(&self) -> IndexingStatus {
        self.0.lock().expect("status lock poisoned").clone()
    }

    fn begin(&self) {
        let mut status = self.0.lock().expect("status lock poisoned");
        status.phase = CrawlPhase::Resolving;
        status.progress = 0;
    }

    fn set_phase(&self, phase: CrawlPhase) {
        self.0.lock().expect("status lock poisoned").phase = phase;
    }

    fn set_progress(&self, progress: usize) {
        self.0.lock().expect("status lock poisoned").progress = progress;
    }
}

/// Outcome of a crawl run. `skipped` runs did no remote work at all.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub processed: usize,
    pub skipped: bool,
}

impl CrawlReport {
    fn skipped() -> Self {
        Self {
            processed: 0,
            skipped: true,
        }
    }
}

pub struct Crawler {
    store: DocStore,
    config: CrawlConfig,
    messages: Arc<RwLock<SearchIndex<MessageDocument>>>,
    status: StatusHandle,
    run_guard: tokio::sync::Mutex<()>,
}

impl Crawler {
    pub fn new(
        store: DocStore,
        config: CrawlConfig,
        messages: Arc<RwLock<SearchIndex<MessageDocument>>>,
    ) -> Self {
        Self {
            store,
            config,
            messages,
            status: StatusHandle::default(),
            run_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn status(&self) -> IndexingStatus {
        self.status.snapshot()
    }

    /// Run one crawl against `source`. `full_crawl` bypasses the time
    /// throttle (but not the mutual-exclusion guard).
    pub async fn run<S: ConversationSource>(
        &self,
        source: &S,
        full_crawl: bool,
    ) -> Result<CrawlReport, CrawlError> {
        let Ok(_guard) = self.run_guard.try_lock() else {
            info!("a crawl is already running; skipping this trigger");
            return Ok(CrawlReport::skipped());
        };

        if !full_crawl {
            if let Some(last_ms) = self.store.last_sync().await? {
                let elapsed_ms = Utc::now().timestamp_millis() - last_ms;
                if elapsed_ms < self.config.throttle_minutes * 60_000 {
                    info!(
                        elapsed_min = elapsed_ms / 60_000,
                        "last sync is recent; skipping incremental crawl"
                    );
                    return Ok(CrawlReport::skipped());
                }
            }
        }

        self.status.begin();
        let result = self.run_locked(source).await;
        match &result {
            Ok(report) => {
                self.status.set_phase(CrawlPhase::Idle);
                info!(processed = report.processed, "crawl finished");
            }
            Err(err) => {
                self.status.set_phase(CrawlPhase::Error);
                warn!(%err, "crawl failed");
            }
        }
        emit_indexing_complete();
        result
    }

    async fn run_locked<S: ConversationSource>(
        &self,
        source: &S,
    ) -> Result<CrawlReport, CrawlError> {
        self.status.set_phase(CrawlPhase::Listing);
        let listed = source.list_conversations().await?;
        info!(listed = listed.len(), "conversation listing complete");

        self.status.set_phase(CrawlPhase::Diffing);
        let known = self.store.known_convo_ids().await?;
        let pending = diff_new(listed, &known);
        info!(pending = pending.len(), known = known.len(), "diff complete");

        let batch_size = self.config.batch_size.max(1);
        let batches = pending.len().div_ceil(batch_size);
        let mut docs: Vec<MessageDocument> = Vec::new();
        let mut last_reported = 0usize;

        for (batch_index, chunk) in pending.chunks(batch_size).enumerate() {
            self.status.set_phase(CrawlPhase::Processing {
                batch: batch_index + 1,
                batches,
            });
            let results = futures::future::join_all(
                chunk.iter().map(|convo| self.process_one(source, convo)),
            )
            .await;
            for result in results {
                docs.extend(result?);
                if docs.len() >= last_reported + PROGRESS_EVERY {
                    last_reported = docs.len();
                    self.status.set_progress(docs.len());
                    emit_indexing_progress(docs.len());
                }
            }
            self.status.set_progress(docs.len());
            emit_indexing_progress(docs.len());
            last_reported = docs.len();
            debug!(batch = batch_index + 1, batches, "batch complete");
            if batch_index + 1 < batches {
                sleep(Duration::from_millis(self.config.batch_delay_ms)).await;
            }
        }

        self.status.set_phase(CrawlPhase::Committing);
        if docs.is_empty() {
            debug!("no new documents; leaving last sync time untouched");
        } else {
            self.store.insert_documents(&docs).await?;
            {
                let mut index = self.messages.write().await;
                for doc in &docs {
                    index.insert(doc.clone());
                }
            }
            self.store.set_last_sync(Utc::now().timestamp_millis()).await?;
        }

        Ok(CrawlReport {
            processed: docs.len(),
            skipped: false,
        })
    }

    /// Fetch and flatten one conversation. Transport and decode problems are
    /// contained here; authentication failures abort the run.
    async fn process_one<S: ConversationSource>(
        &self,
        source: &S,
        convo: &ConversationSummary,
    ) -> Result<Vec<MessageDocument>, CrawlError> {
        match source.fetch_conversation(&convo.id).await {
            Ok(detail) => Ok(flatten_conversation(convo, &detail)),
            Err(err) if err.is_auth() => Err(err),
            Err(err) => {
                warn!(convo_id = %convo.id, %err, "failed to process conversation; continuing");
                Ok(Vec::new())
            }
        }
    }
}
