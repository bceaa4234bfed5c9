//! Dedup work-set computation.
//!
//! A conversation with at least one persisted document is considered fully
//! indexed and is never re-fetched, even if it has grown new messages since.
//! That keeps incremental crawls idempotent and cheap; the trade-off is a
//! named limitation (updated conversations are not re-synced).

use std::collections::HashSet;

use crate::remote::ConversationSummary;

/// Set difference by conversation id, preserving the input order of `listed`.
pub fn diff_new(
    listed: Vec<ConversationSummary>,
    known: &HashSet<String>,
) -> Vec<ConversationSummary> {
    listed
        .into_iter()
        .filter(|convo| !known.contains(&convo.id))
        .collect()
}
