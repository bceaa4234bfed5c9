//! In-memory scored substring search.
//!
//! The index holds lowercased projections of title and body next to each
//! item so queries never re-lowercase the corpus. Linear scan per query;
//! fine at the tens-of-thousands-of-documents scale this runs at.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use chatstash_store::{Bookmark, MessageDocument, Role};

pub const DEFAULT_SEARCH_LIMIT: usize = 20;

const SNIPPET_WINDOW: usize = 50;
const SNIPPET_FALLBACK_LEN: usize = 150;

/// Anything the index can hold: a stable key, searchable title and body
/// text, and a recency value for tie-breaking.
pub trait Indexed: Clone {
    fn key(&self) -> &str;
    fn title(&self) -> &str;
    fn body(&self) -> &str;
    fn recency(&self) -> f64;
}

impl Indexed for MessageDocument {
    fn key(&self) -> &str {
        &self.id
    }
    fn title(&self) -> &str {
        &self.title
    }
    fn body(&self) -> &str {
        &self.text
    }
    fn recency(&self) -> f64 {
        self.time
    }
}

impl Indexed for Bookmark {
    fn key(&self) -> &str {
        &self.id
    }
    fn title(&self) -> &str {
        &self.title
    }
    fn body(&self) -> &str {
        &self.content
    }
    fn recency(&self) -> f64 {
        self.timestamp as f64
    }
}

/// A scored search result. Title matches score 2, body-only matches 1.
#[derive(Debug, Clone)]
pub struct Hit<T> {
    pub item: T,
    pub score: u8,
}

struct Entry<T> {
    title_lc: String,
    body_lc: String,
    item: T,
}

pub struct SearchIndex<T: Indexed> {
    entries: HashMap<String, Entry<T>>,
}

impl<T: Indexed> Default for SearchIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Indexed> SearchIndex<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn rebuild(items: impl IntoIterator<Item = T>) -> Self {
        let mut index = Self::new();
        for item in items {
            index.insert(item);
        }
        index
    }

    /// Insert or replace by key.
    pub fn insert(&mut self, item: T) {
        let entry = Entry {
            title_lc: item.title().to_lowercase(),
            body_lc: item.body().to_lowercase(),
            item,
        };
        self.entries.insert(entry.item.key().to_string(), entry);
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.entries.values().map(|entry| &entry.item)
    }

    /// Case-insensitive substring search, best score first, most recent
    /// first within a score band.
    pub fn search(&self, query: &str, limit: usize) -> Vec<Hit<T>> {
        let needle = query.to_lowercase();
        let mut hits: Vec<Hit<T>> = self
            .entries
            .values()
            .filter_map(|entry| {
                let score = if entry.title_lc.contains(&needle) {
                    2
                } else if entry.body_lc.contains(&needle) {
                    1
                } else {
                    return None;
                };
                Some(Hit {
                    item: entry.item.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score.cmp(&a.score).then_with(|| {
                b.item
                    .recency()
                    .partial_cmp(&a.item.recency())
                    .unwrap_or(Ordering::Equal)
            })
        });
        hits.truncate(limit);
        hits
    }
}

/// Extract a short context window around the first occurrence of `query`
/// in `text`, with ellipses marking truncation on either side. Falls back
/// to a prefix of the text when the query does not occur (a title-only
/// match, for instance).
pub fn generate_snippet(text: &str, query: &str) -> String {
    let needle = query.to_lowercase();
    let haystack = text.to_lowercase();

    let Some(found) = (!needle.is_empty())
        .then(|| haystack.find(&needle))
        .flatten()
    else {
        let prefix: String = text.chars().take(SNIPPET_FALLBACK_LEN).collect();
        return format!("{}...", prefix);
    };

    // Lowercasing can shift byte offsets for a handful of characters
    // (e.g. dotted capital I), so clamp both ends to char boundaries of
    // the original text instead of trusting the offset exactly.
    let start = floor_boundary(text, found.saturating_sub(SNIPPET_WINDOW));
    let end = ceil_boundary(text, found + needle.len() + SNIPPET_WINDOW);

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.push_str(&text[start..end]);
    if end < text.len() {
        snippet.push_str("...");
    }
    snippet
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    i = i.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// One matched message inside a conversation group.
#[derive(Debug, Clone, Serialize)]
pub struct MessageMatch {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub snippet: String,
    pub time: f64,
}

/// Message hits grouped per conversation, for display.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationMatch {
    pub id: String,
    pub title: String,
    pub last_update: f64,
    pub messages: Vec<MessageMatch>,
}

/// Group message hits by conversation, newest conversation first. Message
/// order within a group follows hit order (score, then recency).
pub fn group_by_conversation(
    hits: Vec<Hit<MessageDocument>>,
    query: &str,
    limit: usize,
) -> Vec<ConversationMatch> {
    let mut groups: Vec<ConversationMatch> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for hit in hits {
        let doc = hit.item;
        let position = *positions.entry(doc.convo_id.clone()).or_insert_with(|| {
            groups.push(ConversationMatch {
                id: doc.convo_id.clone(),
                title: doc.title.clone(),
                last_update: doc.time,
                messages: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[position];
        group.last_update = group.last_update.max(doc.time);
        group.messages.push(MessageMatch {
            snippet: generate_snippet(&doc.text, query),
            id: doc.id,
            role: doc.role,
            text: doc.text,
            time: doc.time,
        });
    }

    groups.sort_by(|a, b| {
        b.last_update
            .partial_cmp(&a.last_update)
            .unwrap_or(Ordering::Equal)
    });
    groups.truncate(limit);
    groups
}
