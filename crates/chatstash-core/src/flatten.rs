//! Conversation flattening.
//!
//! Projects the service's node graph (the `mapping` object) into flat,
//! individually indexable message documents. Structural oddities are skipped
//! per node rather than failing the conversation.

use chrono::Utc;
use tracing::{debug, warn};

use chatstash_store::{MessageDocument, Role};

use crate::remote::{ContentPart, ConversationDetail, ConversationSummary, MappingNode};

const UNTITLED: &str = "Untitled Conversation";

/// Flatten one conversation into message documents.
///
/// Nodes without a message, without a parts array, or whose parts yield no
/// text are dropped. Mapping iteration order is arbitrary; consumers order
/// by timestamp.
pub fn flatten_conversation(
    summary: &ConversationSummary,
    detail: &ConversationDetail,
) -> Vec<MessageDocument> {
    let Some(mapping) = detail.mapping.as_ref() else {
        warn!(convo_id = %summary.id, "conversation has no mapping; skipping");
        return Vec::new();
    };

    let title = detail
        .title
        .clone()
        .or_else(|| summary.title.clone())
        .unwrap_or_else(|| UNTITLED.to_string());
    let fallback_time = detail
        .update_time
        .or(summary.update_time)
        .unwrap_or_else(now_epoch_seconds);

    let mut docs = Vec::new();
    for (node_id, raw) in mapping {
        let node: MappingNode = match serde_json::from_value(raw.clone()) {
            Ok(node) => node,
            Err(err) => {
                debug!(convo_id = %summary.id, node_id = %node_id, %err, "skipping malformed node");
                continue;
            }
        };
        let Some(message) = node.message else {
            continue;
        };
        let Some(parts) = message.content.as_ref().and_then(|c| c.parts.as_ref()) else {
            continue;
        };

        let mut fragments: Vec<String> = Vec::new();
        for part in parts {
            match part {
                ContentPart::Text(text) => {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        fragments.push(trimmed.to_string());
                    }
                }
                ContentPart::Audio {
                    audio_transcription,
                } => {
                    if let Some(text) = &audio_transcription.text {
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            fragments.push(format!("[Voice] {}", trimmed));
                        }
                    }
                }
                ContentPart::Other(_) => {}
            }
        }
        if fragments.is_empty() {
            continue;
        }

        docs.push(MessageDocument {
            id: message
                .id
                .clone()
                .unwrap_or_else(|| format!("msg_{}", node_id)),
            convo_id: summary.id.clone(),
            role: message
                .author
                .as_ref()
                .and_then(|a| a.role.as_deref())
                .map(Role::parse)
                .unwrap_or(Role::Unknown),
            text: fragments.join("\n"),
            title: title.clone(),
            time: message.create_time.unwrap_or(fallback_time),
        });
    }
    docs
}

pub(crate) fn now_epoch_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
