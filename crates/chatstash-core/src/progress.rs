//! Structured progress emission for UI collaborators.
//!
//! Progress updates are written to stdout as prefixed JSON lines; the host
//! UI parses them to drive its indexing indicator. The count is the number
//! of documents processed so far in the current run, message-level even
//! though work is chunked by conversation.
//!
//! Output format: `CHATSTASH_PROGRESS:{"type":"indexingProgress",...}\n`

use std::io::Write;

/// Emit a monotone documents-processed-so-far update.
pub fn emit_indexing_progress(message_count: usize) {
    let payload = serde_json::json!({
        "type": "indexingProgress",
        "messageCount": message_count,
    });
    println!("CHATSTASH_PROGRESS:{}", payload);
    let _ = std::io::stdout().flush();
}

/// Emit the end-of-run marker. Sent on both success and failure paths so the
/// UI indicator can never stick in the "in progress" state.
pub fn emit_indexing_complete() {
    let payload = serde_json::json!({ "type": "indexingComplete" });
    println!("CHATSTASH_PROGRESS:{}", payload);
    let _ = std::io::stdout().flush();
}
