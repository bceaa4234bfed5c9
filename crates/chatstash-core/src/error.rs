use thiserror::Error;

/// Failure taxonomy for a crawl run.
///
/// Listing and commit failures abort the whole run; transport and malformed
/// responses for a single conversation are swallowed by the orchestrator so
/// one bad conversation never sinks the batch. Authentication failures are
/// always fatal to the run, wherever they surface.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("authentication failed (HTTP {status}); refresh the session and try again")]
    AuthenticationFailed { status: u16 },

    #[error("{context} failed with HTTP {status}")]
    Transport { status: u16, context: String },

    #[error("malformed response: {0}")]
    MalformedData(String),

    #[error("document store failure: {0}")]
    Store(#[from] anyhow::Error),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl CrawlError {
    /// Map a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: u16, context: &str) -> Self {
        match status {
            401 | 403 => CrawlError::AuthenticationFailed { status },
            _ => CrawlError::Transport {
                status,
                context: context.to_string(),
            },
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, CrawlError::AuthenticationFailed { .. })
    }
}
