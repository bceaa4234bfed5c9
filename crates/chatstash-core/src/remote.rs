//! HTTP client for the remote conversation service.
//!
//! The wire types here are deliberately lenient: the service's payloads vary
//! across account types and change without notice, so everything optional is
//! `Option` with `#[serde(default)]`, timestamps accept both epoch seconds
//! and RFC 3339 strings, and unrecognized content parts deserialize into a
//! catch-all variant instead of failing the whole conversation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tokio::time::sleep;
use tracing::debug;

use crate::config::CrawlConfig;
use crate::error::CrawlError;

/// One row of the conversation listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "flexible_time")]
    pub update_time: Option<f64>,
}

/// One page of the listing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationPage {
    #[serde(default)]
    pub items: Vec<ConversationSummary>,
    #[serde(default)]
    pub total: u64,
}

/// Full conversation payload. The mapping values are kept as raw JSON so a
/// single malformed node can be skipped during flattening without poisoning
/// its siblings.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationDetail {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "flexible_time")]
    pub update_time: Option<f64>,
    #[serde(default)]
    pub mapping: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MappingNode {
    #[serde(default)]
    pub message: Option<MessageNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageNode {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub author: Option<MessageAuthor>,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default, deserialize_with = "flexible_time")]
    pub create_time: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageAuthor {
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub parts: Option<Vec<ContentPart>>,
}

/// A single entry of a message's `parts` array. Text parts are plain strings;
/// voice messages carry their transcription in an object. Anything else
/// (image pointers, tool payloads) lands in `Other` and is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    Text(String),
    Audio {
        audio_transcription: AudioTranscription,
    },
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioTranscription {
    #[serde(default)]
    pub text: Option<String>,
}

/// Accepts epoch seconds (possibly fractional) or an RFC 3339 string.
fn flexible_time<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(f64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Seconds(seconds)) => Some(seconds),
        Some(Raw::Text(text)) => chrono::DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|dt| dt.timestamp_millis() as f64 / 1000.0),
        None => None,
    })
}

/// Abstraction over the remote service so the orchestrator can run against
/// a fake in tests.
#[async_trait]
pub trait ConversationSource: Send + Sync {
    /// List every non-archived conversation, most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, CrawlError>;

    /// Fetch the full payload of one conversation.
    async fn fetch_conversation(&self, id: &str) -> Result<ConversationDetail, CrawlError>;
}

/// Authenticated client for the real service.
pub struct RemoteClient {
    http: reqwest::Client,
    config: CrawlConfig,
    token: Option<String>,
    cookie_header: Option<String>,
}

impl RemoteClient {
    pub fn new(
        config: CrawlConfig,
        token: Option<&str>,
        cookie_header: Option<&str>,
    ) -> Result<Self, CrawlError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            config,
            token: token.map(str::to_string),
            cookie_header: cookie_header.map(str::to_string),
        })
    }

    /// Browser-equivalent headers. The service rejects requests that do not
    /// look like they came from its own frontend.
    fn prepare(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request
            .header("accept", "*/*")
            .header("accept-language", "en-US,en;q=0.9")
            .header("content-type", "application/json")
            .header("oai-language", &self.config.language)
            .header(
                "sec-ch-ua",
                "\"Not)A;Brand\";v=\"8\", \"Chromium\";v=\"138\"",
            )
            .header("sec-ch-ua-mobile", "?0")
            .header("sec-ch-ua-platform", "\"macOS\"")
            .header("sec-fetch-dest", "empty")
            .header("sec-fetch-mode", "cors")
            .header("sec-fetch-site", "same-origin")
            .header("user-agent", &self.config.user_agent)
            .header("referer", &self.config.referer);
        if let Some(cookie) = &self.cookie_header {
            request = request.header("cookie", cookie);
        }
        if let Some(token) = &self.token {
            request = request.header("authorization", format!("Bearer {}", token));
        }
        request
    }
}

#[async_trait]
impl ConversationSource for RemoteClient {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, CrawlError> {
        let limit = self.config.page_size;
        let mut offset = 0u64;
        let mut all = Vec::new();

        loop {
            let url = format!(
                "{}/conversations?offset={}&limit={}&order=updated&is_archived=false",
                self.config.base_url, offset, limit
            );
            let response = self.prepare(self.http.get(&url)).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(CrawlError::from_status(
                    status.as_u16(),
                    "conversation listing",
                ));
            }
            let page: ConversationPage = response.json().await.map_err(|err| {
                CrawlError::MalformedData(format!(
                    "conversation page at offset {}: {}",
                    offset, err
                ))
            })?;
            if page.items.is_empty() {
                break;
            }
            debug!(
                offset,
                fetched = page.items.len(),
                total = page.total,
                "fetched listing page"
            );
            all.extend(page.items);
            if offset + limit >= page.total {
                break;
            }
            offset += limit;
            sleep(Duration::from_millis(self.config.page_delay_ms)).await;
        }

        Ok(all)
    }

    async fn fetch_conversation(&self, id: &str) -> Result<ConversationDetail, CrawlError> {
        let url = format!("{}/conversation/{}", self.config.base_url, id);
        let response = self.prepare(self.http.get(&url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::from_status(
                status.as_u16(),
                &format!("conversation fetch ({})", id),
            ));
        }
        response
            .json()
            .await
            .map_err(|err| CrawlError::MalformedData(format!("conversation {}: {}", id, err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> CrawlConfig {
        CrawlConfig {
            base_url,
            page_delay_ms: 0,
            ..CrawlConfig::default()
        }
    }

    fn listing_page(prefix: &str, count: usize, total: u64) -> serde_json::Value {
        let items: Vec<serde_json::Value> = (0..count)
            .map(|i| {
                serde_json::json!({
                    "id": format!("{}-{}", prefix, i),
                    "title": format!("Conversation {}", i),
                    "update_time": 1_700_000_000.0 + i as f64,
                })
            })
            .collect();
        serde_json::json!({ "items": items, "total": total })
    }

    #[tokio::test]
    async fn listing_walks_every_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations"))
            .and(query_param("offset", "0"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing_page("a", 100, 150)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/conversations"))
            .and(query_param("offset", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing_page("b", 50, 150)))
            .expect(1)
            .mount(&server)
            .await;

        let client = RemoteClient::new(test_config(server.uri()), Some("tok"), None).unwrap();
        let listed = client.list_conversations().await.unwrap();
        assert_eq!(listed.len(), 150);
        assert_eq!(listed[0].id, "a-0");
        assert_eq!(listed[149].id, "b-49");
    }

    #[tokio::test]
    async fn listing_stops_on_empty_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "items": [], "total": 500 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = RemoteClient::new(test_config(server.uri()), None, None).unwrap();
        let listed = client.list_conversations().await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn unauthorized_listing_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = RemoteClient::new(test_config(server.uri()), None, None).unwrap();
        let err = client.list_conversations().await.unwrap_err();
        assert!(matches!(
            err,
            CrawlError::AuthenticationFailed { status: 403 }
        ));
    }

    #[tokio::test]
    async fn server_error_maps_to_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = RemoteClient::new(test_config(server.uri()), None, None).unwrap();
        let err = client.list_conversations().await.unwrap_err();
        assert!(matches!(err, CrawlError::Transport { status: 500, .. }));
    }

    #[tokio::test]
    async fn fetch_decodes_mapping_and_rfc3339_times() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversation/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "title": "Test",
                "update_time": "2024-01-15T10:30:00Z",
                "mapping": {
                    "node1": {
                        "message": {
                            "id": "m1",
                            "author": { "role": "user" },
                            "content": { "parts": ["hello"] },
                            "create_time": 1_700_000_000.5,
                        }
                    }
                }
            })))
            .mount(&server)
            .await;

        let client = RemoteClient::new(test_config(server.uri()), Some("tok"), None).unwrap();
        let detail = client.fetch_conversation("abc").await.unwrap();
        assert_eq!(detail.title.as_deref(), Some("Test"));
        assert!(detail.update_time.unwrap() > 1_700_000_000.0);
        let mapping = detail.mapping.unwrap();
        let node: MappingNode = serde_json::from_value(mapping["node1"].clone()).unwrap();
        let message = node.message.unwrap();
        assert_eq!(message.id.as_deref(), Some("m1"));
        assert_eq!(message.create_time, Some(1_700_000_000.5));
    }

    #[test]
    fn content_part_tolerates_unknown_shapes() {
        let parts: Vec<ContentPart> = serde_json::from_value(serde_json::json!([
            "plain text",
            { "audio_transcription": { "text": "spoken words" } },
            { "content_type": "image_asset_pointer", "asset_pointer": "file://x" },
        ]))
        .unwrap();
        assert!(matches!(&parts[0], ContentPart::Text(t) if t == "plain text"));
        assert!(matches!(&parts[1], ContentPart::Audio { .. }));
        assert!(matches!(&parts[2], ContentPart::Other(_)));
    }
}
