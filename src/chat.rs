//! # Google Chat client
//!
//! Posts rendered messages to incoming-webhook URLs. The URL embeds the
//! space key and token, so only `scheme://host` is ever logged.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::pipeline::template::MessageBody;

const MAX_URL_LENGTH: usize = 2048;
const MAX_BODY_SNIPPET: usize = 512;

/// Transport-level failures; HTTP error statuses are returned as responses.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatTransportError {
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),
}

/// What the chat endpoint answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    pub status_code: u16,
    pub latency_ms: i64,
    /// Parsed `Retry-After` header (seconds form)
    pub retry_after_secs: Option<u64>,
    pub body_snippet: Option<String>,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn post_message(
        &self,
        url: &str,
        body: &MessageBody,
    ) -> Result<ChatResponse, ChatTransportError>;
}

/// Classification of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Retryable {
        reason: String,
        retry_after_secs: Option<u64>,
    },
    Permanent {
        reason: String,
    },
}

impl DeliveryOutcome {
    /// 2xx delivers; 408, 429, 5xx, timeouts and network errors retry;
    /// every other status and an invalid URL fail permanently.
    pub fn classify(result: &Result<ChatResponse, ChatTransportError>) -> Self {
        match result {
            Ok(response) => match response.status_code {
                200..=299 => DeliveryOutcome::Delivered,
                408 | 429 | 500..=599 => DeliveryOutcome::Retryable {
                    reason: status_reason(response),
                    retry_after_secs: response.retry_after_secs,
                },
                _ => DeliveryOutcome::Permanent {
                    reason: status_reason(response),
                },
            },
            Err(error @ (ChatTransportError::Timeout { .. } | ChatTransportError::Network(_))) => {
                DeliveryOutcome::Retryable {
                    reason: error.to_string(),
                    retry_after_secs: None,
                }
            }
            Err(error @ ChatTransportError::InvalidUrl(_)) => DeliveryOutcome::Permanent {
                reason: error.to_string(),
            },
        }
    }
}

fn status_reason(response: &ChatResponse) -> String {
    match &response.body_snippet {
        Some(body) if !body.is_empty() => format!("HTTP {}: {}", response.status_code, body),
        _ => format!("HTTP {}", response.status_code),
    }
}

/// Reduces a credential-bearing URL to `scheme://host` for logs.
pub fn redacted_target(webhook_url: &str) -> String {
    Url::parse(webhook_url)
        .ok()
        .map(|parsed| {
            let scheme = parsed.scheme();
            let host = parsed.host_str().unwrap_or("unknown");
            format!("{}://{}", scheme, host)
        })
        .unwrap_or_else(|| "[invalid-url]".to_string())
}

/// reqwest-backed [`ChatClient`].
#[derive(Debug, Clone)]
pub struct GoogleChatClient {
    client: Client,
    timeout: Duration,
    allow_http: bool,
}

impl GoogleChatClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pipenotify/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            timeout,
            allow_http: false,
        })
    }

    /// Accepts plain-http targets (local stubs only).
    pub fn allow_http(mut self) -> Self {
        self.allow_http = true;
        self
    }

    fn validate_url(&self, webhook_url: &str) -> Result<(), ChatTransportError> {
        if webhook_url.len() > MAX_URL_LENGTH {
            return Err(ChatTransportError::InvalidUrl(format!(
                "{} exceeds {MAX_URL_LENGTH} characters",
                redacted_target(webhook_url)
            )));
        }

        let parsed = Url::parse(webhook_url)
            .map_err(|_| ChatTransportError::InvalidUrl("[invalid-url]".to_string()))?;

        match parsed.scheme() {
            "https" => Ok(()),
            "http" if self.allow_http => Ok(()),
            _ => Err(ChatTransportError::InvalidUrl(format!(
                "{} must use https",
                redacted_target(webhook_url)
            ))),
        }
    }
}

#[async_trait]
impl ChatClient for GoogleChatClient {
    async fn post_message(
        &self,
        url: &str,
        body: &MessageBody,
    ) -> Result<ChatResponse, ChatTransportError> {
        if let Err(error) = self.validate_url(url) {
            warn!(target = %redacted_target(url), %error, "Rejected chat webhook URL");
            return Err(error);
        }

        let started = Instant::now();
        let result = self
            .client
            .post(url)
            .json(&body.to_chat_json())
            .send()
            .await;
        let latency_ms = started.elapsed().as_millis() as i64;

        let response = match result {
            Ok(response) => response,
            Err(error) if error.is_timeout() => {
                return Err(ChatTransportError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
            // reqwest errors may echo the URL
            Err(error) => {
                let error = error.without_url();
                return Err(ChatTransportError::Network(error.to_string()));
            }
        };

        let status_code = response.status().as_u16();
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());

        let body_snippet = if response.status().is_success() {
            None
        } else {
            response
                .text()
                .await
                .ok()
                .map(|text| text.chars().take(MAX_BODY_SNIPPET).collect::<String>())
        };

        debug!(
            target_host = %redacted_target(url),
            status_code,
            latency_ms,
            "Chat webhook responded"
        );

        Ok(ChatResponse {
            status_code,
            latency_ms,
            retry_after_secs,
            body_snippet,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn response(status_code: u16) -> Result<ChatResponse, ChatTransportError> {
        Ok(ChatResponse {
            status_code,
            latency_ms: 5,
            retry_after_secs: None,
            body_snippet: None,
        })
    }

    #[test]
    fn classification_table() {
        assert_eq!(DeliveryOutcome::classify(&response(200)), DeliveryOutcome::Delivered);
        assert_eq!(DeliveryOutcome::classify(&response(204)), DeliveryOutcome::Delivered);
        for status in [408, 429, 500, 502, 503] {
            assert!(matches!(
                DeliveryOutcome::classify(&response(status)),
                DeliveryOutcome::Retryable { .. }
            ));
        }
        for status in [400, 401, 403, 404, 410] {
            assert!(matches!(
                DeliveryOutcome::classify(&response(status)),
                DeliveryOutcome::Permanent { .. }
            ));
        }
        assert!(matches!(
            DeliveryOutcome::classify(&Err(ChatTransportError::Timeout { timeout_ms: 10 })),
            DeliveryOutcome::Retryable { .. }
        ));
        assert!(matches!(
            DeliveryOutcome::classify(&Err(ChatTransportError::InvalidUrl("x".into()))),
            DeliveryOutcome::Permanent { .. }
        ));
    }

    #[test]
    fn redacts_credentials() {
        assert_eq!(
            redacted_target("https://chat.googleapis.com/v1/spaces/AAA/messages?key=secret&token=t"),
            "https://chat.googleapis.com"
        );
        assert_eq!(redacted_target("::"), "[invalid-url]");
    }

    #[tokio::test]
    async fn rejects_plain_http_by_default() {
        let client = GoogleChatClient::new(Duration::from_secs(1)).unwrap();
        let body = MessageBody::Text { text: "hi".into() };
        let result = client.post_message("http://chat.example.com/hook", &body).await;
        assert!(matches!(result, Err(ChatTransportError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn posts_chat_json_and_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/spaces/A/messages"))
            .and(body_json(json!({ "text": "Deal won" })))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "42"))
            .expect(1)
            .mount(&server)
            .await;

        let client = GoogleChatClient::new(Duration::from_secs(5))
            .unwrap()
            .allow_http();
        let url = format!("{}/v1/spaces/A/messages", server.uri());
        let body = MessageBody::Text { text: "Deal won".into() };

        let result = client.post_message(&url, &body).await;
        let response = result.clone().unwrap();
        assert_eq!(response.status_code, 429);
        assert_eq!(response.retry_after_secs, Some(42));
        assert_eq!(
            DeliveryOutcome::classify(&result),
            DeliveryOutcome::Retryable {
                reason: "HTTP 429".to_string(),
                retry_after_secs: Some(42)
            }
        );
    }
}
