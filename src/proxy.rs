use crate::payload::{BuildOutcome, SuggestParams, SuggestionType, build_for_request};
use crate::settings::Credential;
use axum::http::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(8);
pub const FAILURE_MARKER: &str = "request_failed";
const MAX_LOGGED_ERROR_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub credential: Credential,
    pub timeout: Duration,
}

impl ProxyConfig {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            timeout: UPSTREAM_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Status and JSON body handed back to the browser.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyReply {
    pub status: StatusCode,
    pub body: Value,
}

impl ProxyReply {
    fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    fn empty() -> Self {
        Self::ok(empty_body())
    }

    fn failed() -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            body: json!({ "suggestions": [], "error": FAILURE_MARKER }),
        }
    }
}

fn empty_body() -> Value {
    json!({ "suggestions": [] })
}

/// Forwards suggestion queries upstream with the stored credential. Holds no
/// per-request state; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct SuggestionProxy {
    client: reqwest::Client,
    config: ProxyConfig,
}

impl SuggestionProxy {
    pub fn new(config: ProxyConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|err| {
                warn!(error = %err, "falling back to a default HTTP client without a timeout");
                reqwest::Client::new()
            });
        Self { client, config }
    }

    pub fn endpoint(&self, kind: SuggestionType) -> String {
        format!(
            "{}/{}",
            self.config.credential.api_base_url.trim_end_matches('/'),
            kind
        )
    }

    /// Never fails: upstream trouble becomes a 502 reply with an empty list.
    pub async fn handle(&self, raw_type: Option<&str>, params: &SuggestParams) -> ProxyReply {
        let (kind, outcome) = build_for_request(raw_type, params);
        let payload = match outcome {
            BuildOutcome::Empty => return ProxyReply::empty(),
            BuildOutcome::Payload(payload) => payload,
        };
        let endpoint = self.endpoint(kind);

        let response = self
            .client
            .post(&endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, self.config.credential.authorization())
            .timeout(self.config.timeout)
            .json(&payload)
            .send()
            .await;

        let response = match response {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                let status = resp.status();
                log_failure(&endpoint, kind, &format!("upstream status {status}"));
                return ProxyReply::failed();
            }
            Err(err) => {
                log_failure(&endpoint, kind, &err.to_string());
                return ProxyReply::failed();
            }
        };

        match response.bytes().await {
            Ok(bytes) => ProxyReply::ok(normalize_body(&bytes)),
            Err(err) => {
                log_failure(&endpoint, kind, &err.to_string());
                ProxyReply::failed()
            }
        }
    }
}

/// Passes the upstream document through when it looks like a suggestion
/// list, otherwise substitutes an empty one.
fn normalize_body(bytes: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) if value.get("suggestions").is_some_and(Value::is_array) => value,
        Ok(_) => {
            debug!("upstream body has no suggestion list");
            empty_body()
        }
        Err(err) => {
            debug!(error = %err, "upstream body is not JSON");
            empty_body()
        }
    }
}

fn log_failure(endpoint: &str, kind: SuggestionType, message: &str) {
    let message: String = message.chars().take(MAX_LOGGED_ERROR_CHARS).collect();
    warn!(%endpoint, %kind, error = %message, "suggestion upstream request failed");
}
