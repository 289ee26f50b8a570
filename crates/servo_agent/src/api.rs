//! Client for the optimization service.
//!
//! One endpoint, one verb: every exchange is a POST of `{event, param}` and a
//! JSON response. Reliability policy lives here: the command loop retries
//! forever, progress posts barely retry at all.

use serde_json::{json, Value};
use servo_protocol::defaults;
use servo_protocol::Event;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ApiError;

/// Cap on the response-body snippet carried inside an HTTP status error.
const ERROR_BODY_SNIPPET: usize = 256;

pub struct ApiClient {
    base_url: String,
    auth_token: Option<String>,
    retry_delay: Duration,
    client: reqwest::Client,
    /// The first failed `WHATS_NEXT` of a run retries after one second so a
    /// freshly restarted agent does not sit out a full retry delay.
    fast_first_poll_retry: bool,
}

impl ApiClient {
    pub fn new(config: &Config) -> Self {
        Self {
            base_url: config.base_url.clone(),
            auth_token: config.auth_token.clone(),
            retry_delay: config.retry_delay,
            client: reqwest::Client::new(),
            fast_first_poll_retry: true,
        }
    }

    /// Post an event and return the parsed response.
    ///
    /// `retries`: `None` retries forever, `Some(0)` not at all, `Some(n)`
    /// caps the retry count. Retried causes: connection failure, non-2xx
    /// status, non-JSON body. `backoff: false` skips the inter-retry sleep
    /// (tests only).
    pub async fn post(
        &mut self,
        event: Event,
        param: Value,
        retries: Option<u32>,
        backoff: bool,
    ) -> Result<Value, ApiError> {
        let body = json!({ "event": event.as_str(), "param": param });
        let mut attempts: u32 = 0;

        loop {
            match self.post_once(&body).await {
                Ok(response) => {
                    debug!(event = event.as_str(), "event posted");
                    if event == Event::Description {
                        // The server restarts the session after a description;
                        // give it a fresh connection pool to come back to.
                        self.client = reqwest::Client::new();
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if let Some(max) = retries {
                        if attempts >= max {
                            return Err(ApiError::ServerUnavailable {
                                last: err.to_string(),
                            });
                        }
                    }
                    attempts += 1;
                    let delay = self.next_retry_delay(event);
                    warn!(
                        event = event.as_str(),
                        attempt = attempts,
                        "service post failed, retrying in {:?}: {err}",
                        delay
                    );
                    if backoff {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn post_once(&self, body: &Value) -> Result<Value, ApiError> {
        let mut request = self.client.post(&self.base_url).json(body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: snippet(&text),
            });
        }

        serde_json::from_str(&text).map_err(ApiError::InvalidBody)
    }

    fn next_retry_delay(&mut self, event: Event) -> Duration {
        if event == Event::WhatsNext && self.fast_first_poll_retry {
            self.fast_first_poll_retry = false;
            defaults::FIRST_POLL_RETRY_DELAY
        } else {
            self.retry_delay
        }
    }
}

fn snippet(text: &str) -> String {
    if text.len() <= ERROR_BODY_SNIPPET {
        return text.to_string();
    }
    let mut end = ERROR_BODY_SNIPPET;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_respects_char_boundaries() {
        assert_eq!(snippet("plain body"), "plain body");

        let long: String = "é".repeat(400);
        let cut = snippet(&long);
        assert!(cut.len() <= ERROR_BODY_SNIPPET);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
