//! Relays driver progress to the service.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use servo_protocol::defaults;
use servo_protocol::{Event, ProgressRecord};
use std::time::Instant;
use tracing::warn;

use crate::api::ApiClient;
use crate::cancel::CancelRequested;

/// Consumer of driver progress records. The driver runner calls `report` for
/// every progress line; an `Err(CancelRequested)` return tells it to stop the
/// child.
#[async_trait]
pub trait ProgressSink: Send {
    async fn report(&mut self, record: &ProgressRecord) -> Result<(), CancelRequested>;
}

/// Sink for operations that do not relay progress (info probes, describe
/// queries, the environment preflight).
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn report(&mut self, _record: &ProgressRecord) -> Result<(), CancelRequested> {
        Ok(())
    }
}

/// Posts progress events for one operation.
///
/// Bound to the operation's event kind and start time; each record becomes a
/// `{progress, runtime, message?}` post with a single retry. Progress is
/// best-effort: a post that keeps failing is logged and dropped rather than
/// stalling the driver behind it.
pub struct ProgressReporter<'a> {
    api: &'a mut ApiClient,
    event: Event,
    started_at: Instant,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(api: &'a mut ApiClient, event: Event) -> Self {
        Self {
            api,
            event,
            started_at: Instant::now(),
        }
    }
}

#[async_trait]
impl ProgressSink for ProgressReporter<'_> {
    async fn report(&mut self, record: &ProgressRecord) -> Result<(), CancelRequested> {
        let mut param = Map::new();
        param.insert("progress".to_string(), json!(record.progress));
        param.insert(
            "runtime".to_string(),
            json!(self.started_at.elapsed().as_secs()),
        );
        if let Some(message) = &record.message {
            param.insert("message".to_string(), json!(message));
        }

        let response = self
            .api
            .post(
                self.event,
                Value::Object(param),
                Some(defaults::PROGRESS_RETRIES),
                true,
            )
            .await;

        match response {
            Ok(value) => {
                if value.get("status").and_then(Value::as_str) == Some("cancel") {
                    let reason = value
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or("unspecified");
                    warn!(event = self.event.as_str(), reason, "service cancelled the operation");
                    Err(CancelRequested)
                } else {
                    Ok(())
                }
            }
            Err(err) => {
                warn!(event = self.event.as_str(), "progress post dropped: {err}");
                Ok(())
            }
        }
    }
}
