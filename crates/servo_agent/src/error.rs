//! Error types for the agent's two external boundaries: the service API and
//! driver subprocesses.

use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

/// Service API errors. `Transport`, `Status` and `InvalidBody` are retryable
/// by the client; `ServerUnavailable` is what survives an exhausted retry
/// budget.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("connection error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("service returned a non-JSON body")]
    InvalidBody(#[source] serde_json::Error),

    #[error("service unavailable after retries: {last}")]
    ServerUnavailable { last: String },
}

/// Driver subprocess errors.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to spawn driver {driver}")]
    Spawn {
        driver: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error on driver {stream}")]
    Io {
        stream: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("driver info probe failed for {driver}: {message}")]
    InfoProbe { driver: String, message: String },

    #[error("driver emitted a non-JSON stdout line: {line}")]
    Decode { line: String },

    #[error("no driver i/o within {0:?}")]
    Timeout(Duration),

    #[error("driver reported status {status}: {message}")]
    NonOk {
        status: String,
        message: String,
        reason: String,
    },

    #[error("measure driver returned no metrics")]
    MissingMetrics,
}

impl DriverError {
    /// Failure token carried to the service. Structured driver failures keep
    /// the driver's own status; everything else collapses to `failed`.
    pub fn status(&self) -> &str {
        match self {
            DriverError::NonOk { status, .. } => status,
            _ => "failed",
        }
    }

    /// The `param` of a failure result event: `{status, message, reason?}`.
    pub fn result_param(&self) -> Value {
        match self {
            DriverError::NonOk {
                status,
                message,
                reason,
            } => json!({
                "status": status,
                "message": message,
                "reason": reason,
            }),
            other => json!({
                "status": other.status(),
                "message": other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_ok_keeps_driver_status() {
        let err = DriverError::NonOk {
            status: "rejected".to_string(),
            message: "bad settings".to_string(),
            reason: "range".to_string(),
        };
        assert_eq!(err.status(), "rejected");
        let param = err.result_param();
        assert_eq!(param["status"], "rejected");
        assert_eq!(param["reason"], "range");
    }

    #[test]
    fn generic_errors_collapse_to_failed() {
        let err = DriverError::Decode {
            line: "oops".to_string(),
        };
        assert_eq!(err.status(), "failed");
        let param = err.result_param();
        assert_eq!(param["status"], "failed");
        assert!(param["message"].as_str().unwrap().contains("oops"));
        assert!(param.get("reason").is_none());
    }
}
