//! Operation handlers: thin composition of the driver runner for each
//! command the service can issue.

use serde_json::{json, Map, Value};
use servo_protocol::defaults;
use servo_protocol::DriverResponse;
use tracing::debug;

use crate::config::DriverPaths;
use crate::driver::{DriverInput, DriverRunner};
use crate::error::DriverError;
use crate::progress::{NullSink, ProgressSink};

/// Handler context for one command dispatch.
pub struct Operations<'a> {
    pub runner: &'a DriverRunner,
    pub drivers: &'a DriverPaths,
    pub app_id: &'a str,
    pub perf_expr: Option<&'a str>,
}

impl Operations<'_> {
    /// DESCRIBE: query the adjust driver for the application's settings and
    /// the measure driver for its metric catalog, and combine both into one
    /// descriptor.
    pub async fn describe(&self) -> Result<Value, DriverError> {
        let query = self
            .runner
            .run(
                &self.drivers.adjust,
                self.app_id,
                DriverInput::Query("--query"),
                &mut NullSink,
            )
            .await?;
        reject_failure(&query)?;

        let described = self
            .runner
            .run(
                &self.drivers.measure,
                self.app_id,
                DriverInput::Query("--describe"),
                &mut NullSink,
            )
            .await?;
        reject_failure(&described)?;

        // Legacy drivers print the bare settings map without the wrapper key.
        let application = match query.get("application") {
            Some(app) => app.clone(),
            None => query.clone().into_value(),
        };

        let mut metrics = described.get("metrics").cloned().unwrap_or_else(|| json!({}));
        if let Some(extra) = query.get("metrics").and_then(Value::as_object) {
            let merged = metrics.as_object_mut();
            if let Some(merged) = merged {
                for (name, value) in extra {
                    merged.entry(name.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        alias_perf(&mut metrics);

        let mut descriptor = json!({
            "application": application,
            "measurement": { "metrics": metrics },
        });
        if let Some(expr) = self.perf_expr {
            descriptor["optimization"] = json!({ "perf": expr });
        }
        Ok(descriptor)
    }

    /// MEASURE: feed the request to the measure driver and return its
    /// metrics. An empty metric set is an error; the service cannot optimize
    /// on nothing.
    pub async fn measure(
        &self,
        param: &Value,
        sink: &mut dyn ProgressSink,
    ) -> Result<Value, DriverError> {
        let response = self
            .runner
            .run(
                &self.drivers.measure,
                self.app_id,
                DriverInput::Request(param.clone()),
                sink,
            )
            .await?;
        reject_non_ok(&response)?;

        let mut metrics = response.get("metrics").cloned().unwrap_or_else(|| json!({}));
        if metrics.as_object().map_or(true, Map::is_empty) {
            return Err(DriverError::MissingMetrics);
        }
        alias_perf(&mut metrics);

        let mut result = json!({ "metrics": metrics });
        if let Some(annotations) = response.get("annotations") {
            result["annotations"] = annotations.clone();
        }
        Ok(result)
    }

    /// ADJUST: merge the requested state with its control section, hand the
    /// result to the adjust driver, and return the driver's response with the
    /// applied state defaulted to the requested one.
    pub async fn adjust(
        &self,
        param: &Value,
        sink: &mut dyn ProgressSink,
    ) -> Result<Value, DriverError> {
        let request = merge_adjust_request(param);
        let response = self
            .runner
            .run(
                &self.drivers.adjust,
                self.app_id,
                DriverInput::Request(request),
                sink,
            )
            .await?;
        reject_non_ok(&response)?;

        let mut result = response.into_value();
        if result.get("state").is_none() {
            debug!("adjust driver returned no state; reporting the requested one");
            result["state"] = param.get("state").cloned().unwrap_or_else(|| json!({}));
        }
        Ok(result)
    }

    /// Environment preflight: run the environment driver synchronously on
    /// the command's param. Any non-ok status is a structured failure; the
    /// caller reports it and skips the main command.
    pub async fn environment(&self, param: &Value) -> Result<(), DriverError> {
        let response = self
            .runner
            .run(
                &self.drivers.environment,
                self.app_id,
                DriverInput::Request(param.clone()),
                &mut NullSink,
            )
            .await?;
        reject_non_ok(&response)
    }
}

/// Build the adjust driver's stdin request: the fields of `param.state`
/// merged with the `control` section.
fn merge_adjust_request(param: &Value) -> Value {
    let mut request = match param.get("state") {
        Some(Value::Object(state)) => state.clone(),
        _ => Map::new(),
    };
    if let Some(control) = param.get("control") {
        request.insert("control".to_string(), control.clone());
    }
    Value::Object(request)
}

/// Mirror `requests throughput` under the legacy `perf` name when the driver
/// did not provide one itself.
fn alias_perf(metrics: &mut Value) {
    let Some(map) = metrics.as_object_mut() else {
        return;
    };
    if map.contains_key(defaults::PERF_METRIC) {
        return;
    }
    if let Some(value) = map.get(defaults::REQUESTS_THROUGHPUT_METRIC).cloned() {
        map.insert(defaults::PERF_METRIC.to_string(), value);
    }
}

/// Request-mode responses must report `status: ok`; anything else (including
/// a missing status, reported as `nodata`) is a structured failure.
fn reject_non_ok(response: &DriverResponse) -> Result<(), DriverError> {
    let status = response.status_or_default();
    if status == "ok" {
        return Ok(());
    }
    Err(non_ok(status, response))
}

/// Query-mode responses carry no status on success (or `ok`); only an
/// explicit failure status is rejected.
fn reject_failure(response: &DriverResponse) -> Result<(), DriverError> {
    match response.status() {
        None => Ok(()),
        Some(status) if status == "ok" => Ok(()),
        Some(status) => Err(non_ok(status, response)),
    }
}

fn non_ok(status: String, response: &DriverResponse) -> DriverError {
    DriverError::NonOk {
        status,
        message: response.message().unwrap_or_default(),
        reason: response.reason().unwrap_or_else(|| "unknown".to_string()),
    }
}
