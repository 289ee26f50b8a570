//! Service and driver payload types.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Service protocol
// ============================================================================

/// Command verbs the service may answer `WHATS_NEXT` with.
///
/// Unknown verbs are preserved in `Other` so the agent can log them verbatim
/// and keep polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Describe,
    Measure,
    Adjust,
    Sleep,
    Exit,
    Other(String),
}

impl Command {
    /// Parse a wire verb. Never fails; unrecognized verbs land in `Other`.
    pub fn parse(s: &str) -> Command {
        match s {
            "DESCRIBE" => Command::Describe,
            "MEASURE" => Command::Measure,
            "ADJUST" => Command::Adjust,
            "SLEEP" => Command::Sleep,
            "EXIT" => Command::Exit,
            other => Command::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Command::Describe => "DESCRIBE",
            Command::Measure => "MEASURE",
            Command::Adjust => "ADJUST",
            Command::Sleep => "SLEEP",
            Command::Exit => "EXIT",
            Command::Other(name) => name,
        }
    }

    /// The terminal event a command is answered with. SLEEP and EXIT produce
    /// no result event.
    pub fn result_event(&self) -> Option<Event> {
        match self {
            Command::Describe => Some(Event::Description),
            Command::Measure => Some(Event::Measurement),
            Command::Adjust => Some(Event::Adjustment),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Command {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Command::parse(s))
    }
}

/// Events the agent posts to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Hello,
    Goodbye,
    WhatsNext,
    Description,
    Measurement,
    Adjustment,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Hello => "HELLO",
            Event::Goodbye => "GOODBYE",
            Event::WhatsNext => "WHATS_NEXT",
            Event::Description => "DESCRIPTION",
            Event::Measurement => "MEASUREMENT",
            Event::Adjustment => "ADJUSTMENT",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw shape of a `WHATS_NEXT` response. `cmd` may be missing when the
/// service has nothing to say; the loop warns and polls again.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub param: Option<Value>,
}

impl CommandEnvelope {
    /// Parse the command verb, if any.
    pub fn command(&self) -> Option<Command> {
        self.cmd.as_deref().map(Command::parse)
    }
}

/// How the main loop should end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Terminate with exit code 0.
    Exit,
    /// Re-exec the program image with the original arguments.
    Restart,
}

impl StopMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopMode::Exit => "exit",
            StopMode::Restart => "restart",
        }
    }
}

impl fmt::Display for StopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Driver protocol
// ============================================================================

/// Metadata printed by `driver --info <app_id>`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DriverInfo {
    /// Whether the driver handles SIGUSR1 as a cancellation request. When
    /// false, cancellation kills the process outright.
    #[serde(default)]
    pub has_cancel: bool,
    #[serde(default)]
    pub version: Option<String>,
}

/// A non-terminal stdout line: any JSON object carrying a `progress` key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressRecord {
    pub progress: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stageprogress: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg_index: Option<u64>,
}

impl ProgressRecord {
    /// Classify a decoded stdout line. Returns `None` for terminal responses
    /// (no `progress` key). Field extraction is lenient: drivers disagree on
    /// number formats, and a malformed progress value must not abort a run.
    pub fn from_value(value: &Value) -> Option<Self> {
        let progress = value.get("progress")?;
        let progress = progress
            .as_u64()
            .or_else(|| progress.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0);
        Some(Self {
            progress,
            message: string_field(value, "message"),
            stage: string_field(value, "stage"),
            stageprogress: value.get("stageprogress").and_then(Value::as_u64),
            msg_index: value.get("msg_index").and_then(Value::as_u64),
        })
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// The terminal JSON object of a driver invocation.
///
/// The payload is domain data the agent does not interpret (`metrics`,
/// `application`, `state`, ...); only `status`, `message` and `reason` have
/// agent-level meaning. Kept as a raw object so everything else passes
/// through to the service untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverResponse(Map<String, Value>);

impl DriverResponse {
    /// Wrap a decoded stdout line. Non-object values are replaced with an
    /// empty response; the runner rejects them before this point.
    pub fn new(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self(Map::new()),
        }
    }

    /// The response of a driver that exited without printing a terminal line.
    pub fn empty() -> Self {
        Self(Map::new())
    }

    /// `status` rendered as a string. The original measure driver line emits
    /// numeric codes (`"status": 500`) on errors; those become `"500"`.
    pub fn status(&self) -> Option<String> {
        match self.0.get("status") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(other) => Some(other.to_string()),
            None => None,
        }
    }

    /// `status`, defaulting to `nodata` when the driver reported none.
    pub fn status_or_default(&self) -> String {
        self.status().unwrap_or_else(|| "nodata".to_string())
    }

    pub fn is_ok(&self) -> bool {
        self.status().as_deref() == Some("ok")
    }

    pub fn has_status(&self) -> bool {
        self.0.contains_key("status")
    }

    pub fn set_status(&mut self, status: &str) {
        self.0.insert("status".to_string(), json!(status));
    }

    pub fn message(&self) -> Option<String> {
        self.0.get("message").and_then(Value::as_str).map(str::to_string)
    }

    /// Append text to `message`, creating the field if absent.
    pub fn append_message(&mut self, text: &str) {
        let mut message = self
            .0
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        message.push_str(text);
        self.0.insert("message".to_string(), json!(message));
    }

    pub fn reason(&self) -> Option<String> {
        self.0.get("reason").and_then(Value::as_str).map(str::to_string)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_strings_round_trip() {
        for (cmd, wire) in [
            (Command::Describe, "DESCRIBE"),
            (Command::Measure, "MEASURE"),
            (Command::Adjust, "ADJUST"),
            (Command::Sleep, "SLEEP"),
            (Command::Exit, "EXIT"),
        ] {
            assert_eq!(cmd.as_str(), wire);
            assert_eq!(wire.parse::<Command>().unwrap(), cmd);
        }
        assert_eq!(
            "FROBNICATE".parse::<Command>().unwrap(),
            Command::Other("FROBNICATE".to_string())
        );
    }

    #[test]
    fn result_events_match_commands() {
        assert_eq!(Command::Describe.result_event(), Some(Event::Description));
        assert_eq!(Command::Measure.result_event(), Some(Event::Measurement));
        assert_eq!(Command::Adjust.result_event(), Some(Event::Adjustment));
        assert_eq!(Command::Sleep.result_event(), None);
        assert_eq!(Command::Exit.result_event(), None);
    }

    #[test]
    fn envelope_tolerates_missing_cmd() {
        let envelope: CommandEnvelope = serde_json::from_value(json!({})).unwrap();
        assert!(envelope.command().is_none());

        let envelope: CommandEnvelope =
            serde_json::from_value(json!({"cmd": "MEASURE", "param": {"metrics": []}})).unwrap();
        assert_eq!(envelope.command(), Some(Command::Measure));
    }

    #[test]
    fn progress_key_classifies_lines() {
        assert!(ProgressRecord::from_value(&json!({"progress": 50})).is_some());
        assert!(ProgressRecord::from_value(&json!({"status": "ok"})).is_none());

        // Null message, as emitted by the stock driver base classes.
        let record =
            ProgressRecord::from_value(&json!({"progress": 10, "message": null})).unwrap();
        assert_eq!(record.progress, 10);
        assert_eq!(record.message, None);
    }

    #[test]
    fn progress_value_extraction_is_lenient() {
        let record = ProgressRecord::from_value(&json!({"progress": 33.4})).unwrap();
        assert_eq!(record.progress, 33);
        let record = ProgressRecord::from_value(&json!({"progress": "broken"})).unwrap();
        assert_eq!(record.progress, 0);
    }

    #[test]
    fn response_status_accessors() {
        let rsp = DriverResponse::new(json!({"status": "ok", "metrics": {}}));
        assert!(rsp.is_ok());
        assert_eq!(rsp.status_or_default(), "ok");

        let rsp = DriverResponse::new(json!({"status": 500, "reason": "boom"}));
        assert_eq!(rsp.status_or_default(), "500");
        assert_eq!(rsp.reason().as_deref(), Some("boom"));

        let rsp = DriverResponse::empty();
        assert!(!rsp.has_status());
        assert_eq!(rsp.status_or_default(), "nodata");
    }

    #[test]
    fn append_message_creates_and_extends() {
        let mut rsp = DriverResponse::empty();
        rsp.append_message("first");
        rsp.append_message("\nsecond");
        assert_eq!(rsp.message().as_deref(), Some("first\nsecond"));
    }
}
