//! Task channel message types and decoder.
//!
//! The progress endpoint emits named server-sent events (`progress`,
//! `complete`, `error-event`) with JSON data. [`decode_frame`] turns each
//! frame into a [`TaskMessage`] once, at the channel boundary.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::sse::SseFrame;

pub const PROGRESS_EVENT: &str = "progress";
pub const COMPLETE_EVENT: &str = "complete";
pub const ERROR_EVENT: &str = "error-event";

/// Message synthesized when a known event carries an unparseable payload.
pub const MALFORMED_PAYLOAD: &str = "malformed payload";

/// Fallback shown when the backend reports an error without a message.
pub const GENERIC_FAILURE: &str = "Generation failed";

/// All messages a task channel can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskMessage {
    /// Intermediate progress. Never terminal.
    Progress(ProgressData),
    /// The job finished; terminal.
    Complete(TaskResult),
    /// The job (or the channel) failed; terminal.
    Failed(TaskFailure),
}

impl TaskMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskMessage::Progress(_))
    }
}

/// Payload of `progress` events (`{"progress": {...}}`).
///
/// Every field is read leniently: a value of an unexpected type is treated
/// as absent rather than failing the frame, since progress is never terminal.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressData {
    /// Completion percentage (0-100), when the backend knows it.
    #[serde(default, deserialize_with = "lenient_float")]
    pub percentage: Option<f64>,
    /// The graph node currently executing. Numeric ids are kept as text.
    #[serde(default, deserialize_with = "lenient_label")]
    pub node: Option<String>,
    /// Step identifier mapped to a human-readable label.
    #[serde(default, alias = "current_step", deserialize_with = "lenient_label")]
    pub current_step: Option<String>,
    /// Counter within the current step (e.g. sampler step 5 of 20).
    #[serde(default, alias = "current_value", deserialize_with = "lenient_count")]
    pub current_value: Option<u32>,
    #[serde(default, alias = "max_value", deserialize_with = "lenient_count")]
    pub max_value: Option<u32>,
}

fn lenient_label<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn as_number(value: Option<Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

fn lenient_float<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(as_number(Option::<Value>::deserialize(deserializer)?))
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(as_number(Option::<Value>::deserialize(deserializer)?)
        .filter(|v| *v >= 0.0)
        .map(|v| v.round().min(f64::from(u32::MAX)) as u32))
}

impl ProgressData {
    /// Identifier used for label lookup: the step, else the node.
    pub fn step_id(&self) -> Option<&str> {
        self.current_step.as_deref().or(self.node.as_deref())
    }

    /// `(current, max)` when both are present and `max > 0`.
    pub fn counter(&self) -> Option<(u32, u32)> {
        match (self.current_value, self.max_value) {
            (Some(current), Some(max)) if max > 0 => Some((current, max)),
            _ => None,
        }
    }
}

/// Payload of `complete` events (`{"result": {"uid": ...}}`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskResult {
    pub uid: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Why a task ended without a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskFailure {
    /// `error-event` sent by the backend; message passed through verbatim.
    #[error("{}", .0.as_deref().unwrap_or(GENERIC_FAILURE))]
    Server(Option<String>),

    /// A frame could not be decoded.
    #[error("{0}")]
    Protocol(String),

    /// The channel dropped before a terminal message arrived.
    #[error("Connection lost: {0}")]
    Transport(String),
}

impl TaskFailure {
    /// Message carried by the failure, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            TaskFailure::Server(message) => message.as_deref(),
            TaskFailure::Protocol(message) | TaskFailure::Transport(message) => Some(message),
        }
    }
}

#[derive(Deserialize)]
struct ProgressEnvelope {
    #[serde(default)]
    progress: Value,
}

#[derive(Deserialize)]
struct CompleteEnvelope {
    result: TaskResult,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorData,
}

#[derive(Deserialize)]
struct ErrorData {
    #[serde(default)]
    message: Option<String>,
}

/// Decode one frame. Returns `None` for event names the channel does not
/// handle (keep-alives, unknown types); callers log and continue.
pub fn decode_frame(frame: &SseFrame) -> Option<TaskMessage> {
    let message = match frame.event.as_str() {
        PROGRESS_EVENT => serde_json::from_str::<ProgressEnvelope>(&frame.data)
            .map(|env| {
                let data = ProgressData::deserialize(env.progress).unwrap_or_default();
                TaskMessage::Progress(data)
            }),
        COMPLETE_EVENT => serde_json::from_str::<CompleteEnvelope>(&frame.data)
            .map(|env| TaskMessage::Complete(env.result)),
        ERROR_EVENT => serde_json::from_str::<ErrorEnvelope>(&frame.data).map(|env| {
            let message = env.error.message.filter(|m| !m.trim().is_empty());
            TaskMessage::Failed(TaskFailure::Server(message))
        }),
        _ => return None,
    };
    Some(message.unwrap_or_else(|e| {
        tracing::warn!(
            event = %frame.event,
            error = %e,
            raw_message = %frame.data,
            "Failed to parse task channel message",
        );
        TaskMessage::Failed(TaskFailure::Protocol(MALFORMED_PAYLOAD.to_string()))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(event: &str, data: &str) -> Option<TaskMessage> {
        decode_frame(&SseFrame::new(event, data))
    }

    #[test]
    fn parse_progress_message() {
        let json = r#"{"progress":{"percentage":42.5,"node":"7","currentStep":"sampling","currentValue":5,"maxValue":20}}"#;
        match decode("progress", json).unwrap() {
            TaskMessage::Progress(data) => {
                assert_eq!(data.percentage, Some(42.5));
                assert_eq!(data.step_id(), Some("sampling"));
                assert_eq!(data.counter(), Some((5, 20)));
            }
            other => panic!("Expected Progress, got {other:?}"),
        }
    }

    #[test]
    fn parse_progress_without_optional_fields() {
        match decode("progress", r#"{"progress":{"node":"3"}}"#).unwrap() {
            TaskMessage::Progress(data) => {
                assert_eq!(data.percentage, None);
                assert_eq!(data.step_id(), Some("3"));
                assert_eq!(data.counter(), None);
            }
            other => panic!("Expected Progress, got {other:?}"),
        }
    }

    #[test]
    fn progress_accepts_numeric_node_and_fractional_counters() {
        let json = r#"{"progress":{"percentage":50,"node":7,"currentValue":5.0,"maxValue":"20"}}"#;
        match decode("progress", json).unwrap() {
            TaskMessage::Progress(data) => {
                assert_eq!(data.percentage, Some(50.0));
                assert_eq!(data.step_id(), Some("7"));
                assert_eq!(data.counter(), Some((5, 20)));
            }
            other => panic!("Expected Progress, got {other:?}"),
        }
    }

    #[test]
    fn progress_with_odd_field_types_is_not_terminal() {
        let json = r#"{"progress":{"percentage":"n/a","node":{"id":1},"currentValue":-3}}"#;
        let msg = decode("progress", json).unwrap();
        assert!(!msg.is_terminal());
        let TaskMessage::Progress(data) = msg else {
            panic!("Expected Progress");
        };
        assert_eq!(data, ProgressData::default());

        let msg = decode("progress", r#"{"progress":null}"#).unwrap();
        assert_eq!(msg, TaskMessage::Progress(ProgressData::default()));
    }

    #[test]
    fn zero_max_has_no_counter() {
        let data = ProgressData {
            current_value: Some(0),
            max_value: Some(0),
            ..Default::default()
        };
        assert_eq!(data.counter(), None);
    }

    #[test]
    fn parse_complete_message() {
        let json = r#"{"result":{"uid":"abc","url":"https://cdn/abc.png"}}"#;
        match decode("complete", json).unwrap() {
            TaskMessage::Complete(result) => {
                assert_eq!(result.uid, "abc");
                assert_eq!(result.extra["url"], "https://cdn/abc.png");
            }
            other => panic!("Expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn parse_error_event_message() {
        let msg = decode("error-event", r#"{"error":{"message":"out of memory"}}"#).unwrap();
        assert_eq!(
            msg,
            TaskMessage::Failed(TaskFailure::Server(Some("out of memory".into())))
        );
        assert!(msg.is_terminal());
    }

    #[test]
    fn error_event_without_message_uses_fallback_text() {
        let msg = decode("error-event", r#"{"error":{}}"#).unwrap();
        let TaskMessage::Failed(failure) = msg else {
            panic!("Expected Failed");
        };
        assert_eq!(failure.message(), None);
        assert_eq!(failure.to_string(), GENERIC_FAILURE);
    }

    #[test]
    fn invalid_json_becomes_protocol_failure() {
        let msg = decode("progress", "not json at all").unwrap();
        assert_eq!(
            msg,
            TaskMessage::Failed(TaskFailure::Protocol(MALFORMED_PAYLOAD.into()))
        );
    }

    #[test]
    fn complete_without_uid_is_malformed() {
        let msg = decode("complete", r#"{"result":{}}"#).unwrap();
        assert_eq!(
            msg,
            TaskMessage::Failed(TaskFailure::Protocol(MALFORMED_PAYLOAD.into()))
        );
    }

    #[test]
    fn unknown_event_is_skipped() {
        assert!(decode("heartbeat", "{}").is_none());
        assert!(decode("message", "whatever").is_none());
    }
}
