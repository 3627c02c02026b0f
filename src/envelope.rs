//! Envelope types shared by the Protocol Engine and the Emulator Dispatch.
//!
//! The outer shape is always `{message, data}`. Outbound command envelopes
//! always carry `message: "MSG"`; inbound responses use one of `ACK`, the
//! progress kinds (`EVT`, `DSP`, `PIN`, `CNF`, `READY`), or a terminal kind
//! (`MSG`, `RSP`, `ERR`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound command envelope built by the Gateway and sent by the Protocol
/// Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Always `"MSG"` for an outbound command.
    pub message: String,
    /// Command payload.
    pub data: EnvelopeData,
}

/// Inner `data` object of an outbound [`Envelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeData {
    /// Command name (e.g. `"Sale"`, `"Ping"`).
    pub command: String,
    /// Caller-supplied opaque ECR identity, echoed back by the terminal.
    #[serde(rename = "EcrId")]
    pub ecr_id: String,
    /// Zero-padded six-digit decimal request identifier, unique per session.
    #[serde(rename = "requestId")]
    pub request_id: String,
    /// Command-specific payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    /// Build a new command envelope.
    #[must_use]
    pub fn new(command: impl Into<String>, ecr_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            message: "MSG".to_owned(),
            data: EnvelopeData {
                command: command.into(),
                ecr_id: ecr_id.into(),
                request_id: request_id.into(),
                data: None,
            },
        }
    }

    /// Attach a command-specific payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data.data = Some(data);
        self
    }

    /// Serialize to a [`Value`] ready for [`crate::framer::FrameCodec`].
    ///
    /// # Errors
    /// Returns an error if the envelope cannot be represented as JSON, which
    /// cannot happen for well-formed `serde_json::Value` payloads but is
    /// still surfaced rather than assumed away.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> { serde_json::to_value(self) }
}

/// Classification of an inbound response message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Bare acknowledgement; never terminates a session.
    Ack,
    /// Progress event (`EVT`, `DSP`, `PIN`, `CNF`, `READY`); never terminates
    /// a session.
    Progress,
    /// Terminal response (`MSG`, `RSP`, `ERR`); ends the session.
    Final,
    /// Any other `message` value.
    Unhandled,
}

impl MessageKind {
    /// Classify a raw `message` field value.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        match message {
            "ACK" => Self::Ack,
            "EVT" | "DSP" | "PIN" | "CNF" | "READY" => Self::Progress,
            "MSG" | "RSP" | "ERR" => Self::Final,
            _ => Self::Unhandled,
        }
    }

    /// Whether this kind ends a Protocol Engine session.
    #[must_use]
    pub const fn is_terminal(self) -> bool { matches!(self, Self::Final) }
}

/// The outcome of the terminal processing a command: success or failure,
/// plus the optional error details carried in a failed `cmdResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// `"Success"` or `"Failed"`.
    pub result: String,
    /// Machine-readable error code, present only on failure.
    #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Human-readable error message, present only on failure.
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CommandResult {
    /// Build a successful result.
    #[must_use]
    pub fn success() -> Self {
        Self {
            result: "Success".to_owned(),
            error_code: None,
            error_message: None,
        }
    }

    /// Build a failed result carrying an error code and message.
    #[must_use]
    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            result: "Failed".to_owned(),
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }

    /// Whether this result represents success.
    #[must_use]
    pub fn is_success(&self) -> bool { self.result == "Success" }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("ACK", MessageKind::Ack)]
    #[case("EVT", MessageKind::Progress)]
    #[case("DSP", MessageKind::Progress)]
    #[case("PIN", MessageKind::Progress)]
    #[case("CNF", MessageKind::Progress)]
    #[case("READY", MessageKind::Progress)]
    #[case("MSG", MessageKind::Final)]
    #[case("RSP", MessageKind::Final)]
    #[case("ERR", MessageKind::Final)]
    #[case("WAT", MessageKind::Unhandled)]
    fn classifies_message_kinds(#[case] message: &str, #[case] expected: MessageKind) {
        assert_eq!(MessageKind::classify(message), expected);
    }

    #[test]
    fn only_final_is_terminal() {
        assert!(MessageKind::Final.is_terminal());
        assert!(!MessageKind::Ack.is_terminal());
        assert!(!MessageKind::Progress.is_terminal());
        assert!(!MessageKind::Unhandled.is_terminal());
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let env = Envelope::new("Ping", "ECR1", "000042");
        let value = env.to_value().expect("serialize");
        assert_eq!(value["message"], "MSG");
        assert_eq!(value["data"]["command"], "Ping");
        assert_eq!(value["data"]["EcrId"], "ECR1");
        assert_eq!(value["data"]["requestId"], "000042");
        assert!(value["data"].get("data").is_none());
    }
}
