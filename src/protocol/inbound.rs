//! Decoding of frames received from the bridge

use super::ProtocolError;
use serde_json::Value;

/// Messages received from the bridge, discriminated by lower-cased `type`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    HelloConfirm,
    ResumeConfirm {
        interaction_count: Option<u64>,
    },
    MethodConfirm {
        interaction_count: Option<u64>,
    },
    Response {
        text: String,
        interaction_count: Option<u64>,
    },
    Error {
        message: String,
    },
    /// A well-formed frame with a type this client does not handle
    Unknown {
        kind: String,
    },
}

/// Decode one text frame.
///
/// Only JSON syntax errors and non-object frames fail; missing or mistyped
/// optional fields are treated as absent.
pub fn decode(text: &str) -> Result<InboundMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(fields) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    let kind = fields
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();
    let interaction_count = fields.get("interaction_count").and_then(Value::as_u64);

    let message = match kind.as_str() {
        "hello_confirm" => InboundMessage::HelloConfirm,
        "resume_confirm" => InboundMessage::ResumeConfirm { interaction_count },
        "method_confirm" => InboundMessage::MethodConfirm { interaction_count },
        "response" => InboundMessage::Response {
            text: response_text(fields.get("response")),
            interaction_count,
        },
        "error" => InboundMessage::Error {
            message: ["message", "detail", "code"]
                .iter()
                .find_map(|key| fields.get(*key).and_then(non_empty_text))
                .unwrap_or_else(|| "Unknown error".to_string()),
        },
        _ => InboundMessage::Unknown { kind },
    };
    Ok(message)
}

/// Model output is usually a string; structured output is pretty-printed.
fn response_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn non_empty_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}
