//! Wire protocol spoken with the assistant bridge service
//!
//! Every frame is a JSON text message discriminated by a `type` tag. Outbound
//! frames are typed enums serialized with serde; inbound frames are decoded
//! leniently because the bridge is not strict about casing or optional fields.

mod feedback;
mod inbound;

pub use feedback::{
    FeedbackChoice, FeedbackForm, FeedbackPayload, SatisfactionSurvey, DEFAULT_CATEGORIES,
};
pub use inbound::{decode, InboundMessage};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Timeframe sent with every context request; the study has no per-image time.
pub const DEFAULT_TIMEFRAME: &str = "N/A";

/// Errors building or decoding protocol messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("unknown assistant method: {0}")]
    UnknownMethod(String),
    #[error("satisfaction score Q{question} must be between 1 and 7, got {score}")]
    ScoreOutOfRange { question: usize, score: u8 },
    #[error("Please enter interaction content first.")]
    EmptyResponse,
}

/// Assistant strategy selected for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Vanilla,
    #[default]
    ActivationSteering,
    Combined,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Vanilla => "vanilla",
            Method::ActivationSteering => "activation_steering",
            Method::Combined => "combined",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vanilla" => Ok(Method::Vanilla),
            "activation_steering" => Ok(Method::ActivationSteering),
            "combined" => Ok(Method::Combined),
            other => Err(ProtocolError::UnknownMethod(other.to_string())),
        }
    }
}

/// Scenario grounding for a new model turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPayload {
    pub scenario_text: String,
    pub timeframe: String,
}

impl ContextPayload {
    pub fn new(scenario_text: impl Into<String>) -> Self {
        Self {
            scenario_text: scenario_text.into(),
            timeframe: DEFAULT_TIMEFRAME.to_string(),
        }
    }
}

/// Messages sent from the study client to the bridge
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Initializes or resumes a session. Must precede everything else.
    Hello {
        user_id: String,
        #[serde(skip_serializing_if = "is_false")]
        resume: bool,
    },
    /// Selects the assistant strategy.
    Method { method: Method },
    /// Requests a new model turn for a scenario.
    Context { payload: ContextPayload },
    /// The participant's reaction to the previous model turn.
    Feedback { payload: FeedbackPayload },
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if passes by reference
fn is_false(value: &bool) -> bool {
    !*value
}

impl OutboundMessage {
    pub fn hello(user_id: impl Into<String>, resume: bool) -> Self {
        OutboundMessage::Hello {
            user_id: user_id.into(),
            resume,
        }
    }

    /// The wire `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Hello { .. } => "hello",
            OutboundMessage::Method { .. } => "method",
            OutboundMessage::Context { .. } => "context",
            OutboundMessage::Feedback { .. } => "feedback",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
