//! Effects produced by state transitions

use crate::protocol::OutboundMessage;
use std::time::Duration;

/// Severity of a participant-facing notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A message surfaced to the participant (alert or inline banner)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Serialize and transmit a message on the current connection
    Send(OutboundMessage),

    /// Show the model's turn
    DisplayResponse {
        text: String,
        interaction_count: u64,
    },

    /// Surface a notice to the participant
    Notify(Notice),

    /// Reset the feedback entry fields
    ClearFeedbackForm,

    /// Move the image browser to the next image
    AdvanceSelection,

    /// Post `ticket` back to the runtime after `delay`
    ScheduleChainedContext { ticket: u32, delay: Duration },

    /// Build a context request from the live selection and feed it back in
    RequestFreshContext,
}

impl Effect {
    pub fn send(message: OutboundMessage) -> Self {
        Effect::Send(message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::notify(NoticeLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::notify(NoticeLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::notify(NoticeLevel::Error, message)
    }

    fn notify(level: NoticeLevel, message: impl Into<String>) -> Self {
        Effect::Notify(Notice {
            level,
            message: message.into(),
        })
    }

    /// The outbound message kind, if this effect transmits one
    pub fn sent_kind(&self) -> Option<&'static str> {
        match self {
            Effect::Send(message) => Some(message.kind()),
            _ => None,
        }
    }
}
