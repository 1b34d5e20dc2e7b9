//! Events that can occur in a session

use crate::protocol::{ContextPayload, FeedbackPayload, InboundMessage};

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // User events
    StartSession {
        resume: bool,
    },
    /// Ask for a model turn. `scenario` is read from the live selection when
    /// the event is built; `None` means nothing is selected.
    RequestContext {
        scenario: Option<ContextPayload>,
    },
    SubmitFeedback {
        payload: FeedbackPayload,
        /// Whether the catalog can advance to another image
        has_next: bool,
    },

    // Timer events
    /// A deferred context send fired. `scenario` is read when the ticket is
    /// processed, not when it was scheduled.
    ChainedContextDue {
        ticket: u32,
        scenario: Option<ContextPayload>,
    },

    // Connection events
    /// A link opened. `resume` carries a start request that arrived while
    /// the link was still connecting.
    ConnectionOpened {
        resume: bool,
    },
    ConnectionDropped,

    // Bridge events
    HelloConfirmed,
    MethodConfirmed {
        interaction_count: Option<u64>,
    },
    ResumeConfirmed {
        interaction_count: Option<u64>,
    },
    ResponseReceived {
        text: String,
        interaction_count: Option<u64>,
    },
    RemoteError {
        message: String,
    },
    MalformedFrame,
}

impl Event {
    /// Map a decoded frame to an event. Unknown frame types produce nothing.
    pub fn from_inbound(message: InboundMessage) -> Option<Self> {
        match message {
            InboundMessage::HelloConfirm => Some(Event::HelloConfirmed),
            InboundMessage::ResumeConfirm { interaction_count } => {
                Some(Event::ResumeConfirmed { interaction_count })
            }
            InboundMessage::MethodConfirm { interaction_count } => {
                Some(Event::MethodConfirmed { interaction_count })
            }
            InboundMessage::Response {
                text,
                interaction_count,
            } => Some(Event::ResponseReceived {
                text,
                interaction_count,
            }),
            InboundMessage::Error { message } => Some(Event::RemoteError { message }),
            InboundMessage::Unknown { .. } => None,
        }
    }

    /// Events caused directly by a participant action; rejections of these
    /// are shown to the participant.
    pub fn is_user_action(&self) -> bool {
        matches!(
            self,
            Event::StartSession { .. } | Event::RequestContext { .. } | Event::SubmitFeedback { .. }
        )
    }
}
