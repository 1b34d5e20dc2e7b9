//! Session state types

use crate::protocol::Method;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Logical phase of the Phase II conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionPhase {
    /// No handshake on the current connection
    #[default]
    Idle,

    /// `hello` and `method` sent, waiting for the method confirmation
    HelloSent {
        /// `hello_confirm` received
        confirmed: bool,
    },

    /// Method confirmed; a context request may be sent
    MethodReady {
        /// Ticket of an armed deferred context send (auto-chaining after feedback)
        chain: Option<u32>,
    },

    /// Context sent, model turn outstanding
    AwaitingResponse,

    /// Model turn displayed, waiting for the participant's feedback
    AwaitingFeedback { response: String },
}

impl SessionPhase {
    /// Stable name for UI display and logs
    pub fn name(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::HelloSent { .. } => "hello_sent",
            SessionPhase::MethodReady { .. } => "method_ready",
            SessionPhase::AwaitingResponse => "awaiting_response",
            SessionPhase::AwaitingFeedback { .. } => "awaiting_feedback",
        }
    }

    /// Whether the method handshake has completed on this connection
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            SessionPhase::MethodReady { .. }
                | SessionPhase::AwaitingResponse
                | SessionPhase::AwaitingFeedback { .. }
        )
    }
}

/// Full session state, owned by the runtime and replaced on each transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    /// Last interaction count reported by the bridge; never decreases
    pub interaction_count: u64,
    /// A reply-expecting send is outstanding or a chained send is armed
    pub pending_load: bool,
    /// Last issued chain ticket; survives connection drops so old timers stay stale
    pub chain_seq: u32,
}

impl SessionState {
    pub fn with_phase(&self, phase: SessionPhase) -> Self {
        Self {
            phase,
            ..self.clone()
        }
    }

    pub fn with_pending(mut self, pending_load: bool) -> Self {
        self.pending_load = pending_load;
        self
    }

    pub fn with_reported_count(mut self, reported: Option<u64>) -> Self {
        if let Some(count) = reported {
            self.interaction_count = self.interaction_count.max(count);
        }
        self
    }
}

/// Default delay between auto-advancing to the next image and requesting its context
pub const DEFAULT_CHAIN_DELAY: Duration = Duration::from_millis(500);

/// Context for a session (configuration the transition function reads)
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Participant identity; required before a handshake
    pub participant: Option<String>,
    pub method: Method,
    pub chain_delay: Duration,
    /// Request a model turn as soon as the method is confirmed
    pub auto_first_context: bool,
}

impl SessionContext {
    pub fn new(method: Method) -> Self {
        Self {
            participant: None,
            method,
            chain_delay: DEFAULT_CHAIN_DELAY,
            auto_first_context: true,
        }
    }

    pub fn with_participant(mut self, participant: impl Into<String>) -> Self {
        self.participant = Some(participant.into());
        self
    }

    pub fn participant(&self) -> Option<&str> {
        self.participant
            .as_deref()
            .filter(|id| !id.trim().is_empty())
    }
}
