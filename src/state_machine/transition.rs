//! Pure state transition function
//!
//! Enforces the protocol order hello → method → (context → response → feedback)*
//! and single-flight sends. Given the same inputs it always produces the same
//! outputs; all I/O is expressed as [`Effect`]s.

use super::state::SessionPhase;
use super::{Effect, Event, SessionContext, SessionState};
use crate::protocol::{ContextPayload, OutboundMessage};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    #[must_use]
    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Rejected transitions. The messages are shown to participants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Please enter User ID before starting the model session.")]
    MissingParticipant,
    #[error("No image selected.")]
    NoSelection,
    #[error("Still waiting for the model. Please wait for the current reply.")]
    Busy,
    #[error("The model session has already started.")]
    AlreadyStarted,
    #[error("Model session is starting. Please try again in a moment.")]
    NotReady,
    #[error("Send feedback on the current response before requesting a new one.")]
    FeedbackPending,
    #[error("The model has not responded yet.")]
    AwaitingResponse,
    #[error("There is no model response to give feedback on.")]
    NoResponseYet,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
#[allow(clippy::too_many_lines)] // One arm per row of the transition table
pub fn transition(
    state: &SessionState,
    ctx: &SessionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (&state.phase, event) {
        // ============================================================
        // Connection lifecycle
        // ============================================================

        // Any drop invalidates the logical session
        (phase, Event::ConnectionDropped) => {
            let result =
                TransitionResult::new(state.with_phase(SessionPhase::Idle).with_pending(false));
            if *phase == SessionPhase::Idle {
                Ok(result)
            } else {
                Ok(result.with_effect(Effect::warn(
                    "Model connection lost. Start the session again to continue.",
                )))
            }
        }

        // Idle + ConnectionOpened -> HelloSent when the participant is known
        (SessionPhase::Idle, Event::ConnectionOpened { resume }) => match ctx.participant() {
            Some(participant) => Ok(begin_handshake(state, ctx, participant, resume)),
            None => Ok(TransitionResult::new(state.clone())),
        },

        (_, Event::ConnectionOpened { .. }) => Ok(TransitionResult::new(state.clone())),

        // ============================================================
        // Session start
        // ============================================================
        (SessionPhase::Idle, Event::StartSession { resume }) => {
            let participant = ctx
                .participant()
                .ok_or(TransitionError::MissingParticipant)?;
            Ok(begin_handshake(state, ctx, participant, resume))
        }

        (_, Event::StartSession { .. }) => Err(TransitionError::AlreadyStarted),

        (SessionPhase::HelloSent { .. }, Event::HelloConfirmed) => Ok(TransitionResult::new(
            state.with_phase(SessionPhase::HelloSent { confirmed: true }),
        )),

        // The bridge may repeat the greeting; nothing to do once past it
        (_, Event::HelloConfirmed) => Ok(TransitionResult::new(state.clone())),

        // Idle/HelloSent + method or resume confirmation -> MethodReady
        (
            SessionPhase::Idle | SessionPhase::HelloSent { .. },
            Event::MethodConfirmed { interaction_count }
            | Event::ResumeConfirmed { interaction_count },
        ) => {
            let result = TransitionResult::new(
                state
                    .with_phase(SessionPhase::MethodReady { chain: None })
                    .with_pending(false)
                    .with_reported_count(interaction_count),
            );
            if ctx.auto_first_context {
                Ok(result.with_effect(Effect::RequestFreshContext))
            } else {
                Ok(result)
            }
        }

        // ============================================================
        // Context requests
        // ============================================================
        (_, Event::RequestContext { scenario: None }) => Err(TransitionError::NoSelection),

        (_, Event::RequestContext { .. }) if state.pending_load => Err(TransitionError::Busy),

        // Idle + RequestContext -> start the handshake instead
        (SessionPhase::Idle, Event::RequestContext { .. }) => {
            let participant = ctx
                .participant()
                .ok_or(TransitionError::MissingParticipant)?;
            let notice = if ctx.auto_first_context {
                "Starting model session..."
            } else {
                "Starting model session... please request a new response again in a moment."
            };
            Ok(begin_handshake(state, ctx, participant, false).with_effect(Effect::info(notice)))
        }

        (SessionPhase::HelloSent { .. }, Event::RequestContext { .. }) => {
            Err(TransitionError::NotReady)
        }

        // MethodReady + RequestContext -> AwaitingResponse
        // AwaitingResponse + RequestContext (reply lost to a remote error) -> resend
        (
            SessionPhase::MethodReady { .. } | SessionPhase::AwaitingResponse,
            Event::RequestContext {
                scenario: Some(payload),
            },
        ) => Ok(send_context(state, payload)),

        (SessionPhase::AwaitingFeedback { .. }, Event::RequestContext { .. }) => {
            Err(TransitionError::FeedbackPending)
        }

        // ============================================================
        // Deferred context after auto-advance
        // ============================================================
        (SessionPhase::MethodReady { chain: Some(armed) }, Event::ChainedContextDue { ticket, scenario })
            if *armed == ticket =>
        {
            match scenario {
                Some(payload) => Ok(send_context(state, payload)),
                None => Ok(TransitionResult::new(
                    state
                        .with_phase(SessionPhase::MethodReady { chain: None })
                        .with_pending(false),
                )
                .with_effect(Effect::warn("No image selected."))),
            }
        }

        // Stale ticket: the session moved on or the connection dropped
        (_, Event::ChainedContextDue { .. }) => Ok(TransitionResult::new(state.clone())),

        // ============================================================
        // Model responses
        // ============================================================
        (
            SessionPhase::AwaitingResponse,
            Event::ResponseReceived {
                text,
                interaction_count,
            },
        ) => {
            let next = state
                .with_phase(SessionPhase::AwaitingFeedback {
                    response: text.clone(),
                })
                .with_pending(false)
                .with_reported_count(interaction_count);
            let interaction_count = next.interaction_count;
            Ok(TransitionResult::new(next).with_effect(Effect::DisplayResponse {
                text,
                interaction_count,
            }))
        }

        // ============================================================
        // Feedback
        // ============================================================
        (_, Event::SubmitFeedback { .. }) if state.pending_load => Err(TransitionError::Busy),

        // AwaitingFeedback + SubmitFeedback -> MethodReady (chained when an image follows)
        (SessionPhase::AwaitingFeedback { .. }, Event::SubmitFeedback { payload, has_next }) => {
            let sent = [
                Effect::send(OutboundMessage::Feedback { payload }),
                Effect::ClearFeedbackForm,
            ];
            if has_next {
                let ticket = state.chain_seq.wrapping_add(1);
                let mut next = state
                    .with_phase(SessionPhase::MethodReady {
                        chain: Some(ticket),
                    })
                    .with_pending(true);
                next.chain_seq = ticket;
                Ok(TransitionResult::new(next)
                    .with_effects(sent)
                    .with_effect(Effect::AdvanceSelection)
                    .with_effect(Effect::ScheduleChainedContext {
                        ticket,
                        delay: ctx.chain_delay,
                    }))
            } else {
                Ok(TransitionResult::new(
                    state
                        .with_phase(SessionPhase::MethodReady { chain: None })
                        .with_pending(false),
                )
                .with_effects(sent)
                .with_effect(Effect::info("Feedback sent. This was the last image.")))
            }
        }

        (SessionPhase::AwaitingResponse, Event::SubmitFeedback { .. }) => {
            Err(TransitionError::AwaitingResponse)
        }

        (_, Event::SubmitFeedback { .. }) => Err(TransitionError::NoResponseYet),

        // ============================================================
        // Failures reported by the bridge or the decoder
        // ============================================================
        (_, Event::RemoteError { message }) => Ok(TransitionResult::new(
            state.clone().with_pending(false),
        )
        .with_effect(Effect::error(format!("Model error: {message}")))),

        (_, Event::MalformedFrame) => Ok(TransitionResult::new(state.clone().with_pending(false))),

        // ============================================================
        // Invalid Transitions
        // ============================================================
        (phase, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {} with event {:?}",
            phase.name(),
            event
        ))),
    }
}

// Helper functions

fn begin_handshake(
    state: &SessionState,
    ctx: &SessionContext,
    participant: &str,
    resume: bool,
) -> TransitionResult {
    TransitionResult::new(
        state
            .with_phase(SessionPhase::HelloSent { confirmed: false })
            .with_pending(false),
    )
    .with_effect(Effect::send(OutboundMessage::hello(participant, resume)))
    .with_effect(Effect::send(OutboundMessage::Method { method: ctx.method }))
}

fn send_context(state: &SessionState, payload: ContextPayload) -> TransitionResult {
    TransitionResult::new(
        state
            .with_phase(SessionPhase::AwaitingResponse)
            .with_pending(true),
    )
    .with_effect(Effect::send(OutboundMessage::Context { payload }))
}
