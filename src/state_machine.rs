//! Phase II session state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::{Effect, Notice, NoticeLevel};
pub use event::Event;
pub use state::{SessionContext, SessionPhase, SessionState};
pub use transition::{transition, TransitionError, TransitionResult};
