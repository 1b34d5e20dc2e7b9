//! Application runtime for a participant session
//!
//! One task owns the connection, the session state, the image catalog and
//! the transcript. Front ends talk to it through [`RuntimeHandle`]: commands
//! in over an mpsc channel, [`UiEvent`]s out over a broadcast channel.

mod executor;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;

use crate::config::BridgeConfig;
use crate::connection::{ConnState, Connector};
use crate::protocol::FeedbackForm;
use crate::selection::{ImageCatalog, Selection};
use crate::state_machine::Notice;
use crate::transcript::Variant;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Requests from the front end
#[derive(Debug, Clone)]
pub enum Command {
    SetParticipant(String),
    /// Open the bridge connection if it is not open
    Connect,
    StartSession {
        resume: bool,
    },
    /// Ask for a model turn on the current image
    RequestContext,
    /// Send feedback, move to the next image and request a turn for it
    Continue(FeedbackForm),
    /// Record the Phase I A/B preference for the current image
    ConfirmChoice {
        variant: Variant,
    },
    Select {
        key: String,
    },
    NextImage,
    /// Write the transcript; `None` uses the configured result directory
    Export {
        dir: Option<PathBuf>,
    },
    Status,
    Shutdown,
}

/// What the front end should show
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub participant: Option<String>,
    pub connection: ConnState,
    pub phase: &'static str,
    pub interaction_count: u64,
    pub loading: bool,
    pub selection: Option<Selection>,
    pub recorded_turns: usize,
}

/// Events for the front end
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Snapshot(SessionSnapshot),
    Response {
        text: String,
        interaction_count: u64,
    },
    Notice(Notice),
    FeedbackCleared,
    SelectionChanged(Option<Selection>),
    /// A message of this kind went out on the wire
    Outbound {
        kind: &'static str,
    },
    Exported {
        path: PathBuf,
    },
}

#[derive(Debug, Error)]
#[error("session runtime has stopped")]
pub struct RuntimeStopped;

/// Handle to a running [`SessionRuntime`]
pub struct RuntimeHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<UiEvent>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl RuntimeHandle {
    pub async fn send(&self, command: Command) -> Result<(), RuntimeStopped> {
        self.commands.send(command).await.map_err(|_| RuntimeStopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    /// Stop the runtime and wait for it to finish
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Session runtime task failed");
        }
    }
}

/// Spawn a runtime on the current tokio runtime
pub fn start<C: Connector + 'static>(
    config: BridgeConfig,
    catalog: ImageCatalog,
    connector: C,
) -> RuntimeHandle {
    let (commands_tx, commands_rx) = mpsc::channel(32);
    let (events_tx, _) = broadcast::channel(256);
    let shutdown = CancellationToken::new();

    let runtime = SessionRuntime::new(
        config,
        catalog,
        connector,
        commands_rx,
        events_tx.clone(),
        shutdown.clone(),
    );
    let task = tokio::spawn(runtime.run());

    RuntimeHandle {
        commands: commands_tx,
        events: events_tx,
        shutdown,
        task,
    }
}
