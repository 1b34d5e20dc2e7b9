//! Session runtime executor

use super::{Command, SessionSnapshot, UiEvent};

use crate::config::BridgeConfig;
use crate::connection::{
    ConnState, ConnectionError, ConnectionManager, Connector, LinkEvent, LinkOutcome,
};
use crate::protocol::{decode, ContextPayload, FeedbackForm, FeedbackPayload, OutboundMessage};
use crate::selection::{ImageCatalog, Selection, SelectionProvider};
use crate::state_machine::{
    transition, Effect, Event, Notice, NoticeLevel, SessionContext, SessionState,
};
use crate::transcript::{InteractionTurn, PhaseOneChoice, Transcript, Variant};
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

const CONNECTING_NOTICE: &str = "Connecting to model... please try again in a moment.";
const START_PENDING_NOTICE: &str = "Connecting to model... the session will start once connected.";

/// Owns all mutable session state and executes effects
pub struct SessionRuntime<C: Connector + 'static> {
    config: BridgeConfig,
    context: SessionContext,
    state: SessionState,
    connection: ConnectionManager<C>,
    catalog: ImageCatalog,
    provider: SelectionProvider,
    transcript: Transcript,
    commands: mpsc::Receiver<Command>,
    link_rx: mpsc::Receiver<LinkEvent>,
    ticket_tx: mpsc::Sender<u32>,
    ticket_rx: mpsc::Receiver<u32>,
    events: broadcast::Sender<UiEvent>,
    shutdown: CancellationToken,
    /// Selection read for the context event being processed
    requested: Option<Selection>,
    /// Selection the outstanding or answered context was about
    turn_selection: Option<Selection>,
    last_response: Option<String>,
    /// Start requested while the link was still connecting
    pending_resume: bool,
    last_published: Option<(SessionState, ConnState)>,
}

impl<C: Connector + 'static> SessionRuntime<C> {
    pub fn new(
        config: BridgeConfig,
        catalog: ImageCatalog,
        connector: C,
        commands: mpsc::Receiver<Command>,
        events: broadcast::Sender<UiEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        let (link_tx, link_rx) = mpsc::channel(64);
        let (ticket_tx, ticket_rx) = mpsc::channel(8);
        let connection = ConnectionManager::new(config.bridge_url.clone(), connector, link_tx);
        let provider = catalog.provider();

        Self {
            context: config.session_context(),
            config,
            state: SessionState::default(),
            connection,
            catalog,
            provider,
            transcript: Transcript::new(),
            commands,
            link_rx,
            ticket_tx,
            ticket_rx,
            events,
            shutdown,
            requested: None,
            turn_selection: None,
            last_response: None,
            pending_resume: false,
            last_published: None,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(url = %self.connection.url(), method = %self.context.method, "Starting session runtime");
        self.publish_snapshot();

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.link_rx.recv() => self.handle_link_event(event),
                Some(ticket) = self.ticket_rx.recv() => {
                    let event = Event::ChainedContextDue {
                        ticket,
                        scenario: self.read_selection(),
                    };
                    self.process_event(event);
                }
            }
            self.publish_snapshot_if_changed();
        }

        self.connection.disconnect();
        tracing::info!("Session runtime stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        tracing::debug!(?command, "Handling command");
        match command {
            Command::SetParticipant(id) => {
                let id = id.trim();
                self.context.participant = (!id.is_empty()).then(|| id.to_string());
                self.publish_snapshot();
            }
            Command::Connect => {
                if !self.connection.ensure_connected() {
                    self.notify(NoticeLevel::Info, "Connecting to model...");
                }
            }
            Command::StartSession { resume } => {
                if self.connection.ensure_connected() {
                    self.process_event(Event::StartSession { resume });
                } else {
                    self.pending_resume = resume;
                    self.notify(NoticeLevel::Info, START_PENDING_NOTICE);
                }
            }
            Command::RequestContext => {
                if self.require_connection() {
                    let scenario = self.read_selection();
                    self.process_event(Event::RequestContext { scenario });
                }
            }
            Command::Continue(form) => self.handle_continue(&form),
            Command::ConfirmChoice { variant } => self.confirm_choice(variant),
            Command::Select { key } => match self.catalog.select(&key) {
                Ok(selection) => self.emit(UiEvent::SelectionChanged(Some(selection))),
                Err(e) => self.notify(NoticeLevel::Warning, e.to_string()),
            },
            Command::NextImage => match self.catalog.advance() {
                Some(selection) => self.emit(UiEvent::SelectionChanged(Some(selection))),
                None => self.notify(NoticeLevel::Info, "This is the last image."),
            },
            Command::Export { dir } => self.export(dir).await,
            Command::Status => self.publish_snapshot(),
            Command::Shutdown => {}
        }
    }

    fn handle_continue(&mut self, form: &FeedbackForm) {
        if !self.require_connection() {
            return;
        }
        let payload = match FeedbackPayload::from_form(form) {
            Ok(payload) => payload,
            Err(e) => {
                self.notify(NoticeLevel::Warning, e.to_string());
                return;
            }
        };
        let has_next = self.catalog.has_next();
        self.process_event(Event::SubmitFeedback { payload, has_next });
    }

    fn confirm_choice(&mut self, choice: Variant) {
        let Some(selection) = self.provider.current() else {
            self.notify(NoticeLevel::Warning, "No image selected.");
            return;
        };
        if self.context.participant().is_none() {
            self.notify(NoticeLevel::Warning, "Please enter User ID first.");
            return;
        }
        self.transcript.record_choice(PhaseOneChoice {
            persona: selection.persona_id,
            activity: selection.activity_id,
            image_name: selection.image_name,
            choice,
        });
        self.notify(NoticeLevel::Info, "Selection recorded for this image in Phase I.");
    }

    async fn export(&mut self, dir: Option<PathBuf>) {
        let dir = dir.unwrap_or_else(|| self.config.result_dir.clone());
        let participant = self.context.participant().unwrap_or_default().to_string();
        match self.transcript.export(&participant, &dir).await {
            Ok(path) => self.emit(UiEvent::Exported { path }),
            Err(e) => {
                tracing::warn!(error = %e, dir = %dir.display(), "Export failed");
                self.notify(NoticeLevel::Error, e.to_string());
            }
        }
    }

    /// Session actions need a live link. Starts one if needed; nothing is
    /// queued for later.
    fn require_connection(&mut self) -> bool {
        if self.connection.ensure_connected() {
            return true;
        }
        self.notify(NoticeLevel::Info, CONNECTING_NOTICE);
        false
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match self.connection.handle(event) {
            LinkOutcome::Stale => {}
            LinkOutcome::Opened => {
                let resume = std::mem::take(&mut self.pending_resume);
                self.process_event(Event::ConnectionOpened { resume });
            }
            LinkOutcome::Frame(text) => self.handle_frame(&text),
            LinkOutcome::Dropped(error) => {
                self.pending_resume = false;
                if let Some(ConnectionError::Connect { .. }) = &error {
                    self.notify(
                        NoticeLevel::Error,
                        "Could not connect to the model service. Please try again.",
                    );
                }
                self.process_event(Event::ConnectionDropped);
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        match decode(text) {
            Ok(message) => match Event::from_inbound(message) {
                Some(event) => self.process_event(event),
                None => tracing::debug!(frame = %text, "Ignoring unknown message type"),
            },
            Err(e) => {
                tracing::warn!(error = %e, frame = %text, "Failed to decode bridge message");
                self.process_event(Event::MalformedFrame);
            }
        }
    }

    fn process_event(&mut self, event: Event) {
        let mut events_to_process = vec![event];

        while let Some(current_event) = events_to_process.pop() {
            let user_action = current_event.is_user_action();
            let result = match transition(&self.state, &self.context, current_event) {
                Ok(r) => r,
                Err(e) => {
                    if user_action {
                        self.notify(NoticeLevel::Warning, e.to_string());
                    } else {
                        tracing::warn!(error = %e, phase = self.state.phase.name(), "Unexpected event");
                    }
                    continue;
                }
            };

            self.state = result.new_state;

            for effect in result.effects {
                if let Some(generated) = self.execute_effect(effect) {
                    let link_lost = matches!(generated, Event::ConnectionDropped);
                    events_to_process.push(generated);
                    // Nothing else from this batch can reach the bridge
                    if link_lost {
                        break;
                    }
                }
            }
        }
    }

    fn execute_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::Send(message) => self.send(message),
            Effect::DisplayResponse {
                text,
                interaction_count,
            } => {
                self.last_response = Some(text.clone());
                self.emit(UiEvent::Response {
                    text,
                    interaction_count,
                });
                None
            }
            Effect::Notify(notice) => {
                self.emit_notice(notice);
                None
            }
            Effect::ClearFeedbackForm => {
                self.emit(UiEvent::FeedbackCleared);
                None
            }
            Effect::AdvanceSelection => {
                if let Some(selection) = self.catalog.advance() {
                    self.emit(UiEvent::SelectionChanged(Some(selection)));
                }
                None
            }
            Effect::ScheduleChainedContext { ticket, delay } => {
                let ticket_tx = self.ticket_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = ticket_tx.send(ticket).await;
                });
                None
            }
            Effect::RequestFreshContext => Some(Event::RequestContext {
                scenario: self.read_selection(),
            }),
        }
    }

    fn send(&mut self, message: OutboundMessage) -> Option<Event> {
        let was_connected = self.connection.is_connected();
        if !self.connection.send(&message) {
            if was_connected {
                self.connection.reset();
                return Some(Event::ConnectionDropped);
            }
            self.notify(
                NoticeLevel::Warning,
                "Not connected to model. Please start the session again.",
            );
            return None;
        }

        match &message {
            OutboundMessage::Context { .. } => {
                self.turn_selection = self.requested.take();
                self.last_response = None;
            }
            OutboundMessage::Feedback { payload } => self.record_turn(payload.clone()),
            OutboundMessage::Hello { .. } | OutboundMessage::Method { .. } => {}
        }
        self.emit(UiEvent::Outbound {
            kind: message.kind(),
        });
        None
    }

    fn record_turn(&mut self, feedback: FeedbackPayload) {
        let (Some(selection), Some(response)) = (&self.turn_selection, self.last_response.take())
        else {
            tracing::warn!("Feedback sent without a recorded model turn");
            return;
        };
        self.transcript.record_turn(InteractionTurn {
            persona: selection.persona_id,
            activity: selection.activity_id,
            image_name: selection.image_name.clone(),
            scenario_text: selection.scenario_text(),
            response,
            feedback,
            interaction_count: self.state.interaction_count,
            recorded_at: chrono::Utc::now(),
        });
    }

    /// Read the live selection for a context request about to be processed
    fn read_selection(&mut self) -> Option<ContextPayload> {
        self.requested = self.provider.current();
        self.requested.as_ref().map(Selection::context_payload)
    }

    fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.emit_notice(Notice {
            level,
            message: message.into(),
        });
    }

    fn emit_notice(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => tracing::info!(message = %notice.message, "Notice"),
            NoticeLevel::Warning => tracing::warn!(message = %notice.message, "Notice"),
            NoticeLevel::Error => tracing::error!(message = %notice.message, "Notice"),
        }
        self.emit(UiEvent::Notice(notice));
    }

    fn emit(&self, event: UiEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            participant: self.context.participant.clone(),
            connection: self.connection.state(),
            phase: self.state.phase.name(),
            interaction_count: self.state.interaction_count,
            loading: self.state.pending_load,
            selection: self.provider.current(),
            recorded_turns: self.transcript.turn_count(),
        }
    }

    fn publish_snapshot(&mut self) {
        self.last_published = Some((self.state.clone(), self.connection.state()));
        self.emit(UiEvent::Snapshot(self.snapshot()));
    }

    fn publish_snapshot_if_changed(&mut self) {
        let current = (self.state.clone(), self.connection.state());
        if self.last_published.as_ref() != Some(&current) {
            self.publish_snapshot();
        }
    }
}
