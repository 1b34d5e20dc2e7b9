//! In-memory bridge and runtime harness for tests
//!
//! These mocks enable integration testing without real sockets.

use super::{start, Command, RuntimeHandle, SessionSnapshot, UiEvent};
use crate::config::BridgeConfig;
use crate::connection::{ConnectionError, Connector, Link};
use crate::selection::ImageCatalog;
use crate::state_machine::NoticeLevel;
use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// Fake Connector
// ============================================================================

#[derive(Default)]
struct FakeConnectorInner {
    connects: usize,
    fail_next: bool,
    bridges: VecDeque<FakeBridge>,
}

/// Connector that hands out in-memory links; the far end of each link is a
/// [`FakeBridge`] collected with [`FakeConnector::next_bridge`]
#[derive(Clone, Default)]
pub struct FakeConnector {
    inner: Arc<Mutex<FakeConnectorInner>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_connect(&self) {
        self.inner.lock().unwrap().fail_next = true;
    }

    pub fn connect_count(&self) -> usize {
        self.inner.lock().unwrap().connects
    }

    /// The bridge side of the oldest link not yet collected
    pub async fn next_bridge(&self) -> FakeBridge {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if let Some(bridge) = self.inner.lock().unwrap().bridges.pop_front() {
                return bridge;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "no connection was opened"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<Link, ConnectionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connects += 1;
        if std::mem::take(&mut inner.fail_next) {
            return Err(ConnectionError::Connect {
                url: url.to_string(),
                message: "connection refused".to_string(),
            });
        }

        let (client_tx, bridge_rx) = fmpsc::unbounded::<String>();
        let (bridge_tx, client_rx) = fmpsc::unbounded::<Result<String, ConnectionError>>();
        inner.bridges.push_back(FakeBridge {
            from_client: bridge_rx,
            to_client: bridge_tx,
        });

        Ok(Link {
            sink: Box::pin(client_tx.sink_map_err(|_| ConnectionError::Closed)),
            stream: Box::pin(client_rx),
        })
    }
}

/// The bridge service's end of a fake link
pub struct FakeBridge {
    from_client: fmpsc::UnboundedReceiver<String>,
    to_client: fmpsc::UnboundedSender<Result<String, ConnectionError>>,
}

impl FakeBridge {
    /// Next message from the client, parsed
    pub async fn recv_json(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.from_client.next())
            .await
            .expect("timed out waiting for client message")
            .expect("client closed the link");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Next message type from the client
    pub async fn recv_type(&mut self) -> String {
        self.recv_json().await["type"]
            .as_str()
            .unwrap_or_default()
            .to_string()
    }

    /// True if the client sends nothing within `window`
    pub async fn is_quiet(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.from_client.next())
            .await
            .is_err()
    }

    pub fn reply(&self, message: Value) {
        let _ = self.to_client.unbounded_send(Ok(message.to_string()));
    }

    pub fn reply_raw(&self, text: &str) {
        let _ = self.to_client.unbounded_send(Ok(text.to_string()));
    }

    /// Close the link from the bridge side
    pub fn close(&self) {
        self.to_client.close_channel();
    }

    pub fn fail(&self, message: &str) {
        let _ = self
            .to_client
            .unbounded_send(Err(ConnectionError::Transport(message.to_string())));
    }
}

// ============================================================================
// Test Runtime
// ============================================================================

/// Helper for building test runtimes with minimal boilerplate
pub struct TestRuntime {
    pub handle: RuntimeHandle,
    pub events: broadcast::Receiver<UiEvent>,
    pub connector: FakeConnector,
}

pub struct TestRuntimeBuilder {
    config: BridgeConfig,
    images: Vec<String>,
    participant: Option<String>,
}

impl TestRuntime {
    pub fn builder() -> TestRuntimeBuilder {
        TestRuntimeBuilder {
            config: BridgeConfig {
                bridge_url: "ws://bridge.test/ui".to_string(),
                chain_delay: Duration::from_millis(20),
                ..BridgeConfig::default()
            },
            images: vec![
                "Persona_1_Activity_1.jpg".to_string(),
                "Persona_1_Activity_2.jpg".to_string(),
                "Persona_2_Activity_1.jpg".to_string(),
            ],
            participant: Some("p-17".to_string()),
        }
    }
}

impl TestRuntimeBuilder {
    pub fn images(mut self, images: &[&str]) -> Self {
        self.images = images.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn chain_delay(mut self, delay: Duration) -> Self {
        self.config.chain_delay = delay;
        self
    }

    pub fn result_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.result_dir = dir.into();
        self
    }

    pub fn without_participant(mut self) -> Self {
        self.participant = None;
        self
    }

    pub async fn build(self) -> TestRuntime {
        let connector = FakeConnector::new();
        let catalog = ImageCatalog::from_names(&self.images);
        let handle = start(self.config, catalog, connector.clone());
        let events = handle.subscribe();

        let rt = TestRuntime {
            handle,
            events,
            connector,
        };
        if let Some(participant) = self.participant {
            rt.command(Command::SetParticipant(participant)).await;
        }
        rt
    }
}

impl TestRuntime {
    pub async fn command(&self, command: Command) {
        self.handle
            .send(command)
            .await
            .expect("runtime stopped");
    }

    /// Wait for the first event matching `pred`, skipping others
    pub async fn wait_for<F>(&mut self, mut pred: F) -> Option<UiEvent>
    where
        F: FnMut(&UiEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), self.events.recv()).await {
                Ok(Ok(event)) if pred(&event) => return Some(event),
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                _ => continue,
            }
        }
        None
    }

    pub async fn wait_for_snapshot<F>(&mut self, mut pred: F) -> Option<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        match self
            .wait_for(|e| matches!(e, UiEvent::Snapshot(s) if pred(s)))
            .await
        {
            Some(UiEvent::Snapshot(snapshot)) => Some(snapshot),
            _ => None,
        }
    }

    pub async fn wait_for_phase(&mut self, phase: &str) -> Option<SessionSnapshot> {
        self.wait_for_snapshot(|s| s.phase == phase).await
    }

    /// Wait for a notice containing `text`
    pub async fn wait_for_notice(&mut self, level: NoticeLevel, text: &str) -> bool {
        self.wait_for(|e| {
            matches!(e, UiEvent::Notice(n) if n.level == level && n.message.contains(text))
        })
        .await
        .is_some()
    }

    /// Connect and complete the handshake; returns the bridge with the
    /// automatic first context already consumed
    pub async fn start_session(&mut self) -> FakeBridge {
        self.command(Command::StartSession { resume: false }).await;
        let mut bridge = self.connector.next_bridge().await;
        assert_eq!(bridge.recv_type().await, "hello");
        assert_eq!(bridge.recv_type().await, "method");
        bridge.reply(serde_json::json!({ "type": "hello_confirm" }));
        bridge.reply(serde_json::json!({ "type": "method_confirm", "interaction_count": 0 }));
        assert_eq!(bridge.recv_type().await, "context");
        bridge
    }
}

// ============================================================================
// Tests
// ============================================================================

mod tests {
    use super::*;
    use crate::connection::ConnState;
    use crate::protocol::{FeedbackChoice, FeedbackForm};
    use crate::transcript::Variant;
    use serde_json::json;

    fn form(text: &str) -> FeedbackForm {
        FeedbackForm {
            choice: FeedbackChoice::Yes,
            response: text.to_string(),
            ..FeedbackForm::default()
        }
    }

    /// Start from no connection: hello, method, then context after confirmation
    #[tokio::test]
    async fn test_start_sends_hello_method_then_context() {
        let mut rt = TestRuntime::builder().build().await;

        rt.command(Command::StartSession { resume: false }).await;
        assert!(rt.wait_for_notice(NoticeLevel::Info, "Connecting to model").await);

        let mut bridge = rt.connector.next_bridge().await;
        assert_eq!(
            bridge.recv_json().await,
            json!({ "type": "hello", "user_id": "p-17" })
        );
        assert_eq!(
            bridge.recv_json().await,
            json!({ "type": "method", "method": "activation_steering" })
        );
        // Nothing else before confirmation
        assert!(bridge.is_quiet(Duration::from_millis(50)).await);

        bridge.reply(json!({ "type": "HELLO_CONFIRM" }));
        bridge.reply(json!({ "type": "method_confirm" }));
        assert_eq!(
            bridge.recv_json().await,
            json!({
                "type": "context",
                "payload": { "scenario_text": "Persona 1, Activity 1", "timeframe": "N/A" }
            })
        );
        assert!(rt.wait_for_snapshot(|s| s.loading).await.is_some());
    }

    /// A resume typed before the link is up is carried into the handshake
    #[tokio::test]
    async fn test_resume_while_disconnected_sends_resume_hello() {
        let mut rt = TestRuntime::builder().build().await;

        rt.command(Command::StartSession { resume: true }).await;
        assert!(
            rt.wait_for_notice(NoticeLevel::Info, "session will start once connected")
                .await
        );

        let mut bridge = rt.connector.next_bridge().await;
        assert_eq!(
            bridge.recv_json().await,
            json!({ "type": "hello", "user_id": "p-17", "resume": true })
        );
        assert_eq!(bridge.recv_type().await, "method");

        bridge.reply(json!({ "type": "hello_confirm" }));
        bridge.reply(json!({ "type": "resume_confirm", "interaction_count": 4 }));
        assert_eq!(bridge.recv_type().await, "context");
        let snapshot = rt.wait_for_snapshot(|s| s.interaction_count == 4).await;
        assert!(snapshot.is_some());
    }

    /// A failed connect forgets the pending resume; a later plain open does not resume
    #[tokio::test]
    async fn test_failed_connect_drops_pending_resume() {
        let mut rt = TestRuntime::builder().build().await;
        rt.connector.fail_next_connect();

        rt.command(Command::StartSession { resume: true }).await;
        assert!(
            rt.wait_for_notice(NoticeLevel::Error, "Could not connect")
                .await
        );

        rt.command(Command::Connect).await;
        let mut bridge = rt.connector.next_bridge().await;
        assert_eq!(
            bridge.recv_json().await,
            json!({ "type": "hello", "user_id": "p-17" })
        );
    }

    #[tokio::test]
    async fn test_response_moves_to_awaiting_feedback() {
        let mut rt = TestRuntime::builder().build().await;
        let bridge = rt.start_session().await;

        bridge.reply(json!({ "type": "response", "response": "Hi", "interaction_count": 3 }));

        let response = rt
            .wait_for(|e| matches!(e, UiEvent::Response { .. }))
            .await;
        assert_eq!(
            response,
            Some(UiEvent::Response {
                text: "Hi".to_string(),
                interaction_count: 3
            })
        );
        let snapshot = rt.wait_for_phase("awaiting_feedback").await.unwrap();
        assert_eq!(snapshot.interaction_count, 3);
        assert!(!snapshot.loading);
    }

    #[tokio::test]
    async fn test_close_resets_and_next_action_reconnects() {
        let mut rt = TestRuntime::builder().build().await;
        let bridge = rt.start_session().await;

        bridge.close();
        assert!(rt.wait_for_notice(NoticeLevel::Warning, "connection lost").await);
        let snapshot = rt
            .wait_for_snapshot(|s| s.connection == ConnState::Disconnected)
            .await
            .unwrap();
        assert_eq!(snapshot.phase, "idle");
        assert!(!snapshot.loading);

        // The next action opens a fresh link instead of reusing the dead one
        rt.command(Command::RequestContext).await;
        assert!(rt.wait_for_notice(NoticeLevel::Info, "Connecting to model").await);
        let mut fresh = rt.connector.next_bridge().await;
        assert_eq!(fresh.recv_type().await, "hello");
        assert_eq!(rt.connector.connect_count(), 2);
    }

    /// Continue after selecting A sends the context for B, read when the timer fires
    #[tokio::test]
    async fn test_continue_sends_context_for_advanced_image() {
        let mut rt = TestRuntime::builder().build().await;
        let mut bridge = rt.start_session().await;
        bridge.reply(json!({ "type": "response", "response": "Hi", "interaction_count": 1 }));
        rt.wait_for_phase("awaiting_feedback").await.unwrap();

        rt.command(Command::Continue(form("more detail please"))).await;

        let feedback = bridge.recv_json().await;
        assert_eq!(feedback["type"], "feedback");
        assert_eq!(feedback["payload"]["choice"], "YES");
        assert_eq!(feedback["payload"]["response"], "more detail please");
        assert!(rt.wait_for(|e| *e == UiEvent::FeedbackCleared).await.is_some());

        let context = bridge.recv_json().await;
        assert_eq!(context["type"], "context");
        assert_eq!(
            context["payload"]["scenario_text"],
            "Persona 1, Activity 2"
        );
    }

    /// A selection change made during the chain delay wins over the advance
    #[tokio::test]
    async fn test_chained_context_reads_selection_at_fire_time() {
        let mut rt = TestRuntime::builder()
            .chain_delay(Duration::from_millis(150))
            .build()
            .await;
        let mut bridge = rt.start_session().await;
        bridge.reply(json!({ "type": "response", "response": "Hi" }));
        rt.wait_for_phase("awaiting_feedback").await.unwrap();

        rt.command(Command::Continue(form("ok"))).await;
        assert_eq!(bridge.recv_type().await, "feedback");
        rt.command(Command::Select {
            key: "2_1".to_string(),
        })
        .await;

        let context = bridge.recv_json().await;
        assert_eq!(
            context["payload"]["scenario_text"],
            "Persona 2, Activity 1"
        );
    }

    #[tokio::test]
    async fn test_second_request_while_waiting_is_rejected() {
        let mut rt = TestRuntime::builder().build().await;
        let mut bridge = rt.start_session().await;

        rt.command(Command::RequestContext).await;
        assert!(rt.wait_for_notice(NoticeLevel::Warning, "Still waiting").await);
        assert!(bridge.is_quiet(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_remote_error_allows_retry() {
        let mut rt = TestRuntime::builder().build().await;
        let mut bridge = rt.start_session().await;

        bridge.reply(json!({ "type": "error", "detail": "model overloaded" }));
        assert!(
            rt.wait_for_notice(NoticeLevel::Error, "Model error: model overloaded")
                .await
        );

        rt.command(Command::RequestContext).await;
        assert_eq!(bridge.recv_type().await, "context");
    }

    #[tokio::test]
    async fn test_malformed_frame_clears_loading() {
        let mut rt = TestRuntime::builder().build().await;
        let bridge = rt.start_session().await;

        bridge.reply_raw("not json");
        let snapshot = rt
            .wait_for_snapshot(|s| !s.loading && s.phase == "awaiting_response")
            .await;
        assert!(snapshot.is_some());
    }

    #[tokio::test]
    async fn test_feedback_on_last_image_does_not_chain() {
        let mut rt = TestRuntime::builder()
            .images(&["Persona_3_Activity_1.png"])
            .build()
            .await;
        let mut bridge = rt.start_session().await;
        bridge.reply(json!({ "type": "response", "response": "Hi" }));
        rt.wait_for_phase("awaiting_feedback").await.unwrap();

        rt.command(Command::Continue(form("thanks"))).await;
        assert_eq!(bridge.recv_type().await, "feedback");
        assert!(rt.wait_for_notice(NoticeLevel::Info, "last image").await);
        assert!(bridge.is_quiet(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_empty_feedback_is_not_sent() {
        let mut rt = TestRuntime::builder().build().await;
        let mut bridge = rt.start_session().await;
        bridge.reply(json!({ "type": "response", "response": "Hi" }));
        rt.wait_for_phase("awaiting_feedback").await.unwrap();

        rt.command(Command::Continue(form("   "))).await;
        assert!(
            rt.wait_for_notice(NoticeLevel::Warning, "interaction content")
                .await
        );
        assert!(bridge.is_quiet(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_start_without_participant_is_rejected() {
        let mut rt = TestRuntime::builder().without_participant().build().await;

        rt.command(Command::Connect).await;
        let mut bridge = rt.connector.next_bridge().await;
        rt.wait_for_snapshot(|s| s.connection == ConnState::Connected)
            .await
            .unwrap();
        // Open without a participant id sends nothing
        assert!(bridge.is_quiet(Duration::from_millis(50)).await);

        rt.command(Command::StartSession { resume: false }).await;
        assert!(rt.wait_for_notice(NoticeLevel::Warning, "User ID").await);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let mut rt = TestRuntime::builder().build().await;
        rt.connector.fail_next_connect();

        rt.command(Command::Connect).await;
        assert!(
            rt.wait_for_notice(NoticeLevel::Error, "Could not connect")
                .await
        );
        let snapshot = rt
            .wait_for_snapshot(|s| s.connection == ConnState::Disconnected)
            .await
            .unwrap();
        assert_eq!(snapshot.phase, "idle");
    }

    #[tokio::test]
    async fn test_export_records_completed_turns() {
        let dir = tempfile::tempdir().unwrap();
        let mut rt = TestRuntime::builder().result_dir(dir.path()).build().await;
        let mut bridge = rt.start_session().await;
        bridge.reply(json!({ "type": "response", "response": "Hi", "interaction_count": 1 }));
        rt.wait_for_phase("awaiting_feedback").await.unwrap();
        rt.command(Command::Continue(form("good"))).await;
        assert_eq!(bridge.recv_type().await, "feedback");

        rt.command(Command::Export { dir: None }).await;
        let Some(UiEvent::Exported { path }) = rt
            .wait_for(|e| matches!(e, UiEvent::Exported { .. }))
            .await
        else {
            panic!("export did not complete");
        };

        assert_eq!(path, dir.path().join("p-17_Reflection.json"));
        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let turns = doc["phaseII"].as_array().unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0]["imageName"], "Persona_1_Activity_1.jpg");
        assert_eq!(turns[0]["response"], "Hi");
        assert_eq!(turns[0]["feedback"]["response"], "good");
    }

    #[tokio::test]
    async fn test_phase_one_choice_is_exported() {
        let dir = tempfile::tempdir().unwrap();
        let mut rt = TestRuntime::builder().result_dir(dir.path()).build().await;

        rt.command(Command::Select {
            key: "1_2".to_string(),
        })
        .await;
        rt.command(Command::ConfirmChoice { variant: Variant::B }).await;
        rt.command(Command::ConfirmChoice { variant: Variant::A }).await;
        assert!(
            rt.wait_for_notice(NoticeLevel::Info, "Selection recorded")
                .await
        );

        rt.command(Command::Export { dir: None }).await;
        let Some(UiEvent::Exported { path }) = rt
            .wait_for(|e| matches!(e, UiEvent::Exported { .. }))
            .await
        else {
            panic!("export did not complete");
        };

        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let choices = doc["phaseI"].as_array().unwrap();
        assert_eq!(choices.len(), 1);
        assert_eq!(choices[0]["imageName"], "Persona_1_Activity_2.jpg");
        assert_eq!(choices[0]["choice"], "A");
        assert_eq!(choices[0]["persona"], 1);
        assert_eq!(choices[0]["activity"], 2);
        // No connection is needed for Phase I
        assert_eq!(rt.connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_phase_one_choice_needs_participant_and_image() {
        let mut rt = TestRuntime::builder().without_participant().build().await;
        rt.command(Command::ConfirmChoice { variant: Variant::A }).await;
        assert!(rt.wait_for_notice(NoticeLevel::Warning, "User ID").await);

        let mut rt = TestRuntime::builder().images(&[]).build().await;
        rt.command(Command::ConfirmChoice { variant: Variant::A }).await;
        assert!(
            rt.wait_for_notice(NoticeLevel::Warning, "No image selected")
                .await
        );
    }

    #[tokio::test]
    async fn test_transport_error_resets_session() {
        let mut rt = TestRuntime::builder().build().await;
        let bridge = rt.start_session().await;

        bridge.fail("connection reset by peer");
        assert!(rt.wait_for_notice(NoticeLevel::Warning, "connection lost").await);
        let snapshot = rt
            .wait_for_snapshot(|s| s.connection == ConnState::Disconnected)
            .await
            .unwrap();
        assert_eq!(snapshot.phase, "idle");
        assert!(!snapshot.loading);
    }

    #[tokio::test]
    async fn test_shutdown_stops_runtime() {
        let rt = TestRuntime::builder().build().await;
        let TestRuntime { handle, .. } = rt;
        tokio::time::timeout(WAIT, handle.shutdown())
            .await
            .expect("runtime did not stop");
    }
}
