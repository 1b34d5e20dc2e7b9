//! Connection manager for the bridge socket
//!
//! Owns the single full-duplex link to the bridge service. A link is opened
//! lazily by [`ConnectionManager::ensure_connected`] and never reopened on its
//! own: after an error or close the manager stays disconnected until the next
//! call. Messages sent while disconnected are refused, not buffered.
//!
//! Each link gets a generation number. Link I/O runs in a pump task that
//! reports back through [`LinkEvent`]s tagged with that generation, so events
//! from a link that has already been replaced are recognised and dropped.

mod websocket;

pub use websocket::WebSocketConnector;

use crate::protocol::OutboundMessage;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Errors from the transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection closed")]
    Closed,
}

/// Outgoing half of a link: text frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ConnectionError> + Send>>;

/// Incoming half of a link: text frames until the peer closes
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ConnectionError>> + Send>>;

/// An open full-duplex text channel
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens links to the bridge
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Link, ConnectionError>;
}

/// Readiness of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnState {
    pub fn name(self) -> &'static str {
        match self {
            ConnState::Disconnected => "disconnected",
            ConnState::Connecting => "connecting",
            ConnState::Connected => "connected",
        }
    }
}

/// Reports from connect attempts and link pumps
#[derive(Debug)]
pub enum LinkEvent {
    Opened {
        generation: u64,
        outbound: mpsc::UnboundedSender<String>,
    },
    Frame {
        generation: u64,
        text: String,
    },
    Closed {
        generation: u64,
    },
    Failed {
        generation: u64,
        error: ConnectionError,
    },
}

impl LinkEvent {
    pub fn generation(&self) -> u64 {
        match self {
            LinkEvent::Opened { generation, .. }
            | LinkEvent::Frame { generation, .. }
            | LinkEvent::Closed { generation }
            | LinkEvent::Failed { generation, .. } => *generation,
        }
    }
}

/// What a link event means for the session
#[derive(Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Event from a replaced link; nothing to do
    Stale,
    Opened,
    Frame(String),
    /// The link is gone; the session must reset
    Dropped(Option<ConnectionError>),
}

/// Owns the one live link to the bridge
pub struct ConnectionManager<C: Connector + 'static> {
    url: String,
    connector: Arc<C>,
    state: ConnState,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    events_tx: mpsc::Sender<LinkEvent>,
    task: Option<JoinHandle<()>>,
}

impl<C: Connector + 'static> ConnectionManager<C> {
    pub fn new(url: impl Into<String>, connector: C, events_tx: mpsc::Sender<LinkEvent>) -> Self {
        Self {
            url: url.into(),
            connector: Arc::new(connector),
            state: ConnState::Disconnected,
            generation: 0,
            outbound: None,
            events_tx,
            task: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnState::Connected
    }

    /// Open a link unless one is open or opening. Returns true if already
    /// connected.
    pub fn ensure_connected(&mut self) -> bool {
        match self.state {
            ConnState::Connected => return true,
            ConnState::Connecting => return false,
            ConnState::Disconnected => {}
        }

        self.generation += 1;
        self.state = ConnState::Connecting;
        let generation = self.generation;
        let url = self.url.clone();
        let connector = Arc::clone(&self.connector);
        let events_tx = self.events_tx.clone();

        tracing::info!(url = %url, generation, "Connecting to bridge");
        self.task = Some(tokio::spawn(async move {
            match connector.connect(&url).await {
                Ok(link) => {
                    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                    let opened = LinkEvent::Opened {
                        generation,
                        outbound: outbound_tx,
                    };
                    if events_tx.send(opened).await.is_ok() {
                        pump(link, outbound_rx, events_tx, generation).await;
                    }
                }
                Err(error) => {
                    let _ = events_tx.send(LinkEvent::Failed { generation, error }).await;
                }
            }
        }));
        false
    }

    /// Serialize and transmit. Returns false if not connected or the link is
    /// already gone.
    pub fn send(&mut self, message: &OutboundMessage) -> bool {
        if self.state != ConnState::Connected {
            tracing::warn!(kind = message.kind(), state = self.state.name(), "Send while not connected");
            return false;
        }
        let Some(outbound) = &self.outbound else {
            return false;
        };
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, kind = message.kind(), "Failed to serialize message");
                return false;
            }
        };
        if outbound.send(text).is_err() {
            tracing::warn!(kind = message.kind(), "Link writer is gone");
            return false;
        }
        tracing::debug!(kind = message.kind(), "Sent message");
        true
    }

    /// Apply a link event to the connection state
    pub fn handle(&mut self, event: LinkEvent) -> LinkOutcome {
        if event.generation() != self.generation || self.state == ConnState::Disconnected {
            tracing::debug!(
                generation = event.generation(),
                current = self.generation,
                "Ignoring event from stale link"
            );
            return LinkOutcome::Stale;
        }

        match event {
            LinkEvent::Opened { outbound, .. } => {
                tracing::info!(url = %self.url, "Connected to bridge");
                self.state = ConnState::Connected;
                self.outbound = Some(outbound);
                LinkOutcome::Opened
            }
            LinkEvent::Frame { text, .. } => LinkOutcome::Frame(text),
            LinkEvent::Closed { .. } => {
                tracing::info!("Bridge connection closed");
                self.reset();
                LinkOutcome::Dropped(None)
            }
            LinkEvent::Failed { error, .. } => {
                tracing::warn!(error = %error, "Bridge connection failed");
                self.reset();
                LinkOutcome::Dropped(Some(error))
            }
        }
    }

    /// Forget the current link. Later events from it are stale.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.state = ConnState::Disconnected;
        // Dropping the sender lets the pump close the sink
        self.outbound = None;
        self.task = None;
    }

    /// Tear down the link immediately
    pub fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.reset();
    }
}

/// Shuttle frames between the link and the manager until either side ends
async fn pump(
    link: Link,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    events_tx: mpsc::Sender<LinkEvent>,
    generation: u64,
) {
    let Link {
        mut sink,
        mut stream,
    } = link;

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => match outgoing {
                Some(text) => {
                    if let Err(error) = sink.send(text).await {
                        let _ = events_tx.send(LinkEvent::Failed { generation, error }).await;
                        return;
                    }
                }
                None => {
                    // Manager let go of this link
                    let _ = sink.close().await;
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(text)) => {
                    if events_tx.send(LinkEvent::Frame { generation, text }).await.is_err() {
                        return;
                    }
                }
                Some(Err(error)) => {
                    let _ = events_tx.send(LinkEvent::Failed { generation, error }).await;
                    return;
                }
                None => {
                    let _ = events_tx.send(LinkEvent::Closed { generation }).await;
                    return;
                }
            },
        }
    }
}
