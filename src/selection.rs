//! Selection context: what the participant is currently looking at
//!
//! The catalog publishes every selection change synchronously into a
//! `watch` channel. Anything that builds a context request later (timer
//! callbacks in particular) reads the channel at that moment instead of
//! holding on to a copy.

mod catalog;

pub use catalog::{CatalogError, ImageCatalog, ImageRecord};

use crate::protocol::ContextPayload;
use tokio::sync::watch;

/// The persona/activity pair on screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub key: String,
    pub persona_id: u32,
    pub activity_id: u32,
    pub image_name: String,
    /// Activity description from the narration file, if one was loaded
    pub narration: Option<String>,
}

impl Selection {
    /// Scenario text for the bridge: the narration when present, otherwise
    /// the bare identifiers.
    pub fn scenario_text(&self) -> String {
        match self.narration.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => format!(
                "Persona {}, Activity {}",
                self.persona_id, self.activity_id
            ),
        }
    }

    pub fn context_payload(&self) -> ContextPayload {
        ContextPayload::new(self.scenario_text())
    }
}

/// Read side of the live selection
#[derive(Debug, Clone)]
pub struct SelectionProvider {
    rx: watch::Receiver<Option<Selection>>,
}

impl SelectionProvider {
    /// The selection as of right now
    pub fn current(&self) -> Option<Selection> {
        self.rx.borrow().clone()
    }
}

/// Write side, owned by the catalog
#[derive(Debug)]
pub(crate) struct SelectionPublisher {
    tx: watch::Sender<Option<Selection>>,
}

impl SelectionPublisher {
    pub(crate) fn publish(&self, selection: Option<Selection>) {
        self.tx.send_replace(selection);
    }

    pub(crate) fn provider(&self) -> SelectionProvider {
        SelectionProvider {
            rx: self.tx.subscribe(),
        }
    }
}

pub(crate) fn channel() -> SelectionPublisher {
    let (tx, _rx) = watch::channel(None);
    SelectionPublisher { tx }
}
