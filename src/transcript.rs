//! Per-participant study transcript and its JSON export
//!
//! Phase II turns are recorded as feedback is sent, one entry per image (a
//! later turn on the same image replaces the earlier one). The export is a
//! single pretty-printed document named `<safe_user_id>_Reflection.json`.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

use crate::protocol::FeedbackPayload;

static UNSAFE_FILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w.-]+").expect("Invalid regex pattern for file names"));

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Please enter User ID first.")]
    MissingParticipant,
    #[error("failed to serialize transcript: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Phase I A/B preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseOneChoice {
    pub persona: u32,
    pub activity: u32,
    pub image_name: String,
    pub choice: Variant,
}

/// One completed Phase II exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionTurn {
    pub persona: u32,
    pub activity: u32,
    pub image_name: String,
    pub scenario_text: String,
    pub response: String,
    pub feedback: FeedbackPayload,
    pub interaction_count: u64,
    pub recorded_at: DateTime<Utc>,
}

/// The exported document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionDocument {
    pub export_id: String,
    pub user_id: String,
    pub generated_at: DateTime<Utc>,
    #[serde(rename = "phaseI")]
    pub phase_one: Vec<PhaseOneChoice>,
    #[serde(rename = "phaseII")]
    pub phase_two: Vec<InteractionTurn>,
}

#[derive(Debug, Default)]
pub struct Transcript {
    phase_one: BTreeMap<String, PhaseOneChoice>,
    phase_two: BTreeMap<String, InteractionTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_choice(&mut self, choice: PhaseOneChoice) {
        self.phase_one.insert(choice.image_name.clone(), choice);
    }

    pub fn record_turn(&mut self, turn: InteractionTurn) {
        tracing::debug!(image = %turn.image_name, count = turn.interaction_count, "Recorded turn");
        self.phase_two.insert(turn.image_name.clone(), turn);
    }

    pub fn turn_count(&self) -> usize {
        self.phase_two.len()
    }

    /// Snapshot the transcript, ordered by persona then activity
    pub fn document(&self, user_id: &str) -> ReflectionDocument {
        let mut phase_one: Vec<_> = self.phase_one.values().cloned().collect();
        phase_one.sort_by_key(|c| (c.persona, c.activity));
        let mut phase_two: Vec<_> = self.phase_two.values().cloned().collect();
        phase_two.sort_by_key(|t| (t.persona, t.activity));

        ReflectionDocument {
            export_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            generated_at: Utc::now(),
            phase_one,
            phase_two,
        }
    }

    /// Write the document into `dir`, returning the file path
    pub async fn export(&self, user_id: &str, dir: &Path) -> Result<PathBuf, ExportError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ExportError::MissingParticipant);
        }

        let path = dir.join(export_file_name(user_id));
        let json = serde_json::to_string_pretty(&self.document(user_id))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| ExportError::Write {
                path: path.clone(),
                source,
            })?;

        tracing::info!(path = %path.display(), turns = self.turn_count(), "Exported transcript");
        Ok(path)
    }
}

/// Participant id with runs of unsafe characters replaced by `_`
pub fn safe_file_stem(user_id: &str) -> String {
    UNSAFE_FILE_CHARS.replace_all(user_id, "_").into_owned()
}

pub fn export_file_name(user_id: &str) -> String {
    format!("{}_Reflection.json", safe_file_stem(user_id))
}
