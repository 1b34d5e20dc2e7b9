//! Feedback form state and the payload snapshot sent to the bridge

use super::ProtocolError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Feedback dimensions offered to participants, in display order
pub const DEFAULT_CATEGORIES: [&str; 5] = [
    "timing_interruption",
    "communication_style",
    "autonomy_control",
    "context_adaptation",
    "domain_priorities",
];

const SURVEY_QUESTIONS: usize = 5;
const SURVEY_MIN: u8 = 1;
const SURVEY_MAX: u8 = 7;
const SURVEY_NEUTRAL: u8 = 3;

/// Whether the participant accepted the assistant's behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeedbackChoice {
    Yes,
    #[default]
    No,
}

/// Five Likert answers rendered as `Q1:n Q2:n Q3:n Q4:n Q5:n`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SatisfactionSurvey {
    scores: [u8; SURVEY_QUESTIONS],
}

impl SatisfactionSurvey {
    pub fn new(scores: [u8; SURVEY_QUESTIONS]) -> Result<Self, ProtocolError> {
        for (i, &score) in scores.iter().enumerate() {
            if !(SURVEY_MIN..=SURVEY_MAX).contains(&score) {
                return Err(ProtocolError::ScoreOutOfRange {
                    question: i + 1,
                    score,
                });
            }
        }
        Ok(Self { scores })
    }

    pub fn scores(&self) -> [u8; SURVEY_QUESTIONS] {
        self.scores
    }
}

impl Default for SatisfactionSurvey {
    fn default() -> Self {
        Self {
            scores: [SURVEY_NEUTRAL; SURVEY_QUESTIONS],
        }
    }
}

impl fmt::Display for SatisfactionSurvey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, score) in self.scores.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "Q{}:{}", i + 1, score)?;
        }
        Ok(())
    }
}

/// Editable feedback entry fields, owned by the UI between turns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackForm {
    pub choice: FeedbackChoice,
    pub response: String,
    pub survey: SatisfactionSurvey,
    /// Free-text annotation per category
    pub marks: BTreeMap<String, String>,
    /// Categories in the order the participant clicked them
    pub ranking: Vec<String>,
}

impl FeedbackForm {
    /// Click on a category: appends it to the ranking, or removes it if
    /// already ranked.
    pub fn toggle_category(&mut self, category: &str) {
        if let Some(pos) = self.ranking.iter().position(|c| c == category) {
            self.ranking.remove(pos);
        } else {
            self.ranking.push(category.to_string());
        }
    }

    pub fn set_mark(&mut self, category: &str, comment: impl Into<String>) {
        let comment = comment.into();
        if comment.trim().is_empty() {
            self.marks.remove(category);
        } else {
            self.marks.insert(category.to_string(), comment);
        }
    }

    /// Rendered mark string: `NONE`, or `cat: comment; cat2: comment2`.
    ///
    /// Ranked categories come first in ranking order, then any remaining
    /// annotated categories alphabetically.
    pub fn render_marks(&self) -> String {
        let mut parts = Vec::new();
        for category in &self.ranking {
            if let Some(comment) = self.marks.get(category) {
                push_mark(&mut parts, category, comment);
            }
        }
        for (category, comment) in &self.marks {
            if !self.ranking.contains(category) {
                push_mark(&mut parts, category, comment);
            }
        }
        if parts.is_empty() {
            "NONE".to_string()
        } else {
            parts.join("; ")
        }
    }
}

fn push_mark(parts: &mut Vec<String>, category: &str, comment: &str) {
    let comment = comment.trim();
    if !comment.is_empty() {
        parts.push(format!("{category}: {comment}"));
    }
}

/// Immutable snapshot of a feedback form, assembled at send time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackPayload {
    pub choice: FeedbackChoice,
    pub response: String,
    pub satisfaction_survey: String,
    pub mark: String,
    pub category_ranking: Vec<String>,
}

impl FeedbackPayload {
    /// Snapshot the form. The free-text response is required.
    pub fn from_form(form: &FeedbackForm) -> Result<Self, ProtocolError> {
        if form.response.trim().is_empty() {
            return Err(ProtocolError::EmptyResponse);
        }
        Ok(Self {
            choice: form.choice,
            response: form.response.clone(),
            satisfaction_survey: form.survey.to_string(),
            mark: form.render_marks(),
            category_ranking: form.ranking.clone(),
        })
    }
}
